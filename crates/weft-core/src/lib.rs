//! weft-core: the core engine of the Weft session and policy manager.
//!
//! This crate contains the four tightly coupled mechanisms the policy
//! layer is built on: a layered configuration turned into a live settings
//! tree, a prioritized event pipeline of topologically ordered hooks,
//! constraint-based interest matching over graph objects, and shared
//! metadata with change notifications. The media-graph protocol client,
//! the CLI host, and the individual policy scripts are external
//! collaborators.
//!
//! # Crate Organization
//!
//! - `error` — The error taxonomy used across the crate
//! - `json` — Immutable JSON values in the daemon's relaxed dialect
//! - `json_utils` — Container merging and the rule engine
//! - `properties` — Ordered string→string maps
//! - `glob` — The shared glob matcher
//! - `interest` — Object interests: type filter + constraints
//! - `iter` — Resettable snapshot iterators
//! - `base_dirs` — Configuration/data file lookup
//! - `conf` — The layered configuration store
//! - `cancellation` — Cancellation tokens carried by events
//! - `event` — Prioritized events
//! - `hook` — Simple and transition hooks
//! - `dispatcher` — Hook registry, event queue, dispatch loop
//! - `metadata` — Subject-keyed attribute stores
//! - `plugin` — The plug-in contract
//! - `core` — The aggregation object tying it all together

pub mod base_dirs;
pub mod cancellation;
pub mod conf;
pub mod core;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod glob;
pub mod hook;
pub mod interest;
pub mod iter;
pub mod json;
pub mod json_utils;
pub mod metadata;
pub mod plugin;
pub mod properties;

pub use crate::core::Core;
pub use crate::error::{Error, Result};
