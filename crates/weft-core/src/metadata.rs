//! Subject-keyed attribute stores with change notifications.
//!
//! A metadata store maps `(subject, key)` to a typed string value and
//! signals every effective mutation to its subscribers. Two flavours share
//! the interface: [`Metadata`] holds entries in-process only, while
//! [`SharedMetadata`] forwards writes through a [`MetadataMirror`] (the
//! cross-process metadata protocol, an external collaborator) and applies
//! inbound mirror changes through the same signal path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::iter::Iter;

/// The subject id denoting the global scope.
pub const SUBJECT_GLOBAL: u32 = 0;

/// One metadata entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub subject: u32,
    pub key: String,
    /// The type tag of the value, if one was given.
    pub value_type: Option<String>,
    pub value: String,
}

/// Change callback: `(subject, key, type, value)`; removal delivers absent
/// type and value.
pub type ChangeCallback =
    Box<dyn Fn(u32, &str, Option<&str>, Option<&str>) + Send + Sync>;

struct Inner {
    entries: Mutex<Vec<Entry>>,
    subscribers: Mutex<Vec<(u64, ChangeCallback)>>,
    next_subscriber: AtomicU64,
}

/// An in-process metadata store.
#[derive(Clone)]
pub struct Metadata {
    inner: Arc<Inner>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self::new()
    }
}

impl Metadata {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(Vec::new()),
                subscribers: Mutex::new(Vec::new()),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    fn notify(&self, subject: u32, key: &str, value_type: Option<&str>, value: Option<&str>) {
        let subscribers = self.inner.subscribers.lock().unwrap();
        for (_, callback) in subscribers.iter() {
            callback(subject, key, value_type, value);
        }
    }

    /// Sets or removes an entry.
    ///
    /// A `value` of `None` removes the entry; its `value_type` is ignored.
    /// Every effective mutation is signalled to all subscribers; removal
    /// of an absent entry is a no-op. Returns whether anything changed.
    pub fn set(
        &self,
        subject: u32,
        key: &str,
        value_type: Option<&str>,
        value: Option<&str>,
    ) -> Result<bool> {
        if key.is_empty() {
            return Err(Error::invalid_argument("metadata key cannot be empty"));
        }

        let changed = {
            let mut entries = self.inner.entries.lock().unwrap();
            let position =
                entries.iter().position(|e| e.subject == subject && e.key == key);
            match (position, value) {
                (Some(idx), Some(value)) => {
                    let entry = &mut entries[idx];
                    if entry.value == value
                        && entry.value_type.as_deref() == value_type
                    {
                        false
                    } else {
                        entry.value = value.to_string();
                        entry.value_type = value_type.map(str::to_string);
                        true
                    }
                }
                (None, Some(value)) => {
                    entries.push(Entry {
                        subject,
                        key: key.to_string(),
                        value_type: value_type.map(str::to_string),
                        value: value.to_string(),
                    });
                    true
                }
                (Some(idx), None) => {
                    entries.remove(idx);
                    true
                }
                (None, None) => false,
            }
        };

        if changed {
            log::trace!(
                target: "weft-metadata",
                "set {subject} {key} -> {value:?}"
            );
            match value {
                Some(value) => self.notify(subject, key, value_type, Some(value)),
                None => self.notify(subject, key, None, None),
            }
        }
        Ok(changed)
    }

    /// Finds the `(type, value)` of an entry.
    pub fn find(&self, subject: u32, key: &str) -> Option<(Option<String>, String)> {
        let entries = self.inner.entries.lock().unwrap();
        entries
            .iter()
            .find(|e| e.subject == subject && e.key == key)
            .map(|e| (e.value_type.clone(), e.value.clone()))
    }

    /// Iterates all entries of `subject`, or all entries when `subject`
    /// is unspecified, in insertion order.
    pub fn iter(&self, subject: Option<u32>) -> Iter<Entry> {
        let entries = self.inner.entries.lock().unwrap();
        let items = entries
            .iter()
            .filter(|e| subject.map(|s| e.subject == s).unwrap_or(true))
            .cloned()
            .collect();
        Iter::new(items)
    }

    /// Removes every entry, signalling each removal.
    pub fn clear(&self) {
        let removed: Vec<Entry> =
            std::mem::take(&mut *self.inner.entries.lock().unwrap());
        for entry in removed {
            self.notify(entry.subject, &entry.key, None, None);
        }
    }

    /// Subscribes to change signals. Returns an unsubscribe closure.
    pub fn subscribe(&self, callback: ChangeCallback) -> Box<dyn Fn() + Send + Sync> {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.lock().unwrap().push((id, callback));

        let inner = self.inner.clone();
        Box::new(move || {
            inner.subscribers.lock().unwrap().retain(|(sid, _)| *sid != id);
        })
    }
}

// ---------------------------------------------------------------------------
// SharedMetadata
// ---------------------------------------------------------------------------

/// The cross-process side of a shared metadata store. Implemented by the
/// graph protocol client; the core only requires that published writes
/// eventually come back through
/// [`SharedMetadata::apply_remote`].
pub trait MetadataMirror: Send + Sync {
    fn publish(
        &self,
        subject: u32,
        key: &str,
        value_type: Option<&str>,
        value: Option<&str>,
    ) -> Result<()>;
}

/// A metadata store mirrored across the graph.
///
/// Writes validate locally, go out through the mirror, and apply to the
/// local store (signalling subscribers). Inbound mirror changes are fed in
/// via [`apply_remote`](Self::apply_remote) and surface as ordinary change
/// signals.
pub struct SharedMetadata {
    local: Metadata,
    mirror: Arc<dyn MetadataMirror>,
}

impl SharedMetadata {
    pub fn new(mirror: Arc<dyn MetadataMirror>) -> Self {
        Self { local: Metadata::new(), mirror }
    }

    pub fn set(
        &self,
        subject: u32,
        key: &str,
        value_type: Option<&str>,
        value: Option<&str>,
    ) -> Result<bool> {
        if key.is_empty() {
            return Err(Error::invalid_argument("metadata key cannot be empty"));
        }
        self.mirror.publish(subject, key, value_type, value)?;
        self.local.set(subject, key, value_type, value)
    }

    /// Applies a change that arrived from the mirror. Mirror reads surface
    /// as the same change signals as local writes.
    pub fn apply_remote(
        &self,
        subject: u32,
        key: &str,
        value_type: Option<&str>,
        value: Option<&str>,
    ) -> Result<bool> {
        self.local.set(subject, key, value_type, value)
    }

    pub fn find(&self, subject: u32, key: &str) -> Option<(Option<String>, String)> {
        self.local.find(subject, key)
    }

    pub fn iter(&self, subject: Option<u32>) -> Iter<Entry> {
        self.local.iter(subject)
    }

    pub fn subscribe(&self, callback: ChangeCallback) -> Box<dyn Fn() + Send + Sync> {
        self.local.subscribe(callback)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
