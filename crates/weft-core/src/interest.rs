//! Declarative interest in graph objects.
//!
//! An [`ObjectInterest`] pairs a type filter with a list of constraints
//! over an object's graph properties, global graph properties, or
//! per-instance attributes. Hooks use interests to select the events they
//! run for; object managers use them to select the objects they index.
//!
//! An interest must be validated before its first match. Validation checks
//! the structure of every constraint and caches the type that each
//! constraint's subject must coerce to. Adding a constraint re-invalidates
//! the interest.

use crate::error::{Error, Result};
use crate::glob;
use crate::properties::Properties;

// ---------------------------------------------------------------------------
// ObjectType
// ---------------------------------------------------------------------------

/// The known graph object types, arranged in a small hierarchy:
///
/// ```text
/// Object
/// ├── Event
/// └── GlobalObject
///     ├── Node ── Port ── Link ── Client ── Device ── Metadata
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// Root of the hierarchy; an interest in `Object` matches everything.
    Object,
    /// An in-flight event; the type used by event hooks.
    Event,
    /// Any object that exists in the graph's global registry.
    GlobalObject,
    Node,
    Port,
    Link,
    Client,
    Device,
    Metadata,
}

impl ObjectType {
    fn parent(self) -> Option<ObjectType> {
        use ObjectType::*;
        match self {
            Object => None,
            Event | GlobalObject => Some(Object),
            Node | Port | Link | Client | Device | Metadata => Some(GlobalObject),
        }
    }

    /// `true` if `self` is `ancestor` or a descendant of it.
    pub fn is_a(self, ancestor: ObjectType) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty == ancestor {
                return true;
            }
            current = ty.parent();
        }
        false
    }

    pub fn name(self) -> &'static str {
        use ObjectType::*;
        match self {
            Object => "Object",
            Event => "Event",
            GlobalObject => "GlobalObject",
            Node => "Node",
            Port => "Port",
            Link => "Link",
            Client => "Client",
            Device => "Device",
            Metadata => "Metadata",
        }
    }
}

// ---------------------------------------------------------------------------
// GraphObject
// ---------------------------------------------------------------------------

/// The view of a graph object that interests match against.
///
/// External collaborators (the graph protocol client) implement this for
/// their proxy types; the core implements it for events.
pub trait GraphObject: Send + Sync {
    fn object_type(&self) -> ObjectType;

    /// The object's graph properties, if it has any.
    fn properties(&self) -> Option<Properties> {
        None
    }

    /// The object's global graph properties, if it has any.
    fn global_properties(&self) -> Option<Properties> {
        None
    }

    /// A per-instance attribute in string form, if present.
    fn attribute(&self, _key: &str) -> Option<String> {
        None
    }
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

/// Where a constraint's subject value is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintType {
    /// A graph property of the object (or of the event's property bag).
    Property,
    /// A global graph property of the object.
    GlobalProperty,
    /// A per-instance attribute of the object.
    Attribute,
}

/// The operation a constraint performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintVerb {
    Equals,
    NotEquals,
    InList,
    InRange,
    Matches,
    IsPresent,
    IsAbsent,
}

/// A strongly typed constraint value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstraintValue {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(String),
    /// A homogeneous tuple, used by `InList` and `InRange`.
    Tuple(Vec<ConstraintValue>),
}

impl ConstraintValue {
    /// Convenience constructor for string-tuple values.
    pub fn string_list<S: Into<String>>(items: impl IntoIterator<Item = S>) -> Self {
        Self::Tuple(items.into_iter().map(|s| ConstraintValue::String(s.into())).collect())
    }

    fn subject_type(&self) -> Option<SubjectType> {
        match self {
            Self::Bool(_) => Some(SubjectType::Bool),
            Self::Int(_) => Some(SubjectType::Int),
            Self::Uint(_) => Some(SubjectType::Uint),
            Self::Int64(_) => Some(SubjectType::Int64),
            Self::Uint64(_) => Some(SubjectType::Uint64),
            Self::Double(_) => Some(SubjectType::Double),
            Self::String(_) => Some(SubjectType::String),
            Self::Tuple(items) => items.first().and_then(|i| i.subject_type()),
        }
    }
}

/// The coerced type a constraint's subject must have, cached by validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubjectType {
    Bool,
    Int,
    Uint,
    Int64,
    Uint64,
    Double,
    String,
}

impl SubjectType {
    fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Uint | Self::Int64 | Self::Uint64 | Self::Double)
    }
}

/// A coerced subject value, ready for comparison.
#[derive(Debug, Clone)]
enum SubjectValue {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(String),
}

/// Mirrors the float comparison tolerance used for double equality.
const DOUBLE_EPSILON: f64 = f32::EPSILON as f64;

fn coerce(ty: SubjectType, raw: &str) -> Option<SubjectValue> {
    match ty {
        SubjectType::Bool => match raw {
            "true" | "1" => Some(SubjectValue::Bool(true)),
            "false" | "0" => Some(SubjectValue::Bool(false)),
            _ => None,
        },
        SubjectType::Int => raw.parse::<i32>().ok().map(SubjectValue::Int),
        SubjectType::Uint => raw.parse::<u32>().ok().map(SubjectValue::Uint),
        SubjectType::Int64 => raw.parse::<i64>().ok().map(SubjectValue::Int64),
        SubjectType::Uint64 => raw.parse::<u64>().ok().map(SubjectValue::Uint64),
        SubjectType::Double => raw.parse::<f64>().ok().map(SubjectValue::Double),
        SubjectType::String => Some(SubjectValue::String(raw.to_string())),
    }
}

fn value_equals(subject: &SubjectValue, value: &ConstraintValue) -> bool {
    match (subject, value) {
        (SubjectValue::Bool(a), ConstraintValue::Bool(b)) => a == b,
        (SubjectValue::Int(a), ConstraintValue::Int(b)) => a == b,
        (SubjectValue::Uint(a), ConstraintValue::Uint(b)) => a == b,
        (SubjectValue::Int64(a), ConstraintValue::Int64(b)) => a == b,
        (SubjectValue::Uint64(a), ConstraintValue::Uint64(b)) => a == b,
        (SubjectValue::Double(a), ConstraintValue::Double(b)) => (a - b).abs() <= DOUBLE_EPSILON,
        (SubjectValue::String(a), ConstraintValue::String(b)) => a == b,
        _ => false,
    }
}

fn value_in_range(subject: &SubjectValue, min: &ConstraintValue, max: &ConstraintValue) -> bool {
    match (subject, min, max) {
        (SubjectValue::Int(v), ConstraintValue::Int(lo), ConstraintValue::Int(hi)) => {
            lo <= v && v <= hi
        }
        (SubjectValue::Uint(v), ConstraintValue::Uint(lo), ConstraintValue::Uint(hi)) => {
            lo <= v && v <= hi
        }
        (SubjectValue::Int64(v), ConstraintValue::Int64(lo), ConstraintValue::Int64(hi)) => {
            lo <= v && v <= hi
        }
        (SubjectValue::Uint64(v), ConstraintValue::Uint64(lo), ConstraintValue::Uint64(hi)) => {
            lo <= v && v <= hi
        }
        (SubjectValue::Double(v), ConstraintValue::Double(lo), ConstraintValue::Double(hi)) => {
            lo <= v && v <= hi
        }
        _ => false,
    }
}

#[derive(Debug, Clone)]
struct Constraint {
    ctype: ConstraintType,
    verb: ConstraintVerb,
    subject: String,
    value: Option<ConstraintValue>,
    /// Filled in by validation.
    subject_type: Option<SubjectType>,
}

impl Constraint {
    fn validate(&mut self) -> Result<()> {
        if self.subject.is_empty() {
            return Err(Error::validation("constraint subject cannot be empty"));
        }

        let value = match self.verb {
            ConstraintVerb::Equals
            | ConstraintVerb::NotEquals
            | ConstraintVerb::InList
            | ConstraintVerb::InRange
            | ConstraintVerb::Matches => match &self.value {
                Some(value) => value,
                None => {
                    return Err(Error::validation(format!(
                        "verb {:?} requires a value",
                        self.verb
                    )))
                }
            },
            ConstraintVerb::IsPresent | ConstraintVerb::IsAbsent => {
                if self.value.is_some() {
                    return Err(Error::validation(format!(
                        "verb {:?} must not have a value",
                        self.verb
                    )));
                }
                self.subject_type = None;
                return Ok(());
            }
        };

        match self.verb {
            ConstraintVerb::Equals | ConstraintVerb::NotEquals => {
                if matches!(value, ConstraintValue::Tuple(_)) {
                    return Err(Error::validation("equality requires a scalar value"));
                }
            }
            ConstraintVerb::Matches => {
                if !matches!(value, ConstraintValue::String(_)) {
                    return Err(Error::validation("matches requires a string pattern"));
                }
            }
            ConstraintVerb::InList => {
                let ConstraintValue::Tuple(items) = value else {
                    return Err(Error::validation("in-list requires a tuple value"));
                };
                if items.is_empty() {
                    return Err(Error::validation("in-list tuple cannot be empty"));
                }
                let first = items[0].subject_type();
                let homogeneous = items.iter().all(|i| i.subject_type() == first);
                let legal = matches!(
                    first,
                    Some(ty) if ty == SubjectType::String || ty.is_numeric()
                );
                if !homogeneous || !legal {
                    return Err(Error::validation(
                        "in-list tuple must contain strings or numbers of one type",
                    ));
                }
            }
            ConstraintVerb::InRange => {
                let ConstraintValue::Tuple(items) = value else {
                    return Err(Error::validation("in-range requires a tuple value"));
                };
                if items.len() != 2 {
                    return Err(Error::validation("in-range tuple must have exactly 2 members"));
                }
                let first = items[0].subject_type();
                if items[1].subject_type() != first
                    || !matches!(first, Some(ty) if ty.is_numeric())
                {
                    return Err(Error::validation(
                        "in-range tuple must contain 2 numbers of the same type",
                    ));
                }
            }
            ConstraintVerb::IsPresent | ConstraintVerb::IsAbsent => unreachable!(),
        }

        self.subject_type = value.subject_type();
        Ok(())
    }

    /// Evaluates this constraint against the resolved subject value.
    /// `raw` is `None` when the subject does not exist in its bag.
    fn satisfied(&self, raw: Option<&str>) -> bool {
        let coerced = match (raw, self.subject_type) {
            (Some(raw), Some(ty)) => coerce(ty, raw),
            (Some(_), None) => None,
            (None, _) => None,
        };
        // a failed coercion counts as an absent subject
        let exists = raw.is_some() && (self.subject_type.is_none() || coerced.is_some());

        match self.verb {
            ConstraintVerb::IsPresent => exists,
            ConstraintVerb::IsAbsent => !exists,
            ConstraintVerb::Equals => match (&coerced, &self.value) {
                (Some(subject), Some(value)) => value_equals(subject, value),
                _ => false,
            },
            ConstraintVerb::NotEquals => match (&coerced, &self.value) {
                (Some(subject), Some(value)) => !value_equals(subject, value),
                _ => false,
            },
            ConstraintVerb::Matches => match (&coerced, &self.value) {
                (Some(SubjectValue::String(s)), Some(ConstraintValue::String(pattern))) => {
                    glob::pattern_match(pattern, s)
                }
                _ => false,
            },
            ConstraintVerb::InList => match (&coerced, &self.value) {
                (Some(subject), Some(ConstraintValue::Tuple(items))) => {
                    items.iter().any(|item| value_equals(subject, item))
                }
                _ => false,
            },
            ConstraintVerb::InRange => match (&coerced, &self.value) {
                (Some(subject), Some(ConstraintValue::Tuple(items))) if items.len() == 2 => {
                    value_in_range(subject, &items[0], &items[1])
                }
                _ => false,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectInterest
// ---------------------------------------------------------------------------

/// A type filter plus a list of property constraints.
#[derive(Debug, Clone)]
pub struct ObjectInterest {
    object_type: ObjectType,
    constraints: Vec<Constraint>,
    valid: bool,
}

pub(crate) struct MatchParts {
    pub type_ok: bool,
    pub constraints_ok: bool,
}

impl ObjectInterest {
    /// Creates an interest in objects of `object_type` with no constraints.
    pub fn new(object_type: ObjectType) -> Self {
        Self { object_type, constraints: Vec::new(), valid: false }
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Adds a constraint. The interest must be re-validated before use.
    pub fn add_constraint(
        &mut self,
        ctype: ConstraintType,
        subject: &str,
        verb: ConstraintVerb,
        value: Option<ConstraintValue>,
    ) {
        self.constraints.push(Constraint {
            ctype,
            verb,
            subject: subject.to_string(),
            value,
            subject_type: None,
        });
        self.valid = false;
    }

    /// Validates the interest, caching each constraint's subject type.
    /// Idempotent once valid.
    pub fn validate(&mut self) -> Result<()> {
        if self.valid {
            return Ok(());
        }
        for constraint in &mut self.constraints {
            constraint.validate()?;
        }
        self.valid = true;
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Checks `object` against this interest's type and constraints.
    pub fn matches(&self, object: &dyn GraphObject) -> bool {
        self.matches_full(
            object.object_type(),
            Some(object),
            object.properties().as_ref(),
            object.global_properties().as_ref(),
        )
    }

    /// The general entry point: any of the bags may be omitted, and
    /// constraints that reference an absent bag fail gracefully (except
    /// `IsAbsent`, which succeeds).
    pub fn matches_full(
        &self,
        object_type: ObjectType,
        object: Option<&dyn GraphObject>,
        props: Option<&Properties>,
        global_props: Option<&Properties>,
    ) -> bool {
        let parts = self.matches_parts(object_type, object, props, global_props);
        parts.type_ok && parts.constraints_ok
    }

    /// Collects the string values that constraints on the `Property`
    /// subject `key` pin with `Equals` or `InList`. Used by the hook
    /// registry to derive a hook's declared event types.
    pub(crate) fn collect_string_equalities(&self, key: &str, out: &mut Vec<String>) {
        for constraint in &self.constraints {
            if constraint.ctype != ConstraintType::Property || constraint.subject != key {
                continue;
            }
            match (&constraint.verb, &constraint.value) {
                (ConstraintVerb::Equals, Some(ConstraintValue::String(value))) => {
                    out.push(value.clone());
                }
                (ConstraintVerb::InList, Some(ConstraintValue::Tuple(items))) => {
                    for item in items {
                        if let ConstraintValue::String(value) = item {
                            out.push(value.clone());
                        }
                    }
                }
                _ => {}
            }
        }
    }

    pub(crate) fn matches_parts(
        &self,
        object_type: ObjectType,
        object: Option<&dyn GraphObject>,
        props: Option<&Properties>,
        global_props: Option<&Properties>,
    ) -> MatchParts {
        if !self.valid {
            log::error!(
                target: "weft-interest",
                "interest for {} used without validation",
                self.object_type.name()
            );
            return MatchParts { type_ok: false, constraints_ok: false };
        }

        // fetch missing bags from the object when one was provided
        let fetched_props = if props.is_none() { object.and_then(|o| o.properties()) } else { None };
        let fetched_global = if global_props.is_none() {
            object.and_then(|o| o.global_properties())
        } else {
            None
        };
        let props = props.or(fetched_props.as_ref());
        let global_props = global_props.or(fetched_global.as_ref());

        let type_ok = object_type.is_a(self.object_type);
        let mut constraints_ok = true;

        for constraint in &self.constraints {
            let raw: Option<String> = match constraint.ctype {
                ConstraintType::Property => {
                    props.and_then(|p| p.get(&constraint.subject)).map(str::to_string)
                }
                ConstraintType::GlobalProperty => {
                    global_props.and_then(|p| p.get(&constraint.subject)).map(str::to_string)
                }
                ConstraintType::Attribute => object.and_then(|o| o.attribute(&constraint.subject)),
            };
            if !constraint.satisfied(raw.as_deref()) {
                constraints_ok = false;
                break;
            }
        }

        MatchParts { type_ok, constraints_ok }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
