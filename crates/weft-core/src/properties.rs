//! Ordered string→string property maps.
//!
//! Properties are the lingua franca of the core: events carry them, rules
//! match against them, graph objects expose them. Keys are unique and
//! insertion order is preserved for iteration and debug output.

use indexmap::IndexMap;

use crate::glob;
use crate::json::Json;

/// An ordered mapping from string keys to string values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    map: IndexMap<String, String>,
}

impl Properties {
    /// Creates an empty properties set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a properties set from `(key, value)` pairs. Later pairs
    /// overwrite earlier ones with the same key.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut props = Self::new();
        for (key, value) in pairs {
            props.map.insert(key.into(), value.into());
        }
        props
    }

    /// Returns the value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// Sets or removes a key.
    ///
    /// `Some(value)` inserts or replaces; `None` removes. Returns whether
    /// the set actually changed.
    pub fn set(&mut self, key: &str, value: Option<&str>) -> bool {
        match value {
            Some(value) => {
                if self.map.get(key).map(String::as_str) == Some(value) {
                    return false;
                }
                self.map.insert(key.to_string(), value.to_string());
                true
            }
            None => self.map.shift_remove(key).is_some(),
        }
    }

    /// Overlays every entry from `other` onto this set.
    /// Returns the number of entries that changed.
    pub fn update(&mut self, other: &Properties) -> usize {
        let mut changed = 0;
        for (key, value) in other.iter() {
            if self.set(key, Some(value)) {
                changed += 1;
            }
        }
        changed
    }

    /// Overlays the entries of a JSON object onto this set. Values are
    /// stringified (quoted strings unescape, other scalars keep their
    /// literal text, containers keep their raw JSON text).
    /// Returns the number of entries that changed.
    pub fn update_from_json(&mut self, json: &Json) -> usize {
        let mut changed = 0;
        if !json.is_object() {
            return 0;
        }
        for (key, value) in json.object_iter() {
            let Some(key) = key.parse_string() else { continue };
            let value = value.parse_string().unwrap_or_else(|| value.text().to_string());
            if self.set(&key, Some(&value)) {
                changed += 1;
            }
        }
        changed
    }

    /// Checks this set against the patterns in `other`.
    ///
    /// For every key present in the receiver: if `other` lacks the key the
    /// entry is ignored; otherwise `other`'s value is a glob pattern that
    /// must match the receiver's value. Returns `true` if all present
    /// patterns matched.
    pub fn matches(&self, other: &Properties) -> bool {
        for (key, value) in self.iter() {
            if let Some(pattern) = other.get(key) {
                if !glob::pattern_match(pattern, value) {
                    return false;
                }
            }
        }
        true
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Iterates entries sorted by key.
    pub fn iter_sorted(&self) -> impl Iterator<Item = (&str, &str)> {
        let mut entries: Vec<_> = self.map.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        entries.sort_by_key(|(k, _)| *k);
        entries.into_iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }
}

impl<'a> IntoIterator for &'a Properties {
    type Item = (&'a str, &'a str);
    type IntoIter = Box<dyn Iterator<Item = (&'a str, &'a str)> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.map.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}
