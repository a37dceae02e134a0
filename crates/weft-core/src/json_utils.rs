//! JSON container merging and the rule engine.
//!
//! Merging combines two containers of the same kind: arrays concatenate,
//! objects merge per-key with an `override.` prefix escape that replaces
//! instead of merging. Rules are the `{matches, actions}` records shared by
//! the configuration and runtime layers.

use crate::error::{Error, Result};
use crate::glob;
use crate::json::{Json, JsonBuilder};
use crate::properties::Properties;

pub(crate) const OVERRIDE_PREFIX: &str = "override.";

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merges two JSON containers of the same kind into a new container.
///
/// Arrays concatenate (`a`'s elements first). Objects merge per-key: keys
/// present on one side copy as-is; keys present on both sides merge
/// recursively, except that an `override.` prefix on either side replaces
/// the other side's value outright (the prefix is stripped in the result).
///
/// Anything else fails with [`Error::OperationFailed`] and leaves both
/// inputs untouched; the caller chooses whether to replace or skip.
pub fn merge_containers(a: &Json, b: &Json) -> Result<Json> {
    if a.is_array() && b.is_array() {
        Ok(merge_arrays(a, b))
    } else if a.is_object() && b.is_object() {
        Ok(merge_objects(a, b))
    } else {
        Err(Error::operation_failed("JSON values are not compatible containers"))
    }
}

fn merge_arrays(a: &Json, b: &Json) -> Json {
    let mut builder = JsonBuilder::new_array();
    for item in a.array_iter().chain(b.array_iter()) {
        builder.add_json(&item);
    }
    builder.build()
}

/// Strips the `override.` prefix, reporting whether it was present.
fn split_override(key: &str) -> (&str, bool) {
    match key.strip_prefix(OVERRIDE_PREFIX) {
        Some(stripped) => (stripped, true),
        None => (key, false),
    }
}

/// Looks up `key` in `obj` under either its plain or `override.`-prefixed
/// spelling.
fn object_get_either(obj: &Json, key: &str) -> Option<(Json, bool)> {
    if let Some(value) = obj.object_get(key) {
        return Some((value, false));
    }
    obj.object_get(&format!("{OVERRIDE_PREFIX}{key}")).map(|value| (value, true))
}

fn merge_objects(a: &Json, b: &Json) -> Json {
    let mut builder = JsonBuilder::new_object();

    // keys of 'a' that 'b' does not touch
    for (key, value) in a.object_iter() {
        let Some(key) = key.parse_string() else { continue };
        let (key, _) = split_override(&key);
        if object_get_either(b, key).is_none() {
            builder.add_property(key);
            builder.add_json(&value);
        }
    }

    // keys of 'b': new keys copy, shared keys merge unless overridden
    for (key, value) in b.object_iter() {
        let Some(key) = key.parse_string() else { continue };
        let (key, override_b) = split_override(&key);

        let merged = match object_get_either(a, key) {
            // an override on 'a' pins its value against a plain 'b' key
            Some((old, true)) if !override_b => old,
            Some((old, false)) if !override_b => merge_values(key, &old, &value),
            _ => value,
        };
        builder.add_property(key);
        builder.add_json(&merged);
    }

    builder.build()
}

/// Merges the values of a key present on both sides of an object merge.
fn merge_values(key: &str, old: &Json, new: &Json) -> Json {
    if old.is_container() || new.is_container() {
        match merge_containers(old, new) {
            Ok(merged) => merged,
            Err(_) => {
                log::warn!(
                    target: "weft-json",
                    "skipping merge of '{key}' as JSON values are not compatible"
                );
                old.clone()
            }
        }
    } else {
        // scalar on scalar: the newer value wins
        new.clone()
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Checks a single match clause value against a property value.
///
/// A `~` prefix makes the clause a glob pattern, `!` negates it, and `!~`
/// negates a glob. Negated clauses also match when the property is absent.
fn match_clause(value: &str, actual: Option<&str>) -> bool {
    if let Some(pattern) = value.strip_prefix("!~") {
        !matches!(actual, Some(actual) if glob::pattern_match(pattern, actual))
    } else if let Some(expected) = value.strip_prefix('!') {
        actual != Some(expected)
    } else if let Some(pattern) = value.strip_prefix('~') {
        matches!(actual, Some(actual) if glob::pattern_match(pattern, actual))
    } else {
        actual == Some(value)
    }
}

/// Checks whether any alternative in a `matches` array is satisfied by
/// `props`. Within one alternative, every clause must be satisfied.
fn matches_properties(matches: &Json, props: &Properties) -> bool {
    if !matches.is_array() {
        return false;
    }
    for alternative in matches.array_iter() {
        if !alternative.is_object() {
            continue;
        }
        let all_satisfied = alternative.object_iter().all(|(key, value)| {
            let (Some(key), Some(value)) = (key.parse_string(), value.parse_string()) else {
                return false;
            };
            match_clause(&value, props.get(&key))
        });
        if all_satisfied {
            return true;
        }
    }
    false
}

/// Matches `props` against a JSON array of rules and calls `callback` for
/// every action of every rule whose `matches` clause is satisfied.
///
/// Each rule is an object `{matches: [{key: value, ...}, ...],
/// actions: {name: <any-json>, ...}}`. A callback error aborts the whole
/// application and is returned to the caller.
pub fn match_rules(
    rules: &Json,
    props: &Properties,
    mut callback: impl FnMut(&str, &Json) -> Result<()>,
) -> Result<()> {
    if !rules.is_array() {
        return Err(Error::invalid_argument("rules must be a JSON array"));
    }

    for rule in rules.array_iter() {
        if !rule.is_object() {
            continue;
        }
        let Some(matches) = rule.object_get("matches") else { continue };
        if !matches_properties(&matches, props) {
            continue;
        }
        let Some(actions) = rule.object_get("actions") else { continue };
        if !actions.is_object() {
            continue;
        }
        for (action, value) in actions.object_iter() {
            let Some(action) = action.parse_string() else { continue };
            callback(&action, &value)?;
        }
    }
    Ok(())
}

/// Matches `props` against `rules` and applies the standard `update-props`
/// action back onto `props`. Returns the number of properties updated.
/// Callback errors cannot occur here; malformed actions are skipped.
pub fn match_rules_update_properties(rules: &Json, props: &mut Properties) -> usize {
    let snapshot = props.clone();
    let mut updated = 0;
    let result = match_rules(rules, &snapshot, |action, value| {
        if action == "update-props" {
            updated += props.update_from_json(value);
        }
        Ok(())
    });
    if let Err(e) = result {
        log::warn!(target: "weft-json", "{e}");
    }
    updated
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
