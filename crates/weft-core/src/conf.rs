//! The layered configuration store.
//!
//! A [`Conf`] is seeded once from an ordered list of configuration files
//! (lowest priority first) and is immutable afterwards. Each file
//! contributes top-level named sections; sections with the same name merge
//! across files, except that an `override.` prefix suppresses merging with
//! earlier occurrences. Section loading is lazy: the first query for a
//! section merges and caches it.
//!
//! # Connections
//!
//! - File discovery goes through [`crate::base_dirs`].
//! - Merging and rule application use [`crate::json_utils`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::base_dirs::{self, LookupDirs};
use crate::error::{Error, Result};
use crate::json::{self, Json};
use crate::json_utils::{self, OVERRIDE_PREFIX};
use crate::properties::Properties;

/// The parsed sections of one configuration file.
struct Fragment {
    location: String,
    sections: Vec<(String, Json)>,
}

/// Read-only access to the merged configuration.
pub struct Conf {
    fragments: Vec<Fragment>,
    /// Lazy per-section cache; negative results are cached too.
    sections: Mutex<HashMap<String, Option<Json>>>,
}

impl Conf {
    /// Loads configuration from explicit files, lowest priority first.
    pub fn open(paths: &[PathBuf]) -> Result<Conf> {
        let mut fragments = Vec::with_capacity(paths.len());
        for path in paths {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                Error::operation_failed(format!("cannot read {}: {e}", path.display()))
            })?;
            fragments.push(Fragment {
                location: path.display().to_string(),
                sections: json::top_level_pairs(&contents),
            });
        }
        Ok(Self { fragments, sections: Mutex::new(HashMap::new()) })
    }

    /// Discovers and loads `<name>.conf` plus all `<name>.conf.d/*.conf`
    /// fragments from the standard configuration directories.
    pub fn discover(name: &str) -> Result<Conf> {
        let main = format!("{name}.conf");
        let fragment_dir = format!("{name}.conf.d");

        let mut paths = Vec::new();
        if let Some(path) = base_dirs::find_file(LookupDirs::CONFIG, None, &main) {
            paths.push(path);
        }
        paths.extend(base_dirs::new_files_iterator(
            LookupDirs::CONFIG,
            Some(&fragment_dir),
            Some(".conf"),
        ));

        log::debug!(target: "weft-conf", "loading configuration from {} file(s)", paths.len());
        Self::open(&paths)
    }

    /// Builds a configuration from in-memory `(location, contents)` pairs,
    /// lowest priority first. Intended for embedders and tests.
    pub fn from_strings(files: &[(&str, &str)]) -> Conf {
        let fragments = files
            .iter()
            .map(|(location, contents)| Fragment {
                location: location.to_string(),
                sections: json::top_level_pairs(contents),
            })
            .collect();
        Self { fragments, sections: Mutex::new(HashMap::new()) }
    }

    fn merge_occurrence(
        &self,
        merged: &mut Option<Json>,
        section: &str,
        location: &str,
        value: &Json,
        is_override: bool,
    ) {
        if !value.is_container() {
            log::warn!(
                target: "weft-conf",
                "skipping section {section} from {location} as it is not a JSON object or array"
            );
            return;
        }

        if let Some(previous) = merged.as_ref().filter(|_| !is_override) {
            match json_utils::merge_containers(previous, value) {
                Ok(result) => *merged = Some(result),
                Err(_) => {
                    log::warn!(
                        target: "weft-conf",
                        "skipping merge of {section} from {location} as JSON values are not compatible"
                    );
                }
            }
        } else {
            *merged = Some(value.clone());
        }
        log::debug!(target: "weft-conf", "section {section} from {location} loaded");
    }

    fn load_section(&self, name: &str) -> Option<Json> {
        let override_name = format!("{OVERRIDE_PREFIX}{name}");
        let mut merged: Option<Json> = None;

        for (lookup, is_override) in [(name, false), (override_name.as_str(), true)] {
            for fragment in &self.fragments {
                for (section, value) in &fragment.sections {
                    if section == lookup {
                        self.merge_occurrence(
                            &mut merged,
                            name,
                            &fragment.location,
                            value,
                            is_override,
                        );
                    }
                }
            }
        }

        merged
    }

    /// Returns the merged section `name`, the `fallback`, or nothing.
    pub fn section(&self, name: &str, fallback: Option<Json>) -> Option<Json> {
        let mut cache = self.sections.lock().unwrap();
        let entry =
            cache.entry(name.to_string()).or_insert_with(|| self.load_section(name)).clone();
        drop(cache);
        entry.or(fallback)
    }

    /// Extracts `key` from an object section. Returns the `fallback` when
    /// the section is missing, not an object, or lacks the key.
    pub fn value(&self, section: &str, key: &str, fallback: Option<Json>) -> Option<Json> {
        let Some(s) = self.section(section, None) else { return fallback };
        if !s.is_object() {
            log::warn!(
                target: "weft-conf",
                "cannot get key {key} from {section} as the section is not a JSON object"
            );
            return fallback;
        }
        s.object_get(key).or(fallback)
    }

    pub fn value_boolean(&self, section: &str, key: &str, fallback: bool) -> bool {
        self.value(section, key, None).and_then(|v| v.as_bool()).unwrap_or(fallback)
    }

    pub fn value_int(&self, section: &str, key: &str, fallback: i64) -> i64 {
        self.value(section, key, None).and_then(|v| v.as_int()).unwrap_or(fallback)
    }

    pub fn value_float(&self, section: &str, key: &str, fallback: f64) -> f64 {
        self.value(section, key, None).and_then(|v| v.as_float()).unwrap_or(fallback)
    }

    pub fn value_string(&self, section: &str, key: &str, fallback: Option<&str>) -> Option<String> {
        self.value(section, key, None)
            .and_then(|v| v.parse_string())
            .or_else(|| fallback.map(str::to_string))
    }

    /// Applies the rules in `section` to a property bag.
    ///
    /// When `applied_props` is given, it receives a copy of `match_props`
    /// plus every `update-props` result, and `match_props` stays untouched;
    /// otherwise `update-props` writes into `match_props` directly. The
    /// `fallback_rules` are used when the section is missing or not an
    /// array. Returns whether any rule's actions were applied.
    pub fn apply_rules(
        &self,
        section: &str,
        match_props: &mut Properties,
        applied_props: Option<&mut Properties>,
        fallback_rules: Option<&Json>,
    ) -> bool {
        let rules = self
            .section(section, None)
            .filter(Json::is_array)
            .or_else(|| fallback_rules.filter(|j| j.is_array()).cloned());
        let Some(rules) = rules else { return false };

        let snapshot = match_props.clone();
        let target: &mut Properties = match applied_props {
            Some(applied) => {
                applied.update(&snapshot);
                applied
            }
            None => match_props,
        };

        let mut applied_any = false;
        let result = json_utils::match_rules(&rules, &snapshot, |action, value| {
            applied_any = true;
            if action == "update-props" {
                target.update_from_json(value);
            }
            Ok(())
        });
        if let Err(e) = result {
            log::warn!(target: "weft-conf", "rules from section {section}: {e}");
            return false;
        }
        applied_any
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---------------------------------------------------------------
    // Section merging
    // ---------------------------------------------------------------

    #[test]
    fn sections_merge_across_files() {
        let conf = Conf::from_strings(&[
            ("one.conf", "a = { x = 1, y = 2 }"),
            ("two.conf", "a = { y = 3, z = 4 }"),
        ]);
        let section = conf.section("a", None).unwrap();
        assert_eq!(section, Json::from_str("{ x = 1, y = 3, z = 4 }"));
    }

    #[test]
    fn override_section_discards_merge() {
        let conf = Conf::from_strings(&[
            ("one.conf", "a = { x = 1, y = 2 }"),
            ("two.conf", "a = { y = 3, z = 4 }\noverride.a = { only = true }"),
        ]);
        let section = conf.section("a", None).unwrap();
        assert_eq!(section, Json::from_str("{ only = true }"));
    }

    #[test]
    fn array_sections_concatenate() {
        let conf = Conf::from_strings(&[
            ("one.conf", "rules = [ 1 ]"),
            ("two.conf", "rules = [ 2, 3 ]"),
        ]);
        let section = conf.section("rules", None).unwrap();
        assert_eq!(section, Json::from_str("[1, 2, 3]"));
    }

    #[test]
    fn non_container_sections_are_skipped() {
        let conf = Conf::from_strings(&[("one.conf", "a = 42\nb = { ok = true }")]);
        assert!(conf.section("a", None).is_none());
        assert!(conf.section("b", None).is_some());
    }

    #[test]
    fn missing_section_uses_fallback() {
        let conf = Conf::from_strings(&[("one.conf", "")]);
        assert!(conf.section("missing", None).is_none());
        let fb = conf.section("missing", Some(Json::from_str("{}"))).unwrap();
        assert!(fb.is_object());
    }

    #[test]
    fn incompatible_section_merge_keeps_earlier_value() {
        let conf = Conf::from_strings(&[
            ("one.conf", "a = { x = 1 }"),
            ("two.conf", "a = [ 2 ]"),
        ]);
        let section = conf.section("a", None).unwrap();
        assert_eq!(section, Json::from_str("{ x = 1 }"));
    }

    #[test]
    fn comments_and_relaxed_syntax_in_files() {
        let conf = Conf::from_strings(&[(
            "one.conf",
            "# header comment\nsettings = {\n  log.level = 2  # inline\n}\n",
        )]);
        assert_eq!(conf.value_int("settings", "log.level", 0), 2);
    }

    // ---------------------------------------------------------------
    // Typed value access
    // ---------------------------------------------------------------

    #[test]
    fn typed_values_with_fallbacks() {
        let conf = Conf::from_strings(&[(
            "one.conf",
            r#"settings = { enabled = true, retries = 3, ratio = 0.25, name = "weft" }"#,
        )]);
        assert!(conf.value_boolean("settings", "enabled", false));
        assert_eq!(conf.value_int("settings", "retries", 0), 3);
        assert_eq!(conf.value_float("settings", "ratio", 0.0), 0.25);
        assert_eq!(conf.value_string("settings", "name", None).unwrap(), "weft");

        // absent key and mismatched type fall back
        assert_eq!(conf.value_int("settings", "missing", 7), 7);
        assert!(!conf.value_boolean("settings", "name", false));
        assert_eq!(conf.value_string("missing-section", "k", Some("fb")).unwrap(), "fb");
    }

    #[test]
    fn value_from_array_section_falls_back() {
        let conf = Conf::from_strings(&[("one.conf", "arr = [1, 2]")]);
        assert!(conf.value("arr", "k", None).is_none());
        assert_eq!(conf.value_int("arr", "k", 9), 9);
    }

    // ---------------------------------------------------------------
    // Rule application
    // ---------------------------------------------------------------

    const RULES: &str = r#"
        device-rules = [
            {
                matches = [ { device.name = "~alsa_card.*" } ]
                actions = { update-props = { use.acp = "true" } }
            }
        ]
    "#;

    #[test]
    fn apply_rules_updates_match_props_in_place() {
        let conf = Conf::from_strings(&[("one.conf", RULES)]);
        let mut props = Properties::from_pairs([("device.name", "alsa_card.0")]);
        assert!(conf.apply_rules("device-rules", &mut props, None, None));
        assert_eq!(props.get("use.acp"), Some("true"));
        assert_eq!(props.get("device.name"), Some("alsa_card.0"));
    }

    #[test]
    fn apply_rules_with_applied_props_leaves_match_props_untouched() {
        let conf = Conf::from_strings(&[("one.conf", RULES)]);
        let mut match_props = Properties::from_pairs([("device.name", "alsa_card.0")]);
        let mut applied = Properties::new();
        assert!(conf.apply_rules("device-rules", &mut match_props, Some(&mut applied), None));

        assert!(match_props.get("use.acp").is_none());
        assert_eq!(applied.get("use.acp"), Some("true"));
        // applied also received a copy of the match props
        assert_eq!(applied.get("device.name"), Some("alsa_card.0"));
    }

    #[test]
    fn apply_rules_uses_fallback_when_section_missing() {
        let conf = Conf::from_strings(&[("one.conf", "")]);
        let fallback = Json::from_str(
            r#"[ { matches = [ { a = "1" } ] actions = { update-props = { hit = "y" } } } ]"#,
        );
        let mut props = Properties::from_pairs([("a", "1")]);
        assert!(conf.apply_rules("missing", &mut props, None, Some(&fallback)));
        assert_eq!(props.get("hit"), Some("y"));
    }

    #[test]
    fn apply_rules_without_match_returns_false() {
        let conf = Conf::from_strings(&[("one.conf", RULES)]);
        let mut props = Properties::from_pairs([("device.name", "bluez.0")]);
        assert!(!conf.apply_rules("device-rules", &mut props, None, None));
    }

    // ---------------------------------------------------------------
    // Files on disk
    // ---------------------------------------------------------------

    #[test]
    fn open_reads_files_in_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        let low = dir.path().join("00-base.conf");
        let high = dir.path().join("50-site.conf");
        std::fs::write(&low, "s = { a = 1 }").unwrap();
        std::fs::write(&high, "s = { b = 2 }").unwrap();

        let conf = Conf::open(&[low, high]).unwrap();
        assert_eq!(conf.section("s", None).unwrap(), Json::from_str("{ a = 1, b = 2 }"));
    }

    #[test]
    fn open_fails_on_unreadable_file() {
        let missing = PathBuf::from("/nonexistent/weft.conf");
        assert!(Conf::open(&[missing]).is_err());
    }
}
