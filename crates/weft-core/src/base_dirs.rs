//! Lookup of configuration and data files across the standard directories.
//!
//! Search order, from lowest to highest priority: the build-configured
//! default directory, the system data and configuration directories, then
//! the user's XDG data and configuration directories. The environment
//! variables `WEFT_CONFIG_DIR` and `WEFT_DATA_DIR` each hold a
//! colon-separated directory list that fully replaces the search order for
//! their category when [`LookupDirs::ENV_OVERRIDE`] is given.

use std::path::{Path, PathBuf};

use crate::iter::Iter;

bitflags::bitflags! {
    /// Flags selecting which directories a lookup searches.
    pub struct LookupDirs: u32 {
        /// Honor `WEFT_CONFIG_DIR` / `WEFT_DATA_DIR`.
        const ENV_OVERRIDE = 1 << 0;
        /// `$XDG_CONFIG_HOME/weft`
        const USER_CONFIG = 1 << 10;
        /// `$XDG_DATA_HOME/weft`
        const USER_DATA = 1 << 11;
        /// `/etc/weft`
        const SYSTEM_CONFIG = 1 << 12;
        /// `/usr/share/weft`
        const SYSTEM_DATA = 1 << 13;
        /// The directory configured at build time.
        const BUILD_CONFIGURED = 1 << 14;

        /// Everything a configuration lookup searches.
        const CONFIG = Self::ENV_OVERRIDE.bits
            | Self::USER_CONFIG.bits
            | Self::SYSTEM_CONFIG.bits
            | Self::BUILD_CONFIGURED.bits;
        /// Everything a data lookup searches.
        const DATA = Self::ENV_OVERRIDE.bits
            | Self::USER_DATA.bits
            | Self::SYSTEM_DATA.bits
            | Self::BUILD_CONFIGURED.bits;
    }
}

/// Environment variable overriding the configuration search path.
pub const ENV_CONFIG_DIR: &str = "WEFT_CONFIG_DIR";
/// Environment variable overriding the data search path.
pub const ENV_DATA_DIR: &str = "WEFT_DATA_DIR";

const SYSTEM_CONFIG_DIR: &str = "/etc/weft";
const SYSTEM_DATA_DIR: &str = "/usr/share/weft";
const BUILD_CONFIGURED_DIR: &str = "/usr/share/weft";

/// Splits a colon-separated env list into paths, first entry first.
fn split_env_list(value: &str) -> Vec<PathBuf> {
    value.split(':').filter(|s| !s.is_empty()).map(PathBuf::from).collect()
}

/// Resolves the directories selected by `flags`, lowest priority first.
fn lookup_paths(flags: LookupDirs) -> Vec<PathBuf> {
    let env_config = flags
        .contains(LookupDirs::ENV_OVERRIDE)
        .then(|| std::env::var(ENV_CONFIG_DIR).ok())
        .flatten()
        .map(|v| split_env_list(&v));
    let env_data = flags
        .contains(LookupDirs::ENV_OVERRIDE)
        .then(|| std::env::var(ENV_DATA_DIR).ok())
        .flatten()
        .map(|v| split_env_list(&v));

    let mut paths: Vec<PathBuf> = Vec::new();

    // data category, lowest first
    if let Some(env_dirs) = env_data {
        if flags.intersects(LookupDirs::USER_DATA | LookupDirs::SYSTEM_DATA) {
            paths.extend(env_dirs.into_iter().rev());
        }
    } else {
        if flags.contains(LookupDirs::SYSTEM_DATA) {
            paths.push(PathBuf::from(SYSTEM_DATA_DIR));
        }
        if flags.contains(LookupDirs::USER_DATA) {
            if let Some(base) = dirs::data_dir() {
                paths.push(base.join("weft"));
            }
        }
    }

    // configuration category, lowest first
    if let Some(env_dirs) = env_config {
        if flags.intersects(
            LookupDirs::USER_CONFIG | LookupDirs::SYSTEM_CONFIG | LookupDirs::BUILD_CONFIGURED,
        ) {
            paths.extend(env_dirs.into_iter().rev());
        }
    } else {
        if flags.contains(LookupDirs::BUILD_CONFIGURED) {
            paths.push(PathBuf::from(BUILD_CONFIGURED_DIR));
        }
        if flags.contains(LookupDirs::SYSTEM_CONFIG) {
            paths.push(PathBuf::from(SYSTEM_CONFIG_DIR));
        }
        if flags.contains(LookupDirs::USER_CONFIG) {
            if let Some(base) = dirs::config_dir() {
                paths.push(base.join("weft"));
            }
        }
    }

    paths.dedup();
    paths
}

fn candidate(dir: &Path, subdir: Option<&str>, filename: &str) -> PathBuf {
    match subdir {
        Some(subdir) => dir.join(subdir).join(filename),
        None => dir.join(filename),
    }
}

/// Finds the highest-priority regular file named `filename`, optionally
/// inside `subdir` of each searched directory.
///
/// An absolute `filename` bypasses the search and is returned as-is when
/// it exists.
pub fn find_file(dirs: LookupDirs, subdir: Option<&str>, filename: &str) -> Option<PathBuf> {
    let path = Path::new(filename);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    for dir in lookup_paths(dirs).iter().rev() {
        let path = candidate(dir, subdir, filename);
        if path.is_file() {
            log::debug!(target: "weft-base-dirs", "found {}", path.display());
            return Some(path);
        }
    }
    None
}

/// Returns an iterator over all matching files, lowest priority first.
///
/// Files with the same name in a higher-priority directory shadow their
/// lower-priority counterparts; the result is ordered by file name.
pub fn new_files_iterator(
    dirs: LookupDirs,
    subdir: Option<&str>,
    suffix: Option<&str>,
) -> Iter<PathBuf> {
    let mut by_name: std::collections::BTreeMap<String, PathBuf> = Default::default();

    for dir in lookup_paths(dirs) {
        let dir = match subdir {
            Some(subdir) => dir.join(subdir),
            None => dir,
        };
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            if let Some(suffix) = suffix {
                if !name.ends_with(suffix) {
                    continue;
                }
            }
            by_name.insert(name.to_string(), path);
        }
    }

    Iter::new(by_name.into_values().collect())
}
