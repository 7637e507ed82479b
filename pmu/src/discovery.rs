use std::fs;
use std::path::Path;

use crate::{Error, Result};

/// Where the kernel exposes registered perf event sources.
pub const EVENT_SOURCE_ROOT: &str = "/sys/bus/event_source/devices";

/// Soft cap on the number of sources a single enumeration returns.
pub const DEFAULT_SOURCE_CAP: usize = 100;

/// One discovered event source and its kernel-assigned type id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmuSource {
    pub name: String,
    pub type_id: u32,
}

/// Result of one registry scan. `truncated` is set when more entries matched
/// than the cap allowed; the sources found up to that point are still usable.
#[derive(Debug, Default)]
pub struct DiscoveredSources {
    pub sources: Vec<PmuSource>,
    pub truncated: bool,
}

/// Enumerates event sources under [`EVENT_SOURCE_ROOT`] whose name starts
/// with `prefix`, up to [`DEFAULT_SOURCE_CAP`] entries.
pub fn enumerate_sources(prefix: &str) -> Result<DiscoveredSources> {
    enumerate_sources_in(Path::new(EVENT_SOURCE_ROOT), prefix, DEFAULT_SOURCE_CAP)
}

/// Enumerates event sources under an arbitrary registry root.
///
/// The prefix match is case sensitive and entries keep directory enumeration
/// order. Each match must carry a readable `type` attribute; a match without
/// one fails the whole scan with [`Error::TypeResolution`].
pub fn enumerate_sources_in(root: &Path, prefix: &str, cap: usize) -> Result<DiscoveredSources> {
    let entries = fs::read_dir(root).map_err(|source| Error::Discovery {
        path: root.to_path_buf(),
        source,
    })?;

    let mut sources = Vec::new();
    let mut truncated = false;

    for entry in entries {
        let entry = entry.map_err(|source| Error::Discovery {
            path: root.to_path_buf(),
            source,
        })?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if !name.starts_with(prefix) {
            continue;
        }
        if sources.len() == cap {
            log::warn!("more than {cap} event sources match '{prefix}*', ignoring the rest");
            truncated = true;
            break;
        }
        let type_id = read_type_id(&entry.path(), &name)?;
        sources.push(PmuSource { name, type_id });
    }

    Ok(DiscoveredSources { sources, truncated })
}

fn read_type_id(dir: &Path, name: &str) -> Result<u32> {
    let type_path = dir.join("type");
    let raw = fs::read_to_string(&type_path).map_err(|err| Error::TypeResolution {
        name: name.to_string(),
        reason: format!("cannot read {}: {err}", type_path.display()),
    })?;
    raw.trim().parse().map_err(|err| Error::TypeResolution {
        name: name.to_string(),
        reason: format!("bad type attribute '{}': {err}", raw.trim()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_source(root: &Path, name: &str, type_attr: &str) {
        let dir = root.join(name);
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("type"), type_attr).unwrap();
    }

    #[test]
    fn finds_prefixed_sources_with_type_ids() {
        let root = tempfile::tempdir().unwrap();
        add_source(root.path(), "arm_dmc620_0", "7\n");
        add_source(root.path(), "arm_dmc620_1", "9\n");
        add_source(root.path(), "cpu", "4\n");

        let found = enumerate_sources_in(root.path(), "arm_dmc620", DEFAULT_SOURCE_CAP).unwrap();
        assert!(!found.truncated);
        assert_eq!(found.sources.len(), 2);
        for src in &found.sources {
            match src.name.as_str() {
                "arm_dmc620_0" => assert_eq!(src.type_id, 7),
                "arm_dmc620_1" => assert_eq!(src.type_id, 9),
                other => panic!("unexpected source '{other}'"),
            }
        }
    }

    #[test]
    fn prefix_match_is_case_sensitive() {
        let root = tempfile::tempdir().unwrap();
        add_source(root.path(), "ARM_dmc620_0", "7\n");

        let found = enumerate_sources_in(root.path(), "arm_dmc620", DEFAULT_SOURCE_CAP).unwrap();
        assert!(found.sources.is_empty());
    }

    #[test]
    fn missing_type_attribute_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("arm_dmc620_0")).unwrap();

        let err =
            enumerate_sources_in(root.path(), "arm_dmc620", DEFAULT_SOURCE_CAP).unwrap_err();
        assert!(matches!(err, Error::TypeResolution { .. }), "{err}");
    }

    #[test]
    fn garbage_type_attribute_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        add_source(root.path(), "arm_dmc620_0", "not-a-number\n");

        let err =
            enumerate_sources_in(root.path(), "arm_dmc620", DEFAULT_SOURCE_CAP).unwrap_err();
        assert!(matches!(err, Error::TypeResolution { .. }), "{err}");
    }

    #[test]
    fn unreadable_root_is_a_discovery_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("no_such_registry");

        let err = enumerate_sources_in(&missing, "arm_dmc620", DEFAULT_SOURCE_CAP).unwrap_err();
        assert!(matches!(err, Error::Discovery { .. }), "{err}");
    }

    #[test]
    fn truncates_at_the_cap_without_failing() {
        let root = tempfile::tempdir().unwrap();
        add_source(root.path(), "arm_dmc620_0", "7\n");
        add_source(root.path(), "arm_dmc620_1", "9\n");
        add_source(root.path(), "arm_dmc620_2", "11\n");

        let found = enumerate_sources_in(root.path(), "arm_dmc620", 2).unwrap();
        assert!(found.truncated);
        assert_eq!(found.sources.len(), 2);
    }

    #[test]
    fn empty_prefix_matches_everything() {
        let root = tempfile::tempdir().unwrap();
        add_source(root.path(), "cpu", "4\n");
        add_source(root.path(), "software", "1\n");

        let found = enumerate_sources_in(root.path(), "", DEFAULT_SOURCE_CAP).unwrap();
        assert_eq!(found.sources.len(), 2);
    }
}
