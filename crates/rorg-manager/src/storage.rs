//! Filesystem persistence for service state.
//!
//! Each service's [`ServiceState`] lives in its own TOML document at
//! `<base>/<ns0>/.../<name>.service_state`.  Writes go through a
//! temp-file rename; a state file whose service is no longer managed is
//! renamed to `<file>.removed`, and such tombstones are ignored on load.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use rorg_error::{Error, Result};
use rorg_model::ServiceState;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Filename suffix for live state files.
const STATE_SUFFIX: &str = ".service_state";

/// Extra suffix appended to tombstoned state files.
const TOMBSTONE_SUFFIX: &str = ".removed";

/// Store for service-state files under one base directory.
pub(crate) struct Storage {
    /// Root of the state tree.
    base: PathBuf,
}

impl Storage {
    /// A store rooted at `base`.  The directory is created lazily on
    /// the first write.
    pub(crate) fn new(base: PathBuf) -> Storage {
        Storage { base }
    }

    /// The state-file path for a service id.
    fn path_for(&self, state: &ServiceState) -> PathBuf {
        let mut path = self.base.clone();
        for ns in state.id.namespace() {
            path.push(ns);
        }
        path.push(format!("{}{}", state.id.name(), STATE_SUFFIX));
        path
    }

    /// Write every given state to its file, then tombstone any state
    /// file that belongs to no current service.
    ///
    /// This is the commit point: it runs after every mutating RPC,
    /// before the response is returned.
    pub(crate) fn write_all<'a, I>(&self, states: I) -> Result<()>
    where
        I: Iterator<Item = &'a ServiceState>,
    {
        let mut keep: HashSet<PathBuf> = HashSet::new();
        for state in states {
            let path = self.path_for(state);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let body = toml::to_string(state).map_err(|e| {
                Error::Internal(format!("could not serialize state for {}: {}", state.id, e))
            })?;
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, body.as_bytes())?;
            fs::rename(&tmp, &path)?;
            keep.insert(path);
        }

        if self.base.is_dir() {
            for entry in WalkDir::new(&self.base).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let is_state_file = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(STATE_SUFFIX))
                    .unwrap_or(false);
                if !is_state_file || keep.contains(path) {
                    continue;
                }
                let mut tombstone = path.as_os_str().to_owned();
                tombstone.push(TOMBSTONE_SUFFIX);
                let tombstone = PathBuf::from(tombstone);
                if tombstone.is_file() {
                    fs::remove_file(&tombstone)?;
                }
                fs::rename(path, &tombstone)?;
                debug!("tombstoned {}", path.display());
            }
        }
        Ok(())
    }

    /// Parse every live state file under the base directory.
    ///
    /// A missing base directory is an empty store, not an error.
    pub(crate) fn load_all(&self) -> Result<Vec<ServiceState>> {
        let mut states = Vec::new();
        if !self.base.is_dir() {
            warn!(
                "storage path {} does not exist yet; starting empty",
                self.base.display()
            );
            return Ok(states);
        }
        for entry in WalkDir::new(&self.base).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !name.ends_with(STATE_SUFFIX) {
                if !name.ends_with(TOMBSTONE_SUFFIX) && !name.ends_with(".tmp") {
                    warn!("unexpected file in storage tree: {}", path.display());
                }
                continue;
            }
            let body = fs::read_to_string(path)?;
            let state: ServiceState = toml::from_str(&body).map_err(|e| {
                Error::Internal(format!("could not parse {}: {}", path.display(), e))
            })?;
            debug!("loaded {}", path.display());
            states.push(state);
        }
        Ok(states)
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use rorg_model::{ServiceId, ServiceOptions, ServiceStatus, ServiceType};

    /// A minimal group state for the given id.
    fn state(id: &str) -> ServiceState {
        ServiceState::initial(
            ServiceOptions::minimal(ServiceId::parse(id).unwrap(), ServiceType::Group),
            ServiceStatus::Stopped,
        )
    }

    #[test]
    fn save_then_load_is_identity() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("state"));

        let a = state("base:roscore");
        let b = state("base/nav:amcl");
        storage.write_all([&a, &b].into_iter()).unwrap();

        let mut loaded = storage.load_all().unwrap();
        loaded.sort_by(|x, y| x.id.cmp(&y.id));
        // ["base"] sorts before ["base", "nav"].
        assert_eq!(loaded, vec![a, b]);
    }

    #[test]
    fn layout_mirrors_the_namespace() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());
        storage.write_all([&state("base/nav:amcl")].into_iter()).unwrap();
        assert!(dir
            .path()
            .join("base")
            .join("nav")
            .join("amcl.service_state")
            .is_file());
    }

    #[test]
    fn orphans_become_tombstones_and_are_ignored() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = Storage::new(dir.path().to_path_buf());

        let a = state("base:roscore");
        let b = state("base:trigger_ui");
        storage.write_all([&a, &b].into_iter()).unwrap();

        // Drop b from the managed set; its file must become a tombstone.
        storage.write_all([&a].into_iter()).unwrap();
        let tombstone = dir.path().join("base").join("trigger_ui.service_state.removed");
        assert!(tombstone.is_file());
        assert!(!dir.path().join("base").join("trigger_ui.service_state").is_file());

        let loaded = storage.load_all().unwrap();
        assert_eq!(loaded, vec![a.clone()]);

        // Re-create and drop again: the old tombstone is overwritten.
        storage.write_all([&a, &b].into_iter()).unwrap();
        storage.write_all([&a].into_iter()).unwrap();
        assert!(tombstone.is_file());
    }

    #[test]
    fn missing_base_is_an_empty_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("never-created"));
        assert!(storage.load_all().unwrap().is_empty());
    }
}
