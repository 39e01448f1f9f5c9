use crate::error::SyncError;
use crate::fetch::INDEX_NAME;
use crate::git::VersionControl;
use crate::id::ItemId;
use serde_json::Value;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

const EXTENSION: &str = "json";

/// Directory holding the persisted index and item documents.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{EXTENSION}"))
    }

    /// Writes `value` as indented JSON to `<name>.json`, replacing any previous content.
    pub fn write_document(&self, name: &str, value: &Value) -> Result<PathBuf, SyncError> {
        let path = self.document_path(name);
        let data = serde_json::to_string_pretty(value)
            .map_err(|error| SyncError::io(&path, error.into()))?;
        std::fs::write(&path, data).map_err(|error| SyncError::io(&path, error))?;
        Ok(path)
    }

    /// Deletes every item document whose stem is not in `valid_ids`.
    /// The index document and non-JSON files are left alone.
    pub fn prune_except(&self, valid_ids: &HashSet<ItemId>) -> Result<Vec<PathBuf>, SyncError> {
        let keep: HashSet<&str> = valid_ids.iter().map(ItemId::as_str).collect();
        let entries =
            std::fs::read_dir(&self.root).map_err(|error| SyncError::io(&self.root, error))?;

        let mut removed = vec![];
        for entry in entries {
            let entry = entry.map_err(|error| SyncError::io(&self.root, error))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if stem == INDEX_NAME || keep.contains(stem) {
                continue;
            }
            let is_file = entry
                .file_type()
                .map_err(|error| SyncError::io(&path, error))?
                .is_file();
            if !is_file {
                continue;
            }

            info!("Removing stale file {}", path.display());
            match std::fs::remove_file(&path) {
                Ok(()) => removed.push(path),
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => return Err(SyncError::io(&path, error)),
            }
        }
        removed.sort();
        Ok(removed)
    }

    /// Whether the store differs from the last commit of `vcs`.
    pub fn has_changes(&self, vcs: &dyn VersionControl) -> anyhow::Result<bool> {
        Ok(!vcs.status()?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(names: &[&str]) -> HashSet<ItemId> {
        names.iter().map(|name| ItemId::parse(name).unwrap()).collect()
    }

    fn json_files(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn writes_indented_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let path = store
            .write_document("m1", &json!({"b": 1, "a": ["é"]}))
            .unwrap();
        assert_eq!(path, dir.path().join("m1.json"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{\n  \"b\": 1,\n  \"a\": [\n    \"é\"\n  ]\n}"
        );

        store.write_document("m1", &json!([])).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }

    #[test]
    fn prune_keeps_valid_ids_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        for name in ["a", "b", "c", "api"] {
            store.write_document(name, &json!({})).unwrap();
        }

        let removed = store.prune_except(&ids(&["a", "b"])).unwrap();
        assert_eq!(removed, vec![dir.path().join("c.json")]);
        assert_eq!(json_files(dir.path()), ["a.json", "api.json", "b.json"]);
    }

    #[test]
    fn prune_ignores_other_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "hi").unwrap();
        std::fs::write(dir.path().join("match-api-sync.toml"), "").unwrap();
        std::fs::create_dir(dir.path().join("nested.json")).unwrap();
        let store = LocalStore::new(dir.path());

        assert!(store.prune_except(&ids(&[])).unwrap().is_empty());
        assert_eq!(
            json_files(dir.path()),
            ["README.md", "match-api-sync.toml", "nested.json"]
        );
    }

    #[test]
    fn prune_of_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("missing"));
        assert!(matches!(
            store.prune_except(&ids(&[])),
            Err(SyncError::Io { .. })
        ));
    }
}
