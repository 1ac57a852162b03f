use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, error, info, warn};

use crate::error::{BoardError, BoardResult};
use crate::model::Group;
use crate::normalize::{Strictness, groups_from_value};
use crate::view::Layout;

pub const GROUPS_KEY: &str = "macroTasks";
pub const SELECTION_KEY: &str = "selectedMacroIndex";
pub const LAYOUT_KEY: &str = "viewMode";

/// String-keyed persistence capability: `load(key) -> string | absent`,
/// `store(key, string) -> ok | fails`.
pub trait KeyValueStore {
    fn load(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn store(&mut self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// One `<key>.data` file per key inside the data directory.
#[derive(Debug)]
pub struct FileStore {
    pub data_dir: PathBuf,
}

impl FileStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        info!(data_dir = %data_dir.display(), "opened board storage");
        Ok(Self { data_dir })
    }

    pub fn path_for(&self, key: &str) -> anyhow::Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
            && !key.starts_with('.');
        if !valid {
            return Err(anyhow!("invalid storage key: {key:?}"));
        }
        Ok(self.data_dir.join(format!("{key}.data")))
    }
}

impl KeyValueStore for FileStore {
    #[tracing::instrument(skip(self))]
    fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(raw) => {
                debug!(file = %path.display(), bytes = raw.len(), "loaded key");
                Ok(Some(raw))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed reading {}", path.display())),
        }
    }

    #[tracing::instrument(skip(self, value))]
    fn store(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.path_for(key)?;
        write_atomic(&path, value).with_context(|| format!("failed to save {key}"))
    }
}

#[tracing::instrument(skip(path, value))]
fn write_atomic(path: &Path, value: &str) -> anyhow::Result<()> {
    debug!(file = %path.display(), bytes = value.len(), "writing key atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(value.as_bytes())?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(())
}

/// In-process store; writes can be made to fail on demand.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn with_entry(mut self, key: &str, value: &str) -> Self {
        self.entries.insert(key.to_string(), value.to_string());
        self
    }

    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn store(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        if self.fail_writes {
            return Err(anyhow!("storage quota exceeded while writing {key}"));
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Groups read back from storage.
#[derive(Debug, Default)]
pub struct LoadedBoard {
    pub groups: Vec<Group>,
    pub repaired: bool,
}

/// Serializes the board to and from its keys.
#[derive(Debug)]
pub struct Gateway<S> {
    kv: S,
}

impl<S: KeyValueStore> Gateway<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &S {
        &self.kv
    }

    pub fn kv_mut(&mut self) -> &mut S {
        &mut self.kv
    }

    /// Absent or corrupt blobs yield an empty board; corruption is logged.
    ///
    /// `repaired` is set when normalization back-filled or dropped anything,
    /// so the stored blob no longer matches what was loaded.
    #[tracing::instrument(skip(self, now))]
    pub fn load_groups(&self, now: DateTime<Utc>) -> LoadedBoard {
        let raw = match self.kv.load(GROUPS_KEY) {
            Ok(Some(raw)) if !raw.trim().is_empty() => raw,
            Ok(_) => return LoadedBoard::default(),
            Err(err) => {
                error!(error = %format!("{err:#}"), "failed reading stored groups");
                return LoadedBoard::default();
            }
        };

        let value: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                error!(error = %err, "failed parsing stored groups; starting empty");
                return LoadedBoard::default();
            }
        };

        match groups_from_value(value.clone(), Strictness::Skip, now) {
            Ok(groups) => {
                let repaired = serde_json::to_value(&groups)
                    .map(|normalized| normalized != value)
                    .unwrap_or(true);
                info!(groups = groups.len(), repaired, "loaded board");
                LoadedBoard { groups, repaired }
            }
            Err(err) => {
                error!(error = %err, "stored groups have an unexpected shape; starting empty");
                LoadedBoard::default()
            }
        }
    }

    #[tracing::instrument(skip(self, groups), fields(groups = groups.len()))]
    pub fn save_groups(&mut self, groups: &[Group]) -> BoardResult<()> {
        let json = serde_json::to_string(groups)
            .map_err(|err| BoardError::Persistence(format!("failed to encode groups: {err}")))?;
        self.store(GROUPS_KEY, &json)
    }

    pub fn load_selection_memory(&self) -> Option<String> {
        self.load_quietly(SELECTION_KEY)
    }

    pub fn save_selection_memory(&mut self, encoded: &str) -> BoardResult<()> {
        self.store(SELECTION_KEY, encoded)
    }

    pub fn load_layout(&self) -> Option<Layout> {
        let raw = self.load_quietly(LAYOUT_KEY)?;
        match raw.parse() {
            Ok(layout) => Some(layout),
            Err(err) => {
                warn!(value = %raw, error = %err, "ignoring stored layout");
                None
            }
        }
    }

    pub fn save_layout(&mut self, layout: Layout) -> BoardResult<()> {
        self.store(LAYOUT_KEY, layout.as_str())
    }

    fn load_quietly(&self, key: &str) -> Option<String> {
        match self.kv.load(key) {
            Ok(value) => value.map(|v| v.trim().to_string()),
            Err(err) => {
                warn!(key, error = %format!("{err:#}"), "failed reading key");
                None
            }
        }
    }

    fn store(&mut self, key: &str, value: &str) -> BoardResult<()> {
        self.kv
            .store(key, value)
            .map_err(|err| BoardError::Persistence(format!("{err:#}")))
    }
}

/// Pretty-printed export payload.
pub fn export_json(groups: &[Group]) -> BoardResult<String> {
    serde_json::to_string_pretty(groups)
        .map_err(|err| BoardError::Persistence(format!("failed to encode export: {err}")))
}

/// `macroboard-YYYY-MM-DD.json` for the given local date.
pub fn export_file_name(date: chrono::NaiveDate) -> String {
    format!("macroboard-{}.json", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use tempfile::tempdir;

    use super::{
        FileStore, GROUPS_KEY, Gateway, KeyValueStore, MemoryStore, export_file_name,
    };
    use crate::error::BoardError;
    use crate::model::Group;
    use crate::view::Layout;

    #[test]
    fn file_store_round_trips_keys() {
        let temp = tempdir().expect("tempdir");
        let mut store = FileStore::open(temp.path()).expect("open store");

        assert_eq!(store.load("viewMode").expect("load absent"), None);
        store.store("viewMode", "board").expect("store");
        assert_eq!(
            store.load("viewMode").expect("load").as_deref(),
            Some("board")
        );
        assert!(temp.path().join("viewMode.data").exists());
    }

    #[test]
    fn file_store_rejects_path_like_keys() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open store");
        assert!(store.path_for("../escape").is_err());
        assert!(store.path_for("").is_err());
    }

    #[test]
    fn corrupt_blob_loads_as_empty_board() {
        let kv = MemoryStore::default().with_entry(GROUPS_KEY, "{not json");
        let gateway = Gateway::new(kv);
        let loaded = gateway.load_groups(Utc::now());
        assert!(loaded.groups.is_empty());
        assert!(!loaded.repaired, "corrupt blobs are left for inspection");

        let kv = MemoryStore::default().with_entry(GROUPS_KEY, r#"{"name":"obj"}"#);
        assert!(Gateway::new(kv).load_groups(Utc::now()).groups.is_empty());
    }

    #[test]
    fn back_filled_records_are_flagged_as_repaired() {
        let kv = MemoryStore::default()
            .with_entry(GROUPS_KEY, r#"[{"id":"g","name":"G","tasks":[{"name":"t"}]}]"#);
        let loaded = Gateway::new(kv).load_groups(Utc::now());
        assert!(loaded.repaired);

        let mut gateway = Gateway::new(MemoryStore::default());
        gateway.save_groups(&loaded.groups).expect("save");
        let reloaded = gateway.load_groups(Utc::now());
        assert!(!reloaded.repaired, "a saved board loads back unchanged");
        assert_eq!(reloaded.groups, loaded.groups);
    }

    #[test]
    fn save_failure_maps_to_persistence_error() {
        let mut kv = MemoryStore::default();
        kv.fail_writes(true);
        let mut gateway = Gateway::new(kv);
        let groups = vec![Group::new("A".to_string(), Utc::now())];

        let err = gateway.save_groups(&groups).expect_err("write must fail");
        assert!(matches!(err, BoardError::Persistence(_)));
    }

    #[test]
    fn layout_memory_round_trips() {
        let mut gateway = Gateway::new(MemoryStore::default());
        assert_eq!(gateway.load_layout(), None);
        gateway.save_layout(Layout::Board).expect("save layout");
        assert_eq!(gateway.load_layout(), Some(Layout::Board));
    }

    #[test]
    fn export_file_is_named_by_date() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).expect("valid date");
        assert_eq!(export_file_name(date), "macroboard-2026-10-16.json");
    }
}
