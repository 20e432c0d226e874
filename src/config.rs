//! Configuration loader/writer plus strongly typed settings structures.
//!
//! Two documents live here: the renderer's JSON Configuration Document
//! (`config/quest.json`) and the synchronizer's TOML settings
//! (`config/sync.toml`). Defaults ship embedded in the binary and are
//! extracted on first run. The JSON document is merged key by key over the
//! defaults so partial user documents keep working, and the reconciliation
//! step writes single sections back without clobbering external edits.

use anyhow::{Context, Result};
use include_dir::{include_dir, Dir};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

// Embed default configuration files at compile time
const DEFAULT_CONFIG: &str = include_str!("../defaults/quest.json");
const DEFAULT_SYNC_CONFIG: &str = include_str!("../defaults/sync.toml");

static DEFAULTS_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/defaults");

/// Smallest and largest page sizes reachable through shortcuts
pub const MIN_PAGE_SIZE: usize = 1;
pub const MAX_PAGE_SIZE: usize = 50;

/// Locations of every file the application reads or writes.
///
/// Built once at startup and handed to each component, so nothing reaches
/// for a process-wide path.
#[derive(Debug, Clone)]
pub struct AppPaths {
    base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Resolve the base directory.
    /// Order: explicit override, QUESTBOARD_DIR environment variable, ~/.questboard
    pub fn resolve(override_dir: Option<&Path>) -> Result<Self> {
        if let Some(dir) = override_dir {
            return Ok(Self::new(dir));
        }

        if let Ok(custom_dir) = std::env::var("QUESTBOARD_DIR") {
            return Ok(Self::new(custom_dir));
        }

        let home = dirs::home_dir().context("Could not find home directory")?;
        Ok(Self::new(home.join(".questboard")))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn config_dir(&self) -> PathBuf {
        self.base_dir.join("config")
    }

    fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    /// Returns: <base>/config/quest.json
    pub fn config_path(&self) -> PathBuf {
        self.config_dir().join("quest.json")
    }

    /// Returns: <base>/config/sync.toml
    pub fn sync_config_path(&self) -> PathBuf {
        self.config_dir().join("sync.toml")
    }

    /// Returns: <base>/config/translations.json
    pub fn translations_path(&self) -> PathBuf {
        self.config_dir().join("translations.json")
    }

    /// Returns: <base>/data/quest.json
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir().join("quest.json")
    }

    /// Returns: <base>/data/questboard.log
    pub fn log_path(&self) -> PathBuf {
        self.data_dir().join("questboard.log")
    }

    /// Extract default files on first run.
    ///
    /// Idempotent: only files that are missing get written, so user edits
    /// are never overwritten.
    pub fn extract_defaults(&self) -> Result<()> {
        let config_dir = self.config_dir();
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create {:?}", config_dir))?;
        fs::create_dir_all(self.data_dir())
            .with_context(|| format!("Failed to create {:?}", self.data_dir()))?;

        for file in DEFAULTS_DIR.files() {
            let filename = file
                .path()
                .file_name()
                .and_then(|n| n.to_str())
                .context("Invalid default filename")?;
            let target = config_dir.join(filename);

            if !target.exists() {
                write_atomic(&target, file.contents())
                    .with_context(|| format!("Failed to write config/{}", filename))?;
                tracing::info!("Extracted {} to {:?}", filename, target);
            }
        }

        Ok(())
    }
}

/// One template line: `data` carries `%token%` placeholders.
/// Unset style fields fall back to the document-wide `font`/`font_size`/`color`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateLine {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Display field gating the whole line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toggle: Option<String>,
    #[serde(default)]
    pub data: String,
}

/// Active/inactive color pair for a sector or shop code
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MembershipColors {
    #[serde(rename = "true", default, skip_serializing_if = "Option::is_none")]
    pub active: Option<String>,
    #[serde(rename = "false", default, skip_serializing_if = "Option::is_none")]
    pub inactive: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub sectors: BTreeMap<String, bool>,
    #[serde(default)]
    pub shops: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SortConfig {
    #[serde(default, deserialize_with = "string_or_seq")]
    pub keys: Vec<String>,
    #[serde(default)]
    pub order: SortOrder,
}

/// Accept `"keys": "id"` as shorthand for `"keys": ["id"]`
fn string_or_seq<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(key) => vec![key],
        OneOrMany::Many(keys) => keys,
    })
}

/// The renderer's Configuration Document, fully merged with defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub refresh_interval: u64,
    pub time_simulation_duration: u64,
    pub time_remaining_format: String,
    pub font: String,
    pub font_size: u32,
    pub color: String,
    pub language: String,
    pub empty_text: String,
    pub token_colors: BTreeMap<String, String>,
    pub time_remaining_colors: BTreeMap<String, String>,
    pub sector_token_colors: BTreeMap<String, MembershipColors>,
    pub shop_token_colors: BTreeMap<String, MembershipColors>,
    pub header: Vec<TemplateLine>,
    pub lines: Vec<TemplateLine>,
    pub filter: FilterConfig,
    pub sort: SortConfig,
    pub display: BTreeMap<String, bool>,
    pub page_size: usize,
    pub shortcuts: BTreeMap<String, String>,
}

impl Config {
    /// The embedded defaults as a JSON tree (the base every merge starts from)
    pub fn default_value() -> Result<Value> {
        serde_json::from_str(DEFAULT_CONFIG).context("Failed to parse embedded default config")
    }

    #[cfg(test)]
    pub fn defaults() -> Result<Self> {
        Self::from_value(&Self::default_value()?)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let mut config: Config =
            serde_json::from_value(value.clone()).context("Config document has the wrong shape")?;
        config.normalize();
        Ok(config)
    }

    /// Clamp values that the rest of the engine relies on
    fn normalize(&mut self) {
        self.page_size = self.page_size.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
        self.refresh_interval = self.refresh_interval.max(1);
    }
}

/// Merge `overlay` into `base` key by key.
///
/// Objects merge recursively; any other overlay value replaces the base
/// value. Keys missing from the overlay keep their base value.
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Read a JSON document, treating a missing, unreadable or malformed file as absent.
pub fn read_json_safe(path: &Path) -> Option<Value> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!("Failed to read {:?}: {}", path, e);
            return None;
        }
    };

    match serde_json::from_str(&contents) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring malformed JSON in {:?}: {}", path, e);
            None
        }
    }
}

/// Write a file so readers never observe a half-written document:
/// write a sibling temp file, then rename it over the target.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.file_name().context("Path has no file name")?.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, contents).with_context(|| format!("Failed to write {:?}", tmp_path))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move {:?} into place", tmp_path))?;
    Ok(())
}

/// Modification time of a file, or None when it cannot be stat'ed
pub fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Sections of the Configuration Document the reconciliation step writes back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConfigSection {
    Filter,
    Sort,
    Display,
    PageSize,
}

impl ConfigSection {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Sort => "sort",
            Self::Display => "display",
            Self::PageSize => "page_size",
        }
    }
}

/// Hot-reloadable view of the Configuration Document.
///
/// Keeps the merged JSON tree alongside the typed `Config` so every reload
/// merges over what was loaded before rather than starting from scratch.
pub struct ConfigStore {
    path: PathBuf,
    merged: Value,
    config: Config,
    last_mtime: Option<SystemTime>,
}

impl ConfigStore {
    /// Load the document, materializing full defaults when it does not exist yet.
    pub fn open(path: PathBuf) -> Result<Self> {
        let defaults = Config::default_value()?;
        let config = Config::from_value(&defaults)?;

        if !path.exists() {
            let contents = serde_json::to_vec_pretty(&defaults)?;
            if let Err(e) = write_atomic(&path, &contents) {
                tracing::warn!("Could not write default config to {:?}: {:#}", path, e);
            } else {
                tracing::info!("Wrote default config to {:?}", path);
            }
        }

        let mut store = Self {
            path,
            merged: defaults,
            config,
            last_mtime: None,
        };
        store.reload_if_changed();
        Ok(store)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// One section as currently stored in the file, if present
    pub fn on_disk_section(&self, section: ConfigSection) -> Option<Value> {
        read_json_safe(&self.path)?.get(section.key()).cloned()
    }

    /// Cheap freshness check; re-merge the document when its mtime moved.
    /// Returns true when a new configuration was applied.
    pub fn reload_if_changed(&mut self) -> bool {
        let mtime = modified_time(&self.path);
        if mtime.is_none() || mtime == self.last_mtime {
            return false;
        }
        self.last_mtime = mtime;

        let Some(user_doc) = read_json_safe(&self.path) else {
            return false;
        };
        if !user_doc.is_object() {
            tracing::warn!("Config {:?} is not a JSON object, keeping previous", self.path);
            return false;
        }

        let mut candidate = self.merged.clone();
        merge_json(&mut candidate, user_doc);

        match Config::from_value(&candidate) {
            Ok(config) => {
                self.merged = candidate;
                self.config = config;
                tracing::info!("Config reloaded from {:?}", self.path);
                true
            }
            Err(e) => {
                tracing::warn!("Ignoring config {:?}: {:#}", self.path, e);
                false
            }
        }
    }

    /// Read-merge-write one section back to disk.
    ///
    /// The file is re-read first and only `section` is overlaid, so keys a
    /// human edited in the meantime survive. The in-memory view takes the
    /// whole written document, not just `section`, so it never drifts from
    /// the file once `last_mtime` points at our own write.
    pub fn persist_section(&mut self, section: ConfigSection, value: Value) -> Result<()> {
        let key = section.key();
        let mut current = match read_json_safe(&self.path) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        current.insert(key.to_string(), value.clone());
        let written = Value::Object(current);

        let contents = serde_json::to_vec_pretty(&written)?;
        write_atomic(&self.path, &contents)
            .with_context(|| format!("Failed to persist {} to {:?}", key, self.path))?;
        // Our own write must not come back as an external edit
        self.last_mtime = modified_time(&self.path);

        let mut candidate = self.merged.clone();
        merge_json(&mut candidate, written);
        match Config::from_value(&candidate) {
            Ok(config) => {
                self.merged = candidate;
                self.config = config;
            }
            Err(e) => {
                // A broken external edit elsewhere in the file: take only our section
                tracing::warn!("Ignoring other keys of {:?}: {:#}", self.path, e);
                if let Value::Object(map) = &mut self.merged {
                    map.insert(key.to_string(), value);
                }
                self.config = Config::from_value(&self.merged)?;
            }
        }
        tracing::debug!("Persisted config section '{}'", key);
        Ok(())
    }
}

/// Quest synchronizer settings (config/sync.toml)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_scan_interval")]
    pub scan_interval: u64,
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

fn default_scan_interval() -> u64 {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scan_interval: default_scan_interval(),
            db_path: None,
        }
    }
}

impl SyncConfig {
    /// Load sync.toml, falling back to the embedded defaults when it is
    /// missing or unreadable.
    pub fn load(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read {:?}: {}", path, e);
                }
                DEFAULT_SYNC_CONFIG.to_string()
            }
        };

        match toml::from_str::<SyncConfig>(&contents) {
            Ok(mut config) => {
                config.scan_interval = config.scan_interval.max(1);
                config
            }
            Err(e) => {
                tracing::warn!("Ignoring malformed {:?}: {}", path, e);
                Self::default()
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::TempDir;
    use super::*;
    use serde_json::json;

    /// Force a distinct mtime on filesystems with coarse timestamps
    fn write_later(path: &Path, value: &Value) {
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(path, serde_json::to_vec_pretty(value).unwrap()).unwrap();
        let later = SystemTime::now() + std::time::Duration::from_secs(2);
        let file = fs::File::options().write(true).open(path).unwrap();
        file.set_modified(later).unwrap();
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let config = Config::defaults().expect("defaults parse");
        assert_eq!(config.refresh_interval, 4);
        assert_eq!(config.sort.keys, vec!["time_remaining".to_string()]);
        assert_eq!(config.sort.order, SortOrder::Asc);
        assert!(config.filter.enabled);
        assert_eq!(config.token_colors.get("time_remaining").map(String::as_str), Some("dynamic"));
        assert!(!config.header.is_empty());
        assert!(!config.lines.is_empty());
    }

    #[test]
    fn test_merge_is_key_by_key() {
        let mut base = json!({"sort": {"keys": ["id"], "order": "asc"}, "page_size": 10});
        merge_json(&mut base, json!({"sort": {"order": "desc"}}));
        assert_eq!(base, json!({"sort": {"keys": ["id"], "order": "desc"}, "page_size": 10}));
    }

    #[test]
    fn test_merge_replaces_arrays() {
        let mut base = json!({"sort": {"keys": ["id", "sector"]}});
        merge_json(&mut base, json!({"sort": {"keys": ["tier"]}}));
        assert_eq!(base["sort"]["keys"], json!(["tier"]));
    }

    #[test]
    fn test_sort_keys_accept_single_string() {
        let sort: SortConfig = serde_json::from_value(json!({"keys": "id", "order": "desc"})).unwrap();
        assert_eq!(sort.keys, vec!["id".to_string()]);
        assert_eq!(sort.order, SortOrder::Desc);
    }

    #[test]
    fn test_open_materializes_defaults() {
        let dir = TempDir::new("config-defaults");
        let path = dir.path().join("quest.json");
        let store = ConfigStore::open(path.clone()).unwrap();

        assert!(path.exists());
        let on_disk = read_json_safe(&path).unwrap();
        assert_eq!(on_disk, Config::default_value().unwrap());
        assert_eq!(store.config(), &Config::defaults().unwrap());
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() {
        let dir = TempDir::new("config-partial");
        let path = dir.path().join("quest.json");
        fs::write(&path, r#"{"sort": {"order": "desc"}}"#).unwrap();

        let store = ConfigStore::open(path).unwrap();
        let defaults = Config::defaults().unwrap();
        let config = store.config();

        assert_eq!(config.sort.order, SortOrder::Desc);
        assert_eq!(config.sort.keys, defaults.sort.keys);
        assert_eq!(config.filter, defaults.filter);
        assert_eq!(config.header, defaults.header);
        assert_eq!(config.shortcuts, defaults.shortcuts);
        assert_eq!(config.page_size, defaults.page_size);
    }

    #[test]
    fn test_reload_merges_over_previous() {
        let dir = TempDir::new("config-reload");
        let path = dir.path().join("quest.json");
        fs::write(&path, r#"{"page_size": 3}"#).unwrap();
        let mut store = ConfigStore::open(path.clone()).unwrap();
        assert_eq!(store.config().page_size, 3);

        write_later(&path, &json!({"sort": {"order": "desc"}}));
        assert!(store.reload_if_changed());

        // page_size no longer in the file but keeps its previously loaded value
        assert_eq!(store.config().page_size, 3);
        assert_eq!(store.config().sort.order, SortOrder::Desc);
    }

    #[test]
    fn test_reload_skips_unchanged_file() {
        let dir = TempDir::new("config-unchanged");
        let path = dir.path().join("quest.json");
        let mut store = ConfigStore::open(path).unwrap();
        assert!(!store.reload_if_changed());
    }

    #[test]
    fn test_malformed_reload_keeps_previous() {
        let dir = TempDir::new("config-malformed");
        let path = dir.path().join("quest.json");
        let mut store = ConfigStore::open(path.clone()).unwrap();
        let before = store.config().clone();

        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&path, "{ not json").unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() + std::time::Duration::from_secs(2)).unwrap();

        assert!(!store.reload_if_changed());
        assert_eq!(store.config(), &before);

        write_later(&path, &json!({"page_size": "many"}));
        assert!(!store.reload_if_changed());
        assert_eq!(store.config(), &before);
    }

    #[test]
    fn test_persist_section_preserves_external_keys() {
        let dir = TempDir::new("config-persist");
        let path = dir.path().join("quest.json");
        let mut store = ConfigStore::open(path.clone()).unwrap();

        // Someone edits an unrelated key on disk
        let mut on_disk = read_json_safe(&path).unwrap();
        on_disk["refresh_interval"] = json!(9);
        fs::write(&path, serde_json::to_vec_pretty(&on_disk).unwrap()).unwrap();

        store
            .persist_section(ConfigSection::Sort, json!({"keys": ["id"], "order": "desc"}))
            .unwrap();

        let written = read_json_safe(&path).unwrap();
        assert_eq!(written["refresh_interval"], json!(9));
        assert_eq!(written["sort"], json!({"keys": ["id"], "order": "desc"}));
        assert_eq!(store.config().sort.order, SortOrder::Desc);
        // The unrelated edit reaches memory too, even though no reload will see it
        assert_eq!(store.config().refresh_interval, 9);
        assert!(!store.reload_if_changed());
        assert!(!path.with_file_name("quest.json.tmp").exists());
    }

    #[test]
    fn test_page_size_is_clamped() {
        let mut value = Config::default_value().unwrap();
        value["page_size"] = json!(500);
        assert_eq!(Config::from_value(&value).unwrap().page_size, MAX_PAGE_SIZE);
        value["page_size"] = json!(0);
        assert_eq!(Config::from_value(&value).unwrap().page_size, MIN_PAGE_SIZE);
    }

    #[test]
    fn test_sync_config_defaults_and_override() {
        let dir = TempDir::new("sync-config");
        let path = dir.path().join("sync.toml");
        assert_eq!(SyncConfig::load(&path), SyncConfig::default());

        fs::write(&path, "scan_interval = 10\ndb_path = \"/games/SCUM.db\"\n").unwrap();
        let config = SyncConfig::load(&path);
        assert_eq!(config.scan_interval, 10);
        assert_eq!(config.db_path, Some(PathBuf::from("/games/SCUM.db")));

        fs::write(&path, "scan_interval = \"often\"").unwrap();
        assert_eq!(SyncConfig::load(&path), SyncConfig::default());
    }

    #[test]
    fn test_extract_defaults_is_idempotent() {
        let dir = TempDir::new("extract");
        let paths = AppPaths::new(dir.path());
        paths.extract_defaults().unwrap();
        assert!(paths.config_path().exists());
        assert!(paths.sync_config_path().exists());
        assert!(paths.translations_path().exists());

        fs::write(paths.sync_config_path(), "scan_interval = 7\n").unwrap();
        paths.extract_defaults().unwrap();
        assert_eq!(SyncConfig::load(&paths.sync_config_path()).scan_interval, 7);
    }
}
