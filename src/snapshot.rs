//! Snapshot Store: the JSON file that decouples the synchronizer from the renderer.
//!
//! The synchronizer replaces the whole document on every poll; the renderer
//! re-reads it only when its modification time moves. Either side may be
//! missing without the other failing: an absent or corrupt file reads as the
//! empty snapshot.

use crate::config::{modified_time, read_json_safe, write_atomic};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// One active quest row as mirrored from the game database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quest {
    #[serde(deserialize_with = "int_like")]
    pub id: i64,
    #[serde(default)]
    pub sector: String,
    #[serde(default, deserialize_with = "int_like")]
    pub completion_deadline: i64,
    #[serde(default)]
    pub quest_data_asset_path: String,
    #[serde(default, deserialize_with = "bool_like")]
    pub auto_complete: bool,
    /// Hex-encoded tracking payload; always serialized, null when absent
    #[serde(default)]
    pub data: Option<String>,
}

/// Point-in-time copy of one session's quests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "user_profile_id", default, deserialize_with = "opt_int_like")]
    pub session_id: Option<i64>,
    #[serde(default, deserialize_with = "opt_int_like")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub quests: Vec<Quest>,
}

impl Snapshot {
    /// The null form written when no session is live
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn for_session(session_id: i64, timestamp: Option<i64>, quests: Vec<Quest>) -> Self {
        Self {
            session_id: Some(session_id),
            timestamp,
            quests,
        }
    }

    pub fn is_empty_form(&self) -> bool {
        self.session_id.is_none() && self.timestamp.is_none() && self.quests.is_empty()
    }

    /// Atomically replace the snapshot file
    pub fn write(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_vec_pretty(self).context("Failed to serialize snapshot")?;
        write_atomic(path, &contents)
    }

    /// Atomically replace the snapshot file with the null form
    pub fn clear(path: &Path) -> Result<()> {
        Self::empty().write(path)
    }

    /// Read the snapshot; absence or corruption yields the empty form
    pub fn read(path: &Path) -> Self {
        let Some(value) = read_json_safe(path) else {
            return Self::empty();
        };
        match serde_json::from_value(value) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Snapshot {:?} has the wrong shape: {}", path, e);
                Self::empty()
            }
        }
    }
}

/// Change-detecting reader used by the renderer
pub struct SnapshotReader {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
    loaded_once: bool,
}

impl SnapshotReader {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_mtime: None,
            loaded_once: false,
        }
    }

    /// Return a fresh snapshot when the file changed since the last read
    /// (or unconditionally when `force` is set or nothing was read yet).
    pub fn read_if_changed(&mut self, force: bool) -> Option<Snapshot> {
        let mtime = modified_time(&self.path);
        if !force && self.loaded_once && mtime == self.last_mtime {
            return None;
        }
        self.last_mtime = mtime;
        self.loaded_once = true;
        Some(Snapshot::read(&self.path))
    }
}

fn int_like<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(opt_int_like(deserializer)?.unwrap_or_default())
}

/// Accept integers, floats, numeric strings and null
fn opt_int_like<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        Value::Bool(b) => Some(b as i64),
        _ => None,
    })
}

/// Accept booleans, 0/1 integers and "true"/"1" strings
fn bool_like<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    use serde_json::Value;
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1"),
        _ => false,
    })
}
