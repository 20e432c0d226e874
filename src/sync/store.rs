//! Read-only access to the game's SQLite database.
//!
//! The connection is configured so polling never blocks the game's own
//! writers: WAL journaling, uncommitted reads tolerated, short busy timeout.
//! Lookup indexes are created idempotently on open.

use crate::snapshot::Quest;
use anyhow::{Context, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::time::Duration;

/// Entity class of the player-controlled character
const PLAYER_ENTITY_CLASS: &str = "FPrisonerEntity";

const INDEXES: &[(&str, &str)] = &[
    ("idx_entity_flags", "entity(flags)"),
    ("idx_entity_entity_system_id", "entity(entity_system_id)"),
    ("idx_entity_system_id", "entity_system(id)"),
    ("idx_entity_system_user_profile_id", "entity_system(user_profile_id)"),
    ("idx_active_quest_user_profile_id", "active_quest(user_profile_id)"),
    ("idx_tracking_data_set_id", "tracking_data(tracking_data_set_id)"),
];

/// Open connection to the game database, reused across poll cycles
pub struct QuestStore {
    conn: Connection,
}

impl QuestStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed opening game database at {}", path.display()))?;

        let store = Self { conn };
        store.configure()?;
        store.ensure_indexes();
        Ok(store)
    }

    fn configure(&self) -> Result<()> {
        self.conn
            .busy_timeout(Duration::from_secs(1))
            .context("failed setting busy timeout")?;
        let mode: String = self
            .conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .context("failed switching journal mode")?;
        tracing::debug!("Game database journal mode: {}", mode);
        let _locking: String = self
            .conn
            .pragma_update_and_check(None, "locking_mode", "NORMAL", |row| row.get(0))
            .context("failed setting locking mode")?;
        self.conn
            .pragma_update(None, "synchronous", "NORMAL")
            .context("failed setting synchronous mode")?;
        self.conn
            .pragma_update(None, "read_uncommitted", true)
            .context("failed enabling uncommitted reads")?;
        Ok(())
    }

    /// Create lookup indexes; failures are logged, polling still works without them
    fn ensure_indexes(&self) {
        for (name, target) in INDEXES {
            let sql = format!("CREATE INDEX IF NOT EXISTS {name} ON {target};");
            if let Err(e) = self.conn.execute_batch(&sql) {
                tracing::warn!("Could not create index {}: {}", name, e);
            }
        }
    }

    /// Resolve the live session: the unique player entity with flags = 0,
    /// followed to its owning profile. Zero or several candidates mean none.
    pub fn active_user_profile_id(&self) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT entity_system_id FROM entity WHERE class = ?1 AND flags = 0 LIMIT 2",
            )
            .context("failed preparing active entity query")?;
        let candidates = stmt
            .query_map(params![PLAYER_ENTITY_CLASS], |row| row.get::<_, Option<i64>>(0))
            .context("failed querying active entity")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed decoding active entity row")?;

        let entity_system_id = match candidates.as_slice() {
            [Some(id)] => *id,
            [] => return Ok(None),
            [None] => return Ok(None),
            _ => {
                tracing::debug!("Several live player entities, treating as no active session");
                return Ok(None);
            }
        };

        let profile = self
            .conn
            .query_row(
                "SELECT user_profile_id FROM entity_system WHERE id = ?1",
                params![entity_system_id],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()
            .context("failed querying entity_system")?;
        Ok(profile.flatten())
    }

    /// World clock of the session's entity system
    pub fn world_timestamp(&self, user_profile_id: i64) -> Result<Option<i64>> {
        let value = self
            .conn
            .query_row(
                "SELECT timestamp FROM entity_system WHERE user_profile_id = ?1",
                params![user_profile_id],
                |row| row.get::<_, SqlValue>(0),
            )
            .optional()
            .context("failed querying world timestamp")?;
        Ok(value.and_then(sql_value_as_i64))
    }

    /// All active quest rows owned by the profile, in table order
    pub fn active_quests(&self, user_profile_id: i64) -> Result<Vec<Quest>> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT id, sector, completion_deadline, quest_data_asset_path, auto_complete
                 FROM active_quest
                 WHERE user_profile_id = ?1",
            )
            .context("failed preparing active quest query")?;
        let rows = stmt
            .query_map(params![user_profile_id], |row| {
                let id: i64 = row.get(0)?;
                let sector: SqlValue = row.get(1)?;
                let deadline: SqlValue = row.get(2)?;
                let asset_path: SqlValue = row.get(3)?;
                let auto_complete: SqlValue = row.get(4)?;
                Ok(Quest {
                    id,
                    sector: sql_value_as_string(sector).unwrap_or_default(),
                    completion_deadline: sql_value_as_i64(deadline).unwrap_or_default(),
                    quest_data_asset_path: sql_value_as_string(asset_path).unwrap_or_default(),
                    auto_complete: sql_value_as_i64(auto_complete).is_some_and(|v| v != 0),
                    data: None,
                })
            })
            .context("failed querying active quests")?;

        let mut quests = Vec::new();
        for row in rows {
            quests.push(row.context("failed decoding active quest row")?);
        }
        Ok(quests)
    }

    /// Attach each quest's tracking payload as hex; a missing payload stays None
    pub fn attach_tracking_data(&self, quests: &mut [Quest]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT data FROM tracking_data WHERE tracking_data_set_id = ?1")
            .context("failed preparing tracking data query")?;

        for quest in quests.iter_mut() {
            let blob = stmt
                .query_row(params![quest.id], |row| row.get::<_, SqlValue>(0))
                .optional()
                .with_context(|| format!("failed querying tracking data for quest {}", quest.id))?;
            quest.data = match blob {
                Some(SqlValue::Blob(bytes)) => Some(hex::encode(bytes)),
                Some(SqlValue::Text(text)) => Some(hex::encode(text.as_bytes())),
                _ => None,
            };
        }
        Ok(())
    }

    /// Close the connection, logging rather than failing
    pub fn close(self) {
        if let Err((_, e)) = self.conn.close() {
            tracing::warn!("Error closing game database: {}", e);
        }
    }
}

fn sql_value_as_i64(value: SqlValue) -> Option<i64> {
    match value {
        SqlValue::Integer(v) => Some(v),
        SqlValue::Real(v) => Some(v as i64),
        SqlValue::Text(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}

fn sql_value_as_string(value: SqlValue) -> Option<String> {
    match value {
        SqlValue::Text(s) => Some(s),
        SqlValue::Integer(v) => Some(v.to_string()),
        SqlValue::Real(v) => Some(v.to_string()),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use rusqlite::{params, Connection};
    use std::path::Path;

    /// Minimal copy of the game schema
    pub fn create_game_db(path: &Path) -> Connection {
        let conn = Connection::open(path).expect("open sqlite");
        conn.execute_batch(
            r#"
CREATE TABLE entity (id INTEGER PRIMARY KEY, class TEXT, flags INTEGER, entity_system_id INTEGER);
CREATE TABLE entity_system (id INTEGER PRIMARY KEY, user_profile_id INTEGER, timestamp INTEGER);
CREATE TABLE active_quest (
    id INTEGER PRIMARY KEY,
    user_profile_id INTEGER,
    sector TEXT,
    completion_deadline INTEGER,
    quest_data_asset_path TEXT,
    auto_complete INTEGER
);
CREATE TABLE tracking_data (id INTEGER PRIMARY KEY, tracking_data_set_id INTEGER, data BLOB);
"#,
        )
        .expect("create schema");
        conn
    }

    pub fn add_player(conn: &Connection, entity_system_id: i64, profile: i64, flags: i64, timestamp: i64) {
        conn.execute(
            "INSERT INTO entity (class, flags, entity_system_id) VALUES ('FPrisonerEntity', ?1, ?2)",
            params![flags, entity_system_id],
        )
        .expect("insert entity");
        conn.execute(
            "INSERT INTO entity_system (id, user_profile_id, timestamp) VALUES (?1, ?2, ?3)",
            params![entity_system_id, profile, timestamp],
        )
        .expect("insert entity_system");
    }

    pub fn add_quest(conn: &Connection, id: i64, profile: i64, sector: &str, deadline: i64, path: &str) {
        conn.execute(
            "INSERT INTO active_quest (id, user_profile_id, sector, completion_deadline, quest_data_asset_path, auto_complete)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![id, profile, sector, deadline, path],
        )
        .expect("insert quest");
    }

    pub fn add_tracking(conn: &Connection, quest_id: i64, data: &[u8]) {
        conn.execute(
            "INSERT INTO tracking_data (tracking_data_set_id, data) VALUES (?1, ?2)",
            params![quest_id, data],
        )
        .expect("insert tracking data");
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::config::test_support::TempDir;

    #[test]
    fn test_open_creates_indexes() {
        let dir = TempDir::new("store-indexes");
        let path = dir.path().join("SCUM.db");
        drop(create_game_db(&path));

        QuestStore::open(&path).unwrap().close();
        // Second open must not fail on existing indexes
        QuestStore::open(&path).unwrap().close();

        let conn = Connection::open(&path).unwrap();
        for (name, _) in INDEXES {
            let found: Option<String> = conn
                .query_row(
                    "SELECT name FROM sqlite_master WHERE type = 'index' AND name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .optional()
                .unwrap();
            assert_eq!(found.as_deref(), Some(*name));
        }
    }

    #[test]
    fn test_no_live_entity_means_no_session() {
        let dir = TempDir::new("store-none");
        let path = dir.path().join("SCUM.db");
        let conn = create_game_db(&path);
        add_player(&conn, 1, 42, 1, 100);

        let store = QuestStore::open(&path).unwrap();
        assert_eq!(store.active_user_profile_id().unwrap(), None);
    }

    #[test]
    fn test_ambiguous_live_entities_mean_no_session() {
        let dir = TempDir::new("store-ambiguous");
        let path = dir.path().join("SCUM.db");
        let conn = create_game_db(&path);
        add_player(&conn, 1, 42, 0, 100);
        add_player(&conn, 2, 43, 0, 100);

        let store = QuestStore::open(&path).unwrap();
        assert_eq!(store.active_user_profile_id().unwrap(), None);
    }

    #[test]
    fn test_resolves_session_and_quests() {
        let dir = TempDir::new("store-session");
        let path = dir.path().join("SCUM.db");
        let conn = create_game_db(&path);
        add_player(&conn, 1, 42, 0, 5000);
        add_player(&conn, 2, 99, 3, 7000);
        add_quest(&conn, 10, 42, "A0", 6000, "QuestSetup:T1_Armory_Fetch");
        add_quest(&conn, 11, 42, "B4", 9000, "QuestSetup:T2_Trader_Hunt");
        add_quest(&conn, 12, 99, "C2", 9000, "QuestSetup:T3_Other_Quest");
        add_tracking(&conn, 10, &[0xde, 0xad, 0xbe, 0xef]);

        let store = QuestStore::open(&path).unwrap();
        let profile = store.active_user_profile_id().unwrap();
        assert_eq!(profile, Some(42));
        assert_eq!(store.world_timestamp(42).unwrap(), Some(5000));

        let mut quests = store.active_quests(42).unwrap();
        store.attach_tracking_data(&mut quests).unwrap();
        assert_eq!(quests.len(), 2);
        assert_eq!(quests[0].id, 10);
        assert_eq!(quests[0].data.as_deref(), Some("deadbeef"));
        assert_eq!(quests[1].sector, "B4");
        assert_eq!(quests[1].data, None);
    }

    #[test]
    fn test_value_conversions() {
        assert_eq!(sql_value_as_i64(SqlValue::Real(12.9)), Some(12));
        assert_eq!(sql_value_as_i64(SqlValue::Text(" 44 ".into())), Some(44));
        assert_eq!(sql_value_as_i64(SqlValue::Null), None);
        assert_eq!(sql_value_as_string(SqlValue::Integer(3)), Some("3".to_string()));
    }
}
