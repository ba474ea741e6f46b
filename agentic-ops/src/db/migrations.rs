//! Versioned schema migrations for the message log
//!
//! Migrations are applied in ascending version order. Each one runs in its own
//! transaction together with its `schema_migrations` bookkeeping row, so a
//! failed migration leaves the schema at the previous version.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;

use super::{now_timestamp, Database, DbError, DbResult};

/// A single schema change with its inverse
#[derive(Debug, Clone, Copy)]
pub struct SchemaMigration {
    pub version: i64,
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

/// Applied/pending state of one known migration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaMigrationStatus {
    pub version: i64,
    pub name: &'static str,
    pub applied: bool,
    pub applied_at: Option<String>,
}

const CREATE_BOOKKEEPING: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
)";

pub const MIGRATIONS: &[SchemaMigration] = &[
    SchemaMigration {
        version: 1,
        name: "create_users",
        up: "CREATE TABLE users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    wallet_address TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);",
        down: "DROP TABLE IF EXISTS users;",
    },
    SchemaMigration {
        version: 2,
        name: "create_agents",
        up: "CREATE TABLE agents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    agent_address TEXT NOT NULL UNIQUE,
    name TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);
CREATE INDEX idx_agents_user_id ON agents(user_id);
CREATE TABLE agent_message_counters (
    agent_id INTEGER PRIMARY KEY,
    message_count INTEGER NOT NULL DEFAULT 0,
    last_message_at TEXT,
    FOREIGN KEY (agent_id) REFERENCES agents(id) ON DELETE CASCADE
);",
        down: "DROP TABLE IF EXISTS agent_message_counters;
DROP INDEX IF EXISTS idx_agents_user_id;
DROP TABLE IF EXISTS agents;",
    },
    SchemaMigration {
        version: 3,
        name: "create_messages",
        up: "CREATE TABLE messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    role TEXT NOT NULL CHECK (role IN ('user', 'agent', 'system')),
    content TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (agent_id) REFERENCES agents(id) ON DELETE CASCADE,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);
CREATE INDEX idx_messages_agent_created ON messages(agent_id, created_at);
CREATE INDEX idx_messages_user_created ON messages(user_id, created_at);
CREATE TABLE user_message_counters (
    user_id INTEGER PRIMARY KEY,
    message_count INTEGER NOT NULL DEFAULT 0,
    last_message_at TEXT,
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);",
        down: "DROP TABLE IF EXISTS user_message_counters;
DROP INDEX IF EXISTS idx_messages_user_created;
DROP INDEX IF EXISTS idx_messages_agent_created;
DROP TABLE IF EXISTS messages;",
    },
];

/// Highest version this binary knows about
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Applied versions with their timestamps. Fails if the database is ahead of this binary.
fn applied_versions(conn: &Connection) -> DbResult<BTreeMap<i64, String>> {
    conn.execute(CREATE_BOOKKEEPING, [])?;

    let mut stmt = conn.prepare("SELECT version, applied_at FROM schema_migrations ORDER BY version")?;
    let applied = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<BTreeMap<i64, String>>>()?;

    if let Some(unknown) = applied
        .keys()
        .find(|v| !MIGRATIONS.iter().any(|m| m.version == **v))
    {
        return Err(DbError::UnknownSchemaVersion(*unknown));
    }
    Ok(applied)
}

fn check_target(target: i64) -> DbResult<()> {
    let latest = latest_version();
    if target < 0 || target > latest {
        return Err(DbError::InvalidTarget { target, latest });
    }
    Ok(())
}

impl Database {
    /// Apply every pending migration up to `target` (default: latest). Returns applied versions.
    pub fn migrate_up(&self, target: Option<i64>) -> DbResult<Vec<i64>> {
        let target = target.unwrap_or_else(latest_version);
        check_target(target)?;

        let mut conn = self.conn()?;
        let applied = applied_versions(&conn)?;
        let mut done = Vec::new();

        for migration in MIGRATIONS
            .iter()
            .filter(|m| m.version <= target && !applied.contains_key(&m.version))
        {
            log::info!("[db] Applying migration {} ({})", migration.version, migration.name);
            let tx = conn.transaction()?;
            tx.execute_batch(migration.up)?;
            tx.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.name, now_timestamp()],
            )?;
            tx.commit()?;
            done.push(migration.version);
        }

        Ok(done)
    }

    /// Revert applied migrations above `target`, newest first. Returns reverted versions.
    pub fn migrate_down(&self, target: i64) -> DbResult<Vec<i64>> {
        check_target(target)?;

        let mut conn = self.conn()?;
        let applied = applied_versions(&conn)?;
        let mut done = Vec::new();

        for migration in MIGRATIONS
            .iter()
            .rev()
            .filter(|m| m.version > target && applied.contains_key(&m.version))
        {
            log::info!("[db] Reverting migration {} ({})", migration.version, migration.name);
            let tx = conn.transaction()?;
            tx.execute_batch(migration.down)?;
            tx.execute(
                "DELETE FROM schema_migrations WHERE version = ?1",
                params![migration.version],
            )?;
            tx.commit()?;
            done.push(migration.version);
        }

        Ok(done)
    }

    /// One entry per known migration
    pub fn schema_status(&self) -> DbResult<Vec<SchemaMigrationStatus>> {
        let conn = self.conn()?;
        let applied = applied_versions(&conn)?;

        Ok(MIGRATIONS
            .iter()
            .map(|m| SchemaMigrationStatus {
                version: m.version,
                name: m.name,
                applied: applied.contains_key(&m.version),
                applied_at: applied.get(&m.version).cloned(),
            })
            .collect())
    }

    /// Highest applied version (0 for an empty database)
    pub fn schema_version(&self) -> DbResult<i64> {
        let conn = self.conn()?;
        conn.execute(CREATE_BOOKKEEPING, [])?;
        let version: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(version.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(db: &Database, name: &str) -> bool {
        let conn = db.conn().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        count > 0
    }

    #[test]
    fn test_versions_are_strictly_increasing() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
        assert_eq!(MIGRATIONS[0].version, 1);
    }

    #[test]
    fn test_migrate_up_creates_all_tables() {
        let db = Database::open_in_memory().unwrap();
        let applied = db.migrate_up(None).unwrap();
        assert_eq!(applied, vec![1, 2, 3]);
        assert_eq!(db.schema_version().unwrap(), 3);

        for table in [
            "users",
            "agents",
            "agent_message_counters",
            "messages",
            "user_message_counters",
        ] {
            assert!(table_exists(&db, table), "missing table {}", table);
        }
    }

    #[test]
    fn test_migrate_up_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.migrate_up(None).unwrap();
        assert!(db.migrate_up(None).unwrap().is_empty());
    }

    #[test]
    fn test_migrate_up_to_target_then_rest() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.migrate_up(Some(2)).unwrap(), vec![1, 2]);
        assert!(table_exists(&db, "agents"));
        assert!(!table_exists(&db, "messages"));

        assert_eq!(db.migrate_up(None).unwrap(), vec![3]);
        assert!(table_exists(&db, "messages"));
    }

    #[test]
    fn test_migrate_down_reverts_newest_first() {
        let db = Database::open_in_memory().unwrap();
        db.migrate_up(None).unwrap();

        assert_eq!(db.migrate_down(1).unwrap(), vec![3, 2]);
        assert_eq!(db.schema_version().unwrap(), 1);
        assert!(table_exists(&db, "users"));
        assert!(!table_exists(&db, "agents"));
        assert!(!table_exists(&db, "user_message_counters"));

        assert_eq!(db.migrate_down(0).unwrap(), vec![1]);
        assert!(!table_exists(&db, "users"));
        assert_eq!(db.schema_version().unwrap(), 0);
    }

    #[test]
    fn test_invalid_targets_rejected() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.migrate_up(Some(99)),
            Err(DbError::InvalidTarget { target: 99, latest: 3 })
        ));
        assert!(matches!(
            db.migrate_down(-1),
            Err(DbError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_status_reports_applied_and_pending() {
        let db = Database::open_in_memory().unwrap();
        db.migrate_up(Some(1)).unwrap();

        let status = db.schema_status().unwrap();
        assert_eq!(status.len(), 3);
        assert!(status[0].applied);
        assert!(status[0].applied_at.is_some());
        assert!(!status[1].applied);
        assert_eq!(status[2].name, "create_messages");
    }

    #[test]
    fn test_unknown_recorded_version_is_an_error() {
        let db = Database::open_in_memory().unwrap();
        db.migrate_up(None).unwrap();
        {
            let conn = db.conn().unwrap();
            conn.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (42, 'future', '2030-01-01T00:00:00+00:00')",
                [],
            )
            .unwrap();
        }

        assert!(matches!(db.migrate_up(None), Err(DbError::UnknownSchemaVersion(42))));
        assert!(matches!(db.schema_status(), Err(DbError::UnknownSchemaVersion(42))));
    }
}
