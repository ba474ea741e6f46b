//! Message log database
//!
//! SQLite behind an r2d2 pool. The schema is versioned by [`migrations`];
//! per-table methods live in [`tables`] as `impl Database` blocks.

pub mod migrations;
mod tables;

use chrono::{DateTime, NaiveDateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::Row;
use std::path::Path;
use thiserror::Error;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Errors that can occur when using the message log database.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Database records schema version {0}, which this binary does not know")]
    UnknownSchemaVersion(i64),
    #[error("Invalid migration target {target} (latest known version is {latest})")]
    InvalidTarget { target: i64, latest: i64 },
}

pub type DbResult<T> = Result<T, DbError>;

const IN_MEMORY_URL: &str = ":memory:";

pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (or create) a file-backed database. `:memory:` opens a private in-memory one.
    pub fn new(database_url: &str) -> DbResult<Self> {
        if database_url == IN_MEMORY_URL {
            return Self::open_in_memory();
        }

        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let manager = SqliteConnectionManager::file(database_url).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
        });
        let pool = Pool::builder().max_size(8).build(manager)?;

        log::debug!("[db] Opened {}", database_url);
        Ok(Self { pool })
    }

    /// Open a private in-memory database.
    /// Every pooled connection would get its own memory database, so the pool holds exactly one.
    pub fn open_in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let pool = Pool::builder().max_size(1).build(manager)?;
        Ok(Self { pool })
    }

    /// Open a file database and bring its schema up to date
    pub fn open_migrated(database_url: &str) -> DbResult<Self> {
        let db = Self::new(database_url)?;
        let applied = db.migrate_up(None)?;
        if !applied.is_empty() {
            log::info!("[db] Applied schema migrations {:?}", applied);
        }
        Ok(db)
    }

    pub(crate) fn conn(&self) -> DbResult<DbConn> {
        Ok(self.pool.get()?)
    }
}

/// Current time in the format stored in every `*_at` column
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Parse a stored timestamp. Accepts RFC 3339 (written by this crate) and
/// SQLite's `datetime('now')` format (column defaults).
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Read a timestamp column inside a rusqlite row mapper
pub(crate) fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("invalid timestamp '{}'", raw).into(),
        )
    })
}
