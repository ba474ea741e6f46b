//! Users table - wallet owners

use crate::db::{now_timestamp, timestamp_at, Database, DbError, DbResult};
use crate::models::User;
use rusqlite::{params, OptionalExtension, Row};

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        wallet_address: row.get(1)?,
        created_at: timestamp_at(row, 2)?,
    })
}

impl Database {
    /// Create a user. Wallet addresses are stored lowercased.
    pub fn create_user(&self, wallet_address: &str) -> DbResult<User> {
        let conn = self.conn()?;
        let wallet = wallet_address.to_lowercase();

        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE wallet_address = ?1)",
            params![wallet],
            |row| row.get(0),
        )?;
        if exists {
            return Err(DbError::AlreadyExists(format!("user {}", wallet)));
        }

        conn.execute(
            "INSERT INTO users (wallet_address, created_at) VALUES (?1, ?2)",
            params![wallet, now_timestamp()],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);

        self.get_user(id)?
            .ok_or_else(|| DbError::NotFound(format!("user {}", id)))
    }

    pub fn get_user(&self, id: i64) -> DbResult<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, wallet_address, created_at FROM users WHERE id = ?1",
                params![id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn get_user_by_wallet(&self, wallet_address: &str) -> DbResult<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT id, wallet_address, created_at FROM users WHERE wallet_address = ?1",
                params![wallet_address.to_lowercase()],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Look up a user by wallet, creating it on first sight
    pub fn get_or_create_user(&self, wallet_address: &str) -> DbResult<User> {
        match self.get_user_by_wallet(wallet_address)? {
            Some(user) => Ok(user),
            None => self.create_user(wallet_address),
        }
    }

    pub fn list_users(&self) -> DbResult<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, wallet_address, created_at FROM users ORDER BY id ASC")?;
        let users = stmt
            .query_map([], row_to_user)?
            .collect::<rusqlite::Result<Vec<User>>>()?;
        Ok(users)
    }

    /// Delete a user. Agents, messages and counters go with it (ON DELETE CASCADE).
    pub fn delete_user(&self, id: i64) -> DbResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }
}
