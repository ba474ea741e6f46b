//! Messages table - the off-chain message log
//!
//! Both counter tables are kept in step with `messages` inside the same
//! transaction as the insert/delete that changes them.

use crate::db::{now_timestamp, timestamp_at, Database, DbError, DbResult};
use crate::models::{Message, MessageRole, MessageStats};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use std::str::FromStr;

const MESSAGE_COLUMNS: &str = "id, agent_id, user_id, role, content, created_at";

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get(3)?;
    let role = MessageRole::from_str(&role_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e))
    })?;

    Ok(Message {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        user_id: row.get(2)?,
        role,
        content: row.get(4)?,
        created_at: timestamp_at(row, 5)?,
    })
}

impl Database {
    /// Append a message for an agent and bump the agent and user counters
    pub fn log_message(&self, agent_id: i64, role: MessageRole, content: &str) -> DbResult<Message> {
        let mut conn = self.conn()?;
        let now = now_timestamp();

        let tx = conn.transaction()?;
        let user_id: Option<i64> = tx
            .query_row(
                "SELECT user_id FROM agents WHERE id = ?1",
                params![agent_id],
                |row| row.get(0),
            )
            .optional()?;
        let user_id = user_id.ok_or_else(|| DbError::NotFound(format!("agent {}", agent_id)))?;

        tx.execute(
            "INSERT INTO messages (agent_id, user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![agent_id, user_id, role.as_ref(), content, now],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO agent_message_counters (agent_id, message_count, last_message_at)
             VALUES (?1, 1, ?2)
             ON CONFLICT(agent_id) DO UPDATE SET
                message_count = message_count + 1,
                last_message_at = excluded.last_message_at",
            params![agent_id, now],
        )?;
        tx.execute(
            "INSERT INTO user_message_counters (user_id, message_count, last_message_at)
             VALUES (?1, 1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET
                message_count = message_count + 1,
                last_message_at = excluded.last_message_at",
            params![user_id, now],
        )?;
        tx.commit()?;
        drop(conn);

        log::debug!("[db] Logged message {} for agent {}", id, agent_id);
        self.get_message(id)?
            .ok_or_else(|| DbError::NotFound(format!("message {}", id)))
    }

    pub fn get_message(&self, id: i64) -> DbResult<Option<Message>> {
        let conn = self.conn()?;
        let message = conn
            .query_row(
                &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
                params![id],
                row_to_message,
            )
            .optional()?;
        Ok(message)
    }

    /// Newest-first page of an agent's messages. `before_id` continues from a previous page.
    pub fn list_messages_for_agent(
        &self,
        agent_id: i64,
        limit: usize,
        before_id: Option<i64>,
    ) -> DbResult<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages
             WHERE agent_id = ?1 AND id < ?2
             ORDER BY id DESC LIMIT ?3",
            MESSAGE_COLUMNS
        ))?;
        let messages = stmt
            .query_map(
                params![agent_id, before_id.unwrap_or(i64::MAX), limit as i64],
                row_to_message,
            )?
            .collect::<rusqlite::Result<Vec<Message>>>()?;
        Ok(messages)
    }

    /// Newest-first messages across all of a user's agents
    pub fn list_messages_for_user(&self, user_id: i64, limit: usize) -> DbResult<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
            MESSAGE_COLUMNS
        ))?;
        let messages = stmt
            .query_map(params![user_id, limit as i64], row_to_message)?
            .collect::<rusqlite::Result<Vec<Message>>>()?;
        Ok(messages)
    }

    /// Delete a message and decrement both counters (never below zero)
    pub fn delete_message(&self, id: i64) -> DbResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let owners: Option<(i64, i64)> = tx
            .query_row(
                "SELECT agent_id, user_id FROM messages WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((agent_id, user_id)) = owners else {
            return Ok(false);
        };

        tx.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        tx.execute(
            "UPDATE agent_message_counters SET message_count = MAX(message_count - 1, 0) WHERE agent_id = ?1",
            params![agent_id],
        )?;
        tx.execute(
            "UPDATE user_message_counters SET message_count = MAX(message_count - 1, 0) WHERE user_id = ?1",
            params![user_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Messages logged across all of a user's agents (0 before the first message)
    pub fn user_message_count(&self, user_id: i64) -> DbResult<i64> {
        let conn = self.conn()?;
        let count: Option<i64> = conn
            .query_row(
                "SELECT message_count FROM user_message_counters WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    pub fn message_stats(&self) -> DbResult<MessageStats> {
        let conn = self.conn()?;
        let stats = conn.query_row(
            "SELECT (SELECT COUNT(*) FROM users),
                    (SELECT COUNT(*) FROM agents),
                    (SELECT COUNT(*) FROM messages)",
            [],
            |row| {
                Ok(MessageStats {
                    users: row.get(0)?,
                    agents: row.get(1)?,
                    messages: row.get(2)?,
                })
            },
        )?;
        Ok(stats)
    }
}
