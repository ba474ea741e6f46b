//! Agents table - agent addresses operating a user's wallet
//!
//! Every agent owns exactly one agent_message_counters row, created alongside it.

use crate::db::{now_timestamp, timestamp_at, Database, DbError, DbResult};
use crate::models::Agent;
use rusqlite::{params, OptionalExtension, Row};

const AGENT_COLUMNS: &str = "id, user_id, agent_address, name, created_at";

fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<Agent> {
    Ok(Agent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        agent_address: row.get(2)?,
        name: row.get(3)?,
        created_at: timestamp_at(row, 4)?,
    })
}

impl Database {
    /// Register an agent for a user and zero its message counter
    pub fn create_agent(
        &self,
        user_id: i64,
        agent_address: &str,
        name: Option<&str>,
    ) -> DbResult<Agent> {
        let mut conn = self.conn()?;
        let address = agent_address.to_lowercase();

        let tx = conn.transaction()?;
        let user_exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            params![user_id],
            |row| row.get(0),
        )?;
        if !user_exists {
            return Err(DbError::NotFound(format!("user {}", user_id)));
        }
        let taken: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM agents WHERE agent_address = ?1)",
            params![address],
            |row| row.get(0),
        )?;
        if taken {
            return Err(DbError::AlreadyExists(format!("agent {}", address)));
        }

        tx.execute(
            "INSERT INTO agents (user_id, agent_address, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, address, name, now_timestamp()],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO agent_message_counters (agent_id, message_count) VALUES (?1, 0)",
            params![id],
        )?;
        tx.commit()?;
        drop(conn);

        self.get_agent(id)?
            .ok_or_else(|| DbError::NotFound(format!("agent {}", id)))
    }

    pub fn get_agent(&self, id: i64) -> DbResult<Option<Agent>> {
        let conn = self.conn()?;
        let agent = conn
            .query_row(
                &format!("SELECT {} FROM agents WHERE id = ?1", AGENT_COLUMNS),
                params![id],
                row_to_agent,
            )
            .optional()?;
        Ok(agent)
    }

    pub fn get_agent_by_address(&self, agent_address: &str) -> DbResult<Option<Agent>> {
        let conn = self.conn()?;
        let agent = conn
            .query_row(
                &format!("SELECT {} FROM agents WHERE agent_address = ?1", AGENT_COLUMNS),
                params![agent_address.to_lowercase()],
                row_to_agent,
            )
            .optional()?;
        Ok(agent)
    }

    pub fn list_agents_for_user(&self, user_id: i64) -> DbResult<Vec<Agent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM agents WHERE user_id = ?1 ORDER BY id ASC",
            AGENT_COLUMNS
        ))?;
        let agents = stmt
            .query_map(params![user_id], row_to_agent)?
            .collect::<rusqlite::Result<Vec<Agent>>>()?;
        Ok(agents)
    }

    /// Delete an agent; its messages and counter cascade
    pub fn delete_agent(&self, id: i64) -> DbResult<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // The user's counter is not a child of the agent, so subtract its share by hand
        let owner: Option<(i64, i64)> = tx
            .query_row(
                "SELECT a.user_id, COALESCE(c.message_count, 0)
                 FROM agents a LEFT JOIN agent_message_counters c ON c.agent_id = a.id
                 WHERE a.id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((user_id, count)) = owner else {
            return Ok(false);
        };

        tx.execute(
            "UPDATE user_message_counters SET message_count = MAX(message_count - ?1, 0) WHERE user_id = ?2",
            params![count, user_id],
        )?;
        tx.execute("DELETE FROM agents WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(true)
    }

    /// Messages logged by an agent, from its counter row
    pub fn agent_message_count(&self, agent_id: i64) -> DbResult<i64> {
        let conn = self.conn()?;
        let count: Option<i64> = conn
            .query_row(
                "SELECT message_count FROM agent_message_counters WHERE agent_id = ?1",
                params![agent_id],
                |row| row.get(0),
            )
            .optional()?;
        count.ok_or_else(|| DbError::NotFound(format!("agent {}", agent_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate_up(None).unwrap();
        db
    }

    #[test]
    fn test_create_agent_zeroes_counter() {
        let db = migrated_db();
        let user = db.create_user("0xowner").unwrap();
        let agent = db.create_agent(user.id, "0xAGENT", Some("trader")).unwrap();

        assert_eq!(agent.user_id, user.id);
        assert_eq!(agent.agent_address, "0xagent");
        assert_eq!(agent.name.as_deref(), Some("trader"));
        assert_eq!(db.agent_message_count(agent.id).unwrap(), 0);
    }

    #[test]
    fn test_create_agent_for_missing_user() {
        let db = migrated_db();
        assert!(matches!(
            db.create_agent(404, "0xagent", None),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_agent_address_unique() {
        let db = migrated_db();
        let user = db.create_user("0xowner").unwrap();
        db.create_agent(user.id, "0xagent", None).unwrap();
        assert!(matches!(
            db.create_agent(user.id, "0xAgent", None),
            Err(DbError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_list_and_lookup_agents() {
        let db = migrated_db();
        let alice = db.create_user("0xalice").unwrap();
        let bob = db.create_user("0xbob").unwrap();
        let a1 = db.create_agent(alice.id, "0xa1", None).unwrap();
        let a2 = db.create_agent(alice.id, "0xa2", None).unwrap();
        db.create_agent(bob.id, "0xb1", None).unwrap();

        let agents = db.list_agents_for_user(alice.id).unwrap();
        assert_eq!(agents, vec![a1.clone(), a2]);
        assert_eq!(db.get_agent_by_address("0xA1").unwrap(), Some(a1));
    }

    #[test]
    fn test_deleting_user_cascades_to_agents() {
        let db = migrated_db();
        let user = db.create_user("0xowner").unwrap();
        let agent = db.create_agent(user.id, "0xagent", None).unwrap();

        db.delete_user(user.id).unwrap();
        assert!(db.get_agent(agent.id).unwrap().is_none());
        assert!(matches!(
            db.agent_message_count(agent.id),
            Err(DbError::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_missing_agent() {
        let db = migrated_db();
        assert!(!db.delete_agent(7).unwrap());
    }
}
