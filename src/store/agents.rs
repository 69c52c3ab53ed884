//! Agent directory
//!
//! Listing order is stable (insertion order) because assignment tie-breaking
//! depends on it.

use chrono::Utc;
use rusqlite::params;

use super::{to_db_timestamp, AgentDirectory, Database, StoreError};
use crate::types::Agent;

impl Database {
    /// Register an agent (operator-facing setup path)
    pub fn add_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO agents (id, email, name, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                agent.id,
                agent.email,
                agent.name,
                agent.active as i64,
                to_db_timestamp(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Enable or disable an agent for assignment
    pub fn set_agent_active(&self, agent_id: &str, active: bool) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE agents SET active = ?1 WHERE id = ?2",
            params![active as i64, agent_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("agent {}", agent_id)));
        }
        Ok(())
    }
}

impl AgentDirectory for Database {
    fn list_active(&self) -> Result<Vec<Agent>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, email, name, active FROM agents WHERE active = 1 ORDER BY rowid",
        )?;
        let agents = stmt
            .query_map([], |row| {
                Ok(Agent {
                    id: row.get(0)?,
                    email: row.get(1)?,
                    name: row.get(2)?,
                    active: row.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(agents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str) -> Agent {
        Agent {
            id: id.to_string(),
            email: format!("{}@helpdesk.example", id),
            name: None,
            active: true,
        }
    }

    #[test]
    fn test_list_active_preserves_insertion_order() {
        let db = Database::in_memory().unwrap();
        db.add_agent(&agent("a")).unwrap();
        db.add_agent(&agent("b")).unwrap();
        db.add_agent(&agent("c")).unwrap();

        let ids: Vec<String> = db.list_active().unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_inactive_agents_are_excluded() {
        let db = Database::in_memory().unwrap();
        db.add_agent(&agent("a")).unwrap();
        db.add_agent(&agent("b")).unwrap();
        db.set_agent_active("a", false).unwrap();

        let ids: Vec<String> = db.list_active().unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["b"]);
    }
}
