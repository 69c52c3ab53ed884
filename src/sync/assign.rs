//! Least-loaded ticket assignment

use std::sync::Arc;
use tracing::{debug, info};

use crate::store::{AgentDirectory, StoreError, TicketStore};
use crate::types::TicketStatus;

/// Distributes new tickets across active agents by current open load
pub struct AssignmentBalancer {
    agents: Arc<dyn AgentDirectory>,
    tickets: Arc<dyn TicketStore>,
}

impl AssignmentBalancer {
    pub fn new(agents: Arc<dyn AgentDirectory>, tickets: Arc<dyn TicketStore>) -> Self {
        Self { agents, tickets }
    }

    /// Assign the ticket to the active agent with the fewest in-progress
    /// tickets, ties broken by listing order. Returns the chosen agent id,
    /// or `None` when no agent is active (the ticket stays unassigned).
    ///
    /// Load is recomputed from the store on every call; two tickets assigned
    /// back-to-back therefore land on different agents.
    pub fn auto_assign(&self, ticket_id: i64) -> Result<Option<String>, StoreError> {
        let agents = self.agents.list_active()?;
        if agents.is_empty() {
            debug!("No active agents, leaving ticket {} unassigned", ticket_id);
            return Ok(None);
        }

        let mut chosen: Option<(&str, u32)> = None;
        for agent in &agents {
            let load = self.tickets.count_in_progress_for_agent(&agent.id)?;
            // Strict comparison keeps the first-listed agent on ties
            match chosen {
                Some((_, best)) if load >= best => {}
                _ => chosen = Some((&agent.id, load)),
            }
        }

        // Non-empty agent list always yields a choice
        let (agent_id, load) = chosen.ok_or(StoreError::NotFound("agent".into()))?;
        self.tickets
            .assign(ticket_id, agent_id, TicketStatus::InProgress)?;
        info!(
            "Assigned ticket {} to agent {} (load was {})",
            ticket_id, agent_id, load
        );
        Ok(Some(agent_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;
    use crate::types::{Agent, NewTicket, TicketPriority};

    fn agent(id: &str) -> Agent {
        Agent {
            id: id.to_string(),
            email: format!("{}@helpdesk.example", id),
            name: None,
            active: true,
        }
    }

    fn ticket(message_id: &str) -> NewTicket {
        NewTicket {
            ticket_number: format!("TKT-0-{}", message_id),
            mailbox_id: "mb-1".to_string(),
            source_message_id: message_id.to_string(),
            subject: "s".to_string(),
            description: "d".to_string(),
            requester_email: "u@customer.com".to_string(),
            requester_name: None,
            priority: TicketPriority::Low,
            has_attachments: false,
            received_at: None,
        }
    }

    #[test]
    fn test_assigns_least_loaded_agent() {
        let db = Arc::new(Database::in_memory().unwrap());
        for id in ["a", "b", "c"] {
            db.add_agent(&agent(id)).unwrap();
        }
        // a carries 2 in-progress tickets, c carries 1, b none
        for (msg, agent_id) in [("m1", "a"), ("m2", "a"), ("m3", "c")] {
            let t = db.insert(&ticket(msg)).unwrap();
            db.assign(t.id, agent_id, TicketStatus::InProgress).unwrap();
        }

        let balancer = AssignmentBalancer::new(db.clone(), db.clone());

        let t4 = db.insert(&ticket("m4")).unwrap();
        assert_eq!(balancer.auto_assign(t4.id).unwrap().as_deref(), Some("b"));

        // Load is recomputed: b now carries 1, so the next ticket also
        // goes to the least loaded, which ties b and c; b is listed first
        let t5 = db.insert(&ticket("m5")).unwrap();
        assert_eq!(balancer.auto_assign(t5.id).unwrap().as_deref(), Some("b"));
    }

    #[test]
    fn test_tie_broken_by_listing_order() {
        let db = Arc::new(Database::in_memory().unwrap());
        for id in ["a", "b"] {
            db.add_agent(&agent(id)).unwrap();
        }
        let balancer = AssignmentBalancer::new(db.clone(), db.clone());

        let t = db.insert(&ticket("m1")).unwrap();
        assert_eq!(balancer.auto_assign(t.id).unwrap().as_deref(), Some("a"));
    }

    #[test]
    fn test_no_active_agents_leaves_unassigned() {
        let db = Arc::new(Database::in_memory().unwrap());
        let balancer = AssignmentBalancer::new(db.clone(), db.clone());

        let t = db.insert(&ticket("m1")).unwrap();
        assert_eq!(balancer.auto_assign(t.id).unwrap(), None);

        let loaded = TicketStore::get(db.as_ref(), t.id).unwrap().unwrap();
        assert!(loaded.assigned_to.is_none());
        assert_eq!(loaded.status, crate::types::TicketStatus::New);
    }
}
