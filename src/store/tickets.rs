//! Ticket persistence
//!
//! The `UNIQUE` constraint on `source_message_id` is what turns at-least-once
//! message delivery into at-most-one ticket per message; insert conflicts are
//! surfaced as [`StoreError::Conflict`] for the caller to treat as success.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::{from_db_timestamp, to_db_timestamp, Database, StoreError, TicketStore};
use crate::types::{InteractionKind, NewTicket, Ticket, TicketPriority, TicketStatus};

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    let status: String = row.get("status")?;
    let priority: String = row.get("priority")?;
    let received_at: Option<String> = row.get("received_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Ticket {
        id: row.get("id")?,
        ticket_number: row.get("ticket_number")?,
        mailbox_id: row.get("mailbox_id")?,
        source_message_id: row.get("source_message_id")?,
        subject: row.get("subject")?,
        description: row.get("description")?,
        requester_email: row.get("requester_email")?,
        requester_name: row.get("requester_name")?,
        status: TicketStatus::parse(&status).unwrap_or(TicketStatus::New),
        priority: TicketPriority::parse(&priority).unwrap_or(TicketPriority::Low),
        assigned_to: row.get("assigned_to")?,
        has_attachments: row.get::<_, i64>("has_attachments")? != 0,
        received_at: received_at.as_deref().and_then(from_db_timestamp),
        created_at: from_db_timestamp(&created_at).unwrap_or_else(Utc::now),
        updated_at: from_db_timestamp(&updated_at).unwrap_or_else(Utc::now),
    })
}

impl TicketStore for Database {
    fn find_by_source_message_id(&self, message_id: &str) -> Result<Option<Ticket>, StoreError> {
        let conn = self.conn()?;
        let ticket = conn
            .query_row(
                "SELECT * FROM tickets WHERE source_message_id = ?1",
                params![message_id],
                ticket_from_row,
            )
            .optional()?;
        Ok(ticket)
    }

    fn insert(&self, ticket: &NewTicket) -> Result<Ticket, StoreError> {
        let conn = self.conn()?;
        let now = to_db_timestamp(&Utc::now());
        conn.execute(
            "INSERT INTO tickets
                (ticket_number, mailbox_id, source_message_id, subject, description,
                 requester_email, requester_name, status, priority, has_attachments,
                 received_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'new', ?8, ?9, ?10, ?11, ?11)",
            params![
                ticket.ticket_number,
                ticket.mailbox_id,
                ticket.source_message_id,
                ticket.subject,
                ticket.description,
                ticket.requester_email,
                ticket.requester_name,
                ticket.priority.as_str(),
                ticket.has_attachments as i64,
                ticket.received_at.as_ref().map(to_db_timestamp),
                now,
            ],
        )?;

        let id = conn.last_insert_rowid();
        let inserted = conn.query_row(
            "SELECT * FROM tickets WHERE id = ?1",
            params![id],
            ticket_from_row,
        )?;
        Ok(inserted)
    }

    fn touch_updated(&self, ticket_id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE tickets SET updated_at = ?1 WHERE id = ?2",
            params![to_db_timestamp(&Utc::now()), ticket_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("ticket {}", ticket_id)));
        }
        Ok(())
    }

    fn get(&self, ticket_id: i64) -> Result<Option<Ticket>, StoreError> {
        let conn = self.conn()?;
        let ticket = conn
            .query_row(
                "SELECT * FROM tickets WHERE id = ?1",
                params![ticket_id],
                ticket_from_row,
            )
            .optional()?;
        Ok(ticket)
    }

    fn set_status(&self, ticket_id: i64, status: TicketStatus) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE tickets SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), to_db_timestamp(&Utc::now()), ticket_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("ticket {}", ticket_id)));
        }
        Ok(())
    }

    fn assign(
        &self,
        ticket_id: i64,
        agent_id: &str,
        status: TicketStatus,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE tickets SET assigned_to = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                agent_id,
                status.as_str(),
                to_db_timestamp(&Utc::now()),
                ticket_id
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("ticket {}", ticket_id)));
        }
        Ok(())
    }

    fn count_in_progress_for_agent(&self, agent_id: &str) -> Result<u32, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tickets WHERE status = 'in_progress' AND assigned_to = ?1",
            params![agent_id],
            |row| row.get(0),
        )?;
        Ok(count as u32)
    }

    fn add_interaction(
        &self,
        ticket_id: i64,
        kind: InteractionKind,
        author: &str,
        content: &str,
    ) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO ticket_interactions (ticket_id, kind, author, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                ticket_id,
                kind.as_str(),
                author,
                content,
                to_db_timestamp(&Utc::now()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}
