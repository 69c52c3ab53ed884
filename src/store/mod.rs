//! Persistence interfaces and their SQLite implementation
//!
//! The reconciler only talks to these traits; the SQLite-backed [`Database`]
//! implements all of them. Tests substitute in-memory databases or hand
//! written mocks for fault injection.

pub mod agents;
pub mod db;
pub mod mailboxes;
pub mod tickets;

pub use db::Database;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{
    Agent, Credential, InteractionKind, Mailbox, NewTicket, Ticket, TicketStatus,
};

/// Errors raised by the persistence layer
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    /// Unique-key violation; on ticket insert this means another run
    /// already created the ticket for the same source message
    #[error("duplicate key")]
    Conflict,

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(err: r2d2::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Token persistence for one mailbox
pub trait CredentialStore: Send + Sync {
    fn get(&self, mailbox_id: &str) -> Result<Option<Credential>, StoreError>;

    /// Replace the full access/refresh/expiry triple in one atomic write.
    /// A failed refresh never reaches this call, so the stored credential
    /// is either the old generation or the new one, never a mix.
    fn replace_atomic(&self, mailbox_id: &str, credential: &Credential) -> Result<(), StoreError>;
}

/// Mailbox configuration and watermark persistence
pub trait MailboxStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<Mailbox>, StoreError>;

    fn list_enabled(&self) -> Result<Vec<Mailbox>, StoreError>;

    fn create(&self, mailbox: &Mailbox) -> Result<(), StoreError>;

    /// Advance the watermark. Implementations must keep it monotonically
    /// non-decreasing; an older value than the stored one is a no-op.
    fn set_watermark(&self, id: &str, watermark: DateTime<Utc>) -> Result<(), StoreError>;

    /// Record (or clear, with `None`) the last whole-mailbox failure
    fn set_sync_error(&self, id: &str, error: Option<&str>) -> Result<(), StoreError>;
}

/// Ticket persistence; enforces uniqueness on the source message identifier
pub trait TicketStore: Send + Sync {
    fn find_by_source_message_id(&self, message_id: &str) -> Result<Option<Ticket>, StoreError>;

    /// Insert a new ticket. Returns [`StoreError::Conflict`] when a ticket
    /// for the same source message id already exists.
    fn insert(&self, ticket: &NewTicket) -> Result<Ticket, StoreError>;

    /// Idempotent re-ingestion path: bump the updated timestamp only
    fn touch_updated(&self, ticket_id: i64) -> Result<(), StoreError>;

    fn get(&self, ticket_id: i64) -> Result<Option<Ticket>, StoreError>;

    fn set_status(&self, ticket_id: i64, status: TicketStatus) -> Result<(), StoreError>;

    /// Set the assignee and status in one write
    fn assign(
        &self,
        ticket_id: i64,
        agent_id: &str,
        status: TicketStatus,
    ) -> Result<(), StoreError>;

    /// Live recomputation of an agent's open load; never cached
    fn count_in_progress_for_agent(&self, agent_id: &str) -> Result<u32, StoreError>;

    fn add_interaction(
        &self,
        ticket_id: i64,
        kind: InteractionKind,
        author: &str,
        content: &str,
    ) -> Result<i64, StoreError>;
}

/// Listing of agents eligible for assignment, in stable order
pub trait AgentDirectory: Send + Sync {
    fn list_active(&self) -> Result<Vec<Agent>, StoreError>;
}

/// Append-only activity log
pub trait AuditLog: Send + Sync {
    fn record(
        &self,
        action: &str,
        entity_type: &str,
        entity_id: &str,
        details: serde_json::Value,
    ) -> Result<(), StoreError>;
}

/// Serialize a timestamp in the fixed-width form stored in SQLite.
///
/// The format sorts lexicographically, which the monotonic watermark
/// update relies on.
pub(crate) fn to_db_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse a timestamp previously written by [`to_db_timestamp`]
pub(crate) fn from_db_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}
