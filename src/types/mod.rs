//! Core domain types shared across the reconciler

pub mod error;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A connected mail account configured for ticket capture
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mailbox {
    /// Stable identifier (UUID)
    pub id: String,
    /// Address of the connected account
    pub address: String,
    /// Display name of the account owner
    pub display_name: Option<String>,
    /// Whether the scheduler should reconcile this mailbox
    pub sync_enabled: bool,
    /// Minimum minutes between scheduled reconciliations
    pub sync_interval_minutes: u32,
    /// Folder allow-list (empty = all folders minus the system exclusions)
    pub folder_filters: Vec<String>,
    /// Sender allow-list, matched case-insensitively as substrings
    pub sender_filters: Vec<String>,
    /// Watermark: inbound messages up to this instant have been reconciled.
    /// Monotonically non-decreasing across successful runs.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Last whole-mailbox failure, surfaced to the operator ("reconnect account")
    pub last_sync_error: Option<String>,
}

/// OAuth access/refresh token pair for one mailbox
///
/// A refresh replaces all three fields atomically; a mixed-generation
/// credential (new access token, old refresh token) is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Message importance flag as reported by the mail source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    #[default]
    Normal,
    High,
}

/// Transient inbound message as listed by the mail source
///
/// Read-only from the reconciler's perspective. Fields the core logic reads
/// are typed; everything else the provider sent rides along in `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub from_name: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub body_preview: Option<String>,
    pub has_attachments: bool,
    pub importance: Importance,
    pub folder_id: Option<String>,
    /// Opaque pass-through of provider fields the core never inspects
    pub metadata: serde_json::Value,
}

/// Ticket lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    New,
    InProgress,
    WaitingResponse,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::New => "new",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::WaitingResponse => "waiting_response",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(TicketStatus::New),
            "in_progress" => Some(TicketStatus::InProgress),
            "waiting_response" => Some(TicketStatus::WaitingResponse),
            "resolved" => Some(TicketStatus::Resolved),
            "closed" => Some(TicketStatus::Closed),
            _ => None,
        }
    }
}

/// Ticket priority derived from the source message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(TicketPriority::Low),
            "medium" => Some(TicketPriority::Medium),
            "high" => Some(TicketPriority::High),
            "urgent" => Some(TicketPriority::Urgent),
            _ => None,
        }
    }
}

/// Durable ticket row created from (at most) one inbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: i64,
    pub ticket_number: String,
    pub mailbox_id: String,
    /// Source message identifier; unique, enforces at-most-one ticket per message
    pub source_message_id: String,
    pub subject: String,
    pub description: String,
    pub requester_email: String,
    pub requester_name: Option<String>,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub assigned_to: Option<String>,
    pub has_attachments: bool,
    pub received_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a new ticket (row id assigned by the store)
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub ticket_number: String,
    pub mailbox_id: String,
    pub source_message_id: String,
    pub subject: String,
    pub description: String,
    pub requester_email: String,
    pub requester_name: Option<String>,
    pub priority: TicketPriority,
    pub has_attachments: bool,
    pub received_at: Option<DateTime<Utc>>,
}

/// An agent eligible for ticket assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub active: bool,
}

/// A mail folder as listed by the mail source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub display_name: String,
}

/// Profile of the account a credential belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailProfile {
    pub address: String,
    pub display_name: Option<String>,
}

/// Which send strategy ultimately delivered a reply
///
/// The mail source tries these in order until one succeeds; the winner is
/// reported for observability rather than hidden behind nested fallbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyStrategy {
    /// Provider's direct reply endpoint
    DirectReply,
    /// Composed as a new message in the original conversation
    ComposeNew,
    /// Created as a draft, then sent
    DraftSend,
}

/// Kind of interaction recorded against a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    EmailReply,
    Comment,
}

impl InteractionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::EmailReply => "email_reply",
            InteractionKind::Comment => "comment",
        }
    }
}

/// Aggregate outcome of one reconciliation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResult {
    /// Tickets newly created this run
    pub created: u32,
    /// Messages that already had a ticket (touched, not duplicated)
    pub updated: u32,
    /// Per-message failures, isolated and counted
    pub errors: u32,
    /// Candidate messages seen after filtering
    pub total_seen: u32,
}
