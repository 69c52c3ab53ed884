//! Ticket replies and comments
//!
//! A reply is recorded as an interaction before the email leaves, so the
//! conversation history is durable even when delivery fails. Email failure
//! is reported in the outcome, never by rolling the interaction back.

use std::sync::Arc;
use tracing::{info, warn};

use crate::graph::MailSource;
use crate::oauth::TokenGuard;
use crate::store::{AuditLog, TicketStore};
use crate::types::error::{MaildeskError, Result};
use crate::types::{InteractionKind, ReplyStrategy, TicketStatus};

/// What happened to a reply: the interaction always exists; the email
/// may or may not have been sent
#[derive(Debug, Clone)]
pub struct ReplyOutcome {
    pub interaction_id: i64,
    /// Strategy that delivered the email, `None` when sending failed
    pub sent: Option<ReplyStrategy>,
    /// Why sending failed, for the operator
    pub error: Option<String>,
}

pub struct TicketService {
    tickets: Arc<dyn TicketStore>,
    mail: Arc<dyn MailSource>,
    guard: Arc<TokenGuard>,
    audit: Arc<dyn AuditLog>,
}

impl TicketService {
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        mail: Arc<dyn MailSource>,
        guard: Arc<TokenGuard>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            tickets,
            mail,
            guard,
            audit,
        }
    }

    /// Reply to the requester on the ticket's email thread.
    ///
    /// On successful delivery a ticket in `new` or `waiting_response` moves
    /// to `in_progress`.
    pub async fn reply(
        &self,
        ticket_id: i64,
        author: &str,
        content: &str,
    ) -> Result<ReplyOutcome> {
        let ticket = self
            .tickets
            .get(ticket_id)?
            .ok_or_else(|| MaildeskError::TicketNotFound(ticket_id.to_string()))?;

        // Recorded first; kept regardless of what the mail source does
        let interaction_id =
            self.tickets
                .add_interaction(ticket_id, InteractionKind::EmailReply, author, content)?;

        let token = match self
            .guard
            .get_valid_access_token(&ticket.mailbox_id)
            .await
        {
            Ok(token) => token,
            Err(err) => {
                warn!("Reply to ticket {} not sent: {}", ticket_id, err);
                return Ok(ReplyOutcome {
                    interaction_id,
                    sent: None,
                    error: Some(format!("reconnect account: {}", err)),
                });
            }
        };

        match self
            .mail
            .send_reply(
                &token,
                &ticket.source_message_id,
                &ticket.requester_email,
                content,
            )
            .await
        {
            Ok(strategy) => {
                if matches!(ticket.status, TicketStatus::New | TicketStatus::WaitingResponse) {
                    self.tickets.set_status(ticket_id, TicketStatus::InProgress)?;
                }
                if let Err(e) = self.audit.record(
                    "ticket_reply",
                    "ticket",
                    &ticket_id.to_string(),
                    serde_json::json!({ "author": author, "strategy": strategy }),
                ) {
                    warn!("Failed to audit reply on ticket {}: {}", ticket_id, e);
                }
                info!("Replied to ticket {} via {:?}", ticket_id, strategy);
                Ok(ReplyOutcome {
                    interaction_id,
                    sent: Some(strategy),
                    error: None,
                })
            }
            Err(err) => {
                warn!("Reply email for ticket {} failed: {}", ticket_id, err);
                Ok(ReplyOutcome {
                    interaction_id,
                    sent: None,
                    error: Some(err.to_string()),
                })
            }
        }
    }

    /// Add an internal comment; nothing is emailed
    pub fn add_comment(&self, ticket_id: i64, author: &str, content: &str) -> Result<i64> {
        if self.tickets.get(ticket_id)?.is_none() {
            return Err(MaildeskError::TicketNotFound(ticket_id.to_string()));
        }
        let id =
            self.tickets
                .add_interaction(ticket_id, InteractionKind::Comment, author, content)?;
        Ok(id)
    }
}
