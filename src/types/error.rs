//! Unified error type for the application
//!
//! Module-specific failures (credential refresh, mail source calls, store
//! operations) have their own taxonomies next to the code that raises them;
//! this is the top-level error they converge into at the service boundary.

use thiserror::Error;

use crate::graph::MailSourceError;
use crate::oauth::CredentialError;
use crate::store::StoreError;
use crate::sync::engine::ReconcileError;

/// Application error type for services and the binary entry point
#[derive(Debug, Error)]
pub enum MaildeskError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Mailbox not found: {0}")]
    MailboxNotFound(String),

    #[error("Ticket not found: {0}")]
    TicketNotFound(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    MailSource(#[from] MailSourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for MaildeskError {
    fn from(err: std::io::Error) -> Self {
        MaildeskError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for MaildeskError {
    fn from(err: toml::de::Error) -> Self {
        MaildeskError::Config(err.to_string())
    }
}

/// Result type alias using MaildeskError
pub type Result<T> = std::result::Result<T, MaildeskError>;
