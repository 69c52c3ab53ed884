//! Operator-facing services built on the stores and the mail source

pub mod account_service;
pub mod ticket_service;

pub use account_service::AccountService;
pub use ticket_service::{ReplyOutcome, TicketService};
