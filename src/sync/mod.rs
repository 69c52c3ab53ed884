//! Mailbox reconciliation: engine, scheduling, prioritization, assignment

pub mod assign;
pub mod engine;
pub mod priority;
pub mod scheduler;

pub use assign::AssignmentBalancer;
pub use engine::{FolderExclusionCache, ReconcileError, Reconciler};
pub use scheduler::{SyncScheduler, SyncTrigger};
