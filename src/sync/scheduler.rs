//! Scheduling of mailbox reconciliation
//!
//! A tick task fires on an interval; each tick reconciles every enabled
//! mailbox whose own interval has elapsed. Manual triggers and shutdown
//! arrive on the same channel. Concurrent runs against the same mailbox are
//! skipped, not queued.

use chrono::{DateTime, Duration, Utc};
use flume::{Receiver, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::SyncSettings;
use crate::store::MailboxStore;
use crate::sync::engine::{ReconcileError, Reconciler};
use crate::types::Mailbox;

/// Events the scheduler reacts to
#[derive(Debug, Clone)]
pub enum SyncTrigger {
    /// Periodic tick; reconcile whatever is due
    Tick,
    /// Operator-requested immediate run for one mailbox
    Manual { mailbox_id: String },
    /// Stop the scheduler and cancel in-flight runs
    Shutdown,
}

/// Drives the reconciler from a tick interval and a trigger channel
pub struct SyncScheduler {
    reconciler: Arc<Reconciler>,
    mailboxes: Arc<dyn MailboxStore>,
    settings: SyncSettings,
    trigger_tx: Sender<SyncTrigger>,
    trigger_rx: Receiver<SyncTrigger>,
    running: Arc<AtomicBool>,
    // One lock per mailbox so overlapping runs are skipped
    run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    // When each mailbox was last started. Due-ness gates on this, not on
    // the watermark: a mailbox with no new mail never moves its watermark
    // but must still honor its interval.
    last_runs: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SyncScheduler {
    pub fn new(
        reconciler: Arc<Reconciler>,
        mailboxes: Arc<dyn MailboxStore>,
        settings: SyncSettings,
    ) -> Self {
        let (trigger_tx, trigger_rx) = flume::unbounded();
        Self {
            reconciler,
            mailboxes,
            settings,
            trigger_tx,
            trigger_rx,
            running: Arc::new(AtomicBool::new(false)),
            run_locks: Mutex::new(HashMap::new()),
            last_runs: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for submitting triggers from other tasks
    pub fn trigger_handle(&self) -> Sender<SyncTrigger> {
        self.trigger_tx.clone()
    }

    /// Run until a [`SyncTrigger::Shutdown`] arrives
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        self.spawn_tick_task();

        while let Ok(trigger) = self.trigger_rx.recv_async().await {
            match trigger {
                SyncTrigger::Tick => self.reconcile_due().await,
                SyncTrigger::Manual { mailbox_id } => {
                    info!("Manual sync requested for mailbox {}", mailbox_id);
                    self.clone().spawn_run(mailbox_id).await;
                }
                SyncTrigger::Shutdown => {
                    info!("Scheduler shutting down");
                    self.running.store(false, Ordering::SeqCst);
                    self.reconciler.cancel_flag().store(true, Ordering::Relaxed);
                    break;
                }
            }
        }
        info!("Scheduler stopped");
    }

    fn spawn_tick_task(&self) {
        let interval = tokio::time::Duration::from_secs(self.settings.tick_interval_seconds);
        let tx = self.trigger_tx.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            let mut tick_interval = tokio::time::interval(interval);
            // The first tick fires immediately; skip it so startup and the
            // first scheduled run do not coincide
            tick_interval.tick().await;

            info!("Starting sync tick loop (interval: {:?})", interval);
            let mut tick_count = 0u64;

            while running.load(Ordering::SeqCst) {
                tick_interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                tick_count += 1;
                debug!("Sync tick #{}", tick_count);

                if tx.send(SyncTrigger::Tick).is_err() {
                    error!("Trigger channel closed, stopping tick loop");
                    break;
                }
            }
        });
    }

    async fn reconcile_due(self: &Arc<Self>) {
        let mailboxes = match self.mailboxes.list_enabled() {
            Ok(mailboxes) => mailboxes,
            Err(e) => {
                error!("Could not list mailboxes: {}", e);
                return;
            }
        };

        let now = Utc::now();
        for mailbox in mailboxes {
            let last_run = self.last_runs.lock().await.get(&mailbox.id).copied();
            if is_due(&mailbox, last_run, now) {
                self.clone().spawn_run(mailbox.id).await;
            }
        }
    }

    async fn spawn_run(self: Arc<Self>, mailbox_id: String) {
        self.last_runs
            .lock()
            .await
            .insert(mailbox_id.clone(), Utc::now());

        let lock = {
            let mut locks = self.run_locks.lock().await;
            locks
                .entry(mailbox_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let Ok(guard) = lock.try_lock_owned() else {
            info!("Mailbox {} is already reconciling, skipping", mailbox_id);
            return;
        };

        let reconciler = self.reconciler.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match reconciler.reconcile(&mailbox_id).await {
                Ok(result) => debug!(
                    "Mailbox {} reconciled: {} created, {} updated, {} errors",
                    mailbox_id, result.created, result.updated, result.errors
                ),
                Err(ReconcileError::Cancelled) => {
                    info!("Reconciliation of {} cancelled", mailbox_id)
                }
                Err(e) => warn!("Reconciliation of {} failed: {}", mailbox_id, e),
            }
        });
    }
}

/// True when the mailbox's own interval has elapsed since its last run.
/// `last_run` is when the scheduler last started this mailbox, independent
/// of the message watermark.
fn is_due(mailbox: &Mailbox, last_run: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    if !mailbox.sync_enabled {
        return false;
    }
    match last_run {
        None => true,
        Some(last) => now >= last + Duration::minutes(mailbox.sync_interval_minutes as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailbox(interval: u32) -> Mailbox {
        Mailbox {
            id: "mb-1".to_string(),
            address: "support@example.com".to_string(),
            display_name: None,
            sync_enabled: true,
            sync_interval_minutes: interval,
            folder_filters: vec![],
            sender_filters: vec![],
            last_sync_at: None,
            last_sync_error: None,
        }
    }

    fn minutes_ago(m: i64) -> DateTime<Utc> {
        Utc::now() - Duration::minutes(m)
    }

    #[test]
    fn test_never_run_mailbox_is_due() {
        assert!(is_due(&mailbox(5), None, Utc::now()));
    }

    #[test]
    fn test_due_after_interval_elapsed() {
        assert!(is_due(&mailbox(5), Some(minutes_ago(6)), Utc::now()));
        assert!(!is_due(&mailbox(5), Some(minutes_ago(3)), Utc::now()));
    }

    #[test]
    fn test_quiet_mailbox_honors_interval() {
        // No new mail means the watermark never moves; the interval must
        // still gate on when the mailbox last ran
        let mut mb = mailbox(5);
        mb.last_sync_at = None;
        assert!(!is_due(&mb, Some(minutes_ago(1)), Utc::now()));

        // And an old watermark does not force a run before the interval
        mb.last_sync_at = Some(minutes_ago(120));
        assert!(!is_due(&mb, Some(minutes_ago(1)), Utc::now()));
    }

    #[test]
    fn test_disabled_mailbox_is_never_due() {
        let mut mb = mailbox(5);
        mb.sync_enabled = false;
        assert!(!is_due(&mb, None, Utc::now()));
    }
}
