//! Message reconciliation engine
//!
//! Converts unprocessed inbound messages into tickets, exactly one ticket
//! per message. A run is bounded by the mailbox watermark (plus a lookback
//! window) and survives individual message failures; only whole-run
//! failures (credentials, listing) surface on the mailbox record.

use chrono::{DateTime, Duration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::SyncSettings;
use crate::graph::{excluded_folder_ids_from, MailSource, MailSourceError, MessageFilter};
use crate::oauth::{CredentialError, TokenGuard};
use crate::store::{AgentDirectory, AuditLog, MailboxStore, StoreError, TicketStore};
use crate::sync::assign::AssignmentBalancer;
use crate::sync::priority::derive_priority;
use crate::types::{InboundMessage, Mailbox, NewTicket, ReconcileResult};

/// Whole-run failures; per-message failures are counted, not raised
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("mailbox {0} not found")]
    MailboxNotFound(String),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Message listing failed before any ticket work happened
    #[error("listing failed: {0}")]
    Listing(#[from] MailSourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Run stopped on request; the watermark was not advanced
    #[error("reconciliation cancelled")]
    Cancelled,
}

/// Cache of resolved excluded-folder ids, keyed by mailbox.
///
/// Folder names rarely change, so entries live for a TTL before the folder
/// listing is consulted again. The cache is owned by the reconciler
/// instance; nothing here is process-global.
pub struct FolderExclusionCache {
    ttl: std::time::Duration,
    entries: RwLock<HashMap<String, (Instant, Vec<String>)>>,
}

impl FolderExclusionCache {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, mailbox_id: &str) -> Option<Vec<String>> {
        let entries = self.entries.read().await;
        entries.get(mailbox_id).and_then(|(at, ids)| {
            if at.elapsed() < self.ttl {
                Some(ids.clone())
            } else {
                None
            }
        })
    }

    async fn put(&self, mailbox_id: &str, ids: Vec<String>) {
        let mut entries = self.entries.write().await;
        entries.insert(mailbox_id.to_string(), (Instant::now(), ids));
    }
}

impl Default for FolderExclusionCache {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(600))
    }
}

enum MessageOutcome {
    Created,
    Updated,
}

/// Runs reconciliation for one mailbox at a time
pub struct Reconciler {
    mail: Arc<dyn MailSource>,
    guard: Arc<TokenGuard>,
    mailboxes: Arc<dyn MailboxStore>,
    tickets: Arc<dyn TicketStore>,
    balancer: AssignmentBalancer,
    audit: Arc<dyn AuditLog>,
    folder_cache: FolderExclusionCache,
    settings: SyncSettings,
    cancel: Arc<AtomicBool>,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mail: Arc<dyn MailSource>,
        guard: Arc<TokenGuard>,
        mailboxes: Arc<dyn MailboxStore>,
        tickets: Arc<dyn TicketStore>,
        agents: Arc<dyn AgentDirectory>,
        audit: Arc<dyn AuditLog>,
        settings: SyncSettings,
    ) -> Self {
        let balancer = AssignmentBalancer::new(agents, tickets.clone());
        Self {
            mail,
            guard,
            mailboxes,
            tickets,
            balancer,
            audit,
            folder_cache: FolderExclusionCache::default(),
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag that stops in-flight runs between messages
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Reconcile one mailbox: list unprocessed messages since the watermark
    /// and create (or touch) their tickets. Returns the per-run counts.
    pub async fn reconcile(&self, mailbox_id: &str) -> Result<ReconcileResult, ReconcileError> {
        if self.cancelled() {
            return Err(ReconcileError::Cancelled);
        }

        let mailbox = self
            .mailboxes
            .get(mailbox_id)?
            .ok_or_else(|| ReconcileError::MailboxNotFound(mailbox_id.to_string()))?;

        let token = match self.guard.get_valid_access_token(&mailbox.id).await {
            Ok(token) => token,
            Err(err) => {
                // Surfaced on the mailbox so the operator knows to reconnect
                if let Err(e) = self
                    .mailboxes
                    .set_sync_error(&mailbox.id, Some(&format!("reconnect account: {}", err)))
                {
                    warn!("Failed to record sync error for {}: {}", mailbox.id, e);
                }
                return Err(err.into());
            }
        };

        let excluded = self.excluded_folder_ids(&mailbox.id, &token).await;

        let lookback = Utc::now() - Duration::days(self.settings.lookback_days as i64);
        let since = match mailbox.last_sync_at {
            Some(watermark) => watermark.max(lookback),
            None => lookback,
        };

        if self.cancelled() {
            return Err(ReconcileError::Cancelled);
        }

        let filter = MessageFilter {
            folders: mailbox.folder_filters.clone(),
            since: Some(since),
            excluded_folder_ids: excluded,
        };
        let messages = match self.mail.list_messages(&token, &filter).await {
            Ok(messages) => messages,
            Err(err) => {
                if let Err(e) = self
                    .mailboxes
                    .set_sync_error(&mailbox.id, Some(&err.to_string()))
                {
                    warn!("Failed to record sync error for {}: {}", mailbox.id, e);
                }
                return Err(err.into());
            }
        };

        let candidates: Vec<InboundMessage> = messages
            .into_iter()
            .filter(|m| sender_matches(&mailbox.sender_filters, m.from_address.as_deref()))
            .collect();

        let mut result = ReconcileResult {
            total_seen: candidates.len() as u32,
            ..Default::default()
        };
        let mut max_received: Option<DateTime<Utc>> = None;

        for message in &candidates {
            if self.cancelled() {
                info!(
                    "Reconciliation of {} cancelled after {} messages",
                    mailbox.id,
                    result.created + result.updated + result.errors
                );
                return Err(ReconcileError::Cancelled);
            }

            if let Some(received) = message.received_at {
                if max_received.map_or(true, |m| received > m) {
                    max_received = Some(received);
                }
            }

            match self.process_message(&mailbox, &token, message).await {
                Ok(MessageOutcome::Created) => result.created += 1,
                Ok(MessageOutcome::Updated) => result.updated += 1,
                Err(err) => {
                    warn!(
                        "Message {} in mailbox {} failed: {}",
                        message.id, mailbox.id, err
                    );
                    result.errors += 1;
                }
            }
        }

        // The watermark only moves forward to received times actually seen,
        // never to wall-clock now, so a slow listing cannot skip messages.
        if let Some(watermark) = max_received {
            if let Err(e) = self.mailboxes.set_watermark(&mailbox.id, watermark) {
                warn!("Failed to advance watermark for {}: {}", mailbox.id, e);
            }
        }
        if let Err(e) = self.mailboxes.set_sync_error(&mailbox.id, None) {
            warn!("Failed to clear sync error for {}: {}", mailbox.id, e);
        }

        if let Err(e) = self.audit.record(
            "email_sync",
            "mailbox",
            &mailbox.id,
            serde_json::json!({
                "created": result.created,
                "updated": result.updated,
                "errors": result.errors,
                "total_seen": result.total_seen,
            }),
        ) {
            warn!("Failed to audit sync of {}: {}", mailbox.id, e);
        }

        info!(
            "Reconciled mailbox {}: {} created, {} updated, {} errors, {} seen",
            mailbox.id, result.created, result.updated, result.errors, result.total_seen
        );
        Ok(result)
    }

    /// Resolve folder exclusions, via cache. A folder listing failure
    /// degrades to no exclusions rather than failing the run.
    async fn excluded_folder_ids(&self, mailbox_id: &str, token: &str) -> Vec<String> {
        if let Some(cached) = self.folder_cache.get(mailbox_id).await {
            return cached;
        }
        match self.mail.list_folders(token).await {
            Ok(folders) => {
                let ids = excluded_folder_ids_from(&folders);
                self.folder_cache.put(mailbox_id, ids.clone()).await;
                ids
            }
            Err(err) => {
                warn!(
                    "Folder listing for {} failed, skipping exclusions: {}",
                    mailbox_id, err
                );
                Vec::new()
            }
        }
    }

    async fn process_message(
        &self,
        mailbox: &Mailbox,
        token: &str,
        message: &InboundMessage,
    ) -> Result<MessageOutcome, StoreError> {
        if let Some(existing) = self.tickets.find_by_source_message_id(&message.id)? {
            self.tickets.touch_updated(existing.id)?;
            return Ok(MessageOutcome::Updated);
        }

        let subject = message
            .subject
            .clone()
            .unwrap_or_else(|| "(no subject)".to_string());
        let priority = derive_priority(
            message.importance,
            &subject,
            &self.settings.urgent_keywords,
            &self.settings.important_keywords,
        );

        let new_ticket = NewTicket {
            ticket_number: generate_ticket_number(),
            mailbox_id: mailbox.id.clone(),
            source_message_id: message.id.clone(),
            subject,
            description: message.body_preview.clone().unwrap_or_default(),
            requester_email: message.from_address.clone().unwrap_or_default(),
            requester_name: message.from_name.clone(),
            priority,
            has_attachments: message.has_attachments,
            received_at: message.received_at,
        };

        let ticket = match self.tickets.insert(&new_ticket) {
            Ok(ticket) => ticket,
            // Another run created the ticket between our lookup and insert;
            // the message is reconciled either way.
            Err(StoreError::Conflict) => return Ok(MessageOutcome::Updated),
            Err(err) => return Err(err),
        };
        debug!(
            "Created ticket {} from message {}",
            ticket.ticket_number, message.id
        );

        // Post-insert steps are best-effort; the ticket already exists
        if let Err(e) = self.mail.mark_read(token, &message.id).await {
            debug!("Could not mark message {} read: {}", message.id, e);
        }
        if self.settings.auto_assign {
            if let Err(e) = self.balancer.auto_assign(ticket.id) {
                warn!("Auto-assignment of ticket {} failed: {}", ticket.id, e);
            }
        }

        Ok(MessageOutcome::Created)
    }
}

/// True when the sender passes the mailbox allow-list (empty list passes all)
fn sender_matches(filters: &[String], from_address: Option<&str>) -> bool {
    if filters.is_empty() {
        return true;
    }
    let Some(address) = from_address else {
        return false;
    };
    let address = address.to_lowercase();
    filters.iter().any(|f| address.contains(&f.to_lowercase()))
}

/// Human-readable ticket number; uniqueness is enforced by the store
fn generate_ticket_number() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(5)
        .map(|c| (c as char).to_ascii_uppercase())
        .collect();
    format!("TKT-{}-{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::TokenEndpoint;
    use crate::store::{CredentialStore, Database};
    use crate::types::{Credential, Importance, Ticket, TicketStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct NoRefreshEndpoint;

    #[async_trait]
    impl TokenEndpoint for NoRefreshEndpoint {
        async fn refresh(&self, _: &str) -> Result<Credential, CredentialError> {
            Err(CredentialError::Revoked("refresh not expected".into()))
        }
        async fn exchange_code(&self, _: &str) -> Result<Credential, CredentialError> {
            unimplemented!()
        }
    }

    struct MockMailSource {
        messages: Vec<InboundMessage>,
        folders: Vec<crate::types::Folder>,
        fail_listing: bool,
    }

    #[async_trait]
    impl MailSource for MockMailSource {
        async fn list_folders(
            &self,
            _: &str,
        ) -> Result<Vec<crate::types::Folder>, MailSourceError> {
            Ok(self.folders.clone())
        }

        async fn list_messages(
            &self,
            _: &str,
            filter: &MessageFilter,
        ) -> Result<Vec<InboundMessage>, MailSourceError> {
            if self.fail_listing {
                return Err(MailSourceError::Network("listing down".into()));
            }
            Ok(self
                .messages
                .iter()
                .filter(|m| match &m.folder_id {
                    Some(f) => !filter.excluded_folder_ids.contains(f),
                    None => true,
                })
                .cloned()
                .collect())
        }

        async fn get_message(
            &self,
            _: &str,
            message_id: &str,
        ) -> Result<InboundMessage, MailSourceError> {
            self.messages
                .iter()
                .find(|m| m.id == message_id)
                .cloned()
                .ok_or_else(|| MailSourceError::NotFound(message_id.to_string()))
        }

        async fn send_reply(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<crate::types::ReplyStrategy, MailSourceError> {
            unimplemented!()
        }

        async fn mark_read(&self, _: &str, _: &str) -> Result<(), MailSourceError> {
            Ok(())
        }

        async fn get_profile(
            &self,
            _: &str,
        ) -> Result<crate::types::MailProfile, MailSourceError> {
            unimplemented!()
        }
    }

    /// Honors the `since` filter and a page cap the way the real listing
    /// does: oldest first, truncated at `page_cap`
    struct PagedMailSource {
        messages: Vec<InboundMessage>,
        page_cap: usize,
    }

    #[async_trait]
    impl MailSource for PagedMailSource {
        async fn list_folders(
            &self,
            _: &str,
        ) -> Result<Vec<crate::types::Folder>, MailSourceError> {
            Ok(vec![])
        }

        async fn list_messages(
            &self,
            _: &str,
            filter: &MessageFilter,
        ) -> Result<Vec<InboundMessage>, MailSourceError> {
            let mut page: Vec<InboundMessage> = self
                .messages
                .iter()
                .filter(|m| match (filter.since, m.received_at) {
                    (Some(since), Some(received)) => received >= since,
                    _ => true,
                })
                .cloned()
                .collect();
            page.sort_by_key(|m| m.received_at);
            page.truncate(self.page_cap);
            Ok(page)
        }

        async fn get_message(
            &self,
            _: &str,
            message_id: &str,
        ) -> Result<InboundMessage, MailSourceError> {
            self.messages
                .iter()
                .find(|m| m.id == message_id)
                .cloned()
                .ok_or_else(|| MailSourceError::NotFound(message_id.to_string()))
        }

        async fn send_reply(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<crate::types::ReplyStrategy, MailSourceError> {
            unimplemented!()
        }

        async fn mark_read(&self, _: &str, _: &str) -> Result<(), MailSourceError> {
            Ok(())
        }

        async fn get_profile(
            &self,
            _: &str,
        ) -> Result<crate::types::MailProfile, MailSourceError> {
            unimplemented!()
        }
    }

    /// Delegates to the database except for source message ids told to
    /// fail or conflict on insert
    struct FaultyTicketStore {
        inner: Arc<Database>,
        fail_message_ids: Mutex<Vec<String>>,
        conflict_message_ids: Mutex<Vec<String>>,
    }

    impl crate::store::TicketStore for FaultyTicketStore {
        fn find_by_source_message_id(
            &self,
            message_id: &str,
        ) -> Result<Option<Ticket>, StoreError> {
            self.inner.find_by_source_message_id(message_id)
        }

        fn insert(&self, ticket: &NewTicket) -> Result<Ticket, StoreError> {
            if self
                .fail_message_ids
                .lock()
                .unwrap()
                .contains(&ticket.source_message_id)
            {
                return Err(StoreError::Database("disk full".into()));
            }
            if self
                .conflict_message_ids
                .lock()
                .unwrap()
                .contains(&ticket.source_message_id)
            {
                return Err(StoreError::Conflict);
            }
            self.inner.insert(ticket)
        }

        fn touch_updated(&self, ticket_id: i64) -> Result<(), StoreError> {
            self.inner.touch_updated(ticket_id)
        }

        fn get(&self, ticket_id: i64) -> Result<Option<Ticket>, StoreError> {
            TicketStore::get(self.inner.as_ref(), ticket_id)
        }

        fn set_status(&self, ticket_id: i64, status: TicketStatus) -> Result<(), StoreError> {
            self.inner.set_status(ticket_id, status)
        }

        fn assign(
            &self,
            ticket_id: i64,
            agent_id: &str,
            status: TicketStatus,
        ) -> Result<(), StoreError> {
            self.inner.assign(ticket_id, agent_id, status)
        }

        fn count_in_progress_for_agent(&self, agent_id: &str) -> Result<u32, StoreError> {
            self.inner.count_in_progress_for_agent(agent_id)
        }

        fn add_interaction(
            &self,
            ticket_id: i64,
            kind: crate::types::InteractionKind,
            author: &str,
            content: &str,
        ) -> Result<i64, StoreError> {
            self.inner.add_interaction(ticket_id, kind, author, content)
        }
    }

    fn message(id: &str, from: &str, minutes_ago: i64) -> InboundMessage {
        InboundMessage {
            id: id.to_string(),
            subject: Some(format!("Subject {}", id)),
            from_address: Some(from.to_string()),
            from_name: None,
            received_at: Some(Utc::now() - Duration::minutes(minutes_ago)),
            body_preview: Some("body".to_string()),
            has_attachments: false,
            importance: Importance::Normal,
            folder_id: Some("inbox".to_string()),
            metadata: serde_json::Value::Null,
        }
    }

    fn seeded_db(sender_filters: Vec<String>) -> Arc<Database> {
        let db = Arc::new(Database::in_memory().unwrap());
        db.create(&Mailbox {
            id: "mb-1".to_string(),
            address: "support@example.com".to_string(),
            display_name: None,
            sync_enabled: true,
            sync_interval_minutes: 5,
            folder_filters: vec![],
            sender_filters,
            last_sync_at: None,
            last_sync_error: None,
        })
        .unwrap();
        db.replace_atomic(
            "mb-1",
            &Credential {
                access_token: "at".into(),
                refresh_token: Some("rt".into()),
                expires_at: Some(Utc::now() + Duration::hours(1)),
            },
        )
        .unwrap();
        db
    }

    fn reconciler_with(
        db: Arc<Database>,
        tickets: Arc<dyn crate::store::TicketStore>,
        mail: impl MailSource + 'static,
    ) -> Reconciler {
        let guard = Arc::new(TokenGuard::new(Arc::new(NoRefreshEndpoint), db.clone()));
        let balancer = AssignmentBalancer::new(db.clone(), tickets.clone());
        let mut settings = SyncSettings::default();
        settings.auto_assign = false;
        Reconciler {
            mail: Arc::new(mail),
            guard,
            mailboxes: db.clone(),
            tickets,
            balancer,
            audit: db,
            folder_cache: FolderExclusionCache::default(),
            settings,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let db = seeded_db(vec![]);
        let mail = || MockMailSource {
            messages: vec![
                message("m1", "a@customer.com", 30),
                message("m2", "b@customer.com", 20),
                message("m3", "c@customer.com", 10),
            ],
            folders: vec![],
            fail_listing: false,
        };

        let reconciler = reconciler_with(db.clone(), db.clone(), mail());
        let first = reconciler.reconcile("mb-1").await.unwrap();
        assert_eq!(
            first,
            ReconcileResult {
                created: 3,
                updated: 0,
                errors: 0,
                total_seen: 3
            }
        );

        let reconciler = reconciler_with(db.clone(), db.clone(), mail());
        let second = reconciler.reconcile("mb-1").await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 3);

        // Watermark sits at the newest received time observed
        let mailbox = MailboxStore::get(db.as_ref(), "mb-1").unwrap().unwrap();
        let watermark = mailbox.last_sync_at.unwrap();
        assert!(Utc::now() - watermark < Duration::minutes(11));
    }

    #[tokio::test]
    async fn test_single_message_failure_is_isolated() {
        let db = seeded_db(vec![]);
        let faulty = Arc::new(FaultyTicketStore {
            inner: db.clone(),
            fail_message_ids: Mutex::new(vec!["m3".to_string()]),
            conflict_message_ids: Mutex::new(vec![]),
        });
        let mail = MockMailSource {
            messages: (1..=5)
                .map(|i| message(&format!("m{}", i), "a@customer.com", 60 - i * 10))
                .collect(),
            folders: vec![],
            fail_listing: false,
        };

        let reconciler = reconciler_with(db.clone(), faulty, mail);
        let result = reconciler.reconcile("mb-1").await.unwrap();
        assert_eq!(result.created, 4);
        assert_eq!(result.errors, 1);
        assert_eq!(result.total_seen, 5);

        // The failed message does not block the watermark
        let mailbox = MailboxStore::get(db.as_ref(), "mb-1").unwrap().unwrap();
        assert!(mailbox.last_sync_at.is_some());
        assert!(mailbox.last_sync_error.is_none());
    }

    #[tokio::test]
    async fn test_page_cap_never_skips_older_messages() {
        let db = seeded_db(vec![]);
        let messages: Vec<InboundMessage> = vec![
            message("m-old", "a@customer.com", 60),
            message("m-mid", "b@customer.com", 40),
            message("m-new", "c@customer.com", 20),
        ];

        // Cap of 2 truncates the first listing; ascending order means the
        // truncated message is newer than the watermark, not older
        let reconciler = reconciler_with(
            db.clone(),
            db.clone(),
            PagedMailSource {
                messages: messages.clone(),
                page_cap: 2,
            },
        );
        let first = reconciler.reconcile("mb-1").await.unwrap();
        assert_eq!(first.created, 2);

        let reconciler = reconciler_with(
            db.clone(),
            db.clone(),
            PagedMailSource {
                messages,
                page_cap: 2,
            },
        );
        let second = reconciler.reconcile("mb-1").await.unwrap();
        assert_eq!(second.created, 1);

        for id in ["m-old", "m-mid", "m-new"] {
            assert!(
                db.find_by_source_message_id(id).unwrap().is_some(),
                "message {} never became a ticket",
                id
            );
        }
    }

    #[tokio::test]
    async fn test_insert_conflict_counts_as_updated() {
        let db = seeded_db(vec![]);
        // Simulates another run inserting the ticket between our lookup
        // and our insert
        let racing = Arc::new(FaultyTicketStore {
            inner: db.clone(),
            fail_message_ids: Mutex::new(vec![]),
            conflict_message_ids: Mutex::new(vec!["m2".to_string()]),
        });
        let mail = MockMailSource {
            messages: vec![
                message("m1", "a@customer.com", 30),
                message("m2", "b@customer.com", 20),
            ],
            folders: vec![],
            fail_listing: false,
        };

        let reconciler = reconciler_with(db.clone(), racing, mail);
        let result = reconciler.reconcile("mb-1").await.unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.updated, 1);
        assert_eq!(result.errors, 0);
    }

    #[tokio::test]
    async fn test_listing_failure_leaves_watermark_untouched() {
        let db = seeded_db(vec![]);
        let mail = MockMailSource {
            messages: vec![],
            folders: vec![],
            fail_listing: true,
        };

        let reconciler = reconciler_with(db.clone(), db.clone(), mail);
        let err = reconciler.reconcile("mb-1").await.unwrap_err();
        assert!(matches!(err, ReconcileError::Listing(_)));

        let mailbox = MailboxStore::get(db.as_ref(), "mb-1").unwrap().unwrap();
        assert!(mailbox.last_sync_at.is_none());
        assert!(mailbox.last_sync_error.is_some());
    }

    #[tokio::test]
    async fn test_sender_filter_drops_non_matching() {
        let db = seeded_db(vec!["@customer.com".to_string()]);
        let mail = MockMailSource {
            messages: vec![
                message("m1", "alice@customer.com", 30),
                message("m2", "mailer@newsletter.io", 20),
            ],
            folders: vec![],
            fail_listing: false,
        };

        let reconciler = reconciler_with(db.clone(), db.clone(), mail);
        let result = reconciler.reconcile("mb-1").await.unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.total_seen, 1);
    }

    #[tokio::test]
    async fn test_excluded_folder_messages_are_skipped() {
        let db = seeded_db(vec![]);
        let mut junk = message("m2", "b@customer.com", 20);
        junk.folder_id = Some("junk-id".to_string());
        let mail = MockMailSource {
            messages: vec![message("m1", "a@customer.com", 30), junk],
            folders: vec![
                crate::types::Folder {
                    id: "inbox".into(),
                    display_name: "Inbox".into(),
                },
                crate::types::Folder {
                    id: "junk-id".into(),
                    display_name: "Lixo Eletrônico".into(),
                },
            ],
            fail_listing: false,
        };

        let reconciler = reconciler_with(db.clone(), db.clone(), mail);
        let result = reconciler.reconcile("mb-1").await.unwrap();
        assert_eq!(result.created, 1);
        assert_eq!(result.total_seen, 1);
    }

    #[tokio::test]
    async fn test_cancellation_leaves_watermark_untouched() {
        let db = seeded_db(vec![]);
        let mail = MockMailSource {
            messages: vec![message("m1", "a@customer.com", 30)],
            folders: vec![],
            fail_listing: false,
        };

        let reconciler = reconciler_with(db.clone(), db.clone(), mail);
        reconciler.cancel_flag().store(true, Ordering::Relaxed);

        let err = reconciler.reconcile("mb-1").await.unwrap_err();
        assert!(matches!(err, ReconcileError::Cancelled));

        let mailbox = MailboxStore::get(db.as_ref(), "mb-1").unwrap().unwrap();
        assert!(mailbox.last_sync_at.is_none());
    }

    #[tokio::test]
    async fn test_credential_failure_sets_reconnect_hint() {
        let db = seeded_db(vec![]);
        // Expire the credential so the guard must refresh, which fails
        db.replace_atomic(
            "mb-1",
            &Credential {
                access_token: "at".into(),
                refresh_token: Some("rt".into()),
                expires_at: Some(Utc::now() - Duration::minutes(1)),
            },
        )
        .unwrap();
        let mail = MockMailSource {
            messages: vec![],
            folders: vec![],
            fail_listing: false,
        };

        let reconciler = reconciler_with(db.clone(), db.clone(), mail);
        let err = reconciler.reconcile("mb-1").await.unwrap_err();
        assert!(matches!(err, ReconcileError::Credential(_)));

        let mailbox = MailboxStore::get(db.as_ref(), "mb-1").unwrap().unwrap();
        let hint = mailbox.last_sync_error.unwrap();
        assert!(hint.contains("reconnect account"));
    }

    #[test]
    fn test_sender_matches() {
        let filters = vec!["@Customer.com".to_string()];
        assert!(sender_matches(&filters, Some("alice@customer.com")));
        assert!(!sender_matches(&filters, Some("mailer@other.io")));
        assert!(!sender_matches(&filters, None));
        assert!(sender_matches(&[], Some("anyone@anywhere")));
        assert!(sender_matches(&[], None));
    }

    #[test]
    fn test_ticket_number_shape() {
        let number = generate_ticket_number();
        let parts: Vec<&str> = number.split('-').collect();
        assert_eq!(parts[0], "TKT");
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 5);
        assert!(parts[2].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }
}
