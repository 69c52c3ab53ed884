//! Mailbox connection flow
//!
//! Turns an authorization code into a connected mailbox: exchange the code,
//! look up whose account the credential belongs to, persist both.

use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::graph::MailSource;
use crate::oauth::TokenEndpoint;
use crate::store::{CredentialStore, MailboxStore};
use crate::types::error::Result;
use crate::types::Mailbox;

const DEFAULT_SYNC_INTERVAL_MINUTES: u32 = 5;

pub struct AccountService {
    mailboxes: Arc<dyn MailboxStore>,
    credentials: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    mail: Arc<dyn MailSource>,
}

impl AccountService {
    pub fn new(
        mailboxes: Arc<dyn MailboxStore>,
        credentials: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        mail: Arc<dyn MailSource>,
    ) -> Self {
        Self {
            mailboxes,
            credentials,
            endpoint,
            mail,
        }
    }

    /// Complete the authorization-code flow and register the mailbox
    /// for scheduled reconciliation
    pub async fn connect_mailbox(&self, code: &str) -> Result<Mailbox> {
        let credential = self.endpoint.exchange_code(code).await?;
        let profile = self.mail.get_profile(&credential.access_token).await?;

        let mailbox = Mailbox {
            id: Uuid::new_v4().to_string(),
            address: profile.address,
            display_name: profile.display_name,
            sync_enabled: true,
            sync_interval_minutes: DEFAULT_SYNC_INTERVAL_MINUTES,
            folder_filters: vec![],
            sender_filters: vec![],
            last_sync_at: None,
            last_sync_error: None,
        };

        self.mailboxes.create(&mailbox)?;
        self.credentials.replace_atomic(&mailbox.id, &credential)?;

        info!("Connected mailbox {} ({})", mailbox.id, mailbox.address);
        Ok(mailbox)
    }
}
