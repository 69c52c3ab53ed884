//! Microsoft Graph mail source
//!
//! Implements the [`MailSource`] trait over the Graph REST API. The
//! reconciler never sees Graph wire types; messages are mapped into
//! [`InboundMessage`] at this boundary, with unrecognized provider fields
//! carried in `metadata`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::{Folder, Importance, InboundMessage, MailProfile, ReplyStrategy};

pub const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Folder display names that never produce tickets, compared
/// case-insensitively. Covers English and pt-BR locales plus the
/// locale-independent well-known ids.
const EXCLUDED_FOLDER_NAMES: &[&str] = &[
    "junkemail",
    "junk email",
    "junk",
    "spam",
    "deleteditems",
    "deleted items",
    "trash",
    "lixeira",
    "lixo eletrônico",
    "drafts",
    "rascunhos",
    "sentitems",
    "sent items",
    "itens enviados",
];

/// Errors from the mail source, classified by retryability
#[derive(Debug, Clone, Error)]
pub enum MailSourceError {
    /// Transport-level failure; transient, safe to retry next cycle
    #[error("mail source unreachable: {0}")]
    Network(String),

    /// 429 or 503 from the provider; transient
    #[error("mail source throttled: {0}")]
    RateLimited(String),

    /// Other non-success status from the provider
    #[error("mail source error: {0}")]
    ServerError(String),

    /// Referenced message or folder does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Token rejected; the credential guard should have prevented this
    #[error("authorization rejected: {0}")]
    Auth(String),
}

impl MailSourceError {
    /// Transient errors resolve on their own; the run fails but the next
    /// scheduled cycle retries from the same watermark.
    pub fn is_transient(&self) -> bool {
        matches!(self, MailSourceError::Network(_) | MailSourceError::RateLimited(_))
    }
}

/// Listing filter assembled by the reconciler
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    /// Folder allow-list (ids); empty means all folders
    pub folders: Vec<String>,
    /// Only messages received at or after this instant
    pub since: Option<DateTime<Utc>>,
    /// Folder ids resolved from the exclusion name list
    pub excluded_folder_ids: Vec<String>,
}

/// Read and send operations against the connected mailbox
#[async_trait]
pub trait MailSource: Send + Sync {
    async fn list_folders(&self, access_token: &str) -> Result<Vec<Folder>, MailSourceError>;

    async fn list_messages(
        &self,
        access_token: &str,
        filter: &MessageFilter,
    ) -> Result<Vec<InboundMessage>, MailSourceError>;

    async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<InboundMessage, MailSourceError>;

    /// Send a reply on the thread of the original message, falling back
    /// through compose-new and draft-then-send. Returns the strategy that
    /// delivered it.
    async fn send_reply(
        &self,
        access_token: &str,
        message_id: &str,
        to_address: &str,
        body_html: &str,
    ) -> Result<ReplyStrategy, MailSourceError>;

    async fn mark_read(&self, access_token: &str, message_id: &str)
        -> Result<(), MailSourceError>;

    async fn get_profile(&self, access_token: &str) -> Result<MailProfile, MailSourceError>;
}

#[derive(Debug, Deserialize)]
struct GraphList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphFolder {
    id: String,
    display_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphAddress {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient {
    email_address: GraphAddress,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    from: Option<GraphRecipient>,
    #[serde(default)]
    received_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    body_preview: Option<String>,
    #[serde(default)]
    has_attachments: bool,
    #[serde(default)]
    importance: Importance,
    #[serde(default)]
    parent_folder_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    /// Provider fields the core never inspects; preserved as-is
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

impl From<GraphMessage> for InboundMessage {
    fn from(msg: GraphMessage) -> Self {
        let (from_address, from_name) = msg
            .from
            .map(|r| (r.email_address.address, r.email_address.name))
            .unwrap_or((None, None));

        let mut metadata = msg.extra;
        if let Some(cid) = &msg.conversation_id {
            metadata.insert("conversationId".to_string(), json!(cid));
        }

        InboundMessage {
            id: msg.id,
            subject: msg.subject,
            from_address,
            from_name,
            received_at: msg.received_date_time,
            body_preview: msg.body_preview,
            has_attachments: msg.has_attachments,
            importance: msg.importance,
            folder_id: msg.parent_folder_id,
            metadata: serde_json::Value::Object(metadata),
        }
    }
}

/// Decide which listed folders must never produce tickets
pub fn excluded_folder_ids_from(folders: &[Folder]) -> Vec<String> {
    folders
        .iter()
        .filter(|f| {
            let name = f.display_name.to_lowercase();
            EXCLUDED_FOLDER_NAMES.iter().any(|ex| name == *ex)
        })
        .map(|f| f.id.clone())
        .collect()
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> MailSourceError {
    match status.as_u16() {
        429 | 503 => MailSourceError::RateLimited(format!("{}: {}", status, body)),
        404 => MailSourceError::NotFound(body.to_string()),
        401 | 403 => MailSourceError::Auth(format!("{}: {}", status, body)),
        _ => MailSourceError::ServerError(format!("{}: {}", status, body)),
    }
}

/// HTTP implementation of [`MailSource`] over the Graph API
pub struct GraphMailSource {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
}

impl GraphMailSource {
    pub fn new(http: reqwest::Client, page_size: u32) -> Self {
        Self::with_base_url(http, DEFAULT_BASE_URL, page_size)
    }

    pub fn with_base_url(http: reqwest::Client, base_url: &str, page_size: u32) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_size,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        access_token: &str,
        url: &str,
    ) -> Result<T, MailSourceError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| MailSourceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| MailSourceError::ServerError(format!("malformed response: {}", e)))
    }

    async fn post_json(
        &self,
        access_token: &str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, MailSourceError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| MailSourceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        Ok(response)
    }

    fn messages_query(&self, filter: &MessageFilter) -> String {
        // Ascending order matters: with a page cap, the page holds the
        // oldest unprocessed messages, so anything truncated stays above
        // the watermark and is picked up by the next run.
        let mut query = format!(
            "$top={}&$orderby=receivedDateTime asc&$select=id,subject,from,receivedDateTime,bodyPreview,hasAttachments,importance,parentFolderId,conversationId",
            self.page_size
        );
        if let Some(since) = &filter.since {
            query.push_str(&format!(
                "&$filter=receivedDateTime ge {}",
                since.to_rfc3339_opts(SecondsFormat::Secs, true)
            ));
        }
        query
    }

    async fn list_messages_at(
        &self,
        access_token: &str,
        endpoint: &str,
        filter: &MessageFilter,
    ) -> Result<Vec<GraphMessage>, MailSourceError> {
        let url = format!("{}?{}", endpoint, self.messages_query(filter));
        let list: GraphList<GraphMessage> = self.get_json(access_token, &url).await?;
        Ok(list.value)
    }

    /// Strategy 2: compose a new message in the original conversation
    async fn send_as_new_message(
        &self,
        access_token: &str,
        message_id: &str,
        to_address: &str,
        body_html: &str,
    ) -> Result<(), MailSourceError> {
        let original: GraphMessage = self
            .get_json(
                access_token,
                &format!(
                    "{}/me/messages/{}?$select=id,subject,conversationId",
                    self.base_url, message_id
                ),
            )
            .await?;

        let subject = original.subject.unwrap_or_default();
        let subject = if subject.to_lowercase().starts_with("re:") {
            subject
        } else {
            format!("Re: {}", subject)
        };

        let payload = json!({
            "message": {
                "subject": subject,
                "body": { "contentType": "HTML", "content": body_html },
                "toRecipients": [
                    { "emailAddress": { "address": to_address } }
                ],
                "conversationId": original.conversation_id,
            },
            "saveToSentItems": true,
        });
        self.post_json(access_token, &format!("{}/me/sendMail", self.base_url), &payload)
            .await?;
        Ok(())
    }

    /// Strategy 3: create a reply draft, then send it
    async fn send_via_draft(
        &self,
        access_token: &str,
        message_id: &str,
        body_html: &str,
    ) -> Result<(), MailSourceError> {
        let draft = self
            .post_json(
                access_token,
                &format!("{}/me/messages/{}/createReply", self.base_url, message_id),
                &json!({}),
            )
            .await?;
        let draft: GraphMessage = draft
            .json()
            .await
            .map_err(|e| MailSourceError::ServerError(format!("malformed draft: {}", e)))?;

        let patch = self
            .http
            .patch(format!("{}/me/messages/{}", self.base_url, draft.id))
            .bearer_auth(access_token)
            .json(&json!({ "body": { "contentType": "HTML", "content": body_html } }))
            .send()
            .await
            .map_err(|e| MailSourceError::Network(e.to_string()))?;
        if !patch.status().is_success() {
            let status = patch.status();
            let body = patch.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        self.post_json(
            access_token,
            &format!("{}/me/messages/{}/send", self.base_url, draft.id),
            &json!({}),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MailSource for GraphMailSource {
    async fn list_folders(&self, access_token: &str) -> Result<Vec<Folder>, MailSourceError> {
        let url = format!("{}/me/mailFolders?$top=100", self.base_url);
        let list: GraphList<GraphFolder> = self.get_json(access_token, &url).await?;
        Ok(list
            .value
            .into_iter()
            .map(|f| Folder {
                id: f.id,
                display_name: f.display_name,
            })
            .collect())
    }

    async fn list_messages(
        &self,
        access_token: &str,
        filter: &MessageFilter,
    ) -> Result<Vec<InboundMessage>, MailSourceError> {
        let mut raw = Vec::new();
        if filter.folders.is_empty() {
            let endpoint = format!("{}/me/messages", self.base_url);
            raw.extend(self.list_messages_at(access_token, &endpoint, filter).await?);
        } else {
            for folder_id in &filter.folders {
                let endpoint = format!(
                    "{}/me/mailFolders/{}/messages",
                    self.base_url, folder_id
                );
                raw.extend(self.list_messages_at(access_token, &endpoint, filter).await?);
            }
        }

        // Folder exclusion is applied client-side so it also covers the
        // all-folders listing, where messages carry their parent folder id.
        let messages: Vec<InboundMessage> = raw
            .into_iter()
            .filter(|m| match &m.parent_folder_id {
                Some(folder_id) => !filter.excluded_folder_ids.iter().any(|ex| ex == folder_id),
                None => true,
            })
            .map(InboundMessage::from)
            .collect();

        debug!("Listed {} messages after folder exclusion", messages.len());
        Ok(messages)
    }

    async fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<InboundMessage, MailSourceError> {
        let url = format!("{}/me/messages/{}", self.base_url, message_id);
        let message: GraphMessage = self.get_json(access_token, &url).await?;
        Ok(message.into())
    }

    async fn send_reply(
        &self,
        access_token: &str,
        message_id: &str,
        to_address: &str,
        body_html: &str,
    ) -> Result<ReplyStrategy, MailSourceError> {
        // Strategy 1: the provider's direct reply endpoint
        let direct = self
            .post_json(
                access_token,
                &format!("{}/me/messages/{}/reply", self.base_url, message_id),
                &json!({ "comment": body_html }),
            )
            .await;
        match direct {
            Ok(_) => return Ok(ReplyStrategy::DirectReply),
            Err(e) => warn!("Direct reply failed, composing new message: {}", e),
        }

        match self
            .send_as_new_message(access_token, message_id, to_address, body_html)
            .await
        {
            Ok(_) => return Ok(ReplyStrategy::ComposeNew),
            Err(e) => warn!("Compose-new failed, falling back to draft: {}", e),
        }

        self.send_via_draft(access_token, message_id, body_html)
            .await?;
        Ok(ReplyStrategy::DraftSend)
    }

    async fn mark_read(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<(), MailSourceError> {
        let response = self
            .http
            .patch(format!("{}/me/messages/{}", self.base_url, message_id))
            .bearer_auth(access_token)
            .json(&json!({ "isRead": true }))
            .send()
            .await
            .map_err(|e| MailSourceError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }
        Ok(())
    }

    async fn get_profile(&self, access_token: &str) -> Result<MailProfile, MailSourceError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct GraphProfile {
            #[serde(default)]
            mail: Option<String>,
            #[serde(default)]
            user_principal_name: Option<String>,
            #[serde(default)]
            display_name: Option<String>,
        }

        let url = format!("{}/me", self.base_url);
        let profile: GraphProfile = self.get_json(access_token, &url).await?;
        let address = profile
            .mail
            .or(profile.user_principal_name)
            .ok_or_else(|| MailSourceError::ServerError("profile has no address".into()))?;
        Ok(MailProfile {
            address,
            display_name: profile.display_name,
        })
    }
}
