//! Mailbox and credential persistence

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

use super::{from_db_timestamp, to_db_timestamp, CredentialStore, Database, MailboxStore, StoreError};
use crate::types::{Credential, Mailbox};

fn mailbox_from_row(row: &Row<'_>) -> rusqlite::Result<Mailbox> {
    let folder_filters: String = row.get("folder_filters")?;
    let sender_filters: String = row.get("sender_filters")?;
    let last_sync_at: Option<String> = row.get("last_sync_at")?;

    Ok(Mailbox {
        id: row.get("id")?,
        address: row.get("address")?,
        display_name: row.get("display_name")?,
        sync_enabled: row.get::<_, i64>("sync_enabled")? != 0,
        sync_interval_minutes: row.get::<_, i64>("sync_interval_minutes")? as u32,
        folder_filters: serde_json::from_str(&folder_filters).unwrap_or_default(),
        sender_filters: serde_json::from_str(&sender_filters).unwrap_or_default(),
        last_sync_at: last_sync_at.as_deref().and_then(from_db_timestamp),
        last_sync_error: row.get("last_sync_error")?,
    })
}

impl MailboxStore for Database {
    fn get(&self, id: &str) -> Result<Option<Mailbox>, StoreError> {
        let conn = self.conn()?;
        let mailbox = conn
            .query_row(
                "SELECT * FROM mailboxes WHERE id = ?1",
                params![id],
                mailbox_from_row,
            )
            .optional()?;
        Ok(mailbox)
    }

    fn list_enabled(&self) -> Result<Vec<Mailbox>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT * FROM mailboxes WHERE sync_enabled = 1 ORDER BY created_at")?;
        let mailboxes = stmt
            .query_map([], mailbox_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(mailboxes)
    }

    fn create(&self, mailbox: &Mailbox) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let now = to_db_timestamp(&Utc::now());
        conn.execute(
            "INSERT INTO mailboxes
                (id, address, display_name, sync_enabled, sync_interval_minutes,
                 folder_filters, sender_filters, last_sync_at, last_sync_error,
                 created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                mailbox.id,
                mailbox.address,
                mailbox.display_name,
                mailbox.sync_enabled as i64,
                mailbox.sync_interval_minutes as i64,
                serde_json::to_string(&mailbox.folder_filters).unwrap_or_else(|_| "[]".into()),
                serde_json::to_string(&mailbox.sender_filters).unwrap_or_else(|_| "[]".into()),
                mailbox.last_sync_at.as_ref().map(to_db_timestamp),
                mailbox.last_sync_error,
                now,
            ],
        )?;
        Ok(())
    }

    fn set_watermark(&self, id: &str, watermark: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let ts = to_db_timestamp(&watermark);
        // Fixed-width RFC 3339 sorts lexicographically, so the comparison
        // keeps the watermark monotonically non-decreasing.
        let changed = conn.execute(
            "UPDATE mailboxes
             SET last_sync_at = ?1, updated_at = ?2
             WHERE id = ?3 AND (last_sync_at IS NULL OR last_sync_at < ?1)",
            params![ts, to_db_timestamp(&Utc::now()), id],
        )?;
        if changed == 0 {
            debug!("Watermark for mailbox {} not advanced (older or equal)", id);
        }
        Ok(())
    }

    fn set_sync_error(&self, id: &str, error: Option<&str>) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE mailboxes SET last_sync_error = ?1, updated_at = ?2 WHERE id = ?3",
            params![error, to_db_timestamp(&Utc::now()), id],
        )?;
        Ok(())
    }
}

impl CredentialStore for Database {
    fn get(&self, mailbox_id: &str) -> Result<Option<Credential>, StoreError> {
        let conn = self.conn()?;
        let credential = conn
            .query_row(
                "SELECT access_token, refresh_token, expires_at
                 FROM credentials WHERE mailbox_id = ?1",
                params![mailbox_id],
                |row| {
                    let expires_at: Option<String> = row.get(2)?;
                    Ok(Credential {
                        access_token: row.get(0)?,
                        refresh_token: row.get(1)?,
                        expires_at: expires_at.as_deref().and_then(from_db_timestamp),
                    })
                },
            )
            .optional()?;
        Ok(credential)
    }

    fn replace_atomic(&self, mailbox_id: &str, credential: &Credential) -> Result<(), StoreError> {
        let conn = self.conn()?;
        // Single upsert: all three fields change together or not at all.
        conn.execute(
            "INSERT INTO credentials (mailbox_id, access_token, refresh_token, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(mailbox_id) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![
                mailbox_id,
                credential.access_token,
                credential.refresh_token,
                credential.expires_at.as_ref().map(to_db_timestamp),
                to_db_timestamp(&Utc::now()),
            ],
        )?;
        debug!("Replaced credential for mailbox {}", mailbox_id);
        Ok(())
    }
}
