use crate::error::IngestionError;
use crate::services::mail::{MailService, MessagePart};
use crate::services::storage::Storage;
use chrono::{DateTime, Datelike, Utc};
use std::path::Path;
use std::sync::Arc;

/// A statement attachment persisted to storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementFile {
    pub month: u32,
    pub year: i32,
    pub path: String,
}

/// Statement period of an email received at `received`.
///
/// Statements are sent the month after the period they cover, so one
/// arriving in January belongs to the previous year. The arrival month is
/// kept as-is.
pub fn statement_period(received: DateTime<Utc>) -> (u32, i32) {
    let month = received.month();
    let year = if month == 1 {
        received.year() - 1
    } else {
        received.year()
    };
    (month, year)
}

/// Reduces an untrusted name to a single path component.
pub fn sanitize_component(name: &str) -> String {
    let base = Path::new(name.trim())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() || c == '/' || c == '\\' { '_' } else { c })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "unnamed".to_string(),
        _ => cleaned,
    }
}

#[derive(Clone)]
pub struct AttachmentStore {
    storage: Arc<dyn Storage>,
}

impl AttachmentStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Downloads the first attachment of `message_id` and stores it under
    /// `<account>/extracts/<year>/<filename>`.
    #[tracing::instrument(skip(self, mail))]
    pub async fn download_attachments(
        &self,
        mail: &dyn MailService,
        account_id: &str,
        message_id: &str,
    ) -> Result<StatementFile, IngestionError> {
        let message = mail.get_message_by_id(message_id).await?;

        let (filename, attachment_id) = message
            .first_attachment()
            .and_then(MessagePart::attachment)
            .ok_or_else(|| IngestionError::NoAttachmentFound(message_id.to_string()))?;

        let data = mail.get_attachment(message_id, attachment_id).await?;

        let received = message.received_at().unwrap_or_else(|| {
            tracing::warn!("Message has no internal date, using current time");
            Utc::now()
        });
        let (month, year) = statement_period(received);

        let key = format!(
            "{}/extracts/{}/{}",
            sanitize_component(account_id),
            year,
            sanitize_component(filename)
        );

        let size = data.len();
        let path = self
            .storage
            .upload(&key, data)
            .await
            .map_err(|e| IngestionError::Storage(anyhow::Error::new(e)))?;

        tracing::info!(path = %path, size, month, year, "Stored statement attachment");

        Ok(StatementFile { month, year, path })
    }
}
