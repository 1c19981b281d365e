//! Mail provider access.
//!
//! The message shapes mirror the Gmail REST API (`users.messages.get` with
//! `format=full`), which is the only provider wired up today.

mod gmail;
mod mock;
mod retrying;

pub use gmail::{GmailClient, GoogleMailServiceFactory};
pub use mock::{MockMailService, StaticMailServiceFactory};
pub use retrying::RetryingMailService;

use crate::models::Account;
use crate::services::classifier::InstitutionProfile;
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Gmail answers a per-user concurrency limit with this message.
pub const CONCURRENT_REQUESTS_ERROR: &str = "Too many concurrent requests for user";

#[derive(Debug, Error)]
pub enum MailError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("mail API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl MailError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, MailError::RateLimited(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MailError::NotFound(_))
    }
}

impl From<reqwest::Error> for MailError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            MailError::Decode(err.to_string())
        } else {
            MailError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePartBody {
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePart {
    #[serde(default)]
    pub part_id: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
    #[serde(default)]
    pub body: Option<MessagePartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl MessagePart {
    fn body_data(&self) -> Option<&str> {
        self.body
            .as_ref()
            .and_then(|b| b.data.as_deref())
            .filter(|d| !d.is_empty())
    }

    /// Filename and attachment id, when this part is a downloadable file.
    pub fn attachment(&self) -> Option<(&str, &str)> {
        let filename = self.filename.as_deref().filter(|f| !f.is_empty())?;
        let attachment_id = self
            .body
            .as_ref()?
            .attachment_id
            .as_deref()
            .filter(|a| !a.is_empty())?;
        Some((filename, attachment_id))
    }

    fn first_attachment(&self) -> Option<&MessagePart> {
        if self.attachment().is_some() {
            return Some(self);
        }
        self.parts.iter().find_map(MessagePart::first_attachment)
    }
}

/// A raw provider message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub history_id: Option<String>,
    /// Milliseconds since the epoch, as a decimal string.
    #[serde(default)]
    pub internal_date: Option<String>,
    #[serde(default)]
    pub payload: Option<MessagePart>,
}

impl MailMessage {
    /// Case-insensitive header lookup on the top-level payload.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload.as_ref().and_then(|p| {
            p.headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.as_str())
        })
    }

    pub fn subject(&self) -> &str {
        self.header("Subject").unwrap_or_default()
    }

    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        let millis = self.internal_date.as_deref()?.trim().parse::<i64>().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }

    /// Decoded text body: the first part's data, else the payload's own.
    pub fn body_text(&self) -> Result<Option<String>, MailError> {
        let Some(payload) = self.payload.as_ref() else {
            return Ok(None);
        };
        let data = payload
            .parts
            .first()
            .and_then(MessagePart::body_data)
            .or_else(|| payload.body_data());

        match data {
            Some(data) => {
                let bytes = decode_base64url(data)?;
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
            None => Ok(None),
        }
    }

    /// Depth-first search for the first part carrying a named attachment.
    pub fn first_attachment(&self) -> Option<&MessagePart> {
        self.payload.as_ref().and_then(MessagePart::first_attachment)
    }
}

/// Decodes Gmail's base64url payloads, with or without padding.
pub fn decode_base64url(data: &str) -> Result<Vec<u8>, MailError> {
    let trimmed: String = data
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .trim_end_matches('=')
        .to_string();

    URL_SAFE_NO_PAD
        .decode(&trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(&trimmed))
        .map_err(|e| MailError::Decode(e.to_string()))
}

#[async_trait]
pub trait MailService: Send + Sync {
    async fn get_message_by_id(&self, id: &str) -> Result<MailMessage, MailError>;

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, MailError>;

    /// Ids of every statement message sent by `institution`.
    async fn list_statement_messages(
        &self,
        institution: &InstitutionProfile,
    ) -> Result<Vec<String>, MailError>;

    /// Ids of messages added after `start_history_id`, without duplicates.
    async fn list_history_message_ids(
        &self,
        start_history_id: &str,
    ) -> Result<Vec<String>, MailError>;
}

#[async_trait]
impl<T: MailService + ?Sized> MailService for Arc<T> {
    async fn get_message_by_id(&self, id: &str) -> Result<MailMessage, MailError> {
        (**self).get_message_by_id(id).await
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, MailError> {
        (**self).get_attachment(message_id, attachment_id).await
    }

    async fn list_statement_messages(
        &self,
        institution: &InstitutionProfile,
    ) -> Result<Vec<String>, MailError> {
        (**self).list_statement_messages(institution).await
    }

    async fn list_history_message_ids(
        &self,
        start_history_id: &str,
    ) -> Result<Vec<String>, MailError> {
        (**self).list_history_message_ids(start_history_id).await
    }
}

/// Builds an authenticated mail client for one account.
#[async_trait]
pub trait MailServiceFactory: Send + Sync {
    async fn for_account(&self, account: &Account) -> Result<Arc<dyn MailService>, MailError>;
}
