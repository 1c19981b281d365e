use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Success,
    Failure,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Resolved classification of an inbound email.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Unknown,
    Movement,
    Extract,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Movement => "movement",
            Self::Extract => "extract",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: String,
    pub account_id: String,
    pub external_id: String,
    pub notification_id: Option<String>,
    pub extract_id: Option<String>,
    pub institution_id: Option<String>,
    pub message_type: Option<MessageType>,
    pub from: String,
    pub to: String,
    pub status: MessageStatus,
    pub failure_reason: Option<String>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub date: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        account_id: String,
        external_id: String,
        notification_id: Option<String>,
        from: String,
        to: String,
        date: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            account_id,
            external_id,
            notification_id,
            extract_id: None,
            institution_id: None,
            message_type: None,
            from,
            to,
            status: MessageStatus::Pending,
            failure_reason: None,
            date,
            created_at: now,
            updated_at: now,
        }
    }

    /// A message already resolved, or currently owned by another task, is
    /// returned as-is instead of being processed again.
    pub fn skips_reprocessing(&self) -> bool {
        matches!(self.status, MessageStatus::Success | MessageStatus::Pending)
    }

    pub fn mark_pending(&mut self) {
        self.status = MessageStatus::Pending;
        self.failure_reason = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_success(&mut self) {
        self.status = MessageStatus::Success;
        self.failure_reason = None;
        self.updated_at = Utc::now();
    }

    pub fn mark_failure(&mut self, reason: impl Into<String>) {
        self.status = MessageStatus::Failure;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> Message {
        Message::new(
            "acc-1".into(),
            "ext-1".into(),
            Some("42".into()),
            "bancodavivienda@davivienda.com".into(),
            "me@example.com".into(),
            Utc::now(),
        )
    }

    #[test]
    fn test_new_message_is_pending() {
        let msg = message();
        assert_eq!(msg.status, MessageStatus::Pending);
        assert!(msg.skips_reprocessing());
        assert!(msg.message_type.is_none());
    }

    #[test]
    fn test_failure_can_be_retried() {
        let mut msg = message();
        msg.mark_failure("not found labels");
        assert!(!msg.skips_reprocessing());
        assert_eq!(msg.failure_reason.as_deref(), Some("not found labels"));

        msg.mark_pending();
        assert_eq!(msg.status, MessageStatus::Pending);
        assert!(msg.failure_reason.is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let value = serde_json::to_value(MessageStatus::Failure).unwrap();
        assert_eq!(value, "failure");
        assert_eq!(MessageType::Extract.as_str(), "extract");
    }
}
