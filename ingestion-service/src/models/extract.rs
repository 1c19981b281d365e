use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExtractStatus {
    Pending,
    Processed,
    Failed,
}

impl ExtractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }
}

/// A downloaded statement attachment and the period it covers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Extract {
    #[serde(rename = "_id")]
    pub id: String,
    pub account_id: String,
    /// Internal id of the owning [`Message`](super::Message).
    pub message_id: String,
    pub institution_id: String,
    pub month: i32,
    pub year: i32,
    pub path: String,
    pub status: ExtractStatus,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Extract {
    pub fn new(account_id: String, message_id: String, institution_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            account_id,
            message_id,
            institution_id,
            month: 0,
            year: 0,
            path: String::new(),
            status: ExtractStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the stored file can be parsed again without a new download.
    pub fn is_reusable(&self) -> bool {
        matches!(self.status, ExtractStatus::Pending | ExtractStatus::Processed)
            && !self.path.is_empty()
    }

    pub fn record_download(&mut self, month: u32, year: i32, path: String) {
        self.month = month as i32;
        self.year = year;
        self.path = path;
        self.status = ExtractStatus::Pending;
        self.updated_at = Utc::now();
    }

    pub fn mark_processed(&mut self) {
        self.status = ExtractStatus::Processed;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self) {
        self.status = ExtractStatus::Failed;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reuse_requires_downloaded_file() {
        let mut extract = Extract::new("acc".into(), "msg".into(), "davivienda".into());
        assert!(!extract.is_reusable());

        extract.record_download(3, 2021, "acc/extracts/2021/statement.pdf".into());
        assert!(extract.is_reusable());
        assert_eq!(extract.month, 3);

        extract.mark_processed();
        assert!(extract.is_reusable());

        extract.mark_failed();
        assert!(!extract.is_reusable());
    }
}
