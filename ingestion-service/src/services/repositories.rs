//! Persistence contracts.
//!
//! Messages and extracts live in MongoDB, movements in PostgreSQL; tests run
//! against [`InMemoryStore`](super::InMemoryStore).

use crate::error::IngestionError;
use crate::models::{Extract, Message, Movement};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Fails with [`IngestionError::Duplicate`] when (account, external id)
    /// already exists.
    async fn insert(&self, message: &Message) -> Result<(), IngestionError>;

    async fn find_by_external_id(
        &self,
        account_id: &str,
        external_id: &str,
    ) -> Result<Option<Message>, IngestionError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Message>, IngestionError>;

    async fn list_by_notification(
        &self,
        account_id: &str,
        notification_id: &str,
    ) -> Result<Vec<Message>, IngestionError>;

    async fn update(&self, message: &Message) -> Result<(), IngestionError>;
}

#[async_trait]
pub trait ExtractRepository: Send + Sync {
    async fn insert(&self, extract: &Extract) -> Result<(), IngestionError>;

    async fn find_by_message_id(&self, message_id: &str)
        -> Result<Option<Extract>, IngestionError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Extract>, IngestionError>;

    async fn update(&self, extract: &Extract) -> Result<(), IngestionError>;
}

/// Narrows movement listings. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MovementFilter {
    pub institution_ids: Option<Vec<String>>,
    pub year: Option<i32>,
    pub month: Option<u32>,
}

impl MovementFilter {
    pub fn matches(&self, movement: &Movement) -> bool {
        use chrono::Datelike;

        let institution_ok = self
            .institution_ids
            .as_ref()
            .map_or(true, |ids| ids.iter().any(|id| *id == movement.institution_id));
        let year_ok = self.year.map_or(true, |y| movement.date.year() == y);
        let month_ok = self.month.map_or(true, |m| movement.date.month() == m);
        institution_ok && year_ok && month_ok
    }
}

#[async_trait]
pub trait MovementRepository: Send + Sync {
    async fn insert(&self, movement: &Movement) -> Result<(), IngestionError>;

    async fn find_by_id(
        &self,
        account_id: &str,
        id: Uuid,
    ) -> Result<Option<Movement>, IngestionError>;

    /// Newest first.
    async fn list_by_account(
        &self,
        account_id: &str,
        filter: &MovementFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Movement>, IngestionError>;

    async fn count_by_account(
        &self,
        account_id: &str,
        filter: &MovementFilter,
    ) -> Result<i64, IngestionError>;

    /// Returns whether a row was removed.
    async fn delete(&self, account_id: &str, id: Uuid) -> Result<bool, IngestionError>;

    /// Returns the number of rows removed.
    async fn delete_by_extract_id(&self, extract_id: &str) -> Result<u64, IngestionError>;
}
