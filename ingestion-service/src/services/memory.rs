//! In-memory repositories for tests and local runs.

use super::repositories::{
    ExtractRepository, MessageRepository, MovementFilter, MovementRepository,
};
use crate::error::IngestionError;
use crate::models::{Extract, Message, Movement};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Implements every repository over maps, enforcing the same uniqueness
/// rules as the real stores.
#[derive(Default)]
pub struct InMemoryStore {
    messages: RwLock<HashMap<String, Message>>,
    extracts: RwLock<HashMap<String, Extract>>,
    movements: RwLock<Vec<Movement>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all_messages(&self) -> Vec<Message> {
        self.messages.read().await.values().cloned().collect()
    }

    pub async fn all_movements(&self) -> Vec<Movement> {
        self.movements.read().await.clone()
    }

    pub async fn movements_for_extract(&self, extract_id: &str) -> Vec<Movement> {
        self.movements
            .read()
            .await
            .iter()
            .filter(|m| m.extract_id.as_deref() == Some(extract_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn insert(&self, message: &Message) -> Result<(), IngestionError> {
        let mut messages = self.messages.write().await;
        let duplicate = messages.values().any(|m| {
            m.account_id == message.account_id && m.external_id == message.external_id
        });
        if duplicate || messages.contains_key(&message.id) {
            return Err(IngestionError::Duplicate(message.external_id.clone()));
        }
        messages.insert(message.id.clone(), message.clone());
        Ok(())
    }

    async fn find_by_external_id(
        &self,
        account_id: &str,
        external_id: &str,
    ) -> Result<Option<Message>, IngestionError> {
        Ok(self
            .messages
            .read()
            .await
            .values()
            .find(|m| m.account_id == account_id && m.external_id == external_id)
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Message>, IngestionError> {
        Ok(self.messages.read().await.get(id).cloned())
    }

    async fn list_by_notification(
        &self,
        account_id: &str,
        notification_id: &str,
    ) -> Result<Vec<Message>, IngestionError> {
        Ok(self
            .messages
            .read()
            .await
            .values()
            .filter(|m| {
                m.account_id == account_id && m.notification_id.as_deref() == Some(notification_id)
            })
            .cloned()
            .collect())
    }

    async fn update(&self, message: &Message) -> Result<(), IngestionError> {
        let mut messages = self.messages.write().await;
        match messages.get_mut(&message.id) {
            Some(stored) => {
                *stored = message.clone();
                Ok(())
            }
            None => Err(IngestionError::MessageNotFound(message.id.clone())),
        }
    }
}

#[async_trait]
impl ExtractRepository for InMemoryStore {
    async fn insert(&self, extract: &Extract) -> Result<(), IngestionError> {
        let mut extracts = self.extracts.write().await;
        if extracts.values().any(|e| e.message_id == extract.message_id) {
            return Err(IngestionError::Duplicate(extract.message_id.clone()));
        }
        extracts.insert(extract.id.clone(), extract.clone());
        Ok(())
    }

    async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<Extract>, IngestionError> {
        Ok(self
            .extracts
            .read()
            .await
            .values()
            .find(|e| e.message_id == message_id)
            .cloned())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Extract>, IngestionError> {
        Ok(self.extracts.read().await.get(id).cloned())
    }

    async fn update(&self, extract: &Extract) -> Result<(), IngestionError> {
        let mut extracts = self.extracts.write().await;
        match extracts.get_mut(&extract.id) {
            Some(stored) => {
                *stored = extract.clone();
                Ok(())
            }
            None => Err(IngestionError::ExtractNotFound(extract.id.clone())),
        }
    }
}

#[async_trait]
impl MovementRepository for InMemoryStore {
    async fn insert(&self, movement: &Movement) -> Result<(), IngestionError> {
        let mut movements = self.movements.write().await;
        if movements.iter().any(|m| m.id == movement.id) {
            return Err(IngestionError::Duplicate(movement.id.to_string()));
        }
        movements.push(movement.clone());
        Ok(())
    }

    async fn find_by_id(
        &self,
        account_id: &str,
        id: Uuid,
    ) -> Result<Option<Movement>, IngestionError> {
        Ok(self
            .movements
            .read()
            .await
            .iter()
            .find(|m| m.id == id && m.account_id == account_id)
            .cloned())
    }

    async fn list_by_account(
        &self,
        account_id: &str,
        filter: &MovementFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Movement>, IngestionError> {
        let mut matching: Vec<Movement> = self
            .movements
            .read()
            .await
            .iter()
            .filter(|m| m.account_id == account_id && filter.matches(m))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.date.cmp(&a.date));

        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_by_account(
        &self,
        account_id: &str,
        filter: &MovementFilter,
    ) -> Result<i64, IngestionError> {
        Ok(self
            .movements
            .read()
            .await
            .iter()
            .filter(|m| m.account_id == account_id && filter.matches(m))
            .count() as i64)
    }

    async fn delete(&self, account_id: &str, id: Uuid) -> Result<bool, IngestionError> {
        let mut movements = self.movements.write().await;
        let before = movements.len();
        movements.retain(|m| !(m.id == id && m.account_id == account_id));
        Ok(movements.len() < before)
    }

    async fn delete_by_extract_id(&self, extract_id: &str) -> Result<u64, IngestionError> {
        let mut movements = self.movements.write().await;
        let before = movements.len();
        movements.retain(|m| m.extract_id.as_deref() != Some(extract_id));
        Ok((before - movements.len()) as u64)
    }
}
