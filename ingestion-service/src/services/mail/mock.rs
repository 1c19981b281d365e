//! In-process mail provider for tests and local runs.

use super::{MailError, MailMessage, MailService, MailServiceFactory};
use crate::models::Account;
use crate::services::classifier::InstitutionProfile;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Mail provider backed by in-memory messages, with scripted failures.
#[derive(Default)]
pub struct MockMailService {
    messages: Mutex<HashMap<String, MailMessage>>,
    attachments: Mutex<HashMap<(String, String), Vec<u8>>>,
    failures: Mutex<HashMap<String, VecDeque<MailError>>>,
    history: Mutex<Vec<String>>,
    get_message_calls: AtomicU64,
    attachment_calls: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockMailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&self, message: MailMessage) {
        lock(&self.messages).insert(message.id.clone(), message);
    }

    pub fn remove_message(&self, id: &str) {
        lock(&self.messages).remove(id);
    }

    pub fn add_attachment(&self, message_id: &str, attachment_id: &str, data: Vec<u8>) {
        lock(&self.attachments).insert((message_id.to_string(), attachment_id.to_string()), data);
    }

    /// The next `get_message_by_id(id)` calls fail with these errors, in order.
    pub fn fail_next(&self, id: &str, errors: impl IntoIterator<Item = MailError>) {
        lock(&self.failures)
            .entry(id.to_string())
            .or_default()
            .extend(errors);
    }

    pub fn set_history(&self, ids: Vec<String>) {
        *lock(&self.history) = ids;
    }

    pub fn get_message_calls(&self) -> u64 {
        self.get_message_calls.load(Ordering::SeqCst)
    }

    pub fn attachment_calls(&self) -> u64 {
        self.attachment_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailService for MockMailService {
    async fn get_message_by_id(&self, id: &str) -> Result<MailMessage, MailError> {
        self.get_message_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(err) = lock(&self.failures).get_mut(id).and_then(VecDeque::pop_front) {
            return Err(err);
        }

        lock(&self.messages)
            .get(id)
            .cloned()
            .ok_or_else(|| MailError::NotFound(id.to_string()))
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, MailError> {
        self.attachment_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.attachments)
            .get(&(message_id.to_string(), attachment_id.to_string()))
            .cloned()
            .ok_or_else(|| MailError::NotFound(attachment_id.to_string()))
    }

    async fn list_statement_messages(
        &self,
        institution: &InstitutionProfile,
    ) -> Result<Vec<String>, MailError> {
        let mut ids: Vec<String> = lock(&self.messages)
            .values()
            .filter(|m| {
                institution.matches_sender(m.header("From").unwrap_or_default())
                    && institution.is_statement_subject(m.subject())
            })
            .map(|m| m.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_history_message_ids(
        &self,
        _start_history_id: &str,
    ) -> Result<Vec<String>, MailError> {
        Ok(lock(&self.history).clone())
    }
}

/// Hands out the same mail service for every account.
pub struct StaticMailServiceFactory {
    service: Arc<dyn MailService>,
    builds: AtomicU64,
}

impl StaticMailServiceFactory {
    pub fn new(service: Arc<dyn MailService>) -> Self {
        Self {
            service,
            builds: AtomicU64::new(0),
        }
    }

    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MailServiceFactory for StaticMailServiceFactory {
    async fn for_account(&self, _account: &Account) -> Result<Arc<dyn MailService>, MailError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(self.service.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failures_run_before_message() {
        let mail = MockMailService::new();
        mail.add_message(MailMessage {
            id: "m1".into(),
            ..Default::default()
        });
        mail.fail_next("m1", [MailError::RateLimited("busy".into())]);

        assert!(mail.get_message_by_id("m1").await.unwrap_err().is_rate_limited());
        assert_eq!(mail.get_message_by_id("m1").await.unwrap().id, "m1");
        assert!(mail.get_message_by_id("m2").await.unwrap_err().is_not_found());
        assert_eq!(mail.get_message_calls(), 3);
    }
}
