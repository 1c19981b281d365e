use super::{MailError, MailMessage, MailService};
use crate::services::classifier::InstitutionProfile;
use async_trait::async_trait;
use service_core::retry::{retry_when, RetryPolicy};

/// Retries message fetches that hit the provider's concurrency limit.
/// Every other call goes straight through.
pub struct RetryingMailService<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> RetryingMailService<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<S: MailService> MailService for RetryingMailService<S> {
    async fn get_message_by_id(&self, id: &str) -> Result<MailMessage, MailError> {
        retry_when(&self.policy, "get_message_by_id", MailError::is_rate_limited, || {
            metrics::counter!("mail_get_message_attempts_total").increment(1);
            self.inner.get_message_by_id(id)
        })
        .await
    }

    async fn get_attachment(
        &self,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Vec<u8>, MailError> {
        self.inner.get_attachment(message_id, attachment_id).await
    }

    async fn list_statement_messages(
        &self,
        institution: &InstitutionProfile,
    ) -> Result<Vec<String>, MailError> {
        self.inner.list_statement_messages(institution).await
    }

    async fn list_history_message_ids(
        &self,
        start_history_id: &str,
    ) -> Result<Vec<String>, MailError> {
        self.inner.list_history_message_ids(start_history_id).await
    }
}
