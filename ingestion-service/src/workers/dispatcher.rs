use crate::config::DispatcherConfig;
use crate::error::IngestionError;
use crate::models::{Account, Message};
use crate::services::classifier::MessageClassifier;
use crate::services::mail::MailServiceFactory;
use crate::services::MessageProcessor;
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct BatchFailure {
    pub external_id: String,
    pub error: IngestionError,
}

/// Outcome of one notification batch. Every dispatched id lands in exactly
/// one of the two lists.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub notification_id: Option<String>,
    pub processed: Vec<Message>,
    pub failures: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.processed.len() + self.failures.len()
    }
}

/// Fans a batch of message ids out to the [`MessageProcessor`] with bounded
/// concurrency.
pub struct NotificationDispatcher {
    processor: MessageProcessor,
    mail_factory: Arc<dyn MailServiceFactory>,
    classifier: Arc<MessageClassifier>,
    semaphore: Arc<Semaphore>,
    task_timeout: Option<Duration>,
    shutdown_token: CancellationToken,
}

impl NotificationDispatcher {
    pub fn new(
        processor: MessageProcessor,
        mail_factory: Arc<dyn MailServiceFactory>,
        classifier: Arc<MessageClassifier>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            processor,
            mail_factory,
            classifier,
            semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            task_timeout: config.task_timeout(),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Processes every id concurrently and waits for all of them. One
    /// failing id never aborts the others.
    #[tracing::instrument(skip(self, account, external_ids), fields(account_id = %account.id, batch_size = external_ids.len()))]
    pub async fn dispatch(
        &self,
        account: &Account,
        notification_id: Option<&str>,
        external_ids: Vec<String>,
    ) -> BatchReport {
        let started = Instant::now();
        let ids = dedup(external_ids);
        let mut report = BatchReport {
            notification_id: notification_id.map(str::to_string),
            ..BatchReport::default()
        };
        if ids.is_empty() {
            return report;
        }

        let (result_tx, mut result_rx) = mpsc::channel(ids.len());
        let account = Arc::new(account.clone());
        let mut handles = Vec::with_capacity(ids.len());

        for external_id in ids {
            let task = Task {
                processor: self.processor.clone(),
                semaphore: self.semaphore.clone(),
                token: self.shutdown_token.child_token(),
                timeout: self.task_timeout,
                account: account.clone(),
                notification_id: report.notification_id.clone(),
            };
            let result_tx = result_tx.clone();
            let task_id = external_id.clone();

            let handle = tokio::spawn(async move {
                let result = task.run(&task_id).await;
                if result_tx.send((task_id, result)).await.is_err() {
                    tracing::warn!("Batch result receiver dropped");
                }
            });
            handles.push((external_id, handle));
        }
        drop(result_tx);

        while let Some((external_id, result)) = result_rx.recv().await {
            match result {
                Ok(message) => report.processed.push(message),
                Err(error) => {
                    tracing::warn!(external_id = %external_id, "Batch item failed: {}", error);
                    report.failures.push(BatchFailure { external_id, error });
                }
            }
        }

        // A task that panicked never reported on the channel.
        for (external_id, handle) in handles {
            if let Err(join_err) = handle.await {
                tracing::error!(external_id = %external_id, "Batch task aborted: {}", join_err);
                report.failures.push(BatchFailure {
                    external_id,
                    error: IngestionError::TaskAborted(join_err.to_string()),
                });
            }
        }

        metrics::histogram!("notification_batch_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            processed = report.processed.len(),
            failed = report.failures.len(),
            duration_ms = started.elapsed().as_millis(),
            "Notification batch finished"
        );

        report
    }

    /// Dispatches the messages added to the mailbox since `history_id`.
    pub async fn process_notification(
        &self,
        account: &Account,
        history_id: &str,
    ) -> Result<BatchReport, IngestionError> {
        let history_id = history_id.trim();
        if history_id.is_empty() {
            return Err(IngestionError::InvalidNotification(
                "missing history id".to_string(),
            ));
        }

        let mail = self.mail_factory.for_account(account).await?;
        let ids = mail.list_history_message_ids(history_id).await?;
        tracing::info!(history_id = %history_id, messages = ids.len(), "Listed notification messages");

        Ok(self.dispatch(account, Some(history_id), ids).await)
    }

    /// Backfills every statement email of `institution_id`.
    pub async fn sync_statements(
        &self,
        account: &Account,
        institution_id: &str,
    ) -> Result<BatchReport, IngestionError> {
        let profile = self
            .classifier
            .profile(institution_id)
            .ok_or_else(|| IngestionError::UnsupportedInstitution(institution_id.to_string()))?;

        let mail = self.mail_factory.for_account(account).await?;
        let ids = mail.list_statement_messages(profile).await?;
        tracing::info!(institution_id = %institution_id, messages = ids.len(), "Listed statement messages");

        Ok(self.dispatch(account, None, ids).await)
    }

    /// Cancels in-flight and queued tasks.
    pub fn shutdown(&self) {
        tracing::info!("Initiating dispatcher shutdown");
        self.shutdown_token.cancel();
    }
}

struct Task {
    processor: MessageProcessor,
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
    timeout: Option<Duration>,
    account: Arc<Account>,
    notification_id: Option<String>,
}

impl Task {
    async fn run(self, external_id: &str) -> Result<Message, IngestionError> {
        let _permit = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(IngestionError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| IngestionError::Cancelled)?
            }
        };

        let work = async {
            let processing =
                self.processor
                    .process(self.notification_id.as_deref(), external_id, &self.account);
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, processing)
                    .await
                    .map_err(|_| IngestionError::Timeout(limit))?,
                None => processing.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(IngestionError::Cancelled),
            result = work => result,
        }
    }
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

/// Mailbox change notification pushed by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotification {
    pub email_address: String,
    #[serde(deserialize_with = "history_id_from_any")]
    pub history_id: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HistoryId {
    Number(u64),
    Text(String),
}

fn history_id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match HistoryId::deserialize(deserializer)? {
        HistoryId::Number(n) => n.to_string(),
        HistoryId::Text(s) => s,
    })
}

#[derive(Deserialize)]
struct PushEnvelope {
    message: PushEnvelopeMessage,
}

#[derive(Deserialize)]
struct PushEnvelopeMessage {
    data: String,
}

impl PushNotification {
    /// Accepts the notification JSON itself, its base64 encoding, or a
    /// push envelope `{"message": {"data": "<base64>"}}`.
    pub fn from_payload(payload: &[u8]) -> Result<Self, IngestionError> {
        if let Ok(notification) = serde_json::from_slice::<PushNotification>(payload) {
            return notification.validated();
        }
        if let Ok(envelope) = serde_json::from_slice::<PushEnvelope>(payload) {
            return Self::from_base64(envelope.message.data.as_bytes());
        }
        Self::from_base64(payload)
    }

    fn from_base64(data: &[u8]) -> Result<Self, IngestionError> {
        let text = std::str::from_utf8(data)
            .map_err(|e| IngestionError::InvalidNotification(e.to_string()))?
            .trim();
        let decoded = general_purpose::STANDARD
            .decode(text)
            .or_else(|_| general_purpose::URL_SAFE.decode(text))
            .map_err(|e| IngestionError::InvalidNotification(e.to_string()))?;
        serde_json::from_slice::<PushNotification>(&decoded)
            .map_err(|e| IngestionError::InvalidNotification(e.to_string()))?
            .validated()
    }

    fn validated(self) -> Result<Self, IngestionError> {
        if self.history_id.trim().is_empty() {
            return Err(IngestionError::InvalidNotification(
                "missing history id".to_string(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let ids = vec!["b".into(), "a".into(), " b ".into(), "c".into(), "a".into()];
        assert_eq!(dedup(ids), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_push_notification_raw_json() {
        let payload = br#"{"emailAddress":"me@example.com","historyId":9876}"#;
        let notification = PushNotification::from_payload(payload).unwrap();
        assert_eq!(notification.email_address, "me@example.com");
        assert_eq!(notification.history_id, "9876");
    }

    #[test]
    fn test_push_notification_base64_and_envelope() {
        let json = r#"{"emailAddress":"me@example.com","historyId":"1234"}"#;
        let encoded = general_purpose::STANDARD.encode(json);

        let notification = PushNotification::from_payload(encoded.as_bytes()).unwrap();
        assert_eq!(notification.history_id, "1234");

        let envelope = format!(r#"{{"message":{{"data":"{}"}},"subscription":"s"}}"#, encoded);
        let notification = PushNotification::from_payload(envelope.as_bytes()).unwrap();
        assert_eq!(notification.email_address, "me@example.com");
    }

    #[test]
    fn test_push_notification_rejects_garbage() {
        assert!(matches!(
            PushNotification::from_payload(b"not a notification"),
            Err(IngestionError::InvalidNotification(_))
        ));
        assert!(PushNotification::from_payload(br#"{"emailAddress":"a","historyId":""}"#).is_err());
    }
}
