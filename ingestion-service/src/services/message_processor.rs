use super::classifier::MessageClassifier;
use super::extract_manager::ExtractManager;
use super::movements::MovementService;
use super::repositories::MessageRepository;
use crate::error::IngestionError;
use crate::extractors::{ExtractionContext, ExtractorProvider, ExtractorRegistry};
use crate::models::{Account, Message, MessageType, Movement};
use crate::services::mail::{MailMessage, MailService, MailServiceFactory};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

/// Turns one inbound email into a resolved [`Message`] and its movements.
#[derive(Clone)]
pub struct MessageProcessor {
    messages: Arc<dyn MessageRepository>,
    mail_factory: Arc<dyn MailServiceFactory>,
    classifier: Arc<MessageClassifier>,
    extractors: Arc<ExtractorRegistry>,
    extract_manager: ExtractManager,
    movements: MovementService,
}

impl MessageProcessor {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        mail_factory: Arc<dyn MailServiceFactory>,
        classifier: Arc<MessageClassifier>,
        extractors: Arc<ExtractorRegistry>,
        extract_manager: ExtractManager,
        movements: MovementService,
    ) -> Self {
        Self {
            messages,
            mail_factory,
            classifier,
            extractors,
            extract_manager,
            movements,
        }
    }

    /// Processes the email `external_id` of `account`.
    ///
    /// Messages already in `Success` or `Pending` are returned without
    /// touching the mail provider. A `Failure` is retried in place. Once a
    /// record exists its final status is saved before any error is
    /// returned.
    #[tracing::instrument(skip(self, account), fields(account_id = %account.id))]
    pub async fn process(
        &self,
        notification_id: Option<&str>,
        external_id: &str,
        account: &Account,
    ) -> Result<Message, IngestionError> {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(IngestionError::MissingExternalId);
        }

        let existing = self
            .messages
            .find_by_external_id(&account.id, external_id)
            .await?;
        if let Some(message) = existing.as_ref().filter(|m| m.skips_reprocessing()) {
            tracing::debug!(
                message_id = %message.id,
                status = message.status.as_str(),
                "Message already handled"
            );
            return Ok(message.clone());
        }

        let mail = self.mail_factory.for_account(account).await?;
        let started = Instant::now();

        let (mut message, raw) = match existing {
            Some(mut message) => {
                tracing::info!(message_id = %message.id, "Retrying failed message");
                message.mark_pending();
                self.messages.update(&message).await?;

                match mail.get_message_by_id(external_id).await {
                    Ok(raw) => (message, raw),
                    Err(e) if e.is_not_found() => {
                        tracing::info!(message_id = %message.id, "Message no longer exists upstream");
                        return self.finish(message, Ok(()), started).await;
                    }
                    Err(e) => return self.finish(message, Err(e.into()), started).await,
                }
            }
            None => {
                let raw = mail.get_message_by_id(external_id).await?;
                let message = Message::new(
                    account.id.clone(),
                    external_id.to_string(),
                    notification_id.map(str::to_string),
                    raw.header("From").unwrap_or_default().to_string(),
                    raw.header("To").unwrap_or_default().to_string(),
                    header_date(&raw),
                );

                match self.messages.insert(&message).await {
                    Ok(()) => {}
                    Err(IngestionError::Duplicate(_)) => {
                        tracing::info!("Message stored concurrently, returning stored record");
                        return self
                            .messages
                            .find_by_external_id(&account.id, external_id)
                            .await?
                            .ok_or_else(|| IngestionError::MessageNotFound(external_id.to_string()));
                    }
                    Err(e) => return Err(e),
                }
                tracing::info!(message_id = %message.id, "Created message");
                (message, raw)
            }
        };

        let outcome = self.resolve(mail.as_ref(), &mut message, &raw).await;
        self.finish(message, outcome, started).await
    }

    async fn resolve(
        &self,
        mail: &dyn MailService,
        message: &mut Message,
        raw: &MailMessage,
    ) -> Result<(), IngestionError> {
        let message_type = match message.message_type {
            Some(message_type) => message_type,
            None => {
                let classification = self.classifier.classify(&message.from, raw.subject());
                message.message_type = Some(classification.message_type);
                message.institution_id = classification.institution_id;
                self.messages.update(message).await?;
                classification.message_type
            }
        };

        tracing::info!(
            message_id = %message.id,
            message_type = message_type.as_str(),
            institution_id = message.institution_id.as_deref().unwrap_or("-"),
            "Message classified"
        );

        match message_type {
            MessageType::Unknown => Ok(()),
            MessageType::Movement => {
                let provider = self.provider_for(message)?;
                let context = ExtractionContext {
                    account_id: message.account_id.clone(),
                    institution_id: provider.institution_id().to_string(),
                    message_id: message.id.clone(),
                    body: raw.body_text()?,
                };
                let movements = provider.extractor(context).extract().await?;
                self.persist(movements).await
            }
            MessageType::Extract => self.resolve_statement(mail, message).await,
        }
    }

    async fn resolve_statement(
        &self,
        mail: &dyn MailService,
        message: &mut Message,
    ) -> Result<(), IngestionError> {
        let provider = self.provider_for(message)?;
        let mut extract = self
            .extract_manager
            .get_extract(mail, message, provider.institution_id())
            .await?;

        if message.extract_id.as_deref() != Some(extract.id.as_str()) {
            message.extract_id = Some(extract.id.clone());
            self.messages.update(message).await?;
        }

        let mut extractor = provider.extractor(ExtractionContext {
            account_id: message.account_id.clone(),
            institution_id: provider.institution_id().to_string(),
            message_id: message.id.clone(),
            body: None,
        });
        extractor.set_extract(extract.clone());

        let stored = match extractor.extract().await {
            Ok(movements) => {
                tracing::info!(extract_id = %extract.id, rows = movements.len(), "Parsed statement");
                match self.movements.delete_by_extract_id(&extract.id).await {
                    Ok(_) => self.persist(movements).await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e.into()),
        };

        match stored {
            Ok(()) => self.extract_manager.mark_processed(&mut extract).await,
            Err(e) => {
                if let Err(update_err) = self.extract_manager.mark_failed(&mut extract).await {
                    tracing::error!(extract_id = %extract.id, "Failed to mark extract failed: {}", update_err);
                }
                Err(e)
            }
        }
    }

    fn provider_for(&self, message: &Message) -> Result<&dyn ExtractorProvider, IngestionError> {
        let institution_id = message.institution_id.as_deref().unwrap_or_default();
        self.extractors
            .find_provider(institution_id)
            .ok_or_else(|| IngestionError::UnsupportedInstitution(institution_id.to_string()))
    }

    /// Stores derived movements. Non-positive amounts are skipped; any other
    /// failure stops the run.
    async fn persist(&self, movements: Vec<Movement>) -> Result<(), IngestionError> {
        for movement in movements {
            match self.movements.create_movement(movement).await {
                Ok(created) => {
                    tracing::debug!(movement_id = %created.id, "Stored movement");
                }
                Err(e) if e.is_non_positive_amount() => {
                    tracing::warn!("Skipping movement: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn finish(
        &self,
        mut message: Message,
        outcome: Result<(), IngestionError>,
        started: Instant,
    ) -> Result<Message, IngestionError> {
        match &outcome {
            Ok(()) => message.mark_success(),
            Err(e) => message.mark_failure(e.to_string()),
        }

        metrics::counter!("messages_processed_total", "status" => message.status.as_str())
            .increment(1);
        metrics::histogram!("message_processing_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        let saved = self.messages.update(&message).await;

        match outcome {
            Ok(()) => {
                saved?;
                tracing::info!(message_id = %message.id, "Message processed");
                Ok(message)
            }
            Err(e) => {
                if let Err(update_err) = saved {
                    tracing::error!(message_id = %message.id, "Failed to save message failure: {}", update_err);
                }
                tracing::warn!(
                    message_id = %message.id,
                    external_id = %message.external_id,
                    "Message processing failed: {}",
                    e
                );
                Err(e)
            }
        }
    }
}

/// `Date` header as UTC, or now when missing or unparsable.
fn header_date(raw: &MailMessage) -> DateTime<Utc> {
    raw.header("Date")
        .and_then(|value| mailparse::dateparse(value).ok())
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .unwrap_or_else(Utc::now)
}
