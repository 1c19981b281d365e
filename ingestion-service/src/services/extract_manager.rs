use super::attachments::AttachmentStore;
use super::movements::MovementService;
use super::repositories::ExtractRepository;
use crate::error::IngestionError;
use crate::models::{Extract, ExtractStatus, Message};
use crate::services::mail::MailService;
use std::sync::Arc;

/// Owns the Extract record attached to a statement message.
#[derive(Clone)]
pub struct ExtractManager {
    extracts: Arc<dyn ExtractRepository>,
    movements: MovementService,
    attachments: AttachmentStore,
}

impl ExtractManager {
    pub fn new(
        extracts: Arc<dyn ExtractRepository>,
        movements: MovementService,
        attachments: AttachmentStore,
    ) -> Self {
        Self {
            extracts,
            movements,
            attachments,
        }
    }

    /// Returns the Extract for `message`, downloading its attachment unless
    /// a previous download can be reused.
    ///
    /// A Failed extract has its movements removed before the new attempt.
    /// When the download fails the extract is saved unchanged and the error
    /// is returned.
    #[tracing::instrument(skip(self, mail, message), fields(message_id = %message.id, external_id = %message.external_id))]
    pub async fn get_extract(
        &self,
        mail: &dyn MailService,
        message: &Message,
        institution_id: &str,
    ) -> Result<Extract, IngestionError> {
        let mut extract = match self.extracts.find_by_message_id(&message.id).await? {
            Some(existing) if existing.is_reusable() => {
                tracing::debug!(extract_id = %existing.id, "Reusing downloaded extract");
                return Ok(existing);
            }
            Some(existing) => {
                if !matches!(
                    existing.status,
                    ExtractStatus::Pending | ExtractStatus::Processed
                ) {
                    let removed = self.movements.delete_by_extract_id(&existing.id).await?;
                    tracing::info!(
                        extract_id = %existing.id,
                        removed,
                        "Cleared movements of failed extract"
                    );
                }
                existing
            }
            None => {
                let created = Extract::new(
                    message.account_id.clone(),
                    message.id.clone(),
                    institution_id.to_string(),
                );
                self.extracts.insert(&created).await?;
                tracing::info!(extract_id = %created.id, "Created extract");
                created
            }
        };

        match self
            .attachments
            .download_attachments(mail, &message.account_id, &message.external_id)
            .await
        {
            Ok(file) => {
                extract.record_download(file.month, file.year, file.path);
                self.extracts.update(&extract).await?;
                Ok(extract)
            }
            Err(e) => {
                tracing::warn!(extract_id = %extract.id, "Failed to download statement: {}", e);
                if let Err(update_err) = self.extracts.update(&extract).await {
                    tracing::error!(extract_id = %extract.id, "Failed to save extract: {}", update_err);
                }
                Err(e)
            }
        }
    }

    pub async fn mark_processed(&self, extract: &mut Extract) -> Result<(), IngestionError> {
        extract.mark_processed();
        self.extracts.update(extract).await
    }

    pub async fn mark_failed(&self, extract: &mut Extract) -> Result<(), IngestionError> {
        extract.mark_failed();
        self.extracts.update(extract).await
    }
}
