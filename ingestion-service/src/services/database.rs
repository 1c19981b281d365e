use super::repositories::{ExtractRepository, MessageRepository};
use crate::error::IngestionError;
use crate::models::{Extract, Message};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::{
    bson::doc, options::IndexOptions, Client as MongoClient, Collection, Database, IndexModel,
};
use service_core::error::AppError;

const DUPLICATE_KEY: i32 = 11000;

#[derive(Clone)]
pub struct MongoDb {
    client: MongoClient,
    db: Database,
}

impl MongoDb {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!("Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        tracing::info!("Creating MongoDB indexes for ingestion-service");

        // One message per provider id and account
        let external_id_index = IndexModel::builder()
            .keys(doc! { "account_id": 1, "external_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("account_external_id_unique".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.messages()
            .create_index(external_id_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create external_id index on messages: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created index on messages.(account_id, external_id)");

        let notification_index = IndexModel::builder()
            .keys(doc! { "account_id": 1, "notification_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("account_notification_lookup".to_string())
                    .build(),
            )
            .build();

        self.messages()
            .create_index(notification_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create notification index on messages: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created index on messages.(account_id, notification_id)");

        // At most one extract per message
        let message_index = IndexModel::builder()
            .keys(doc! { "message_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("message_id_unique".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.extracts()
            .create_index(message_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create message_id index on extracts: {}", e);
                AppError::from(e)
            })?;
        tracing::info!("Created index on extracts.message_id");

        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }

    pub fn messages(&self) -> Collection<Message> {
        self.db.collection("messages")
    }

    pub fn extracts(&self) -> Collection<Extract> {
        self.db.collection("extracts")
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY
        }
        ErrorKind::Command(command_error) => command_error.code == DUPLICATE_KEY,
        _ => false,
    }
}

#[async_trait]
impl MessageRepository for MongoDb {
    async fn insert(&self, message: &Message) -> Result<(), IngestionError> {
        match self.messages().insert_one(message, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                Err(IngestionError::Duplicate(message.external_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_external_id(
        &self,
        account_id: &str,
        external_id: &str,
    ) -> Result<Option<Message>, IngestionError> {
        Ok(self
            .messages()
            .find_one(
                doc! { "account_id": account_id, "external_id": external_id },
                None,
            )
            .await?)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Message>, IngestionError> {
        Ok(self.messages().find_one(doc! { "_id": id }, None).await?)
    }

    async fn list_by_notification(
        &self,
        account_id: &str,
        notification_id: &str,
    ) -> Result<Vec<Message>, IngestionError> {
        let cursor = self
            .messages()
            .find(
                doc! { "account_id": account_id, "notification_id": notification_id },
                None,
            )
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update(&self, message: &Message) -> Result<(), IngestionError> {
        let result = self
            .messages()
            .replace_one(doc! { "_id": &message.id }, message, None)
            .await?;
        if result.matched_count == 0 {
            return Err(IngestionError::MessageNotFound(message.id.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl ExtractRepository for MongoDb {
    async fn insert(&self, extract: &Extract) -> Result<(), IngestionError> {
        match self.extracts().insert_one(extract, None).await {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                Err(IngestionError::Duplicate(extract.message_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_message_id(
        &self,
        message_id: &str,
    ) -> Result<Option<Extract>, IngestionError> {
        Ok(self
            .extracts()
            .find_one(doc! { "message_id": message_id }, None)
            .await?)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Extract>, IngestionError> {
        Ok(self.extracts().find_one(doc! { "_id": id }, None).await?)
    }

    async fn update(&self, extract: &Extract) -> Result<(), IngestionError> {
        let result = self
            .extracts()
            .replace_one(doc! { "_id": &extract.id }, extract, None)
            .await?;
        if result.matched_count == 0 {
            return Err(IngestionError::ExtractNotFound(extract.id.clone()));
        }
        Ok(())
    }
}
