use super::repositories::{MovementFilter, MovementRepository};
use crate::error::IngestionError;
use crate::models::{Category, Movement};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 20;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CategoryPrediction {
    pub category: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Assigns a spending category from a movement description.
#[async_trait]
pub trait CategoryClassifier: Send + Sync {
    async fn classify(&self, description: &str) -> Result<CategoryPrediction, anyhow::Error>;
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    description: &'a str,
}

/// Calls an external categorisation endpoint with `{"description": ...}`.
#[derive(Clone)]
pub struct HttpCategoryClassifier {
    http: reqwest::Client,
    url: String,
}

impl HttpCategoryClassifier {
    pub fn new(http: reqwest::Client, url: String) -> Self {
        Self { http, url }
    }
}

#[async_trait]
impl CategoryClassifier for HttpCategoryClassifier {
    async fn classify(&self, description: &str) -> Result<CategoryPrediction, anyhow::Error> {
        let response = self
            .http
            .post(&self.url)
            .json(&ClassifyRequest { description })
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<CategoryPrediction>().await?)
    }
}

/// One page of movements.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementPage {
    pub movements: Vec<Movement>,
    pub total_records: i64,
    pub total_pages: i64,
    pub limit: i64,
    pub current_page: i64,
}

/// Validation, categorisation and queries over stored movements.
#[derive(Clone)]
pub struct MovementService {
    repo: Arc<dyn MovementRepository>,
    classifier: Option<Arc<dyn CategoryClassifier>>,
}

impl MovementService {
    pub fn new(
        repo: Arc<dyn MovementRepository>,
        classifier: Option<Arc<dyn CategoryClassifier>>,
    ) -> Self {
        Self { repo, classifier }
    }

    /// Validates and stores a movement, categorising it first when it has no
    /// category. A failing classifier leaves the category as unknown.
    #[tracing::instrument(skip(self, movement), fields(account_id = %movement.account_id, source = movement.source.as_str()))]
    pub async fn create_movement(&self, mut movement: Movement) -> Result<Movement, IngestionError> {
        movement.validate(chrono::Utc::now())?;

        if movement.category == Category::Unknown {
            if let Some(classifier) = &self.classifier {
                match classifier.classify(&movement.description).await {
                    Ok(prediction) => match prediction.category.parse::<Category>() {
                        Ok(category) => {
                            tracing::debug!(
                                category = category.as_str(),
                                confidence = prediction.confidence,
                                "Movement categorised"
                            );
                            movement.category = category;
                        }
                        Err(e) => {
                            tracing::warn!(category = %prediction.category, "Classifier returned unknown category: {}", e);
                        }
                    },
                    Err(e) => {
                        tracing::warn!("Failed to classify movement: {}", e);
                    }
                }
            }
        }

        self.repo.insert(&movement).await?;
        metrics::counter!("movements_created_total", "source" => movement.source.as_str())
            .increment(1);

        Ok(movement)
    }

    pub async fn get_movement(&self, account_id: &str, id: Uuid) -> Result<Movement, IngestionError> {
        self.repo
            .find_by_id(account_id, id)
            .await?
            .ok_or_else(|| IngestionError::MovementNotFound(id.to_string()))
    }

    /// Lists movements newest first. `page` is 1-based; `limit` defaults to
    /// 10 when not positive and is capped at 20.
    pub async fn list_movements(
        &self,
        account_id: &str,
        institution_ids: Option<Vec<String>>,
        page: i64,
        limit: i64,
    ) -> Result<MovementPage, IngestionError> {
        let filter = MovementFilter {
            institution_ids: institution_ids.filter(|ids| !ids.is_empty()),
            ..MovementFilter::default()
        };
        self.page(account_id, &filter, page, limit).await
    }

    pub async fn movements_by_year(
        &self,
        account_id: &str,
        year: i32,
        page: i64,
        limit: i64,
    ) -> Result<MovementPage, IngestionError> {
        let filter = MovementFilter {
            year: Some(year),
            ..MovementFilter::default()
        };
        self.page(account_id, &filter, page, limit).await
    }

    pub async fn movements_by_month(
        &self,
        account_id: &str,
        year: i32,
        month: u32,
        page: i64,
        limit: i64,
    ) -> Result<MovementPage, IngestionError> {
        let filter = MovementFilter {
            year: Some(year),
            month: Some(month),
            ..MovementFilter::default()
        };
        self.page(account_id, &filter, page, limit).await
    }

    pub async fn delete_movement(&self, account_id: &str, id: Uuid) -> Result<(), IngestionError> {
        if self.repo.delete(account_id, id).await? {
            Ok(())
        } else {
            Err(IngestionError::MovementNotFound(id.to_string()))
        }
    }

    pub async fn delete_by_extract_id(&self, extract_id: &str) -> Result<u64, IngestionError> {
        self.repo.delete_by_extract_id(extract_id).await
    }

    async fn page(
        &self,
        account_id: &str,
        filter: &MovementFilter,
        page: i64,
        limit: i64,
    ) -> Result<MovementPage, IngestionError> {
        let limit = page_size(limit);
        let current_page = page.max(1);
        let offset = (current_page - 1) * limit;

        let total_records = self.repo.count_by_account(account_id, filter).await?;
        let movements = self
            .repo
            .list_by_account(account_id, filter, limit, offset)
            .await?;

        Ok(MovementPage {
            movements,
            total_records,
            total_pages: (total_records + limit - 1) / limit,
            limit,
            current_page,
        })
    }
}

fn page_size(limit: i64) -> i64 {
    if limit <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        limit.min(MAX_PAGE_SIZE)
    }
}
