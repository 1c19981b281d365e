//! PostgreSQL store for movements.

use super::repositories::{MovementFilter, MovementRepository};
use crate::config::PostgresConfig;
use crate::error::IngestionError;
use crate::models::{Movement, MovementRow};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

const MOVEMENT_COLUMNS: &str = "id, account_id, institution_id, message_id, extract_id, description, amount, type, category, source, date, created_at, updated_at";

// $2 institution ids, $3 year, $4 month; NULL disables the clause
const FILTER_CLAUSE: &str = r#"
    account_id = $1
    AND ($2::text[] IS NULL OR institution_id = ANY($2))
    AND ($3::int IS NULL OR EXTRACT(YEAR FROM date AT TIME ZONE 'UTC')::int = $3)
    AND ($4::int IS NULL OR EXTRACT(MONTH FROM date AT TIME ZONE 'UTC')::int = $4)
"#;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    #[instrument(skip(config), fields(service = "ingestion-service"))]
    pub async fn new(config: &PostgresConfig) -> Result<Self, AppError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(config.url.expose_secret())
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

fn into_movements(rows: Vec<MovementRow>) -> Result<Vec<Movement>, IngestionError> {
    rows.into_iter()
        .map(|row| Movement::try_from(row).map_err(IngestionError::from))
        .collect()
}

fn filter_binds(filter: &MovementFilter) -> (Option<Vec<String>>, Option<i32>, Option<i32>) {
    (
        filter.institution_ids.clone(),
        filter.year,
        filter.month.map(|m| m as i32),
    )
}

#[async_trait]
impl MovementRepository for Database {
    #[instrument(skip(self, movement), fields(movement_id = %movement.id, account_id = %movement.account_id))]
    async fn insert(&self, movement: &Movement) -> Result<(), IngestionError> {
        let result = sqlx::query(
            r#"
            INSERT INTO movements (id, account_id, institution_id, message_id, extract_id, description, amount, type, category, source, date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(movement.id)
        .bind(&movement.account_id)
        .bind(&movement.institution_id)
        .bind(&movement.message_id)
        .bind(&movement.extract_id)
        .bind(&movement.description)
        .bind(movement.amount)
        .bind(movement.movement_type.as_str())
        .bind(movement.category.as_str())
        .bind(movement.source.as_str())
        .bind(movement.date)
        .bind(movement.created_at)
        .bind(movement.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(IngestionError::Duplicate(movement.id.to_string()))
            }
            Err(e) => Err(IngestionError::Persistence(anyhow::anyhow!(
                "Failed to insert movement: {}",
                e
            ))),
        }
    }

    #[instrument(skip(self))]
    async fn find_by_id(
        &self,
        account_id: &str,
        id: Uuid,
    ) -> Result<Option<Movement>, IngestionError> {
        let row = sqlx::query_as::<_, MovementRow>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements WHERE id = $1 AND account_id = $2"
        ))
        .bind(id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IngestionError::Persistence(anyhow::anyhow!("Failed to get movement: {}", e)))?;

        row.map(Movement::try_from)
            .transpose()
            .map_err(IngestionError::from)
    }

    #[instrument(skip(self, filter))]
    async fn list_by_account(
        &self,
        account_id: &str,
        filter: &MovementFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Movement>, IngestionError> {
        let (institution_ids, year, month) = filter_binds(filter);

        let rows = sqlx::query_as::<_, MovementRow>(&format!(
            "SELECT {MOVEMENT_COLUMNS} FROM movements WHERE {FILTER_CLAUSE} ORDER BY date DESC, id LIMIT $5 OFFSET $6"
        ))
        .bind(account_id)
        .bind(institution_ids)
        .bind(year)
        .bind(month)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            IngestionError::Persistence(anyhow::anyhow!("Failed to list movements: {}", e))
        })?;

        into_movements(rows)
    }

    #[instrument(skip(self, filter))]
    async fn count_by_account(
        &self,
        account_id: &str,
        filter: &MovementFilter,
    ) -> Result<i64, IngestionError> {
        let (institution_ids, year, month) = filter_binds(filter);

        let (count,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM movements WHERE {FILTER_CLAUSE}"))
                .bind(account_id)
                .bind(institution_ids)
                .bind(year)
                .bind(month)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    IngestionError::Persistence(anyhow::anyhow!(
                        "Failed to count movements: {}",
                        e
                    ))
                })?;

        Ok(count)
    }

    #[instrument(skip(self))]
    async fn delete(&self, account_id: &str, id: Uuid) -> Result<bool, IngestionError> {
        let result = sqlx::query("DELETE FROM movements WHERE id = $1 AND account_id = $2")
            .bind(id)
            .bind(account_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                IngestionError::Persistence(anyhow::anyhow!("Failed to delete movement: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete_by_extract_id(&self, extract_id: &str) -> Result<u64, IngestionError> {
        let result = sqlx::query("DELETE FROM movements WHERE extract_id = $1")
            .bind(extract_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                IngestionError::Persistence(anyhow::anyhow!(
                    "Failed to delete extract movements: {}",
                    e
                ))
            })?;

        info!(extract_id = %extract_id, removed = result.rows_affected(), "Removed extract movements");
        Ok(result.rows_affected())
    }
}
