use crate::config::{DispatcherConfig, IngestionConfig};
use crate::extractors::{DaviviendaProvider, ExtractorRegistry, PdfTextConverter};
use crate::handlers;
use crate::services::mail::{GoogleMailServiceFactory, MailServiceFactory};
use crate::services::{
    AttachmentStore, CategoryClassifier, Database, ExtractManager, ExtractRepository,
    HttpCategoryClassifier, LocalStorage, MessageClassifier, MessageProcessor, MessageRepository,
    MongoDb, MovementRepository, MovementService, Storage,
};
use crate::workers::{CommandExecutor, NotificationDispatcher};
use axum::{routing::get, Router};
use chrono::FixedOffset;
use metrics_exporter_prometheus::PrometheusHandle;
use service_core::error::AppError;
use std::future::{Future, IntoFuture};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Collaborators the ingestion pipeline is assembled from.
pub struct ServiceDependencies {
    pub messages: Arc<dyn MessageRepository>,
    pub extracts: Arc<dyn ExtractRepository>,
    pub movements: Arc<dyn MovementRepository>,
    pub storage: Arc<dyn Storage>,
    pub mail_factory: Arc<dyn MailServiceFactory>,
    pub extractors: ExtractorRegistry,
    pub classifier: MessageClassifier,
    pub category_classifier: Option<Arc<dyn CategoryClassifier>>,
    pub dispatcher: DispatcherConfig,
}

#[derive(Clone)]
pub struct IngestionServices {
    pub processor: MessageProcessor,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub movements: MovementService,
}

impl IngestionServices {
    pub fn new(deps: ServiceDependencies) -> Self {
        let classifier = Arc::new(deps.classifier);
        let movements = MovementService::new(deps.movements, deps.category_classifier);
        let extract_manager = ExtractManager::new(
            deps.extracts,
            movements.clone(),
            AttachmentStore::new(deps.storage),
        );

        let processor = MessageProcessor::new(
            deps.messages,
            deps.mail_factory.clone(),
            classifier.clone(),
            Arc::new(deps.extractors),
            extract_manager,
            movements.clone(),
        );

        let dispatcher = Arc::new(NotificationDispatcher::new(
            processor.clone(),
            deps.mail_factory,
            classifier,
            deps.dispatcher,
        ));

        Self {
            processor,
            dispatcher,
            movements,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: IngestionConfig,
    pub mongo: MongoDb,
    pub postgres: Database,
    pub metrics: PrometheusHandle,
    pub services: IngestionServices,
}

pub struct Application {
    port: u16,
    server: Box<dyn Future<Output = std::io::Result<()>> + Send + Unpin>,
    state: AppState,
}

impl Application {
    pub async fn build(config: IngestionConfig, metrics: PrometheusHandle) -> Result<Self, AppError> {
        let mongo = MongoDb::connect(&config.mongodb.uri, &config.mongodb.database)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to MongoDB: {}", e);
                e
            })?;
        mongo.initialize_indexes().await.map_err(|e| {
            tracing::error!("Failed to initialize database indexes: {}", e);
            e
        })?;

        let postgres = Database::new(&config.postgres).await?;
        postgres.run_migrations().await?;

        let storage: Arc<dyn Storage> = Arc::new(
            LocalStorage::new(&config.storage.local_path)
                .await
                .map_err(|e| {
                    tracing::error!(
                        "Failed to initialize local storage at {}: {}",
                        config.storage.local_path,
                        e
                    );
                    e
                })?,
        );

        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::InternalError(anyhow::anyhow!("HTTP client: {}", e)))?;

        let mail_factory: Arc<dyn MailServiceFactory> = Arc::new(GoogleMailServiceFactory::new(
            http.clone(),
            config.google.clone(),
            config.mail.retry_policy(),
        ));

        let offset = FixedOffset::east_opt(config.extractor.utc_offset_minutes * 60)
            .ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!(
                    "Invalid institution UTC offset: {} minutes",
                    config.extractor.utc_offset_minutes
                ))
            })?;
        if config.extractor.pdf_password.is_none() {
            tracing::warn!("EXTRACT_PDF_PASSWORD is not set, statements cannot be parsed");
        }
        let converter = Arc::new(PdfTextConverter::new(
            CommandExecutor::new(config.extractor.command_timeout()),
            config.extractor.pdftotext_program.clone(),
        ));
        let extractors = ExtractorRegistry::new().with_provider(Arc::new(DaviviendaProvider::new(
            converter,
            config.extractor.pdf_password.clone(),
            offset,
        )));

        let category_classifier = config.classifier_url.clone().map(|url| {
            Arc::new(HttpCategoryClassifier::new(http.clone(), url)) as Arc<dyn CategoryClassifier>
        });

        let services = IngestionServices::new(ServiceDependencies {
            messages: Arc::new(mongo.clone()),
            extracts: Arc::new(mongo.clone()),
            movements: Arc::new(postgres.clone()),
            storage,
            mail_factory,
            extractors,
            classifier: MessageClassifier::default(),
            category_classifier,
            dispatcher: config.dispatcher.clone(),
        });

        let state = AppState {
            config: config.clone(),
            mongo,
            postgres,
            metrics,
            services,
        };

        let app = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/ready", get(handlers::readiness_check))
            .route("/metrics", get(handlers::metrics_endpoint))
            .layer(TraceLayer::new_for_http())
            .with_state(state.clone());

        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Listening on {}", port);

        let server = axum::serve(listener, app);

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
            state,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn services(&self) -> &IngestionServices {
        &self.state.services
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}
