#![allow(dead_code)]

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use ingestion_service::config::DispatcherConfig;
use ingestion_service::extractors::{DaviviendaProvider, ExtractorRegistry, StaticTextConverter};
use ingestion_service::models::Account;
use ingestion_service::services::mail::{
    MailMessage, MailService, MessageHeader, MessagePart, MessagePartBody, MockMailService,
    RetryingMailService, StaticMailServiceFactory,
};
use ingestion_service::services::{
    InMemoryStore, LocalStorage, MessageClassifier, MessageRepository,
};
use ingestion_service::startup::{IngestionServices, ServiceDependencies};
use secrecy::Secret;
use service_core::retry::RetryPolicy;
use std::sync::{Arc, Once};
use std::time::Duration;

pub const ACCOUNT_ID: &str = "acc-1";
pub const BANK_SENDER: &str = "bancodavivienda@davivienda.com";
pub const STATEMENT_SENDER: &str = "\"Banco Davivienda\" <banco_davivienda@davivienda.com>";

pub const ALERT_BODY: &str = "Fecha:2025/08/14\nHora:19:24:35\nValor Transacción: $162,000\n\
                              Clase de Movimiento: Descuento Transferencia a una llave,\n\
                              Lugar de Transacción:App Transaccional";

pub const MARCH_2021_STATEMENT: &str = "BANCO DAVIVIENDA\n\
                                        INFORME DEL MES: MARZO /2021\n\
                                        05 03 $ 1,500,000.00+ 1234 PAGO NOMINA EMPRESA\n\
                                        12 03 $ 82,350.50- 5678 COMPRA EXITO\n\
                                        28 03 $ 20,000.00+ 9999 TRANSFERENCIA RECIBIDA\n";

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

pub struct TestHarness {
    pub store: Arc<InMemoryStore>,
    pub mail: Arc<MockMailService>,
    pub factory: Arc<StaticMailServiceFactory>,
    pub converter: Arc<StaticTextConverter>,
    pub services: IngestionServices,
    pub account: Account,
    _storage: tempfile::TempDir,
}

impl TestHarness {
    pub async fn new(statement_text: &str) -> Self {
        Self::with_dispatcher(statement_text, DispatcherConfig::default()).await
    }

    pub async fn with_dispatcher(statement_text: &str, dispatcher: DispatcherConfig) -> Self {
        Self::build(
            statement_text,
            dispatcher,
            |store| store as Arc<dyn MessageRepository>,
            |mail| mail,
        )
        .await
    }

    /// Lets a test put its own message repository in front of the store or
    /// its own mail service in front of the retrying mock.
    pub async fn build(
        statement_text: &str,
        dispatcher: DispatcherConfig,
        wrap_messages: impl FnOnce(Arc<InMemoryStore>) -> Arc<dyn MessageRepository>,
        wrap_mail: impl FnOnce(Arc<dyn MailService>) -> Arc<dyn MailService>,
    ) -> Self {
        init_tracing();

        let storage_dir = tempfile::tempdir().expect("Failed to create storage dir");
        let storage = LocalStorage::new(storage_dir.path())
            .await
            .expect("Failed to create local storage");

        let store = Arc::new(InMemoryStore::new());
        let mail = Arc::new(MockMailService::new());
        let retrying: Arc<dyn MailService> = Arc::new(RetryingMailService::new(
            mail.clone(),
            RetryPolicy::fixed(5, Duration::from_secs(1)),
        ));
        let factory = Arc::new(StaticMailServiceFactory::new(wrap_mail(retrying)));
        let converter = Arc::new(StaticTextConverter::new(statement_text));

        let extractors = ExtractorRegistry::new().with_provider(Arc::new(DaviviendaProvider::new(
            converter.clone(),
            Some(Secret::new("1234".to_string())),
            bogota(),
        )));

        let services = IngestionServices::new(ServiceDependencies {
            messages: wrap_messages(store.clone()),
            extracts: store.clone(),
            movements: store.clone(),
            storage: Arc::new(storage),
            mail_factory: factory.clone(),
            extractors,
            classifier: MessageClassifier::default(),
            category_classifier: None,
            dispatcher,
        });

        Self {
            store,
            mail,
            factory,
            converter,
            services,
            account: Account::new(ACCOUNT_ID, "me@example.com"),
            _storage: storage_dir,
        }
    }
}

pub fn bogota() -> FixedOffset {
    FixedOffset::west_opt(5 * 3600).expect("valid offset")
}

fn header(name: &str, value: &str) -> MessageHeader {
    MessageHeader {
        name: name.to_string(),
        value: value.to_string(),
    }
}

fn text_part(body: &str) -> MessagePart {
    MessagePart {
        part_id: Some("0".to_string()),
        mime_type: Some("text/plain".to_string()),
        body: Some(MessagePartBody {
            data: Some(URL_SAFE_NO_PAD.encode(body)),
            ..MessagePartBody::default()
        }),
        ..MessagePart::default()
    }
}

/// A single-part email as the provider returns it.
pub fn alert_message(id: &str, from: &str, subject: &str, body: &str) -> MailMessage {
    let received = Utc.with_ymd_and_hms(2025, 8, 15, 0, 24, 40).unwrap();
    MailMessage {
        id: id.to_string(),
        internal_date: Some(received.timestamp_millis().to_string()),
        payload: Some(MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            headers: vec![
                header("From", from),
                header("To", "me@example.com"),
                header("Subject", subject),
                header("Date", "Thu, 14 Aug 2025 19:24:40 -0500"),
            ],
            parts: vec![text_part(body)],
            ..MessagePart::default()
        }),
        ..MailMessage::default()
    }
}

/// A statement email received at `received`, optionally carrying a PDF.
pub fn statement_message(id: &str, received: DateTime<Utc>, attachment: Option<&str>) -> MailMessage {
    let mut parts = vec![text_part("Adjuntamos su extracto")];
    if let Some(attachment_id) = attachment {
        parts.push(MessagePart {
            part_id: Some("1".to_string()),
            mime_type: Some("application/pdf".to_string()),
            filename: Some("Extracto_Cuenta.pdf".to_string()),
            body: Some(MessagePartBody {
                attachment_id: Some(attachment_id.to_string()),
                size: Some(4),
                data: None,
            }),
            ..MessagePart::default()
        });
    }

    MailMessage {
        id: id.to_string(),
        internal_date: Some(received.timestamp_millis().to_string()),
        payload: Some(MessagePart {
            mime_type: Some("multipart/mixed".to_string()),
            headers: vec![
                header("From", STATEMENT_SENDER),
                header("To", "me@example.com"),
                header("Subject", "Extractos Davivienda"),
            ],
            parts,
            ..MessagePart::default()
        }),
        ..MailMessage::default()
    }
}

/// Registers a statement email with its attachment on the mock provider.
pub fn add_statement(mail: &MockMailService, id: &str, received: DateTime<Utc>) {
    mail.add_message(statement_message(id, received, Some("att-1")));
    mail.add_attachment(id, "att-1", b"%PDF-1.4".to_vec());
}
