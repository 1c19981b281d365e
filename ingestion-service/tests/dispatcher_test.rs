mod common;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use common::{add_statement, alert_message, TestHarness, ALERT_BODY, BANK_SENDER, MARCH_2021_STATEMENT};
use ingestion_service::config::DispatcherConfig;
use ingestion_service::error::IngestionError;
use ingestion_service::models::{MessageStatus, MessageType};
use ingestion_service::services::mail::{MailError, MailMessage, MailService};
use ingestion_service::services::{InstitutionProfile, MessageRepository};
use std::sync::Arc;

/// Mail service that panics when asked for one particular message.
struct PanicsOn {
    inner: Arc<dyn MailService>,
    external_id: &'static str,
}

#[async_trait]
impl MailService for PanicsOn {
    async fn get_message_by_id(&self, id: &str) -> Result<MailMessage, MailError> {
        if id == self.external_id {
            panic!("mail client crashed on {}", id);
        }
        self.inner.get_message_by_id(id).await
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

#[tokio::test]
async fn test_batch_collects_successes_and_failures() {
    let harness = TestHarness::new("").await;
    harness
        .mail
        .add_message(alert_message("m-1", BANK_SENDER, "Davivienda", ALERT_BODY));
    harness
        .mail
        .add_message(alert_message("m-2", "promos@shop.com", "Oferta", "hola"));

    let report = harness
        .services
        .dispatcher
        .dispatch(
            &harness.account,
            Some("batch-1"),
            vec!["m-1".into(), "missing".into(), "m-2".into(), "m-1".into()],
        )
        .await;

    assert_eq!(report.notification_id.as_deref(), Some("batch-1"));
    assert_eq!(report.total(), 3);
    assert_eq!(report.processed.len(), 2);
    assert!(report
        .processed
        .iter()
        .all(|m| m.status == MessageStatus::Success));

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].external_id, "missing");
    assert!(matches!(
        report.failures[0].error,
        IngestionError::MessageNotFound(_)
    ));

    assert_eq!(harness.store.all_movements().await.len(), 1);
}

#[tokio::test]
async fn test_history_notification_dispatches_new_messages() {
    let harness = TestHarness::with_dispatcher(
        MARCH_2021_STATEMENT,
        DispatcherConfig {
            max_concurrency: 1,
            task_timeout_secs: Some(30),
        },
    )
    .await;
    harness
        .mail
        .add_message(alert_message("m-1", BANK_SENDER, "Davivienda", ALERT_BODY));
    add_statement(
        &harness.mail,
        "s-1",
        Utc.with_ymd_and_hms(2021, 4, 3, 14, 0, 0).unwrap(),
    );
    harness.mail.set_history(vec!["m-1".into(), "s-1".into()]);

    let report = harness
        .services
        .dispatcher
        .process_notification(&harness.account, "777")
        .await
        .unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(report.processed.len(), 2);
    assert!(report
        .processed
        .iter()
        .all(|m| m.notification_id.as_deref() == Some("777")));
    assert_eq!(harness.store.all_movements().await.len(), 4);
}

#[tokio::test]
async fn test_blank_history_id_is_rejected() {
    let harness = TestHarness::new("").await;

    let err = harness
        .services
        .dispatcher
        .process_notification(&harness.account, " ")
        .await
        .unwrap_err();

    assert!(matches!(err, IngestionError::InvalidNotification(_)));
}

#[tokio::test]
async fn test_sync_statements_only_dispatches_statements() {
    let harness = TestHarness::new(MARCH_2021_STATEMENT).await;
    harness
        .mail
        .add_message(alert_message("m-1", BANK_SENDER, "Davivienda", ALERT_BODY));
    add_statement(
        &harness.mail,
        "s-1",
        Utc.with_ymd_and_hms(2021, 4, 3, 14, 0, 0).unwrap(),
    );
    add_statement(
        &harness.mail,
        "s-2",
        Utc.with_ymd_and_hms(2021, 5, 3, 14, 0, 0).unwrap(),
    );

    let report = harness
        .services
        .dispatcher
        .sync_statements(&harness.account, "davivienda")
        .await
        .unwrap();

    assert_eq!(report.processed.len(), 2);
    assert!(report
        .processed
        .iter()
        .all(|m| m.message_type == Some(MessageType::Extract)));

    let err = harness
        .services
        .dispatcher
        .sync_statements(&harness.account, "otro-banco")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestionError::UnsupportedInstitution(_)));
}

#[tokio::test]
async fn test_shutdown_cancels_pending_work() {
    let harness = TestHarness::new("").await;
    harness
        .mail
        .add_message(alert_message("m-1", BANK_SENDER, "Davivienda", ALERT_BODY));

    harness.services.dispatcher.shutdown();
    let report = harness
        .services
        .dispatcher
        .dispatch(&harness.account, None, vec!["m-1".into()])
        .await;

    assert!(report.processed.is_empty());
    assert!(matches!(
        report.failures[0].error,
        IngestionError::Cancelled
    ));
    assert!(harness.store.all_messages().await.is_empty());
}

#[tokio::test]
async fn test_panicking_task_is_reported_as_failure() {
    let harness = TestHarness::build(
        "",
        DispatcherConfig::default(),
        |store| store as Arc<dyn MessageRepository>,
        |mail| {
            Arc::new(PanicsOn {
                inner: mail,
                external_id: "m-crash",
            }) as Arc<dyn MailService>
        },
    )
    .await;
    harness
        .mail
        .add_message(alert_message("m-1", BANK_SENDER, "Davivienda", ALERT_BODY));

    let report = harness
        .services
        .dispatcher
        .dispatch(
            &harness.account,
            Some("batch-2"),
            vec!["m-1".into(), "m-crash".into()],
        )
        .await;

    assert_eq!(report.total(), 2);
    assert_eq!(report.processed.len(), 1);
    assert_eq!(report.processed[0].external_id, "m-1");
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].external_id, "m-crash");
    assert!(matches!(
        report.failures[0].error,
        IngestionError::TaskAborted(_)
    ));
}
