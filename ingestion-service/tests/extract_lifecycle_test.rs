mod common;

use chrono::{Datelike, TimeZone, Utc};
use common::{add_statement, bogota, statement_message, TestHarness, MARCH_2021_STATEMENT};
use ingestion_service::error::IngestionError;
use ingestion_service::models::{
    Extract, ExtractStatus, Message, MessageStatus, MessageType, Movement, MovementSource,
    MovementType,
};
use ingestion_service::services::{ExtractRepository, MessageRepository, MovementRepository};
use rust_decimal::Decimal;

#[tokio::test]
async fn test_statement_produces_movement_per_row() {
    let harness = TestHarness::new(MARCH_2021_STATEMENT).await;
    add_statement(
        &harness.mail,
        "s-1",
        Utc.with_ymd_and_hms(2021, 4, 3, 14, 0, 0).unwrap(),
    );

    let message = harness
        .services
        .processor
        .process(None, "s-1", &harness.account)
        .await
        .expect("statement should be processed");

    assert_eq!(message.status, MessageStatus::Success);
    assert_eq!(message.message_type, Some(MessageType::Extract));
    let extract_id = message.extract_id.clone().expect("extract should be linked");

    let extract = harness
        .store
        .find_by_message_id(&message.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(extract.id, extract_id);
    assert_eq!(extract.status, ExtractStatus::Processed);
    assert_eq!((extract.month, extract.year), (4, 2021));
    assert!(extract.path.ends_with("acc-1/extracts/2021/Extracto_Cuenta.pdf"));

    let movements = harness.store.movements_for_extract(&extract_id).await;
    assert_eq!(movements.len(), 3);
    let incomes = movements
        .iter()
        .filter(|m| m.movement_type == MovementType::Income)
        .count();
    assert_eq!(incomes, 2);
    assert!(movements.iter().all(|m| {
        let local = m.date.with_timezone(&bogota());
        m.source == MovementSource::Extract
            && m.amount > Decimal::ZERO
            && local.month() == 3
            && local.year() == 2021
            && m.message_id.as_deref() == Some(message.id.as_str())
    }));
}

#[tokio::test]
async fn test_january_statement_belongs_to_previous_year() {
    let harness = TestHarness::new(
        "INFORME DEL MES: DICIEMBRE /2021\n15 12 $ 100.00- 0001 CUOTA MANEJO\n",
    )
    .await;
    add_statement(
        &harness.mail,
        "s-2",
        Utc.with_ymd_and_hms(2022, 1, 5, 12, 0, 0).unwrap(),
    );

    let message = harness
        .services
        .processor
        .process(None, "s-2", &harness.account)
        .await
        .unwrap();

    let extract = harness
        .store
        .find_by_message_id(&message.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(extract.year, 2021);
    assert_eq!(extract.month, 1);
    assert!(extract.path.contains("/extracts/2021/"));

    let movements = harness.store.all_movements().await;
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].date.with_timezone(&bogota()).year(), 2021);
}

#[tokio::test]
async fn test_missing_attachment_fails_message() {
    let harness = TestHarness::new(MARCH_2021_STATEMENT).await;
    harness.mail.add_message(statement_message(
        "s-3",
        Utc.with_ymd_and_hms(2021, 4, 3, 14, 0, 0).unwrap(),
        None,
    ));

    let err = harness
        .services
        .processor
        .process(None, "s-3", &harness.account)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestionError::NoAttachmentFound(_)));

    let message = harness
        .store
        .find_by_external_id("acc-1", "s-3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.status, MessageStatus::Failure);

    let extract = harness
        .store
        .find_by_message_id(&message.id)
        .await
        .unwrap()
        .expect("extract is created before the download");
    assert_eq!(extract.status, ExtractStatus::Pending);
    assert!(extract.path.is_empty());
    assert_eq!(harness.converter.call_count(), 0);
}

#[tokio::test]
async fn test_unparsable_statement_marks_extract_failed() {
    let harness = TestHarness::new("documento ilegible").await;
    add_statement(
        &harness.mail,
        "s-4",
        Utc.with_ymd_and_hms(2021, 4, 3, 14, 0, 0).unwrap(),
    );

    let err = harness
        .services
        .processor
        .process(None, "s-4", &harness.account)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestionError::Extraction(_)));

    let message = harness
        .store
        .find_by_external_id("acc-1", "s-4")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.status, MessageStatus::Failure);
    let extract = harness
        .store
        .find_by_message_id(&message.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(extract.status, ExtractStatus::Failed);
}

#[tokio::test]
async fn test_retry_reuses_download_and_replaces_rows() {
    let harness = TestHarness::new(MARCH_2021_STATEMENT).await;
    let processor = &harness.services.processor;
    add_statement(
        &harness.mail,
        "s-5",
        Utc.with_ymd_and_hms(2021, 4, 3, 14, 0, 0).unwrap(),
    );

    let mut message = processor.process(None, "s-5", &harness.account).await.unwrap();
    assert_eq!(harness.store.all_movements().await.len(), 3);

    message.mark_failure("forced for retry");
    MessageRepository::update(harness.store.as_ref(), &message)
        .await
        .unwrap();

    let retried = processor.process(None, "s-5", &harness.account).await.unwrap();

    assert_eq!(retried.status, MessageStatus::Success);
    assert_eq!(retried.extract_id, message.extract_id);
    assert_eq!(harness.mail.attachment_calls(), 1);
    assert_eq!(harness.converter.call_count(), 2);
    assert_eq!(harness.store.all_movements().await.len(), 3);
}

#[tokio::test]
async fn test_failed_extract_movements_are_removed_before_retry() {
    let harness = TestHarness::new(MARCH_2021_STATEMENT).await;
    let received = Utc.with_ymd_and_hms(2021, 4, 3, 14, 0, 0).unwrap();
    add_statement(&harness.mail, "s-6", received);

    let mut message = Message::new(
        "acc-1".into(),
        "s-6".into(),
        None,
        common::STATEMENT_SENDER.into(),
        "me@example.com".into(),
        received,
    );
    message.message_type = Some(MessageType::Extract);
    message.institution_id = Some("davivienda".into());

    let mut extract = Extract::new("acc-1".into(), message.id.clone(), "davivienda".into());
    extract.record_download(4, 2021, "/nonexistent/old.pdf".into());
    extract.mark_failed();
    message.extract_id = Some(extract.id.clone());
    message.mark_failure("parse error: earlier attempt");

    let stale = Movement::new(
        "acc-1".into(),
        "davivienda".into(),
        "FILA ANTERIOR".into(),
        Decimal::new(5_000, 2),
        MovementType::Expense,
        Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap(),
        MovementSource::Extract,
    )
    .with_message(message.id.clone())
    .with_extract(extract.id.clone());

    MessageRepository::insert(harness.store.as_ref(), &message)
        .await
        .unwrap();
    ExtractRepository::insert(harness.store.as_ref(), &extract)
        .await
        .unwrap();
    MovementRepository::insert(harness.store.as_ref(), &stale)
        .await
        .unwrap();

    let resolved = harness
        .services
        .processor
        .process(None, "s-6", &harness.account)
        .await
        .unwrap();

    assert_eq!(resolved.id, message.id);
    assert_eq!(resolved.status, MessageStatus::Success);
    assert_eq!(harness.mail.attachment_calls(), 1);

    let movements = harness.store.movements_for_extract(&extract.id).await;
    assert_eq!(movements.len(), 3);
    assert!(movements.iter().all(|m| m.id != stale.id));

    let refreshed = harness
        .store
        .find_by_message_id(&message.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(refreshed.id, extract.id);
    assert_eq!(refreshed.status, ExtractStatus::Processed);
    assert!(refreshed.path.ends_with("Extracto_Cuenta.pdf"));
}
