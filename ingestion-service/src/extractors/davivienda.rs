use super::normalizer::{normalize, normalize_document};
use super::{
    DocumentConverter, ExtractionContext, ExtractorError, ExtractorProvider, MovementExtractor,
};
use crate::models::{Extract, Movement, MovementSource, MovementType};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

pub const DAVIVIENDA: &str = "davivienda";

const EXPENSE_KEYWORDS: [&str; 3] = ["descuento", "compra", "retiro"];

static ALERT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Fecha:\s*(?P<fecha>[^\n]+)\nHora:\s*(?P<hora>[^\n]+)\nValor Transacción:\s*(?P<valor>[^\n]+)\nClase de Movimiento:\s*(?P<clase>[^\n]+),\nLugar de Transacción:\s*(?P<lugar>[^\n]+)",
    )
    .expect("valid alert regex")
});

static STATEMENT_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"INFORME DEL MES:.*?/(\d{4})").expect("valid statement year regex")
});

static STATEMENT_ROW: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(\d{2})\s+(\d{2})\s+\$\s*([\d,]+\.\d{2})([+-])\s+(\d{4})\s+(.+)$")
        .expect("valid statement row regex")
});

pub struct DaviviendaProvider {
    converter: Arc<dyn DocumentConverter>,
    pdf_password: Option<Secret<String>>,
    offset: FixedOffset,
}

impl DaviviendaProvider {
    pub fn new(
        converter: Arc<dyn DocumentConverter>,
        pdf_password: Option<Secret<String>>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            converter,
            pdf_password,
            offset,
        }
    }
}

impl ExtractorProvider for DaviviendaProvider {
    fn institution_id(&self) -> &str {
        DAVIVIENDA
    }

    fn extractor(&self, context: ExtractionContext) -> Box<dyn MovementExtractor> {
        Box::new(DaviviendaExtractor {
            context,
            converter: self.converter.clone(),
            pdf_password: self.pdf_password.clone(),
            offset: self.offset,
            extract: None,
        })
    }
}

pub struct DaviviendaExtractor {
    context: ExtractionContext,
    converter: Arc<dyn DocumentConverter>,
    pdf_password: Option<Secret<String>>,
    offset: FixedOffset,
    extract: Option<Extract>,
}

#[async_trait]
impl MovementExtractor for DaviviendaExtractor {
    fn set_extract(&mut self, extract: Extract) {
        self.extract = Some(extract);
    }

    async fn extract(&self) -> Result<Vec<Movement>, ExtractorError> {
        match &self.extract {
            Some(extract) => self.extract_statement(extract).await,
            None => {
                let body = self
                    .context
                    .body
                    .as_deref()
                    .ok_or(ExtractorError::MissingBody)?;
                Ok(vec![self.parse_alert(body)?])
            }
        }
    }
}

impl DaviviendaExtractor {
    fn parse_alert(&self, body: &str) -> Result<Movement, ExtractorError> {
        let text = normalize(body);
        let caps = ALERT
            .captures(&text)
            .ok_or_else(|| ExtractorError::Parse(format!("not found labels: {}", text)))?;

        let date = parse_alert_date(&caps["fecha"], &caps["hora"], self.offset)?;
        let amount = parse_amount(&caps["valor"])?;
        let class = caps["clase"].trim();
        let place = caps["lugar"].trim();

        let movement_type = if is_expense(class) {
            MovementType::Expense
        } else {
            MovementType::Income
        };

        Ok(Movement::new(
            self.context.account_id.clone(),
            self.context.institution_id.clone(),
            format!("{} {}", class, place),
            amount,
            movement_type,
            date,
            MovementSource::Email,
        )
        .with_message(self.context.message_id.clone()))
    }

    async fn extract_statement(&self, extract: &Extract) -> Result<Vec<Movement>, ExtractorError> {
        if extract.path.is_empty() {
            return Err(ExtractorError::MissingExtract);
        }
        let password = self
            .pdf_password
            .as_ref()
            .filter(|p| !p.expose_secret().is_empty())
            .ok_or(ExtractorError::MissingPassword)?;

        let raw = self
            .converter
            .extract_text(Path::new(&extract.path), password)
            .await?;

        let rows = parse_statement(&normalize_document(&raw), extract.year, self.offset)?;

        tracing::info!(
            extract_id = %extract.id,
            rows = rows.len(),
            "Parsed statement rows"
        );

        Ok(rows
            .into_iter()
            .map(|row| {
                Movement::new(
                    self.context.account_id.clone(),
                    self.context.institution_id.clone(),
                    row.detail,
                    row.amount,
                    row.movement_type,
                    row.date,
                    MovementSource::Extract,
                )
                .with_message(self.context.message_id.clone())
                .with_extract(extract.id.clone())
            })
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct StatementRow {
    pub date: DateTime<Utc>,
    pub amount: Decimal,
    pub movement_type: MovementType,
    pub code: String,
    pub detail: String,
}

/// Parses a statement rendered as text.
///
/// The year comes from the `INFORME DEL MES` header, falling back to
/// `fallback_year` when the header is missing. Rows whose day/month do not
/// form a valid date are skipped.
pub(crate) fn parse_statement(
    text: &str,
    fallback_year: i32,
    offset: FixedOffset,
) -> Result<Vec<StatementRow>, ExtractorError> {
    let header_year = STATEMENT_YEAR
        .captures(text)
        .and_then(|caps| caps[1].parse::<i32>().ok());
    let has_rows = STATEMENT_ROW.is_match(text);

    if header_year.is_none() && !has_rows {
        return Err(ExtractorError::Parse(format!(
            "not found statement header or rows: {}",
            truncate(text, 200)
        )));
    }

    let year = match header_year {
        Some(year) => year,
        None if fallback_year > 0 => fallback_year,
        None => {
            return Err(ExtractorError::Parse(
                "statement year not found".to_string(),
            ))
        }
    };

    let mut rows = Vec::new();
    for caps in STATEMENT_ROW.captures_iter(text) {
        let day: u32 = caps[1].parse().unwrap_or(0);
        let month: u32 = caps[2].parse().unwrap_or(0);
        let Some(date) = NaiveDate::from_ymd_opt(year, month, day) else {
            tracing::warn!(day, month, year, "Skipping statement row with invalid date");
            continue;
        };

        let amount = parse_amount(&caps[3])?;
        let movement_type = match &caps[4] {
            "+" => MovementType::Income,
            _ => MovementType::Expense,
        };

        rows.push(StatementRow {
            date: local_to_utc(date.and_time(NaiveTime::MIN), offset)?,
            amount,
            movement_type,
            code: caps[5].to_string(),
            detail: caps[6].trim().to_string(),
        });
    }

    Ok(rows)
}

fn is_expense(class: &str) -> bool {
    let lowered = class.to_lowercase();
    EXPENSE_KEYWORDS.iter().any(|k| lowered.contains(k))
}

fn parse_amount(raw: &str) -> Result<Decimal, ExtractorError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '$' | ',') && !c.is_whitespace())
        .collect();
    let mut amount = Decimal::from_str(&cleaned).map_err(|_| ExtractorError::InvalidField {
        field: "amount",
        value: raw.trim().to_string(),
    })?;
    amount.rescale(2);
    Ok(amount)
}

fn parse_alert_date(
    date: &str,
    time: &str,
    offset: FixedOffset,
) -> Result<DateTime<Utc>, ExtractorError> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y/%m/%d").map_err(|_| {
        ExtractorError::InvalidField {
            field: "date",
            value: date.trim().to_string(),
        }
    })?;
    let clock = NaiveTime::parse_from_str(time.trim(), "%H:%M:%S").map_err(|_| {
        ExtractorError::InvalidField {
            field: "time",
            value: time.trim().to_string(),
        }
    })?;
    local_to_utc(day.and_time(clock), offset)
}

fn local_to_utc(local: NaiveDateTime, offset: FixedOffset) -> Result<DateTime<Utc>, ExtractorError> {
    offset
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| ExtractorError::InvalidField {
            field: "date",
            value: local.to_string(),
        })
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractors::StaticTextConverter;
    use chrono::{Datelike, Timelike};

    const ALERT_BODY: &str = "Fecha:2025/08/14\nHora:19:24:35\nValor Transacción: $162,000\n\
                              Clase de Movimiento: Descuento Transferencia a una llave,\n\
                              Lugar de Transacción:App Transaccional";

    fn bogota() -> FixedOffset {
        FixedOffset::west_opt(5 * 3600).unwrap()
    }

    fn extractor(body: Option<&str>, statement_text: &str) -> Box<dyn MovementExtractor> {
        let provider = DaviviendaProvider::new(
            Arc::new(StaticTextConverter::new(statement_text)),
            Some(Secret::new("1234".to_string())),
            bogota(),
        );
        provider.extractor(ExtractionContext {
            account_id: "acc-1".into(),
            institution_id: DAVIVIENDA.into(),
            message_id: "msg-1".into(),
            body: body.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_single_transaction_alert() {
        let movements = extractor(Some(ALERT_BODY), "").extract().await.unwrap();
        assert_eq!(movements.len(), 1);

        let movement = &movements[0];
        assert_eq!(movement.amount, Decimal::new(16200000, 2));
        assert_eq!(movement.amount.to_string(), "162000.00");
        assert_eq!(movement.movement_type, MovementType::Expense);
        assert_eq!(movement.source, MovementSource::Email);
        assert_eq!(
            movement.description,
            "Descuento Transferencia a una llave App Transaccional"
        );
        assert_eq!(movement.message_id.as_deref(), Some("msg-1"));

        let local = movement.date.with_timezone(&bogota());
        assert_eq!((local.year(), local.month(), local.day()), (2025, 8, 14));
        assert_eq!((local.hour(), local.minute(), local.second()), (19, 24, 35));
        assert_eq!(movement.date.hour(), 0);
    }

    #[tokio::test]
    async fn test_income_when_no_debit_keyword() {
        let body = ALERT_BODY.replace("Descuento Transferencia a una llave", "Abono Transferencia");
        let movements = extractor(Some(&body), "").extract().await.unwrap();
        assert_eq!(movements[0].movement_type, MovementType::Income);
    }

    #[tokio::test]
    async fn test_missing_labels_is_parse_error() {
        let err = extractor(Some("Hola, tu clave fue cambiada"), "")
            .extract()
            .await
            .unwrap_err();
        match err {
            ExtractorError::Parse(msg) => {
                assert!(msg.starts_with("not found labels:"));
                assert!(msg.contains("tu clave fue cambiada"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_statement_mode_requires_extract_path() {
        let mut extractor = extractor(None, "");
        extractor.set_extract(Extract::new("acc-1".into(), "msg-1".into(), DAVIVIENDA.into()));
        assert!(matches!(
            extractor.extract().await,
            Err(ExtractorError::MissingExtract)
        ));
    }

    #[tokio::test]
    async fn test_statement_mode_requires_password() {
        let provider = DaviviendaProvider::new(
            Arc::new(StaticTextConverter::new("")),
            None,
            bogota(),
        );
        let mut extractor = provider.extractor(ExtractionContext {
            account_id: "acc-1".into(),
            institution_id: DAVIVIENDA.into(),
            message_id: "msg-1".into(),
            body: None,
        });
        let mut extract = Extract::new("acc-1".into(), "msg-1".into(), DAVIVIENDA.into());
        extract.record_download(4, 2021, "/tmp/statement.pdf".into());
        extractor.set_extract(extract);
        assert!(matches!(
            extractor.extract().await,
            Err(ExtractorError::MissingPassword)
        ));
    }

    #[test]
    fn test_statement_rows() {
        let text = "INFORME DEL MES: MARZO /2021\n\
                    05 03 $ 1,500,000.00+ 1234 PAGO NOMINA EMPRESA\n\
                    12 03 $ 82,350.50- 5678 COMPRA EXITO\n\
                    31 02 $ 10.00- 0001 FECHA INVALIDA\n\
                    28 03 $ 20,000.00+ 9999 TRANSFERENCIA RECIBIDA";

        let rows = parse_statement(text, 0, bogota()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].amount, Decimal::new(150000000, 2));
        assert_eq!(rows[0].movement_type, MovementType::Income);
        assert_eq!(rows[0].detail, "PAGO NOMINA EMPRESA");
        assert_eq!(rows[1].movement_type, MovementType::Expense);
        assert_eq!(rows[1].code, "5678");
        assert_eq!(rows[2].movement_type, MovementType::Income);
        assert!(rows.iter().all(|r| r.amount > Decimal::ZERO));
        assert!(rows
            .iter()
            .all(|r| r.date.with_timezone(&bogota()).month() == 3
                && r.date.with_timezone(&bogota()).year() == 2021));
    }

    #[test]
    fn test_statement_year_falls_back_to_extract() {
        let rows = parse_statement("01 12 $ 5.00- 0001 CUOTA MANEJO", 2020, bogota()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date.with_timezone(&bogota()).year(), 2020);
    }

    #[test]
    fn test_statement_without_rows() {
        let rows = parse_statement("INFORME DEL MES: ENERO /2022\nSIN MOVIMIENTOS", 0, bogota())
            .unwrap();
        assert!(rows.is_empty());

        assert!(matches!(
            parse_statement("unrelated document", 2022, bogota()),
            Err(ExtractorError::Parse(_))
        ));
    }

    #[test]
    fn test_amount_parsing() {
        assert_eq!(parse_amount(" $162,000 ").unwrap().to_string(), "162000.00");
        assert_eq!(parse_amount("$1,234.5").unwrap().to_string(), "1234.50");
        assert!(parse_amount("$ abc").is_err());
    }
}
