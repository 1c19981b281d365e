//! Movement extraction, one implementation per financial institution.

mod converter;
mod davivienda;
pub mod normalizer;

pub use converter::{DocumentConverter, PdfTextConverter, StaticTextConverter};
pub use davivienda::{DaviviendaExtractor, DaviviendaProvider, DAVIVIENDA};

use crate::models::{Extract, Movement};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("missing extract")]
    MissingExtract,

    #[error("missing extract password")]
    MissingPassword,

    #[error("missing message body")]
    MissingBody,

    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    #[error("document conversion failed: {0}")]
    Conversion(String),
}

/// What an extractor knows about the message it works on.
#[derive(Debug, Clone)]
pub struct ExtractionContext {
    pub account_id: String,
    pub institution_id: String,
    pub message_id: String,
    /// Decoded message body. Absent for statement extraction.
    pub body: Option<String>,
}

/// Produces movements from one message.
///
/// Without an extract the extractor reads the message body as a single
/// transaction alert. Once [`set_extract`](Self::set_extract) is called it
/// parses the downloaded statement instead.
#[async_trait]
pub trait MovementExtractor: Send + Sync {
    fn set_extract(&mut self, extract: Extract);

    async fn extract(&self) -> Result<Vec<Movement>, ExtractorError>;
}

/// Builds extractors for one institution.
pub trait ExtractorProvider: Send + Sync {
    fn institution_id(&self) -> &str;

    fn extractor(&self, context: ExtractionContext) -> Box<dyn MovementExtractor>;
}

#[derive(Default, Clone)]
pub struct ExtractorRegistry {
    providers: HashMap<String, Arc<dyn ExtractorProvider>>,
}

impl ExtractorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ExtractorProvider>) {
        self.providers
            .insert(provider.institution_id().to_string(), provider);
    }

    pub fn with_provider(mut self, provider: Arc<dyn ExtractorProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn find_provider(&self, institution_id: &str) -> Option<&dyn ExtractorProvider> {
        self.providers.get(institution_id).map(|p| p.as_ref())
    }

    pub fn institutions(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}
