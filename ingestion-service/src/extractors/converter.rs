use super::ExtractorError;
use crate::workers::CommandExecutor;
use async_trait::async_trait;
use secrecy::{ExposeSecret, Secret};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Turns a stored document into plain text.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn extract_text(
        &self,
        path: &Path,
        secret: &Secret<String>,
    ) -> Result<String, ExtractorError>;
}

/// Converts password-protected PDFs with poppler's `pdftotext`.
#[derive(Clone)]
pub struct PdfTextConverter {
    executor: CommandExecutor,
    program: String,
}

impl PdfTextConverter {
    pub fn new(executor: CommandExecutor, program: impl Into<String>) -> Self {
        Self {
            executor,
            program: program.into(),
        }
    }
}

#[async_trait]
impl DocumentConverter for PdfTextConverter {
    async fn extract_text(
        &self,
        path: &Path,
        secret: &Secret<String>,
    ) -> Result<String, ExtractorError> {
        let path_str = path
            .to_str()
            .ok_or_else(|| ExtractorError::Conversion(format!("non UTF-8 path: {:?}", path)))?;

        tracing::info!(file_path = ?path, "Converting statement to text");

        let output = self
            .executor
            .execute(
                &self.program,
                &["-layout", "-upw", secret.expose_secret(), path_str, "-"],
                &[2],
                None,
            )
            .await
            .map_err(|e| ExtractorError::Conversion(e.to_string()))?;

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        tracing::info!(text_length = text.len(), "Statement conversion completed");
        Ok(text)
    }
}

/// Returns a fixed text for every document. Used by tests and local runs
/// without poppler installed.
pub struct StaticTextConverter {
    text: String,
    calls: AtomicU64,
}

impl StaticTextConverter {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentConverter for StaticTextConverter {
    async fn extract_text(
        &self,
        path: &Path,
        _secret: &Secret<String>,
    ) -> Result<String, ExtractorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(file_path = ?path, "Static conversion");
        Ok(self.text.clone())
    }
}
