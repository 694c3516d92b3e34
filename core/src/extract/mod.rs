//! Identifier extraction strategies.
//!
//! Every strategy implements [`IdentifierExtractor`]; [`ExtractorSet`] picks
//! the one matching the submitted content so the intake pipeline has a
//! single call site regardless of how the identifier is recovered.

mod filename;
mod online;
mod optical;
mod structured;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::identifier::Identifier;
use crate::scratch::Scratch;

pub use filename::FilenameConventionExtractor;
pub use filename::FilenameFormat;
pub use online::HttpReceiptLookup;
pub use online::OnlineReceiptSource;
pub use optical::OcrEngine;
pub use optical::OcrError;
pub use optical::OpticalTextExtractor;
pub use optical::TesseractOcr;
pub use structured::FieldPatterns;
pub use structured::StructuredDocumentExtractor;
pub use structured::pdf_text;

pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Tag naming the strategy that produced an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorKind {
    Structured,
    Filename,
    Optical,
}

impl ExtractorKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            ExtractorKind::Structured => "structured",
            ExtractorKind::Filename => "filename",
            ExtractorKind::Optical => "optical",
        }
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "structured" => Ok(ExtractorKind::Structured),
            "filename" => Ok(ExtractorKind::Filename),
            "optical" => Ok(ExtractorKind::Optical),
            other => Err(format!("unknown extractor '{other}'")),
        }
    }
}

/// A document attachment as delivered by the transport.
#[derive(Debug, Clone)]
pub struct ReceiptDocument {
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub bytes: Bytes,
}

impl ReceiptDocument {
    pub fn is_pdf(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|mime| mime.eq_ignore_ascii_case(PDF_MIME_TYPE))
    }
}

/// Raw receipt content handed to an extractor.
#[derive(Debug, Clone)]
pub enum ReceiptContent {
    Document(ReceiptDocument),
    Photo(Bytes),
}

/// Successful extraction: the identifier plus any extra fields the
/// strategy could read (for example `amount`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub identifier: Identifier,
    pub fields: BTreeMap<String, String>,
}

impl Extraction {
    pub fn new(identifier: Identifier) -> Self {
        Self {
            identifier,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.fields = fields;
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    /// Wrong content type, or no recognised filename/marker/field.
    #[error("receipt format not recognised: {0}")]
    FormatMismatch(String),
    /// The underlying document, image or OCR step failed.
    #[error("failed to parse receipt: {0}")]
    ParseFailure(String),
    #[error("embedded identifier '{embedded}' does not match online identifier '{online}'")]
    CrossCheckMismatch { embedded: String, online: String },
}

impl ExtractionError {
    pub(crate) fn mismatch(reason: impl Into<String>) -> Self {
        Self::FormatMismatch(reason.into())
    }

    pub(crate) fn parse(reason: impl fmt::Display) -> Self {
        Self::ParseFailure(reason.to_string())
    }
}

/// One strategy for turning raw receipt content into an [`Identifier`].
#[async_trait]
pub trait IdentifierExtractor: Send + Sync {
    fn kind(&self) -> ExtractorKind;

    /// `scratch` is private to the current request; anything written there
    /// is removed when the request finishes.
    async fn extract(
        &self,
        content: &ReceiptContent,
        scratch: &Scratch,
    ) -> Result<Extraction, ExtractionError>;
}

/// Routes documents and photos to the extractor configured for them.
#[derive(Clone)]
pub struct ExtractorSet {
    document: Arc<dyn IdentifierExtractor>,
    photo: Arc<dyn IdentifierExtractor>,
}

impl ExtractorSet {
    pub fn new(document: Arc<dyn IdentifierExtractor>, photo: Arc<dyn IdentifierExtractor>) -> Self {
        Self { document, photo }
    }

    pub fn document_kind(&self) -> ExtractorKind {
        self.document.kind()
    }

    /// Only PDF documents and photos are accepted; anything else is a
    /// format mismatch before any extractor runs.
    pub fn select(
        &self,
        content: &ReceiptContent,
    ) -> Result<&dyn IdentifierExtractor, ExtractionError> {
        match content {
            ReceiptContent::Document(document) if document.is_pdf() => Ok(self.document.as_ref()),
            ReceiptContent::Document(document) => Err(ExtractionError::mismatch(format!(
                "unsupported document type {}",
                document.mime_type.as_deref().unwrap_or("<none>")
            ))),
            ReceiptContent::Photo(_) => Ok(self.photo.as_ref()),
        }
    }

    pub async fn extract(
        &self,
        content: &ReceiptContent,
        scratch: &Scratch,
    ) -> Result<(ExtractorKind, Extraction), ExtractionError> {
        let extractor = self.select(content)?;
        let extraction = extractor.extract(content, scratch).await?;
        Ok((extractor.kind(), extraction))
    }
}

impl fmt::Debug for ExtractorSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorSet")
            .field("document", &self.document.kind())
            .field("photo", &self.photo.kind())
            .finish()
    }
}
