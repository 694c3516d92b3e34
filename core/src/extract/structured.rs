use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use lopdf::Document;
use regex_lite::Regex;

use super::ExtractionError;
use super::Extraction;
use super::ExtractorKind;
use super::IdentifierExtractor;
use super::OnlineReceiptSource;
use super::ReceiptContent;
use crate::identifier::Identifier;
use crate::scratch::Scratch;

/// Extract the concatenated text of every page in a PDF.
pub fn pdf_text(bytes: &[u8]) -> Result<String, ExtractionError> {
    let document = Document::load_mem(bytes).map_err(ExtractionError::parse)?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Err(ExtractionError::parse("document has no pages"));
    }
    document
        .extract_text(&pages)
        .map_err(ExtractionError::parse)
}

/// Patterns locating receipt fields in free text.
///
/// The identifier pattern's first capture group is the identifier; every
/// extra pattern's first capture group becomes a named field.
#[derive(Debug, Clone)]
pub struct FieldPatterns {
    identifier: Regex,
    extra: Vec<(String, Regex)>,
}

impl FieldPatterns {
    pub fn compile(
        identifier: &str,
        extra: &BTreeMap<String, String>,
    ) -> Result<Self, regex_lite::Error> {
        let identifier = Regex::new(identifier)?;
        let extra = extra
            .iter()
            .map(|(name, pattern)| Ok((name.clone(), Regex::new(pattern)?)))
            .collect::<Result<Vec<_>, regex_lite::Error>>()?;
        Ok(Self { identifier, extra })
    }

    pub fn extract(&self, text: &str) -> Result<Extraction, ExtractionError> {
        let identifier = self
            .identifier
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| Identifier::new(m.as_str().trim()))
            .ok_or_else(|| ExtractionError::mismatch("identifier field not found"))?;
        let fields = self
            .extra
            .iter()
            .filter_map(|(name, pattern)| {
                let caps = pattern.captures(text)?;
                let value = caps.get(1)?.as_str().trim();
                (!value.is_empty()).then(|| (name.clone(), value.to_string()))
            })
            .collect();
        Ok(Extraction::new(identifier).with_fields(fields))
    }
}

/// Reads the identifier embedded in a PDF receipt and cross-checks it
/// against an independent online rendering of the same receipt.
pub struct StructuredDocumentExtractor {
    patterns: Arc<FieldPatterns>,
    online: Arc<dyn OnlineReceiptSource>,
}

impl StructuredDocumentExtractor {
    pub fn new(patterns: Arc<FieldPatterns>, online: Arc<dyn OnlineReceiptSource>) -> Self {
        Self { patterns, online }
    }
}

#[async_trait]
impl IdentifierExtractor for StructuredDocumentExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Structured
    }

    async fn extract(
        &self,
        content: &ReceiptContent,
        _scratch: &Scratch,
    ) -> Result<Extraction, ExtractionError> {
        let ReceiptContent::Document(document) = content else {
            return Err(ExtractionError::mismatch("expected a document attachment"));
        };

        let bytes = document.bytes.clone();
        let text = tokio::task::spawn_blocking(move || pdf_text(&bytes))
            .await
            .map_err(ExtractionError::parse)??;
        let mut embedded = self.patterns.extract(&text)?;
        let online = self.online.lookup(document).await?;

        if embedded.identifier.as_str().as_bytes() != online.identifier.as_str().as_bytes() {
            tracing::warn!(
                embedded = %embedded.identifier,
                online = %online.identifier,
                "receipt cross-check failed"
            );
            return Err(ExtractionError::CrossCheckMismatch {
                embedded: embedded.identifier.to_string(),
                online: online.identifier.to_string(),
            });
        }

        for (name, value) in online.fields {
            embedded.fields.entry(name).or_insert(value);
        }
        Ok(embedded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ReceiptDocument;
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use core_test_support::pdf_with_lines;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    const IDENTIFIER: &str = r"(?i:check\s+number):?\s*([0-9]+)";

    struct FixedOnline(&'static str);

    #[async_trait]
    impl OnlineReceiptSource for FixedOnline {
        async fn lookup(
            &self,
            _document: &ReceiptDocument,
        ) -> Result<Extraction, ExtractionError> {
            let identifier = Identifier::new(self.0)
                .ok_or_else(|| ExtractionError::mismatch("empty online identifier"))?;
            Ok(Extraction::new(identifier))
        }
    }

    fn patterns() -> Arc<FieldPatterns> {
        let mut extra = BTreeMap::new();
        extra.insert("amount".to_string(), r"(?i:amount):?\s*([0-9.]+)".to_string());
        Arc::new(FieldPatterns::compile(IDENTIFIER, &extra).expect("patterns"))
    }

    fn receipt() -> ReceiptContent {
        ReceiptContent::Document(ReceiptDocument {
            file_name: Some("receipt.pdf".to_string()),
            mime_type: Some("application/pdf".to_string()),
            bytes: Bytes::from(pdf_with_lines(&["Check number: 48213377", "Amount: 1500.00"])),
        })
    }

    #[test]
    fn reads_pdf_text() {
        let text = pdf_text(&pdf_with_lines(&["Check number: 1"])).expect("text");
        assert!(text.contains("Check number: 1"));
    }

    #[test]
    fn corrupt_pdf_is_parse_failure() {
        assert_matches!(pdf_text(b"not a pdf"), Err(ExtractionError::ParseFailure(_)));
    }

    #[test]
    fn field_patterns_collect_extra_fields() {
        let extraction = patterns()
            .extract("Check number: 77\nAmount: 12.50")
            .expect("extraction");
        assert_eq!(extraction.identifier.as_str(), "77");
        assert_eq!(extraction.fields.get("amount").map(String::as_str), Some("12.50"));
        assert_matches!(
            patterns().extract("nothing here"),
            Err(ExtractionError::FormatMismatch(_))
        );
    }

    #[tokio::test]
    async fn accepts_matching_online_identifier() {
        let dir = tempdir().expect("tmp");
        let scratch = Scratch::create(dir.path(), &"alice".into()).expect("scratch");
        let extractor = StructuredDocumentExtractor::new(patterns(), Arc::new(FixedOnline("48213377")));
        let extraction = extractor.extract(&receipt(), &scratch).await.expect("extract");
        assert_eq!(extraction.identifier.as_str(), "48213377");
        assert_eq!(extraction.fields.get("amount").map(String::as_str), Some("1500.00"));
    }

    #[tokio::test]
    async fn rejects_disagreeing_online_identifier() {
        let dir = tempdir().expect("tmp");
        let scratch = Scratch::create(dir.path(), &"alice".into()).expect("scratch");
        let extractor = StructuredDocumentExtractor::new(patterns(), Arc::new(FixedOnline("48213378")));
        let err = extractor.extract(&receipt(), &scratch).await.unwrap_err();
        assert_eq!(
            err,
            ExtractionError::CrossCheckMismatch {
                embedded: "48213377".to_string(),
                online: "48213378".to_string(),
            }
        );
    }
}
