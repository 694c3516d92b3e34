use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use image::ImageFormat;
use regex_lite::Regex;
use thiserror::Error;
use tokio::process::Command;

use super::ExtractionError;
use super::Extraction;
use super::ExtractorKind;
use super::IdentifierExtractor;
use super::ReceiptContent;
use crate::identifier::Identifier;
use crate::scratch::Scratch;

const DECODED_IMAGE_NAME: &str = "receipt.png";

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("failed to launch OCR engine: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("OCR engine exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },
}

/// Text recognition collaborator.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &Path) -> Result<String, OcrError>;
}

/// Runs the `tesseract` command-line tool and reads the text from stdout.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    languages: String,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<PathBuf>, languages: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            languages: languages.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image: &Path) -> Result<String, OcrError> {
        let output = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(OcrError::Spawn)?;
        if !output.status.success() {
            return Err(OcrError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Recognises a photographed receipt and reads the digit run that follows
/// the configured marker (for example `QR987654` yields `987654`).
pub struct OpticalTextExtractor {
    pattern: Regex,
    engine: Arc<dyn OcrEngine>,
}

impl OpticalTextExtractor {
    pub fn new(marker: &str, engine: Arc<dyn OcrEngine>) -> Result<Self, regex_lite::Error> {
        let pattern = Regex::new(&format!("{}([0-9]+)", regex_lite::escape(marker)))?;
        Ok(Self { pattern, engine })
    }

    pub fn find_identifier(&self, text: &str) -> Result<Identifier, ExtractionError> {
        self.pattern
            .captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| Identifier::new(m.as_str()))
            .ok_or_else(|| ExtractionError::mismatch("no identifier marker in recognised text"))
    }

    async fn decode_into(&self, bytes: bytes::Bytes, target: PathBuf) -> Result<(), ExtractionError> {
        tokio::task::spawn_blocking(move || {
            let image = image::load_from_memory(&bytes).map_err(ExtractionError::parse)?;
            image
                .save_with_format(&target, ImageFormat::Png)
                .map_err(ExtractionError::parse)
        })
        .await
        .map_err(ExtractionError::parse)?
    }
}

#[async_trait]
impl IdentifierExtractor for OpticalTextExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Optical
    }

    async fn extract(
        &self,
        content: &ReceiptContent,
        scratch: &Scratch,
    ) -> Result<Extraction, ExtractionError> {
        let ReceiptContent::Photo(bytes) = content else {
            return Err(ExtractionError::mismatch("expected a photo"));
        };
        let image_path = scratch.file(DECODED_IMAGE_NAME);
        self.decode_into(bytes.clone(), image_path.clone()).await?;

        let text = self.engine.recognize(&image_path).await.map_err(|err| {
            tracing::warn!(error = %err, request = %scratch.request_id(), "OCR failed");
            ExtractionError::parse(err)
        })?;
        self.find_identifier(&text).map(Extraction::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use core_test_support::png_bytes;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct CannedOcr {
        text: &'static str,
        seen: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl OcrEngine for CannedOcr {
        async fn recognize(&self, image: &Path) -> Result<String, OcrError> {
            assert!(image.exists(), "decoded image must be on disk");
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(image.to_path_buf());
            }
            Ok(self.text.to_string())
        }
    }

    fn extractor(text: &'static str) -> (OpticalTextExtractor, Arc<CannedOcr>) {
        let ocr = Arc::new(CannedOcr {
            text,
            seen: Mutex::new(Vec::new()),
        });
        let extractor = OpticalTextExtractor::new("QR", ocr.clone()).expect("extractor");
        (extractor, ocr)
    }

    #[test]
    fn finds_first_marker_followed_by_digits() {
        let (extractor, _) = extractor("");
        let id = extractor
            .find_identifier("Payment ... QR987654 ... QR111")
            .expect("identifier");
        assert_eq!(id.as_str(), "987654");
        let id = extractor.find_identifier("QR code QR42").expect("identifier");
        assert_eq!(id.as_str(), "42");
    }

    #[test]
    fn text_without_marker_is_format_mismatch() {
        let (extractor, _) = extractor("");
        assert_matches!(
            extractor.find_identifier("Total 1500"),
            Err(ExtractionError::FormatMismatch(_))
        );
        assert_matches!(
            extractor.find_identifier(""),
            Err(ExtractionError::FormatMismatch(_))
        );
    }

    #[tokio::test]
    async fn recognises_decoded_photo_inside_scratch() {
        let dir = tempdir().expect("tmp");
        let scratch = Scratch::create(dir.path(), &"alice".into()).expect("scratch");
        let (extractor, ocr) = extractor("Receipt\nQR987654\nThanks");
        let extraction = extractor
            .extract(&ReceiptContent::Photo(Bytes::from(png_bytes())), &scratch)
            .await
            .expect("extract");
        assert_eq!(extraction.identifier.as_str(), "987654");

        let seen = ocr.seen.lock().expect("seen").clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with(scratch.path()));
    }

    #[tokio::test]
    async fn corrupt_photo_is_parse_failure() {
        let dir = tempdir().expect("tmp");
        let scratch = Scratch::create(dir.path(), &"alice".into()).expect("scratch");
        let (extractor, ocr) = extractor("QR1");
        let err = extractor
            .extract(&ReceiptContent::Photo(Bytes::from_static(b"garbage")), &scratch)
            .await
            .unwrap_err();
        assert_matches!(err, ExtractionError::ParseFailure(_));
        assert!(ocr.seen.lock().expect("seen").is_empty());
    }
}
