use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use super::ExtractionError;
use super::Extraction;
use super::ExtractorKind;
use super::IdentifierExtractor;
use super::ReceiptContent;
use crate::identifier::Identifier;
use crate::scratch::Scratch;

fn default_extension_len() -> usize {
    4
}

/// One known receipt filename convention.
///
/// Lengths are counted in characters, not bytes: the `№` sign in the
/// bank's markers is a single character but three UTF-8 bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilenameFormat {
    pub name: String,
    /// Literal the file name must begin with.
    pub marker: String,
    /// Number of leading characters dropped before the identifier.
    pub prefix_len: usize,
    /// Number of trailing characters dropped after the identifier (`.pdf`).
    #[serde(default = "default_extension_len")]
    pub extension_len: usize,
}

impl FilenameFormat {
    pub fn v1() -> Self {
        Self {
            name: "v1".to_string(),
            marker: "transfer-receipt-№".to_string(),
            prefix_len: 18,
            extension_len: 4,
        }
    }

    pub fn v2() -> Self {
        Self {
            name: "v2".to_string(),
            marker: "kz-transfer-receipt-№".to_string(),
            prefix_len: 21,
            extension_len: 4,
        }
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "v1" => Some(Self::v1()),
            "v2" => Some(Self::v2()),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let marker_len = self.marker.chars().count();
        if marker_len == 0 {
            return Err(format!("filename format '{}' has an empty marker", self.name));
        }
        if self.prefix_len < marker_len {
            return Err(format!(
                "filename format '{}' prefix length {} is shorter than its marker ({marker_len} characters)",
                self.name, self.prefix_len
            ));
        }
        Ok(())
    }

    pub fn matches(&self, file_name: &str) -> bool {
        file_name.starts_with(&self.marker)
    }

    /// Callers must check [`FilenameFormat::matches`] first; a name that
    /// carries the marker but no digit run between prefix and extension is
    /// still a format mismatch.
    pub fn identifier_from(&self, file_name: &str) -> Result<Identifier, ExtractionError> {
        let chars: Vec<char> = file_name.chars().collect();
        let end = chars.len().saturating_sub(self.extension_len);
        if end <= self.prefix_len {
            return Err(ExtractionError::mismatch(format!(
                "file name '{file_name}' is too short for format {}",
                self.name
            )));
        }
        let candidate: String = chars[self.prefix_len..end].iter().collect();
        if !candidate.chars().all(|c| c.is_ascii_digit()) {
            return Err(ExtractionError::mismatch(format!(
                "file name '{file_name}' has no numeric identifier for format {}",
                self.name
            )));
        }
        Identifier::new(candidate)
            .ok_or_else(|| ExtractionError::mismatch(format!("file name '{file_name}' is empty")))
    }
}

/// Reads the identifier out of the document's declared file name.
#[derive(Debug, Clone)]
pub struct FilenameConventionExtractor {
    formats: Vec<FilenameFormat>,
}

impl FilenameConventionExtractor {
    pub fn new(formats: Vec<FilenameFormat>) -> Self {
        Self { formats }
    }

    pub fn formats(&self) -> &[FilenameFormat] {
        &self.formats
    }

    pub fn extract_from_name(&self, file_name: &str) -> Result<Identifier, ExtractionError> {
        let mut last_error = None;
        for format in self.formats.iter().filter(|format| format.matches(file_name)) {
            match format.identifier_from(file_name) {
                Ok(identifier) => {
                    tracing::debug!(format = %format.name, %identifier, "matched filename convention");
                    return Ok(identifier);
                }
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            ExtractionError::mismatch(format!(
                "file name '{file_name}' does not follow a known receipt convention"
            ))
        }))
    }
}

#[async_trait]
impl IdentifierExtractor for FilenameConventionExtractor {
    fn kind(&self) -> ExtractorKind {
        ExtractorKind::Filename
    }

    async fn extract(
        &self,
        content: &ReceiptContent,
        _scratch: &Scratch,
    ) -> Result<Extraction, ExtractionError> {
        let ReceiptContent::Document(document) = content else {
            return Err(ExtractionError::mismatch("expected a document attachment"));
        };
        let Some(file_name) = document.file_name.as_deref() else {
            return Err(ExtractionError::mismatch("document has no file name"));
        };
        self.extract_from_name(file_name).map(Extraction::new)
    }
}
