//! Receipt intake: extraction followed by the dedup-and-whitelist step.

use std::path::PathBuf;

use thiserror::Error;

use crate::extract::ExtractionError;
use crate::extract::ExtractorKind;
use crate::extract::ExtractorSet;
use crate::extract::ReceiptContent;
use crate::identifier::Identifier;
use crate::identifier::UserKey;
use crate::scratch::Scratch;
use crate::store::Admission;
use crate::store::SharedStores;
use crate::store::StoreError;
use crate::store::SubmissionRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    Accepted {
        identifier: Identifier,
        source: ExtractorKind,
    },
    Duplicate {
        identifier: Identifier,
    },
}

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("failed to allocate scratch space: {0}")]
    Scratch(#[source] std::io::Error),
}

/// Façade tying extractors to the stores.
#[derive(Debug, Clone)]
pub struct ReceiptIntake {
    extractors: ExtractorSet,
    stores: SharedStores,
    scratch_root: PathBuf,
}

impl ReceiptIntake {
    pub fn new(extractors: ExtractorSet, stores: SharedStores, scratch_root: PathBuf) -> Self {
        Self {
            extractors,
            stores,
            scratch_root,
        }
    }

    pub fn stores(&self) -> &SharedStores {
        &self.stores
    }

    /// Extract an identifier from `content` and record it for `user`.
    ///
    /// Extraction may suspend (downloads, OCR, HTTP lookups); the admission
    /// decision afterwards runs entirely under the store lock.
    pub async fn submit(
        &self,
        user: &UserKey,
        content: &ReceiptContent,
    ) -> Result<IntakeOutcome, IntakeError> {
        let scratch = Scratch::create(&self.scratch_root, user).map_err(IntakeError::Scratch)?;
        let request = scratch.request_id();

        let (source, extraction) = match self.extractors.extract(content, &scratch).await {
            Ok(extracted) => extracted,
            Err(err) => {
                tracing::info!(%user, %request, error = %err, "receipt extraction failed");
                return Err(err.into());
            }
        };
        drop(scratch);

        let identifier = extraction.identifier;
        let record = SubmissionRecord::new(user.clone(), source, extraction.fields);
        let admission = self
            .stores
            .admit(identifier.clone(), record)
            .inspect_err(|err| {
                tracing::error!(%user, %request, %identifier, error = %err, "failed to persist submission");
            })?;

        match admission {
            Admission::Accepted => {
                tracing::info!(%user, %request, %identifier, %source, "receipt accepted");
                Ok(IntakeOutcome::Accepted { identifier, source })
            }
            Admission::Duplicate => {
                tracing::info!(%user, %request, %identifier, "duplicate receipt");
                Ok(IntakeOutcome::Duplicate { identifier })
            }
        }
    }
}
