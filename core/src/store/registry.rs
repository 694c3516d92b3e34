use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;
use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use super::StoreError;
use super::snapshot::SnapshotFile;
use crate::extract::ExtractorKind;
use crate::identifier::Identifier;
use crate::identifier::UserKey;

/// What the registry remembers about an accepted receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub submitter: UserKey,
    pub source: ExtractorKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    pub ingested_at: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn new(submitter: UserKey, source: ExtractorKind, fields: BTreeMap<String, String>) -> Self {
        Self {
            submitter,
            source,
            fields,
            ingested_at: Utc::now(),
        }
    }
}

/// A registry entry as stored on disk.
///
/// Entries written by earlier deployments (or by a newer schema) do not
/// parse as [`SubmissionRecord`]; they are kept verbatim so their
/// identifiers stay registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Current(SubmissionRecord),
    Legacy(serde_json::Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Duplicate,
}

/// Every identifier ever accepted, persisted as `{identifier: record}`.
///
/// Entries are never removed in normal operation; the only removal path is
/// the rollback of an insert whose follow-up whitelist write failed.
#[derive(Debug)]
pub struct DedupRegistry {
    file: SnapshotFile,
    records: IndexMap<Identifier, StoredRecord>,
}

impl DedupRegistry {
    pub fn load(path: PathBuf) -> Self {
        let (file, records): (_, IndexMap<Identifier, StoredRecord>) = SnapshotFile::load(path);
        let legacy = records
            .values()
            .filter(|record| matches!(record, StoredRecord::Legacy(_)))
            .count();
        if file.is_damaged() {
            tracing::error!(
                path = %file.path().display(),
                "registry could not be parsed; restore it from the .bak1 copy taken on the next write"
            );
        }
        if legacy > 0 {
            tracing::warn!(
                path = %file.path().display(),
                legacy,
                "registry holds entries in an older format; they still count as registered"
            );
        }
        Self { file, records }
    }

    /// Membership test and insertion in one step. The record is only kept
    /// when the snapshot containing it reached disk.
    pub fn check_and_insert(
        &mut self,
        identifier: Identifier,
        record: SubmissionRecord,
    ) -> Result<Admission, StoreError> {
        if self.records.contains_key(&identifier) {
            tracing::debug!(%identifier, "identifier already registered");
            return Ok(Admission::Duplicate);
        }
        self.records
            .insert(identifier.clone(), StoredRecord::Current(record));
        if let Err(err) = self.save() {
            self.records.shift_remove(&identifier);
            return Err(err);
        }
        Ok(Admission::Accepted)
    }

    pub(crate) fn retract(&mut self, identifier: &Identifier) -> Result<(), StoreError> {
        if self.records.shift_remove(identifier).is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// The record for `identifier`, or `None` when it is unknown or stored
    /// in an older format.
    pub fn get(&self, identifier: &Identifier) -> Option<&SubmissionRecord> {
        match self.records.get(identifier)? {
            StoredRecord::Current(record) => Some(record),
            StoredRecord::Legacy(_) => None,
        }
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.records.contains_key(identifier)
    }

    /// Number of registered identifiers, legacy entries included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in insertion order. Legacy entries carry no submitter and are
    /// skipped.
    pub fn iter(&self) -> impl Iterator<Item = (&Identifier, &SubmissionRecord)> {
        self.records.iter().filter_map(|(identifier, record)| match record {
            StoredRecord::Current(record) => Some((identifier, record)),
            StoredRecord::Legacy(_) => None,
        })
    }

    fn save(&mut self) -> Result<(), StoreError> {
        self.file.save(&self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn id(value: &str) -> Identifier {
        Identifier::new(value).expect("identifier")
    }

    fn record(user: &str) -> SubmissionRecord {
        SubmissionRecord::new(user.into(), ExtractorKind::Filename, BTreeMap::new())
    }

    #[test]
    fn second_insert_of_same_identifier_is_duplicate() {
        let dir = tempdir().expect("tmp");
        let mut registry = DedupRegistry::load(dir.path().join("paychecks.json"));
        assert_eq!(
            registry.check_and_insert(id("1"), record("alice")).expect("insert"),
            Admission::Accepted
        );
        assert_eq!(
            registry.check_and_insert(id("1"), record("bob")).expect("insert"),
            Admission::Duplicate
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get(&id("1")).map(|r| r.submitter.as_str()),
            Some("alice")
        );
    }

    #[test]
    fn survives_reload() {
        let dir = tempdir().expect("tmp");
        let path = dir.path().join("paychecks.json");
        let mut registry = DedupRegistry::load(path.clone());
        registry.check_and_insert(id("10"), record("alice")).expect("insert");
        registry.check_and_insert(id("20"), record("bob")).expect("insert");

        let reloaded = DedupRegistry::load(path);
        let ids: Vec<&str> = reloaded.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["10", "20"]);
        assert_eq!(
            reloaded.get(&id("20")).map(|r| r.source),
            Some(ExtractorKind::Filename)
        );
    }

    #[test]
    fn failed_write_leaves_identifier_unregistered() {
        let dir = tempdir().expect("tmp");
        let path = dir.path().join("paychecks.json");
        std::fs::create_dir(&path).expect("dir in the way");
        let mut registry = DedupRegistry::load(path);
        assert!(registry.check_and_insert(id("1"), record("alice")).is_err());
        assert!(!registry.contains(&id("1")));
        assert!(registry.is_empty());
    }

    #[test]
    fn unparseable_entries_stay_registered() {
        let dir = tempdir().expect("tmp");
        let path = dir.path().join("paychecks.json");
        std::fs::write(
            &path,
            r#"{
                "111": {"submitter": "alice", "source": "filename", "ingested_at": "2026-01-01T00:00:00Z"},
                "222": {"submitter": "bob", "source": "ocr", "ingested_at": "2026-01-01T00:00:00Z"},
                "123456": {"check_number": "123456", "amount": "1500"}
            }"#,
        )
        .expect("write");

        let mut registry = DedupRegistry::load(path.clone());
        assert_eq!(registry.len(), 3);
        for existing in ["111", "222", "123456"] {
            assert_eq!(
                registry.check_and_insert(id(existing), record("mallory")).expect("insert"),
                Admission::Duplicate
            );
        }
        assert!(registry.get(&id("123456")).is_none());
        let submitters: Vec<&str> = registry.iter().map(|(_, r)| r.submitter.as_str()).collect();
        assert_eq!(submitters, vec!["alice"]);

        registry.check_and_insert(id("333"), record("carol")).expect("insert");
        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(on_disk["123456"]["check_number"], "123456");
        assert_eq!(on_disk["222"]["source"], "ocr");
        assert_eq!(DedupRegistry::load(path).len(), 4);
    }

    #[test]
    fn corrupt_registry_is_backed_up_before_rewrite() {
        let dir = tempdir().expect("tmp");
        let path = dir.path().join("paychecks.json");
        std::fs::write(&path, r#"{"111": {"submitter": "#).expect("write");

        let mut registry = DedupRegistry::load(path.clone());
        assert!(registry.is_empty());
        registry.check_and_insert(id("1"), record("alice")).expect("insert");

        let backup = super::super::snapshot::backup_path(&path, 1);
        assert_eq!(
            std::fs::read_to_string(backup).expect("backup"),
            r#"{"111": {"submitter": "#
        );
        assert!(DedupRegistry::load(path).contains(&id("1")));
    }
}
