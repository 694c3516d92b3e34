//! Durable state: the dedup registry, the whitelist and the admin set.
//!
//! Each store is a JSON snapshot rewritten atomically on every mutation.
//! All three live behind one lock ([`SharedStores`]) and their methods are
//! synchronous, so an admission decision and the writes that follow it can
//! never interleave with another request.

mod registry;
mod snapshot;
mod users;

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use thiserror::Error;

use crate::identifier::Identifier;
use crate::identifier::UserKey;

pub use registry::Admission;
pub use registry::DedupRegistry;
pub use registry::SubmissionRecord;
pub use users::AdminSet;
pub use users::WhitelistStore;

pub const REGISTRY_FILE: &str = "paychecks.json";
pub const WHITELIST_FILE: &str = "whitelist.json";
pub const ADMINS_FILE: &str = "admins.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create data directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to back up unreadable store {path}: {source}")]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialise {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store lock poisoned")]
    Poisoned,
}

#[derive(Debug)]
pub struct Stores {
    pub registry: DedupRegistry,
    pub whitelist: WhitelistStore,
    pub admins: AdminSet,
}

impl Stores {
    /// Load all three stores from `data_dir` and repair a whitelist that is
    /// missing submitters of registered receipts.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        std::fs::create_dir_all(data_dir).map_err(|source| StoreError::CreateDir {
            path: data_dir.to_path_buf(),
            source,
        })?;
        let mut stores = Self::load(data_dir);
        let repaired = stores.reconcile()?;
        if repaired > 0 {
            tracing::warn!(repaired, "restored whitelist entries for registered submitters");
        }
        tracing::info!(
            receipts = stores.registry.len(),
            whitelisted = stores.whitelist.len(),
            "stores loaded"
        );
        Ok(stores)
    }

    /// Read the stores as they are on disk. Nothing is written until a
    /// mutating method is called.
    pub fn load(data_dir: &Path) -> Self {
        Self {
            registry: DedupRegistry::load(data_dir.join(REGISTRY_FILE)),
            whitelist: WhitelistStore::load(data_dir.join(WHITELIST_FILE)),
            admins: AdminSet::load(data_dir.join(ADMINS_FILE)),
        }
    }

    /// Registered submitters absent from the whitelist, in registry order.
    pub fn missing_submitters(&self) -> Vec<UserKey> {
        let mut missing: Vec<UserKey> = Vec::new();
        for (_, record) in self.registry.iter() {
            if !self.whitelist.contains(&record.submitter) && !missing.contains(&record.submitter) {
                missing.push(record.submitter.clone());
            }
        }
        missing
    }

    /// Add every registered submitter missing from the whitelist. Returns
    /// how many users were added.
    pub fn reconcile(&mut self) -> Result<usize, StoreError> {
        let mut added = 0;
        for user in self.missing_submitters() {
            if self.whitelist.add(&user)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Register `identifier` and whitelist its submitter as one unit.
    ///
    /// When the whitelist write fails the registry insert is undone, so the
    /// same receipt can be submitted again once storage recovers.
    pub fn admit(
        &mut self,
        identifier: Identifier,
        record: SubmissionRecord,
    ) -> Result<Admission, StoreError> {
        let submitter = record.submitter.clone();
        match self.registry.check_and_insert(identifier.clone(), record)? {
            Admission::Duplicate => return Ok(Admission::Duplicate),
            Admission::Accepted => {}
        }
        if let Err(err) = self.whitelist.add(&submitter) {
            if let Err(rollback) = self.registry.retract(&identifier) {
                tracing::error!(
                    error = %rollback,
                    %identifier,
                    "failed to roll back registry insert"
                );
            }
            return Err(err);
        }
        Ok(Admission::Accepted)
    }
}

#[derive(Debug, Clone)]
pub struct SharedStores(Arc<Mutex<Stores>>);

impl SharedStores {
    pub fn new(stores: Stores) -> Self {
        Self(Arc::new(Mutex::new(stores)))
    }

    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        Stores::open(data_dir).map(Self::new)
    }

    /// Run `f` with exclusive access to every store. `f` is synchronous so
    /// the lock is never held across an await point.
    pub fn with<R>(&self, f: impl FnOnce(&mut Stores) -> R) -> Result<R, StoreError> {
        let mut guard = self.0.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut guard))
    }

    pub fn admit(
        &self,
        identifier: Identifier,
        record: SubmissionRecord,
    ) -> Result<Admission, StoreError> {
        self.with(|stores| stores.admit(identifier, record))?
    }

    pub fn whitelist(&self) -> Result<Vec<UserKey>, StoreError> {
        self.with(|stores| stores.whitelist.list_all())
    }

    pub fn is_admin(&self, user: &UserKey) -> Result<bool, StoreError> {
        self.with(|stores| stores.admins.contains(user))
    }
}
