use std::path::PathBuf;

use indexmap::IndexMap;

use serde_json::Value;

use super::StoreError;
use super::snapshot::SnapshotFile;
use crate::identifier::UserKey;

/// Ordered set of users persisted as `{username: true}`.
#[derive(Debug)]
struct UserSet {
    file: SnapshotFile,
    users: IndexMap<UserKey, bool>,
}

impl UserSet {
    /// Any value other than `false` counts as membership.
    fn load(path: PathBuf) -> Self {
        let (file, raw): (_, IndexMap<UserKey, Value>) = SnapshotFile::load(path);
        let users = raw
            .into_iter()
            .filter(|(_, present)| *present != Value::Bool(false))
            .map(|(user, _)| (user, true))
            .collect();
        Self { file, users }
    }

    fn add(&mut self, user: &UserKey) -> Result<bool, StoreError> {
        if self.users.contains_key(user) {
            return Ok(false);
        }
        self.users.insert(user.clone(), true);
        if let Err(err) = self.file.save(&self.users) {
            self.users.shift_remove(user);
            return Err(err);
        }
        Ok(true)
    }

    fn contains(&self, user: &UserKey) -> bool {
        self.users.contains_key(user)
    }

    fn list(&self) -> Vec<UserKey> {
        self.users.keys().cloned().collect()
    }
}

/// Users who submitted at least one accepted receipt.
#[derive(Debug)]
pub struct WhitelistStore(UserSet);

impl WhitelistStore {
    pub fn load(path: PathBuf) -> Self {
        Self(UserSet::load(path))
    }

    /// Idempotent; returns whether the user was newly added.
    pub fn add(&mut self, user: &UserKey) -> Result<bool, StoreError> {
        self.0.add(user)
    }

    pub fn contains(&self, user: &UserKey) -> bool {
        self.0.contains(user)
    }

    /// Members in first-insertion order.
    pub fn list_all(&self) -> Vec<UserKey> {
        self.0.list()
    }

    pub fn len(&self) -> usize {
        self.0.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.users.is_empty()
    }
}

/// Users elevated to administrator. Membership only grows.
#[derive(Debug)]
pub struct AdminSet(UserSet);

impl AdminSet {
    pub fn load(path: PathBuf) -> Self {
        Self(UserSet::load(path))
    }

    pub fn add(&mut self, user: &UserKey) -> Result<bool, StoreError> {
        self.0.add(user)
    }

    pub fn contains(&self, user: &UserKey) -> bool {
        self.0.contains(user)
    }

    pub fn list(&self) -> Vec<UserKey> {
        self.0.list()
    }
}
