//! Password-gated promotion to the admin set.

use std::fmt;

use crate::identifier::UserKey;
use crate::store::SharedStores;
use crate::store::StoreError;

/// The configured admin password. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AdminSecret(String);

impl AdminSecret {
    /// Returns `None` for an empty password so an unset secret cannot be
    /// matched by an empty message.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        (!value.is_empty()).then_some(Self(value))
    }

    fn matches(&self, candidate: &str) -> bool {
        self.0 == candidate
    }
}

impl fmt::Debug for AdminSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AdminSecret(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elevation {
    Elevated,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct AdminElevationGate {
    secret: Option<AdminSecret>,
    stores: SharedStores,
}

impl AdminElevationGate {
    pub fn new(secret: Option<AdminSecret>, stores: SharedStores) -> Self {
        if secret.is_none() {
            tracing::warn!("no admin password configured; elevation is disabled");
        }
        Self { secret, stores }
    }

    pub fn is_admin(&self, user: &UserKey) -> Result<bool, StoreError> {
        self.stores.is_admin(user)
    }

    /// Compare `candidate` with the configured secret and, on a match, add
    /// `user` to the admin set.
    pub fn attempt(&self, user: &UserKey, candidate: &str) -> Result<Elevation, StoreError> {
        let matched = self
            .secret
            .as_ref()
            .is_some_and(|secret| secret.matches(candidate));
        if !matched {
            tracing::info!(%user, "admin elevation rejected");
            return Ok(Elevation::Rejected);
        }
        let added = self.stores.with(|stores| stores.admins.add(user))??;
        tracing::info!(%user, newly_added = added, "admin elevation granted");
        Ok(Elevation::Elevated)
    }
}
