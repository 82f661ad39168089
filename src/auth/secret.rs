//! Credential lookup

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

/// Outcome of a secret lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretLookup {
    Found(String),
    NotFound,
    /// The answer arrives later through `Link::credentials_ready`
    Pending,
}

/// Source of authentication secrets, shared by every link
pub trait SecretStore: Send + Sync + fmt::Debug {
    fn lookup(&self, name: &str) -> SecretLookup;
}

/// In-memory secret table
///
/// Names marked with [`defer`](Self::defer) answer `Pending` until a secret
/// is inserted for them.
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, String>>,
    deferred: RwLock<HashSet<String>>,
}

impl MemorySecretStore {
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self {
            secrets: RwLock::new(secrets),
            deferred: RwLock::new(HashSet::new()),
        }
    }

    pub fn insert(&self, name: impl Into<String>, secret: impl Into<String>) {
        let name = name.into();
        self.deferred
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&name);
        self.secrets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, secret.into());
    }

    pub fn remove(&self, name: &str) {
        self.secrets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }

    /// Make lookups for `name` pending
    pub fn defer(&self, name: impl Into<String>) {
        self.deferred
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into());
    }
}

impl SecretStore for MemorySecretStore {
    fn lookup(&self, name: &str) -> SecretLookup {
        if self
            .deferred
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(name)
        {
            return SecretLookup::Pending;
        }
        match self
            .secrets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            Some(secret) => SecretLookup::Found(secret.clone()),
            None => SecretLookup::NotFound,
        }
    }
}
