//! OS keychain secret backend
//!
//! - macOS: Keychain
//! - Linux: Secret Service (GNOME Keyring, KWallet)
//! - Windows: Credential Manager

use std::{collections::BTreeSet, path::PathBuf};

use ::keyring::Entry;
use tracing::{debug, warn};

use super::SecretBackend;
use crate::{
    error::{Error, Result},
    persist,
};

/// Keys written by this tool, persisted as a JSON array
///
/// The OS keychains cannot be enumerated by service prefix, so the registry
/// is what `clear-cache` walks.
#[derive(Debug, Clone)]
pub struct KeyRegistry {
    path: PathBuf,
}

impl KeyRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn keys(&self) -> Result<BTreeSet<String>> {
        if !self.path.exists() {
            return Ok(BTreeSet::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeSet::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn register(&self, key: &str) -> Result<()> {
        let mut keys = self.keys()?;
        if keys.insert(key.to_string()) {
            self.write(&keys)?;
        }
        Ok(())
    }

    pub fn unregister(&self, key: &str) -> Result<()> {
        let mut keys = self.keys()?;
        if keys.remove(key) {
            self.write(&keys)?;
        }
        Ok(())
    }

    fn write(&self, keys: &BTreeSet<String>) -> Result<()> {
        let raw = serde_json::to_vec_pretty(keys)?;
        persist::write_atomically(&self.path, &raw)
    }
}

/// Secret backend storing one keychain entry per key
///
/// Entries use the key as service name and the OS user as account.
pub struct KeychainBackend {
    username: String,
    registry: KeyRegistry,
}

impl KeychainBackend {
    pub fn new(username: impl Into<String>, registry: KeyRegistry) -> Self {
        Self {
            username: username.into(),
            registry,
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(key, &self.username).map_err(|e| {
            Error::SecretBackend(format!("failed to access keychain entry {key}: {e}"))
        })
    }
}

impl SecretBackend for KeychainBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(::keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::SecretBackend(format!(
                "failed to read keychain entry {key}: {e}"
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?.set_password(value).map_err(|e| {
            Error::SecretBackend(format!("failed to write keychain entry {key}: {e}"))
        })?;
        // an unregistered key is only skipped by clear-cache
        if let Err(e) = self.registry.register(key) {
            warn!("Failed to register keychain entry {}: {}", key, e);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => {}
            Err(::keyring::Error::NoEntry) => debug!("Keychain entry {} already gone", key),
            Err(e) => {
                return Err(Error::SecretBackend(format!(
                    "failed to delete keychain entry {key}: {e}"
                )));
            }
        }
        self.registry.unregister(key)
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        Ok(self.registry.keys()?.into_iter().collect())
    }
}
