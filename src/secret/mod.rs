//! Credential cache backed by an external secret store
//!
//! One [`AwsCredentials`] is cached per role reference, under a composite key
//! derived from the tool name and the normalized role. The backend keeps a
//! registry of every key it wrote so the cache can be cleared without
//! enumerating the OS keychain.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    aws::AwsCredentials,
    constants::SELF_NAME,
    error::{Error, Result},
};

pub mod keychain;

pub use self::keychain::{KeychainBackend, KeyRegistry};

/// Storage for serialized secrets
pub trait SecretBackend: Send + Sync {
    /// `Ok(None)` when the key has no entry
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key` and register the key
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove the entry and unregister the key; a missing entry is not an error
    fn delete(&self, key: &str) -> Result<()>;

    /// Every key written through this backend
    fn list_keys(&self) -> Result<Vec<String>>;
}

impl<T: SecretBackend + ?Sized> SecretBackend for &T {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn list_keys(&self) -> Result<Vec<String>> {
        (**self).list_keys()
    }
}

/// Composite cache key for a role reference
///
/// Stable for equal (trimmed) references; the UUIDv5 tag keeps references
/// that sanitize to the same token apart.
pub fn composite_key(role: &str) -> String {
    let role = role.trim();
    let sanitized: String = role
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let tag = Uuid::new_v5(&Uuid::NAMESPACE_OID, role.as_bytes()).simple().to_string();

    format!("{SELF_NAME}-{sanitized}-{}", &tag[..12])
}

/// Clock side of the validity decision
///
/// Valid iff `now < expiration - reload_before`.
pub fn is_fresh(creds: &AwsCredentials, reload_before_secs: i64, now: DateTime<Utc>) -> bool {
    now < creds.expiration - Duration::seconds(reload_before_secs)
}

/// Cache of credentials for a single role reference
pub struct SecretStore<B> {
    backend: B,
    key: String,
}

impl<B: SecretBackend> SecretStore<B> {
    pub fn new(backend: B, role: &str) -> Self {
        Self {
            backend,
            key: composite_key(role),
        }
    }

    /// Load the cached credentials, if any
    ///
    /// An entry that no longer deserializes is treated as absent.
    pub fn load(&self) -> Result<Option<AwsCredentials>> {
        let Some(raw) = self.backend.get(&self.key)? else {
            debug!("No cached credentials under {}", self.key);
            return Ok(None);
        };

        match serde_json::from_str(&raw) {
            Ok(creds) => Ok(Some(creds)),
            Err(e) => {
                warn!("Ignoring unreadable cached credentials under {}: {}", self.key, e);
                Ok(None)
            }
        }
    }

    /// Cache `creds`, replacing any previous entry
    pub fn save(&self, creds: &AwsCredentials) -> Result<()> {
        let raw = serde_json::to_string(creds)?;
        self.backend.set(&self.key, &raw)?;
        debug!("Cached credentials under {}", self.key);
        Ok(())
    }

    /// Delete every registered entry
    ///
    /// Every key is attempted; failures are collected into [`Error::ClearAll`].
    pub fn clear_all(&self) -> Result<()> {
        let keys = self.backend.list_keys()?;
        let failures: Vec<String> = keys
            .iter()
            .filter_map(|key| {
                self.backend
                    .delete(key)
                    .err()
                    .map(|e| format!("{key}: {e}"))
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::ClearAll(failures))
        }
    }
}
