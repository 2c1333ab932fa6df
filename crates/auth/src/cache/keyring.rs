//! Tier 1 — the platform-native secret store.
//!
//! Long-lived material lives here, keyed by `{realm}/{identity_name}`
//! (or bare `{identity_name}` for an empty realm). Entries carrying an
//! ephemeral marker are never written here.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::contracts::Credentials;
use crate::error::{AuthError, Result};

const SERVICE: &str = "agent-auth";

pub fn key_for(realm: &str, identity: &str) -> String {
	if realm.is_empty() {
		identity.to_string()
	} else {
		format!("{realm}/{identity}")
	}
}

pub trait KeyringBackend: Send + Sync {
	fn store(&self, key: &str, value: &str) -> Result<()>;
	fn retrieve(&self, key: &str) -> Result<Option<String>>;
	fn delete(&self, key: &str) -> Result<()>;
}

/// The real OS-native backend (KWallet / Keychain / Credential Manager /
/// libsecret), via the `keyring` crate.
pub struct OsKeyring;

impl KeyringBackend for OsKeyring {
	fn store(&self, key: &str, value: &str) -> Result<()> {
		let entry = keyring::Entry::new(SERVICE, key).map_err(|e| AuthError::InvalidIdentityConfig {
			name: key.to_string(),
			reason: format!("failed to access keyring: {e}"),
		})?;
		entry
			.set_password(value)
			.map_err(|e| AuthError::InvalidIdentityConfig {
				name: key.to_string(),
				reason: format!("failed to store in keyring: {e}"),
			})
	}

	fn retrieve(&self, key: &str) -> Result<Option<String>> {
		let entry = keyring::Entry::new(SERVICE, key).map_err(|e| AuthError::InvalidIdentityConfig {
			name: key.to_string(),
			reason: format!("failed to access keyring: {e}"),
		})?;
		match entry.get_password() {
			Ok(v) => Ok(Some(v)),
			Err(keyring::Error::NoEntry) => Ok(None),
			Err(e) => Err(AuthError::InvalidIdentityConfig {
				name: key.to_string(),
				reason: format!("failed to read keyring: {e}"),
			}),
		}
	}

	fn delete(&self, key: &str) -> Result<()> {
		let entry = keyring::Entry::new(SERVICE, key).map_err(|e| AuthError::InvalidIdentityConfig {
			name: key.to_string(),
			reason: format!("failed to access keyring: {e}"),
		})?;
		match entry.delete_credential() {
			Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
			Err(e) => Err(AuthError::InvalidIdentityConfig {
				name: key.to_string(),
				reason: format!("failed to delete from keyring: {e}"),
			}),
		}
	}
}

/// An in-memory test-mode backend, also usable as the "noop" keyring that
/// forces cold-start loading from the on-disk tier.
#[derive(Default)]
pub struct InMemoryKeyring {
	entries: Mutex<HashMap<String, String>>,
}

impl KeyringBackend for InMemoryKeyring {
	fn store(&self, key: &str, value: &str) -> Result<()> {
		self.entries.lock().unwrap().insert(key.to_string(), value.to_string());
		Ok(())
	}

	fn retrieve(&self, key: &str) -> Result<Option<String>> {
		Ok(self.entries.lock().unwrap().get(key).cloned())
	}

	fn delete(&self, key: &str) -> Result<()> {
		self.entries.lock().unwrap().remove(key);
		Ok(())
	}
}

pub struct KeyringCache {
	backend: Box<dyn KeyringBackend>,
}

impl KeyringCache {
	pub fn new(backend: Box<dyn KeyringBackend>) -> Self {
		Self { backend }
	}

	pub fn in_memory() -> Self {
		Self::new(Box::new(InMemoryKeyring::default()))
	}

	pub fn os_native() -> Self {
		Self::new(Box::new(OsKeyring))
	}

	/// Writes `creds` under `{realm}/{identity}` unless the credential is
	/// ephemeral — the sole choke point enforcing that rule.
	pub fn store_if_eligible(&self, realm: &str, identity: &str, creds: &Credentials) -> Result<bool> {
		if creds.is_ephemeral() {
			return Ok(false);
		}
		let key = key_for(realm, identity);
		let serialized = serde_json::to_string(creds).map_err(|e| AuthError::InvalidIdentityConfig {
			name: identity.to_string(),
			reason: e.to_string(),
		})?;
		self.backend.store(&key, &serialized)?;
		Ok(true)
	}

	/// A usable entry is present, not expired, and deserializes cleanly;
	/// no network call ever happens here.
	pub fn retrieve(&self, realm: &str, identity: &str) -> Result<Option<Credentials>> {
		let key = key_for(realm, identity);
		let Some(raw) = self.backend.retrieve(&key)? else {
			return Ok(None);
		};
		let creds: Credentials = match serde_json::from_str(&raw) {
			Ok(c) => c,
			Err(_) => return Ok(None),
		};
		if creds.is_expired() {
			return Ok(None);
		}
		Ok(Some(creds))
	}

	pub fn delete(&self, realm: &str, identity: &str) -> Result<()> {
		self.backend.delete(&key_for(realm, identity))
	}

	/// Probes the empty realm, for the realm-mismatch warning when the
	/// current realm is non-empty.
	pub fn probe_empty_realm(&self, identity: &str) -> Result<bool> {
		Ok(self.backend.retrieve(&key_for("", identity))?.is_some())
	}
}
