//! `AuthContext`: a per-stack mutable record carrying the
//! last-authenticated credentials' public metadata. Invariant: it always
//! matches the *last* successful authentication for its stack.

use std::collections::HashMap;

use crate::contracts::Credentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudKind {
	Aws,
	Gcp,
	Azure,
	Mock,
}

impl CloudKind {
	fn of(creds: &Credentials) -> Self {
		match creds {
			Credentials::Aws(_) => CloudKind::Aws,
			Credentials::Gcp(_) => CloudKind::Gcp,
			Credentials::Azure(_) => CloudKind::Azure,
			Credentials::Oidc(_) | Credentials::Mock(_) => CloudKind::Mock,
		}
	}
}

#[derive(Debug, Clone)]
pub struct CloudAuthRecord {
	pub identity_name: String,
	pub expiration: Option<chrono::DateTime<chrono::Utc>>,
	pub environment: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuthContext {
	records: HashMap<CloudKind, CloudAuthRecord>,
}

impl AuthContext {
	pub fn new() -> Self {
		Self::default()
	}

	/// Overwrites this cloud's record with the result of the most recent
	/// authentication — never merges with a stale one.
	pub fn update(&mut self, identity_name: &str, creds: &Credentials, environment: HashMap<String, String>) {
		let kind = CloudKind::of(creds);
		self.records.insert(
			kind,
			CloudAuthRecord {
				identity_name: identity_name.to_string(),
				expiration: creds.expiration(),
				environment,
			},
		);
	}

	pub fn record(&self, kind: CloudKind) -> Option<&CloudAuthRecord> {
		self.records.get(&kind)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::contracts::MockCredentials;

	#[test]
	fn update_overwrites_previous_record_for_same_cloud() {
		let mut ctx = AuthContext::new();
		ctx.update(
			"a",
			&Credentials::Mock(MockCredentials {
				label: "a".into(),
				expiration: None,
				ephemeral: false,
			}),
			HashMap::new(),
		);
		ctx.update(
			"b",
			&Credentials::Mock(MockCredentials {
				label: "b".into(),
				expiration: None,
				ephemeral: false,
			}),
			HashMap::new(),
		);
		assert_eq!(ctx.record(CloudKind::Mock).unwrap().identity_name, "b");
	}
}
