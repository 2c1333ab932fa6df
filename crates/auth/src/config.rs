//! The `AuthConfig` data model. Loading and merging
//! multiple YAML sources is an external collaborator's job; this module
//! only shapes the already-merged document.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
	#[serde(default)]
	pub realm: Option<String>,
	#[serde(default)]
	pub providers: HashMap<String, ProviderDef>,
	#[serde(default)]
	pub identities: HashMap<String, IdentityDef>,
}

impl AuthConfig {
	pub fn realm(&self) -> &str {
		self.realm.as_deref().unwrap_or("")
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDef {
	pub kind: String,
	#[serde(default)]
	pub spec: serde_json::Map<String, serde_json::Value>,
	#[serde(default)]
	pub logout: LogoutOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogoutOptions {
	#[serde(default)]
	pub purge_files: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityDef {
	pub kind: String,
	#[serde(default)]
	pub default: bool,
	pub via: Via,
	#[serde(default)]
	pub principal: serde_json::Map<String, serde_json::Value>,
	#[serde(default)]
	pub credentials: serde_json::Map<String, serde_json::Value>,
	#[serde(default)]
	pub env: Vec<EnvVar>,
	#[serde(default)]
	pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVar {
	pub key: String,
	pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
	pub duration: Option<String>,
}

/// Exactly one of `provider`/`identity` is set, or neither for a
/// standalone-eligible identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Via {
	#[serde(default)]
	pub provider: Option<String>,
	#[serde(default)]
	pub identity: Option<String>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_permission_set_example() {
		let yaml = r#"
realm: ""
providers:
  sso:
    kind: aws/iam-identity-center
    spec:
      start_url: https://example.awsapps.com/start
      region: us-east-1
identities:
  dev:
    kind: aws/permission-set
    default: true
    via:
      provider: sso
    principal:
      account:
        id: "123456789012"
      permission_set:
        name: DevAccess
"#;
		let cfg: AuthConfig = serde_yaml::from_str(yaml).unwrap();
		assert_eq!(cfg.realm(), "");
		let dev = &cfg.identities["dev"];
		assert_eq!(dev.kind, "aws/permission-set");
		assert!(dev.default);
		assert_eq!(dev.via.provider.as_deref(), Some("sso"));
		assert!(dev.via.identity.is_none());
	}

	#[test]
	fn parses_chained_identity() {
		let yaml = r#"
providers: {}
identities:
  prod:
    kind: aws/assume-role
    via:
      identity: dev
    principal:
      assume_role: "arn:aws:iam::999999999999:role/Prod"
      external_id: abc
"#;
		let cfg: AuthConfig = serde_yaml::from_str(yaml).unwrap();
		let prod = &cfg.identities["prod"];
		assert_eq!(prod.via.identity.as_deref(), Some("dev"));
	}
}
