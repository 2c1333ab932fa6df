//! Polymorphic contracts: `Provider`, `Identity`, and the `Credentials`
//! tagged union.

use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// A 6-digit MFA code prompt, injected rather than hard-wired to a
/// terminal so headless tests can supply a canned answer.
pub type PromptFunc = std::sync::Arc<dyn Fn(&str) -> Result<String> + Send + Sync>;

pub fn is_ci() -> bool {
	const MARKERS: &[&str] = &[
		"CI",
		"GITHUB_ACTIONS",
		"GITLAB_CI",
		"CIRCLECI",
		"JENKINS_URL",
		"TRAVIS",
		"BUILDKITE",
	];
	MARKERS.iter().any(|m| std::env::var_os(m).is_some())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPurpose {
	Credentials,
	Config,
}

#[derive(Debug, Clone)]
pub struct PathDescriptor {
	pub path: PathBuf,
	pub purpose: PathPurpose,
	pub mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsCredentials {
	pub access_key_id: String,
	#[serde(serialize_with = "crate::secret::ser_redact")]
	pub secret_access_key: SecretString,
	#[serde(
		default,
		skip_serializing_if = "Option::is_none",
		serialize_with = "crate::secret::ser_redact_opt"
	)]
	pub session_token: Option<SecretString>,
	pub region: Option<String>,
	#[serde(default)]
	pub expiration: Option<chrono::DateTime<chrono::Utc>>,
	#[serde(default)]
	pub mfa_arn: Option<String>,
	#[serde(default)]
	pub session_duration: Option<std::time::Duration>,
}

impl AwsCredentials {
	pub fn is_session(&self) -> bool {
		self.session_token.is_some()
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcCredentials {
	#[serde(serialize_with = "crate::secret::ser_redact")]
	pub token: SecretString,
	pub provider: String,
	pub audience: String,
	#[serde(default)]
	pub expiration: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpCredentials {
	#[serde(
		default,
		skip_serializing_if = "Option::is_none",
		serialize_with = "crate::secret::ser_redact_opt"
	)]
	pub access_token: Option<SecretString>,
	#[serde(default)]
	pub token_expiry: Option<chrono::DateTime<chrono::Utc>>,
	pub project_id: String,
	#[serde(default)]
	pub service_account_email: Option<String>,
	#[serde(default)]
	pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureCredentials {
	#[serde(serialize_with = "crate::secret::ser_redact")]
	pub access_token: SecretString,
	pub tenant_id: String,
	#[serde(default)]
	pub subscription_id: Option<String>,
	#[serde(default)]
	pub expiration: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockCredentials {
	pub label: String,
	#[serde(default)]
	pub expiration: Option<chrono::DateTime<chrono::Utc>>,
	#[serde(default)]
	pub ephemeral: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Credentials {
	Aws(AwsCredentials),
	Oidc(OidcCredentials),
	Gcp(GcpCredentials),
	Azure(AzureCredentials),
	Mock(MockCredentials),
}

impl Credentials {
	/// Never cache a session token or anything with a sub-24h expiry.
	pub fn is_ephemeral(&self) -> bool {
		const SHORT_LIVED: chrono::Duration = chrono::Duration::hours(24);
		let short_expiry = |exp: &Option<chrono::DateTime<chrono::Utc>>| {
			exp.is_some_and(|e| e - chrono::Utc::now() < SHORT_LIVED)
		};
		match self {
			Credentials::Aws(c) => c.is_session() || short_expiry(&c.expiration),
			Credentials::Oidc(_) => true,
			Credentials::Gcp(c) => c.access_token.is_some() && c.token_expiry.is_some(),
			Credentials::Azure(c) => short_expiry(&c.expiration),
			Credentials::Mock(c) => c.ephemeral || short_expiry(&c.expiration),
		}
	}

	pub fn is_expired(&self) -> bool {
		let expired = |exp: &Option<chrono::DateTime<chrono::Utc>>| {
			exp.is_some_and(|e| e <= chrono::Utc::now())
		};
		match self {
			Credentials::Aws(c) => expired(&c.expiration),
			Credentials::Oidc(c) => expired(&c.expiration),
			Credentials::Gcp(c) => expired(&c.token_expiry),
			Credentials::Azure(c) => expired(&c.expiration),
			Credentials::Mock(c) => expired(&c.expiration),
		}
	}

	pub fn expiration(&self) -> Option<chrono::DateTime<chrono::Utc>> {
		match self {
			Credentials::Aws(c) => c.expiration,
			Credentials::Oidc(c) => c.expiration,
			Credentials::Gcp(c) => c.token_expiry,
			Credentials::Azure(c) => c.expiration,
			Credentials::Mock(c) => c.expiration,
		}
	}

	pub fn region(&self) -> Option<&str> {
		match self {
			Credentials::Aws(c) => c.region.as_deref(),
			_ => None,
		}
	}

	/// The designated point where non-secret, display-safe fragments are
	/// extracted; secrets never cross this boundary.
	pub fn build_whoami_fragment(&self, into: &mut WhoamiInfo) {
		match self {
			Credentials::Aws(c) => {
				into.environment.insert(
					"AWS_REGION".into(),
					c.region.clone().unwrap_or_default(),
				);
			},
			Credentials::Gcp(c) => {
				into
					.environment
					.insert("GOOGLE_CLOUD_PROJECT".into(), c.project_id.clone());
			},
			Credentials::Azure(c) => {
				into
					.environment
					.insert("AZURE_TENANT_ID".into(), c.tenant_id.clone());
				if let Some(sub) = &c.subscription_id {
					into
						.environment
						.insert("AZURE_SUBSCRIPTION_ID".into(), sub.clone());
				}
			},
			Credentials::Oidc(_) | Credentials::Mock(_) => {},
		}
		into.expiration = self.expiration();
	}
}

/// Non-serialisable display descriptor handed back to the caller.
/// `credentials` deliberately has no `Serialize` impl
/// reachable from here — only `environment` is safe to publish.
#[derive(Debug, Clone, Serialize)]
pub struct WhoamiInfo {
	pub identity: String,
	pub credentials_ref: String,
	pub region: Option<String>,
	pub expiration: Option<chrono::DateTime<chrono::Utc>>,
	pub environment: std::collections::HashMap<String, String>,
	#[serde(skip)]
	pub credentials: Credentials,
}

#[derive(Clone)]
pub struct PostAuthParams<'a> {
	pub provider_name: &'a str,
	pub identity_name: &'a str,
	pub realm: &'a str,
	pub credentials: &'a Credentials,
}

#[async_trait]
pub trait Provider: Send + Sync {
	fn kind(&self) -> &str;
	fn name(&self) -> &str;
	fn validate(&self) -> Result<()>;
	async fn pre_authenticate(&self) -> Result<()> {
		Ok(())
	}
	async fn authenticate(&self) -> Result<Credentials>;
	fn environment(&self) -> std::collections::HashMap<String, String> {
		Default::default()
	}
	fn prepare_environment(
		&self,
		inherited: &std::collections::HashMap<String, String>,
	) -> std::collections::HashMap<String, String> {
		inherited.clone()
	}
	async fn logout(&self) -> Result<()> {
		Ok(())
	}
	fn files_display_path(&self) -> String {
		String::new()
	}
	fn paths(&self) -> Vec<PathDescriptor> {
		Vec::new()
	}
}

#[async_trait]
pub trait Identity: Send + Sync {
	fn kind(&self) -> &str;
	fn provider_name(&self) -> &str;
	fn validate(&self) -> Result<()>;
	async fn authenticate(&self, base: Option<&Credentials>) -> Result<Credentials>;
	fn environment(&self) -> std::collections::HashMap<String, String> {
		Default::default()
	}
	fn prepare_environment(
		&self,
		inherited: &std::collections::HashMap<String, String>,
	) -> std::collections::HashMap<String, String> {
		inherited.clone()
	}
	async fn post_authenticate(&self, params: &PostAuthParams<'_>) -> Result<()>;
	fn credentials_exist(&self) -> bool {
		false
	}
	async fn load_credentials(&self) -> Result<Credentials> {
		Err(AuthError::AwsUserNotConfigured(
			"no on-disk credentials loader configured".into(),
		))
	}
	async fn logout(&self) -> Result<()> {
		Ok(())
	}
	fn paths(&self) -> Vec<PathDescriptor> {
		Vec::new()
	}
	/// Standalone-eligible identities (`aws/user`, `gcp/project`) can
	/// authenticate without a provider root.
	fn standalone_eligible(&self) -> bool {
		false
	}
	/// Whether a keyring hit for this identity is a complete,
	/// already-exchanged session the Manager can return verbatim (the
	/// default). Identities whose keyring entry instead holds long-lived
	/// bootstrap material that must still be exchanged (`aws/user`'s static
	/// key/secret, re-derived into a session via `GetSessionToken` on every
	/// call) override this to `false`; the Manager then passes the cached
	/// entry into `authenticate` as `base` instead of returning it directly.
	fn cache_is_terminal(&self) -> bool {
		true
	}
}

pub fn now_plus(d: std::time::Duration) -> SystemTime {
	SystemTime::now() + d
}
