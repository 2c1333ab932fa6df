//! AWS providers (`aws/iam-identity-center`, `aws/saml`) and identities
//! (`aws/user`, `aws/permission-set`, `aws/assume-role`, `aws/assume-root`).
//!
//! The real wire calls (SSO device flow, `GetSessionToken`, `AssumeRole`,
//! `AssumeRoleWithWebIdentity`, `AssumeRoot`, `ListAccounts`,
//! `GetRoleCredentials`) are out of scope: they are modeled as injectable
//! backend-operation traits rather than concrete cloud-SDK transport code.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::config::{IdentityDef, ProviderDef};
use crate::contracts::{
	AwsCredentials, Credentials, Identity, OidcCredentials, PostAuthParams, Provider, PromptFunc,
};

use crate::error::{AuthError, Result};
use crate::registry::Registry;

/// AWS session-token/assume-role operations, specified abstractly — the
/// actual STS transport is out of scope for this core.
#[async_trait]
pub trait StsBackend: Send + Sync {
	async fn get_session_token(
		&self,
		access_key_id: &str,
		secret_access_key: &str,
		mfa_arn: Option<&str>,
		mfa_code: Option<&str>,
		duration: Duration,
	) -> anyhow::Result<AwsCredentials>;

	async fn assume_role(
		&self,
		base: &AwsCredentials,
		role_arn: &str,
		session_name: &str,
		external_id: Option<&str>,
		duration: Option<Duration>,
		region: &str,
	) -> anyhow::Result<AwsCredentials>;

	async fn assume_role_with_web_identity(
		&self,
		oidc: &OidcCredentials,
		role_arn: &str,
		session_name: &str,
		duration: Option<Duration>,
		region: &str,
	) -> anyhow::Result<AwsCredentials>;

	async fn assume_root(
		&self,
		base: &AwsCredentials,
		target_principal: &str,
		task_policy_arn: &str,
		duration: Duration,
		region: &str,
	) -> anyhow::Result<AwsCredentials>;
}

/// AWS IAM Identity Center (SSO) operations.
#[async_trait]
pub trait SsoBackend: Send + Sync {
	async fn device_login(&self, start_url: &str, region: &str) -> anyhow::Result<String>;
	async fn list_accounts(&self, access_token: &str) -> anyhow::Result<Vec<(String, String)>>;
	async fn get_role_credentials(
		&self,
		access_token: &str,
		account_id: &str,
		role_name: &str,
		region: &str,
	) -> anyhow::Result<AwsCredentials>;
}

/// SAML federation operations.
#[async_trait]
pub trait SamlBackend: Send + Sync {
	async fn fetch_saml_assertion(&self, endpoint: &str) -> anyhow::Result<String>;
	async fn assume_role_with_saml(
		&self,
		role_arn: &str,
		principal_arn: &str,
		saml_assertion: &str,
		duration: Option<Duration>,
	) -> anyhow::Result<AwsCredentials>;
}

pub trait AwsBackendOps: StsBackend + SsoBackend + SamlBackend {}
impl<T: StsBackend + SsoBackend + SamlBackend> AwsBackendOps for T {}

/// Production wiring must supply a real backend (an aws-sdk-sts/sso based
/// one, typically); this default exists so `registry::default_registry()`
/// is constructible without network dependencies at all.
pub struct UnconfiguredAwsBackend;

#[async_trait]
impl StsBackend for UnconfiguredAwsBackend {
	async fn get_session_token(
		&self,
		_: &str,
		_: &str,
		_: Option<&str>,
		_: Option<&str>,
		_: Duration,
	) -> anyhow::Result<AwsCredentials> {
		anyhow::bail!("no STS backend configured")
	}
	async fn assume_role(
		&self,
		_: &AwsCredentials,
		_: &str,
		_: &str,
		_: Option<&str>,
		_: Option<Duration>,
		_: &str,
	) -> anyhow::Result<AwsCredentials> {
		anyhow::bail!("no STS backend configured")
	}
	async fn assume_role_with_web_identity(
		&self,
		_: &OidcCredentials,
		_: &str,
		_: &str,
		_: Option<Duration>,
		_: &str,
	) -> anyhow::Result<AwsCredentials> {
		anyhow::bail!("no STS backend configured")
	}
	async fn assume_root(
		&self,
		_: &AwsCredentials,
		_: &str,
		_: &str,
		_: Duration,
		_: &str,
	) -> anyhow::Result<AwsCredentials> {
		anyhow::bail!("no STS backend configured")
	}
}

#[async_trait]
impl SsoBackend for UnconfiguredAwsBackend {
	async fn device_login(&self, _: &str, _: &str) -> anyhow::Result<String> {
		anyhow::bail!("no SSO backend configured")
	}
	async fn list_accounts(&self, _: &str) -> anyhow::Result<Vec<(String, String)>> {
		anyhow::bail!("no SSO backend configured")
	}
	async fn get_role_credentials(
		&self,
		_: &str,
		_: &str,
		_: &str,
		_: &str,
	) -> anyhow::Result<AwsCredentials> {
		anyhow::bail!("no SSO backend configured")
	}
}

#[async_trait]
impl SamlBackend for UnconfiguredAwsBackend {
	async fn fetch_saml_assertion(&self, _: &str) -> anyhow::Result<String> {
		anyhow::bail!("no SAML backend configured")
	}
	async fn assume_role_with_saml(
		&self,
		_: &str,
		_: &str,
		_: &str,
		_: Option<Duration>,
	) -> anyhow::Result<AwsCredentials> {
		anyhow::bail!("no SAML backend configured")
	}
}

pub fn register(r: &mut Registry) {
	register_with_backend(r, Arc::new(UnconfiguredAwsBackend));
}

pub fn register_with_backend(r: &mut Registry, backend: Arc<dyn AwsBackendOps>) {
	register_with_backend_and_prompt(r, backend, None);
}

/// Injects a prompt function at the identity level rather than embedding
/// UI calls: the MFA code prompt for `aws/user` is wired in here, at
/// registration, not at `Manager` construction.
pub fn register_with_backend_and_prompt(
	r: &mut Registry,
	backend: Arc<dyn AwsBackendOps>,
	prompt: Option<PromptFunc>,
) {
	{
		let backend = backend.clone();
		r.register_provider(
			"aws/iam-identity-center",
			Arc::new(move |name, def| build_idc_provider(name, def, backend.clone())),
		);
	}
	{
		let backend = backend.clone();
		r.register_provider(
			"aws/saml",
			Arc::new(move |name, def| build_saml_provider(name, def, backend.clone())),
		);
	}
	{
		let prompt = prompt.clone();
		let backend = backend.clone();
		r.register_identity(
			"aws/user",
			Arc::new(move |name, def| build_user_identity(name, def, prompt.clone(), backend.clone())),
		);
	}
	{
		let backend = backend.clone();
		r.register_identity(
			"aws/permission-set",
			Arc::new(move |name, def| build_permission_set_identity(name, def, backend.clone())),
		);
	}
	{
		let backend = backend.clone();
		r.register_identity(
			"aws/assume-role",
			Arc::new(move |name, def| build_assume_role_identity(name, def, backend.clone())),
		);
	}
	r.register_identity(
		"aws/assume-root",
		Arc::new(move |name, def| build_assume_root_identity(name, def, backend.clone())),
	);
}

// ---------------------------------------------------------------------
// Provider: aws/iam-identity-center
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct IdcSpec {
	start_url: String,
	region: String,
}

pub struct IdcProvider {
	name: String,
	spec: IdcSpec,
	backend: Arc<dyn AwsBackendOps>,
}

#[async_trait]
impl Provider for IdcProvider {
	fn kind(&self) -> &str {
		"aws/iam-identity-center"
	}
	fn name(&self) -> &str {
		&self.name
	}
	fn validate(&self) -> Result<()> {
		if self.spec.start_url.is_empty() {
			return Err(AuthError::MissingPrincipal {
				identity: self.name.clone(),
				field: "start_url".into(),
			});
		}
		Ok(())
	}
	async fn authenticate(&self) -> Result<Credentials> {
		let token = self
			.backend
			.device_login(&self.spec.start_url, &self.spec.region)
			.await
			.map_err(|e| AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: e,
			})?;
		// Documented convention: the SSO access token rides in the
		// access_key_id field of an AWS credential.
		Ok(Credentials::Aws(AwsCredentials {
			access_key_id: token,
			secret_access_key: SecretString::from(String::new()),
			session_token: Some(SecretString::from("sso-session".to_string())),
			region: Some(self.spec.region.clone()),
			expiration: Some(chrono::Utc::now() + chrono::Duration::hours(8)),
			mfa_arn: None,
			session_duration: None,
		}))
	}
	fn files_display_path(&self) -> String {
		format!("aws/{}", self.name)
	}
}

fn build_idc_provider(
	name: &str,
	def: &ProviderDef,
	backend: Arc<dyn AwsBackendOps>,
) -> Result<Arc<dyn Provider>> {
	let spec: IdcSpec =
		serde_json::from_value(serde_json::Value::Object(def.spec.clone())).map_err(|e| {
			AuthError::InvalidProviderConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(IdcProvider {
		name: name.to_string(),
		spec,
		backend,
	}))
}

// ---------------------------------------------------------------------
// Provider: aws/saml
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SamlSpec {
	saml_endpoint: String,
	role_arn: String,
	principal_arn: String,
	#[serde(default)]
	region: Option<String>,
}

pub struct SamlProvider {
	name: String,
	spec: SamlSpec,
	backend: Arc<dyn AwsBackendOps>,
}

#[async_trait]
impl Provider for SamlProvider {
	fn kind(&self) -> &str {
		"aws/saml"
	}
	fn name(&self) -> &str {
		&self.name
	}
	fn validate(&self) -> Result<()> {
		if self.spec.role_arn.is_empty() || self.spec.principal_arn.is_empty() {
			return Err(AuthError::InvalidProviderConfig {
				name: self.name.clone(),
				reason: "role_arn and principal_arn are required".into(),
			});
		}
		Ok(())
	}
	async fn authenticate(&self) -> Result<Credentials> {
		let assertion = self
			.backend
			.fetch_saml_assertion(&self.spec.saml_endpoint)
			.await
			.map_err(|e| AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: e,
			})?;
		let creds = self
			.backend
			.assume_role_with_saml(
				&self.spec.role_arn,
				&self.spec.principal_arn,
				&assertion,
				None,
			)
			.await
			.map_err(|e| AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: e,
			})?;
		Ok(Credentials::Aws(creds))
	}
}

fn build_saml_provider(
	name: &str,
	def: &ProviderDef,
	backend: Arc<dyn AwsBackendOps>,
) -> Result<Arc<dyn Provider>> {
	let spec: SamlSpec =
		serde_json::from_value(serde_json::Value::Object(def.spec.clone())).map_err(|e| {
			AuthError::InvalidProviderConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(SamlProvider {
		name: name.to_string(),
		spec,
		backend,
	}))
}

// ---------------------------------------------------------------------
// Identity: aws/user
// ---------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct UserCredentialOverrides {
	#[serde(default)]
	access_key_id: Option<String>,
	#[serde(default)]
	secret_access_key: Option<String>,
	#[serde(default)]
	mfa_arn: Option<String>,
}

pub struct UserIdentity {
	name: String,
	overrides: UserCredentialOverrides,
	session_duration: Option<String>,
	prompt: Option<PromptFunc>,
	sts: Arc<dyn StsBackend>,
}

/// The three-tier merge for `aws/user`: YAML explicit creds take full
/// precedence; otherwise fall back to the keyring entry; the
/// YAML `mfa_arn`, if set, always wins over one cached in the keyring.
pub fn merge_user_credentials(
	overrides: &UserCredentialOverrides,
	cached: Option<&AwsCredentials>,
) -> Result<AwsCredentials> {
	match (&overrides.access_key_id, &overrides.secret_access_key) {
		(Some(id), Some(secret)) => Ok(AwsCredentials {
			access_key_id: id.clone(),
			secret_access_key: SecretString::from(secret.clone()),
			session_token: None,
			region: cached.and_then(|c| c.region.clone()),
			expiration: None,
			mfa_arn: overrides
				.mfa_arn
				.clone()
				.or_else(|| cached.and_then(|c| c.mfa_arn.clone())),
			session_duration: None,
		}),
		(None, None) => {
			let mut cached = cached
				.cloned()
				.ok_or_else(|| AuthError::AwsUserNotConfigured("aws/user".into()))?;
			if let Some(mfa) = &overrides.mfa_arn {
				cached.mfa_arn = Some(mfa.clone());
			}
			Ok(cached)
		},
		_ => Err(AuthError::InvalidAuthConfig(
			"aws/user requires both access_key_id and secret_access_key, or neither".into(),
		)),
	}
}

/// Clamps a requested session duration to AWS `GetSessionToken` limits:
/// 15m floor, 12h ceiling without MFA, 36h with MFA.
/// An unparseable spec falls back to the 12h default rather than erroring.
pub fn clamp_user_session_duration(requested: Option<&str>, has_mfa: bool) -> Duration {
	const FLOOR: Duration = Duration::from_secs(15 * 60);
	const DEFAULT: Duration = Duration::from_secs(12 * 3600);
	let ceiling = if has_mfa {
		Duration::from_secs(36 * 3600)
	} else {
		Duration::from_secs(12 * 3600)
	};
	let requested = match requested {
		Some(s) => match agent_core::duration::parse_flexible(s) {
			Ok(d) => d,
			Err(_) => return DEFAULT,
		},
		None => return DEFAULT,
	};
	requested.clamp(FLOOR, ceiling)
}

#[async_trait]
impl Identity for UserIdentity {
	fn kind(&self) -> &str {
		"aws/user"
	}
	fn provider_name(&self) -> &str {
		"aws-user"
	}
	fn validate(&self) -> Result<()> {
		match (
			&self.overrides.access_key_id,
			&self.overrides.secret_access_key,
		) {
			(Some(_), None) | (None, Some(_)) => Err(AuthError::InvalidAuthConfig(format!(
				"identity {:?}: access_key_id and secret_access_key must both be set, or neither",
				self.name
			))),
			_ => Ok(()),
		}
	}
	async fn authenticate(&self, base: Option<&Credentials>) -> Result<Credentials> {
		// `base` is not a chain predecessor for this standalone identity: the
		// Manager passes in whatever long-lived bootstrap entry it found in
		// the keyring (since `cache_is_terminal` is false below), falling
		// back to the on-disk tier here when the keyring has nothing either.
		let mut cached = match base {
			Some(Credentials::Aws(c)) => Some(c.clone()),
			_ => None,
		};
		if cached.is_none() && self.overrides.access_key_id.is_none() && self.credentials_exist() {
			if let Credentials::Aws(loaded) = self.load_credentials().await? {
				cached = Some(loaded);
			}
		}
		let merged = merge_user_credentials(&self.overrides, cached.as_ref())?;

		let has_mfa = merged.mfa_arn.is_some();
		let duration = clamp_user_session_duration(self.session_duration.as_deref(), has_mfa);

		let mfa_code = if let Some(mfa_arn) = &merged.mfa_arn {
			if crate::contracts::is_ci() {
				return Err(AuthError::InvalidAuthConfig(format!(
					"identity {:?} requires an MFA code but prompts are disabled in CI",
					self.name
				)));
			}
			let prompt = self.prompt.as_ref().ok_or_else(|| {
				AuthError::InvalidAuthConfig(format!(
					"identity {:?} requires an MFA code but no prompt function is configured",
					self.name
				))
			})?;
			Some(prompt(mfa_arn)?)
		} else {
			None
		};

		let session = self
			.sts
			.get_session_token(
				&merged.access_key_id,
				merged.secret_access_key.expose_secret(),
				merged.mfa_arn.as_deref(),
				mfa_code.as_deref(),
				duration,
			)
			.await
			.map_err(|e| AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: e,
			})?;
		Ok(Credentials::Aws(session))
	}
	async fn post_authenticate(&self, params: &PostAuthParams<'_>) -> Result<()> {
		// Keyring is untouched here: the long-lived key/secret/MFA ARN is
		// preserved by the Manager's cache-write policy; only the derived
		// session goes to the provider's on-disk files.
		if let Credentials::Aws(creds) = params.credentials {
			let base = crate::cache::files::base_dir();
			crate::cache::files::write_credentials(
				&base,
				params.realm,
				"aws-user",
				params.identity_name,
				creds,
			)?;
		}
		Ok(())
	}
	fn standalone_eligible(&self) -> bool {
		true
	}
	fn cache_is_terminal(&self) -> bool {
		false
	}
	fn credentials_exist(&self) -> bool {
		let realm = std::env::var("ATMOS_AUTH_REALM").unwrap_or_default();
		let base = crate::cache::files::base_dir();
		crate::cache::files::credentials_exist(&base, &realm, "aws-user", &self.name)
	}
	async fn load_credentials(&self) -> Result<Credentials> {
		let realm = std::env::var("ATMOS_AUTH_REALM").unwrap_or_default();
		let base = crate::cache::files::base_dir();
		let path = crate::cache::files::credentials_path(&base, &realm, "aws-user");
		let overrides = [
			("AWS_SHARED_CREDENTIALS_FILE", path.display().to_string()),
			("AWS_PROFILE", self.name.clone()),
		];
		let _guard = crate::cache::EnvOverrideGuard::apply(&overrides);
		crate::cache::files::load_credentials(&base, &realm, "aws-user", &self.name)?
			.map(Credentials::Aws)
			.ok_or_else(|| AuthError::AwsUserNotConfigured(self.name.clone()))
	}
}

fn build_user_identity(
	name: &str,
	def: &IdentityDef,
	prompt: Option<PromptFunc>,
	backend: Arc<dyn AwsBackendOps>,
) -> Result<Arc<dyn Identity>> {
	let overrides: UserCredentialOverrides =
		serde_json::from_value(serde_json::Value::Object(def.credentials.clone())).map_err(|e| {
			AuthError::InvalidIdentityConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(UserIdentity {
		name: name.to_string(),
		overrides,
		session_duration: def.session.duration.clone(),
		prompt,
		sts: backend,
	}))
}

// ---------------------------------------------------------------------
// Identity: aws/permission-set
// ---------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct PermissionSetPrincipal {
	account: AccountRef,
	permission_set: PermissionSetRef,
}

#[derive(Debug, Default, Deserialize)]
struct AccountRef {
	#[serde(default)]
	id: Option<String>,
	#[serde(default)]
	name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PermissionSetRef {
	name: String,
}

pub struct PermissionSetIdentity {
	name: String,
	provider_name: String,
	principal: PermissionSetPrincipal,
	sso: Arc<dyn SsoBackend>,
}

#[async_trait]
impl Identity for PermissionSetIdentity {
	fn kind(&self) -> &str {
		"aws/permission-set"
	}
	fn provider_name(&self) -> &str {
		&self.provider_name
	}
	fn validate(&self) -> Result<()> {
		if self.principal.account.id.is_none() && self.principal.account.name.is_none() {
			return Err(AuthError::MissingPrincipal {
				identity: self.name.clone(),
				field: "account.id or account.name".into(),
			});
		}
		if self.principal.permission_set.name.is_empty() {
			return Err(AuthError::MissingPrincipal {
				identity: self.name.clone(),
				field: "permission_set.name".into(),
			});
		}
		Ok(())
	}
	async fn authenticate(&self, base: Option<&Credentials>) -> Result<Credentials> {
		let Some(Credentials::Aws(base)) = base else {
			return Err(AuthError::InvalidIdentityConfig {
				name: self.name.clone(),
				reason: "incompatible credentials".into(),
			});
		};
		// SDK misnomer, documented: the base access_key_id carries the SSO
		// access token, not an IAM access key.
		let access_token = base.access_key_id.clone();
		let region = base.region.clone().unwrap_or_else(|| "us-east-1".into());

		let account_id = if let Some(id) = &self.principal.account.id {
			id.clone()
		} else {
			let name = self.principal.account.name.clone().unwrap_or_default();
			let accounts = self
				.sso
				.list_accounts(&access_token)
				.await
				.map_err(|e| AuthError::AuthenticationFailed {
					identity: self.name.clone(),
					source: e,
				})?;
			accounts
				.into_iter()
				.find(|(_, account_name)| account_name == &name)
				.map(|(id, _)| id)
				.ok_or_else(|| AuthError::AuthenticationFailed {
					identity: self.name.clone(),
					source: anyhow::anyhow!("no account named {name:?} visible to this SSO session"),
				})?
		};

		let mut creds = self
			.sso
			.get_role_credentials(
				&access_token,
				&account_id,
				&self.principal.permission_set.name,
				&region,
			)
			.await
			.map_err(|e| AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: e,
			})?;
		creds.region.get_or_insert(region);
		Ok(Credentials::Aws(creds))
	}
	async fn post_authenticate(&self, params: &PostAuthParams<'_>) -> Result<()> {
		if let Credentials::Aws(creds) = params.credentials {
			let base = crate::cache::files::base_dir();
			crate::cache::files::write_credentials(
				&base,
				params.realm,
				params.provider_name,
				params.identity_name,
				creds,
			)?;
		}
		Ok(())
	}
}

fn build_permission_set_identity(
	name: &str,
	def: &IdentityDef,
	backend: Arc<dyn AwsBackendOps>,
) -> Result<Arc<dyn Identity>> {
	let principal: PermissionSetPrincipal =
		serde_json::from_value(serde_json::Value::Object(def.principal.clone())).map_err(|e| {
			AuthError::InvalidIdentityConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(PermissionSetIdentity {
		name: name.to_string(),
		provider_name: def.via.provider.clone().unwrap_or_default(),
		principal,
		sso: backend,
	}))
}

// ---------------------------------------------------------------------
// Identity: aws/assume-role
// ---------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct AssumeRolePrincipal {
	assume_role: String,
	#[serde(default)]
	external_id: Option<String>,
	#[serde(default)]
	region: Option<String>,
}

pub struct AssumeRoleIdentity {
	name: String,
	provider_name: String,
	principal: AssumeRolePrincipal,
	session_duration: Option<String>,
	sts: Arc<dyn StsBackend>,
}

/// Idempotent, ≤64 chars, no trailing `-`, never empty.
pub fn sanitize_session_name(raw: &str) -> String {
	static VALID: once_cell::sync::Lazy<Regex> =
		once_cell::sync::Lazy::new(|| Regex::new(r"[^A-Za-z0-9+=,.@-]").unwrap());
	let replaced = VALID.replace_all(raw, "-").to_string();
	let truncated: String = replaced.chars().take(64).collect();
	let trimmed = truncated.trim_end_matches('-').to_string();
	if trimmed.is_empty() {
		"atmos-session".to_string()
	} else {
		trimmed
	}
}

#[async_trait]
impl Identity for AssumeRoleIdentity {
	fn kind(&self) -> &str {
		"aws/assume-role"
	}
	fn provider_name(&self) -> &str {
		&self.provider_name
	}
	fn validate(&self) -> Result<()> {
		if self.principal.assume_role.is_empty() {
			return Err(AuthError::MissingPrincipal {
				identity: self.name.clone(),
				field: "assume_role".into(),
			});
		}
		Ok(())
	}
	async fn authenticate(&self, base: Option<&Credentials>) -> Result<Credentials> {
		let session_name = sanitize_session_name(&format!(
			"atmos-{}-{}",
			self.name,
			chrono::Utc::now().timestamp()
		));
		let duration = self
			.session_duration
			.as_deref()
			.and_then(|s| agent_core::duration::parse_flexible(s).ok());

		match base {
			Some(Credentials::Aws(base)) => {
				let region = self
					.principal
					.region
					.clone()
					.or_else(|| base.region.clone())
					.unwrap_or_else(|| "us-east-1".into());
				let creds = self
					.sts
					.assume_role(
						base,
						&self.principal.assume_role,
						&session_name,
						self.principal.external_id.as_deref(),
						duration,
						&region,
					)
					.await
					.map_err(|e| AuthError::AuthenticationFailed {
						identity: self.name.clone(),
						source: e,
					})?;
				Ok(Credentials::Aws(creds))
			},
			Some(Credentials::Oidc(oidc)) => {
				let region = self
					.principal
					.region
					.clone()
					.unwrap_or_else(|| "us-east-1".into());
				let creds = self
					.sts
					.assume_role_with_web_identity(
						oidc,
						&self.principal.assume_role,
						&session_name,
						duration,
						&region,
					)
					.await
					.map_err(|e| AuthError::AuthenticationFailed {
						identity: self.name.clone(),
						source: e,
					})?;
				Ok(Credentials::Aws(creds))
			},
			_ => Err(AuthError::InvalidIdentityConfig {
				name: self.name.clone(),
				reason: "incompatible credentials".into(),
			}),
		}
	}
	async fn post_authenticate(&self, params: &PostAuthParams<'_>) -> Result<()> {
		if let Credentials::Aws(creds) = params.credentials {
			let base = crate::cache::files::base_dir();
			crate::cache::files::write_credentials(
				&base,
				params.realm,
				params.provider_name,
				params.identity_name,
				creds,
			)?;
		}
		Ok(())
	}
}

fn build_assume_role_identity(
	name: &str,
	def: &IdentityDef,
	backend: Arc<dyn AwsBackendOps>,
) -> Result<Arc<dyn Identity>> {
	let principal: AssumeRolePrincipal =
		serde_json::from_value(serde_json::Value::Object(def.principal.clone())).map_err(|e| {
			AuthError::InvalidIdentityConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(AssumeRoleIdentity {
		name: name.to_string(),
		provider_name: def.via.provider.clone().unwrap_or_default(),
		principal,
		session_duration: def.session.duration.clone(),
		sts: backend,
	}))
}

// ---------------------------------------------------------------------
// Identity: aws/assume-root
// ---------------------------------------------------------------------

const SUPPORTED_ROOT_TASK_POLICIES: &[&str] = &[
	"arn:aws:iam::aws:policy/root-task/S3UnlockBucketPolicy",
	"arn:aws:iam::aws:policy/root-task/IAMAuditRootUserCredentials",
	"arn:aws:iam::aws:policy/root-task/IAMCreateRootUserPassword",
	"arn:aws:iam::aws:policy/root-task/IAMDeleteRootUserCredentials",
	"arn:aws:iam::aws:policy/root-task/SQSUnlockQueuePolicy",
];

#[derive(Debug, Default, Deserialize)]
struct AssumeRootPrincipal {
	target_principal: String,
	task_policy_arn: String,
}

pub struct AssumeRootIdentity {
	name: String,
	provider_name: String,
	principal: AssumeRootPrincipal,
	session_duration: Option<String>,
	sts: Arc<dyn StsBackend>,
}

#[async_trait]
impl Identity for AssumeRootIdentity {
	fn kind(&self) -> &str {
		"aws/assume-root"
	}
	fn provider_name(&self) -> &str {
		&self.provider_name
	}
	fn validate(&self) -> Result<()> {
		static ACCOUNT_ID: once_cell::sync::Lazy<Regex> =
			once_cell::sync::Lazy::new(|| Regex::new(r"^\d{12}$").unwrap());
		if !ACCOUNT_ID.is_match(&self.principal.target_principal) {
			return Err(AuthError::InvalidIdentityConfig {
				name: self.name.clone(),
				reason: "target_principal must be a 12-digit account id".into(),
			});
		}
		if !self
			.principal
			.task_policy_arn
			.starts_with("arn:aws:iam::aws:policy/root-task/")
		{
			return Err(AuthError::InvalidIdentityConfig {
				name: self.name.clone(),
				reason: "task_policy_arn must be under arn:aws:iam::aws:policy/root-task/".into(),
			});
		}
		if !SUPPORTED_ROOT_TASK_POLICIES.contains(&self.principal.task_policy_arn.as_str()) {
			tracing::warn!(
				policy = %self.principal.task_policy_arn,
				"task_policy_arn is not in the documented supported list"
			);
		}
		Ok(())
	}
	async fn authenticate(&self, base: Option<&Credentials>) -> Result<Credentials> {
		let Some(Credentials::Aws(base)) = base else {
			return Err(AuthError::InvalidIdentityConfig {
				name: self.name.clone(),
				reason: "incompatible credentials".into(),
			});
		};
		const HARD_CAP: Duration = Duration::from_secs(900);
		let duration = self
			.session_duration
			.as_deref()
			.and_then(|s| agent_core::duration::parse_flexible(s).ok())
			.unwrap_or(HARD_CAP)
			.min(HARD_CAP);
		let region = base.region.clone().unwrap_or_else(|| "us-east-1".into());
		let creds = self
			.sts
			.assume_root(
				base,
				&self.principal.target_principal,
				&self.principal.task_policy_arn,
				duration,
				&region,
			)
			.await
			.map_err(|e| AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: e,
			})?;
		Ok(Credentials::Aws(creds))
	}
	async fn post_authenticate(&self, params: &PostAuthParams<'_>) -> Result<()> {
		if let Credentials::Aws(creds) = params.credentials {
			let base = crate::cache::files::base_dir();
			crate::cache::files::write_credentials(
				&base,
				params.realm,
				params.provider_name,
				params.identity_name,
				creds,
			)?;
		}
		Ok(())
	}
}

fn build_assume_root_identity(
	name: &str,
	def: &IdentityDef,
	backend: Arc<dyn AwsBackendOps>,
) -> Result<Arc<dyn Identity>> {
	let principal: AssumeRootPrincipal =
		serde_json::from_value(serde_json::Value::Object(def.principal.clone())).map_err(|e| {
			AuthError::InvalidIdentityConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(AssumeRootIdentity {
		name: name.to_string(),
		provider_name: def.via.provider.clone().unwrap_or_default(),
		principal,
		session_duration: def.session.duration.clone(),
		sts: backend,
	}))
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case("simple", "simple")]
	#[case("has spaces", "has-spaces")]
	#[case("trailing---", "trailing")]
	#[case("", "atmos-session")]
	#[case("!!!", "atmos-session")]
	fn sanitizes_session_name(#[case] input: &str, #[case] expected: &str) {
		assert_eq!(sanitize_session_name(input), expected);
	}

	#[test]
	fn sanitize_is_idempotent_and_bounded() {
		let long = "x".repeat(200);
		let once = sanitize_session_name(&long);
		assert!(once.len() <= 64);
		assert_eq!(sanitize_session_name(&once), once);
	}

	#[test]
	fn clamps_duration_by_mfa_presence() {
		assert_eq!(
			clamp_user_session_duration(Some("24h"), false),
			Duration::from_secs(12 * 3600)
		);
		assert_eq!(
			clamp_user_session_duration(Some("24h"), true),
			Duration::from_secs(24 * 3600)
		);
		assert_eq!(
			clamp_user_session_duration(Some("garbage"), false),
			Duration::from_secs(12 * 3600)
		);
		assert_eq!(
			clamp_user_session_duration(Some("1m"), false),
			Duration::from_secs(15 * 60)
		);
	}

	#[test]
	fn merge_prefers_explicit_yaml_credentials() {
		let overrides = UserCredentialOverrides {
			access_key_id: Some("AKIAYAML".into()),
			secret_access_key: Some("yaml-secret".into()),
			mfa_arn: None,
		};
		let cached = AwsCredentials {
			access_key_id: "AKIACACHED".into(),
			secret_access_key: SecretString::from("cached-secret".to_string()),
			session_token: None,
			region: None,
			expiration: None,
			mfa_arn: Some("arn:aws:iam::123:mfa/cached".into()),
			session_duration: None,
		};
		let merged = merge_user_credentials(&overrides, Some(&cached)).unwrap();
		assert_eq!(merged.access_key_id, "AKIAYAML");
	}

	#[test]
	fn merge_falls_back_to_cache_and_mfa_override_wins() {
		let overrides = UserCredentialOverrides {
			access_key_id: None,
			secret_access_key: None,
			mfa_arn: Some("arn:aws:iam::123:mfa/yaml".into()),
		};
		let cached = AwsCredentials {
			access_key_id: "AKIACACHED".into(),
			secret_access_key: SecretString::from("cached-secret".to_string()),
			session_token: None,
			region: None,
			expiration: None,
			mfa_arn: Some("arn:aws:iam::123:mfa/cached".into()),
			session_duration: None,
		};
		let merged = merge_user_credentials(&overrides, Some(&cached)).unwrap();
		assert_eq!(merged.access_key_id, "AKIACACHED");
		assert_eq!(merged.mfa_arn.as_deref(), Some("arn:aws:iam::123:mfa/yaml"));
	}

	#[test]
	fn merge_rejects_only_one_of_the_pair() {
		let overrides = UserCredentialOverrides {
			access_key_id: Some("AKIA".into()),
			secret_access_key: None,
			mfa_arn: None,
		};
		assert!(merge_user_credentials(&overrides, None).is_err());
	}
}
