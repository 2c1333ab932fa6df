//! GCP providers (`gcp/adc`, `gcp/workload-identity-federation`) and
//! identities (`gcp/service-account`, `gcp/project`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;

use crate::config::{IdentityDef, ProviderDef};
use crate::contracts::{Credentials, GcpCredentials, Identity, PostAuthParams, Provider};
use crate::error::{AuthError, Result};
use crate::registry::Registry;

/// Application-default-credentials and workload-identity-federation token
/// minting, specified abstractly: the real flows run through
/// `google-cloud-auth`/STS token exchange, neither of which this core calls
/// directly.
#[async_trait]
pub trait GcpBackend: Send + Sync {
	async fn application_default_credentials(&self, scopes: &[String]) -> anyhow::Result<GcpToken>;
	async fn exchange_workload_identity(
		&self,
		audience: &str,
		oidc_token: &str,
		service_account_email: Option<&str>,
	) -> anyhow::Result<GcpToken>;
	async fn generate_access_token(
		&self,
		service_account_email: &str,
		delegates: &[String],
		lifetime: Duration,
		scopes: &[String],
	) -> anyhow::Result<GcpToken>;
}

pub struct GcpToken {
	pub access_token: SecretString,
	pub expiry: chrono::DateTime<chrono::Utc>,
	pub project_id: String,
}

pub struct UnconfiguredGcpBackend;

#[async_trait]
impl GcpBackend for UnconfiguredGcpBackend {
	async fn application_default_credentials(&self, _: &[String]) -> anyhow::Result<GcpToken> {
		anyhow::bail!("no GCP backend configured")
	}
	async fn exchange_workload_identity(
		&self,
		_: &str,
		_: &str,
		_: Option<&str>,
	) -> anyhow::Result<GcpToken> {
		anyhow::bail!("no GCP backend configured")
	}
	async fn generate_access_token(
		&self,
		_: &str,
		_: &[String],
		_: Duration,
		_: &[String],
	) -> anyhow::Result<GcpToken> {
		anyhow::bail!("no GCP backend configured")
	}
}

pub fn register(r: &mut Registry) {
	register_with_backend(r, Arc::new(UnconfiguredGcpBackend));
}

pub fn register_with_backend(r: &mut Registry, backend: Arc<dyn GcpBackend>) {
	{
		let backend = backend.clone();
		r.register_provider(
			"gcp/adc",
			Arc::new(move |name, def| build_adc_provider(name, def, backend.clone())),
		);
	}
	{
		let backend = backend.clone();
		r.register_provider(
			"gcp/workload-identity-federation",
			Arc::new(move |name, def| build_wif_provider(name, def, backend.clone())),
		);
	}
	r.register_identity(
		"gcp/service-account",
		Arc::new(move |name, def| build_service_account_identity(name, def, backend.clone())),
	);
	r.register_identity("gcp/project", Arc::new(build_project_identity));
}

// ---------------------------------------------------------------------
// Provider: gcp/adc
// ---------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct AdcSpec {
	#[serde(default)]
	scopes: Vec<String>,
}

pub struct AdcProvider {
	name: String,
	spec: AdcSpec,
	backend: Arc<dyn GcpBackend>,
}

#[async_trait]
impl Provider for AdcProvider {
	fn kind(&self) -> &str {
		"gcp/adc"
	}
	fn name(&self) -> &str {
		&self.name
	}
	fn validate(&self) -> Result<()> {
		Ok(())
	}
	async fn authenticate(&self) -> Result<Credentials> {
		let scopes = if self.spec.scopes.is_empty() {
			vec!["https://www.googleapis.com/auth/cloud-platform".to_string()]
		} else {
			self.spec.scopes.clone()
		};
		let token = self
			.backend
			.application_default_credentials(&scopes)
			.await
			.map_err(|e| AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: e,
			})?;
		Ok(Credentials::Gcp(GcpCredentials {
			access_token: Some(token.access_token),
			token_expiry: Some(token.expiry),
			project_id: token.project_id,
			service_account_email: None,
			scopes,
		}))
	}
}

fn build_adc_provider(
	name: &str,
	def: &ProviderDef,
	backend: Arc<dyn GcpBackend>,
) -> Result<Arc<dyn Provider>> {
	let spec: AdcSpec =
		serde_json::from_value(serde_json::Value::Object(def.spec.clone())).map_err(|e| {
			AuthError::InvalidProviderConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(AdcProvider {
		name: name.to_string(),
		spec,
		backend,
	}))
}

// ---------------------------------------------------------------------
// Provider: gcp/workload-identity-federation
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WifSpec {
	audience: String,
	#[serde(default)]
	token_source_env: Option<String>,
	#[serde(default)]
	service_account_email: Option<String>,
}

pub struct WifProvider {
	name: String,
	spec: WifSpec,
	backend: Arc<dyn GcpBackend>,
}

#[async_trait]
impl Provider for WifProvider {
	fn kind(&self) -> &str {
		"gcp/workload-identity-federation"
	}
	fn name(&self) -> &str {
		&self.name
	}
	fn validate(&self) -> Result<()> {
		if self.spec.audience.is_empty() {
			return Err(AuthError::InvalidProviderConfig {
				name: self.name.clone(),
				reason: "audience is required".into(),
			});
		}
		Ok(())
	}
	async fn authenticate(&self) -> Result<Credentials> {
		let env_var = self
			.spec
			.token_source_env
			.clone()
			.unwrap_or_else(|| "ACTIONS_ID_TOKEN_REQUEST_TOKEN".to_string());
		let oidc_token = std::env::var(&env_var).map_err(|_| AuthError::AwsMissingEnvVars(vec![env_var.clone()]))?;
		let token = self
			.backend
			.exchange_workload_identity(
				&self.spec.audience,
				&oidc_token,
				self.spec.service_account_email.as_deref(),
			)
			.await
			.map_err(|e| AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: e,
			})?;
		Ok(Credentials::Gcp(GcpCredentials {
			access_token: Some(token.access_token),
			token_expiry: Some(token.expiry),
			project_id: token.project_id,
			service_account_email: self.spec.service_account_email.clone(),
			scopes: Vec::new(),
		}))
	}
}

fn build_wif_provider(
	name: &str,
	def: &ProviderDef,
	backend: Arc<dyn GcpBackend>,
) -> Result<Arc<dyn Provider>> {
	let spec: WifSpec =
		serde_json::from_value(serde_json::Value::Object(def.spec.clone())).map_err(|e| {
			AuthError::InvalidProviderConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(WifProvider {
		name: name.to_string(),
		spec,
		backend,
	}))
}

// ---------------------------------------------------------------------
// Identity: gcp/service-account
// ---------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ServiceAccountPrincipal {
	service_account_email: String,
	#[serde(default)]
	delegates: Vec<String>,
	#[serde(default)]
	scopes: Vec<String>,
}

pub struct ServiceAccountIdentity {
	name: String,
	provider_name: String,
	principal: ServiceAccountPrincipal,
	session_duration: Option<String>,
	backend: Arc<dyn GcpBackend>,
}

#[async_trait]
impl Identity for ServiceAccountIdentity {
	fn kind(&self) -> &str {
		"gcp/service-account"
	}
	fn provider_name(&self) -> &str {
		&self.provider_name
	}
	fn validate(&self) -> Result<()> {
		if self.principal.service_account_email.is_empty() {
			return Err(AuthError::MissingPrincipal {
				identity: self.name.clone(),
				field: "service_account_email".into(),
			});
		}
		Ok(())
	}
	async fn authenticate(&self, _base: Option<&Credentials>) -> Result<Credentials> {
		const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);
		let lifetime = self
			.session_duration
			.as_deref()
			.and_then(|s| agent_core::duration::parse_flexible(s).ok())
			.unwrap_or(DEFAULT_LIFETIME);
		let scopes = if self.principal.scopes.is_empty() {
			vec!["https://www.googleapis.com/auth/cloud-platform".to_string()]
		} else {
			self.principal.scopes.clone()
		};
		let token = self
			.backend
			.generate_access_token(
				&self.principal.service_account_email,
				&self.principal.delegates,
				lifetime,
				&scopes,
			)
			.await
			.map_err(|e| AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: e,
			})?;
		Ok(Credentials::Gcp(GcpCredentials {
			access_token: Some(token.access_token),
			token_expiry: Some(token.expiry),
			project_id: token.project_id,
			service_account_email: Some(self.principal.service_account_email.clone()),
			scopes,
		}))
	}
	async fn post_authenticate(&self, params: &PostAuthParams<'_>) -> Result<()> {
		let _ = params;
		// gcp/service-account credentials are never persisted to disk; the
		// impersonated token is short-lived by construction.
		Ok(())
	}
}

fn build_service_account_identity(
	name: &str,
	def: &IdentityDef,
	backend: Arc<dyn GcpBackend>,
) -> Result<Arc<dyn Identity>> {
	let principal: ServiceAccountPrincipal =
		serde_json::from_value(serde_json::Value::Object(def.principal.clone())).map_err(|e| {
			AuthError::InvalidIdentityConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(ServiceAccountIdentity {
		name: name.to_string(),
		provider_name: def.via.provider.clone().unwrap_or_default(),
		principal,
		session_duration: def.session.duration.clone(),
		backend,
	}))
}

// ---------------------------------------------------------------------
// Identity: gcp/project — context-only, no network I/O
// ---------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct ProjectPrincipal {
	project_id: String,
	#[serde(default)]
	region: Option<String>,
	#[serde(default)]
	zone: Option<String>,
	/// Legacy alias for `zone`; only consulted when `zone` is unset.
	#[serde(default)]
	location: Option<String>,
}

pub struct ProjectIdentity {
	name: String,
	provider_name: String,
	principal: ProjectPrincipal,
}

#[async_trait]
impl Identity for ProjectIdentity {
	fn kind(&self) -> &str {
		"gcp/project"
	}
	fn provider_name(&self) -> &str {
		&self.provider_name
	}
	fn validate(&self) -> Result<()> {
		if self.principal.project_id.is_empty() {
			return Err(AuthError::MissingPrincipal {
				identity: self.name.clone(),
				field: "project_id".into(),
			});
		}
		Ok(())
	}
	async fn authenticate(&self, base: Option<&Credentials>) -> Result<Credentials> {
		// Passes the base token through unmodified; only the project/region
		// environment composed from this identity changes.
		match base {
			Some(creds) => Ok(creds.clone()),
			None => Ok(Credentials::Gcp(GcpCredentials {
				access_token: None,
				token_expiry: None,
				project_id: self.principal.project_id.clone(),
				service_account_email: None,
				scopes: Vec::new(),
			})),
		}
	}
	fn environment(&self) -> std::collections::HashMap<String, String> {
		let mut env = std::collections::HashMap::new();
		env.insert("GOOGLE_CLOUD_PROJECT".into(), self.principal.project_id.clone());
		env.insert("GCLOUD_PROJECT".into(), self.principal.project_id.clone());
		env.insert("CLOUDSDK_CORE_PROJECT".into(), self.principal.project_id.clone());
		// Zone implies a region; when both are set zone takes precedence.
		// The legacy `location` field only fills in when zone is unset.
		let zone = self.principal.zone.as_ref().or(self.principal.location.as_ref());
		if let Some(zone) = zone {
			env.insert("CLOUDSDK_COMPUTE_ZONE".into(), zone.clone());
			if let Some(region) = zone.rsplit_once('-').map(|(r, _)| r.to_string()) {
				env.insert("CLOUDSDK_COMPUTE_REGION".into(), region);
			}
		} else if let Some(region) = &self.principal.region {
			env.insert("CLOUDSDK_COMPUTE_REGION".into(), region.clone());
		}
		env
	}
	async fn post_authenticate(&self, _params: &PostAuthParams<'_>) -> Result<()> {
		Ok(())
	}
}

fn build_project_identity(name: &str, def: &IdentityDef) -> Result<Arc<dyn Identity>> {
	let principal: ProjectPrincipal =
		serde_json::from_value(serde_json::Value::Object(def.principal.clone())).map_err(|e| {
			AuthError::InvalidIdentityConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(ProjectIdentity {
		name: name.to_string(),
		provider_name: def.via.provider.clone().unwrap_or_default(),
		principal,
	}))
}
