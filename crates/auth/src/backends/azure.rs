//! Azure providers (`azure/cli`, `azure/device-code`, `azure/oidc`) and the
//! `azure/subscription` identity, modeled on the `DefaultAzureCredential`-
//! style chaining that `azure_identity` builds.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;

use crate::config::{IdentityDef, ProviderDef};
use crate::contracts::{AzureCredentials, Credentials, Identity, PostAuthParams, Provider};
use crate::error::{AuthError, Result};
use crate::registry::Registry;

/// The three Azure token sources this core chains through, specified
/// abstractly: `az` CLI token caching, the device-code flow, and an OIDC
/// federated-identity exchange.
#[async_trait]
pub trait AzureBackend: Send + Sync {
	async fn cli_token(&self, tenant_id: Option<&str>, scopes: &[String]) -> anyhow::Result<AzureToken>;
	async fn device_code_token(
		&self,
		tenant_id: &str,
		client_id: &str,
		scopes: &[String],
	) -> anyhow::Result<AzureToken>;
	async fn oidc_token(
		&self,
		tenant_id: &str,
		client_id: &str,
		federated_token: &str,
		scopes: &[String],
	) -> anyhow::Result<AzureToken>;
}

pub struct AzureToken {
	pub access_token: SecretString,
	pub expiry: chrono::DateTime<chrono::Utc>,
}

pub struct UnconfiguredAzureBackend;

#[async_trait]
impl AzureBackend for UnconfiguredAzureBackend {
	async fn cli_token(&self, _: Option<&str>, _: &[String]) -> anyhow::Result<AzureToken> {
		anyhow::bail!("no Azure backend configured")
	}
	async fn device_code_token(&self, _: &str, _: &str, _: &[String]) -> anyhow::Result<AzureToken> {
		anyhow::bail!("no Azure backend configured")
	}
	async fn oidc_token(&self, _: &str, _: &str, _: &str, _: &[String]) -> anyhow::Result<AzureToken> {
		anyhow::bail!("no Azure backend configured")
	}
}

pub fn register(r: &mut Registry) {
	register_with_backend(r, Arc::new(UnconfiguredAzureBackend));
}

pub fn register_with_backend(r: &mut Registry, backend: Arc<dyn AzureBackend>) {
	{
		let backend = backend.clone();
		r.register_provider(
			"azure/cli",
			Arc::new(move |name, def| build_cli_provider(name, def, backend.clone())),
		);
	}
	{
		let backend = backend.clone();
		r.register_provider(
			"azure/device-code",
			Arc::new(move |name, def| build_device_code_provider(name, def, backend.clone())),
		);
	}
	{
		let backend = backend.clone();
		r.register_provider(
			"azure/oidc",
			Arc::new(move |name, def| build_oidc_provider(name, def, backend.clone())),
		);
	}
	r.register_identity("azure/subscription", Arc::new(build_subscription_identity));
}

fn default_scopes() -> Vec<String> {
	vec!["https://management.azure.com/.default".to_string()]
}

// ---------------------------------------------------------------------
// Provider: azure/cli
// ---------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct CliSpec {
	#[serde(default)]
	tenant_id: Option<String>,
}

pub struct CliProvider {
	name: String,
	spec: CliSpec,
	backend: Arc<dyn AzureBackend>,
}

#[async_trait]
impl Provider for CliProvider {
	fn kind(&self) -> &str {
		"azure/cli"
	}
	fn name(&self) -> &str {
		&self.name
	}
	fn validate(&self) -> Result<()> {
		Ok(())
	}
	async fn authenticate(&self) -> Result<Credentials> {
		let token = self
			.backend
			.cli_token(self.spec.tenant_id.as_deref(), &default_scopes())
			.await
			.map_err(|e| AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: e,
			})?;
		Ok(Credentials::Azure(AzureCredentials {
			access_token: token.access_token,
			tenant_id: self.spec.tenant_id.clone().unwrap_or_default(),
			subscription_id: None,
			expiration: Some(token.expiry),
		}))
	}
}

fn build_cli_provider(
	name: &str,
	def: &ProviderDef,
	backend: Arc<dyn AzureBackend>,
) -> Result<Arc<dyn Provider>> {
	let spec: CliSpec =
		serde_json::from_value(serde_json::Value::Object(def.spec.clone())).map_err(|e| {
			AuthError::InvalidProviderConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(CliProvider {
		name: name.to_string(),
		spec,
		backend,
	}))
}

// ---------------------------------------------------------------------
// Provider: azure/device-code
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct DeviceCodeSpec {
	tenant_id: String,
	client_id: String,
}

pub struct DeviceCodeProvider {
	name: String,
	spec: DeviceCodeSpec,
	backend: Arc<dyn AzureBackend>,
}

#[async_trait]
impl Provider for DeviceCodeProvider {
	fn kind(&self) -> &str {
		"azure/device-code"
	}
	fn name(&self) -> &str {
		&self.name
	}
	fn validate(&self) -> Result<()> {
		if self.spec.tenant_id.is_empty() || self.spec.client_id.is_empty() {
			return Err(AuthError::InvalidProviderConfig {
				name: self.name.clone(),
				reason: "tenant_id and client_id are required".into(),
			});
		}
		Ok(())
	}
	async fn authenticate(&self) -> Result<Credentials> {
		let token = self
			.backend
			.device_code_token(&self.spec.tenant_id, &self.spec.client_id, &default_scopes())
			.await
			.map_err(|e| AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: e,
			})?;
		Ok(Credentials::Azure(AzureCredentials {
			access_token: token.access_token,
			tenant_id: self.spec.tenant_id.clone(),
			subscription_id: None,
			expiration: Some(token.expiry),
		}))
	}
}

fn build_device_code_provider(
	name: &str,
	def: &ProviderDef,
	backend: Arc<dyn AzureBackend>,
) -> Result<Arc<dyn Provider>> {
	let spec: DeviceCodeSpec =
		serde_json::from_value(serde_json::Value::Object(def.spec.clone())).map_err(|e| {
			AuthError::InvalidProviderConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(DeviceCodeProvider {
		name: name.to_string(),
		spec,
		backend,
	}))
}

// ---------------------------------------------------------------------
// Provider: azure/oidc
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OidcSpec {
	tenant_id: String,
	client_id: String,
	#[serde(default)]
	token_source_env: Option<String>,
}

pub struct AzureOidcProvider {
	name: String,
	spec: OidcSpec,
	backend: Arc<dyn AzureBackend>,
}

#[async_trait]
impl Provider for AzureOidcProvider {
	fn kind(&self) -> &str {
		"azure/oidc"
	}
	fn name(&self) -> &str {
		&self.name
	}
	fn validate(&self) -> Result<()> {
		if self.spec.tenant_id.is_empty() || self.spec.client_id.is_empty() {
			return Err(AuthError::InvalidProviderConfig {
				name: self.name.clone(),
				reason: "tenant_id and client_id are required".into(),
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
		let federated_token =
			std::env::var(&env_var).map_err(|_| AuthError::AwsMissingEnvVars(vec![env_var.clone()]))?;
		let token = self
			.backend
			.oidc_token(
				&self.spec.tenant_id,
				&self.spec.client_id,
				&federated_token,
				&default_scopes(),
			)
			.await
			.map_err(|e| AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: e,
			})?;
		Ok(Credentials::Azure(AzureCredentials {
			access_token: token.access_token,
			tenant_id: self.spec.tenant_id.clone(),
			subscription_id: None,
			expiration: Some(token.expiry),
		}))
	}
}

fn build_oidc_provider(
	name: &str,
	def: &ProviderDef,
	backend: Arc<dyn AzureBackend>,
) -> Result<Arc<dyn Provider>> {
	let spec: OidcSpec =
		serde_json::from_value(serde_json::Value::Object(def.spec.clone())).map_err(|e| {
			AuthError::InvalidProviderConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(AzureOidcProvider {
		name: name.to_string(),
		spec,
		backend,
	}))
}

// ---------------------------------------------------------------------
// Identity: azure/subscription — selects a subscription within a tenant;
// carries no separate token of its own.
// ---------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct SubscriptionPrincipal {
	subscription_id: String,
}

pub struct SubscriptionIdentity {
	name: String,
	provider_name: String,
	principal: SubscriptionPrincipal,
}

#[async_trait]
impl Identity for SubscriptionIdentity {
	fn kind(&self) -> &str {
		"azure/subscription"
	}
	fn provider_name(&self) -> &str {
		&self.provider_name
	}
	fn validate(&self) -> Result<()> {
		if self.principal.subscription_id.is_empty() {
			return Err(AuthError::MissingPrincipal {
				identity: self.name.clone(),
				field: "subscription_id".into(),
			});
		}
		Ok(())
	}
	async fn authenticate(&self, base: Option<&Credentials>) -> Result<Credentials> {
		let Some(Credentials::Azure(base)) = base else {
			return Err(AuthError::InvalidIdentityConfig {
				name: self.name.clone(),
				reason: "incompatible credentials".into(),
			});
		};
		let mut creds = base.clone();
		creds.subscription_id = Some(self.principal.subscription_id.clone());
		Ok(Credentials::Azure(creds))
	}
	fn environment(&self) -> std::collections::HashMap<String, String> {
		let mut env = std::collections::HashMap::new();
		env.insert(
			"AZURE_SUBSCRIPTION_ID".into(),
			self.principal.subscription_id.clone(),
		);
		env
	}
	async fn post_authenticate(&self, _params: &PostAuthParams<'_>) -> Result<()> {
		Ok(())
	}
}

fn build_subscription_identity(name: &str, def: &IdentityDef) -> Result<Arc<dyn Identity>> {
	let principal: SubscriptionPrincipal =
		serde_json::from_value(serde_json::Value::Object(def.principal.clone())).map_err(|e| {
			AuthError::InvalidIdentityConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(SubscriptionIdentity {
		name: name.to_string(),
		provider_name: def.via.provider.clone().unwrap_or_default(),
		principal,
	}))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn subscription_identity_rejects_non_azure_base() {
		let identity = SubscriptionIdentity {
			name: "sub".into(),
			provider_name: "cli".into(),
			principal: SubscriptionPrincipal {
				subscription_id: "11111111-1111-1111-1111-111111111111".into(),
			},
		};
		let err = identity
			.authenticate(Some(&Credentials::Mock(crate::contracts::MockCredentials {
				label: "x".into(),
				expiration: None,
				ephemeral: false,
			})))
			.await
			.unwrap_err();
		assert!(matches!(err, AuthError::InvalidIdentityConfig { .. }));
	}
}
