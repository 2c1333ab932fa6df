//! `mock` / `mock/aws` — test-harness backends registered as real kinds
//! rather than gated behind `#[cfg(test)]`, so integration tests can wire
//! them in through the ordinary registry.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;

use crate::config::{IdentityDef, ProviderDef};
use crate::contracts::{
	AwsCredentials, Credentials, Identity, MockCredentials, PostAuthParams, Provider,
};
use crate::error::{AuthError, Result};
use crate::registry::Registry;

pub fn register(r: &mut Registry) {
	r.register_provider("mock", Arc::new(build_provider));
	r.register_identity("mock", Arc::new(build_identity));
	r.register_identity("mock/aws", Arc::new(build_aws_identity));
}

#[derive(Debug, Default, Deserialize)]
struct MockSpec {
	#[serde(default)]
	fail: Option<String>,
	#[serde(default)]
	region: Option<String>,
	#[serde(default)]
	ephemeral: bool,
}

fn parse_spec(raw: &serde_json::Map<String, serde_json::Value>) -> MockSpec {
	serde_json::from_value(serde_json::Value::Object(raw.clone())).unwrap_or_default()
}

pub struct MockProvider {
	name: String,
	spec: MockSpec,
}

#[async_trait]
impl Provider for MockProvider {
	fn kind(&self) -> &str {
		"mock"
	}
	fn name(&self) -> &str {
		&self.name
	}
	fn validate(&self) -> Result<()> {
		Ok(())
	}
	async fn authenticate(&self) -> Result<Credentials> {
		if let Some(reason) = &self.spec.fail {
			return Err(AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: anyhow::anyhow!(reason.clone()),
			});
		}
		Ok(Credentials::Mock(MockCredentials {
			label: self.name.clone(),
			expiration: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
			ephemeral: self.spec.ephemeral,
		}))
	}
}

fn build_provider(name: &str, def: &ProviderDef) -> Result<Arc<dyn Provider>> {
	Ok(Arc::new(MockProvider {
		name: name.to_string(),
		spec: parse_spec(&def.spec),
	}))
}

pub struct MockIdentity {
	name: String,
	provider_name: String,
	standalone: bool,
	spec: MockSpec,
}

#[async_trait]
impl Identity for MockIdentity {
	fn kind(&self) -> &str {
		"mock"
	}
	fn provider_name(&self) -> &str {
		&self.provider_name
	}
	fn validate(&self) -> Result<()> {
		Ok(())
	}
	async fn authenticate(&self, base: Option<&Credentials>) -> Result<Credentials> {
		if let Some(reason) = &self.spec.fail {
			return Err(AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: anyhow::anyhow!(reason.clone()),
			});
		}
		if let Some(base) = base {
			return Ok(base.clone());
		}
		Ok(Credentials::Mock(MockCredentials {
			label: self.name.clone(),
			expiration: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
			ephemeral: self.spec.ephemeral,
		}))
	}
	async fn post_authenticate(&self, _params: &PostAuthParams<'_>) -> Result<()> {
		Ok(())
	}
	fn standalone_eligible(&self) -> bool {
		self.standalone
	}
}

fn build_identity(name: &str, def: &IdentityDef) -> Result<Arc<dyn Identity>> {
	Ok(Arc::new(MockIdentity {
		name: name.to_string(),
		provider_name: def.via.provider.clone().unwrap_or_default(),
		standalone: def.via.provider.is_none() && def.via.identity.is_none(),
		spec: parse_spec(&def.principal),
	}))
}

pub struct MockAwsIdentity {
	name: String,
	provider_name: String,
	spec: MockSpec,
}

#[async_trait]
impl Identity for MockAwsIdentity {
	fn kind(&self) -> &str {
		"mock/aws"
	}
	fn provider_name(&self) -> &str {
		&self.provider_name
	}
	fn validate(&self) -> Result<()> {
		Ok(())
	}
	async fn authenticate(&self, _base: Option<&Credentials>) -> Result<Credentials> {
		if let Some(reason) = &self.spec.fail {
			return Err(AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: anyhow::anyhow!(reason.clone()),
			});
		}
		Ok(Credentials::Aws(AwsCredentials {
			access_key_id: format!("AKIAMOCK{}", self.name.to_uppercase()),
			secret_access_key: SecretString::from("mock-secret".to_string()),
			session_token: Some(SecretString::from("mock-session-token".to_string())),
			region: self.spec.region.clone().or_else(|| Some("us-east-1".into())),
			expiration: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
			mfa_arn: None,
			session_duration: None,
		}))
	}
	async fn post_authenticate(&self, _params: &PostAuthParams<'_>) -> Result<()> {
		Ok(())
	}
}

fn build_aws_identity(name: &str, def: &IdentityDef) -> Result<Arc<dyn Identity>> {
	Ok(Arc::new(MockAwsIdentity {
		name: name.to_string(),
		provider_name: def.via.provider.clone().unwrap_or_default(),
		spec: parse_spec(&def.principal),
	}))
}
