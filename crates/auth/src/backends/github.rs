//! `github/oidc` — mints a GitHub Actions OIDC token for federation into
//! another cloud's `*/assume-role`/`*/workload-identity-federation`
//! provider. Three token sources, tried in order: an environment variable
//! holding the raw token, a file path holding it, or the GitHub Actions
//! runtime token-request endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Deserialize;

use crate::config::ProviderDef;
use crate::contracts::{Credentials, OidcCredentials, Provider};
use crate::error::{AuthError, Result};
use crate::registry::Registry;

/// The GitHub Actions token-request call, specified abstractly — this
/// core never speaks HTTP to `ACTIONS_ID_TOKEN_REQUEST_URL` directly.
#[async_trait]
pub trait GithubOidcBackend: Send + Sync {
	async fn request_token(&self, request_url: &str, request_token: &str, audience: &str) -> anyhow::Result<String>;
}

pub struct UnconfiguredGithubBackend;

#[async_trait]
impl GithubOidcBackend for UnconfiguredGithubBackend {
	async fn request_token(&self, _: &str, _: &str, _: &str) -> anyhow::Result<String> {
		anyhow::bail!("no GitHub OIDC backend configured")
	}
}

pub fn register(r: &mut Registry) {
	register_with_backend(r, Arc::new(UnconfiguredGithubBackend));
}

pub fn register_with_backend(r: &mut Registry, backend: Arc<dyn GithubOidcBackend>) {
	r.register_provider(
		"github/oidc",
		Arc::new(move |name, def| build_provider(name, def, backend.clone())),
	);
}

#[derive(Debug, Deserialize)]
struct GithubOidcSpec {
	audience: String,
	#[serde(default)]
	token_env: Option<String>,
	#[serde(default)]
	token_file: Option<String>,
}

pub struct GithubOidcProvider {
	name: String,
	spec: GithubOidcSpec,
	backend: Arc<dyn GithubOidcBackend>,
}

#[async_trait]
impl Provider for GithubOidcProvider {
	fn kind(&self) -> &str {
		"github/oidc"
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
		let token = self.fetch_token().await?;
		Ok(Credentials::Oidc(OidcCredentials {
			token: SecretString::from(token),
			provider: "github".to_string(),
			audience: self.spec.audience.clone(),
			// GitHub-minted OIDC tokens are always short-lived (~5 min);
			// callers exchange them immediately rather than caching them.
			expiration: Some(chrono::Utc::now() + chrono::Duration::minutes(5)),
		}))
	}
}

impl GithubOidcProvider {
	async fn fetch_token(&self) -> Result<String> {
		if let Some(env_var) = &self.spec.token_env {
			if let Ok(token) = std::env::var(env_var) {
				return Ok(token);
			}
		}
		if let Some(path) = &self.spec.token_file {
			if let Ok(contents) = fs_err::read_to_string(path) {
				return Ok(contents.trim().to_string());
			}
		}
		let request_url = std::env::var("ACTIONS_ID_TOKEN_REQUEST_URL").map_err(|_| {
			AuthError::AwsMissingEnvVars(vec![
				"ACTIONS_ID_TOKEN_REQUEST_URL".into(),
				"ACTIONS_ID_TOKEN_REQUEST_TOKEN".into(),
			])
		})?;
		let request_token = std::env::var("ACTIONS_ID_TOKEN_REQUEST_TOKEN").map_err(|_| {
			AuthError::AwsMissingEnvVars(vec!["ACTIONS_ID_TOKEN_REQUEST_TOKEN".into()])
		})?;
		self.backend
			.request_token(&request_url, &request_token, &self.spec.audience)
			.await
			.map_err(|e| AuthError::AuthenticationFailed {
				identity: self.name.clone(),
				source: e,
			})
	}
}

fn build_provider(
	name: &str,
	def: &ProviderDef,
	backend: Arc<dyn GithubOidcBackend>,
) -> Result<Arc<dyn Provider>> {
	let spec: GithubOidcSpec =
		serde_json::from_value(serde_json::Value::Object(def.spec.clone())).map_err(|e| {
			AuthError::InvalidProviderConfig {
				name: name.to_string(),
				reason: e.to_string(),
			}
		})?;
	Ok(Arc::new(GithubOidcProvider {
		name: name.to_string(),
		spec,
		backend,
	}))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn reads_token_from_configured_env_var() {
		// SAFETY: test-scoped; no other test touches this key concurrently
		// (serial by virtue of being in the same test binary section).
		unsafe {
			std::env::set_var("GH_OIDC_TEST_TOKEN", "tok123");
		}
		let provider = GithubOidcProvider {
			name: "gh".into(),
			spec: GithubOidcSpec {
				audience: "sts.amazonaws.com".into(),
				token_env: Some("GH_OIDC_TEST_TOKEN".into()),
				token_file: None,
			},
			backend: Arc::new(UnconfiguredGithubBackend),
		};
		let creds = provider.authenticate().await.unwrap();
		let Credentials::Oidc(oidc) = creds else {
			panic!("expected OIDC credentials");
		};
		use secrecy::ExposeSecret;
		assert_eq!(oidc.token.expose_secret(), "tok123");
		unsafe {
			std::env::remove_var("GH_OIDC_TEST_TOKEN");
		}
	}

	#[test]
	fn validate_requires_audience() {
		let provider = GithubOidcProvider {
			name: "gh".into(),
			spec: GithubOidcSpec {
				audience: String::new(),
				token_env: None,
				token_file: None,
			},
			backend: Arc::new(UnconfiguredGithubBackend),
		};
		assert!(provider.validate().is_err());
	}
}
