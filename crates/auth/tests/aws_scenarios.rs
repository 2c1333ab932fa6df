//! End-to-end seed scenarios exercised against an in-memory keyring, a
//! scratch on-disk base directory, and a canned AWS backend — no real
//! network or OS keyring access.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agent_auth::cache::KeyringCache;
use agent_auth::config::{AuthConfig, IdentityDef, ProviderDef, Via};
use agent_auth::registry::Registry;
use agent_auth::{AuthError, Credentials, Manager};

use agent_auth::backends::aws::{AwsBackendOps, SamlBackend, SsoBackend, StsBackend};
use agent_auth::contracts::{AwsCredentials, OidcCredentials};
use async_trait::async_trait;
use secrecy::SecretString;

struct CannedAwsBackend;

#[async_trait]
impl SsoBackend for CannedAwsBackend {
	async fn device_login(&self, _start_url: &str, _region: &str) -> anyhow::Result<String> {
		Ok("sso-access-token".to_string())
	}
	async fn list_accounts(&self, _token: &str) -> anyhow::Result<Vec<(String, String)>> {
		Ok(vec![("123456789012".to_string(), "DevAccess".to_string())])
	}
	async fn get_role_credentials(
		&self,
		_token: &str,
		account_id: &str,
		_role: &str,
		region: &str,
	) -> anyhow::Result<AwsCredentials> {
		Ok(AwsCredentials {
			access_key_id: format!("ASIA{account_id}"),
			secret_access_key: SecretString::from("session-secret".to_string()),
			session_token: Some(SecretString::from("session-token".to_string())),
			region: Some(region.to_string()),
			expiration: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
			mfa_arn: None,
			session_duration: None,
		})
	}
}

#[async_trait]
impl StsBackend for CannedAwsBackend {
	async fn get_session_token(
		&self,
		access_key_id: &str,
		_secret: &str,
		_mfa_arn: Option<&str>,
		_mfa_code: Option<&str>,
		_duration: Duration,
	) -> anyhow::Result<AwsCredentials> {
		Ok(AwsCredentials {
			access_key_id: access_key_id.to_string(),
			secret_access_key: SecretString::from("derived-session-secret".to_string()),
			session_token: Some(SecretString::from("derived-session-token".to_string())),
			region: None,
			expiration: Some(chrono::Utc::now() + chrono::Duration::hours(12)),
			mfa_arn: None,
			session_duration: None,
		})
	}
	async fn assume_role(
		&self,
		_base: &AwsCredentials,
		role_arn: &str,
		session_name: &str,
		_external_id: Option<&str>,
		_duration: Option<Duration>,
		region: &str,
	) -> anyhow::Result<AwsCredentials> {
		assert!(role_arn.starts_with("arn:aws:iam::"));
		assert!(!session_name.is_empty());
		Ok(AwsCredentials {
			access_key_id: "ASIAASSUMEDROLE".to_string(),
			secret_access_key: SecretString::from("assumed-secret".to_string()),
			session_token: Some(SecretString::from("assumed-token".to_string())),
			region: Some(region.to_string()),
			expiration: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
			mfa_arn: None,
			session_duration: None,
		})
	}
	async fn assume_role_with_web_identity(
		&self,
		oidc: &OidcCredentials,
		role_arn: &str,
		_session_name: &str,
		_duration: Option<Duration>,
		region: &str,
	) -> anyhow::Result<AwsCredentials> {
		assert_eq!(oidc.provider, "github");
		Ok(AwsCredentials {
			access_key_id: format!("ASIA-FROM-{role_arn}"),
			secret_access_key: SecretString::from("web-identity-secret".to_string()),
			session_token: Some(SecretString::from("web-identity-token".to_string())),
			region: Some(region.to_string()),
			expiration: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
			mfa_arn: None,
			session_duration: None,
		})
	}
	async fn assume_root(
		&self,
		_base: &AwsCredentials,
		_target_principal: &str,
		_task_policy_arn: &str,
		_duration: Duration,
		_region: &str,
	) -> anyhow::Result<AwsCredentials> {
		anyhow::bail!("not exercised in these scenarios")
	}
}

#[async_trait]
impl SamlBackend for CannedAwsBackend {
	async fn fetch_saml_assertion(&self, _endpoint: &str) -> anyhow::Result<String> {
		anyhow::bail!("not exercised in these scenarios")
	}
	async fn assume_role_with_saml(
		&self,
		_role_arn: &str,
		_principal_arn: &str,
		_assertion: &str,
		_duration: Option<Duration>,
	) -> anyhow::Result<AwsCredentials> {
		anyhow::bail!("not exercised in these scenarios")
	}
}

fn test_registry() -> Registry {
	let mut r = Registry::new();
	let backend: Arc<dyn AwsBackendOps> = Arc::new(CannedAwsBackend);
	agent_auth::backends::aws::register_with_backend(&mut r, backend);
	agent_auth::backends::github::register(&mut r);
	agent_auth::backends::mock::register(&mut r);
	r
}

fn test_registry_with_prompt(prompt: agent_auth::contracts::PromptFunc) -> Registry {
	let mut r = Registry::new();
	let backend: Arc<dyn AwsBackendOps> = Arc::new(CannedAwsBackend);
	agent_auth::backends::aws::register_with_backend_and_prompt(&mut r, backend, Some(prompt));
	agent_auth::backends::mock::register(&mut r);
	r
}

fn scratch_dir() -> PathBuf {
	std::env::temp_dir().join(format!("agent-auth-scenario-{}", uuid::Uuid::new_v4()))
}

fn sso_provider() -> ProviderDef {
	ProviderDef {
		kind: "aws/iam-identity-center".to_string(),
		spec: serde_json::json!({
			"start_url": "https://example.awsapps.com/start",
			"region": "us-east-1",
		})
		.as_object()
		.unwrap()
		.clone(),
		logout: Default::default(),
	}
}

fn permission_set_identity(provider: &str) -> IdentityDef {
	IdentityDef {
		kind: "aws/permission-set".to_string(),
		default: false,
		via: Via {
			provider: Some(provider.to_string()),
			identity: None,
		},
		principal: serde_json::json!({
			"account": { "id": "123456789012" },
			"permission_set": { "name": "DevAccess" },
		})
		.as_object()
		.unwrap()
		.clone(),
		credentials: Default::default(),
		env: Vec::new(),
		session: Default::default(),
	}
}

#[tokio::test]
async fn scenario_1_happy_path_sso_to_permission_set() {
	let mut config = AuthConfig::default();
	config.providers.insert("sso".into(), sso_provider());
	config.identities.insert("dev".into(), permission_set_identity("sso"));

	let manager = Manager::with_parts(config, test_registry(), KeyringCache::in_memory(), scratch_dir());
	let info = manager.authenticate("dev").await.unwrap();
	assert_eq!(info.identity, "dev");
	assert_eq!(info.region.as_deref(), Some("us-east-1"));
}

#[tokio::test]
async fn scenario_2_chained_assume_role() {
	let mut config = AuthConfig::default();
	config.providers.insert("sso".into(), sso_provider());
	config.identities.insert("dev".into(), permission_set_identity("sso"));
	config.identities.insert(
		"prod".into(),
		IdentityDef {
			kind: "aws/assume-role".to_string(),
			default: false,
			via: Via {
				provider: None,
				identity: Some("dev".into()),
			},
			principal: serde_json::json!({
				"assume_role": "arn:aws:iam::999999999999:role/Prod",
				"external_id": "abc",
			})
			.as_object()
			.unwrap()
			.clone(),
			credentials: Default::default(),
			env: Vec::new(),
			session: Default::default(),
		},
	);

	let manager = Manager::with_parts(config, test_registry(), KeyringCache::in_memory(), scratch_dir());
	let info = manager.authenticate("prod").await.unwrap();
	assert_eq!(info.identity, "prod");
}

#[tokio::test]
async fn scenario_5_cycle_fails_without_any_backend_call() {
	let mut config = AuthConfig::default();
	config.identities.insert(
		"a".into(),
		IdentityDef {
			kind: "mock".to_string(),
			default: false,
			via: Via {
				provider: None,
				identity: Some("b".into()),
			},
			principal: Default::default(),
			credentials: Default::default(),
			env: Vec::new(),
			session: Default::default(),
		},
	);
	config.identities.insert(
		"b".into(),
		IdentityDef {
			kind: "mock".to_string(),
			default: false,
			via: Via {
				provider: None,
				identity: Some("a".into()),
			},
			principal: Default::default(),
			credentials: Default::default(),
			env: Vec::new(),
			session: Default::default(),
		},
	);

	let manager = Manager::with_parts(config, test_registry(), KeyringCache::in_memory(), scratch_dir());
	let err = manager.authenticate("a").await.unwrap_err();
	match err {
		AuthError::InvalidAuthConfig(_) | AuthError::AuthenticationFailed { .. } => {},
		other => panic!("expected a resolver failure, got {other:?}"),
	}
}

#[tokio::test]
async fn single_flight_dedupes_concurrent_authenticate_calls() {
	let mut config = AuthConfig::default();
	config.providers.insert("sso".into(), sso_provider());
	config.identities.insert("dev".into(), permission_set_identity("sso"));

	let manager = Manager::with_parts(config, test_registry(), KeyringCache::in_memory(), scratch_dir());

	let mut handles = Vec::new();
	for _ in 0..6 {
		let manager = manager.clone();
		handles.push(tokio::spawn(async move { manager.authenticate("dev").await }));
	}
	for h in handles {
		h.await.unwrap().unwrap();
	}
}

#[tokio::test]
async fn scenario_3_oidc_through_assume_role_with_web_identity() {
	unsafe {
		std::env::set_var("AGENT_AUTH_TEST_OIDC_TOKEN", "gh-oidc-token");
	}

	let mut config = AuthConfig::default();
	config.providers.insert(
		"gh".into(),
		ProviderDef {
			kind: "github/oidc".to_string(),
			spec: serde_json::json!({
				"audience": "sts.amazonaws.com",
				"token_env": "AGENT_AUTH_TEST_OIDC_TOKEN",
			})
			.as_object()
			.unwrap()
			.clone(),
			logout: Default::default(),
		},
	);
	config.identities.insert(
		"prod-oidc".into(),
		IdentityDef {
			kind: "aws/assume-role".to_string(),
			default: false,
			via: Via {
				provider: Some("gh".into()),
				identity: None,
			},
			principal: serde_json::json!({
				"assume_role": "arn:aws:iam::999999999999:role/FromGithub",
			})
			.as_object()
			.unwrap()
			.clone(),
			credentials: Default::default(),
			env: Vec::new(),
			session: Default::default(),
		},
	);

	let manager = Manager::with_parts(config, test_registry(), KeyringCache::in_memory(), scratch_dir());
	let info = manager.authenticate("prod-oidc").await.unwrap();
	assert_eq!(info.identity, "prod-oidc");

	unsafe {
		std::env::remove_var("AGENT_AUTH_TEST_OIDC_TOKEN");
	}
}

#[tokio::test]
async fn scenario_4_aws_user_with_mfa_end_to_end() {
	// No YAML-configured credentials: the only way `aws/user` can find a
	// base to re-derive a session from is the keyring-cached bootstrap
	// entry, passed in by the Manager since `aws/user` isn't cache-terminal.
	let mut config = AuthConfig::default();
	config.identities.insert(
		"user".into(),
		IdentityDef {
			kind: "aws/user".to_string(),
			default: false,
			via: Via {
				provider: None,
				identity: None,
			},
			principal: Default::default(),
			credentials: Default::default(),
			env: Vec::new(),
			session: Default::default(),
		},
	);

	let keyring = KeyringCache::in_memory();
	let bootstrap = Credentials::Aws(AwsCredentials {
		access_key_id: "AKIABOOTSTRAP".into(),
		secret_access_key: SecretString::from("bootstrap-secret".to_string()),
		session_token: None,
		region: None,
		expiration: None,
		mfa_arn: Some("arn:aws:iam::123456789012:mfa/dev".into()),
		session_duration: None,
	});
	keyring.store_if_eligible("", "user", &bootstrap).unwrap();

	let prompt: agent_auth::contracts::PromptFunc = Arc::new(|_mfa_arn: &str| Ok("123456".to_string()));
	let manager = Manager::with_parts(config, test_registry_with_prompt(prompt), keyring, scratch_dir());

	let info = manager.authenticate("user").await.unwrap();
	assert_eq!(info.identity, "user");

	let Credentials::Aws(session) = info.credentials else {
		panic!("expected AWS credentials");
	};
	// A real `GetSessionToken` exchange happened rather than the raw
	// bootstrap credential being returned verbatim: it now carries a
	// session token the bootstrap entry never had.
	assert_eq!(session.access_key_id, "AKIABOOTSTRAP");
	assert!(session.session_token.is_some());
}

#[tokio::test]
async fn logout_purge_files_deletes_standalone_identity_credentials() {
	// `aws/user` is standalone (no `Provider` anywhere in its chain), so its
	// on-disk namespace can't be read off the resolved chain; `logout_identity`
	// must fall back to the identity's own `provider_name()` to find the file
	// it actually wrote, same namespace `UserIdentity::post_authenticate` uses.
	let xdg_home = scratch_dir();
	let files_base = xdg_home.join("atmos");
	unsafe {
		std::env::set_var("ATMOS_XDG_CONFIG_HOME", &xdg_home);
	}

	let mut config = AuthConfig::default();
	config.identities.insert(
		"user".into(),
		IdentityDef {
			kind: "aws/user".to_string(),
			default: false,
			via: Via {
				provider: None,
				identity: None,
			},
			principal: Default::default(),
			credentials: serde_json::json!({
				"access_key_id": "AKIAEXPLICIT",
				"secret_access_key": "explicit-secret",
			})
			.as_object()
			.unwrap()
			.clone(),
			env: Vec::new(),
			session: Default::default(),
		},
	);

	let manager = Manager::with_parts(config, test_registry(), KeyringCache::in_memory(), files_base.clone());
	manager.authenticate("user").await.unwrap();

	assert!(
		agent_auth::cache::files::load_credentials(&files_base, "", "aws-user", "user")
			.unwrap()
			.is_some(),
		"expected post_authenticate to have written the user's credentials section"
	);

	manager.logout_identity("user", true).await.unwrap();

	assert!(
		agent_auth::cache::files::load_credentials(&files_base, "", "aws-user", "user")
			.unwrap()
			.is_none(),
		"purge should have deleted the user's credentials section"
	);

	unsafe {
		std::env::remove_var("ATMOS_XDG_CONFIG_HOME");
	}
}

/// Counts `WARN`-level events emitted while it's the default subscriber;
/// used to assert the realm-mismatch warning fires at most once per process.
struct WarnCounter(Arc<std::sync::atomic::AtomicUsize>);

impl tracing::Subscriber for WarnCounter {
	fn enabled(&self, _metadata: &tracing::Metadata<'_>) -> bool {
		true
	}
	fn new_span(&self, _span: &tracing::span::Attributes<'_>) -> tracing::span::Id {
		tracing::span::Id::from_u64(1)
	}
	fn record(&self, _span: &tracing::span::Id, _values: &tracing::span::Record<'_>) {}
	fn record_follows_from(&self, _span: &tracing::span::Id, _follows: &tracing::span::Id) {}
	fn event(&self, event: &tracing::Event<'_>) {
		if *event.metadata().level() == tracing::Level::WARN {
			self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
		}
	}
	fn enter(&self, _span: &tracing::span::Id) {}
	fn exit(&self, _span: &tracing::span::Id) {}
}

#[tokio::test]
async fn scenario_6_realm_switch_warns_exactly_once() {
	let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
	let _guard = tracing::subscriber::set_default(WarnCounter(count.clone()));

	let mut config = AuthConfig::default();
	config.providers.insert("sso".into(), sso_provider());
	config.identities.insert("dev".into(), permission_set_identity("sso"));

	let manager = Manager::with_parts(config, test_registry(), KeyringCache::in_memory(), scratch_dir());

	unsafe {
		std::env::set_var("ATMOS_AUTH_REALM", "realm-a");
	}
	manager.authenticate("dev").await.unwrap();
	assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 0);

	unsafe {
		std::env::set_var("ATMOS_AUTH_REALM", "realm-b");
	}
	manager.authenticate("dev").await.unwrap();
	assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1, "realm switch should warn once");

	manager.authenticate("dev").await.unwrap();
	assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1, "warning must not repeat");

	unsafe {
		std::env::remove_var("ATMOS_AUTH_REALM");
	}
}
