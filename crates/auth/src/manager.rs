//! The Auth Manager: executes a resolved chain leaf-first,
//! brokering credentials between links, enforcing the cache policy and the
//! realm-mismatch warning, and composing child-process environments.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;

use crate::cache::{files, KeyringCache};
use crate::chain::{self, LinkRole};
use crate::config::AuthConfig;
use crate::context::AuthContext;
use crate::contracts::{Credentials, PostAuthParams, WhoamiInfo};
use crate::error::{AuthError, ChainError, Result};
use crate::registry::Registry;
use crate::singleflight;

struct Inner {
	config: AuthConfig,
	registry: Registry,
	keyring: KeyringCache,
	files_base: PathBuf,
	inflight: singleflight::Group,
	context: SyncMutex<AuthContext>,
	realm_mismatch_warned: AtomicBool,
}

/// Cheaply cloneable handle; each clone shares the same registry, cache
/// handles, and in-flight map — a Manager exclusively owns these, they are
/// never shared across distinct Manager instances.
#[derive(Clone)]
pub struct Manager(Arc<Inner>);

impl Manager {
	pub fn new(config: AuthConfig) -> Self {
		Self::with_parts(
			config,
			crate::registry::GLOBAL_REGISTRY.clone(),
			KeyringCache::os_native(),
			files::base_dir(),
		)
	}

	/// Used by tests and by embedders who want an isolated registry/cache
	/// rather than the process-wide defaults.
	pub fn with_parts(
		config: AuthConfig,
		registry: Registry,
		keyring: KeyringCache,
		files_base: PathBuf,
	) -> Self {
		Self(Arc::new(Inner {
			config,
			registry,
			keyring,
			files_base,
			inflight: singleflight::Group::new(),
			context: SyncMutex::new(AuthContext::new()),
			realm_mismatch_warned: AtomicBool::new(false),
		}))
	}

	fn realm(&self) -> String {
		std::env::var("ATMOS_AUTH_REALM").unwrap_or_else(|_| self.0.config.realm().to_string())
	}

	/// The root provider name for an identity's resolved chain, stable
	/// across calls; `None` for a standalone-eligible chain.
	pub fn get_provider_for_identity(&self, identity_name: &str) -> Result<Option<String>> {
		let chain = chain::resolve(&self.0.config, identity_name)?;
		Ok(match chain.first() {
			Some(link) if link.role == LinkRole::Provider => Some(link.name.clone()),
			_ => None,
		})
	}

	pub fn get_default_identity(&self, force: bool) -> Result<String> {
		let defaults: Vec<&String> = self
			.0
			.config
			.identities
			.iter()
			.filter(|(_, def)| def.default)
			.map(|(name, _)| name)
			.collect();
		if force {
			return Err(AuthError::InvalidAuthConfig(
				"interactive default-identity selection requires a TTY prompt, which this core does not own".into(),
			));
		}
		match defaults.as_slice() {
			[single] => Ok((*single).clone()),
			[] => Err(AuthError::InvalidAuthConfig(
				"no identity is marked `default: true`".into(),
			)),
			_ => Err(AuthError::InvalidAuthConfig(
				"more than one identity is marked `default: true`".into(),
			)),
		}
	}

	/// The env map a chain composes for a child process, inherited vars
	/// first, each link's
	/// `PrepareEnvironment`/`Environment` applied in chain order, then
	/// identity-declared `env[]` extras layered on top.
	pub fn get_environment_variables(&self, identity_name: &str) -> Result<HashMap<String, String>> {
		let chain = chain::resolve(&self.0.config, identity_name)?;
		let mut env: HashMap<String, String> = std::env::vars().collect();
		for link in &chain {
			match link.role {
				LinkRole::Provider => {
					let def = self.0.config.providers.get(&link.name).ok_or_else(|| {
						AuthError::InvalidAuthConfig(format!("unknown provider {:?}", link.name))
					})?;
					let provider = self.0.registry.build_provider(&link.name, def)?;
					env = provider.prepare_environment(&env);
					env.extend(provider.environment());
				},
				LinkRole::Identity => {
					let def = self.0.config.identities.get(&link.name).ok_or_else(|| {
						AuthError::InvalidAuthConfig(format!("unknown identity {:?}", link.name))
					})?;
					let identity = self.0.registry.build_identity(&link.name, def)?;
					env = identity.prepare_environment(&env);
					env.extend(identity.environment());
					for extra in &def.env {
						env.insert(extra.key.clone(), extra.value.clone());
					}
				},
			}
		}
		Ok(env)
	}

	/// Resolves the chain, runs each link
	/// leaf-first under single-flight de-duplication keyed by the target
	/// identity name, and returns the final link's credentials wrapped in a
	/// `WhoamiInfo`.
	pub async fn authenticate(&self, identity_name: &str) -> Result<WhoamiInfo> {
		let span = tracing::info_span!("authenticate", identity = %identity_name);
		let _enter = span.enter();

		let inner = self.0.clone();
		let key = identity_name.to_string();
		let result = self
			.0
			.inflight
			.work(identity_name, move || {
				let target = key.clone();
				async move { inner.run_chain(&target).await }
			})
			.await;

		match result {
			Ok(creds) => Ok(build_whoami(identity_name, creds)),
			Err(err) => Err(err.as_ref().clone_shallow()),
		}
	}

	/// Deletes the keyring entry for the
	/// current realm, runs the link's own `Logout`, and optionally purges
	/// its on-disk section — never touching sibling identities' sections.
	pub async fn logout_identity(&self, identity_name: &str, purge_files: bool) -> Result<()> {
		let realm = self.realm();
		let def = self.0.config.identities.get(identity_name).ok_or_else(|| {
			AuthError::InvalidAuthConfig(format!("unknown identity {identity_name:?}"))
		})?;
		let identity = self.0.registry.build_identity(identity_name, def)?;

		identity.logout().await.map_err(|e| AuthError::LogoutFailed {
			identity: identity_name.to_string(),
			source: anyhow::Error::new(e),
		})?;

		self.0
			.keyring
			.delete(&realm, identity_name)
			.map_err(|e| AuthError::LogoutFailed {
				identity: identity_name.to_string(),
				source: anyhow::Error::new(e),
			})?;

		if purge_files {
			// A standalone identity (no `Provider` anywhere in its chain) has
			// no chain-derived provider name; fall back to its own, which is
			// the namespace its `post_authenticate` actually wrote files under.
			let provider_name = match self.get_provider_for_identity(identity_name)? {
				Some(name) => name,
				None => identity.provider_name().to_string(),
			};
			files::delete_identity(&self.0.files_base, &realm, &provider_name, identity_name).map_err(
				|e| AuthError::LogoutFailed {
					identity: identity_name.to_string(),
					source: anyhow::Error::new(e),
				},
			)?;
		}
		Ok(())
	}

	/// Logs out every configured identity.
	pub async fn logout_all(&self, purge_files: bool) -> Result<()> {
		let names: Vec<String> = self.0.config.identities.keys().cloned().collect();
		for name in names {
			self.logout_identity(&name, purge_files).await?;
		}
		Ok(())
	}
}

fn build_whoami(identity_name: &str, credentials: Credentials) -> WhoamiInfo {
	let mut info = WhoamiInfo {
		identity: identity_name.to_string(),
		credentials_ref: identity_name.to_string(),
		region: credentials.region().map(|s| s.to_string()),
		expiration: credentials.expiration(),
		environment: HashMap::new(),
		credentials: credentials.clone(),
	};
	credentials.build_whoami_fragment(&mut info);
	info
}

impl Inner {
	async fn run_chain(&self, identity_name: &str) -> std::result::Result<Credentials, AuthError> {
		let chain = chain::resolve(&self.config, identity_name)?;
		let realm = std::env::var("ATMOS_AUTH_REALM").unwrap_or_else(|_| self.config.realm().to_string());

		// For a standalone chain (no `Provider` link at all) the root is an
		// `Identity`; its own `provider_name()` is the file-tier namespace its
		// `post_authenticate`/cold-start paths actually write/read under, not
		// the empty string.
		let root_provider_name = match chain.first() {
			Some(link) if link.role == LinkRole::Provider => link.name.clone(),
			Some(link) => {
				let def = self.config.identities.get(&link.name).ok_or_else(|| {
					AuthError::InvalidAuthConfig(format!("unknown identity {:?}", link.name))
				})?;
				let identity = self.registry.build_identity(&link.name, def)?;
				identity.provider_name().to_string()
			},
			None => String::new(),
		};

		let mut prev: Option<Credentials> = None;
		for link in &chain {
			let next = self
				.run_link(link, prev.as_ref(), &realm, &root_provider_name, identity_name)
				.await
				.map_err(|e| {
					let chain_err = ChainError::new(
						chain.iter().map(|l| l.name.clone()).collect(),
						link.name.clone(),
						e,
					);
					AuthError::AuthenticationFailed {
						identity: identity_name.to_string(),
						source: anyhow::Error::new(chain_err),
					}
				})?;
			prev = Some(next);
		}
		prev.ok_or_else(|| AuthError::InvalidAuthConfig(format!("empty chain for {identity_name:?}")))
	}

	async fn run_link(
		&self,
		link: &chain::ChainLink,
		prev: Option<&Credentials>,
		realm: &str,
		root_provider_name: &str,
		target_identity: &str,
	) -> Result<Credentials> {
		match link.role {
			LinkRole::Provider => {
				let def = self.config.providers.get(&link.name).ok_or_else(|| {
					AuthError::InvalidAuthConfig(format!("unknown provider {:?}", link.name))
				})?;
				let provider = self.registry.build_provider(&link.name, def)?;
				provider.validate()?;
				provider.pre_authenticate().await?;
				tracing::debug!(provider = %link.name, "authenticating provider");
				provider.authenticate().await
			},
			LinkRole::Identity => {
				let def = self.config.identities.get(&link.name).ok_or_else(|| {
					AuthError::InvalidAuthConfig(format!("unknown identity {:?}", link.name))
				})?;
				let identity = self.registry.build_identity(&link.name, def)?;
				identity.validate()?;

				let cached = self.keyring.retrieve(realm, &link.name).ok().flatten();
				let cache_is_terminal = identity.cache_is_terminal();

				if cache_is_terminal {
					if let Some(cached) = &cached {
						tracing::debug!(identity = %link.name, "using cached credentials");
						return Ok(cached.clone());
					}
				}

				self.maybe_warn_realm_mismatch(realm, root_provider_name, &link.name);

				if let Some(prev) = prev {
					chain::check_compatible(identity.kind(), prev)?;
				}

				// For identities whose cache isn't terminal, the cached entry
				// (bootstrap material, not a session) stands in for `base` when
				// there's no chain predecessor to supply one.
				let auth_base = if cache_is_terminal {
					prev
				} else {
					cached.as_ref().or(prev)
				};

				tracing::debug!(identity = %link.name, target = %target_identity, "authenticating identity");
				let creds = identity.authenticate(auth_base).await?;

				let params = PostAuthParams {
					provider_name: root_provider_name,
					identity_name: &link.name,
					realm,
					credentials: &creds,
				};
				identity.post_authenticate(&params).await?;

				if let Err(e) = self.keyring.store_if_eligible(realm, &link.name, &creds) {
					tracing::warn!(identity = %link.name, error = %e, "failed to cache credentials; continuing");
				}

				self.context.lock().update(&link.name, &creds, identity.environment());

				Ok(creds)
			},
		}
	}

	/// Warns at most once per process when cached credentials for this
	/// identity exist under a different realm.
	fn maybe_warn_realm_mismatch(&self, realm: &str, provider_name: &str, identity_name: &str) {
		if self.realm_mismatch_warned.load(Ordering::SeqCst) {
			return;
		}
		let found_in_empty_realm = !realm.is_empty()
			&& self.keyring.probe_empty_realm(identity_name).unwrap_or(false);
		let found_on_disk = files::scan_realms_for_identity(&self.files_base, provider_name, identity_name)
			.iter()
			.any(|r| r != realm);

		if (found_in_empty_realm || found_on_disk) && !self.realm_mismatch_warned.swap(true, Ordering::SeqCst) {
			tracing::warn!(
				identity = %identity_name,
				current_realm = %realm,
				"credentials for this identity exist under a different realm; re-login if that was unintentional"
			);
		}
	}
}

impl AuthError {
	/// A shallow clone for propagating a shared single-flight error to every
	/// joined caller (`AuthError` itself isn't `Clone` because `anyhow::Error`
	/// isn't; this preserves the message without the original cause chain's
	/// concrete type).
	fn clone_shallow(&self) -> AuthError {
		match self {
			AuthError::AuthenticationFailed { identity, source } => AuthError::AuthenticationFailed {
				identity: identity.clone(),
				source: anyhow::anyhow!(source.to_string()),
			},
			other => AuthError::InvalidAuthConfig(other.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{IdentityDef, ProviderDef, Via};

	fn test_manager(config: AuthConfig) -> Manager {
		let dir = std::env::temp_dir().join(format!("agent-auth-manager-test-{}", uuid::Uuid::new_v4()));
		Manager::with_parts(
			config,
			crate::registry::default_registry(),
			KeyringCache::in_memory(),
			dir,
		)
	}

	fn mock_identity(via: Via) -> IdentityDef {
		IdentityDef {
			kind: "mock".into(),
			default: false,
			via,
			principal: Default::default(),
			credentials: Default::default(),
			env: Vec::new(),
			session: Default::default(),
		}
	}

	#[tokio::test]
	async fn authenticates_standalone_mock_identity() {
		let mut config = AuthConfig::default();
		config.identities.insert(
			"solo".into(),
			mock_identity(Via {
				provider: None,
				identity: None,
			}),
		);
		let manager = test_manager(config);
		let info = manager.authenticate("solo").await.unwrap();
		assert_eq!(info.identity, "solo");
	}

	#[tokio::test]
	async fn authenticates_provider_rooted_chain() {
		let mut config = AuthConfig::default();
		config.providers.insert(
			"p".into(),
			ProviderDef {
				kind: "mock".into(),
				spec: Default::default(),
				logout: Default::default(),
			},
		);
		config.identities.insert(
			"dev".into(),
			mock_identity(Via {
				provider: Some("p".into()),
				identity: None,
			}),
		);
		let manager = test_manager(config);
		let info = manager.authenticate("dev").await.unwrap();
		assert_eq!(info.identity, "dev");
	}

	#[tokio::test]
	async fn cyclic_chain_is_fatal_before_any_backend_call() {
		let mut config = AuthConfig::default();
		config.identities.insert(
			"a".into(),
			mock_identity(Via {
				provider: None,
				identity: Some("b".into()),
			}),
		);
		config.identities.insert(
			"b".into(),
			mock_identity(Via {
				provider: None,
				identity: Some("a".into()),
			}),
		);
		let manager = test_manager(config);
		let err = manager.authenticate("a").await.unwrap_err();
		assert!(matches!(
			err,
			AuthError::AuthenticationFailed { .. } | AuthError::InvalidAuthConfig(_)
		));
	}

	#[tokio::test]
	async fn get_default_identity_returns_the_marked_one() {
		let mut config = AuthConfig::default();
		let mut def = mock_identity(Via {
			provider: None,
			identity: None,
		});
		def.default = true;
		config.identities.insert("primary".into(), def);
		config
			.identities
			.insert("other".into(), mock_identity(Via { provider: None, identity: None }));
		let manager = test_manager(config);
		assert_eq!(manager.get_default_identity(false).unwrap(), "primary");
	}

	#[tokio::test]
	async fn chained_identity_authenticates_through_its_base() {
		let mut config = AuthConfig::default();
		config.identities.insert(
			"base".into(),
			mock_identity(Via {
				provider: None,
				identity: None,
			}),
		);
		config.identities.insert(
			"derived".into(),
			mock_identity(Via {
				provider: None,
				identity: Some("base".into()),
			}),
		);
		let manager = test_manager(config);
		let info = manager.authenticate("derived").await.unwrap();
		assert_eq!(info.identity, "derived");
	}
}
