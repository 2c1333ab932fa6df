//! Registry & Factory: kind-string dispatch to
//! provider/identity constructors. Constructors validate shape only; no
//! I/O happens here (deeper validation happens lazily in `Validate()`).

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{IdentityDef, ProviderDef};
use crate::contracts::{Identity, Provider};
use crate::error::{AuthError, Result};

pub type ProviderCtor =
	Arc<dyn Fn(&str, &ProviderDef) -> Result<Arc<dyn Provider>> + Send + Sync>;
pub type IdentityCtor =
	Arc<dyn Fn(&str, &IdentityDef) -> Result<Arc<dyn Identity>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Registry {
	providers: HashMap<String, ProviderCtor>,
	identities: HashMap<String, IdentityCtor>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register_provider(&mut self, kind: &str, ctor: ProviderCtor) {
		self.providers.insert(kind.to_string(), ctor);
	}

	pub fn register_identity(&mut self, kind: &str, ctor: IdentityCtor) {
		self.identities.insert(kind.to_string(), ctor);
	}

	pub fn build_provider(&self, name: &str, def: &ProviderDef) -> Result<Arc<dyn Provider>> {
		let ctor = self
			.providers
			.get(def.kind.as_str())
			.ok_or_else(|| AuthError::InvalidProviderKind(def.kind.clone()))?;
		ctor(name, def)
	}

	pub fn build_identity(&self, name: &str, def: &IdentityDef) -> Result<Arc<dyn Identity>> {
		let ctor = self
			.identities
			.get(def.kind.as_str())
			.ok_or_else(|| AuthError::InvalidIdentityKind(def.kind.clone()))?;
		ctor(name, def)
	}

	pub fn has_provider_kind(&self, kind: &str) -> bool {
		self.providers.contains_key(kind)
	}

	pub fn has_identity_kind(&self, kind: &str) -> bool {
		self.identities.contains_key(kind)
	}
}

/// A fresh registry with every built-in kind registered. Tests construct
/// their own isolated instance rather than sharing process state.
pub fn default_registry() -> Registry {
	let mut r = Registry::new();
	crate::backends::aws::register(&mut r);
	crate::backends::gcp::register(&mut r);
	crate::backends::azure::register(&mut r);
	crate::backends::github::register(&mut r);
	crate::backends::mock::register(&mut r);
	r
}

/// Like `default_registry`, but wires an MFA-code prompt into `aws/user`.
pub fn default_registry_with_prompt(prompt: crate::contracts::PromptFunc) -> Registry {
	let mut r = Registry::new();
	crate::backends::aws::register_with_backend_and_prompt(
		&mut r,
		std::sync::Arc::new(crate::backends::aws::UnconfiguredAwsBackend),
		Some(prompt),
	);
	crate::backends::gcp::register(&mut r);
	crate::backends::azure::register(&mut r);
	crate::backends::github::register(&mut r);
	crate::backends::mock::register(&mut r);
	r
}

/// The process-wide default factory, initialized exactly once and cloned
/// into every `Manager::new()` — cheap, since `Registry`'s maps hold `Arc`
/// constructors.
pub static GLOBAL_REGISTRY: once_cell::sync::Lazy<Registry> =
	once_cell::sync::Lazy::new(default_registry);

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn default_registry_knows_builtin_kinds() {
		let r = default_registry();
		assert!(r.has_provider_kind("aws/iam-identity-center"));
		assert!(r.has_provider_kind("mock"));
		assert!(r.has_identity_kind("aws/permission-set"));
		assert!(r.has_identity_kind("aws/user"));
		assert!(r.has_identity_kind("gcp/project"));
		assert!(!r.has_provider_kind("not-a-real-kind"));
	}

	#[test]
	fn unknown_kind_is_an_error() {
		let r = default_registry();
		let def = ProviderDef {
			kind: "not-a-real-kind".into(),
			spec: Default::default(),
			logout: Default::default(),
		};
		let err = r.build_provider("p", &def).unwrap_err();
		assert!(matches!(err, AuthError::InvalidProviderKind(_)));
	}
}
