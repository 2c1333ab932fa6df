//! Chain resolver: walks `via` edges to a provider or a
//! standalone identity, detecting cycles and enforcing the depth bound.

use std::collections::HashSet;

use crate::config::AuthConfig;
use crate::contracts::Credentials;
use crate::error::{AuthError, Result};

pub const MAX_CHAIN_DEPTH: usize = 16;

const STANDALONE_ELIGIBLE_KINDS: &[&str] = &["aws/user", "gcp/project", "mock", "mock/aws"];

pub fn is_standalone_eligible(kind: &str) -> bool {
	STANDALONE_ELIGIBLE_KINDS.contains(&kind)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
	Provider,
	Identity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainLink {
	pub name: String,
	pub role: LinkRole,
}

pub type Chain = Vec<ChainLink>;

/// Produces `[n1, ..., nk = target]`, provider or standalone identity first.
pub fn resolve(config: &AuthConfig, target: &str) -> Result<Chain> {
	let mut chain: Chain = Vec::new();
	let mut visited = HashSet::new();
	let mut current = target.to_string();

	loop {
		if !visited.insert(current.clone()) {
			return Err(AuthError::CyclicIdentityChain(current));
		}
		if visited.len() > MAX_CHAIN_DEPTH {
			return Err(AuthError::IdentityChainTooDeep(
				target.to_string(),
				MAX_CHAIN_DEPTH,
			));
		}

		let def = config.identities.get(&current).ok_or_else(|| {
			AuthError::InvalidAuthConfig(format!("unknown identity {current:?}"))
		})?;

		chain.push(ChainLink {
			name: current.clone(),
			role: LinkRole::Identity,
		});

		if let Some(provider) = &def.via.provider {
			if !config.providers.contains_key(provider) {
				return Err(AuthError::InvalidAuthConfig(format!(
					"identity {current:?} references unknown provider {provider:?}"
				)));
			}
			chain.push(ChainLink {
				name: provider.clone(),
				role: LinkRole::Provider,
			});
			break;
		} else if let Some(identity) = &def.via.identity {
			current = identity.clone();
			continue;
		} else if is_standalone_eligible(&def.kind) {
			break;
		} else {
			return Err(AuthError::InvalidAuthConfig(format!(
				"identity {current:?} has no `via.provider` or `via.identity`, and {:?} is not standalone-eligible",
				def.kind
			)));
		}
	}

	chain.reverse();
	Ok(chain)
}

/// The pairwise credential-compatibility table.
pub fn check_compatible(consumer_kind: &str, provided: &Credentials) -> Result<()> {
	let ok = match consumer_kind {
		"aws/permission-set" => matches!(provided, Credentials::Aws(_)),
		"aws/assume-role" => matches!(provided, Credentials::Aws(_) | Credentials::Oidc(_)),
		"aws/assume-root" => matches!(provided, Credentials::Aws(_)),
		"azure/subscription" => matches!(provided, Credentials::Azure(_)),
		"gcp/service-account" => matches!(provided, Credentials::Gcp(_)),
		"gcp/project" => true,
		"mock" | "mock/aws" => true,
		_ => true,
	};
	if ok {
		Ok(())
	} else {
		Err(AuthError::InvalidIdentityConfig {
			name: consumer_kind.to_string(),
			reason: "incompatible credentials".to_string(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::{IdentityDef, ProviderDef, Via};

	fn identity(kind: &str, via: Via) -> IdentityDef {
		IdentityDef {
			kind: kind.to_string(),
			default: false,
			via,
			principal: Default::default(),
			credentials: Default::default(),
			env: Vec::new(),
			session: Default::default(),
		}
	}

	fn provider(kind: &str) -> ProviderDef {
		ProviderDef {
			kind: kind.to_string(),
			spec: Default::default(),
			logout: Default::default(),
		}
	}

	#[test]
	fn resolves_provider_rooted_chain() {
		let mut cfg = AuthConfig::default();
		cfg
			.providers
			.insert("sso".into(), provider("aws/iam-identity-center"));
		cfg.identities.insert(
			"dev".into(),
			identity(
				"aws/permission-set",
				Via {
					provider: Some("sso".into()),
					identity: None,
				},
			),
		);
		let chain = resolve(&cfg, "dev").unwrap();
		assert_eq!(chain.len(), 2);
		assert_eq!(chain[0].role, LinkRole::Provider);
		assert_eq!(chain[0].name, "sso");
		assert_eq!(chain[1].name, "dev");
	}

	#[test]
	fn resolves_chained_assume_role() {
		let mut cfg = AuthConfig::default();
		cfg
			.providers
			.insert("sso".into(), provider("aws/iam-identity-center"));
		cfg.identities.insert(
			"dev".into(),
			identity(
				"aws/permission-set",
				Via {
					provider: Some("sso".into()),
					identity: None,
				},
			),
		);
		cfg.identities.insert(
			"prod".into(),
			identity(
				"aws/assume-role",
				Via {
					provider: None,
					identity: Some("dev".into()),
				},
			),
		);
		let chain = resolve(&cfg, "prod").unwrap();
		let names: Vec<_> = chain.iter().map(|l| l.name.as_str()).collect();
		assert_eq!(names, vec!["sso", "dev", "prod"]);
	}

	#[test]
	fn standalone_identity_chains_alone() {
		let mut cfg = AuthConfig::default();
		cfg.identities.insert(
			"user".into(),
			identity(
				"aws/user",
				Via {
					provider: None,
					identity: None,
				},
			),
		);
		let chain = resolve(&cfg, "user").unwrap();
		assert_eq!(chain.len(), 1);
		assert_eq!(chain[0].role, LinkRole::Identity);
	}

	#[test]
	fn detects_cycle() {
		let mut cfg = AuthConfig::default();
		cfg.identities.insert(
			"a".into(),
			identity(
				"mock",
				Via {
					provider: None,
					identity: Some("b".into()),
				},
			),
		);
		cfg.identities.insert(
			"b".into(),
			identity(
				"mock",
				Via {
					provider: None,
					identity: Some("a".into()),
				},
			),
		);
		let err = resolve(&cfg, "a").unwrap_err();
		assert!(matches!(err, AuthError::CyclicIdentityChain(_)));
	}

	#[test]
	fn rejects_missing_via() {
		let mut cfg = AuthConfig::default();
		cfg.identities.insert(
			"prod".into(),
			identity(
				"aws/assume-role",
				Via {
					provider: None,
					identity: None,
				},
			),
		);
		let err = resolve(&cfg, "prod").unwrap_err();
		assert!(matches!(err, AuthError::InvalidAuthConfig(_)));
	}
}
