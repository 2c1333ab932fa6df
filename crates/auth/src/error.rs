use std::sync::Arc;

/// Sentinel error kinds from the taxonomy. The CLI (out of scope here) maps
/// these to exit codes; we only need to carry the kind and enough context
/// to render a hint list.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
	#[error("invalid auth config: {0}")]
	InvalidAuthConfig(String),

	#[error("unsupported provider kind {0:?}")]
	InvalidProviderKind(String),

	#[error("unsupported identity kind {0:?}")]
	InvalidIdentityKind(String),

	#[error("invalid provider config for {name:?}: {reason}")]
	InvalidProviderConfig { name: String, reason: String },

	#[error("invalid identity config for {name:?}: {reason}")]
	InvalidIdentityConfig { name: String, reason: String },

	#[error("identity {identity:?} is missing required principal field {field:?}")]
	MissingPrincipal { identity: String, field: String },

	#[error("invalid duration {0:?}")]
	InvalidDuration(String),

	#[error("cyclic identity chain detected at {0:?}")]
	CyclicIdentityChain(String),

	#[error("identity chain for {0:?} exceeds the maximum depth of {1}")]
	IdentityChainTooDeep(String, usize),

	#[error("authentication failed for {identity:?}: {source}")]
	AuthenticationFailed {
		identity: String,
		#[source]
		source: anyhow::Error,
	},

	#[error("required AWS environment variables are not set: {0:?}")]
	AwsMissingEnvVars(Vec<String>),

	#[error("aws/user identity {0:?} has no credentials in config or keyring")]
	AwsUserNotConfigured(String),

	#[error("logout failed for {identity:?}: {source}")]
	LogoutFailed {
		identity: String,
		#[source]
		source: anyhow::Error,
	},

	#[error("authentication was canceled")]
	Canceled,
}

impl AuthError {
	pub fn hints(&self) -> Vec<String> {
		match self {
			AuthError::MissingPrincipal { field, .. } => {
				vec![format!("set `principal.{field}` in the identity config")]
			},
			AuthError::AwsMissingEnvVars(vars) => vars
				.iter()
				.map(|v| format!("export {v} before retrying"))
				.collect(),
			AuthError::AwsUserNotConfigured(name) => vec![
				format!("set `credentials.access_key_id`/`credentials.secret_access_key` for {name:?}"),
				"or run the login flow once to populate the keyring".to_string(),
			],
			AuthError::CyclicIdentityChain(name) => {
				vec![format!("check the `via` chain starting at {name:?} for a cycle")]
			},
			_ => Vec::new(),
		}
	}
}

/// Wraps an error with the chain that was being walked and the link at
/// which it failed, attached exactly once by the Manager per propagation.
#[derive(Debug, thiserror::Error)]
#[error("chain=[{}], failed_at={failed_at}: {source}", chain.join(", "))]
pub struct ChainError {
	pub chain: Vec<String>,
	pub failed_at: String,
	#[source]
	pub source: Arc<AuthError>,
}

impl ChainError {
	pub fn new(chain: Vec<String>, failed_at: impl Into<String>, source: AuthError) -> Self {
		Self {
			chain,
			failed_at: failed_at.into(),
			source: Arc::new(source),
		}
	}
}

pub type Result<T> = std::result::Result<T, AuthError>;
