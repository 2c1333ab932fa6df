//! Tier 2 — on-disk AWS-shaped profile files.
//!
//! Layout: `{base}/[{realm}/]aws/{provider}/{credentials,config}`, one INI
//! section per identity. Directories are `0700`, files `0600`. Writes are
//! upserted atomically (write-temp-then-rename within the same directory).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ini::Ini;
use secrecy::ExposeSecret;

use crate::contracts::AwsCredentials;
use crate::error::{AuthError, Result};

const EXPIRATION_KEY: &str = "x_atmos_expiration";

/// Resolves the base config directory, honoring `ATMOS_XDG_CONFIG_HOME`
/// before falling back to the platform default.
pub fn base_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("ATMOS_XDG_CONFIG_HOME") {
		return PathBuf::from(dir).join("atmos");
	}
	dirs::config_dir()
		.unwrap_or_else(|| PathBuf::from("."))
		.join("atmos")
}

pub fn realm_dir(base: &Path, realm: &str) -> PathBuf {
	if realm.is_empty() {
		base.to_path_buf()
	} else {
		base.join(realm)
	}
}

fn provider_dir(base: &Path, realm: &str, provider: &str) -> PathBuf {
	realm_dir(base, realm).join("aws").join(provider)
}

pub fn credentials_path(base: &Path, realm: &str, provider: &str) -> PathBuf {
	provider_dir(base, realm, provider).join("credentials")
}

pub fn config_path(base: &Path, realm: &str, provider: &str) -> PathBuf {
	provider_dir(base, realm, provider).join("config")
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
	use std::os::unix::fs::PermissionsExt;
	std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
	Ok(())
}

fn ensure_dir(dir: &Path) -> Result<()> {
	fs_err::create_dir_all(dir)
		.map_err(|e| AuthError::InvalidProviderConfig {
			name: dir.display().to_string(),
			reason: e.to_string(),
		})?;
	set_mode(dir, 0o700).ok();
	Ok(())
}

fn load_ini(path: &Path) -> Ini {
	if path.exists() {
		Ini::load_from_file(path).unwrap_or_default()
	} else {
		Ini::new()
	}
}

fn atomic_write(conf: &Ini, path: &Path) -> Result<()> {
	let tmp = path.with_extension(format!(
		"tmp-{}",
		uuid::Uuid::new_v4().simple()
	));
	conf
		.write_to_file(&tmp)
		.map_err(|e| AuthError::InvalidProviderConfig {
			name: path.display().to_string(),
			reason: e.to_string(),
		})?;
	set_mode(&tmp, 0o600).ok();
	fs_err::rename(&tmp, path).map_err(|e| AuthError::InvalidProviderConfig {
		name: path.display().to_string(),
		reason: e.to_string(),
	})?;
	Ok(())
}

/// Upserts exactly one `[identity]` section; other sections are untouched.
pub fn write_credentials(
	base: &Path,
	realm: &str,
	provider: &str,
	identity: &str,
	creds: &AwsCredentials,
) -> Result<()> {
	let dir = provider_dir(base, realm, provider);
	ensure_dir(&dir)?;
	let path = credentials_path(base, realm, provider);
	let mut conf = load_ini(&path);
	{
		let mut section = conf.with_section(Some(identity));
		section
			.set("aws_access_key_id", &creds.access_key_id)
			.set(
				"aws_secret_access_key",
				creds.secret_access_key.expose_secret(),
			);
		if let Some(token) = &creds.session_token {
			section.set("aws_session_token", token.expose_secret());
		}
		if let Some(exp) = creds.expiration {
			section.set(EXPIRATION_KEY, exp.to_rfc3339());
		}
	}
	atomic_write(&conf, &path)
}

/// Removes exactly section `identity`; all other sections survive
/// byte-for-byte.
pub fn cleanup_identity(base: &Path, realm: &str, provider: &str, identity: &str) -> Result<()> {
	let path = credentials_path(base, realm, provider);
	if !path.exists() {
		return Ok(());
	}
	let mut conf = load_ini(&path);
	conf.delete(Some(identity));
	atomic_write(&conf, &path)
}

pub fn delete_identity(base: &Path, realm: &str, provider: &str, identity: &str) -> Result<()> {
	cleanup_identity(base, realm, provider, identity)
}

/// Reads a previously-written section back.
pub fn load_credentials(
	base: &Path,
	realm: &str,
	provider: &str,
	identity: &str,
) -> Result<Option<AwsCredentials>> {
	let path = credentials_path(base, realm, provider);
	if !path.exists() {
		return Ok(None);
	}
	let conf = load_ini(&path);
	let Some(section) = conf.section(Some(identity)) else {
		return Ok(None);
	};
	let access_key_id = section.get("aws_access_key_id").unwrap_or_default().to_string();
	let secret_access_key = section
		.get("aws_secret_access_key")
		.unwrap_or_default()
		.to_string()
		.into();
	let session_token = section
		.get("aws_session_token")
		.map(|s| s.to_string().into());
	let expiration = section
		.get(EXPIRATION_KEY)
		.and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
		.map(|d| d.with_timezone(&chrono::Utc));
	Ok(Some(AwsCredentials {
		access_key_id,
		secret_access_key,
		session_token,
		region: None,
		expiration,
		mfa_arn: None,
		session_duration: None,
	}))
}

pub fn credentials_exist(base: &Path, realm: &str, provider: &str, identity: &str) -> bool {
	let path = credentials_path(base, realm, provider);
	path.exists()
		&& load_ini(&path).section(Some(identity)).is_some()
}

/// Deletes every file a provider created (`Provider::logout`).
pub fn logout_provider(base: &Path, realm: &str, provider: &str) -> Result<()> {
	let dir = provider_dir(base, realm, provider);
	if dir.exists() {
		fs_err::remove_dir_all(&dir).map_err(|e| AuthError::LogoutFailed {
			identity: provider.to_string(),
			source: e.into(),
		})?;
	}
	Ok(())
}

/// Scans every realm directory under `base` for a provider/identity
/// section, for the realm-mismatch warning.
pub fn scan_realms_for_identity(base: &Path, provider: &str, identity: &str) -> Vec<String> {
	let mut found = Vec::new();
	let Ok(entries) = fs_err::read_dir(base) else {
		return found;
	};
	for entry in entries.flatten() {
		let Ok(file_type) = entry.file_type() else {
			continue;
		};
		if !file_type.is_dir() {
			continue;
		}
		let name = entry.file_name().to_string_lossy().to_string();
		let realm = if name == "aws" { "" } else { &name };
		if credentials_exist(base, realm, provider, identity) {
			found.push(realm.to_string());
		}
	}
	found
}

/// RAII guard overriding process environment for cloud-SDK loaders,
/// restoring prior values on every exit path including unwind.
pub struct EnvOverrideGuard {
	saved: HashMap<String, Option<String>>,
}

impl EnvOverrideGuard {
	pub fn apply(overrides: &[(&str, String)]) -> Self {
		let mut saved = HashMap::new();
		for (key, value) in overrides {
			saved.insert(key.to_string(), std::env::var(key).ok());
			// SAFETY: this override is scoped to the lifetime of the guard and
			// restored unconditionally on drop, including during unwind.
			unsafe {
				std::env::set_var(key, value);
			}
		}
		Self { saved }
	}
}

impl Drop for EnvOverrideGuard {
	fn drop(&mut self) {
		for (key, prior) in self.saved.drain() {
			// SAFETY: see `apply`; this restores exactly what was captured there.
			unsafe {
				match prior {
					Some(v) => std::env::set_var(&key, v),
					None => std::env::remove_var(&key),
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use secrecy::SecretString;

	fn creds(key: &str) -> AwsCredentials {
		AwsCredentials {
			access_key_id: key.into(),
			secret_access_key: SecretString::from("shh".to_string()),
			session_token: None,
			region: Some("us-east-1".into()),
			expiration: Some(chrono::Utc::now()),
			mfa_arn: None,
			session_duration: None,
		}
	}

	#[test]
	fn write_then_load_round_trips() {
		let dir = tempfile_dir();
		write_credentials(&dir, "", "sso", "dev", &creds("AKIA1")).unwrap();
		let loaded = load_credentials(&dir, "", "sso", "dev").unwrap().unwrap();
		assert_eq!(loaded.access_key_id, "AKIA1");
		assert!(loaded.expiration.is_some());
	}

	#[test]
	fn cleanup_removes_only_its_section() {
		let dir = tempfile_dir();
		write_credentials(&dir, "", "sso", "dev", &creds("AKIA1")).unwrap();
		write_credentials(&dir, "", "sso", "prod", &creds("AKIA2")).unwrap();
		cleanup_identity(&dir, "", "sso", "dev").unwrap();
		assert!(load_credentials(&dir, "", "sso", "dev").unwrap().is_none());
		assert!(load_credentials(&dir, "", "sso", "prod").unwrap().is_some());
	}

	#[test]
	fn env_guard_restores_on_drop() {
		unsafe {
			std::env::set_var("AGENT_AUTH_TEST_VAR", "original");
		}
		{
			let _guard = EnvOverrideGuard::apply(&[("AGENT_AUTH_TEST_VAR", "overridden".into())]);
			assert_eq!(
				std::env::var("AGENT_AUTH_TEST_VAR").unwrap(),
				"overridden"
			);
		}
		assert_eq!(std::env::var("AGENT_AUTH_TEST_VAR").unwrap(), "original");
	}

	fn tempfile_dir() -> PathBuf {
		let dir = std::env::temp_dir().join(format!("agent-auth-test-{}", uuid::Uuid::new_v4()));
		std::fs::create_dir_all(&dir).unwrap();
		dir
	}
}
