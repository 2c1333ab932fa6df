pub mod files;
pub mod keyring;

pub use files::EnvOverrideGuard;
pub use keyring::KeyringCache;
