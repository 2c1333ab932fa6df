//! Process-local single-flight de-duplication: concurrent callers for the
//! same identity join one in-flight authentication instead of each firing
//! their own.
//!
//! Concurrent `Authenticate` calls for the same identity name join the
//! first caller's in-flight future; the map entry is removed once the
//! future resolves. This is deliberately not a distributed lock: separate
//! processes may both call a backend concurrently, which is acceptable
//! because backends are idempotent at session granularity.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::Mutex as AsyncMutex;

use crate::contracts::Credentials;
use crate::error::AuthError;

type Joined = Shared<BoxFuture<'static, Result<Credentials, Arc<AuthError>>>>;

#[derive(Default)]
pub struct Group {
	inflight: AsyncMutex<HashMap<String, Joined>>,
}

impl Group {
	pub fn new() -> Self {
		Self::default()
	}

	/// Runs `f` at most once per `key` among concurrent callers; all
	/// callers observe the same result (success or the same error).
	pub async fn work<F, Fut>(&self, key: &str, f: F) -> Result<Credentials, Arc<AuthError>>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<Credentials, AuthError>> + Send + 'static,
	{
		let mut guard = self.inflight.lock().await;
		if let Some(existing) = guard.get(key) {
			let joined = existing.clone();
			drop(guard);
			return joined.await;
		}

		let fut: BoxFuture<'static, Result<Credentials, Arc<AuthError>>> =
			f().map(|r| r.map_err(Arc::new)).boxed();
		let shared = fut.shared();
		guard.insert(key.to_string(), shared.clone());
		drop(guard);

		let result = shared.await;

		let mut guard = self.inflight.lock().await;
		guard.remove(key);
		drop(guard);

		result
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::contracts::MockCredentials;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[tokio::test]
	async fn concurrent_calls_share_one_backend_invocation() {
		let group = Arc::new(Group::new());
		let calls = Arc::new(AtomicUsize::new(0));

		let mut handles = Vec::new();
		for _ in 0..8 {
			let group = group.clone();
			let calls = calls.clone();
			handles.push(tokio::spawn(async move {
				group
					.work("same-identity", move || {
						let calls = calls.clone();
						async move {
							calls.fetch_add(1, Ordering::SeqCst);
							tokio::time::sleep(std::time::Duration::from_millis(20)).await;
							Ok(Credentials::Mock(MockCredentials {
								label: "x".into(),
								expiration: None,
								ephemeral: false,
							}))
						}
					})
					.await
			}));
		}

		for h in handles {
			h.await.unwrap().unwrap();
		}

		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn map_entry_is_removed_after_completion() {
		let group = Group::new();
		group
			.work("id", || async {
				Ok(Credentials::Mock(MockCredentials {
					label: "x".into(),
					expiration: None,
					ephemeral: false,
				}))
			})
			.await
			.unwrap();
		assert!(group.inflight.lock().await.is_empty());
	}
}
