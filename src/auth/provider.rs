use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::Credential;

/// External authentication system the provider drives
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Credential the backend currently holds, if any
    fn current_credential(&self) -> Option<Credential>;

    /// Expiry check for a credential
    fn is_expired(&self, credential: &Credential) -> bool {
        credential.is_expired()
    }

    /// Try to obtain a fresh credential (cheap path)
    async fn refresh(&self) -> Result<Option<Credential>>;

    /// Full verification round-trip (last resort)
    async fn verify(&self) -> Result<Option<Credential>>;
}

type Resolution = Shared<BoxFuture<'static, std::result::Result<Credential, String>>>;

struct ProviderState {
    backend: Arc<dyn AuthBackend>,
    cache: RwLock<Option<Credential>>,
    /// Set by `invalidate`; skips the backend's current credential
    stale: RwLock<bool>,
}

impl ProviderState {
    fn usable(&self, credential: &Credential) -> bool {
        !self.backend.is_expired(credential)
    }

    fn cached(&self) -> Option<Credential> {
        if let Some(c) = self.cache.read().as_ref() {
            if self.usable(c) {
                return Some(c.clone());
            }
        }
        if *self.stale.read() {
            return None;
        }
        let current = self.backend.current_credential().filter(|c| self.usable(c))?;
        *self.cache.write() = Some(current.clone());
        Some(current)
    }

    fn store(&self, credential: &Credential) {
        *self.cache.write() = Some(credential.clone());
        *self.stale.write() = false;
    }

    async fn resolve(self: Arc<Self>) -> std::result::Result<Credential, String> {
        match self.backend.refresh().await {
            Ok(Some(c)) if self.usable(&c) => {
                debug!("Credential refreshed");
                self.store(&c);
                return Ok(c);
            }
            Ok(_) => debug!("Refresh produced no usable credential"),
            Err(e) => warn!(error = %e, "Credential refresh failed"),
        }

        match self.backend.verify().await {
            Ok(Some(c)) if self.usable(&c) => {
                info!("Credential obtained through full verification");
                self.store(&c);
                Ok(c)
            }
            Ok(_) => Err("no usable credential after refresh and verification".to_string()),
            Err(e) => Err(format!("verification failed: {}", e)),
        }
    }
}

/// Supplies valid credentials for connection and reconnection.
///
/// Concurrent callers share one in-flight resolution. The cache is shared by
/// every manager holding the same `Arc<AuthTokenProvider>`.
pub struct AuthTokenProvider {
    state: Arc<ProviderState>,
    in_flight: Mutex<Option<Resolution>>,
}

impl AuthTokenProvider {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        Self {
            state: Arc::new(ProviderState {
                backend,
                cache: RwLock::new(None),
                stale: RwLock::new(false),
            }),
            in_flight: Mutex::new(None),
        }
    }

    /// Return a usable credential, refreshing or verifying as needed
    pub async fn get_valid_credential(&self) -> Result<Credential> {
        if let Some(c) = self.state.cached() {
            return Ok(c);
        }

        let resolution = {
            let mut slot = self.in_flight.lock();
            let pending = slot.as_ref().filter(|f| f.peek().is_none()).cloned();
            match pending {
                Some(fut) => fut,
                None => {
                    let fut = self.state.clone().resolve().boxed().shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        let outcome = resolution.await;

        {
            let mut slot = self.in_flight.lock();
            if slot.as_ref().map_or(false, |f| f.peek().is_some()) {
                *slot = None;
            }
        }

        outcome.map_err(Error::auth_unavailable)
    }

    /// Drop the cached credential so the next call refreshes
    pub fn invalidate(&self) {
        *self.state.cache.write() = None;
        *self.state.stale.write() = true;
        debug!("Credential cache invalidated");
    }

    /// Whether a usable credential is cached right now
    pub fn has_cached(&self) -> bool {
        self.state
            .cache
            .read()
            .as_ref()
            .map_or(false, |c| self.state.usable(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Backend with scripted outcomes and call counters
    #[derive(Default)]
    struct ScriptedBackend {
        current: Option<Credential>,
        refresh_result: Option<Credential>,
        verify_result: Option<Credential>,
        refresh_delay: Duration,
        refresh_calls: AtomicU32,
        verify_calls: AtomicU32,
    }

    #[async_trait]
    impl AuthBackend for ScriptedBackend {
        fn current_credential(&self) -> Option<Credential> {
            self.current.clone()
        }

        async fn refresh(&self) -> Result<Option<Credential>> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            if !self.refresh_delay.is_zero() {
                tokio::time::sleep(self.refresh_delay).await;
            }
            Ok(self.refresh_result.clone())
        }

        async fn verify(&self) -> Result<Option<Credential>> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.verify_result.clone())
        }
    }

    #[tokio::test]
    async fn test_returns_current_credential_without_refresh() {
        let backend = Arc::new(ScriptedBackend {
            current: Some(Credential::new("current")),
            ..Default::default()
        });
        let provider = AuthTokenProvider::new(backend.clone());

        let c = provider.get_valid_credential().await.unwrap();
        assert_eq!(c.token(), "current");
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 0);
        assert!(provider.has_cached());
    }

    #[tokio::test]
    async fn test_refreshes_expired_credential() {
        let backend = Arc::new(ScriptedBackend {
            current: Some(Credential::new("")),
            refresh_result: Some(Credential::new("fresh")),
            ..Default::default()
        });
        let provider = AuthTokenProvider::new(backend.clone());

        let c = provider.get_valid_credential().await.unwrap();
        assert_eq!(c.token(), "fresh");
        assert_eq!(backend.verify_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_verification() {
        let backend = Arc::new(ScriptedBackend {
            verify_result: Some(Credential::new("verified")),
            ..Default::default()
        });
        let provider = AuthTokenProvider::new(backend.clone());

        let c = provider.get_valid_credential().await.unwrap();
        assert_eq!(c.token(), "verified");
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(backend.verify_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_when_all_strategies_fail() {
        let provider = AuthTokenProvider::new(Arc::new(ScriptedBackend::default()));
        let err = provider.get_valid_credential().await.unwrap_err();
        assert!(matches!(err, Error::AuthUnavailable { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let backend = Arc::new(ScriptedBackend {
            refresh_result: Some(Credential::new("shared")),
            refresh_delay: Duration::from_millis(200),
            ..Default::default()
        });
        let provider = AuthTokenProvider::new(backend.clone());

        let (a, b, c) = tokio::join!(
            provider.get_valid_credential(),
            provider.get_valid_credential(),
            provider.get_valid_credential(),
        );

        assert_eq!(a.unwrap().token(), "shared");
        assert_eq!(b.unwrap().token(), "shared");
        assert_eq!(c.unwrap().token(), "shared");
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_skips_current_credential() {
        let backend = Arc::new(ScriptedBackend {
            current: Some(Credential::new("old")),
            refresh_result: Some(Credential::new("new")),
            ..Default::default()
        });
        let provider = AuthTokenProvider::new(backend.clone());

        assert_eq!(provider.get_valid_credential().await.unwrap().token(), "old");
        provider.invalidate();
        assert_eq!(provider.get_valid_credential().await.unwrap().token(), "new");
        assert_eq!(provider.get_valid_credential().await.unwrap().token(), "new");
        assert_eq!(backend.refresh_calls.load(Ordering::SeqCst), 1);
    }
}
