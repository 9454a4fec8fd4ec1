//! Bearer-token management and reconnect backoff.
//!
//! Login is a one-shot HTTP POST with the shared password; the token is
//! valid for 7 days and refreshed once older than 6. The cache fast-path
//! returns the held token without touching the network.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::info;

use crate::config::{BACKOFF_INITIAL, BACKOFF_MAX, TOKEN_REFRESH_AFTER};

struct CachedToken {
    token: String,
    acquired_at: Instant,
}

/// Mutex-guarded token cache shared between the connect loop and the
/// status snapshot.
pub struct TokenCache {
    inner: Mutex<Option<CachedToken>>,
    refresh_after: Duration,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::with_refresh_after(TOKEN_REFRESH_AFTER)
    }

    pub fn with_refresh_after(refresh_after: Duration) -> Self {
        Self {
            inner: Mutex::new(None),
            refresh_after,
        }
    }

    /// The held token if it is still fresh; `None` means a refresh is due.
    pub fn get_fresh(&self) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .as_ref()
            .filter(|t| t.acquired_at.elapsed() < self.refresh_after)
            .map(|t| t.token.clone())
    }

    /// The held token regardless of age — the best-effort fallback when a
    /// refresh fails on reconnect.
    pub fn get_any(&self) -> Option<String> {
        self.inner.lock().unwrap().as_ref().map(|t| t.token.clone())
    }

    pub fn store(&self, token: String) {
        *self.inner.lock().unwrap() = Some(CachedToken {
            token,
            acquired_at: Instant::now(),
        });
    }

    pub fn age(&self) -> Option<Duration> {
        self.inner
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.acquired_at.elapsed())
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

/// One-shot password login. Returns the bearer token (valid 7 days).
pub async fn login(
    http: &reqwest::Client,
    backend_url: &str,
    password: &str,
) -> anyhow::Result<String> {
    let resp = http
        .post(format!("{backend_url}/api/auth/login"))
        .json(&serde_json::json!({ "password": password }))
        .timeout(Duration::from_secs(10))
        .send()
        .await?
        .error_for_status()?;
    let body: LoginResponse = resp.json().await?;
    info!("Bearer token acquired (valid 7 days)");
    Ok(body.token)
}

/// Exponential reconnect backoff: 1 s doubling to a 30 s cap, unbounded
/// attempts, reset on a successful connection.
pub struct Backoff {
    current: Duration,
    initial: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: BACKOFF_INITIAL,
            initial: BACKOFF_INITIAL,
            max: BACKOFF_MAX,
        }
    }

    /// Delay to wait before the next attempt; doubles up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_cap_and_resets() {
        let mut b = Backoff::new();
        let secs: Vec<u64> = (0..7).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30]);
        b.reset();
        assert_eq!(b.next_delay().as_secs(), 1);
    }

    #[test]
    fn fresh_token_skips_refresh() {
        let cache = TokenCache::with_refresh_after(Duration::from_secs(60));
        assert!(cache.get_fresh().is_none());
        cache.store("tok-1".into());
        // Two successive reconnects: both hit the fast path, no new fetch.
        assert_eq!(cache.get_fresh().as_deref(), Some("tok-1"));
        assert_eq!(cache.get_fresh().as_deref(), Some("tok-1"));
    }

    #[test]
    fn stale_token_requires_refresh_but_stays_available() {
        let cache = TokenCache::with_refresh_after(Duration::from_millis(20));
        cache.store("tok-1".into());
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get_fresh().is_none());
        assert_eq!(cache.get_any().as_deref(), Some("tok-1"));
        assert!(cache.age().unwrap() >= Duration::from_millis(20));
    }
}
