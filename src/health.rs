//! Reachability checks against a service's HTTP port

use async_trait::async_trait;
use std::time::Duration;

/// Best-effort network liveness hint
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// True if `GET /health` on `port` gets any HTTP response
    async fn check_health(&self, port: u16) -> bool;
}

/// Reachability probe over plain HTTP to localhost
pub struct HttpReachability {
    client: Option<reqwest::Client>,
}

impl HttpReachability {
    pub fn new(timeout: Duration) -> Self {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to build HTTP client, reachability checks disabled");
                None
            }
        };
        Self { client }
    }
}

#[async_trait]
impl ReachabilityProbe for HttpReachability {
    async fn check_health(&self, port: u16) -> bool {
        let Some(client) = &self.client else {
            return false;
        };

        let url = format!("http://localhost:{port}/health");

        // Any status counts: only connection failure or timeout means unreachable
        match client.get(&url).send().await {
            Ok(response) => {
                tracing::trace!(port, status = %response.status(), "Health endpoint answered");
                true
            }
            Err(e) => {
                tracing::debug!(port, error = %e, "Health endpoint unreachable");
                false
            }
        }
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    pub struct MockReachability {
        reachable: AtomicBool,
        pub calls: AtomicUsize,
    }

    impl MockReachability {
        pub fn new(reachable: bool) -> Self {
            Self {
                reachable: AtomicBool::new(reachable),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ReachabilityProbe for MockReachability {
        async fn check_health(&self, _port: u16) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reachable.load(Ordering::SeqCst)
        }
    }
}
