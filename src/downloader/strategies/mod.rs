// Download strategies
//
// A strategy is one way of turning a URL into a file on disk. The
// orchestrator walks an ordered `StrategyPolicy`, one strategy per attempt.
//
// - direct:  info-only resolve, then our own HTTP transfer with retries
// - managed: the fetch adapter downloads and reports progress itself
//
// Both are parameterized by certificate verification only.

mod direct;
mod managed;

use async_trait::async_trait;
use std::sync::Arc;

use super::errors::DownloadError;
use super::models::{FetchRequest, MediaInfo};
use super::traits::{JobReporter, MediaFetcher};

pub use direct::{DirectStreamStrategy, DirectTransfer, RetryPolicy};
pub use managed::AdapterStrategy;

/// Everything one attempt needs besides the URL
#[derive(Clone)]
pub struct AttemptContext {
    pub fetcher: Arc<dyn MediaFetcher>,
    pub reporter: JobReporter,
    /// Base request; each strategy sets its own certificate policy
    pub request: FetchRequest,
}

impl AttemptContext {
    pub fn request(&self, verify_certificates: bool) -> FetchRequest {
        FetchRequest {
            verify_certificates,
            ..self.request.clone()
        }
    }
}

#[async_trait]
pub trait DownloadStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn verify_certificates(&self) -> bool;

    /// Produce the file in `ctx.request.output_dir`. The returned metadata
    /// (title, id, ext) drives artifact resolution.
    async fn attempt(&self, url: &str, ctx: &AttemptContext) -> Result<MediaInfo, DownloadError>;
}

/// Ordered list of strategies, one per attempt
#[derive(Clone)]
pub struct StrategyPolicy {
    strategies: Vec<Arc<dyn DownloadStrategy>>,
}

impl StrategyPolicy {
    pub fn new(strategies: Vec<Arc<dyn DownloadStrategy>>) -> Self {
        Self { strategies }
    }

    /// direct stream, then managed download, then managed download with
    /// certificates verified. `allow_insecure_tls = false` verifies everywhere.
    pub fn standard(allow_insecure_tls: bool, retry: RetryPolicy) -> Self {
        let verify = !allow_insecure_tls;
        Self::new(vec![
            Arc::new(DirectStreamStrategy::new(verify, retry)),
            Arc::new(AdapterStrategy::new(verify)),
            Arc::new(AdapterStrategy::new(true)),
        ])
    }

    pub fn strategies(&self) -> &[Arc<dyn DownloadStrategy>] {
        &self.strategies
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl Default for StrategyPolicy {
    fn default() -> Self {
        Self::standard(true, RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_policy_order() {
        let policy = StrategyPolicy::default();
        let plan: Vec<(&str, bool)> = policy
            .strategies()
            .iter()
            .map(|s| (s.name(), s.verify_certificates()))
            .collect();
        assert_eq!(
            plan,
            vec![
                ("direct-stream", false),
                ("managed", false),
                ("managed-verified", true),
            ]
        );
    }

    #[test]
    fn strict_policy_verifies_every_attempt() {
        let policy = StrategyPolicy::standard(false, RetryPolicy::default());
        assert_eq!(policy.len(), 3);
        assert!(policy.strategies().iter().all(|s| s.verify_certificates()));
    }
}
