use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::MAX_DURATION;
use crate::StoreError;

/// Absolute point in time by which a unit of work must finish.
///
/// A single deadline is created per request and shared across every store
/// call made on its behalf, so a slow first call leaves less time for the
/// rest rather than resetting the budget.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    /// Budgets beyond [`MAX_DURATION`] are clamped to it.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget.min(MAX_DURATION),
        }
    }

    /// Run a store operation, failing with [`StoreError::Timeout`] once the
    /// deadline passes. The in-flight future is dropped on timeout, and no
    /// call is started once the budget is spent.
    pub async fn run<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if Instant::now() >= self.at {
            tracing::warn!(operation = op, "credential store budget already spent");
            return Err(StoreError::Timeout(op));
        }
        match tokio::time::timeout_at(self.at, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation = op, "credential store call exceeded deadline");
                Err(StoreError::Timeout(op))
            }
        }
    }
}
