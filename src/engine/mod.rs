mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::{ConflictReason, EngineError, Entity, ValidationError};

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::ledger::{LedgerStore, Transaction};
use crate::limits::MAX_TX_ATTEMPTS;

/// How often and how patiently a transaction is re-run after losing an
/// optimistic conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`: doubles each time, capped at 2^10.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(10);
        self.base_backoff.saturating_mul(1 << exp)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(10),
        }
    }
}

/// The booking-consistency core. Owns nothing but a store handle; every
/// mutation goes through an optimistic store transaction.
pub struct Engine {
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
}

impl Engine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_retry(store, RetryPolicy::default())
    }

    pub fn with_retry(store: Arc<dyn LedgerStore>, retry: RetryPolicy) -> Self {
        let retry = RetryPolicy {
            max_attempts: retry.max_attempts.clamp(1, MAX_TX_ATTEMPTS),
            ..retry
        };
        Self { store, retry }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Run `body` in a fresh transaction and commit it, retrying with
    /// exponential backoff while the commit aborts.
    ///
    /// `body` does the reads and buffers the writes. It runs once per attempt,
    /// so it must own (clone) whatever it needs. Any error it returns ends the
    /// loop without committing.
    pub(super) async fn run_transaction<T, F>(&self, op: &'static str, mut body: F) -> Result<T, EngineError>
    where
        T: Send,
        F: for<'t> FnMut(&'t mut Transaction) -> BoxFuture<'t, Result<T, EngineError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut tx = Transaction::new(self.store.clone());
            let value = body(&mut tx).await?;
            match tx.commit().await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!("{op}: committed on attempt {attempt}");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    metrics::counter!(crate::observability::TX_RETRIES_TOTAL, "op" => op).increment(1);
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(e) if e.is_retryable() => {
                    warn!("{op}: gave up after {attempt} conflicting attempts");
                    metrics::counter!(crate::observability::TX_EXHAUSTED_TOTAL, "op" => op).increment(1);
                    return Err(EngineError::Conflict(ConflictReason::Contention { attempts: attempt }));
                }
                Err(e) => {
                    warn!("{op}: commit failed: {e}");
                    return Err(e.into());
                }
            }
        }
    }
}
