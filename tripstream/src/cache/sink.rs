//! Error sink for failures nobody is awaiting.
//!
//! Prefetches are fire-and-forget and unit errors arrive unsolicited, so their
//! failures have no caller to return to. The cache hands them to an
//! [`ErrorSink`] instead. Nothing is reported once the cache is terminated.

use super::CacheError;
use std::sync::Mutex;

/// Receiver of asynchronous cache errors.
///
/// Called from the orchestrator task; implementations must not block.
pub trait ErrorSink: Send + Sync + 'static {
    fn report(&self, error: &CacheError);
}

/// Sink that logs errors with `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, error: &CacheError) {
        match error {
            CacheError::Processing { message, context } => {
                tracing::warn!(%context, %message, "Trip processing problem");
            }
            other => tracing::error!(error = %other, "Trip cache error"),
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullErrorSink;

impl ErrorSink for NullErrorSink {
    fn report(&self, _error: &CacheError) {}
}

/// Sink that records every report, for inspection.
#[derive(Debug, Default)]
pub struct CollectingErrorSink {
    errors: Mutex<Vec<CacheError>>,
}

impl CollectingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors reported so far, in order.
    pub fn errors(&self) -> Vec<CacheError> {
        match self.errors.lock() {
            Ok(errors) => errors.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of errors reported so far.
    pub fn len(&self) -> usize {
        self.errors().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for CollectingErrorSink {
    fn report(&self, error: &CacheError) {
        match self.errors.lock() {
            Ok(mut errors) => errors.push(error.clone()),
            Err(poisoned) => poisoned.into_inner().push(error.clone()),
        }
    }
}
