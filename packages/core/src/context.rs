//! Call Context - Cancellation and Deadlines
//!
//! Every `Database` operation takes a [`CallContext`]. Backends route each driver
//! or network call through [`CallContext::run`], which races the call against the
//! context's deadline and cancellation signal.
//!
//! # Examples
//!
//! ```rust
//! use std::time::Duration;
//! use unistore_core::CallContext;
//!
//! let (ctx, cancel) = CallContext::background()
//!     .with_timeout(Duration::from_secs(5))
//!     .with_cancel();
//!
//! assert!(!ctx.is_cancelled());
//! cancel.cancel();
//! assert!(ctx.is_cancelled());
//! ```

use crate::db::DatabaseError;
use futures::future::select_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Deadline and cancellation token carried on every call
///
/// Cloning is cheap; clones share the same cancellation signals.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    /// One signal per `with_cancel` in this context's ancestry
    cancel: Vec<Arc<watch::Sender<bool>>>,
}

/// Handle that cancels every context derived from the same `with_cancel` call
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Signal cancellation. In-flight and future calls fail with `Cancelled`.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl CallContext {
    /// A context with no deadline that can never be cancelled
    pub fn background() -> Self {
        Self::default()
    }

    /// Attach an absolute deadline. An earlier existing deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// Attach a deadline relative to now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Make the context cancellable, returning the handle that cancels it
    ///
    /// Handles from earlier `with_cancel` calls still cancel the derived context;
    /// the new handle does not reach back to the parent.
    pub fn with_cancel(mut self) -> (Self, CancelHandle) {
        let (tx, _rx) = watch::channel(false);
        let tx = Arc::new(tx);
        self.cancel.push(tx.clone());
        (self, CancelHandle { tx })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.iter().any(|tx| *tx.borrow())
    }

    /// Fail fast if the context is already cancelled or expired
    pub fn check(&self) -> Result<(), DatabaseError> {
        if self.is_cancelled() {
            return Err(DatabaseError::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(DatabaseError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Run a backend call under this context
    ///
    /// Returns `Cancelled` or `DeadlineExceeded` as soon as either fires; the
    /// call's future is dropped at that point.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, DatabaseError>
    where
        F: Future<Output = Result<T, DatabaseError>>,
    {
        self.check()?;

        let cancelled = async {
            if self.cancel.is_empty() {
                return std::future::pending::<()>().await;
            }
            // The senders live in `self`, so wait_for only returns on a signal.
            let signals = self.cancel.iter().map(|tx| {
                let mut rx = tx.subscribe();
                Box::pin(async move {
                    let _ = rx.wait_for(|cancelled| *cancelled).await;
                })
            });
            select_all(signals).await;
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(DatabaseError::Cancelled),
            _ = expired => Err(DatabaseError::DeadlineExceeded),
            result = fut => result,
        }
    }
}
