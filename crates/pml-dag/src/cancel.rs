// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cancellation primitives for an in-flight workflow run.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// A cloneable, cheaply-shareable token used to signal cancellation.
///
/// All clones share the same underlying state: cancelling one
/// immediately makes every clone observe `is_cancelled() == true`.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    reason: std::sync::Mutex<Option<CancellationReason>>,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Arc::new(TokenInner { cancelled: AtomicBool::new(false), reason: std::sync::Mutex::new(None), notify: Notify::new() }) }
    }

    /// Signal cancellation with a reason. Idempotent: the first call's
    /// reason wins, later calls only re-notify waiters.
    pub fn cancel(&self, reason: CancellationReason) {
        let mut guard = self.inner.reason.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(reason);
        }
        drop(guard);
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether [`Self::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// The reason cancellation was requested, if it has been.
    #[must_use]
    pub fn reason(&self) -> Option<CancellationReason> {
        self.inner.reason.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// A future that resolves once the token is cancelled, immediately
    /// if it already is.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            self.inner.notify.notified().await;
            if self.is_cancelled() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken").field("cancelled", &self.is_cancelled()).field("reason", &self.reason()).finish()
    }
}

/// Why a run was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    /// The caller explicitly requested cancellation via `cancel`.
    UserRequested,
    /// A HIL/AIL gate was denied.
    ApprovalDenied,
    /// A fatal tool error propagated up without a safe-to-fail branch.
    FatalToolError,
    /// The capability's required tool dependencies are unsatisfied.
    MissingDependency,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn cancel_sets_flag_and_reason() {
        let token = CancellationToken::new();
        token.cancel(CancellationReason::UserRequested);
        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some(CancellationReason::UserRequested));
    }

    #[test]
    fn first_cancellation_reason_wins() {
        let token = CancellationToken::new();
        token.cancel(CancellationReason::UserRequested);
        token.cancel(CancellationReason::FatalToolError);
        assert_eq!(token.reason(), Some(CancellationReason::UserRequested));
    }

    #[tokio::test]
    async fn cancelled_future_resolves_immediately_if_already_cancelled() {
        let token = CancellationToken::new();
        token.cancel(CancellationReason::UserRequested);
        tokio::time::timeout(std::time::Duration::from_millis(50), token.cancelled()).await.expect("should resolve immediately");
    }

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel_from_clone() {
        let token = CancellationToken::new();
        let clone = token.clone();
        let waiter = tokio::spawn(async move { clone.cancelled().await });
        token.cancel(CancellationReason::ApprovalDenied);
        tokio::time::timeout(std::time::Duration::from_millis(200), waiter).await.expect("should resolve after cancel").unwrap();
    }
}
