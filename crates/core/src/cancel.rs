//! Cooperative cancellation with an optional deadline.
//!
//! A [`CancelToken`] is passed explicitly to every operation that may block.
//! It fires when its [`CancelHandle`] is cancelled or when its deadline
//! passes, whichever comes first. Derived tokens share the parent's
//! cancellation flag and can only tighten the deadline.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Why a token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The owning handle was cancelled.
    Cancelled,
    /// The deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Owner side of a cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Fire every token created from this handle.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// A new token observing this handle, without a deadline.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: Some(self.tx.subscribe()),
            deadline: None,
        }
    }
}

/// Observer side: cheap to clone, passed into every blocking call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    rx: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Create a linked handle/token pair.
    pub fn pair() -> (CancelHandle, CancelToken) {
        let (tx, _) = watch::channel(false);
        let handle = CancelHandle { tx: Arc::new(tx) };
        let token = handle.token();
        (handle, token)
    }

    /// A token that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    /// Derive a token that also fires at `deadline`.
    ///
    /// An earlier existing deadline is kept.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing <= deadline => existing,
            _ => deadline,
        };
        Self {
            rx: self.rx.clone(),
            deadline: Some(deadline),
        }
    }

    /// Derive a token that also fires after `timeout` from now.
    ///
    /// A timeout too large to represent as an instant adds no deadline.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self.clone(),
        }
    }

    /// The effective deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check.
    pub fn check(&self) -> Option<CancelReason> {
        if self.rx.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(CancelReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Whether the token has fired.
    pub fn is_cancelled(&self) -> bool {
        self.check().is_some()
    }

    /// Resolve once the token fires.
    ///
    /// Never resolves for a token without handle and deadline. A dropped
    /// handle that was never cancelled does not fire the token.
    pub async fn cancelled(&self) -> CancelReason {
        let flag = async {
            if let Some(mut rx) = self.rx.clone() {
                if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                    return;
                }
            }
            std::future::pending::<()>().await;
        };
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            () = flag => CancelReason::Cancelled,
            () = deadline => CancelReason::DeadlineExceeded,
        }
    }

    /// Drive `fut` to completion unless the token fires first.
    ///
    /// When the token fires, `fut` is dropped, which aborts whatever I/O it
    /// had outstanding.
    ///
    /// # Errors
    ///
    /// Returns the [`CancelReason`] if the token fired before `fut` finished.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, CancelReason> {
        if let Some(reason) = self.check() {
            return Err(reason);
        }

        tokio::select! {
            biased;
            reason = self.cancelled() => Err(reason),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_never_token_runs_future() {
        let token = CancelToken::never();
        assert_eq!(token.run(async { 42 }).await, Ok(42));
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_fires_all_tokens() {
        let (handle, token) = CancelToken::pair();
        let derived = token.with_timeout(Duration::from_secs(3600));

        handle.cancel();

        assert_eq!(token.check(), Some(CancelReason::Cancelled));
        assert_eq!(derived.check(), Some(CancelReason::Cancelled));
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_returns_early_when_cancelled() {
        let (handle, token) = CancelToken::pair();

        let task = tokio::spawn(async move { token.run(std::future::pending::<()>()).await });
        handle.cancel();

        assert_eq!(task.await.unwrap(), Err(CancelReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let token = CancelToken::never().with_timeout(Duration::from_millis(50));

        let result = token.run(tokio::time::sleep(Duration::from_secs(10))).await;

        assert_eq!(result, Err(CancelReason::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_with_deadline_keeps_earlier_deadline() {
        let now = Instant::now();
        let early = now + Duration::from_secs(1);
        let late = now + Duration::from_secs(10);

        let token = CancelToken::never().with_deadline(early).with_deadline(late);

        assert_eq!(token.deadline(), Some(early));
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_adds_no_deadline() {
        let (handle, token) = CancelToken::pair();

        let derived = token.with_timeout(Duration::MAX);

        assert_eq!(derived.deadline(), None);
        assert!(!derived.is_cancelled());
        handle.cancel();
        assert_eq!(derived.check(), Some(CancelReason::Cancelled));
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_keeps_existing_deadline() {
        let bounded = CancelToken::never().with_timeout(Duration::from_secs(5));

        let derived = bounded.with_timeout(Duration::MAX);

        assert_eq!(derived.deadline(), bounded.deadline());
    }

    #[tokio::test]
    async fn test_dropped_handle_does_not_fire() {
        let (handle, token) = CancelToken::pair();
        drop(handle);

        assert!(!token.is_cancelled());
        assert_eq!(token.run(async { "done" }).await, Ok("done"));
    }
}
