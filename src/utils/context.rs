use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::errors::{MeshTrustError, Result};

/// Deadline and cancellation carried by every network-bound operation.
///
/// Cloning shares the cancellation token, so cancelling any clone aborts all
/// operations running under it.
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}

impl CallContext {
    /// A context without deadline that is never cancelled unless asked to.
    pub fn background() -> Self {
        Self { deadline: None, cancellation: CancellationToken::new() }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().deadline_in(timeout)
    }

    /// Set the deadline relative to now, keeping an earlier existing deadline.
    pub fn deadline_in(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// A child context: cancelled with its parent, with its own optional deadline.
    pub fn child(&self) -> Self {
        Self { deadline: self.deadline, cancellation: self.cancellation.child_token() }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Run `operation` until it completes, the deadline passes or the context
    /// is cancelled, whichever comes first.
    pub async fn run<T, F>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(MeshTrustError::cancelled(operation));
        }

        let budget = self.remaining();
        if budget == Some(Duration::ZERO) {
            return Err(MeshTrustError::timeout(operation, 0));
        }

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(MeshTrustError::cancelled(operation)),
            _ = expired(self.deadline) => {
                let duration_ms = budget.map_or(0, |b| b.as_millis() as u64);
                Err(MeshTrustError::timeout(operation, duration_ms))
            }
            result = future => result,
        }
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
