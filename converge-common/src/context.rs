//! Caller-supplied cancellation and deadline.

use std::time::Instant;

use tokio_util::sync::CancellationToken;

/// External control over a poll: a cancellation signal plus an optional
/// deadline that may be tighter than the poll's own timeout.
///
/// Cloning shares the same cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct PollContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl PollContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing token (e.g. one owned by a test scope).
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Same signal, with an external deadline. An earlier existing deadline wins.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// A context that is cancelled when this one is, but can also be
    /// cancelled on its own.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Resolves once the context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}
