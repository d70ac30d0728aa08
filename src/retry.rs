//! Caller-driven retries of whole transactions.
//!
//! Sessions never retry on their own: once operations went through a session,
//! only the caller knows how to replay them. [`run_in_transaction`] replays a
//! caller-supplied closure in a fresh session when commit conflicts.

use std::time::Duration;

use crate::key::Commit;
use crate::store::BoxFuture;
use crate::{TransactionResult, UnitOfWork, UnitOfWorkSession};

/// How often [`run_in_transaction`] may begin a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of sessions, including the first.
    pub max_attempts: u32,

    /// Pause between a conflicting commit and the next session.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Runs `f` in a new session of `uow` and commits it.
///
/// An error from `f` rolls the session back and is returned as is. A
/// conflicting commit begins a new session and runs `f` again while
/// `policy` allows. `f` must not commit or roll back the session itself.
pub async fn run_in_transaction<U, T, F>(
    uow: &U,
    policy: RetryPolicy,
    mut f: F,
) -> TransactionResult<(T, Commit)>
where
    U: UnitOfWork,
    T: Send,
    F: for<'s> FnMut(&'s mut U::Session) -> BoxFuture<'s, TransactionResult<T>> + Send,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let mut session = uow.begin().await?;
        let value = match f(&mut session).await {
            Ok(value) => value,
            Err(err) => {
                if let Err(rollback_err) = session.rollback().await {
                    tracing::debug!(
                        session = %session.id(),
                        error = %rollback_err,
                        "rollback after failed transaction body did not complete"
                    );
                }
                return Err(err);
            }
        };

        match session.commit().await {
            Ok(commit) => return Ok((value, commit)),
            Err(err) if err.is_conflict() && attempt < max_attempts => {
                tracing::debug!(
                    session = %session.id(),
                    attempt,
                    max_attempts,
                    "transaction conflicted, retrying"
                );
                attempt += 1;
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
}
