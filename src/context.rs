//! Parent execution context for transactions.
//!
//! A [`Context`] carries an optional deadline and any number of cancellation
//! signals inherited from its ancestors. Stores race transactional work
//! against [`Context::done`].

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::store::BoxFuture;

/// Why a context finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancellation: Vec<watch::Receiver<bool>>,
}

/// Cancels the context created alongside it and all contexts derived from it.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl Context {
    /// A context that never finishes.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derives a context that also finishes after `timeout`.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a context that also finishes at `deadline`.
    ///
    /// An earlier deadline inherited from this context is kept.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        };
        Self {
            deadline: Some(deadline),
            cancellation: self.cancellation.clone(),
        }
    }

    /// Derives a context that can be cancelled through the returned handle.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        let mut cancellation = self.cancellation.clone();
        cancellation.push(receiver);
        let ctx = Self {
            deadline: self.deadline,
            cancellation,
        };
        (ctx, CancelHandle { sender })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns why the context finished, without waiting.
    pub fn err(&self) -> Option<ContextError> {
        if self.cancellation.iter().any(|rx| *rx.borrow()) {
            return Some(ContextError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Waits until the context finishes.
    pub async fn done(&self) -> ContextError {
        let cancelled = wait_any(self.cancellation.clone());
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = cancelled => ContextError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ContextError::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                ContextError::Cancelled
            }
        }
    }
}

fn wait_any(mut receivers: Vec<watch::Receiver<bool>>) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        match receivers.pop() {
            None => std::future::pending::<()>().await,
            Some(last) if receivers.is_empty() => wait_cancelled(last).await,
            Some(last) => tokio::select! {
                _ = wait_cancelled(last) => {}
                _ = wait_any(receivers) => {}
            },
        }
    })
}

async fn wait_cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        // A dropped handle can no longer cancel.
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
