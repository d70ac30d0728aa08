//! Explicit transaction handles over a callback-only transaction primitive.
//!
//! [`Datastore::run_in_transaction`] only commits or aborts depending on what
//! its callback returns. [`start`] runs that primitive on a background task
//! whose callback hands the transaction scope to the caller and then parks
//! until [`Bridge::finish`] sends the caller's decision.
//!
//! Three single-use channels connect the two sides:
//!
//! - scope: background -> foreground, once, while starting
//! - decision: foreground -> background, once, on commit or rollback
//! - outcome: background -> foreground, once, after the primitive returned
//!
//! The primitive always runs with `max_attempts = 1`. A retry would re-run
//! the callback while the caller's earlier operations were already applied
//! through the handed-off scope.

use std::sync::Arc;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::context::Context;
use crate::error::{TransactionError, TransactionResult};
use crate::store::{BoxFuture, Datastore, StoreError, TransactionFn, TransactionOptions};

/// What the caller decided to do with the open transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decision {
    Commit,
    Rollback,
}

/// Returned from the callback so the primitive aborts on a requested rollback.
///
/// Private to this module, so no other error can be mistaken for it.
#[derive(Debug, thiserror::Error)]
#[error("rollback requested")]
struct RollbackRequested;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ProtocolViolation(&'static str);

type Outcome = TransactionResult<()>;

/// Foreground half of a started transaction.
pub(crate) struct Bridge {
    session: Uuid,
    decision: Option<oneshot::Sender<Decision>>,
    outcome: Option<oneshot::Receiver<Outcome>>,
}

/// Opens a transaction on a background task and returns its scope.
///
/// Resolves as soon as the background task produced either the scope or a
/// failure, whichever comes first.
pub(crate) async fn start<D: Datastore>(
    store: Arc<D>,
    ctx: Context,
    options: TransactionOptions,
    session: Uuid,
) -> TransactionResult<(D::Scope, Bridge)> {
    let (scope_tx, scope_rx) = oneshot::channel::<D::Scope>();
    let (decision_tx, decision_rx) = oneshot::channel::<Decision>();
    let (outcome_tx, mut outcome_rx) = oneshot::channel::<Outcome>();

    let mut handoff = Some((scope_tx, decision_rx));
    let callback: TransactionFn<D::Scope> = Box::new(
        move |scope: D::Scope| -> BoxFuture<'static, Result<(), StoreError>> {
            let handoff = handoff.take();
            Box::pin(async move {
                let Some((scope_tx, decision_rx)) = handoff else {
                    return Err(StoreError::aborted(ProtocolViolation(
                        "transaction callback ran more than once",
                    )));
                };
                if scope_tx.send(scope).is_err() {
                    return Err(StoreError::aborted(ProtocolViolation(
                        "session was dropped while starting",
                    )));
                }
                match decision_rx.await {
                    Ok(Decision::Commit) => Ok(()),
                    Ok(Decision::Rollback) => Err(StoreError::aborted(RollbackRequested)),
                    Err(_) => {
                        tracing::warn!(%session, "session abandoned without commit or rollback");
                        Err(StoreError::aborted(ProtocolViolation(
                            "session was dropped before commit or rollback",
                        )))
                    }
                }
            })
        },
    );

    let options = TransactionOptions {
        max_attempts: 1,
        ..options
    };
    tokio::spawn(async move {
        let result = store.run_in_transaction(ctx, callback, options).await;
        let outcome = match result {
            Ok(()) => Ok(()),
            Err(err) if err.aborted_with::<RollbackRequested>().is_some() => Ok(()),
            Err(err) => Err(translate(err)),
        };
        tracing::debug!(%session, ok = outcome.is_ok(), "transaction finished");
        // The session may be gone already; nobody is left to report to.
        let _ = outcome_tx.send(outcome);
    });

    tokio::select! {
        biased;
        scope = scope_rx => match scope {
            Ok(scope) => {
                tracing::debug!(%session, "transaction open");
                let bridge = Bridge {
                    session,
                    decision: Some(decision_tx),
                    outcome: Some(outcome_rx),
                };
                Ok((scope, bridge))
            }
            // The primitive returned without running the callback.
            Err(_) => Err(startup_failure(session, outcome_rx.await)),
        },
        outcome = &mut outcome_rx => Err(startup_failure(session, outcome)),
    }
}

fn translate(err: StoreError) -> TransactionError {
    match err.aborted_with::<ProtocolViolation>() {
        Some(violation) => TransactionError::Protocol(violation.0.to_string()),
        None => err.into(),
    }
}

fn startup_failure(
    session: Uuid,
    outcome: Result<Outcome, oneshot::error::RecvError>,
) -> TransactionError {
    let err = match outcome {
        Ok(Ok(())) => panic!("transaction {session} finished before its scope was handed off"),
        Ok(Err(err)) => err,
        Err(_) => TransactionError::Protocol(
            "transaction task ended without reporting an outcome".to_string(),
        ),
    };
    tracing::debug!(%session, error = %err, "failed to begin transaction");
    TransactionError::Startup(Box::new(err))
}

impl Bridge {
    /// Sends the decision and waits for the finalized outcome.
    ///
    /// A rollback that the store carried out is reported as `Ok`. Any call
    /// after the first fails with [`TransactionError::AlreadyFinished`].
    pub(crate) async fn finish(&mut self, decision: Decision) -> TransactionResult<()> {
        let (Some(decision_tx), Some(outcome_rx)) = (self.decision.take(), self.outcome.take())
        else {
            return Err(TransactionError::AlreadyFinished);
        };

        tracing::debug!(session = %self.session, ?decision, "finishing transaction");
        // A failed send means the primitive already gave up on the callback,
        // for instance because the context finished. The outcome says why.
        let delivered = decision_tx.send(decision).is_ok();

        match outcome_rx.await {
            Ok(Ok(())) if !delivered => Err(TransactionError::Protocol(
                "transaction finished without receiving a decision".to_string(),
            )),
            Ok(outcome) => outcome,
            Err(_) => Err(TransactionError::Protocol(
                "transaction task ended without reporting an outcome".to_string(),
            )),
        }
    }
}
