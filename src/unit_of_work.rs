use std::slice;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::batch::TransactionBatch;
use crate::bridge::{self, Bridge, Decision};
use crate::context::Context;
use crate::entity::Entity;
use crate::key::{Commit, Key, PendingKey};
use crate::retry;
use crate::store::{BoxFuture, Datastore};
use crate::{
    Executor, MultiError, TransactionAware, TransactionError, TransactionResult, UnitOfWorkConfig,
};

/// Unit of Work pattern for managing datastore transactions.
///
/// The UnitOfWork manages the lifecycle of transactions and provides
/// a factory method to create new transaction sessions.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Session: UnitOfWorkSession;

    /// Begin a new transaction session.
    async fn begin(&self) -> TransactionResult<Self::Session> {
        self.begin_with_context(Context::background()).await
    }

    /// Begin a new transaction session bound to a parent context.
    ///
    /// Cancelling the context or passing its deadline fails the session.
    async fn begin_with_context(&self, ctx: Context) -> TransactionResult<Self::Session>;
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    Failed,
}

impl SessionState {
    pub fn is_open(self) -> bool {
        self == SessionState::Open
    }
}

/// Represents a single transaction session.
///
/// Operations are only valid while the session is open. Exactly one of
/// [`commit`](Self::commit) or [`rollback`](Self::rollback) finishes it;
/// afterwards every call fails with [`TransactionError::AlreadyFinished`].
///
/// Operation errors such as a missing entity leave the session open.
#[async_trait]
pub trait UnitOfWorkSession: Send + Sync {
    fn id(&self) -> Uuid;

    fn state(&self) -> SessionState;

    /// Register a component that needs to be notified of transaction events.
    fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>);

    /// Reads entities, with `None` for keys that have no entity.
    async fn lookup_multi(&mut self, keys: &[Key]) -> TransactionResult<Vec<Option<Entity>>>;

    /// Reads entities; missing ones are reported per key through a [`MultiError`].
    async fn get_multi(&mut self, keys: &[Key]) -> TransactionResult<Vec<Entity>> {
        let found = self.lookup_multi(keys).await?;
        if found.iter().all(Option::is_some) {
            return Ok(found.into_iter().flatten().collect());
        }
        let errors = found
            .iter()
            .map(|entity| entity.is_none().then_some(TransactionError::NoSuchEntity))
            .collect();
        Err(MultiError(errors).into())
    }

    async fn get(&mut self, key: &Key) -> TransactionResult<Entity> {
        let mut found = self
            .get_multi(slice::from_ref(key))
            .await
            .map_err(single_error)?;
        found.pop().ok_or_else(missing_result)
    }

    /// Writes entities; the keys become resolvable once the session commits.
    async fn put_multi(
        &mut self,
        keys: Vec<Key>,
        entities: Vec<Entity>,
    ) -> TransactionResult<Vec<PendingKey>>;

    async fn put(&mut self, key: Key, entity: Entity) -> TransactionResult<PendingKey> {
        let mut pending = self
            .put_multi(vec![key], vec![entity])
            .await
            .map_err(single_error)?;
        pending.pop().ok_or_else(missing_result)
    }

    async fn delete_multi(&mut self, keys: &[Key]) -> TransactionResult<()>;

    async fn delete(&mut self, key: &Key) -> TransactionResult<()> {
        self.delete_multi(slice::from_ref(key))
            .await
            .map_err(single_error)
    }

    /// Commit the transaction and notify all registered observers.
    ///
    /// Once the store committed, the [`Commit`] is returned even when an
    /// observer fails; observer errors are logged.
    async fn commit(&mut self) -> TransactionResult<Commit>;

    /// Rollback the transaction and notify all registered observers.
    ///
    /// A rollback carried out by the store is not an error. When the parent
    /// context finished first, the store already aborted the transaction on
    /// its own and the context's error ([`TransactionError::Cancelled`] or
    /// [`TransactionError::DeadlineExceeded`]) is returned instead, leaving
    /// the session [`Failed`](SessionState::Failed).
    async fn rollback(&mut self) -> TransactionResult<()>;

    /// Groups several operations into one multi call per kind.
    fn batch(&mut self) -> TransactionBatch<'_, Self>
    where
        Self: Sized,
    {
        TransactionBatch::new(self)
    }
}

/// Unwraps the only slot of a single-key multi error.
fn single_error(err: TransactionError) -> TransactionError {
    match err {
        TransactionError::Multi(MultiError(mut errors)) if errors.len() == 1 => {
            match errors.pop().flatten() {
                Some(err) => err,
                None => TransactionError::Multi(MultiError(vec![None])),
            }
        }
        err => err,
    }
}

/// Operation errors meaning the underlying transaction is gone.
fn ends_transaction(err: &TransactionError) -> bool {
    matches!(
        err,
        TransactionError::Cancelled
            | TransactionError::DeadlineExceeded
            | TransactionError::AlreadyFinished
    )
}

fn missing_result() -> TransactionError {
    TransactionError::Aborted("datastore returned no result for the key".to_string())
}

/// Default implementation of UnitOfWork over a [`Datastore`].
pub struct DatastoreUnitOfWork<D> {
    store: Arc<D>,
    config: UnitOfWorkConfig,
}

impl<D: Datastore> DatastoreUnitOfWork<D> {
    /// Create a new DatastoreUnitOfWork with the default configuration.
    pub fn new(store: Arc<D>) -> Self {
        Self::with_config(store, UnitOfWorkConfig::default())
    }

    pub fn with_config(store: Arc<D>, config: UnitOfWorkConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<D> {
        &self.store
    }

    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.config
    }

    /// Runs `f` in a session and commits it, retrying on conflicts as
    /// configured by [`UnitOfWorkConfig::retry`].
    pub async fn run_in_transaction<T, F>(&self, f: F) -> TransactionResult<(T, Commit)>
    where
        T: Send,
        F: for<'s> FnMut(
                &'s mut DatastoreUnitOfWorkSession<D>,
            ) -> BoxFuture<'s, TransactionResult<T>>
            + Send,
    {
        retry::run_in_transaction(self, self.config.retry, f).await
    }
}

#[async_trait]
impl<D: Datastore> UnitOfWork for DatastoreUnitOfWork<D> {
    type Session = DatastoreUnitOfWorkSession<D>;

    async fn begin_with_context(&self, ctx: Context) -> TransactionResult<Self::Session> {
        let ctx = match self.config.timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx,
        };
        let id = Uuid::new_v4();
        let (scope, bridge) = bridge::start(
            self.store.clone(),
            ctx,
            self.config.transaction_options(),
            id,
        )
        .await?;
        Ok(DatastoreUnitOfWorkSession::new(id, Executor::new(scope), bridge))
    }
}

/// Default implementation of UnitOfWorkSession over a [`Datastore`].
///
/// Calls on one session are expected to come from one task at a time, which
/// the `&mut self` receivers enforce.
pub struct DatastoreUnitOfWorkSession<D: Datastore> {
    id: Uuid,
    executor: Executor<D::Scope>,
    bridge: Bridge,
    state: SessionState,
    observers: Arc<RwLock<Vec<Arc<dyn TransactionAware>>>>,
}

impl<D: Datastore> DatastoreUnitOfWorkSession<D> {
    pub(crate) fn new(id: Uuid, executor: Executor<D::Scope>, bridge: Bridge) -> Self {
        Self {
            id,
            executor,
            bridge,
            state: SessionState::Open,
            observers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Get the executor for this session.
    pub fn executor(&self) -> &Executor<D::Scope> {
        &self.executor
    }

    fn ensure_open(&self) -> TransactionResult<()> {
        if self.state.is_open() {
            Ok(())
        } else {
            Err(TransactionError::AlreadyFinished)
        }
    }

    /// Moves to `transitional`, hands the decision to the bridge and records
    /// how the transaction ended.
    async fn finish(
        &mut self,
        decision: Decision,
        transitional: SessionState,
        terminal: SessionState,
    ) -> TransactionResult<()> {
        self.ensure_open()?;
        self.state = transitional;
        self.executor.release();
        match self.bridge.finish(decision).await {
            Ok(()) => {
                self.state = terminal;
                Ok(())
            }
            Err(err) => {
                tracing::debug!(session = %self.id, error = %err, "transaction failed");
                self.state = SessionState::Failed;
                Err(err)
            }
        }
    }

    /// Fails the session when an operation found its transaction gone,
    /// reporting the transaction's own outcome where it has one.
    async fn settle<T: Send>(&mut self, result: TransactionResult<T>) -> TransactionResult<T> {
        let err = match result {
            Err(err) if ends_transaction(&err) => err,
            result => return result,
        };
        self.executor.release();
        let outcome = self.bridge.finish(Decision::Rollback).await;
        self.state = SessionState::Failed;
        tracing::debug!(session = %self.id, error = %err, "transaction ended under an operation");
        Err(outcome.err().unwrap_or(err))
    }
}

#[async_trait]
impl<D: Datastore> UnitOfWorkSession for DatastoreUnitOfWorkSession<D> {
    fn id(&self) -> Uuid {
        self.id
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn register_transaction_aware(&self, observer: Arc<dyn TransactionAware>) {
        self.observers.write().push(observer);
    }

    async fn lookup_multi(&mut self, keys: &[Key]) -> TransactionResult<Vec<Option<Entity>>> {
        self.ensure_open()?;
        let result = self.executor.lookup_multi(keys).await;
        self.settle(result).await
    }

    async fn put_multi(
        &mut self,
        keys: Vec<Key>,
        entities: Vec<Entity>,
    ) -> TransactionResult<Vec<PendingKey>> {
        self.ensure_open()?;
        let result = self.executor.put_multi(keys, entities).await;
        self.settle(result).await
    }

    async fn delete_multi(&mut self, keys: &[Key]) -> TransactionResult<()> {
        self.ensure_open()?;
        let result = self.executor.delete_multi(keys).await;
        self.settle(result).await
    }

    async fn commit(&mut self) -> TransactionResult<Commit> {
        self.finish(
            Decision::Commit,
            SessionState::Committing,
            SessionState::Committed,
        )
        .await?;

        // Notify observers after successful commit
        let observers = self.observers.read().clone();
        for observer in observers.iter() {
            if let Err(err) = observer.on_commit().await {
                tracing::warn!(session = %self.id, error = %err, "commit observer failed");
            }
        }
        Ok(Commit::new(self.executor.transaction_id()))
    }

    async fn rollback(&mut self) -> TransactionResult<()> {
        self.finish(
            Decision::Rollback,
            SessionState::RollingBack,
            SessionState::RolledBack,
        )
        .await?;

        // Notify observers after successful rollback
        let observers = self.observers.read().clone();
        for observer in observers.iter() {
            if let Err(err) = observer.on_rollback().await {
                tracing::warn!(session = %self.id, error = %err, "rollback observer failed");
            }
        }
        Ok(())
    }
}
