//! Contracts of the storage client the unit of work is built on.
//!
//! A [`Datastore`] only exposes transactions as a callback run by
//! [`Datastore::run_in_transaction`]: the callback receives a
//! [`TransactionScope`] and its return value decides between commit and abort.

use std::error::Error as StdError;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::context::{Context, ContextError};
use crate::entity::Entity;
use crate::key::{Key, PendingKey, TransactionId};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Callback run inside an underlying transaction.
///
/// Returning `Ok` asks the store to commit; any error aborts.
pub type TransactionFn<S> =
    Box<dyn FnMut(S) -> BoxFuture<'static, Result<(), StoreError>> + Send>;

/// Errors reported by the storage client.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("datastore: no such entity")]
    NoSuchEntity,

    #[error("datastore: invalid key: {0}")]
    InvalidKey(String),

    #[error("datastore: concurrent transaction")]
    ConcurrentTransaction,

    #[error("datastore: transaction spans more than {limit} entity groups")]
    EntityGroupLimit { limit: usize },

    #[error("datastore: unavailable: {0}")]
    Unavailable(String),

    #[error("datastore: context canceled")]
    Cancelled,

    #[error("datastore: context deadline exceeded")]
    DeadlineExceeded,

    #[error("datastore: transaction has already finished")]
    TransactionFinished,

    /// One slot per key of a multi call; `None` where the key succeeded.
    #[error("datastore: {} of {} keys failed", .0.iter().flatten().count(), .0.len())]
    Multi(Vec<Option<StoreError>>),

    /// Error returned by a transaction callback.
    #[error("datastore: transaction aborted: {0}")]
    Aborted(Box<dyn StdError + Send + Sync>),
}

impl StoreError {
    pub fn aborted(err: impl StdError + Send + Sync + 'static) -> Self {
        StoreError::Aborted(Box::new(err))
    }

    /// Returns the callback error if it is of type `E`.
    pub fn aborted_with<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            StoreError::Aborted(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<ContextError> for StoreError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => StoreError::Cancelled,
            ContextError::DeadlineExceeded => StoreError::DeadlineExceeded,
        }
    }
}

/// Options for [`Datastore::run_in_transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Allow the transaction to span several entity groups.
    pub cross_group: bool,
    /// How many times the store may run the callback when commit conflicts.
    pub max_attempts: u32,
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self {
            cross_group: false,
            max_attempts: 3,
        }
    }
}

/// Handle scoped to one underlying transaction.
#[async_trait]
pub trait TransactionScope: Send + Sync + 'static {
    fn transaction_id(&self) -> TransactionId;

    /// Reads entities; `None` for keys without an entity.
    async fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>, StoreError>;

    /// Buffers writes until the transaction commits.
    async fn put_multi(
        &self,
        keys: Vec<Key>,
        entities: Vec<Entity>,
    ) -> Result<Vec<PendingKey>, StoreError>;

    async fn delete_multi(&self, keys: &[Key]) -> Result<(), StoreError>;
}

#[async_trait]
pub trait Datastore: Send + Sync + 'static {
    type Scope: TransactionScope;

    /// Runs `f` inside a transaction and commits when it returns `Ok`.
    ///
    /// The callback may be run again on a conflicting commit, up to
    /// `options.max_attempts` times in total.
    async fn run_in_transaction(
        &self,
        ctx: Context,
        f: TransactionFn<Self::Scope>,
        options: TransactionOptions,
    ) -> Result<(), StoreError>;

    async fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>, StoreError>;

    /// Writes entities immediately, returning keys with allocated identifiers.
    async fn put_multi(&self, keys: Vec<Key>, entities: Vec<Entity>)
        -> Result<Vec<Key>, StoreError>;

    async fn delete_multi(&self, keys: &[Key]) -> Result<(), StoreError>;
}
