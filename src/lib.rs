//! Datastore Unit of Work Module
//!
//! This module provides explicit transaction sessions (begin, operate, then
//! commit or roll back) on top of a datastore whose only transactional
//! primitive is a callback run by `run_in_transaction`.
//! It isolates transaction management from specific repository implementations.

mod bridge;

pub mod batch;
pub mod config;
pub mod context;
pub mod entity;
pub mod error;
pub mod executor;
pub mod key;
pub mod memory;
pub mod retry;
pub mod store;
pub mod transaction_aware;
pub mod unit_of_work;

pub use batch::{BatchResults, TransactionBatch};
pub use config::UnitOfWorkConfig;
pub use context::{CancelHandle, Context, ContextError};
pub use entity::{Entity, Value};
pub use error::{MultiError, TransactionError, TransactionResult};
pub use executor::Executor;
pub use key::{Commit, Key, KeyId, PendingKey, TransactionId};
pub use memory::MemoryDatastore;
pub use retry::{run_in_transaction, RetryPolicy};
pub use store::{Datastore, TransactionOptions, TransactionScope};
pub use transaction_aware::TransactionAware;
pub use unit_of_work::{
    DatastoreUnitOfWork, DatastoreUnitOfWorkSession, SessionState, UnitOfWork, UnitOfWorkSession,
};
