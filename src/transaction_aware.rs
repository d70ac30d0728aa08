use async_trait::async_trait;

use crate::TransactionResult;

/// Trait for components that need to be notified of transaction lifecycle events.
///
/// Components implementing this trait can be registered with a UnitOfWorkSession
/// to receive callbacks once the session's transaction has committed or rolled
/// back. This allows repositories and other components to update caches or
/// release in-memory state tied to the transaction.
#[async_trait]
pub trait TransactionAware: Send + Sync {
    /// Called after the store committed the transaction.
    async fn on_commit(&self) -> TransactionResult<()>;

    /// Called after the store rolled the transaction back on request.
    ///
    /// Not called when the transaction failed.
    async fn on_rollback(&self) -> TransactionResult<()>;
}
