use crate::entity::Entity;
use crate::key::{Key, PendingKey, TransactionId};
use crate::store::TransactionScope;
use crate::{TransactionError, TransactionResult};

/// Executor holds the transaction-scoped handle of one session.
///
/// It forwards operations to the handle and translates the store's errors.
/// The handle is released when the session decides to commit or roll back,
/// after which every operation fails with
/// [`TransactionError::AlreadyFinished`].
pub struct Executor<S> {
    transaction_id: TransactionId,
    scope: Option<S>,
}

impl<S: TransactionScope> Executor<S> {
    /// Creates a new Executor from a transaction-scoped handle.
    pub fn new(scope: S) -> Self {
        Self {
            transaction_id: scope.transaction_id(),
            scope: Some(scope),
        }
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    fn scope(&self) -> TransactionResult<&S> {
        self.scope.as_ref().ok_or(TransactionError::AlreadyFinished)
    }

    /// Drops the handle once the session finishes or its transaction is gone.
    pub(crate) fn release(&mut self) {
        self.scope = None;
    }

    pub async fn lookup_multi(&self, keys: &[Key]) -> TransactionResult<Vec<Option<Entity>>> {
        Ok(self.scope()?.get_multi(keys).await?)
    }

    pub async fn put_multi(
        &self,
        keys: Vec<Key>,
        entities: Vec<Entity>,
    ) -> TransactionResult<Vec<PendingKey>> {
        Ok(self.scope()?.put_multi(keys, entities).await?)
    }

    pub async fn delete_multi(&self, keys: &[Key]) -> TransactionResult<()> {
        Ok(self.scope()?.delete_multi(keys).await?)
    }
}
