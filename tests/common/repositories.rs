use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

use datastore_unit_of_work::{
    PendingKey, TransactionAware, TransactionResult, UnitOfWorkSession,
};

use super::entities::{Order, User};

/// Transaction-aware User Repository
pub struct UserRepository {
    // Track operations for verification in tests
    committed: Arc<RwLock<bool>>,
    rolled_back: Arc<RwLock<bool>>,
}

impl UserRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            committed: Arc::new(RwLock::new(false)),
            rolled_back: Arc::new(RwLock::new(false)),
        })
    }

    pub async fn create<S: UnitOfWorkSession>(
        &self,
        session: &mut S,
        user: &User,
    ) -> TransactionResult<PendingKey> {
        session.put(user.key(), user.to_entity()).await
    }

    pub async fn find_by_id<S: UnitOfWorkSession>(
        &self,
        session: &mut S,
        id: Uuid,
    ) -> TransactionResult<Option<User>> {
        match session.get(&User::key_for(id)).await {
            Ok(entity) => Ok(Some(User::from_entity(id, &entity))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn delete<S: UnitOfWorkSession>(
        &self,
        session: &mut S,
        id: Uuid,
    ) -> TransactionResult<()> {
        session.delete(&User::key_for(id)).await
    }

    pub fn is_committed(&self) -> bool {
        *self.committed.read()
    }

    pub fn is_rolled_back(&self) -> bool {
        *self.rolled_back.read()
    }
}

#[async_trait]
impl TransactionAware for UserRepository {
    async fn on_commit(&self) -> TransactionResult<()> {
        *self.committed.write() = true;
        Ok(())
    }

    async fn on_rollback(&self) -> TransactionResult<()> {
        *self.rolled_back.write() = true;
        Ok(())
    }
}

/// Transaction-aware Order Repository
pub struct OrderRepository {
    // Track operations for verification in tests
    committed: Arc<RwLock<bool>>,
    rolled_back: Arc<RwLock<bool>>,
}

impl OrderRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            committed: Arc::new(RwLock::new(false)),
            rolled_back: Arc::new(RwLock::new(false)),
        })
    }

    pub async fn create<S: UnitOfWorkSession>(
        &self,
        session: &mut S,
        order: &Order,
    ) -> TransactionResult<PendingKey> {
        session.put(order.key(), order.to_entity()).await
    }

    pub async fn find_by_id<S: UnitOfWorkSession>(
        &self,
        session: &mut S,
        user_id: Uuid,
        id: Uuid,
    ) -> TransactionResult<Option<Order>> {
        match session.get(&Order::key_for(user_id, id)).await {
            Ok(entity) => Ok(Some(Order::from_entity(user_id, id, &entity))),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub fn is_committed(&self) -> bool {
        *self.committed.read()
    }

    pub fn is_rolled_back(&self) -> bool {
        *self.rolled_back.read()
    }
}

#[async_trait]
impl TransactionAware for OrderRepository {
    async fn on_commit(&self) -> TransactionResult<()> {
        *self.committed.write() = true;
        Ok(())
    }

    async fn on_rollback(&self) -> TransactionResult<()> {
        *self.rolled_back.write() = true;
        Ok(())
    }
}
