//! In-process [`Datastore`] with optimistic concurrency control.
//!
//! Every stored key carries a version. A transaction records the version of
//! each key it touches and buffers its writes; commit fails with
//! [`StoreError::ConcurrentTransaction`] when any recorded version moved.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::context::Context;
use crate::entity::Entity;
use crate::key::{Key, PendingKey, TransactionId};
use crate::store::{Datastore, StoreError, TransactionFn, TransactionOptions, TransactionScope};

/// Entity groups a cross-group transaction may touch.
pub const MAX_ENTITY_GROUPS: usize = 25;

#[derive(Default)]
struct Stored {
    entity: Option<Entity>,
    version: u64,
}

#[derive(Default)]
struct Inner {
    entities: HashMap<Key, Stored>,
    clock: u64,
}

impl Inner {
    fn version(&self, key: &Key) -> u64 {
        self.entities.get(key).map_or(0, |stored| stored.version)
    }

    fn lookup(&self, key: &Key) -> Option<Entity> {
        self.entities.get(key).and_then(|stored| stored.entity.clone())
    }

    fn write(&mut self, key: Key, entity: Option<Entity>) {
        self.clock += 1;
        let version = self.clock;
        self.entities.insert(key, Stored { entity, version });
    }
}

struct Shared {
    inner: Mutex<Inner>,
    next_id: AtomicI64,
    available: AtomicBool,
}

impl Shared {
    fn allocate(&self, key: &Key) -> Key {
        if key.is_incomplete() {
            key.complete_with(self.next_id.fetch_add(1, Ordering::SeqCst))
        } else {
            key.clone()
        }
    }
}

/// Entities live in one map guarded by a mutex.
///
/// Deletes leave a versioned tombstone behind so that a transaction which
/// read the key before the delete still conflicts on commit. Tombstones are
/// never collected, so the map only grows.
#[derive(Clone)]
pub struct MemoryDatastore {
    shared: Arc<Shared>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner::default()),
                next_id: AtomicI64::new(1),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// While unavailable, transactions fail before their callback runs.
    pub fn set_available(&self, available: bool) {
        self.shared.available.store(available, Ordering::SeqCst);
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        let inner = self.shared.inner.lock();
        inner.entities.values().filter(|s| s.entity.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_complete(keys: &[Key]) -> Result<(), StoreError> {
    collect_key_errors(keys.iter().map(|key| {
        if key.is_incomplete() {
            Err(format!("key {key} is incomplete"))
        } else {
            key.validate()
        }
    }))
}

fn collect_key_errors(
    results: impl Iterator<Item = Result<(), String>>,
) -> Result<(), StoreError> {
    let errors: Vec<Option<StoreError>> = results
        .map(|result| result.err().map(StoreError::InvalidKey))
        .collect();
    if errors.iter().any(Option::is_some) {
        return Err(StoreError::Multi(errors));
    }
    Ok(())
}

fn check_lengths(keys: usize, entities: usize) -> Result<(), StoreError> {
    if keys != entities {
        return Err(StoreError::InvalidKey(format!(
            "{keys} keys do not match {entities} entities"
        )));
    }
    Ok(())
}

#[async_trait]
impl Datastore for MemoryDatastore {
    type Scope = MemoryScope;

    async fn run_in_transaction(
        &self,
        ctx: Context,
        mut f: TransactionFn<MemoryScope>,
        options: TransactionOptions,
    ) -> Result<(), StoreError> {
        if !self.shared.available.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "datastore is not accepting transactions".to_string(),
            ));
        }
        if let Some(err) = ctx.err() {
            return Err(err.into());
        }

        let attempts = options.max_attempts.max(1);
        for attempt in 1..=attempts {
            let scope = MemoryScope::new(self.shared.clone(), options.cross_group, ctx.clone());
            let result = tokio::select! {
                biased;
                done = ctx.done() => Err(done.into()),
                result = f(scope.clone()) => result,
            };
            if let Err(err) = result {
                scope.abort();
                return Err(err);
            }
            match scope.commit() {
                Ok(()) => return Ok(()),
                Err(StoreError::ConcurrentTransaction) if attempt < attempts => {
                    tracing::debug!(
                        transaction = %scope.transaction_id(),
                        attempt,
                        "commit conflicted, running transaction again"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Err(StoreError::ConcurrentTransaction)
    }

    async fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>, StoreError> {
        validate_complete(keys)?;
        let inner = self.shared.inner.lock();
        Ok(keys.iter().map(|key| inner.lookup(key)).collect())
    }

    async fn put_multi(
        &self,
        keys: Vec<Key>,
        entities: Vec<Entity>,
    ) -> Result<Vec<Key>, StoreError> {
        check_lengths(keys.len(), entities.len())?;
        collect_key_errors(keys.iter().map(Key::validate))?;
        let keys: Vec<Key> = keys.iter().map(|key| self.shared.allocate(key)).collect();
        let mut inner = self.shared.inner.lock();
        for (key, entity) in keys.iter().zip(entities) {
            inner.write(key.clone(), Some(entity));
        }
        Ok(keys)
    }

    async fn delete_multi(&self, keys: &[Key]) -> Result<(), StoreError> {
        validate_complete(keys)?;
        let mut inner = self.shared.inner.lock();
        for key in keys {
            inner.write(key.clone(), None);
        }
        Ok(())
    }
}

#[derive(Default)]
struct TxState {
    seen: HashMap<Key, u64>,
    writes: BTreeMap<Key, Option<Entity>>,
    groups: HashSet<Key>,
    finished: bool,
}

struct ScopeInner {
    id: TransactionId,
    shared: Arc<Shared>,
    cross_group: bool,
    ctx: Context,
    state: Mutex<TxState>,
}

/// Transaction-scoped handle of a [`MemoryDatastore`].
#[derive(Clone)]
pub struct MemoryScope {
    inner: Arc<ScopeInner>,
}

impl MemoryScope {
    fn new(shared: Arc<Shared>, cross_group: bool, ctx: Context) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                id: TransactionId::new(),
                shared,
                cross_group,
                ctx,
                state: Mutex::new(TxState::default()),
            }),
        }
    }

    /// Records the first observed version of every key and its entity group.
    ///
    /// Once the transaction's context finished, operations report why.
    fn touch(&self, state: &mut TxState, keys: &[Key]) -> Result<(), StoreError> {
        if let Some(err) = self.inner.ctx.err() {
            return Err(err.into());
        }
        if state.finished {
            return Err(StoreError::TransactionFinished);
        }
        let limit = if self.inner.cross_group {
            MAX_ENTITY_GROUPS
        } else {
            1
        };
        let mut groups = state.groups.clone();
        groups.extend(keys.iter().map(|key| key.root().clone()));
        if groups.len() > limit {
            return Err(StoreError::EntityGroupLimit { limit });
        }
        state.groups = groups;

        let inner = self.inner.shared.inner.lock();
        for key in keys {
            state
                .seen
                .entry(key.clone())
                .or_insert_with(|| inner.version(key));
        }
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock();
        if state.finished {
            return Err(StoreError::TransactionFinished);
        }
        state.finished = true;

        let mut inner = self.inner.shared.inner.lock();
        if state
            .seen
            .iter()
            .any(|(key, version)| inner.version(key) != *version)
        {
            return Err(StoreError::ConcurrentTransaction);
        }
        for (key, entity) in std::mem::take(&mut state.writes) {
            inner.write(key, entity);
        }
        Ok(())
    }

    fn abort(&self) {
        let mut state = self.inner.state.lock();
        state.finished = true;
        state.writes.clear();
    }
}

#[async_trait]
impl TransactionScope for MemoryScope {
    fn transaction_id(&self) -> TransactionId {
        self.inner.id
    }

    async fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<Entity>>, StoreError> {
        validate_complete(keys)?;
        let mut state = self.inner.state.lock();
        self.touch(&mut state, keys)?;
        let inner = self.inner.shared.inner.lock();
        Ok(keys
            .iter()
            .map(|key| match state.writes.get(key) {
                Some(written) => written.clone(),
                None => inner.lookup(key),
            })
            .collect())
    }

    async fn put_multi(
        &self,
        keys: Vec<Key>,
        entities: Vec<Entity>,
    ) -> Result<Vec<PendingKey>, StoreError> {
        check_lengths(keys.len(), entities.len())?;
        collect_key_errors(keys.iter().map(Key::validate))?;
        let keys: Vec<Key> = keys
            .iter()
            .map(|key| self.inner.shared.allocate(key))
            .collect();

        let mut state = self.inner.state.lock();
        self.touch(&mut state, &keys)?;
        let mut pending = Vec::with_capacity(keys.len());
        for (key, entity) in keys.into_iter().zip(entities) {
            pending.push(PendingKey::new(self.inner.id, key.clone()));
            state.writes.insert(key, Some(entity));
        }
        Ok(pending)
    }

    async fn delete_multi(&self, keys: &[Key]) -> Result<(), StoreError> {
        validate_complete(keys)?;
        let mut state = self.inner.state.lock();
        self.touch(&mut state, keys)?;
        for key in keys {
            state.writes.insert(key.clone(), None);
        }
        Ok(())
    }
}
