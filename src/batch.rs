use crate::entity::Entity;
use crate::key::{Key, PendingKey};
use crate::{TransactionError, TransactionResult, UnitOfWorkSession};

/// Operations queued on a session and executed together.
///
/// [`exec`](Self::exec) issues one multi call per kind: puts first, then
/// gets, then deletes. Gets therefore observe the batch's own puts.
pub struct TransactionBatch<'a, S> {
    session: &'a mut S,
    puts: Vec<(Key, Entity)>,
    gets: Vec<Key>,
    deletes: Vec<Key>,
}

/// Per-operation results of a batch, each in enqueue order.
#[derive(Debug, Default)]
pub struct BatchResults {
    pub pending_keys: Vec<TransactionResult<PendingKey>>,
    pub entities: Vec<TransactionResult<Entity>>,
    pub deletes: Vec<TransactionResult<()>>,
}

impl<'a, S: UnitOfWorkSession> TransactionBatch<'a, S> {
    pub(crate) fn new(session: &'a mut S) -> Self {
        Self {
            session,
            puts: Vec::new(),
            gets: Vec::new(),
            deletes: Vec::new(),
        }
    }

    pub fn put(&mut self, key: Key, entity: Entity) -> &mut Self {
        self.puts.push((key, entity));
        self
    }

    pub fn get(&mut self, key: Key) -> &mut Self {
        self.gets.push(key);
        self
    }

    pub fn delete(&mut self, key: Key) -> &mut Self {
        self.deletes.push(key);
        self
    }

    pub fn len(&self) -> usize {
        self.puts.len() + self.gets.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the queued operations.
    ///
    /// Fails as a whole only when the session is no longer open; otherwise
    /// every operation gets its own result.
    pub async fn exec(self) -> TransactionResult<BatchResults> {
        if !self.session.state().is_open() {
            return Err(TransactionError::AlreadyFinished);
        }
        let TransactionBatch {
            session,
            puts,
            gets,
            deletes,
        } = self;
        let mut results = BatchResults::default();

        if !puts.is_empty() {
            let count = puts.len();
            let (keys, entities): (Vec<Key>, Vec<Entity>) = puts.into_iter().unzip();
            results.pending_keys = spread(count, session.put_multi(keys, entities).await);
        }

        if !gets.is_empty() {
            results.entities = match session.lookup_multi(&gets).await {
                Ok(found) => found
                    .into_iter()
                    .map(|entity| entity.ok_or(TransactionError::NoSuchEntity))
                    .collect(),
                Err(err) => spread(gets.len(), Err(err)),
            };
        }

        if !deletes.is_empty() {
            let count = deletes.len();
            let deleted = session
                .delete_multi(&deletes)
                .await
                .map(|()| vec![(); count]);
            results.deletes = spread(count, deleted);
        }

        Ok(results)
    }
}

/// Splits the result of one multi call into per-operation results.
fn spread<T>(count: usize, result: TransactionResult<Vec<T>>) -> Vec<TransactionResult<T>> {
    match result {
        Ok(values) => values.into_iter().map(Ok).collect(),
        Err(TransactionError::Multi(multi)) if multi.len() == count => multi
            .0
            .into_iter()
            .map(|slot| {
                Err(slot.unwrap_or_else(|| {
                    TransactionError::Aborted("another operation in the batch failed".to_string())
                }))
            })
            .collect(),
        Err(err) => (0..count).map(|_| Err(err.clone())).collect(),
    }
}
