use std::fmt;

use crate::store::StoreError;

/// Error type for unit-of-work operations.
///
/// Storage client errors are translated into this vocabulary once, at the
/// boundary, so callers never match on the client's own error types.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransactionError {
    /// The store could not open a transaction.
    #[error("failed to begin transaction: {0}")]
    Startup(Box<TransactionError>),

    /// A concurrent transaction modified data this transaction used.
    #[error("transaction conflicts with a concurrent transaction")]
    Conflict,

    /// The session's channels were torn down unexpectedly.
    #[error("transaction protocol failure: {0}")]
    Protocol(String),

    #[error("transaction already finished")]
    AlreadyFinished,

    #[error("no such entity")]
    NoSuchEntity,

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("transaction spans more than {limit} entity groups")]
    EntityGroupLimit { limit: usize },

    #[error("datastore unavailable: {0}")]
    Unavailable(String),

    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("transaction aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Multi(#[from] MultiError),
}

impl TransactionError {
    /// True when commit lost to a concurrent transaction, so running the
    /// whole transaction again may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, TransactionError::Conflict)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, TransactionError::NoSuchEntity)
    }
}

impl From<StoreError> for TransactionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoSuchEntity => TransactionError::NoSuchEntity,
            StoreError::InvalidKey(reason) => TransactionError::InvalidKey(reason),
            StoreError::ConcurrentTransaction => TransactionError::Conflict,
            StoreError::EntityGroupLimit { limit } => TransactionError::EntityGroupLimit { limit },
            StoreError::Unavailable(reason) => TransactionError::Unavailable(reason),
            StoreError::Cancelled => TransactionError::Cancelled,
            StoreError::DeadlineExceeded => TransactionError::DeadlineExceeded,
            StoreError::TransactionFinished => TransactionError::AlreadyFinished,
            StoreError::Multi(errors) => TransactionError::Multi(MultiError(
                errors.into_iter().map(|e| e.map(Into::into)).collect(),
            )),
            StoreError::Aborted(err) => TransactionError::Aborted(err.to_string()),
        }
    }
}

/// Per-key errors of a multi operation, in request order.
///
/// A slot is `None` when its key succeeded.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiError(pub Vec<Option<TransactionError>>);

impl MultiError {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The error for the key at `index`, if that key failed.
    pub fn get(&self, index: usize) -> Option<&TransactionError> {
        self.0.get(index).and_then(Option::as_ref)
    }

    /// Indexes and errors of the failed keys.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &TransactionError)> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(index, err)| err.as_ref().map(|err| (index, err)))
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut failures = self.failures();
        match failures.next() {
            None => write!(f, "(0 errors)"),
            Some((index, first)) => {
                let rest = failures.count();
                match rest {
                    0 => write!(f, "key {index}: {first}"),
                    1 => write!(f, "key {index}: {first} (and 1 other error)"),
                    _ => write!(f, "key {index}: {first} (and {rest} other errors)"),
                }
            }
        }
    }
}

impl std::error::Error for MultiError {}

/// Result type for unit-of-work operations
pub type TransactionResult<T> = Result<T, TransactionError>;
