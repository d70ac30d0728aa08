use std::fmt;

use uuid::Uuid;

/// Identifier part of a [`Key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyId {
    /// No identifier yet; the store allocates one on put.
    Incomplete,
    Id(i64),
    Name(String),
}

/// Key of an entity in the store.
///
/// Keys form a hierarchy through their optional parent. The top-most ancestor
/// is the entity group root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    kind: String,
    id: KeyId,
    parent: Option<Box<Key>>,
}

impl Key {
    /// Creates a key whose identifier will be allocated by the store.
    pub fn incomplete(kind: impl Into<String>, parent: Option<Key>) -> Self {
        Self::with_id(kind, KeyId::Incomplete, parent)
    }

    /// Creates a key with a numeric identifier.
    pub fn id(kind: impl Into<String>, id: i64, parent: Option<Key>) -> Self {
        Self::with_id(kind, KeyId::Id(id), parent)
    }

    /// Creates a key with a string identifier.
    pub fn name(kind: impl Into<String>, name: impl Into<String>, parent: Option<Key>) -> Self {
        Self::with_id(kind, KeyId::Name(name.into()), parent)
    }

    fn with_id(kind: impl Into<String>, id: KeyId, parent: Option<Key>) -> Self {
        Self {
            kind: kind.into(),
            id,
            parent: parent.map(Box::new),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn key_id(&self) -> &KeyId {
        &self.id
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    pub fn is_incomplete(&self) -> bool {
        self.id == KeyId::Incomplete
    }

    /// Returns a copy of this key carrying the given numeric identifier.
    pub fn complete_with(&self, id: i64) -> Self {
        Self {
            kind: self.kind.clone(),
            id: KeyId::Id(id),
            parent: self.parent.clone(),
        }
    }

    /// The entity group root: the top-most ancestor, or the key itself.
    pub fn root(&self) -> &Key {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Checks that the key is usable for storage.
    ///
    /// Every key in the chain needs a kind, and ancestors must be complete.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind.is_empty() {
            return Err(format!("key {self} has an empty kind"));
        }
        if let KeyId::Name(name) = &self.id {
            if name.is_empty() {
                return Err(format!("key {self} has an empty name"));
            }
        }
        match self.parent() {
            Some(parent) if parent.is_incomplete() => {
                Err(format!("key {self} has an incomplete parent"))
            }
            Some(parent) => parent.validate(),
            None => Ok(()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = self.parent() {
            write!(f, "{parent}")?;
        }
        match &self.id {
            KeyId::Incomplete => write!(f, "/{},0", self.kind),
            KeyId::Id(id) => write!(f, "/{},{id}", self.kind),
            KeyId::Name(name) => write!(f, "/{},{name:?}", self.kind),
        }
    }
}

/// Identifies one underlying transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Key handed out for a write made inside an open transaction.
///
/// The write is not durable until the transaction commits, so the real key is
/// only reachable through the [`Commit`] of the transaction that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingKey {
    transaction: TransactionId,
    key: Key,
}

impl PendingKey {
    pub fn new(transaction: TransactionId, key: Key) -> Self {
        Self { transaction, key }
    }

    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }
}

/// Proof that a transaction committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    transaction: TransactionId,
}

impl Commit {
    pub(crate) fn new(transaction: TransactionId) -> Self {
        Self { transaction }
    }

    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    /// Resolves a pending key produced by this transaction into its real key.
    ///
    /// Returns `None` for pending keys of any other transaction.
    pub fn key(&self, pending: &PendingKey) -> Option<Key> {
        (pending.transaction == self.transaction).then(|| pending.key.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_walks_to_top_ancestor() {
        let root = Key::name("Account", "alice", None);
        let child = Key::id("Order", 7, Some(Key::id("Cart", 1, Some(root.clone()))));
        assert_eq!(child.root(), &root);
        assert_eq!(root.root(), &root);
    }

    #[test]
    fn display_includes_ancestors() {
        let key = Key::id("Order", 7, Some(Key::name("Account", "alice", None)));
        assert_eq!(key.to_string(), "/Account,\"alice\"/Order,7");
    }

    #[test]
    fn validate_rejects_bad_keys() {
        assert!(Key::id("", 1, None).validate().is_err());
        assert!(Key::name("Data", "", None).validate().is_err());
        assert!(Key::id("Data", 1, Some(Key::incomplete("Parent", None)))
            .validate()
            .is_err());
        assert!(Key::incomplete("Data", None).validate().is_ok());
    }

    #[test]
    fn commit_only_resolves_its_own_pending_keys() {
        let key = Key::id("Data", 1, None);
        let tx = TransactionId::new();
        let pending = PendingKey::new(tx, key.clone());

        assert_eq!(Commit::new(tx).key(&pending), Some(key));
        assert_eq!(Commit::new(TransactionId::new()).key(&pending), None);
    }
}
