//! Todo data model and audit events.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CollectionError;

/// Opaque caller identity. All state is partitioned by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wraps an already-authenticated identity.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single todo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Positive id, unique within the owner's collection.
    pub id: u64,
    /// Text of the todo.
    pub content: String,
}

impl TodoItem {
    fn new(id: u64, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
        }
    }
}

/// Largest id, `lastInsertedID` or revision accepted from a cached copy.
///
/// Cached payloads are shared with JavaScript consumers, so values stay
/// within the integers a JSON number represents exactly.
pub const MAX_ID: u64 = (1 << 53) - 1;

/// One identity's todos.
///
/// `next_id` is strictly greater than every id ever inserted, so ids are
/// never reused. `revision` counts mutations and orders copies of the same
/// collection. The serialized form is the one stored in the shared cache;
/// decoding rejects copies whose ids or counters are out of range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CollectionRecord")]
pub struct TodoCollection {
    items: BTreeMap<u64, TodoItem>,
    #[serde(rename = "lastInsertedID")]
    next_id: u64,
    revision: u64,
}

#[derive(Deserialize)]
struct CollectionRecord {
    items: BTreeMap<u64, TodoItem>,
    #[serde(rename = "lastInsertedID")]
    next_id: u64,
    // Entries written before revisions existed
    #[serde(default)]
    revision: u64,
}

impl TryFrom<CollectionRecord> for TodoCollection {
    type Error = CollectionError;

    fn try_from(record: CollectionRecord) -> Result<Self, Self::Error> {
        let in_range = |field: &'static str, value: u64| {
            if (1..=MAX_ID).contains(&value) {
                Ok(())
            } else {
                Err(CollectionError::OutOfRange {
                    field,
                    value,
                    max: MAX_ID,
                })
            }
        };

        in_range("lastInsertedID", record.next_id)?;
        if record.revision > MAX_ID {
            return Err(CollectionError::OutOfRange {
                field: "revision",
                value: record.revision,
                max: MAX_ID,
            });
        }
        for (&key, item) in &record.items {
            in_range("id", key)?;
            if item.id != key {
                return Err(CollectionError::KeyMismatch { key, id: item.id });
            }
        }

        Ok(Self {
            items: record.items,
            next_id: record.next_id,
            revision: record.revision,
        })
    }
}

impl TodoCollection {
    /// The collection every identity starts with.
    pub fn seeded() -> Self {
        let items = [
            TodoItem::new(1, "Create new todo"),
            TodoItem::new(2, "Update me"),
            TodoItem::new(3, "Delete example ones"),
        ]
        .into_iter()
        .map(|item| (item.id, item))
        .collect();

        Self {
            items,
            next_id: 4,
            revision: 0,
        }
    }

    /// Consumes the collection, returning its items in id order.
    pub fn into_items(self) -> Vec<TodoItem> {
        self.items.into_values().collect()
    }

    /// Looks up an item by id.
    pub fn get(&self, id: u64) -> Option<&TodoItem> {
        self.items.get(&id)
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the collection holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Id the next inserted item will receive.
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Number of mutations applied to this collection.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Appends a new item under the next id.
    pub fn insert(&mut self, content: impl Into<String>) -> TodoItem {
        let item = TodoItem::new(self.next_id, content);
        self.items.insert(item.id, item.clone());
        self.next_id = self.next_id.saturating_add(1);
        self.revision = self.revision.saturating_add(1);
        item
    }

    /// Removes an item. Removing a missing id is not an error, but still
    /// counts as a mutation.
    pub fn remove(&mut self, id: u64) -> Option<TodoItem> {
        self.revision = self.revision.saturating_add(1);
        self.items.remove(&id)
    }

    /// Merges an advisory copy read from the cache.
    ///
    /// The cached copy replaces `self` unless `self` has a strictly newer
    /// revision. Either way `next_id` ends up above every id known to
    /// either copy.
    pub fn reconcile(&mut self, cached: Option<TodoCollection>) {
        let Some(cached) = cached else {
            return;
        };

        let floor = self.id_floor().max(cached.id_floor());
        if cached.revision >= self.revision {
            *self = cached;
        }
        self.next_id = floor;
    }

    /// Smallest id that is at least `next_id` and above every stored id.
    fn id_floor(&self) -> u64 {
        self.items
            .keys()
            .next_back()
            .and_then(|id| id.checked_add(1))
            .map_or(self.next_id, |past_last| past_last.max(self.next_id))
    }
}

/// Kind of mutation recorded in an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    /// A todo was created.
    Create,
    /// A todo was deleted.
    Delete,
}

impl Display for OperationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => f.write_str("CREATE"),
            OperationKind::Delete => f.write_str("DELETE"),
        }
    }
}

/// Audit record published for every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// What happened.
    #[serde(rename = "opName")]
    pub operation: OperationKind,
    /// Who did it.
    #[serde(rename = "username")]
    pub identity: Identity,
    /// Which todo.
    pub todo_id: u64,
    /// Correlates the event with the request that caused it.
    pub correlation_id: Uuid,
}

impl AuditEvent {
    /// Creates an event with a fresh correlation id.
    pub fn new(operation: OperationKind, identity: Identity, todo_id: u64) -> Self {
        Self {
            operation,
            identity,
            todo_id,
            correlation_id: Uuid::new_v4(),
        }
    }
}
