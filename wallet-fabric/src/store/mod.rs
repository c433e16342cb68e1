//! Document store interface
//!
//! A small transactional key-value model: documents are JSON objects addressed
//! by `(collection, id)`, every committed write bumps a per-document version,
//! and a write may be made conditional on the version it was computed from.

pub mod file;
pub mod memory;
mod state;

use crate::errors::{WalletError, WalletResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Document body.
pub type Document = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
    pub collection: String,
    pub id: String,
}

impl DocumentKey {
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// Point-in-time read of one document. `version == 0` means it does not exist.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub key: DocumentKey,
    pub data: Option<Document>,
    pub version: u64,
}

impl Snapshot {
    pub fn missing(key: DocumentKey) -> Self {
        Self {
            key,
            data: None,
            version: 0,
        }
    }

    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.as_ref().and_then(|data| data.get(name))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> WalletResult<Option<T>> {
        match &self.data {
            Some(data) => serde_json::from_value(Value::Object(data.clone()))
                .map(Some)
                .map_err(|e| {
                    WalletError::PersistenceFailure(format!(
                        "Malformed document {}/{}: {}",
                        self.key.collection, self.key.id, e
                    ))
                }),
            None => Ok(None),
        }
    }
}

/// Timestamp fields filled in by the store at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerTimestamp {
    /// Set on every write.
    OnWrite,
    /// Set only when the field is not present yet.
    OnCreate,
}

/// A merge write: listed fields overwrite, other fields are preserved.
#[derive(Debug, Clone)]
pub struct Write {
    pub key: DocumentKey,
    pub fields: Document,
    pub timestamps: Vec<(String, ServerTimestamp)>,
    /// Commit only if the document is still at this version (0 = must not exist).
    pub expected_version: Option<u64>,
}

impl Write {
    pub fn merge(key: DocumentKey, fields: Document) -> Self {
        Self {
            key,
            fields,
            timestamps: Vec::new(),
            expected_version: None,
        }
    }

    pub fn server_timestamp(mut self, field: &str, mode: ServerTimestamp) -> Self {
        self.timestamps.push((field.to_string(), mode));
        self
    }

    pub fn if_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// Writes committed together or not at all.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, write: Write) {
        self.writes.push(write);
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }
}

impl From<Write> for WriteBatch {
    fn from(write: Write) -> Self {
        Self {
            writes: vec![write],
        }
    }
}

impl FromIterator<Write> for WriteBatch {
    fn from_iter<I: IntoIterator<Item = Write>>(iter: I) -> Self {
        Self {
            writes: iter.into_iter().collect(),
        }
    }
}

/// Equality query over one collection.
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<(String, Value)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push((field.to_string(), value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.filters
            .iter()
            .all(|(field, expected)| document.get(field) == Some(expected))
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, key: &DocumentKey) -> WalletResult<Snapshot>;

    /// Apply every write atomically. A failed version check yields
    /// [`WalletError::WriteConflict`] and nothing is written.
    async fn commit(&self, batch: WriteBatch) -> WalletResult<()>;

    async fn query(&self, query: &Query) -> WalletResult<Vec<Snapshot>>;

    async fn ping(&self) -> WalletResult<()>;
}
