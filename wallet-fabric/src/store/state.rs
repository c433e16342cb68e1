use super::{Document, DocumentKey, Query, ServerTimestamp, Snapshot, WriteBatch};
use crate::errors::{WalletError, WalletResult};
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct StoredDocument {
    data: Document,
    version: u64,
}

/// Document table shared by the store backends. Holds the commit rules:
/// preconditions are checked for the whole batch before anything is applied.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoreState {
    documents: BTreeMap<DocumentKey, StoredDocument>,
    last_commit: Option<DateTime<Utc>>,
}

/// On-disk form of [`StoreState`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct PersistedState {
    pub last_commit: Option<DateTime<Utc>>,
    pub documents: Vec<PersistedDocument>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct PersistedDocument {
    pub collection: String,
    pub id: String,
    pub version: u64,
    pub data: Document,
}

impl StoreState {
    pub fn snapshot(&self, key: &DocumentKey) -> Snapshot {
        match self.documents.get(key) {
            Some(stored) => Snapshot {
                key: key.clone(),
                data: Some(stored.data.clone()),
                version: stored.version,
            },
            None => Snapshot::missing(key.clone()),
        }
    }

    pub fn apply(&mut self, batch: &WriteBatch) -> WalletResult<()> {
        for write in batch.writes() {
            if let Some(expected) = write.expected_version {
                let current = self
                    .documents
                    .get(&write.key)
                    .map(|stored| stored.version)
                    .unwrap_or(0);
                if current != expected {
                    return Err(WalletError::WriteConflict(format!(
                        "{}/{} is at version {}, expected {}",
                        write.key.collection, write.key.id, current, expected
                    )));
                }
            }
        }

        let commit_time = next_commit_time(self.last_commit);
        self.last_commit = Some(commit_time);
        let stamp = Value::String(commit_time.to_rfc3339_opts(SecondsFormat::Micros, true));

        for write in batch.writes() {
            let stored = self
                .documents
                .entry(write.key.clone())
                .or_insert_with(|| StoredDocument {
                    data: Document::new(),
                    version: 0,
                });

            for (field, value) in &write.fields {
                stored.data.insert(field.clone(), value.clone());
            }
            for (field, mode) in &write.timestamps {
                match mode {
                    ServerTimestamp::OnWrite => {
                        stored.data.insert(field.clone(), stamp.clone());
                    }
                    ServerTimestamp::OnCreate => {
                        stored
                            .data
                            .entry(field.clone())
                            .or_insert_with(|| stamp.clone());
                    }
                }
            }
            stored.version += 1;
        }

        Ok(())
    }

    pub fn query(&self, query: &Query) -> Vec<Snapshot> {
        let limit = query.limit.unwrap_or(usize::MAX);
        self.documents
            .iter()
            .filter(|(key, stored)| key.collection == query.collection && query.matches(&stored.data))
            .take(limit)
            .map(|(key, stored)| Snapshot {
                key: key.clone(),
                data: Some(stored.data.clone()),
                version: stored.version,
            })
            .collect()
    }

    pub fn count(&self, collection: &str) -> usize {
        self.documents
            .keys()
            .filter(|key| key.collection == collection)
            .count()
    }

    pub fn to_persisted(&self) -> PersistedState {
        PersistedState {
            last_commit: self.last_commit,
            documents: self
                .documents
                .iter()
                .map(|(key, stored)| PersistedDocument {
                    collection: key.collection.clone(),
                    id: key.id.clone(),
                    version: stored.version,
                    data: stored.data.clone(),
                })
                .collect(),
        }
    }

    pub fn from_persisted(persisted: PersistedState) -> WalletResult<Self> {
        let mut documents = BTreeMap::new();
        for document in persisted.documents {
            if document.version == 0 {
                return Err(WalletError::PersistenceFailure(format!(
                    "Stored document {}/{} has version 0",
                    document.collection, document.id
                )));
            }
            let key = DocumentKey::new(document.collection, document.id);
            let stored = StoredDocument {
                data: document.data,
                version: document.version,
            };
            if documents.insert(key.clone(), stored).is_some() {
                return Err(WalletError::PersistenceFailure(format!(
                    "Duplicate stored document {}/{}",
                    key.collection, key.id
                )));
            }
        }
        Ok(Self {
            documents,
            last_commit: persisted.last_commit,
        })
    }
}

fn next_commit_time(last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match last {
        Some(last) if now <= last => last + ChronoDuration::microseconds(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Write;
    use serde_json::json;

    fn write(id: &str, value: Value) -> Write {
        Write::merge(
            DocumentKey::new("wallets", id),
            value.as_object().cloned().unwrap(),
        )
    }

    #[test]
    fn persisted_form_restores_versions_and_clock() {
        let mut state = StoreState::default();
        state.apply(&write("a", json!({"n": 1})).into()).unwrap();
        state.apply(&write("a", json!({"n": 2})).into()).unwrap();
        state.apply(&write("b", json!({"n": 1})).into()).unwrap();

        let restored = StoreState::from_persisted(state.to_persisted()).unwrap();
        let key = DocumentKey::new("wallets", "a");
        assert_eq!(restored.snapshot(&key).version, 2);
        assert_eq!(restored.count("wallets"), 2);
        assert_eq!(restored.last_commit, state.last_commit);
    }

    #[test]
    fn commit_clock_never_goes_backwards() {
        let ahead = Utc::now() + ChronoDuration::hours(1);
        assert_eq!(
            next_commit_time(Some(ahead)),
            ahead + ChronoDuration::microseconds(1)
        );
    }

    #[test]
    fn duplicate_persisted_documents_are_rejected() {
        let entry = PersistedDocument {
            collection: "wallets".into(),
            id: "a".into(),
            version: 1,
            data: Document::new(),
        };
        let persisted = PersistedState {
            last_commit: None,
            documents: vec![entry.clone(), entry],
        };
        assert!(matches!(
            StoreState::from_persisted(persisted),
            Err(WalletError::PersistenceFailure(_))
        ));
    }
}
