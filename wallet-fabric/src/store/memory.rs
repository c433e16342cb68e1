use super::state::StoreState;
use super::{DocumentKey, DocumentStore, Query, Snapshot, WriteBatch};
use crate::errors::{WalletError, WalletResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Default)]
struct FaultPlan {
    conflicts_remaining: u32,
    failing_collections: HashSet<String>,
    offline: bool,
    latency: Option<Duration>,
}

/// In-process [`DocumentStore`] with atomic conditional commits.
///
/// Also carries fault hooks so callers can be tested against conflicts,
/// outages and slow responses.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    faults: Mutex<FaultPlan>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` conditional commits with a write conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.faults.lock().conflicts_remaining = count;
    }

    /// Fail every operation touching `collection`.
    pub fn fail_collection(&self, collection: &str) {
        self.faults
            .lock()
            .failing_collections
            .insert(collection.to_string());
    }

    pub fn set_offline(&self, offline: bool) {
        self.faults.lock().offline = offline;
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.lock().latency = latency;
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.state.lock().count(collection)
    }

    async fn simulate(&self, collections: &[&str]) -> WalletResult<()> {
        let latency = self.faults.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let faults = self.faults.lock();
        if faults.offline {
            return Err(WalletError::StorageError("Document store offline".into()));
        }
        if let Some(failing) = collections
            .iter()
            .find(|name| faults.failing_collections.contains(**name))
        {
            return Err(WalletError::StorageError(format!(
                "Collection '{}' unavailable",
                failing
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, key: &DocumentKey) -> WalletResult<Snapshot> {
        self.simulate(&[key.collection.as_str()]).await?;
        Ok(self.state.lock().snapshot(key))
    }

    async fn commit(&self, batch: WriteBatch) -> WalletResult<()> {
        let collections: Vec<&str> = batch
            .writes()
            .iter()
            .map(|write| write.key.collection.as_str())
            .collect();
        self.simulate(&collections).await?;

        let conditional = batch
            .writes()
            .iter()
            .any(|write| write.expected_version.is_some());
        if conditional {
            let mut faults = self.faults.lock();
            if faults.conflicts_remaining > 0 {
                faults.conflicts_remaining -= 1;
                return Err(WalletError::WriteConflict("Injected conflict".into()));
            }
        }

        self.state.lock().apply(&batch)
    }

    async fn query(&self, query: &Query) -> WalletResult<Vec<Snapshot>> {
        self.simulate(&[query.collection.as_str()]).await?;
        Ok(self.state.lock().query(query))
    }

    async fn ping(&self) -> WalletResult<()> {
        self.simulate(&[]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Document, ServerTimestamp, Write};
    use chrono::DateTime;
    use serde_json::{json, Value};

    fn fields(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn key(id: &str) -> DocumentKey {
        DocumentKey::new("wallets", id)
    }

    #[tokio::test]
    async fn merge_preserves_absent_fields() {
        let store = MemoryStore::new();
        store
            .commit(Write::merge(key("a"), fields(json!({"label": "x", "active": true}))).into())
            .await
            .unwrap();
        store
            .commit(Write::merge(key("a"), fields(json!({"active": false}))).into())
            .await
            .unwrap();

        let snapshot = store.get(&key("a")).await.unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.field("label"), Some(&json!("x")));
        assert_eq!(snapshot.field("active"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn version_precondition_rejects_stale_writes() {
        let store = MemoryStore::new();
        let create = Write::merge(key("a"), fields(json!({"n": 1}))).if_version(0);
        store.commit(create.clone().into()).await.unwrap();

        let err = store.commit(create.into()).await.unwrap_err();
        assert!(matches!(err, WalletError::WriteConflict(_)));

        store
            .commit(Write::merge(key("a"), fields(json!({"n": 2}))).if_version(1).into())
            .await
            .unwrap();
        assert_eq!(store.get(&key("a")).await.unwrap().field("n"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn failed_batches_write_nothing() {
        let store = MemoryStore::new();
        let batch: WriteBatch = vec![
            Write::merge(key("a"), fields(json!({"n": 1}))),
            Write::merge(key("b"), fields(json!({"n": 1}))).if_version(4),
        ]
        .into_iter()
        .collect();

        assert!(store.commit(batch).await.is_err());
        assert_eq!(store.document_count("wallets"), 0);
    }

    #[tokio::test]
    async fn server_timestamps_are_monotonic_and_create_once() {
        let store = MemoryStore::new();
        let write = || {
            Write::merge(key("a"), fields(json!({"active": true})))
                .server_timestamp("createdAt", ServerTimestamp::OnCreate)
                .server_timestamp("updatedAt", ServerTimestamp::OnWrite)
        };

        store.commit(write().into()).await.unwrap();
        let first = store.get(&key("a")).await.unwrap();
        store.commit(write().into()).await.unwrap();
        let second = store.get(&key("a")).await.unwrap();

        assert_eq!(first.field("createdAt"), second.field("createdAt"));
        let parse = |snapshot: &Snapshot, field: &str| {
            DateTime::parse_from_rfc3339(snapshot.field(field).unwrap().as_str().unwrap()).unwrap()
        };
        assert!(parse(&second, "updatedAt") > parse(&first, "updatedAt"));
    }

    #[tokio::test]
    async fn query_filters_and_limits() {
        let store = MemoryStore::new();
        for (id, active) in [("a", true), ("b", false), ("c", true), ("d", true)] {
            store
                .commit(Write::merge(key(id), fields(json!({"active": active}))).into())
                .await
                .unwrap();
        }

        let active = Query::collection("wallets").where_eq("active", true);
        assert_eq!(store.query(&active).await.unwrap().len(), 3);
        assert_eq!(store.query(&active.clone().limit(2)).await.unwrap().len(), 2);
        assert!(store
            .query(&Query::collection("balances"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn fault_hooks_surface_errors() {
        let store = MemoryStore::new();
        store.inject_conflicts(1);
        let write = Write::merge(key("a"), fields(json!({"n": 1}))).if_version(0);
        assert!(matches!(
            store.commit(write.clone().into()).await,
            Err(WalletError::WriteConflict(_))
        ));
        store.commit(write.into()).await.unwrap();

        store.fail_collection("balances");
        assert!(store.get(&DocumentKey::new("balances", "x")).await.is_err());
        assert!(store.get(&key("a")).await.is_ok());

        store.set_offline(true);
        assert!(matches!(store.ping().await, Err(WalletError::StorageError(_))));
    }
}
