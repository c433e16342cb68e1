/// Wallet and balance persistence
///
/// The repository is the only writer of the `wallets` and `balances`
/// collections. All writes are merges keyed by the canonical address, so
/// replaying a write leaves the stored fields unchanged apart from `updatedAt`.
use crate::blockchain::{Address, Wei};
use crate::errors::{with_timeout, WalletError, WalletResult};
use crate::store::{Document, DocumentKey, DocumentStore, Query, ServerTimestamp, Write, WriteBatch};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const WALLETS_COLLECTION: &str = "wallets";
pub const BALANCES_COLLECTION: &str = "balances";

/// Source tag of HD-derived wallets.
pub const SOURCE_DERIVED: &str = "wallet-fabric";
/// Source tag of randomly generated wallets.
pub const SOURCE_GENERATED: &str = "wallet-generator";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletRecord {
    pub address: Address,
    pub chain: String,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derivation_path: Option<String>,
    /// Base wallet this HD wallet was minted alongside, for shadow wallets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_of: Option<Address>,
    pub source: String,
    /// Assigned by the store.
    #[serde(default, skip_serializing)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl WalletRecord {
    pub fn new(address: Address, chain: &str, source: &str) -> Self {
        Self {
            address,
            chain: chain.to_string(),
            active: true,
            label: None,
            derivation_path: None,
            shadow_of: None,
            source: source.to_string(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label;
        self
    }

    pub fn with_derivation_path(mut self, path: Option<String>) -> Self {
        self.derivation_path = path;
        self
    }

    pub fn with_shadow_of(mut self, base: Address) -> Self {
        self.shadow_of = Some(base);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceRecord {
    pub address: Address,
    pub chain: String,
    /// Exactly as returned by the node.
    pub balance_wei_hex: String,
    pub balance_wei: String,
    /// Scaled by 10^18, for display only.
    pub balance: String,
    #[serde(default, skip_serializing)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl BalanceRecord {
    pub fn from_wei(address: Address, chain: &str, wei: &Wei) -> Self {
        Self {
            address,
            chain: chain.to_string(),
            balance_wei_hex: wei.raw_hex().to_string(),
            balance_wei: wei.to_decimal_string(),
            balance: wei.to_scaled_string(),
            updated_at: None,
        }
    }

    pub fn document_id(address: &Address, chain: &str) -> String {
        format!("{}_{}", address, chain)
    }
}

pub struct WalletRepository {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl WalletRepository {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn upsert_wallet(&self, record: &WalletRecord) -> WalletResult<()> {
        self.upsert_batch(std::slice::from_ref(record)).await
    }

    /// Upsert every record in one atomic commit.
    pub async fn upsert_batch(&self, records: &[WalletRecord]) -> WalletResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let batch = records
            .iter()
            .map(wallet_write)
            .collect::<WalletResult<WriteBatch>>()?;
        self.commit(batch, "wallet upsert").await?;

        log::debug!("Upserted {} wallet record(s)", records.len());
        Ok(())
    }

    /// Active wallets, optionally restricted to one chain. Order is unspecified.
    pub async fn query_active(
        &self,
        chain: Option<&str>,
        limit: Option<usize>,
    ) -> WalletResult<Vec<WalletRecord>> {
        let mut query = Query::collection(WALLETS_COLLECTION).where_eq("active", true);
        if let Some(chain) = chain {
            query = query.where_eq("chain", chain);
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        let snapshots = with_timeout(self.timeout, "wallet query", self.store.query(&query))
            .await
            .map_err(persistence_error)?;

        let mut wallets = Vec::with_capacity(snapshots.len());
        for snapshot in &snapshots {
            if let Some(record) = snapshot.decode::<WalletRecord>()? {
                wallets.push(record);
            }
        }
        Ok(wallets)
    }

    pub async fn get_wallet(&self, address: &Address) -> WalletResult<Option<WalletRecord>> {
        let key = DocumentKey::new(WALLETS_COLLECTION, address.as_str());
        let snapshot = with_timeout(self.timeout, "wallet read", self.store.get(&key))
            .await
            .map_err(persistence_error)?;
        snapshot.decode()
    }

    pub async fn upsert_balance(&self, record: &BalanceRecord) -> WalletResult<()> {
        let key = DocumentKey::new(
            BALANCES_COLLECTION,
            BalanceRecord::document_id(&record.address, &record.chain),
        );
        let write = Write::merge(key, to_document(record)?)
            .server_timestamp("updatedAt", ServerTimestamp::OnWrite);
        self.commit(write.into(), "balance upsert").await
    }

    pub async fn get_balance(
        &self,
        address: &Address,
        chain: &str,
    ) -> WalletResult<Option<BalanceRecord>> {
        let key = DocumentKey::new(BALANCES_COLLECTION, BalanceRecord::document_id(address, chain));
        let snapshot = with_timeout(self.timeout, "balance read", self.store.get(&key))
            .await
            .map_err(persistence_error)?;
        snapshot.decode()
    }

    pub async fn ping(&self) -> WalletResult<()> {
        with_timeout(self.timeout, "store ping", self.store.ping()).await
    }

    async fn commit(&self, batch: WriteBatch, operation: &str) -> WalletResult<()> {
        with_timeout(self.timeout, operation, self.store.commit(batch))
            .await
            .map_err(persistence_error)
    }
}

fn wallet_write(record: &WalletRecord) -> WalletResult<Write> {
    let key = DocumentKey::new(WALLETS_COLLECTION, record.address.as_str());
    Ok(Write::merge(key, to_document(record)?)
        .server_timestamp("createdAt", ServerTimestamp::OnCreate)
        .server_timestamp("updatedAt", ServerTimestamp::OnWrite))
}

fn to_document<T: Serialize>(record: &T) -> WalletResult<Document> {
    match serde_json::to_value(record)? {
        Value::Object(map) => Ok(map),
        other => Err(WalletError::PersistenceFailure(format!(
            "Record did not serialize to an object: {}",
            other
        ))),
    }
}

fn persistence_error(err: WalletError) -> WalletError {
    match err {
        WalletError::StorageError(msg) | WalletError::WriteConflict(msg) => {
            WalletError::PersistenceFailure(msg)
        }
        other => other,
    }
}
