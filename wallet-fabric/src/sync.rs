/// Balance sync engine
///
/// Pulls the active wallet set from the repository, asks the chain node for
/// each balance with bounded concurrency and writes one balance record per
/// wallet. A failing wallet is reported and never aborts the batch.
use crate::blockchain::Address;
use crate::blockchain_client::BalanceSource;
use crate::errors::{with_timeout, WalletResult};
use crate::repository::{BalanceRecord, WalletRecord, WalletRepository};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// How much of the active wallet set one run covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// At most `limit` wallets.
    #[default]
    Incremental,
    /// Every active wallet; a limit is not accepted.
    Full,
}

/// Chain restriction of a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ChainSelector {
    /// The service's configured chain.
    #[default]
    Configured,
    /// Active wallets on every chain.
    All,
    Only(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncFailure {
    pub address: Address,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: Uuid,
    pub processed: usize,
    pub failures: Vec<SyncFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

pub struct BalanceSyncEngine {
    repository: Arc<WalletRepository>,
    source: Arc<dyn BalanceSource>,
    concurrency: usize,
    rpc_timeout: Duration,
}

impl BalanceSyncEngine {
    pub fn new(
        repository: Arc<WalletRepository>,
        source: Arc<dyn BalanceSource>,
        concurrency: usize,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            source,
            concurrency: concurrency.max(1),
            rpc_timeout,
        }
    }

    /// Refresh balances of active wallets, at most `limit` of them when set.
    ///
    /// Only a failure to list wallets fails the call; per-wallet errors are
    /// collected in the report.
    pub async fn sync_batch(
        &self,
        chain: Option<&str>,
        limit: Option<usize>,
    ) -> WalletResult<SyncReport> {
        let run_id = Uuid::new_v4();
        let wallets = self.repository.query_active(chain, limit).await?;

        if wallets.is_empty() {
            log::info!("Sync run {}: no active wallets", run_id);
            return Ok(SyncReport {
                run_id,
                processed: 0,
                failures: Vec::new(),
                note: Some("no active wallets".to_string()),
            });
        }

        let total = wallets.len();
        let outcomes: Vec<Result<(), SyncFailure>> = stream::iter(wallets)
            .map(|wallet| self.refresh(run_id, wallet))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut processed = 0;
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(()) => processed += 1,
                Err(failure) => failures.push(failure),
            }
        }

        log::info!(
            "Sync run {}: {} of {} wallet(s) refreshed, {} failure(s)",
            run_id,
            processed,
            total,
            failures.len()
        );
        Ok(SyncReport {
            run_id,
            processed,
            failures,
            note: None,
        })
    }

    async fn refresh(&self, run_id: Uuid, wallet: WalletRecord) -> Result<(), SyncFailure> {
        let result = async {
            let wei = with_timeout(
                self.rpc_timeout,
                "eth_getBalance",
                self.source.get_balance(&wallet.address),
            )
            .await?;
            let record = BalanceRecord::from_wei(wallet.address.clone(), &wallet.chain, &wei);
            self.repository.upsert_balance(&record).await
        }
        .await;

        result.map_err(|err| {
            log::warn!(
                "Sync run {}: balance refresh failed for {}: {}",
                run_id,
                wallet.address,
                err
            );
            SyncFailure {
                address: wallet.address.clone(),
                error: err.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Wei;
    use crate::errors::WalletError;
    use crate::repository::SOURCE_DERIVED;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct StubChain {
        balances: HashMap<Address, String>,
    }

    #[async_trait]
    impl BalanceSource for StubChain {
        async fn get_balance(&self, address: &Address) -> WalletResult<Wei> {
            match self.balances.get(address) {
                Some(hex) => Wei::from_hex(hex),
                None => Err(WalletError::NetworkError("HTTP error: 502".into())),
            }
        }

        async fn ping(&self) -> WalletResult<()> {
            Ok(())
        }
    }

    fn address(n: u8) -> Address {
        Address::from_bytes(&[n; 20]).unwrap()
    }

    fn engine(balances: HashMap<Address, String>) -> (Arc<WalletRepository>, BalanceSyncEngine) {
        let repository = Arc::new(WalletRepository::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(5),
        ));
        let engine = BalanceSyncEngine::new(
            repository.clone(),
            Arc::new(StubChain { balances }),
            4,
            Duration::from_secs(5),
        );
        (repository, engine)
    }

    #[tokio::test]
    async fn empty_wallet_set_is_a_successful_no_op() {
        let (_, engine) = engine(HashMap::new());
        let report = engine.sync_batch(None, Some(200)).await.unwrap();
        assert_eq!(report.processed, 0);
        assert!(report.failures.is_empty());
        assert!(report.note.is_some());
    }

    #[tokio::test]
    async fn one_failing_wallet_does_not_abort_the_batch() {
        let balances = HashMap::from([
            (address(1), "0xDE0B6B3A7640000".to_string()),
            (address(3), "0x0".to_string()),
        ]);
        let (repository, engine) = engine(balances);
        let wallets: Vec<_> = (1..=3)
            .map(|n| WalletRecord::new(address(n), "eth", SOURCE_DERIVED))
            .collect();
        repository.upsert_batch(&wallets).await.unwrap();

        let report = engine.sync_batch(Some("eth"), Some(200)).await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].address, address(2));

        let first = repository.get_balance(&address(1), "eth").await.unwrap().unwrap();
        assert_eq!(first.balance_wei_hex, "0xDE0B6B3A7640000");
        assert_eq!(first.balance, "1.0");
        assert!(repository.get_balance(&address(2), "eth").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chain_filter_and_limit_bound_the_batch() {
        let balances = (1..=4).map(|n| (address(n), "0x1".to_string())).collect();
        let (repository, engine) = engine(balances);
        let wallets = vec![
            WalletRecord::new(address(1), "eth", SOURCE_DERIVED),
            WalletRecord::new(address(2), "eth", SOURCE_DERIVED),
            WalletRecord::new(address(3), "eth", SOURCE_DERIVED),
            WalletRecord::new(address(4), "polygon", SOURCE_DERIVED),
        ];
        repository.upsert_batch(&wallets).await.unwrap();

        let report = engine.sync_batch(Some("polygon"), Some(200)).await.unwrap();
        assert_eq!(report.processed, 1);

        let report = engine.sync_batch(Some("eth"), Some(2)).await.unwrap();
        assert_eq!(report.processed, 2);
    }

    struct SlowChain {
        stalled: Address,
    }

    #[async_trait]
    impl BalanceSource for SlowChain {
        async fn get_balance(&self, address: &Address) -> WalletResult<Wei> {
            if *address == self.stalled {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Wei::from_hex("0x1")
        }

        async fn ping(&self) -> WalletResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn stalled_balance_call_times_out_alone() {
        let repository = Arc::new(WalletRepository::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(5),
        ));
        let engine = BalanceSyncEngine::new(
            repository.clone(),
            Arc::new(SlowChain {
                stalled: address(2),
            }),
            4,
            Duration::from_millis(50),
        );
        let wallets: Vec<_> = (1..=4)
            .map(|n| WalletRecord::new(address(n), "eth", SOURCE_DERIVED))
            .collect();
        repository.upsert_batch(&wallets).await.unwrap();

        let report = engine.sync_batch(None, None).await.unwrap();
        assert_eq!(report.processed, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].address, address(2));
        assert!(report.failures[0].error.contains("Timed out"));
    }

    #[test]
    fn sync_mode_parses_lowercase_names() {
        let full: SyncMode = serde_json::from_str(r#""full""#).unwrap();
        assert_eq!(full, SyncMode::Full);
        assert_eq!(SyncMode::default(), SyncMode::Incremental);
        assert!(serde_json::from_str::<SyncMode>(r#""partial""#).is_err());
    }
}
