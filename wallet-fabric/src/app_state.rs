use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::allocator::{IndexAllocator, RetryPolicy};
use crate::blockchain_client::{BalanceSource, BlockchainClient};
use crate::config::FabricConfig;
use crate::errors::{WalletError, WalletResult};
use crate::escrow::{MemorySecretManager, SecretEscrow, SecretManager, VaultSecretManager};
use crate::repository::WalletRepository;
use crate::store::{DocumentStore, FileStore, MemoryStore};
use crate::sync::BalanceSyncEngine;
use crate::validation::InputValidator;

const RETRY_BASE_DELAY: Duration = Duration::from_millis(25);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(1);

/// Every client handle the fabric needs, built once at start-up.
pub struct FabricContext {
    config: FabricConfig,
    store: Arc<dyn DocumentStore>,
    secrets: Arc<dyn SecretManager>,
    chain: Arc<dyn BalanceSource>,
    validator: InputValidator,
    allocator: IndexAllocator,
    repository: Arc<WalletRepository>,
    escrow: SecretEscrow,
    sync: BalanceSyncEngine,
    started_at: Instant,
}

impl FabricContext {
    /// Wire the components around already constructed backends.
    pub fn initialize(
        config: FabricConfig,
        store: Arc<dyn DocumentStore>,
        secrets: Arc<dyn SecretManager>,
        chain: Arc<dyn BalanceSource>,
    ) -> WalletResult<Self> {
        let validator = InputValidator::new()?;
        let policy = RetryPolicy::new(
            config.allocator_max_attempts,
            RETRY_BASE_DELAY,
            RETRY_MAX_DELAY,
        );

        let repository = Arc::new(WalletRepository::new(store.clone(), config.store_timeout));
        let allocator = IndexAllocator::new(store.clone(), policy, config.store_timeout);
        let escrow = SecretEscrow::new(secrets.clone(), policy, config.secrets_timeout);
        let sync = BalanceSyncEngine::new(
            repository.clone(),
            chain.clone(),
            config.sync_concurrency,
            config.rpc_timeout,
        );

        Ok(Self {
            config,
            store,
            secrets,
            chain,
            validator,
            allocator,
            repository,
            escrow,
            sync,
            started_at: Instant::now(),
        })
    }

    /// Build the backends described by `config`.
    ///
    /// The RPC endpoint comes from `CHAIN_RPC_URL` or, failing that, from the
    /// secret named by `CHAIN_RPC_URL_SECRET`. Documents live under
    /// `FABRIC_STORE_DIR` when it is set.
    pub async fn from_config(config: FabricConfig) -> WalletResult<Self> {
        let store: Arc<dyn DocumentStore> = match &config.store_dir {
            Some(dir) => {
                let dir = dir.clone();
                let store = tokio::task::spawn_blocking(move || FileStore::open(dir))
                    .await
                    .map_err(|e| WalletError::StorageError(format!("Store open task failed: {}", e)))??;
                Arc::new(store)
            }
            None => {
                log::warn!("No store directory configured; documents are kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };

        let secrets: Arc<dyn SecretManager> = match (&config.vault_dir, &config.vault_passphrase) {
            (Some(dir), Some(passphrase)) => {
                log::info!("Using encrypted secret vault at {}", dir.display());
                Arc::new(VaultSecretManager::open_async(dir.clone(), passphrase.clone()).await?)
            }
            _ => {
                log::warn!("No secret vault configured; secrets are kept in memory only");
                Arc::new(MemorySecretManager::new())
            }
        };

        let rpc_url = match &config.rpc_url {
            Some(url) => url.clone(),
            None => {
                let escrow = SecretEscrow::new(
                    secrets.clone(),
                    RetryPolicy::new(config.allocator_max_attempts, RETRY_BASE_DELAY, RETRY_MAX_DELAY),
                    config.secrets_timeout,
                );
                match escrow.access_secret(&config.rpc_url_secret).await {
                    Ok(payload) => String::from_utf8(payload.to_vec())
                        .map(|url| url.trim().to_string())
                        .map_err(|_| {
                            WalletError::ConfigError(format!(
                                "Secret '{}' is not valid UTF-8",
                                config.rpc_url_secret
                            ))
                        })?,
                    Err(WalletError::SecretNotFound(_)) => {
                        return Err(WalletError::ConfigError(format!(
                            "CHAIN_RPC_URL is unset and secret '{}' does not exist",
                            config.rpc_url_secret
                        )))
                    }
                    Err(err) => return Err(err),
                }
            }
        };

        let chain = Arc::new(BlockchainClient::new(&rpc_url, config.rpc_timeout)?);
        log::info!("Chain RPC endpoint configured for '{}'", config.chain);

        Self::initialize(config, store, secrets, chain)
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn secrets(&self) -> &Arc<dyn SecretManager> {
        &self.secrets
    }

    pub fn chain(&self) -> &Arc<dyn BalanceSource> {
        &self.chain
    }

    pub fn validator(&self) -> &InputValidator {
        &self.validator
    }

    pub fn allocator(&self) -> &IndexAllocator {
        &self.allocator
    }

    pub fn repository(&self) -> &WalletRepository {
        &self.repository
    }

    pub fn escrow(&self) -> &SecretEscrow {
        &self.escrow
    }

    pub fn sync_engine(&self) -> &BalanceSyncEngine {
        &self.sync
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Shared handle given to request handlers.
pub type SharedFabricContext = Arc<FabricContext>;
