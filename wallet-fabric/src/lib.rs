// lib.rs - Core library structure for the wallet fabric

pub mod allocator;
pub mod api;
pub mod app_state;
pub mod blockchain;
pub mod blockchain_client;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod escrow;
pub mod fabric;
pub mod repository;
pub mod store;
pub mod sync;
pub mod validation;

// Re-export common types
pub use allocator::{IndexAllocator, Reservation, RetryPolicy};
pub use api::types::*;
pub use app_state::{FabricContext, SharedFabricContext};
pub use blockchain::{Address, Wei};
pub use blockchain_client::{BalanceSource, BlockchainClient};
pub use config::{Environment, FabricConfig, FabricSettings};
pub use crypto::{DerivationPrefix, DerivedKey, RootSecret};
pub use errors::{WalletError, WalletResult};
pub use escrow::{MemorySecretManager, SecretEscrow, SecretManager, VaultSecretManager};
pub use fabric::WalletFabric;
pub use repository::{BalanceRecord, WalletRecord, WalletRepository};
pub use store::{DocumentStore, FileStore, MemoryStore};
pub use sync::{BalanceSyncEngine, ChainSelector, SyncFailure, SyncMode, SyncReport};
pub use validation::InputValidator;
