//! Secret escrow
//!
//! Persists the root mnemonic and, optionally, every derived private key in a
//! secrets manager. Reads distinguish a secret that does not exist from a
//! secrets manager that cannot answer: only the former ever leads to a new
//! root secret being generated.

pub mod memory;
pub mod vault;

use crate::allocator::RetryPolicy;
use crate::crypto::{DerivedKey, RootSecret, DEFAULT_MNEMONIC_WORDS};
use crate::errors::{with_timeout, WalletError, WalletResult};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

pub use memory::MemorySecretManager;
pub use vault::{VaultKdf, VaultSecretManager};

/// Versioned secret storage.
#[async_trait]
pub trait SecretManager: Send + Sync {
    /// Payload of the newest version. Fails with `SecretNotFound` when the
    /// container or any version is missing.
    async fn access_latest(&self, name: &str) -> WalletResult<Zeroizing<Vec<u8>>>;

    /// Create an empty container. Fails with `AlreadyExists` if present.
    async fn create_container(&self, name: &str) -> WalletResult<()>;

    /// Append a version and return its number (1-based).
    async fn add_version(&self, name: &str, payload: &[u8]) -> WalletResult<u64>;

    async fn ping(&self) -> WalletResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerOutcome {
    Created,
    AlreadyExisted,
    Failed(WalletError),
}

pub struct SecretEscrow {
    manager: Arc<dyn SecretManager>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl SecretEscrow {
    pub fn new(manager: Arc<dyn SecretManager>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            manager,
            policy,
            timeout,
        }
    }

    pub async fn ensure_container(&self, name: &str) -> ContainerOutcome {
        match self
            .retrying("secret container create", || {
                self.manager.create_container(name)
            })
            .await
        {
            Ok(()) => ContainerOutcome::Created,
            Err(WalletError::AlreadyExists(_)) => ContainerOutcome::AlreadyExisted,
            Err(err) => ContainerOutcome::Failed(err),
        }
    }

    /// Ensure the container and add `value` as its newest version.
    pub async fn put_secret(&self, name: &str, value: &[u8]) -> WalletResult<u64> {
        if let ContainerOutcome::Failed(err) = self.ensure_container(name).await {
            return Err(err);
        }
        self.retrying("secret version add", || self.manager.add_version(name, value))
            .await
    }

    pub async fn access_secret(&self, name: &str) -> WalletResult<Zeroizing<Vec<u8>>> {
        self.retrying("secret access", || self.manager.access_latest(name))
            .await
    }

    /// Read the root mnemonic, generating and storing a fresh one only when
    /// the secret does not exist.
    ///
    /// Two callers racing on a missing secret can still both generate.
    pub async fn get_or_create_root_secret(&self, name: &str) -> WalletResult<RootSecret> {
        match self.access_secret(name).await {
            Ok(payload) => return parse_root_secret(name, &payload),
            Err(WalletError::SecretNotFound(_)) => {}
            Err(err) => return Err(err),
        }

        match self.ensure_container(name).await {
            ContainerOutcome::Created => {}
            ContainerOutcome::AlreadyExisted => match self.access_secret(name).await {
                Ok(payload) => return parse_root_secret(name, &payload),
                Err(WalletError::SecretNotFound(_)) => {}
                Err(err) => return Err(err),
            },
            ContainerOutcome::Failed(err) => return Err(err),
        }

        let fresh = RootSecret::generate(DEFAULT_MNEMONIC_WORDS)?;
        let phrase = fresh.phrase().expose_secret().as_bytes();
        let version = self
            .retrying("secret version add", || self.manager.add_version(name, phrase))
            .await?;

        log::warn!(
            "Generated a new root secret '{}' (version {})",
            name,
            version
        );
        Ok(fresh)
    }

    /// Validate and store an imported mnemonic as the newest root version.
    pub async fn store_root_secret(&self, name: &str, phrase: &str) -> WalletResult<RootSecret> {
        let root = RootSecret::parse(phrase)?;
        let version = self
            .put_secret(name, root.phrase().expose_secret().as_bytes())
            .await?;
        log::info!("Stored root secret '{}' (version {})", name, version);
        Ok(root)
    }

    /// Store a private key under `wallet-key-{address}`.
    pub async fn escrow_private_key(&self, key: &DerivedKey) -> WalletResult<()> {
        let name = key.address.key_secret_name();
        let encoded = key.private_key_hex();
        self.put_secret(&name, encoded.as_bytes()).await?;
        Ok(())
    }

    pub async fn ping(&self) -> WalletResult<()> {
        with_timeout(self.timeout, "secrets ping", self.manager.ping()).await
    }

    async fn retrying<T, F, Fut>(&self, operation: &str, mut call: F) -> WalletResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = WalletResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match with_timeout(self.timeout, operation, call()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    log::debug!(
                        "{} attempt {}/{} failed: {}",
                        operation,
                        attempt,
                        self.policy.max_attempts,
                        err
                    );
                    tokio::time::sleep(self.policy.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(WalletError::EscrowUnavailable(format!(
                        "{} failed after {} attempts: {}",
                        operation, attempt, err
                    )))
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn parse_root_secret(name: &str, payload: &[u8]) -> WalletResult<RootSecret> {
    let phrase = std::str::from_utf8(payload).map_err(|_| {
        WalletError::CryptoError(format!("Root secret '{}' is not valid UTF-8", name))
    })?;
    RootSecret::parse(phrase).map_err(|e| {
        WalletError::CryptoError(format!("Root secret '{}' is unusable: {}", name, e))
    })
}
