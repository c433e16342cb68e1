use super::SecretManager;
use crate::errors::{WalletError, WalletResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use zeroize::Zeroizing;

#[derive(Default)]
struct ManagerState {
    containers: HashMap<String, Vec<Zeroizing<Vec<u8>>>>,
    offline: bool,
    failures_remaining: u32,
}

/// Process-local secret manager for development and tests.
#[derive(Default)]
pub struct MemorySecretManager {
    state: Mutex<ManagerState>,
}

impl MemorySecretManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every call as unavailable until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Fail the next `count` calls as unavailable.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().failures_remaining = count;
    }

    pub fn version_count(&self, name: &str) -> usize {
        self.state
            .lock()
            .containers
            .get(name)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn check_available(state: &mut ManagerState) -> WalletResult<()> {
        if state.offline {
            return Err(WalletError::EscrowUnavailable(
                "Secret manager offline".to_string(),
            ));
        }
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(WalletError::EscrowUnavailable(
                "Secret manager temporarily unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl SecretManager for MemorySecretManager {
    async fn access_latest(&self, name: &str) -> WalletResult<Zeroizing<Vec<u8>>> {
        let mut state = self.state.lock();
        Self::check_available(&mut state)?;

        state
            .containers
            .get(name)
            .and_then(|versions| versions.last())
            .cloned()
            .ok_or_else(|| WalletError::SecretNotFound(name.to_string()))
    }

    async fn create_container(&self, name: &str) -> WalletResult<()> {
        let mut state = self.state.lock();
        Self::check_available(&mut state)?;

        if state.containers.contains_key(name) {
            return Err(WalletError::AlreadyExists(name.to_string()));
        }
        state.containers.insert(name.to_string(), Vec::new());
        Ok(())
    }

    async fn add_version(&self, name: &str, payload: &[u8]) -> WalletResult<u64> {
        let mut state = self.state.lock();
        Self::check_available(&mut state)?;

        let versions = state
            .containers
            .get_mut(name)
            .ok_or_else(|| WalletError::SecretNotFound(name.to_string()))?;
        versions.push(Zeroizing::new(payload.to_vec()));
        Ok(versions.len() as u64)
    }

    async fn ping(&self) -> WalletResult<()> {
        let state = self.state.lock();
        if state.offline {
            return Err(WalletError::EscrowUnavailable(
                "Secret manager offline".to_string(),
            ));
        }
        Ok(())
    }
}
