use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletError {
    // Key material errors
    InvalidMnemonic(String),
    InvalidPath(String),
    CryptoError(String),

    // Validation errors
    ValidationError(String),
    InvalidAddress(String),
    ConfigError(String),

    // Store errors
    WriteConflict(String),
    AllocationConflict(String),
    PersistenceFailure(String),
    StorageError(String),

    // Escrow errors
    SecretNotFound(String),
    AlreadyExists(String),
    EscrowUnavailable(String),

    // Network errors
    NetworkError(String),
    InvalidResponse(String),
    Timeout(String),

    // Application errors
    NotInitialized,
    Unknown(String),
}

impl WalletError {
    /// Errors caused by caller input. These are raised before any side effect.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            WalletError::InvalidMnemonic(_)
                | WalletError::InvalidPath(_)
                | WalletError::ValidationError(_)
                | WalletError::InvalidAddress(_)
        )
    }

    /// Errors worth retrying against the same dependency.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WalletError::WriteConflict(_)
                | WalletError::EscrowUnavailable(_)
                | WalletError::NetworkError(_)
                | WalletError::Timeout(_)
        )
    }
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::InvalidMnemonic(msg) => write!(f, "Invalid mnemonic: {}", msg),
            WalletError::InvalidPath(msg) => write!(f, "Invalid derivation path: {}", msg),
            WalletError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),

            WalletError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            WalletError::InvalidAddress(msg) => write!(f, "Invalid address: {}", msg),
            WalletError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),

            WalletError::WriteConflict(msg) => write!(f, "Write conflict: {}", msg),
            WalletError::AllocationConflict(msg) => write!(f, "Allocation conflict: {}", msg),
            WalletError::PersistenceFailure(msg) => write!(f, "Persistence failure: {}", msg),
            WalletError::StorageError(msg) => write!(f, "Storage error: {}", msg),

            WalletError::SecretNotFound(msg) => write!(f, "Secret not found: {}", msg),
            WalletError::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            WalletError::EscrowUnavailable(msg) => write!(f, "Secret store unavailable: {}", msg),

            WalletError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            WalletError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            WalletError::Timeout(msg) => write!(f, "Timed out: {}", msg),

            WalletError::NotInitialized => write!(f, "Wallet fabric not initialized"),
            WalletError::Unknown(msg) => write!(f, "Unknown error: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

pub type WalletResult<T> = Result<T, WalletError>;

// Helper macro for easy error creation
#[macro_export]
macro_rules! wallet_error {
    ($variant:ident, $msg:expr) => {
        $crate::errors::WalletError::$variant($msg.to_string())
    };
    ($variant:ident) => {
        $crate::errors::WalletError::$variant
    };
}

/// Run `fut` with a deadline. An elapsed deadline becomes [`WalletError::Timeout`].
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, fut: F) -> WalletResult<T>
where
    F: Future<Output = WalletResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(WalletError::Timeout(format!(
            "{} exceeded {} ms",
            operation,
            limit.as_millis()
        ))),
    }
}

// Conversion helpers
impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::AlreadyExists => WalletError::AlreadyExists(error.to_string()),
            _ => WalletError::StorageError(error.to_string()),
        }
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        WalletError::ValidationError(format!("JSON error: {}", error))
    }
}
