use crate::errors::{WalletError, WalletResult};
use regex::Regex;

/// Upper bound of `count` for address previews.
pub const MAX_PREVIEW_COUNT: u64 = 50;
/// Upper bound of `count` for a single mint.
pub const MAX_MINT_COUNT: u64 = 1_000;
/// Upper bound of `count` for random wallet generation.
pub const MAX_GENERATE_COUNT: u64 = 10_000;
/// Upper bound of HD shadow wallets per random base wallet.
pub const MAX_SHADOWS_PER_WALLET: u64 = 20;
/// Upper bound of a sync batch.
pub const MAX_SYNC_LIMIT: u64 = 10_000;

/// Input validation utilities for the wallet fabric
pub struct InputValidator {
    // Compiled regex patterns for performance
    label_pattern: Regex,
    chain_pattern: Regex,
    secret_name_pattern: Regex,

    // Blacklisted patterns for security
    malicious_patterns: Vec<Regex>,
}

impl InputValidator {
    pub fn new() -> WalletResult<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| WalletError::ConfigError(format!("Invalid regex {}: {}", pattern, e)))
        };

        // Common malicious patterns to block
        let malicious_patterns = [
            r"<script",
            r"javascript:",
            r"data:text/html",
            r"vbscript:",
            r"onload=",
            r"onerror=",
        ]
        .into_iter()
        .map(&compile)
        .collect::<WalletResult<Vec<_>>>()?;

        Ok(InputValidator {
            label_pattern: compile(r"^[a-zA-Z0-9 \-_.]+$")?,
            chain_pattern: compile(r"^[a-z0-9][a-z0-9\-]{0,31}$")?,
            secret_name_pattern: compile(r"^[A-Za-z0-9_-]{1,255}$")?,
            malicious_patterns,
        })
    }

    /// Validate wallet label
    pub fn validate_label(&self, label: &str) -> WalletResult<()> {
        self.check_basic_security(label)?;

        if label.trim().is_empty() {
            return Err(WalletError::ValidationError(
                "Label cannot be empty".to_string(),
            ));
        }

        if label.len() > 64 {
            return Err(WalletError::ValidationError("Label too long".to_string()));
        }

        if !self.label_pattern.is_match(label) {
            return Err(WalletError::ValidationError(
                "Label contains invalid characters".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate a chain identifier such as `eth` or `polygon-amoy`
    pub fn validate_chain_id(&self, chain: &str) -> WalletResult<()> {
        self.check_basic_security(chain)?;

        if !self.chain_pattern.is_match(chain) {
            return Err(WalletError::ValidationError(format!(
                "Invalid chain identifier '{}'",
                chain
            )));
        }

        Ok(())
    }

    /// Validate a secret or lineage name
    pub fn validate_secret_name(&self, name: &str) -> WalletResult<()> {
        if !self.secret_name_pattern.is_match(name) {
            return Err(WalletError::ValidationError(format!(
                "Invalid name '{}': use 1-255 letters, digits, '-' or '_'",
                name
            )));
        }

        Ok(())
    }

    /// Validate that `value` lies in `1..=max`
    pub fn validate_count(&self, field: &str, value: u64, max: u64) -> WalletResult<u64> {
        if value == 0 || value > max {
            return Err(WalletError::ValidationError(format!(
                "{} must be between 1 and {}, got {}",
                field, max, value
            )));
        }

        Ok(value)
    }

    /// Screen a mnemonic before it reaches the BIP-39 parser
    pub fn validate_mnemonic_input(&self, phrase: &str) -> WalletResult<()> {
        self.check_basic_security(phrase)?;

        if phrase.trim().is_empty() {
            return Err(WalletError::InvalidMnemonic(
                "Mnemonic cannot be empty".to_string(),
            ));
        }

        if phrase.chars().any(|c| c.is_control() && !c.is_whitespace()) {
            return Err(WalletError::InvalidMnemonic(
                "Mnemonic contains control characters".to_string(),
            ));
        }

        Ok(())
    }

    /// Check for basic security issues in any input
    fn check_basic_security(&self, input: &str) -> WalletResult<()> {
        if input.len() > 1000 {
            return Err(WalletError::ValidationError("Input too long".to_string()));
        }

        let lowered = input.to_lowercase();
        for pattern in &self.malicious_patterns {
            if pattern.is_match(&lowered) {
                return Err(WalletError::ValidationError(
                    "Input contains potentially malicious content".to_string(),
                ));
            }
        }

        Ok(())
    }
}
