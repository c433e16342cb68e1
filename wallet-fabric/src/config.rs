use crate::crypto::{DerivationPrefix, DEFAULT_DERIVATION_PREFIX};
use crate::errors::{WalletError, WalletResult};
use crate::validation::InputValidator;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const KEY_ENVIRONMENT: &str = "FABRIC_ENV";
pub const KEY_CHAIN: &str = "CHAIN";
pub const KEY_DERIVATION_PREFIX: &str = "DERIVATION_PREFIX";
pub const KEY_ROOT_MNEMONIC_SECRET: &str = "ROOT_MNEMONIC_SECRET";
pub const KEY_STORE_PRIVKEYS: &str = "STORE_PRIVKEYS";
pub const KEY_WALLET_LABEL: &str = "WALLET_LABEL";
pub const KEY_LINEAGE_ID: &str = "LINEAGE_ID";
pub const KEY_CHAIN_RPC_URL: &str = "CHAIN_RPC_URL";
pub const KEY_CHAIN_RPC_URL_SECRET: &str = "CHAIN_RPC_URL_SECRET";
pub const KEY_RPC_TIMEOUT: &str = "RPC_TIMEOUT_SECS";
pub const KEY_STORE_TIMEOUT: &str = "STORE_TIMEOUT_SECS";
pub const KEY_SECRETS_TIMEOUT: &str = "SECRETS_TIMEOUT_SECS";
pub const KEY_ALLOCATOR_MAX_ATTEMPTS: &str = "ALLOCATOR_MAX_ATTEMPTS";
pub const KEY_SYNC_CONCURRENCY: &str = "SYNC_CONCURRENCY";
pub const KEY_SYNC_DEFAULT_LIMIT: &str = "SYNC_DEFAULT_LIMIT";
pub const KEY_BIND_ADDR: &str = "FABRIC_BIND_ADDR";
pub const KEY_VAULT_DIR: &str = "FABRIC_VAULT_DIR";
pub const KEY_VAULT_PASSPHRASE: &str = "FABRIC_VAULT_PASSPHRASE";
pub const KEY_STORE_DIR: &str = "FABRIC_STORE_DIR";

/// Variables read from the process environment.
const ENV_KEYS: [&str; 18] = [
    KEY_CHAIN,
    KEY_DERIVATION_PREFIX,
    KEY_ROOT_MNEMONIC_SECRET,
    KEY_STORE_PRIVKEYS,
    KEY_WALLET_LABEL,
    KEY_LINEAGE_ID,
    KEY_CHAIN_RPC_URL,
    KEY_CHAIN_RPC_URL_SECRET,
    KEY_RPC_TIMEOUT,
    KEY_STORE_TIMEOUT,
    KEY_SECRETS_TIMEOUT,
    KEY_ALLOCATOR_MAX_ATTEMPTS,
    KEY_SYNC_CONCURRENCY,
    KEY_SYNC_DEFAULT_LIMIT,
    KEY_BIND_ADDR,
    KEY_VAULT_DIR,
    KEY_VAULT_PASSPHRASE,
    KEY_STORE_DIR,
];

/// Deployment environment; selects the default settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" | "testing" => Environment::Test,
            _ => Environment::Development,
        }
    }
}

/// Raw string settings: environment defaults with overrides applied.
#[derive(Debug, Clone)]
pub struct FabricSettings {
    environment: Environment,
    config_map: HashMap<String, String>,
}

impl FabricSettings {
    pub fn new(environment: Environment) -> Self {
        let mut settings = FabricSettings {
            environment,
            config_map: HashMap::new(),
        };
        settings.load_defaults();
        settings
    }

    /// Load settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through `lookup`, which stands in for the environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = lookup(KEY_ENVIRONMENT)
            .map(|value| Environment::parse(&value))
            .unwrap_or(Environment::Development);

        let mut settings = Self::new(environment);
        for key in ENV_KEYS {
            let Some(value) = lookup(key) else {
                continue;
            };

            if value.trim().is_empty() {
                log::warn!("Environment variable {} is empty", key);
                continue;
            }

            // Basic security check - no newlines or control characters
            if value.chars().any(|c| c.is_control()) {
                log::warn!(
                    "Environment variable {} contains control characters, ignoring",
                    key
                );
                continue;
            }

            settings.config_map.insert(key.to_string(), value);
            log::debug!("Loaded configuration {} from environment", key);
        }
        settings
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn get(&self, key: &str) -> Option<&String> {
        self.config_map.get(key)
    }

    pub fn get_or_default(&self, key: &str, default: &str) -> String {
        self.config_map
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Set a configuration value (for testing purposes)
    pub fn set(&mut self, key: &str, value: &str) {
        self.config_map.insert(key.to_string(), value.to_string());
    }

    pub fn get_bool_with_default(&self, key: &str, default: bool) -> WalletResult<bool> {
        match self.config_map.get(key) {
            Some(value) => parse_bool_flag(value, key),
            None => Ok(default),
        }
    }

    pub fn get_u32_with_default(&self, key: &str, default: u32) -> WalletResult<u32> {
        match self.config_map.get(key) {
            Some(value) => parse_u32_value(value, key),
            None => Ok(default),
        }
    }

    fn load_defaults(&mut self) {
        let mut insert = |key: &str, value: &str| {
            self.config_map.insert(key.to_string(), value.to_string());
        };

        insert(KEY_CHAIN, "eth");
        insert(KEY_DERIVATION_PREFIX, DEFAULT_DERIVATION_PREFIX);
        insert(KEY_ROOT_MNEMONIC_SECRET, "wallet-root-mnemonic");
        insert(KEY_STORE_PRIVKEYS, "true");
        insert(KEY_WALLET_LABEL, "fabric");
        insert(KEY_LINEAGE_ID, "default");
        insert(KEY_CHAIN_RPC_URL_SECRET, "chain-rpc-url");
        insert(KEY_ALLOCATOR_MAX_ATTEMPTS, "5");
        insert(KEY_SYNC_CONCURRENCY, "8");
        insert(KEY_SYNC_DEFAULT_LIMIT, "200");

        match self.environment {
            Environment::Production | Environment::Development => {
                insert(KEY_RPC_TIMEOUT, "20");
                insert(KEY_STORE_TIMEOUT, "10");
                insert(KEY_SECRETS_TIMEOUT, "10");
                insert(KEY_BIND_ADDR, "0.0.0.0:8080");
            }
            Environment::Test => {
                insert(KEY_RPC_TIMEOUT, "5");
                insert(KEY_STORE_TIMEOUT, "5");
                insert(KEY_SECRETS_TIMEOUT, "5");
                insert(KEY_BIND_ADDR, "127.0.0.1:0");
            }
        }
    }
}

/// Typed, validated service configuration.
#[derive(Debug, Clone)]
pub struct FabricConfig {
    pub environment: Environment,
    pub chain: String,
    pub derivation_prefix: DerivationPrefix,
    pub root_secret_name: String,
    pub store_private_keys: bool,
    pub wallet_label: String,
    pub lineage_id: String,
    pub rpc_url: Option<String>,
    pub rpc_url_secret: String,
    pub rpc_timeout: Duration,
    pub store_timeout: Duration,
    pub secrets_timeout: Duration,
    pub allocator_max_attempts: u32,
    pub sync_concurrency: usize,
    pub sync_default_limit: usize,
    pub bind_addr: SocketAddr,
    pub vault_dir: Option<PathBuf>,
    pub vault_passphrase: Option<SecretString>,
    pub store_dir: Option<PathBuf>,
}

impl FabricConfig {
    pub fn from_env() -> WalletResult<Self> {
        Self::from_settings(&FabricSettings::from_env())
    }

    pub fn from_settings(settings: &FabricSettings) -> WalletResult<Self> {
        let validator = InputValidator::new()?;
        let required = |key: &str| {
            settings
                .get(key)
                .cloned()
                .ok_or_else(|| config_error(key, "is required"))
        };

        let chain = required(KEY_CHAIN)?;
        validator
            .validate_chain_id(&chain)
            .map_err(|e| config_error(KEY_CHAIN, &e.to_string()))?;

        let derivation_prefix = DerivationPrefix::parse(&required(KEY_DERIVATION_PREFIX)?)
            .map_err(|e| config_error(KEY_DERIVATION_PREFIX, &e.to_string()))?;

        let root_secret_name = required(KEY_ROOT_MNEMONIC_SECRET)?;
        let rpc_url_secret = required(KEY_CHAIN_RPC_URL_SECRET)?;
        for (key, name) in [
            (KEY_ROOT_MNEMONIC_SECRET, &root_secret_name),
            (KEY_CHAIN_RPC_URL_SECRET, &rpc_url_secret),
        ] {
            validator
                .validate_secret_name(name)
                .map_err(|e| config_error(key, &e.to_string()))?;
        }

        let wallet_label = required(KEY_WALLET_LABEL)?;
        validator
            .validate_label(&wallet_label)
            .map_err(|e| config_error(KEY_WALLET_LABEL, &e.to_string()))?;

        let lineage_id = required(KEY_LINEAGE_ID)?;
        validator
            .validate_secret_name(&lineage_id)
            .map_err(|e| config_error(KEY_LINEAGE_ID, &e.to_string()))?;

        let bind_addr = required(KEY_BIND_ADDR)?
            .parse::<SocketAddr>()
            .map_err(|e| config_error(KEY_BIND_ADDR, &e.to_string()))?;

        let vault_dir = settings.get(KEY_VAULT_DIR).map(PathBuf::from);
        let vault_passphrase = settings
            .get(KEY_VAULT_PASSPHRASE)
            .map(|value| SecretString::from(value.clone()));
        if vault_dir.is_some() != vault_passphrase.is_some() {
            return Err(config_error(
                KEY_VAULT_DIR,
                "must be set together with FABRIC_VAULT_PASSPHRASE",
            ));
        }
        if settings.environment() == Environment::Production && vault_dir.is_none() {
            return Err(config_error(
                KEY_VAULT_DIR,
                "is required in production; the in-memory secret manager loses the root secret on restart",
            ));
        }

        let store_dir = settings.get(KEY_STORE_DIR).map(PathBuf::from);
        if settings.environment() == Environment::Production && store_dir.is_none() {
            return Err(config_error(
                KEY_STORE_DIR,
                "is required in production; the in-memory document store loses the index counter on restart",
            ));
        }

        Ok(Self {
            environment: settings.environment(),
            chain,
            derivation_prefix,
            root_secret_name,
            store_private_keys: settings.get_bool_with_default(KEY_STORE_PRIVKEYS, true)?,
            wallet_label,
            lineage_id,
            rpc_url: settings.get(KEY_CHAIN_RPC_URL).cloned(),
            rpc_url_secret,
            rpc_timeout: seconds(settings, KEY_RPC_TIMEOUT, 20)?,
            store_timeout: seconds(settings, KEY_STORE_TIMEOUT, 10)?,
            secrets_timeout: seconds(settings, KEY_SECRETS_TIMEOUT, 10)?,
            allocator_max_attempts: positive(settings, KEY_ALLOCATOR_MAX_ATTEMPTS, 5)?,
            sync_concurrency: positive(settings, KEY_SYNC_CONCURRENCY, 8)? as usize,
            sync_default_limit: positive(settings, KEY_SYNC_DEFAULT_LIMIT, 200)? as usize,
            bind_addr,
            vault_dir,
            vault_passphrase,
            store_dir,
        })
    }

    /// Defaults for the test environment, ignoring the process environment.
    pub fn for_tests() -> WalletResult<Self> {
        Self::from_settings(&FabricSettings::new(Environment::Test))
    }
}

fn seconds(settings: &FabricSettings, key: &str, default: u32) -> WalletResult<Duration> {
    Ok(Duration::from_secs(u64::from(positive(settings, key, default)?)))
}

fn positive(settings: &FabricSettings, key: &str, default: u32) -> WalletResult<u32> {
    let value = settings
        .get_u32_with_default(key, default)
        .map_err(|e| config_error(key, &e.to_string()))?;
    if value == 0 {
        return Err(config_error(key, "must be greater than zero"));
    }
    Ok(value)
}

fn config_error(key: &str, reason: &str) -> WalletError {
    WalletError::ConfigError(format!("{} {}", key, reason))
}

fn parse_bool_flag(value: &str, key: &str) -> WalletResult<bool> {
    let normalized = value.trim().to_ascii_lowercase();
    if normalized.is_empty() {
        return Err(WalletError::ValidationError(format!(
            "Configuration key '{}' cannot be empty",
            key
        )));
    }

    match normalized.as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(WalletError::ValidationError(format!(
            "Invalid boolean value '{}' for key '{}'",
            value, key
        ))),
    }
}

fn parse_u32_value(value: &str, key: &str) -> WalletResult<u32> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WalletError::ValidationError(format!(
            "Configuration key '{}' cannot be empty",
            key
        )));
    }

    trimmed.parse::<u32>().map_err(|_| {
        WalletError::ValidationError(format!(
            "Invalid numeric value '{}' for key '{}'",
            value, key
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_cover_every_setting() {
        let config = FabricConfig::from_settings(&FabricSettings::new(Environment::Development))
            .unwrap();
        assert_eq!(config.chain, "eth");
        assert_eq!(config.derivation_prefix.as_str(), "m/44'/60'/0'/0");
        assert_eq!(config.root_secret_name, "wallet-root-mnemonic");
        assert!(config.store_private_keys);
        assert_eq!(config.wallet_label, "fabric");
        assert_eq!(config.lineage_id, "default");
        assert_eq!(config.rpc_url, None);
        assert_eq!(config.rpc_url_secret, "chain-rpc-url");
        assert_eq!(config.rpc_timeout, Duration::from_secs(20));
        assert_eq!(config.allocator_max_attempts, 5);
        assert_eq!(config.sync_concurrency, 8);
        assert_eq!(config.sync_default_limit, 200);
        assert_eq!(config.bind_addr.port(), 8080);
    }

    #[test]
    fn environment_overrides_are_applied() {
        let settings = FabricSettings::from_lookup(lookup(&[
            (KEY_ENVIRONMENT, "test"),
            (KEY_CHAIN, "polygon"),
            (KEY_STORE_PRIVKEYS, "off"),
            (KEY_CHAIN_RPC_URL, "http://localhost:8545"),
            (KEY_SYNC_CONCURRENCY, "2"),
        ]));
        assert_eq!(settings.environment(), Environment::Test);

        let config = FabricConfig::from_settings(&settings).unwrap();
        assert_eq!(config.chain, "polygon");
        assert!(!config.store_private_keys);
        assert_eq!(config.rpc_url.as_deref(), Some("http://localhost:8545"));
        assert_eq!(config.sync_concurrency, 2);
    }

    #[test]
    fn empty_and_control_values_are_ignored() {
        let settings = FabricSettings::from_lookup(lookup(&[
            (KEY_CHAIN, "   "),
            (KEY_WALLET_LABEL, "evil\nlabel"),
        ]));
        assert_eq!(settings.get(KEY_CHAIN).map(String::as_str), Some("eth"));
        assert_eq!(
            settings.get(KEY_WALLET_LABEL).map(String::as_str),
            Some("fabric")
        );
    }

    #[test]
    fn malformed_values_are_config_errors() {
        for (key, value) in [
            (KEY_DERIVATION_PREFIX, "44'/60'"),
            (KEY_STORE_PRIVKEYS, "maybe"),
            (KEY_SYNC_CONCURRENCY, "0"),
            (KEY_RPC_TIMEOUT, "soon"),
            (KEY_BIND_ADDR, "nowhere"),
        ] {
            let mut settings = FabricSettings::new(Environment::Test);
            settings.set(key, value);
            assert!(
                FabricConfig::from_settings(&settings).is_err(),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn production_requires_a_vault() {
        let settings = FabricSettings::new(Environment::Production);
        assert!(matches!(
            FabricConfig::from_settings(&settings),
            Err(WalletError::ConfigError(_))
        ));

        let mut settings = FabricSettings::new(Environment::Production);
        settings.set(KEY_VAULT_DIR, "/var/lib/fabric/vault");
        settings.set(KEY_VAULT_PASSPHRASE, "passphrase");
        settings.set(KEY_STORE_DIR, "/var/lib/fabric/store");
        assert!(FabricConfig::from_settings(&settings).is_ok());
    }

    #[test]
    fn production_requires_a_durable_store() {
        let mut settings = FabricSettings::new(Environment::Production);
        settings.set(KEY_VAULT_DIR, "/var/lib/fabric/vault");
        settings.set(KEY_VAULT_PASSPHRASE, "passphrase");
        match FabricConfig::from_settings(&settings) {
            Err(WalletError::ConfigError(msg)) => assert!(msg.contains(KEY_STORE_DIR)),
            other => panic!("expected a store config error, got {:?}", other),
        }

        let settings = FabricSettings::from_lookup(lookup(&[(KEY_STORE_DIR, "/tmp/fabric")]));
        let config = FabricConfig::from_settings(&settings).unwrap();
        assert_eq!(config.store_dir, Some(PathBuf::from("/tmp/fabric")));
    }

    #[test]
    fn bool_flags_accept_common_spellings() {
        for truthy in ["true", "1", "YES", "on"] {
            assert!(parse_bool_flag(truthy, "K").unwrap());
        }
        for falsy in ["false", "0", "no", "OFF"] {
            assert!(!parse_bool_flag(falsy, "K").unwrap());
        }
    }
}
