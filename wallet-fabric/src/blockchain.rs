/// Core chain types for the wallet fabric
///
/// Addresses are kept in one canonical form (lowercase `0x` hex) so they can be
/// used directly as document ids. Balances keep the node's raw hex next to an
/// exact 256-bit integer; no binary floating point is involved.
use crate::errors::{WalletError, WalletResult};
use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of an account address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// A canonical account address: `0x` followed by 40 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Create an address from its raw 20 bytes.
    pub fn from_bytes(bytes: &[u8]) -> WalletResult<Self> {
        if bytes.len() != ADDRESS_LEN {
            return Err(WalletError::InvalidAddress(format!(
                "Invalid address length: expected {} bytes, got {}",
                ADDRESS_LEN,
                bytes.len()
            )));
        }

        Ok(Address(format!("0x{}", hex::encode(bytes))))
    }

    /// Parse a hex address in any letter case (checksummed or not).
    pub fn parse(address: &str) -> WalletResult<Self> {
        let trimmed = address.trim();
        let hex_part = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| WalletError::InvalidAddress("Address must start with '0x'".into()))?;

        if hex_part.len() != ADDRESS_LEN * 2 {
            // "0x" (2) + 40 hex chars = 42 total
            return Err(WalletError::InvalidAddress(format!(
                "Invalid hex address length: expected 42 characters, got {}",
                trimmed.len()
            )));
        }

        let bytes = hex::decode(hex_part)
            .map_err(|_| WalletError::InvalidAddress("Invalid hex in address".to_string()))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Secret name under which this address's private key is escrowed.
    pub fn key_secret_name(&self) -> String {
        format!("wallet-key-{}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Address {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = WalletError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

/// A balance in the chain's smallest unit.
///
/// The hex form is kept exactly as the node returned it next to the parsed
/// 256-bit value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wei {
    raw_hex: String,
    value: U256,
}

impl Wei {
    /// Number of decimal places of the native unit (18, like ETH).
    pub const DECIMALS: usize = 18;
    const UNIT: u64 = 1_000_000_000_000_000_000;

    /// Parse a `0x`-prefixed hex quantity as returned by `eth_getBalance`.
    pub fn from_hex(raw_hex: &str) -> WalletResult<Self> {
        let digits = raw_hex
            .strip_prefix("0x")
            .or_else(|| raw_hex.strip_prefix("0X"))
            .ok_or_else(|| {
                WalletError::InvalidResponse(format!("Quantity '{}' is missing 0x prefix", raw_hex))
            })?;

        if digits.is_empty() {
            return Err(WalletError::InvalidResponse(
                "Quantity has no hex digits".to_string(),
            ));
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(WalletError::InvalidResponse(format!(
                "Quantity '{}' is not hex",
                raw_hex
            )));
        }

        let value = U256::from_str_radix(digits, 16).map_err(|e| {
            WalletError::InvalidResponse(format!("Quantity '{}' out of range: {}", raw_hex, e))
        })?;

        Ok(Wei {
            raw_hex: raw_hex.to_string(),
            value,
        })
    }

    /// The hex quantity exactly as received.
    pub fn raw_hex(&self) -> &str {
        &self.raw_hex
    }

    /// Exact base-10 integer.
    pub fn to_decimal_string(&self) -> String {
        self.value.to_string()
    }

    /// Scaled by 10^18 in fixed point, trailing zeros trimmed, at least one
    /// fractional digit kept (`1000000000000000000` -> `"1.0"`).
    pub fn to_scaled_string(&self) -> String {
        let unit = U256::from(Self::UNIT);
        let whole = self.value / unit;
        let fractional = format!(
            "{:0>width$}",
            (self.value % unit).to_string(),
            width = Self::DECIMALS
        );

        let trimmed = fractional.trim_end_matches('0');
        if trimmed.is_empty() {
            format!("{}.0", whole)
        } else {
            format!("{}.{}", whole, trimmed)
        }
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} wei", self.value)
    }
}
