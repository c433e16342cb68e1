use crate::blockchain::Address;
use crate::sync::{ChainSelector, SyncFailure, SyncMode};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitRequest {
    #[serde(default)]
    pub mnemonic: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResponse {
    pub ok: bool,
    pub next_index: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    #[serde(default)]
    pub start_index: u64,
    #[serde(default = "default_preview_count")]
    pub count: u64,
}

impl Default for PreviewRequest {
    fn default() -> Self {
        Self {
            start_index: 0,
            count: default_preview_count(),
        }
    }
}

/// One derived address, with the index and path it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedAddress {
    pub index: u64,
    pub address: Address,
    pub derivation_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub ok: bool,
    pub addresses: Vec<DerivedAddress>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintRequest {
    #[serde(default = "default_mint_count")]
    pub count: u64,
    #[serde(default)]
    pub label: Option<String>,
}

impl Default for MintRequest {
    fn default() -> Self {
        Self {
            count: default_mint_count(),
            label: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintResponse {
    pub ok: bool,
    pub start: u64,
    pub count: u64,
    pub minted: Vec<DerivedAddress>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default = "default_generate_count")]
    pub count: u64,
    #[serde(default)]
    pub label: Option<String>,
    /// HD wallets minted next to each random base wallet.
    #[serde(default)]
    pub shadows: u64,
}

impl Default for GenerateRequest {
    fn default() -> Self {
        Self {
            count: default_generate_count(),
            label: None,
            shadows: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub ok: bool,
    /// Random base wallets.
    pub created: usize,
    /// HD shadow wallets across all bundles.
    pub shadows: usize,
    /// First few generated addresses.
    pub sample: Vec<Address>,
}

/// `chain` absent selects the configured chain; `null` selects every chain.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(default)]
    pub run_mode: SyncMode,
    #[serde(default, deserialize_with = "chain_selector")]
    pub chain: ChainSelector,
    #[serde(default)]
    pub limit: Option<u64>,
}

fn chain_selector<'de, D>(deserializer: D) -> Result<ChainSelector, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<String>::deserialize(deserializer)? {
        Some(chain) => ChainSelector::Only(chain),
        None => ChainSelector::All,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub accepted: bool,
    pub run_id: Uuid,
    pub run_mode: SyncMode,
    /// `None` when every chain was synced.
    pub chain: Option<String>,
    pub processed: usize,
    pub failures: Vec<SyncFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub uptime_sec: u64,
    pub store_ok: bool,
    pub secrets_ok: bool,
    pub chain_ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

fn default_preview_count() -> u64 {
    5
}

fn default_mint_count() -> u64 {
    1
}

fn default_generate_count() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_apply_to_empty_bodies() {
        let preview: PreviewRequest = serde_json::from_str("{}").unwrap();
        assert_eq!((preview.start_index, preview.count), (0, 5));

        let mint: MintRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(mint.count, 1);
        assert!(mint.label.is_none());

        let generate: GenerateRequest = serde_json::from_str(r#"{"label":"ops"}"#).unwrap();
        assert_eq!(generate.count, 10);
        assert_eq!(generate.label.as_deref(), Some("ops"));
        assert_eq!(generate.shadows, 0);
    }

    #[test]
    fn sync_chain_distinguishes_absent_from_null() {
        let absent: SyncRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.chain, ChainSelector::Configured);
        assert_eq!(absent.run_mode, SyncMode::Incremental);

        let null: SyncRequest = serde_json::from_str(r#"{"chain":null}"#).unwrap();
        assert_eq!(null.chain, ChainSelector::All);

        let named: SyncRequest =
            serde_json::from_str(r#"{"chain":"polygon","runMode":"full"}"#).unwrap();
        assert_eq!(named.chain, ChainSelector::Only("polygon".into()));
        assert_eq!(named.run_mode, SyncMode::Full);
    }

    #[test]
    fn responses_use_camel_case() {
        let health = HealthResponse {
            ok: true,
            service: "wallet-fabric".into(),
            uptime_sec: 3,
            store_ok: true,
            secrets_ok: true,
            chain_ok: false,
        };
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["uptimeSec"], 3);
        assert_eq!(json["chainOk"], false);

        let init = serde_json::to_value(InitResponse {
            ok: true,
            next_index: 8,
        })
        .unwrap();
        assert_eq!(init["nextIndex"], 8);
    }
}
