/// Key derivation engine for EVM-compatible wallets
///
/// Deterministic keys follow BIP-39 (mnemonic → seed, empty passphrase) and
/// BIP-32/44 over secp256k1. Addresses are the last 20 bytes of the Keccak-256
/// hash of the uncompressed public key, rendered in canonical lowercase.
use crate::blockchain::Address;
use crate::errors::{WalletError, WalletResult};
use bip32::{ChildNumber, DerivationPath, XPrv};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::SecretKey;
use secrecy::{ExposeSecret, SecretString};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use zeroize::Zeroizing;

/// Default BIP-44 prefix for Ethereum external addresses.
pub const DEFAULT_DERIVATION_PREFIX: &str = "m/44'/60'/0'/0";
/// Word count used when minting a fresh root secret.
pub const DEFAULT_MNEMONIC_WORDS: u32 = 12;

const PRIVATE_KEY_LEN: usize = 32;

/// A validated BIP-39 mnemonic together with its 64-byte seed.
pub struct RootSecret {
    phrase: SecretString,
    seed: Zeroizing<[u8; 64]>,
}

impl RootSecret {
    /// Parse and checksum-validate an English mnemonic phrase.
    pub fn parse(phrase: &str) -> WalletResult<Self> {
        use bip39::{Language, Mnemonic};

        let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, &normalized)
            .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;

        Ok(Self {
            seed: Zeroizing::new(mnemonic.to_seed("")),
            phrase: SecretString::from(normalized),
        })
    }

    /// Generate a fresh mnemonic from OS entropy.
    pub fn generate(word_count: u32) -> WalletResult<Self> {
        let phrase = Zeroizing::new(generate_bip39_mnemonic(word_count)?);
        Self::parse(&phrase)
    }

    pub fn phrase(&self) -> &SecretString {
        &self.phrase
    }

    pub fn word_count(&self) -> usize {
        self.phrase.expose_secret().split(' ').count()
    }

    fn seed(&self) -> &[u8] {
        self.seed.as_ref()
    }
}

impl fmt::Debug for RootSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootSecret")
            .field("words", &self.word_count())
            .field("phrase", &"<redacted>")
            .finish()
    }
}

/// An address together with its private key.
#[derive(Clone)]
pub struct DerivedKey {
    pub address: Address,
    /// Present iff the key was derived deterministically.
    pub derivation_path: Option<String>,
    private_key: Zeroizing<[u8; PRIVATE_KEY_LEN]>,
}

impl DerivedKey {
    fn from_secret_bytes(
        bytes: [u8; PRIVATE_KEY_LEN],
        derivation_path: Option<String>,
    ) -> WalletResult<Self> {
        let private_key = Zeroizing::new(bytes);
        let address = address_from_private_key(private_key.as_ref())?;
        Ok(Self {
            address,
            derivation_path,
            private_key,
        })
    }

    pub fn private_key(&self) -> &[u8; PRIVATE_KEY_LEN] {
        &self.private_key
    }

    /// `0x`-prefixed lowercase hex of the private key.
    pub fn private_key_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("0x{}", hex::encode(self.private_key.as_ref())))
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedKey")
            .field("address", &self.address)
            .field("derivation_path", &self.derivation_path)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A validated path prefix; child paths are `prefix/index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPrefix {
    text: String,
    path: DerivationPath,
}

impl DerivationPrefix {
    pub fn parse(prefix: &str) -> WalletResult<Self> {
        let text = prefix.trim().trim_end_matches('/').to_string();
        let path = parse_path(&text)?;
        Ok(Self { text, path })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Full path string for a child index.
    pub fn path_for(&self, index: u64) -> WalletResult<String> {
        child_number(index)?;
        Ok(format!("{}/{}", self.text, index))
    }
}

/// Derive the key at an arbitrary path. Pure: same inputs, same output.
pub fn derive(root: &RootSecret, path: &str) -> WalletResult<DerivedKey> {
    let derivation_path = parse_path(path)?;
    let xprv = XPrv::derive_from_path(root.seed(), &derivation_path)
        .map_err(|e| WalletError::CryptoError(format!("Child derivation failed: {}", e)))?;

    let key_bytes: [u8; PRIVATE_KEY_LEN] = xprv.private_key().to_bytes().into();
    DerivedKey::from_secret_bytes(key_bytes, Some(path.trim().to_string()))
}

/// Derive `prefix/index` for every index in `indices`.
///
/// The prefix is walked once and each child is derived from it, which gives the
/// same keys as calling [`derive`] per index.
pub fn derive_range(
    root: &RootSecret,
    prefix: &DerivationPrefix,
    indices: Range<u64>,
) -> WalletResult<Vec<(u64, DerivedKey)>> {
    let base = XPrv::derive_from_path(root.seed(), &prefix.path)
        .map_err(|e| WalletError::CryptoError(format!("Base derivation failed: {}", e)))?;

    let mut keys = Vec::with_capacity(indices.end.saturating_sub(indices.start) as usize);
    for index in indices {
        let child = base
            .derive_child(child_number(index)?)
            .map_err(|e| WalletError::CryptoError(format!("Child derivation failed: {}", e)))?;
        let key_bytes: [u8; PRIVATE_KEY_LEN] = child.private_key().to_bytes().into();
        let path = format!("{}/{}", prefix.as_str(), index);
        keys.push((index, DerivedKey::from_secret_bytes(key_bytes, Some(path))?));
    }

    Ok(keys)
}

/// Generate an independent key pair from the OS CSPRNG.
pub fn create_random() -> WalletResult<DerivedKey> {
    use rand::rngs::OsRng;

    let secret = SecretKey::random(&mut OsRng);
    let key_bytes: [u8; PRIVATE_KEY_LEN] = secret.to_bytes().into();
    DerivedKey::from_secret_bytes(key_bytes, None)
}

/// Check that a phrase is a valid English BIP-39 mnemonic.
pub fn validate_mnemonic(phrase: &str) -> WalletResult<()> {
    RootSecret::parse(phrase).map(|_| ())
}

/// Keccak-256 address of the secp256k1 public key for `private_key`.
pub fn address_from_private_key(private_key: &[u8]) -> WalletResult<Address> {
    let secret = SecretKey::from_slice(private_key)
        .map_err(|e| WalletError::CryptoError(format!("Invalid secp256k1 private key: {}", e)))?;

    let encoded = secret.public_key().to_encoded_point(false);
    // Drop the 0x04 SEC1 tag.
    let digest = Keccak256::digest(&encoded.as_bytes()[1..]);
    Address::from_bytes(&digest[12..])
}

fn parse_path(path: &str) -> WalletResult<DerivationPath> {
    let trimmed = path.trim();
    if !trimmed.starts_with('m') {
        return Err(WalletError::InvalidPath(format!(
            "Path '{}' must start with 'm'",
            trimmed
        )));
    }

    DerivationPath::from_str(trimmed)
        .map_err(|e| WalletError::InvalidPath(format!("Path '{}': {}", trimmed, e)))
}

fn child_number(index: u64) -> WalletResult<ChildNumber> {
    let index = u32::try_from(index)
        .ok()
        .filter(|value| *value < ChildNumber::HARDENED_FLAG)
        .ok_or_else(|| {
            WalletError::InvalidPath(format!(
                "Index {} is outside the non-hardened range",
                index
            ))
        })?;

    ChildNumber::new(index, false).map_err(|e| WalletError::InvalidPath(e.to_string()))
}

/// Generate a BIP39 mnemonic with specified word count
fn generate_bip39_mnemonic(word_count: u32) -> WalletResult<String> {
    use bip39::Mnemonic;
    use rand::{rngs::OsRng, RngCore};

    let entropy_bits = match word_count {
        12 => 128,
        15 => 160,
        18 => 192,
        21 => 224,
        24 => 256,
        _ => {
            return Err(WalletError::ValidationError(
                "Invalid word count: must be 12, 15, 18, 21, or 24".to_string(),
            ))
        }
    };

    let mut entropy = Zeroizing::new(vec![0u8; entropy_bits / 8]);
    let mut rng = OsRng;
    rng.try_fill_bytes(&mut entropy)
        .map_err(|e| WalletError::CryptoError(format!("Failed to generate entropy: {}", e)))?;

    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|e| WalletError::CryptoError(format!("Failed to create mnemonic: {}", e)))?;

    Ok(mnemonic.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str = "test test test test test test test test test test test junk";

    fn root() -> RootSecret {
        RootSecret::parse(TEST_MNEMONIC).unwrap()
    }

    #[test]
    fn derives_known_vector_at_index_zero() {
        let key = derive(&root(), "m/44'/60'/0'/0/0").unwrap();
        assert_eq!(
            key.address.as_str(),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert_eq!(
            key.private_key_hex().as_str(),
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80"
        );
        assert_eq!(key.derivation_path.as_deref(), Some("m/44'/60'/0'/0/0"));
    }

    #[test]
    fn derivation_is_deterministic() {
        let first = derive(&root(), "m/44'/60'/0'/0/7").unwrap();
        let second = derive(&root(), "m/44'/60'/0'/0/7").unwrap();
        assert_eq!(first.address, second.address);
        assert_eq!(first.private_key(), second.private_key());
    }

    #[test]
    fn batch_derivation_matches_single_derivation() {
        let prefix = DerivationPrefix::parse(DEFAULT_DERIVATION_PREFIX).unwrap();
        let batch = derive_range(&root(), &prefix, 0..3).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(
            batch[1].1.address.as_str(),
            "0x70997970c51812dc3a010c7d01b50e0d17dc79c8"
        );

        for (index, key) in &batch {
            let single = derive(&root(), &prefix.path_for(*index).unwrap()).unwrap();
            assert_eq!(single.address, key.address);
            assert_eq!(single.derivation_path, key.derivation_path);
        }
    }

    #[test]
    fn invalid_checksum_is_rejected() {
        let err = RootSecret::parse(
            "correct horse battery staple correct horse battery staple",
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::InvalidMnemonic(_)));

        let err = validate_mnemonic("test test test test test test test test test test test test")
            .unwrap_err();
        assert!(matches!(err, WalletError::InvalidMnemonic(_)));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for path in ["", "44'/60'", "m/44'/abc", "m//0"] {
            let err = derive(&root(), path).unwrap_err();
            assert!(
                matches!(err, WalletError::InvalidPath(_)),
                "expected InvalidPath for {path:?}, got {err:?}"
            );
        }
        assert!(matches!(
            DerivationPrefix::parse("x/1"),
            Err(WalletError::InvalidPath(_))
        ));
    }

    #[test]
    fn hardened_range_indices_are_rejected() {
        let prefix = DerivationPrefix::parse(DEFAULT_DERIVATION_PREFIX).unwrap();
        assert!(prefix.path_for(2_147_483_647).is_ok());
        assert!(matches!(
            prefix.path_for(2_147_483_648),
            Err(WalletError::InvalidPath(_))
        ));
        assert!(derive_range(&root(), &prefix, 2_147_483_647..2_147_483_649).is_err());
    }

    #[test]
    fn prefix_trailing_slash_is_normalized() {
        let prefix = DerivationPrefix::parse("m/44'/60'/0'/0/").unwrap();
        assert_eq!(prefix.path_for(3).unwrap(), "m/44'/60'/0'/0/3");
        assert_eq!(prefix, DerivationPrefix::parse(DEFAULT_DERIVATION_PREFIX).unwrap());
    }

    #[test]
    fn random_keys_are_independent() {
        let first = create_random().unwrap();
        let second = create_random().unwrap();
        assert_ne!(first.address, second.address);
        assert!(first.derivation_path.is_none());
        assert_eq!(
            address_from_private_key(first.private_key()).unwrap(),
            first.address
        );
    }

    #[test]
    fn generated_mnemonics_round_trip() {
        let generated = RootSecret::generate(24).unwrap();
        assert_eq!(generated.word_count(), 24);
        let restored = RootSecret::parse(generated.phrase().expose_secret()).unwrap();
        let a = derive(&generated, "m/44'/60'/0'/0/0").unwrap();
        let b = derive(&restored, "m/44'/60'/0'/0/0").unwrap();
        assert_eq!(a.address, b.address);

        assert!(matches!(
            RootSecret::generate(13),
            Err(WalletError::ValidationError(_))
        ));
    }

    #[test]
    fn debug_output_redacts_key_material() {
        let key = derive(&root(), "m/44'/60'/0'/0/0").unwrap();
        let rendered = format!("{:?} {:?}", key, root());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("ac0974bec39a17e3"));
        assert!(!rendered.contains("junk"));
    }
}
