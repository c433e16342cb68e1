use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use async_trait::async_trait;
use blake3::Hasher as Blake3;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use regex::Regex;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::SecretManager;
use crate::errors::{WalletError, WalletResult};
use crate::store::file::write_atomic;

const VAULT_MAGIC: &[u8; 8] = b"FABRICSV";
const VAULT_VERSION: u16 = 1;
const META_FILE: &str = "vault.meta";
const SECRET_EXTENSION: &str = "secret";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;
const KEY_CHECK_CONTEXT: &[u8] = b"wallet-fabric vault key check";

/// Argon2id cost parameters for the vault key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaultKdf {
    pub m_cost_kib: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for VaultKdf {
    fn default() -> Self {
        Self {
            m_cost_kib: 256 * 1024, // 256 MiB
            t_cost: 4,
            p_cost: 1,
        }
    }
}

/// Key derivation settings written once when the vault is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VaultMeta {
    magic: [u8; 8],
    version: u16,
    kdf: VaultKdf,
    salt: [u8; SALT_LEN],
    key_check: [u8; 32],
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedVersion {
    number: u64,
    nonce: [u8; NONCE_LEN],
    checksum: [u8; 32],
    ciphertext: Vec<u8>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SecretFile {
    magic: [u8; 8],
    version: u16,
    name: String,
    versions: Vec<SealedVersion>,
}

/// Encrypted on-disk secret manager.
///
/// One file per container under the vault directory. Every version is sealed
/// with AES-256-GCM under a key derived from the passphrase with Argon2id.
/// File and cipher work runs on the blocking thread pool.
#[derive(Clone)]
pub struct VaultSecretManager {
    inner: Arc<VaultInner>,
}

struct VaultInner {
    root: PathBuf,
    key: Zeroizing<[u8; KEY_LEN]>,
    name_pattern: Regex,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for VaultSecretManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultSecretManager")
            .field("root", &self.inner.root)
            .field("key", &"<redacted>")
            .finish()
    }
}

impl VaultSecretManager {
    pub fn open(root: impl AsRef<Path>, passphrase: &SecretString) -> WalletResult<Self> {
        Self::open_with_kdf(root, passphrase, VaultKdf::default())
    }

    /// [`open`](Self::open) on the blocking pool, for callers inside the runtime.
    pub async fn open_async(root: PathBuf, passphrase: SecretString) -> WalletResult<Self> {
        tokio::task::spawn_blocking(move || Self::open(&root, &passphrase))
            .await
            .map_err(|e| WalletError::EscrowUnavailable(format!("Vault open task failed: {}", e)))?
    }

    /// Open or initialise the vault. `kdf` only applies to a new vault; an
    /// existing vault keeps the parameters it was created with.
    pub fn open_with_kdf(
        root: impl AsRef<Path>,
        passphrase: &SecretString,
        kdf: VaultKdf,
    ) -> WalletResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        let meta_path = root.join(META_FILE);
        let key = if meta_path.exists() {
            let meta: VaultMeta = serde_json::from_slice(&fs::read(&meta_path)?)?;
            check_header(&meta.magic, meta.version)?;

            let key = derive_key(passphrase, &meta.kdf, &meta.salt)?;
            if key_check(&key) != meta.key_check {
                return Err(WalletError::CryptoError(
                    "Vault passphrase does not match".to_string(),
                ));
            }
            key
        } else {
            let mut salt = [0u8; SALT_LEN];
            OsRng.fill_bytes(&mut salt);

            let key = derive_key(passphrase, &kdf, &salt)?;
            let meta = VaultMeta {
                magic: *VAULT_MAGIC,
                version: VAULT_VERSION,
                kdf,
                salt,
                key_check: key_check(&key),
                created_at: Utc::now(),
            };
            write_atomic(&meta_path, &serde_json::to_vec(&meta)?)?;
            log::info!("Initialised secret vault at {}", root.display());
            key
        };

        let name_pattern = Regex::new(r"^[A-Za-z0-9_-]{1,255}$")
            .map_err(|e| WalletError::ConfigError(format!("Invalid name pattern: {}", e)))?;

        Ok(Self {
            inner: Arc::new(VaultInner {
                root,
                key,
                name_pattern,
                write_lock: Mutex::new(()),
            }),
        })
    }

    async fn run_blocking<T, F>(&self, task: F) -> WalletResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&VaultInner) -> WalletResult<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || task(&inner))
            .await
            .map_err(|e| WalletError::EscrowUnavailable(format!("Vault task failed: {}", e)))?
    }
}

impl VaultInner {
    fn container_path(&self, name: &str) -> WalletResult<PathBuf> {
        if !self.name_pattern.is_match(name) {
            return Err(WalletError::ValidationError(format!(
                "Invalid secret name '{}'",
                name
            )));
        }
        Ok(self.root.join(format!("{}.{}", name, SECRET_EXTENSION)))
    }

    fn read_container(&self, name: &str) -> WalletResult<SecretFile> {
        let path = self.container_path(name)?;
        if !path.exists() {
            return Err(WalletError::SecretNotFound(name.to_string()));
        }

        let file: SecretFile = serde_json::from_slice(&fs::read(&path)?)?;
        check_header(&file.magic, file.version)?;
        Ok(file)
    }

    fn write_container(&self, file: &SecretFile) -> WalletResult<()> {
        let path = self.container_path(&file.name)?;
        write_atomic(&path, &serde_json::to_vec(file)?)
    }

    fn seal(&self, number: u64, payload: &[u8]) -> WalletResult<SealedVersion> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let checksum = blake3_checksum(payload);
        let ciphertext = encrypt_aes_gcm(
            &self.key,
            Nonce::assume_unique_for_key(nonce_bytes),
            payload,
        )?;

        Ok(SealedVersion {
            number,
            nonce: nonce_bytes,
            checksum,
            ciphertext,
            created_at: Utc::now(),
        })
    }

    fn open_version(&self, sealed: &SealedVersion) -> WalletResult<Zeroizing<Vec<u8>>> {
        let plaintext = decrypt_aes_gcm(
            &self.key,
            Nonce::assume_unique_for_key(sealed.nonce),
            &sealed.ciphertext,
        )?;
        if blake3_checksum(&plaintext) != sealed.checksum {
            return Err(WalletError::CryptoError(
                "Secret integrity verification failed".to_string(),
            ));
        }
        Ok(plaintext)
    }

    fn access_latest(&self, name: &str) -> WalletResult<Zeroizing<Vec<u8>>> {
        let file = self.read_container(name)?;
        let latest = file
            .versions
            .last()
            .ok_or_else(|| WalletError::SecretNotFound(name.to_string()))?;
        self.open_version(latest)
    }

    fn create_container(&self, name: &str) -> WalletResult<()> {
        let path = self.container_path(name)?;
        let _guard = self.write_lock.lock();
        if path.exists() {
            return Err(WalletError::AlreadyExists(name.to_string()));
        }

        self.write_container(&SecretFile {
            magic: *VAULT_MAGIC,
            version: VAULT_VERSION,
            name: name.to_string(),
            versions: Vec::new(),
        })
    }

    fn add_version(&self, name: &str, payload: &[u8]) -> WalletResult<u64> {
        let _guard = self.write_lock.lock();
        let mut file = self.read_container(name)?;

        let number = file.versions.last().map(|v| v.number).unwrap_or(0) + 1;
        file.versions.push(self.seal(number, payload)?);
        self.write_container(&file)?;
        Ok(number)
    }
}

#[async_trait]
impl SecretManager for VaultSecretManager {
    async fn access_latest(&self, name: &str) -> WalletResult<Zeroizing<Vec<u8>>> {
        let name = name.to_string();
        self.run_blocking(move |vault| vault.access_latest(&name)).await
    }

    async fn create_container(&self, name: &str) -> WalletResult<()> {
        let name = name.to_string();
        self.run_blocking(move |vault| vault.create_container(&name)).await
    }

    async fn add_version(&self, name: &str, payload: &[u8]) -> WalletResult<u64> {
        let name = name.to_string();
        let payload = Zeroizing::new(payload.to_vec());
        self.run_blocking(move |vault| vault.add_version(&name, &payload)).await
    }

    async fn ping(&self) -> WalletResult<()> {
        let meta_path = self.inner.root.join(META_FILE);
        match tokio::fs::metadata(&meta_path).await {
            Ok(metadata) if metadata.is_file() => Ok(()),
            _ => Err(WalletError::EscrowUnavailable(format!(
                "Vault directory {} is not readable",
                self.inner.root.display()
            ))),
        }
    }
}

fn check_header(magic: &[u8; 8], version: u16) -> WalletResult<()> {
    if magic != VAULT_MAGIC {
        return Err(WalletError::ValidationError(
            "Invalid vault magic marker".to_string(),
        ));
    }
    if version != VAULT_VERSION {
        return Err(WalletError::ValidationError(format!(
            "Unsupported vault version: {}",
            version
        )));
    }
    Ok(())
}

fn derive_key(
    passphrase: &SecretString,
    kdf: &VaultKdf,
    salt: &[u8; SALT_LEN],
) -> WalletResult<Zeroizing<[u8; KEY_LEN]>> {
    let argon_params = Params::new(kdf.m_cost_kib, kdf.t_cost, kdf.p_cost, Some(KEY_LEN))
        .map_err(|e| WalletError::CryptoError(format!("Invalid Argon2 params: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, key.as_mut())
        .map_err(|e| WalletError::CryptoError(format!("KDF failed: {e}")))?;
    Ok(key)
}

fn key_check(key: &Zeroizing<[u8; KEY_LEN]>) -> [u8; 32] {
    *blake3::keyed_hash(key, KEY_CHECK_CONTEXT).as_bytes()
}

fn encrypt_aes_gcm(
    key: &Zeroizing<[u8; KEY_LEN]>,
    nonce: Nonce,
    plaintext: &[u8],
) -> WalletResult<Vec<u8>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key.as_ref())
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);

    let mut in_out = plaintext.to_vec();
    key.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::CryptoError("Encryption failure".to_string()))?;
    Ok(in_out)
}

fn decrypt_aes_gcm(
    key: &Zeroizing<[u8; KEY_LEN]>,
    nonce: Nonce,
    ciphertext: &[u8],
) -> WalletResult<Zeroizing<Vec<u8>>> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key.as_ref())
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    let key = LessSafeKey::new(unbound_key);

    if ciphertext.len() < aead::AES_256_GCM.tag_len() {
        return Err(WalletError::CryptoError(
            "Ciphertext shorter than authentication tag".to_string(),
        ));
    }

    let mut in_out = Zeroizing::new(ciphertext.to_vec());
    let plaintext_len = key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| WalletError::CryptoError("Decryption failure".to_string()))?
        .len();
    in_out.truncate(plaintext_len);
    Ok(in_out)
}

fn blake3_checksum(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake3::new();
    hasher.update(data);
    *hasher.finalize().as_bytes()
}
