use super::state::{PersistedState, StoreState};
use super::{DocumentKey, DocumentStore, Query, Snapshot, WriteBatch};
use crate::errors::{WalletError, WalletResult};
use async_trait::async_trait;
use blake3::Hasher as Blake3;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write as _;
use std::path::{Path, PathBuf};

const STORE_FORMAT: u16 = 1;
const STORE_FILE: &str = "documents.json";

#[derive(Debug, Serialize, Deserialize)]
struct StoreEnvelope {
    version: u16,
    checksum: String,
    payload: PersistedState,
}

/// [`DocumentStore`] persisted as one checksummed JSON file in a directory.
///
/// Every commit is applied to a copy of the table, written to disk with a
/// temp-file rename, and only then made visible. Commits are serialised.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: RwLock<StoreState>,
    commit_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    /// Open the store under `dir`, creating the directory on first use.
    pub fn open(dir: impl AsRef<Path>) -> WalletResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(STORE_FILE);

        let state = if path.exists() {
            load(&path)?
        } else {
            StoreState::default()
        };
        log::info!(
            "Document store opened at {} ({} wallets)",
            path.display(),
            state.count("wallets")
        );

        Ok(Self {
            path,
            state: RwLock::new(state),
            commit_lock: tokio::sync::Mutex::new(()),
        })
    }

}

#[async_trait]
impl DocumentStore for FileStore {
    async fn get(&self, key: &DocumentKey) -> WalletResult<Snapshot> {
        Ok(self.state.read().snapshot(key))
    }

    async fn commit(&self, batch: WriteBatch) -> WalletResult<()> {
        let _guard = self.commit_lock.lock().await;

        let mut next = self.state.read().clone();
        next.apply(&batch)?;
        let bytes = encode(&next.to_persisted())?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| WalletError::StorageError(format!("Store writer failed: {}", e)))??;

        *self.state.write() = next;
        Ok(())
    }

    async fn query(&self, query: &Query) -> WalletResult<Vec<Snapshot>> {
        Ok(self.state.read().query(query))
    }

    async fn ping(&self) -> WalletResult<()> {
        let dir = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let metadata = tokio::fs::metadata(&dir).await?;
        if !metadata.is_dir() {
            return Err(WalletError::StorageError(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        Ok(())
    }
}

fn checksum(payload: &PersistedState) -> WalletResult<String> {
    let mut hasher = Blake3::new();
    hasher.update(&serde_json::to_vec(payload)?);
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

fn encode(payload: &PersistedState) -> WalletResult<Vec<u8>> {
    let envelope = StoreEnvelope {
        version: STORE_FORMAT,
        checksum: checksum(payload)?,
        payload: payload.clone(),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

fn load(path: &Path) -> WalletResult<StoreState> {
    let bytes = fs::read(path)?;
    let envelope: StoreEnvelope = serde_json::from_slice(&bytes).map_err(|e| {
        WalletError::PersistenceFailure(format!("Unreadable store file {}: {}", path.display(), e))
    })?;
    if envelope.version != STORE_FORMAT {
        return Err(WalletError::PersistenceFailure(format!(
            "Unsupported store format {}",
            envelope.version
        )));
    }
    if checksum(&envelope.payload)? != envelope.checksum {
        return Err(WalletError::PersistenceFailure(
            "Store integrity verification failed".to_string(),
        ));
    }
    StoreState::from_persisted(envelope.payload)
}

/// Replace `path` with `bytes` through a synced sibling file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> WalletResult<()> {
    let tmp_path = path.with_extension("new");
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ServerTimestamp, Write};
    use serde_json::json;
    use tempfile::TempDir;

    fn write(id: &str, value: serde_json::Value) -> Write {
        Write::merge(
            DocumentKey::new("wallets", id),
            value.as_object().cloned().unwrap(),
        )
    }

    #[tokio::test]
    async fn commits_survive_reopening() {
        let dir = TempDir::new().unwrap();
        let key = DocumentKey::new("wallets", "a");
        {
            let store = FileStore::open(dir.path()).unwrap();
            store
                .commit(
                    write("a", json!({"label": "x"}))
                        .server_timestamp("createdAt", ServerTimestamp::OnCreate)
                        .into(),
                )
                .await
                .unwrap();
            store
                .commit(write("a", json!({"active": true})).if_version(1).into())
                .await
                .unwrap();
        }

        let reopened = FileStore::open(dir.path()).unwrap();
        let snapshot = reopened.get(&key).await.unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.field("label"), Some(&json!("x")));
        assert!(snapshot.field("createdAt").is_some());
        assert!(reopened.ping().await.is_ok());

        let stale = write("a", json!({"active": false})).if_version(1);
        assert!(matches!(
            reopened.commit(stale.into()).await,
            Err(WalletError::WriteConflict(_))
        ));
    }

    #[tokio::test]
    async fn rejected_batches_leave_the_file_untouched() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.commit(write("a", json!({"n": 1})).into()).await.unwrap();
        let path = dir.path().join(STORE_FILE);
        let before = fs::read(&path).unwrap();

        let batch: WriteBatch = vec![
            write("b", json!({"n": 1})),
            write("a", json!({"n": 2})).if_version(7),
        ]
        .into_iter()
        .collect();
        assert!(store.commit(batch).await.is_err());

        assert_eq!(fs::read(&path).unwrap(), before);
        let stored = store.query(&Query::collection("wallets")).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn tampered_store_file_is_refused() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.commit(write("a", json!({"n": 1})).into()).await.unwrap();

        let path = dir.path().join(STORE_FILE);
        let raw = fs::read_to_string(&path).unwrap();
        fs::write(&path, raw.replace("\"n\":1", "\"n\":9")).unwrap();

        assert!(matches!(
            FileStore::open(dir.path()),
            Err(WalletError::PersistenceFailure(_))
        ));
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!path.with_extension("new").exists());
    }
}
