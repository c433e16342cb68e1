/// Wallet fabric service operations
///
/// Each operation validates its input first, then drives the allocator,
/// derivation engine, escrow and repository in that order. A mint that fails
/// after its reservation leaves the reserved indices unused.
use crate::allocator::Reservation;
use crate::api::types::{
    DerivedAddress, GenerateResponse, HealthResponse, InitResponse, MintResponse,
    PreviewResponse, SyncResponse,
};
use crate::app_state::SharedFabricContext;
use crate::crypto::{self, DerivedKey, RootSecret};
use crate::errors::{with_timeout, WalletError, WalletResult};
use crate::repository::{WalletRecord, SOURCE_DERIVED, SOURCE_GENERATED};
use crate::sync::{ChainSelector, SyncMode};
use crate::validation::{
    MAX_GENERATE_COUNT, MAX_MINT_COUNT, MAX_PREVIEW_COUNT, MAX_SHADOWS_PER_WALLET, MAX_SYNC_LIMIT,
};
use futures::stream::{self, StreamExt, TryStreamExt};

pub const SERVICE_NAME: &str = "wallet-fabric";
/// Wallet records per commit when generating random wallets.
const GENERATE_COMMIT_CHUNK: usize = 500;
const GENERATE_SAMPLE_SIZE: usize = 5;

#[derive(Clone)]
pub struct WalletFabric {
    context: SharedFabricContext,
}

impl WalletFabric {
    pub fn new(context: SharedFabricContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &SharedFabricContext {
        &self.context
    }

    /// Make sure a root secret and the allocator lineage exist.
    ///
    /// A supplied mnemonic is validated and stored as the newest root version.
    /// The lineage counter is created when absent and never reset.
    pub async fn init(&self, mnemonic: Option<&str>) -> WalletResult<InitResponse> {
        let ctx = &self.context;
        let config = ctx.config();

        match mnemonic {
            Some(phrase) => {
                ctx.validator().validate_mnemonic_input(phrase)?;
                crypto::validate_mnemonic(phrase)?;
                ctx.escrow()
                    .store_root_secret(&config.root_secret_name, phrase)
                    .await?;
            }
            None => {
                ctx.escrow()
                    .get_or_create_root_secret(&config.root_secret_name)
                    .await?;
            }
        }

        let next_index = ctx.allocator().ensure_lineage(&config.lineage_id).await?;
        log::info!(
            "Fabric initialised: lineage '{}' at next_index {}",
            config.lineage_id,
            next_index
        );
        Ok(InitResponse {
            ok: true,
            next_index,
        })
    }

    /// Derive addresses without reserving or persisting anything.
    pub async fn preview(&self, start_index: u64, count: u64) -> WalletResult<PreviewResponse> {
        let ctx = &self.context;
        let count = ctx
            .validator()
            .validate_count("count", count, MAX_PREVIEW_COUNT)?;
        let end = start_index.checked_add(count).ok_or_else(|| {
            WalletError::ValidationError("startIndex + count overflows".to_string())
        })?;

        let root = self.load_root_secret().await?;
        let keys = crypto::derive_range(&root, &ctx.config().derivation_prefix, start_index..end)?;

        Ok(PreviewResponse {
            ok: true,
            addresses: keys.iter().map(derived_address).collect(),
        })
    }

    /// Reserve `count` indices, derive them, escrow the keys when enabled and
    /// persist the wallets.
    pub async fn mint(&self, count: u64, label: Option<&str>) -> WalletResult<MintResponse> {
        let ctx = &self.context;
        let config = ctx.config();
        let count = ctx.validator().validate_count("count", count, MAX_MINT_COUNT)?;
        let label = self.resolve_label(label)?;

        let root = ctx
            .escrow()
            .get_or_create_root_secret(&config.root_secret_name)
            .await?;

        let reservation = ctx.allocator().reserve(&config.lineage_id, count).await?;
        match self.mint_reserved(&root, &reservation, label).await {
            Ok(minted) => {
                log::info!(
                    "Minted {} wallet(s) at indices [{}, {}) on lineage '{}'",
                    minted.len(),
                    reservation.start,
                    reservation.end(),
                    reservation.lineage
                );
                Ok(MintResponse {
                    ok: true,
                    start: reservation.start,
                    count: reservation.count,
                    minted,
                })
            }
            Err(err) => {
                log::warn!(
                    "Indices [{}, {}) on lineage '{}' were reserved but not minted: {}",
                    reservation.start,
                    reservation.end(),
                    reservation.lineage,
                    err
                );
                Err(err)
            }
        }
    }

    /// Create `count` independent random wallets. Requires key escrow, since
    /// a random key that is not escrowed would be lost.
    ///
    /// With `shadows > 0` every random base wallet is bundled with that many
    /// HD wallets reserved from the lineage; a bundle is always committed in
    /// one batch.
    pub async fn generate(
        &self,
        count: u64,
        label: Option<&str>,
        shadows: u64,
    ) -> WalletResult<GenerateResponse> {
        let ctx = &self.context;
        let config = ctx.config();
        let count = ctx
            .validator()
            .validate_count("count", count, MAX_GENERATE_COUNT)?;
        let label = self.resolve_label(label)?;
        if shadows > MAX_SHADOWS_PER_WALLET {
            return Err(WalletError::ValidationError(format!(
                "shadows must be at most {}",
                MAX_SHADOWS_PER_WALLET
            )));
        }
        let shadow_total = count.saturating_mul(shadows);
        if shadow_total > MAX_GENERATE_COUNT {
            return Err(WalletError::ValidationError(format!(
                "count * shadows must be at most {}",
                MAX_GENERATE_COUNT
            )));
        }

        if !config.store_private_keys {
            return Err(WalletError::ValidationError(
                "Random wallet generation requires STORE_PRIVKEYS=true".to_string(),
            ));
        }

        let bases = (0..count)
            .map(|_| crypto::create_random())
            .collect::<WalletResult<Vec<DerivedKey>>>()?;
        let shadow_keys = if shadow_total > 0 {
            self.derive_shadows(shadow_total).await?
        } else {
            Vec::new()
        };

        let bundle_len = 1 + shadows as usize;
        let mut records = Vec::with_capacity(bases.len() * bundle_len);
        for (position, base) in bases.iter().enumerate() {
            records.push(
                WalletRecord::new(base.address.clone(), &config.chain, SOURCE_GENERATED)
                    .with_label(Some(label.clone())),
            );
            let first = position * (bundle_len - 1);
            for (_, key) in &shadow_keys[first..first + bundle_len - 1] {
                records.push(
                    WalletRecord::new(key.address.clone(), &config.chain, SOURCE_DERIVED)
                        .with_label(Some(label.clone()))
                        .with_derivation_path(key.derivation_path.clone())
                        .with_shadow_of(base.address.clone()),
                );
            }
        }
        let sample: Vec<_> = bases
            .iter()
            .take(GENERATE_SAMPLE_SIZE)
            .map(|key| key.address.clone())
            .collect();

        let mut keys = bases;
        keys.extend(shadow_keys.into_iter().map(|(_, key)| key));
        self.escrow_keys(keys).await?;

        let bundles_per_commit = (GENERATE_COMMIT_CHUNK / bundle_len).max(1);
        for chunk in records.chunks(bundles_per_commit * bundle_len) {
            ctx.repository().upsert_batch(chunk).await?;
        }

        log::info!(
            "Generated {} random wallet(s) with {} shadow wallet(s)",
            count,
            shadow_total
        );
        Ok(GenerateResponse {
            ok: true,
            created: count as usize,
            shadows: shadow_total as usize,
            sample,
        })
    }

    /// Batch job form of [`generate`](Self::generate): `count` bundles split
    /// into calls that each stay within the per-call limits.
    pub async fn run_generate_job(
        &self,
        count: u64,
        label: Option<&str>,
        shadows: u64,
    ) -> WalletResult<GenerateResponse> {
        let per_call = (MAX_GENERATE_COUNT / shadows.max(1)).max(1);
        let mut total = GenerateResponse {
            ok: true,
            created: 0,
            shadows: 0,
            sample: Vec::new(),
        };

        let mut remaining = count;
        while remaining > 0 {
            let batch = remaining.min(per_call);
            let result = self.generate(batch, label, shadows).await?;
            total.created += result.created;
            total.shadows += result.shadows;
            let room = GENERATE_SAMPLE_SIZE.saturating_sub(total.sample.len());
            total.sample.extend(result.sample.into_iter().take(room));
            remaining -= batch;
            log::info!("Generate job: {} of {} base wallet(s) done", count - remaining, count);
        }
        Ok(total)
    }

    /// Refresh balances of active wallets.
    ///
    /// `Incremental` runs take at most `limit` wallets (default
    /// `SYNC_DEFAULT_LIMIT`); `Full` runs cover every active wallet and
    /// reject a limit.
    pub async fn sync(
        &self,
        chain: ChainSelector,
        mode: SyncMode,
        limit: Option<u64>,
    ) -> WalletResult<SyncResponse> {
        let ctx = &self.context;
        let config = ctx.config();

        let chain = match chain {
            ChainSelector::Configured => Some(config.chain.clone()),
            ChainSelector::All => None,
            ChainSelector::Only(chain) => Some(chain),
        };
        if let Some(chain) = &chain {
            ctx.validator().validate_chain_id(chain)?;
        }
        let limit = match (mode, limit) {
            (SyncMode::Full, Some(_)) => {
                return Err(WalletError::ValidationError(
                    "limit cannot be combined with runMode 'full'".to_string(),
                ))
            }
            (SyncMode::Full, None) => None,
            (SyncMode::Incremental, Some(limit)) => {
                Some(ctx.validator().validate_count("limit", limit, MAX_SYNC_LIMIT)? as usize)
            }
            (SyncMode::Incremental, None) => Some(config.sync_default_limit),
        };

        let report = ctx.sync_engine().sync_batch(chain.as_deref(), limit).await?;
        Ok(SyncResponse {
            accepted: true,
            run_id: report.run_id,
            run_mode: mode,
            chain,
            processed: report.processed,
            failures: report.failures,
            note: report.note,
        })
    }

    /// Probe every dependency. Read-only.
    pub async fn health(&self) -> HealthResponse {
        let ctx = &self.context;
        let config = ctx.config();

        let (store, secrets, chain) = tokio::join!(
            ctx.repository().ping(),
            ctx.escrow().ping(),
            with_timeout(config.rpc_timeout, "chain ping", ctx.chain().ping()),
        );

        for (name, result) in [("store", &store), ("secrets", &secrets), ("chain", &chain)] {
            if let Err(err) = result {
                log::warn!("Health probe for {} failed: {}", name, err);
            }
        }

        HealthResponse {
            ok: store.is_ok() && secrets.is_ok() && chain.is_ok(),
            service: SERVICE_NAME.to_string(),
            uptime_sec: ctx.uptime().as_secs(),
            store_ok: store.is_ok(),
            secrets_ok: secrets.is_ok(),
            chain_ok: chain.is_ok(),
        }
    }

    async fn mint_reserved(
        &self,
        root: &RootSecret,
        reservation: &Reservation,
        label: String,
    ) -> WalletResult<Vec<DerivedAddress>> {
        let ctx = &self.context;
        let config = ctx.config();

        let keys = crypto::derive_range(root, &config.derivation_prefix, reservation.range())?;
        let minted: Vec<DerivedAddress> = keys.iter().map(derived_address).collect();
        let records: Vec<WalletRecord> = keys
            .iter()
            .map(|(_, key)| {
                WalletRecord::new(key.address.clone(), &config.chain, SOURCE_DERIVED)
                    .with_label(Some(label.clone()))
                    .with_derivation_path(key.derivation_path.clone())
            })
            .collect();

        if config.store_private_keys {
            self.escrow_keys(keys.into_iter().map(|(_, key)| key).collect())
                .await?;
        }
        ctx.repository().upsert_batch(&records).await?;

        Ok(minted)
    }

    /// Reserve and derive `total` HD keys for shadow wallets.
    async fn derive_shadows(&self, total: u64) -> WalletResult<Vec<(u64, DerivedKey)>> {
        let ctx = &self.context;
        let config = ctx.config();
        let root = ctx
            .escrow()
            .get_or_create_root_secret(&config.root_secret_name)
            .await?;
        let reservation = ctx.allocator().reserve(&config.lineage_id, total).await?;
        crypto::derive_range(&root, &config.derivation_prefix, reservation.range()).map_err(|err| {
            log::warn!(
                "Shadow indices [{}, {}) on lineage '{}' were reserved but not derived: {}",
                reservation.start,
                reservation.end(),
                reservation.lineage,
                err
            );
            err
        })
    }

    /// Store every key in escrow, at most `sync_concurrency` at a time.
    async fn escrow_keys(&self, keys: Vec<DerivedKey>) -> WalletResult<()> {
        let escrow = self.context.escrow();
        stream::iter(keys)
            .map(move |key| async move { escrow.escrow_private_key(&key).await })
            .buffer_unordered(self.context.config().sync_concurrency)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    /// Root secret for read-only use; never creates one.
    async fn load_root_secret(&self) -> WalletResult<RootSecret> {
        let ctx = &self.context;
        let name = &ctx.config().root_secret_name;
        match ctx.escrow().access_secret(name).await {
            Ok(payload) => {
                let phrase = std::str::from_utf8(&payload).map_err(|_| {
                    WalletError::CryptoError(format!("Root secret '{}' is not valid UTF-8", name))
                })?;
                RootSecret::parse(phrase)
            }
            Err(WalletError::SecretNotFound(_)) => Err(WalletError::NotInitialized),
            Err(err) => Err(err),
        }
    }

    fn resolve_label(&self, label: Option<&str>) -> WalletResult<String> {
        let ctx = &self.context;
        match label {
            Some(label) => {
                ctx.validator().validate_label(label)?;
                Ok(label.to_string())
            }
            None => Ok(ctx.config().wallet_label.clone()),
        }
    }
}

fn derived_address((index, key): &(u64, DerivedKey)) -> DerivedAddress {
    DerivedAddress {
        index: *index,
        address: key.address.clone(),
        derivation_path: key.derivation_path.clone().unwrap_or_default(),
    }
}
