/// Transactional index allocator
///
/// Each lineage owns one counter document holding `next_index`. A reservation
/// reads the counter, writes `start + count` conditional on the version it read,
/// and retries with exponential backoff when another caller got there first.
use crate::errors::{with_timeout, WalletError, WalletResult};
use crate::store::{Document, DocumentKey, DocumentStore, ServerTimestamp, Snapshot, Write};
use serde_json::Value;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

pub const FABRIC_COLLECTION: &str = "wallet_fabric";
const NEXT_INDEX_FIELD: &str = "next_index";

/// Bounded retry with capped exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    const MAX_BACKOFF_EXPONENT: u32 = 8;

    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt
            .saturating_sub(1)
            .min(Self::MAX_BACKOFF_EXPONENT);
        let multiplier = 1u32 << exponent;
        let delay = self.base_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(25), Duration::from_secs(1))
    }
}

/// A contiguous block of indices `[start, start + count)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub lineage: String,
    pub start: u64,
    pub count: u64,
}

impl Reservation {
    pub fn end(&self) -> u64 {
        self.start + self.count
    }

    pub fn range(&self) -> Range<u64> {
        self.start..self.end()
    }
}

pub struct IndexAllocator {
    store: Arc<dyn DocumentStore>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl IndexAllocator {
    pub fn new(store: Arc<dyn DocumentStore>, policy: RetryPolicy, timeout: Duration) -> Self {
        Self {
            store,
            policy,
            timeout,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Current `next_index` of a lineage (0 when it was never used).
    pub async fn peek(&self, lineage: &str) -> WalletResult<u64> {
        let snapshot = self.read(lineage).await?;
        read_next_index(&snapshot)
    }

    /// Create the lineage document if it is absent. Never resets an existing
    /// counter. Returns the current `next_index`.
    pub async fn ensure_lineage(&self, lineage: &str) -> WalletResult<u64> {
        validate_lineage(lineage)?;

        let snapshot = self.read(lineage).await?;
        if snapshot.exists() {
            return read_next_index(&snapshot);
        }

        let create = counter_write(lineage, 0).if_version(0);
        match with_timeout(self.timeout, "lineage create", self.store.commit(create.into())).await
        {
            Ok(()) => {
                log::info!("Created allocator lineage '{}'", lineage);
                Ok(0)
            }
            // Someone else created it in the meantime.
            Err(WalletError::WriteConflict(_)) => self.peek(lineage).await,
            Err(err) => Err(persistence_error(err)),
        }
    }

    /// Reserve `count` consecutive indices for `lineage`.
    ///
    /// Returned ranges never overlap, and together they cover
    /// `[0, next_index)` without gaps.
    pub async fn reserve(&self, lineage: &str, count: u64) -> WalletResult<Reservation> {
        validate_lineage(lineage)?;
        if count == 0 {
            return Err(WalletError::ValidationError(
                "Reservation count must be positive".to_string(),
            ));
        }

        for attempt in 1..=self.policy.max_attempts {
            let snapshot = self.read(lineage).await?;
            let start = read_next_index(&snapshot)?;
            let end = start.checked_add(count).ok_or_else(|| {
                WalletError::ValidationError(format!(
                    "Reserving {} indices from {} overflows the counter",
                    count, start
                ))
            })?;

            let write = counter_write(lineage, end).if_version(snapshot.version);
            match with_timeout(self.timeout, "index reservation", self.store.commit(write.into()))
                .await
            {
                Ok(()) => {
                    log::debug!(
                        "Reserved [{}, {}) on lineage '{}' after {} attempt(s)",
                        start,
                        end,
                        lineage,
                        attempt
                    );
                    return Ok(Reservation {
                        lineage: lineage.to_string(),
                        start,
                        count,
                    });
                }
                Err(WalletError::WriteConflict(reason)) => {
                    log::debug!(
                        "Reservation attempt {}/{} on '{}' conflicted: {}",
                        attempt,
                        self.policy.max_attempts,
                        lineage,
                        reason
                    );
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.delay_for(attempt)).await;
                    }
                }
                Err(err) => return Err(persistence_error(err)),
            }
        }

        Err(WalletError::AllocationConflict(format!(
            "Lineage '{}' still contended after {} attempts",
            lineage, self.policy.max_attempts
        )))
    }

    async fn read(&self, lineage: &str) -> WalletResult<Snapshot> {
        let key = DocumentKey::new(FABRIC_COLLECTION, lineage);
        with_timeout(self.timeout, "lineage read", self.store.get(&key))
            .await
            .map_err(persistence_error)
    }
}

fn counter_write(lineage: &str, next_index: u64) -> Write {
    let mut fields = Document::new();
    fields.insert(NEXT_INDEX_FIELD.to_string(), Value::from(next_index));
    Write::merge(DocumentKey::new(FABRIC_COLLECTION, lineage), fields)
        .server_timestamp("createdAt", ServerTimestamp::OnCreate)
        .server_timestamp("updatedAt", ServerTimestamp::OnWrite)
}

fn read_next_index(snapshot: &Snapshot) -> WalletResult<u64> {
    match snapshot.field(NEXT_INDEX_FIELD) {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value.as_u64().ok_or_else(|| {
            WalletError::PersistenceFailure(format!(
                "Lineage '{}' holds a non-integer next_index: {}",
                snapshot.key.id, value
            ))
        }),
    }
}

fn validate_lineage(lineage: &str) -> WalletResult<()> {
    if lineage.trim().is_empty() {
        return Err(WalletError::ValidationError(
            "Lineage id cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn persistence_error(err: WalletError) -> WalletError {
    match err {
        WalletError::StorageError(msg) => WalletError::PersistenceFailure(msg),
        other => other,
    }
}
