//! Set-based operations over many short URLs.
//!
//! Id sets are processed in chunks, one statement per chunk, and the cancel
//! signal is checked before each chunk. A cancelled job keeps the chunks it
//! already committed.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::codegen::{CodeGenerator, CodeLookup, CodePolicy};
use crate::config::{BulkConfig, CodeConfig};
use crate::error::{Error, Result, StorageContext};
use crate::models::{BatchMode, BulkOutcome, NewShortUrl, ShortUrl};
use crate::password::hash_password_blocking;
use crate::storage::{PendingShortUrl, Storage};
use crate::usage::{InMemoryUsageCounters, UsageCounters};
use crate::validation::validate_new;

pub struct BulkEngine {
    storage: Arc<dyn Storage>,
    generator: CodeGenerator,
    policy: CodePolicy,
    usage: Arc<dyn UsageCounters>,
    chunk_size: usize,
}

/// Existence check that also sees codes claimed earlier in the same batch.
struct BatchLookup<'a> {
    storage: &'a dyn Storage,
    claimed: &'a HashSet<String>,
}

#[async_trait]
impl CodeLookup for BatchLookup<'_> {
    async fn is_taken(&self, code: &str) -> anyhow::Result<bool> {
        if self.claimed.contains(code) {
            return Ok(true);
        }
        self.storage.code_exists(code).await
    }
}

fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

impl BulkEngine {
    pub fn new(storage: Arc<dyn Storage>, codes: &CodeConfig, bulk: &BulkConfig) -> Self {
        Self::with_usage(storage, codes, bulk, Arc::new(InMemoryUsageCounters::new()))
    }

    pub fn with_usage(
        storage: Arc<dyn Storage>,
        codes: &CodeConfig,
        bulk: &BulkConfig,
        usage: Arc<dyn UsageCounters>,
    ) -> Self {
        Self {
            storage,
            generator: CodeGenerator::from_config(codes),
            policy: CodePolicy::from_config(codes),
            usage,
            chunk_size: bulk.chunk_size.max(1),
        }
    }

    /// Runs `apply` once per chunk of distinct ids and sums the affected rows.
    async fn for_each_chunk<F, Fut>(
        &self,
        operation: &'static str,
        ids: &[i64],
        cancel: &CancelSignal,
        mut apply: F,
    ) -> Result<BulkOutcome>
    where
        F: FnMut(Vec<i64>) -> Fut,
        Fut: Future<Output = anyhow::Result<u64>>,
    {
        let ids = dedup_ids(ids);
        let mut succeeded = 0u64;

        for chunk in ids.chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                info!(operation, committed = succeeded, "bulk job cancelled");
                return Err(Error::Cancelled);
            }
            succeeded += apply(chunk.to_vec())
                .await
                .storage_context(operation, format!("{} ids", chunk.len()))?;
        }

        let outcome = BulkOutcome::new(ids.len() as u64, succeeded);
        info!(
            operation,
            requested = outcome.requested,
            succeeded = outcome.succeeded,
            skipped = outcome.skipped,
            "bulk job finished"
        );
        Ok(outcome)
    }

    pub async fn bulk_delete(&self, ids: &[i64], cancel: &CancelSignal) -> Result<BulkOutcome> {
        let storage = self.storage.as_ref();
        self.for_each_chunk("bulk_delete", ids, cancel, move |chunk| async move {
            storage.delete_many(&chunk).await
        })
        .await
    }

    pub async fn bulk_activate(&self, ids: &[i64], cancel: &CancelSignal) -> Result<BulkOutcome> {
        self.set_active(ids, true, Utc::now(), cancel).await
    }

    pub async fn bulk_deactivate(&self, ids: &[i64], cancel: &CancelSignal) -> Result<BulkOutcome> {
        self.set_active(ids, false, Utc::now(), cancel).await
    }

    /// Rows already in the target state are skipped.
    pub async fn set_active(
        &self,
        ids: &[i64],
        active: bool,
        now: DateTime<Utc>,
        cancel: &CancelSignal,
    ) -> Result<BulkOutcome> {
        let storage = self.storage.as_ref();
        let operation = if active { "bulk_activate" } else { "bulk_deactivate" };
        self.for_each_chunk(operation, ids, cancel, move |chunk| async move {
            storage.set_active_many(&chunk, active, now).await
        })
        .await
    }

    /// `None` clears the expiry. Rows whose expiry already matches are skipped.
    pub async fn bulk_update_expiration(
        &self,
        ids: &[i64],
        expires_at: Option<DateTime<Utc>>,
        cancel: &CancelSignal,
    ) -> Result<BulkOutcome> {
        let storage = self.storage.as_ref();
        let now = Utc::now();
        self.for_each_chunk("bulk_update_expiration", ids, cancel, move |chunk| async move {
            storage.set_expiration_many(&chunk, expires_at, now).await
        })
        .await
    }

    pub async fn delete_expired(&self, as_of: DateTime<Utc>) -> Result<BulkOutcome> {
        let removed = self
            .storage
            .delete_expired(as_of)
            .await
            .storage_context("delete_expired", as_of)?;

        info!(removed, %as_of, "swept expired short urls");
        Ok(BulkOutcome::new(removed, removed))
    }

    pub async fn bulk_rename(
        &self,
        renames: &[(i64, String)],
        cancel: &CancelSignal,
    ) -> Result<BulkOutcome> {
        self.bulk_rename_at(renames, Utc::now(), cancel).await
    }

    /// Assigns new codes to many rows.
    ///
    /// Skipped: invalid or reserved codes, repeated ids, codes requested for
    /// more than one row, rows that already hold their target code, and codes
    /// currently held by another row (so swaps within one batch are skipped too).
    pub async fn bulk_rename_at(
        &self,
        renames: &[(i64, String)],
        now: DateTime<Utc>,
        cancel: &CancelSignal,
    ) -> Result<BulkOutcome> {
        let requested = renames.len() as u64;

        let mut target_counts: HashMap<&str, usize> = HashMap::new();
        for (_, code) in renames {
            *target_counts.entry(code.as_str()).or_insert(0) += 1;
        }

        let mut seen_ids = HashSet::new();
        let mut candidates: Vec<(i64, String)> = Vec::with_capacity(renames.len());
        for (id, code) in renames {
            if !seen_ids.insert(*id) {
                warn!(id, "skipping repeated id in rename batch");
                continue;
            }
            if let Err(e) = self.policy.check_custom(code) {
                warn!(id, code = %code, "skipping rename: {e}");
                continue;
            }
            if target_counts.get(code.as_str()).copied().unwrap_or(0) > 1 {
                warn!(id, code = %code, "skipping rename: code requested more than once");
                continue;
            }
            candidates.push((*id, code.clone()));
        }

        let mut succeeded = 0u64;
        for chunk in candidates.chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                info!(committed = succeeded, "bulk rename cancelled");
                return Err(Error::Cancelled);
            }

            let codes: Vec<String> = chunk.iter().map(|(_, code)| code.clone()).collect();
            let holders: HashMap<String, i64> = self
                .storage
                .code_holders(&codes)
                .await
                .storage_context("code_holders", format!("{} codes", codes.len()))?
                .into_iter()
                .collect();

            let applicable: Vec<(i64, String)> = chunk
                .iter()
                .filter(|(id, code)| match holders.get(code) {
                    Some(holder) if holder == id => {
                        debug!(id, code = %code, "skipping rename: row already has this code");
                        false
                    }
                    Some(holder) => {
                        warn!(id, code = %code, holder, "skipping rename: code held by another row");
                        false
                    }
                    None => true,
                })
                .cloned()
                .collect();

            succeeded += self
                .storage
                .update_codes_many(&applicable, now)
                .await
                .storage_context("bulk_rename", format!("{} ids", applicable.len()))?;
        }

        let outcome = BulkOutcome::new(requested, succeeded);
        info!(
            requested = outcome.requested,
            succeeded = outcome.succeeded,
            skipped = outcome.skipped,
            "bulk rename finished"
        );
        Ok(outcome)
    }

    pub async fn bulk_create(
        &self,
        rows: Vec<NewShortUrl>,
        mode: BatchMode,
        cancel: &CancelSignal,
    ) -> Result<BulkOutcome> {
        self.bulk_create_at(rows, mode, Utc::now(), cancel).await
    }

    /// Validates every row, inserts the valid ones chunk by chunk and assigns
    /// generated codes with one batched statement per chunk.
    ///
    /// In [`BatchMode::AllOrNothing`] any invalid row rejects the batch, and a
    /// storage failure removes rows already created by this call.
    pub async fn bulk_create_at(
        &self,
        rows: Vec<NewShortUrl>,
        mode: BatchMode,
        now: DateTime<Utc>,
        cancel: &CancelSignal,
    ) -> Result<BulkOutcome> {
        let requested = rows.len() as u64;
        let pending = self.prepare_rows(rows, mode, now).await?;

        let mut created: Vec<ShortUrl> = Vec::with_capacity(pending.len());
        for chunk in pending.chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                info!(committed = created.len(), "bulk create cancelled");
                self.record_usage(&created, now);
                return Err(Error::Cancelled);
            }

            match self.create_chunk(chunk, now).await {
                Ok(urls) => created.extend(urls),
                Err(e) => {
                    if mode == BatchMode::AllOrNothing && !created.is_empty() {
                        let ids: Vec<i64> = created.iter().map(|url| url.id).collect();
                        if let Err(cleanup) = self.storage.delete_many(&ids).await {
                            warn!("failed to roll back created rows: {cleanup}");
                        }
                    } else {
                        self.record_usage(&created, now);
                    }
                    return Err(e);
                }
            }
        }

        self.record_usage(&created, now);
        let outcome = BulkOutcome::new(requested, created.len() as u64);
        info!(
            requested = outcome.requested,
            succeeded = outcome.succeeded,
            skipped = outcome.skipped,
            "bulk create finished"
        );
        Ok(outcome)
    }

    /// Per-row validation, custom code checks and password hashing.
    async fn prepare_rows(
        &self,
        rows: Vec<NewShortUrl>,
        mode: BatchMode,
        now: DateTime<Utc>,
    ) -> Result<Vec<PendingShortUrl>> {
        let custom: Vec<String> = rows.iter().filter_map(|r| r.custom_code.clone()).collect();
        let held: HashSet<String> = self
            .storage
            .code_holders(&custom)
            .await
            .storage_context("code_holders", format!("{} codes", custom.len()))?
            .into_iter()
            .map(|(code, _)| code)
            .collect();

        let mut claimed = HashSet::new();
        let mut pending = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            let checked = validate_new(&row, &self.policy, now).and_then(|()| {
                match &row.custom_code {
                    Some(code) if held.contains(code) || !claimed.insert(code.clone()) => {
                        Err(Error::validation(format!("short code '{code}' is already taken")))
                    }
                    _ => Ok(()),
                }
            });
            let password_hash = match (checked, row.password.clone()) {
                (Ok(()), Some(password)) => hash_password_blocking(password).await.map(Some),
                (Ok(()), None) => Ok(None),
                (Err(e), _) => Err(e),
            };

            match password_hash {
                Ok(password_hash) => pending.push(PendingShortUrl {
                    original_url: row.original_url.trim().to_string(),
                    short_code: row.custom_code,
                    owner: row.owner,
                    tracking_enabled: row.tracking_enabled,
                    click_limit: row.click_limit,
                    password_hash,
                    is_private: row.is_private,
                    expires_at: row.expires_at,
                    created_at: now,
                }),
                Err(e) if mode == BatchMode::AllOrNothing => {
                    return Err(Error::validation(format!("row {index}: {e}")));
                }
                Err(e) => warn!(index, "skipping invalid row: {e}"),
            }
        }

        Ok(pending)
    }

    /// Inserts one chunk and gives every code-less row its generated code.
    /// The chunk is removed again when code assignment fails.
    async fn create_chunk(&self, chunk: &[PendingShortUrl], now: DateTime<Utc>) -> Result<Vec<ShortUrl>> {
        let inserted = self
            .storage
            .insert_many(chunk)
            .await
            .storage_context("insert_many", format!("{} rows", chunk.len()))?;

        match self.assign_codes(&inserted, now).await {
            Ok(assigned) => Ok(inserted
                .into_iter()
                .map(|mut url| {
                    if let Some(code) = assigned.get(&url.id) {
                        url.short_code = Some(code.clone());
                    }
                    url
                })
                .collect()),
            Err(e) => {
                let ids: Vec<i64> = inserted.iter().map(|url| url.id).collect();
                if let Err(cleanup) = self.storage.delete_many(&ids).await {
                    warn!("failed to remove rows after code assignment failure: {cleanup}");
                }
                Err(e)
            }
        }
    }

    async fn assign_codes(&self, inserted: &[ShortUrl], now: DateTime<Utc>) -> Result<HashMap<i64, String>> {
        let needs_code: Vec<&ShortUrl> = inserted.iter().filter(|url| url.short_code.is_none()).collect();
        if needs_code.is_empty() {
            return Ok(HashMap::new());
        }

        let primaries: Vec<String> = needs_code
            .iter()
            .map(|url| self.generator.primary(url.id as u64))
            .collect();
        let taken: HashSet<String> = self
            .storage
            .code_holders(&primaries)
            .await
            .storage_context("code_holders", format!("{} codes", primaries.len()))?
            .into_iter()
            .map(|(code, _)| code)
            .collect();

        let mut claimed: HashSet<String> = HashSet::with_capacity(needs_code.len());
        let mut assignments: Vec<(i64, String)> = Vec::with_capacity(needs_code.len());
        for (url, primary) in needs_code.into_iter().zip(primaries) {
            let code = if !taken.contains(&primary) && !claimed.contains(&primary) {
                primary
            } else {
                let lookup = BatchLookup {
                    storage: self.storage.as_ref(),
                    claimed: &claimed,
                };
                self.generator
                    .generate_at(url.id as u64, &url.original_url, &lookup, now)
                    .await?
                    .code
            };
            claimed.insert(code.clone());
            assignments.push((url.id, code));
        }

        self.storage
            .update_codes_many(&assignments, now)
            .await
            .storage_context("update_codes_many", format!("{} ids", assignments.len()))?;

        Ok(assignments.into_iter().collect())
    }

    fn record_usage(&self, created: &[ShortUrl], now: DateTime<Utc>) {
        for url in created {
            self.usage.record_creation(&url.owner.key(), now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_ids_keeps_first_occurrence() {
        assert_eq!(dedup_ids(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
        assert!(dedup_ids(&[]).is_empty());
    }
}
