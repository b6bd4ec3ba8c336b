use crate::models::{OwnerKey, SearchFilter, ShortUrl};
use crate::storage::{PendingShortUrl, Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Read-through cache in front of another storage.
///
/// Only lookups by code are cached (including misses). Clicks are never
/// buffered: every increment goes straight to the database so the click
/// limit stays exact, and the returned row refreshes the cache entry.
///
/// Every cache write bumps `generation`. A database read only fills the cache
/// if no write happened while it was in flight.
pub struct CachedStorage {
    inner: Arc<dyn Storage>,
    read_cache: Cache<String, Option<ShortUrl>>,
    generation: AtomicU64,
}

impl CachedStorage {
    pub fn new(inner: Arc<dyn Storage>, max_cache_entries: u64, ttl_secs: u64) -> Self {
        let read_cache = Cache::builder()
            .max_capacity(max_cache_entries)
            .time_to_live(Duration::from_secs(ttl_secs))
            .build();

        Self {
            inner,
            read_cache,
            generation: AtomicU64::new(0),
        }
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    async fn invalidate_cache(&self, short_code: &str) {
        self.bump_generation();
        self.read_cache.invalidate(short_code).await;
    }

    async fn cache_row(&self, url: &ShortUrl) {
        if let Some(code) = &url.short_code {
            self.bump_generation();
            self.read_cache
                .insert(code.clone(), Some(url.clone()))
                .await;
        }
    }

    /// Stores a value read from the database unless a write landed since
    /// `read_generation` was taken.
    async fn fill(&self, code: &str, value: Option<ShortUrl>, read_generation: u64) {
        if self.current_generation() == read_generation {
            self.read_cache.insert(code.to_string(), value).await;
        } else {
            tracing::debug!(code, "skipping cache fill after concurrent write");
        }
    }

    /// Bulk statements touch rows by id, so drop everything.
    fn invalidate_all(&self) {
        self.bump_generation();
        self.read_cache.invalidate_all();
    }
}

#[async_trait]
impl Storage for CachedStorage {
    async fn init(&self) -> Result<()> {
        self.inner.init().await
    }

    async fn insert(&self, url: &PendingShortUrl) -> StorageResult<ShortUrl> {
        let result = self.inner.insert(url).await?;
        self.cache_row(&result).await;
        Ok(result)
    }

    async fn insert_many(&self, urls: &[PendingShortUrl]) -> StorageResult<Vec<ShortUrl>> {
        let result = self.inner.insert_many(urls).await?;
        // Earlier misses for these codes must not linger
        for url in &result {
            if let Some(code) = &url.short_code {
                self.invalidate_cache(code).await;
            }
        }
        Ok(result)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ShortUrl>> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<ShortUrl>> {
        if let Some(cached) = self.read_cache.get(code).await {
            return Ok(cached);
        }

        let read_generation = self.current_generation();
        let result = self.inner.get_by_code(code).await?;
        self.fill(code, result.clone(), read_generation).await;

        Ok(result)
    }

    async fn get_by_code_authoritative(&self, code: &str) -> Result<Option<ShortUrl>> {
        let read_generation = self.current_generation();
        let db_value = self.inner.get_by_code_authoritative(code).await?;

        // Keep cache in sync with the latest database read
        self.fill(code, db_value.clone(), read_generation).await;

        Ok(db_value)
    }

    async fn code_exists(&self, code: &str) -> Result<bool> {
        self.inner.code_exists(code).await
    }

    async fn code_holders(&self, codes: &[String]) -> Result<Vec<(String, i64)>> {
        self.inner.code_holders(codes).await
    }

    async fn replace(&self, url: &ShortUrl, now: DateTime<Utc>) -> StorageResult<Option<ShortUrl>> {
        let result = self.inner.replace(url, now).await?;
        match &result {
            Some(updated) => self.cache_row(updated).await,
            None => {
                if let Some(code) = &url.short_code {
                    self.invalidate_cache(code).await;
                }
            }
        }
        Ok(result)
    }

    async fn update_code(
        &self,
        id: i64,
        code: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<ShortUrl>> {
        let previous = self.inner.get_by_id(id).await?;
        let result = self.inner.update_code(id, code, now).await?;

        if let Some(old_code) = previous.and_then(|url| url.short_code) {
            self.invalidate_cache(&old_code).await;
        }
        self.invalidate_cache(code).await;
        if let Some(updated) = &result {
            self.cache_row(updated).await;
        }

        Ok(result)
    }

    async fn delete_by_id(&self, id: i64) -> Result<Option<ShortUrl>> {
        let result = self.inner.delete_by_id(id).await?;
        if let Some(code) = result.as_ref().and_then(|url| url.short_code.as_deref()) {
            self.invalidate_cache(code).await;
        }
        Ok(result)
    }

    async fn delete_by_code(&self, code: &str) -> Result<bool> {
        let result = self.inner.delete_by_code(code).await?;
        self.invalidate_cache(code).await;
        Ok(result)
    }

    async fn record_click(&self, code: &str, now: DateTime<Utc>) -> Result<Option<ShortUrl>> {
        let result = self.inner.record_click(code, now).await?;
        match &result {
            Some(updated) => self.cache_row(updated).await,
            None => self.invalidate_cache(code).await,
        }
        Ok(result)
    }

    async fn search(
        &self,
        filter: &SearchFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ShortUrl>> {
        self.inner.search(filter, limit, offset).await
    }

    async fn count(&self, filter: &SearchFilter) -> Result<u64> {
        self.inner.count(filter).await
    }

    async fn duplicate_original_urls(
        &self,
        owner: Option<&OwnerKey>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>> {
        self.inner.duplicate_original_urls(owner, limit, offset).await
    }

    async fn count_duplicate_original_urls(&self, owner: Option<&OwnerKey>) -> Result<u64> {
        self.inner.count_duplicate_original_urls(owner).await
    }

    async fn find_by_original_urls(
        &self,
        urls: &[String],
        owner: Option<&OwnerKey>,
    ) -> Result<Vec<ShortUrl>> {
        self.inner.find_by_original_urls(urls, owner).await
    }

    async fn set_active_many(
        &self,
        ids: &[i64],
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let changed = self.inner.set_active_many(ids, active, now).await?;
        if changed > 0 {
            self.invalidate_all();
        }
        Ok(changed)
    }

    async fn set_expiration_many(
        &self,
        ids: &[i64],
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let changed = self.inner.set_expiration_many(ids, expires_at, now).await?;
        if changed > 0 {
            self.invalidate_all();
        }
        Ok(changed)
    }

    async fn delete_many(&self, ids: &[i64]) -> Result<u64> {
        let changed = self.inner.delete_many(ids).await?;
        if changed > 0 {
            self.invalidate_all();
        }
        Ok(changed)
    }

    async fn update_codes_many(
        &self,
        codes: &[(i64, String)],
        now: DateTime<Utc>,
    ) -> StorageResult<u64> {
        let changed = self.inner.update_codes_many(codes, now).await?;
        if changed > 0 {
            self.invalidate_all();
        }
        Ok(changed)
    }

    async fn delete_expired(&self, as_of: DateTime<Utc>) -> Result<u64> {
        let removed = self.inner.delete_expired(as_of).await?;
        if removed > 0 {
            self.invalidate_all();
        }
        Ok(removed)
    }
}
