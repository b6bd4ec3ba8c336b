use crate::codegen::CodeLookup;
use crate::models::{ClickLimit, Owner, OwnerKey, SearchFilter, ShortUrl};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("short code already exists: {0}")]
    Conflict(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A validated short URL ready to be inserted. `short_code` is `None` when the
/// code is generated from the id assigned on insert.
#[derive(Debug, Clone)]
pub struct PendingShortUrl {
    pub original_url: String,
    pub short_code: Option<String>,
    pub owner: Owner,
    pub tracking_enabled: bool,
    pub click_limit: ClickLimit,
    pub password_hash: Option<String>,
    pub is_private: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables, constraints and indexes)
    async fn init(&self) -> Result<()>;

    /// Insert one short URL and return it with its assigned id
    async fn insert(&self, url: &PendingShortUrl) -> StorageResult<ShortUrl>;

    /// Insert many short URLs with a single multi-row statement
    async fn insert_many(&self, urls: &[PendingShortUrl]) -> StorageResult<Vec<ShortUrl>>;

    async fn get_by_id(&self, id: i64) -> Result<Option<ShortUrl>>;

    /// Get a short URL by code. Caching layers may answer this from memory.
    async fn get_by_code(&self, code: &str) -> Result<Option<ShortUrl>>;

    /// Get a short URL by code, always reading the backing database
    async fn get_by_code_authoritative(&self, code: &str) -> Result<Option<ShortUrl>> {
        self.get_by_code(code).await
    }

    /// Fresh existence check; never served from a cache
    async fn code_exists(&self, code: &str) -> Result<bool>;

    /// Which of `codes` are assigned, with the id holding each
    async fn code_holders(&self, codes: &[String]) -> Result<Vec<(String, i64)>>;

    /// Replace every mutable column except the short code and click count,
    /// if `url.version` still matches. Returns `None` when no row matched.
    async fn replace(&self, url: &ShortUrl, now: DateTime<Utc>) -> StorageResult<Option<ShortUrl>>;

    /// Set only the short code (and bump `updated_at`/`version`)
    async fn update_code(
        &self,
        id: i64,
        code: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<ShortUrl>>;

    /// Delete by id, returning the deleted row
    async fn delete_by_id(&self, id: i64) -> Result<Option<ShortUrl>>;

    async fn delete_by_code(&self, code: &str) -> Result<bool>;

    /// Increment the click counter only if the link is still active, unexpired
    /// and under its limit at `now`. Returns the updated row on success.
    async fn record_click(&self, code: &str, now: DateTime<Utc>) -> Result<Option<ShortUrl>>;

    /// Filtered listing, newest first
    async fn search(&self, filter: &SearchFilter, limit: i64, offset: i64)
        -> Result<Vec<ShortUrl>>;

    async fn count(&self, filter: &SearchFilter) -> Result<u64>;

    /// Original URLs that appear on more than one row, ordered by URL
    async fn duplicate_original_urls(
        &self,
        owner: Option<&OwnerKey>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>>;

    async fn count_duplicate_original_urls(&self, owner: Option<&OwnerKey>) -> Result<u64>;

    /// Rows for the given original URLs, ordered by URL then id
    async fn find_by_original_urls(
        &self,
        urls: &[String],
        owner: Option<&OwnerKey>,
    ) -> Result<Vec<ShortUrl>>;

    /// Set `is_active` on rows not already in that state; returns rows changed
    async fn set_active_many(&self, ids: &[i64], active: bool, now: DateTime<Utc>)
        -> Result<u64>;

    /// Set `expires_at` on rows whose expiry differs; returns rows changed
    async fn set_expiration_many(
        &self,
        ids: &[i64],
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<u64>;

    async fn delete_many(&self, ids: &[i64]) -> Result<u64>;

    /// Apply per-id codes in one `CASE` statement; returns rows changed
    async fn update_codes_many(
        &self,
        codes: &[(i64, String)],
        now: DateTime<Utc>,
    ) -> StorageResult<u64>;

    /// Delete rows with `expires_at <= as_of`
    async fn delete_expired(&self, as_of: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
impl<S: Storage + ?Sized> CodeLookup for S {
    async fn is_taken(&self, code: &str) -> Result<bool> {
        self.code_exists(code).await
    }
}
