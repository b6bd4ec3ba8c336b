//! Single-entity operations on short URLs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::codegen::{CodeGenerator, CodePolicy};
use crate::config::CodeConfig;
use crate::error::{ConflictKind, Error, Result, StorageContext};
use crate::models::{NewShortUrl, ShortUrl};
use crate::ownership::validate_owner;
use crate::password::hash_password_blocking;
use crate::storage::{PendingShortUrl, Storage};
use crate::usage::{InMemoryUsageCounters, UsageCounters};
use crate::validation::{validate_click_limit, validate_new, validate_original_url};

/// Generated-code assignments retried after losing a uniqueness race.
const MAX_ASSIGN_ATTEMPTS: usize = 3;

pub struct ShortUrlStore {
    storage: Arc<dyn Storage>,
    generator: CodeGenerator,
    policy: CodePolicy,
    usage: Arc<dyn UsageCounters>,
}

impl ShortUrlStore {
    pub fn new(storage: Arc<dyn Storage>, codes: &CodeConfig) -> Self {
        Self::with_usage(storage, codes, Arc::new(InMemoryUsageCounters::new()))
    }

    pub fn with_usage(
        storage: Arc<dyn Storage>,
        codes: &CodeConfig,
        usage: Arc<dyn UsageCounters>,
    ) -> Self {
        Self {
            storage,
            generator: CodeGenerator::from_config(codes),
            policy: CodePolicy::from_config(codes),
            usage,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn usage(&self) -> &Arc<dyn UsageCounters> {
        &self.usage
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<ShortUrl>> {
        self.storage.get_by_id(id).await.storage_context("get_by_id", id)
    }

    pub async fn get_by_code(&self, code: &str) -> Result<Option<ShortUrl>> {
        self.storage
            .get_by_code(code)
            .await
            .storage_context("get_by_code", code)
    }

    pub async fn code_exists(&self, code: &str) -> Result<bool> {
        self.storage
            .code_exists(code)
            .await
            .storage_context("code_exists", code)
    }

    pub async fn add(&self, input: NewShortUrl) -> Result<ShortUrl> {
        self.add_at(input, Utc::now()).await
    }

    /// Creates a short URL.
    ///
    /// Without a custom code the row is inserted first and its code is derived
    /// from the assigned id.
    pub async fn add_at(&self, input: NewShortUrl, now: DateTime<Utc>) -> Result<ShortUrl> {
        validate_new(&input, &self.policy, now)?;

        if let Some(code) = &input.custom_code {
            if self.code_exists(code).await? {
                return Err(ConflictKind::CodeTaken(code.clone()).into());
            }
        }

        let password_hash = match input.password.clone() {
            Some(password) => Some(hash_password_blocking(password).await?),
            None => None,
        };
        let pending = PendingShortUrl {
            original_url: input.original_url.trim().to_string(),
            short_code: input.custom_code.clone(),
            owner: input.owner,
            tracking_enabled: input.tracking_enabled,
            click_limit: input.click_limit,
            password_hash,
            is_private: input.is_private,
            expires_at: input.expires_at,
            created_at: now,
        };

        let inserted = self
            .storage
            .insert(&pending)
            .await
            .storage_context("insert", &pending.original_url)?;

        let stored = if inserted.short_code.is_some() {
            inserted
        } else {
            self.assign_generated_code(inserted, now).await?
        };

        self.usage.record_creation(&stored.owner.key(), now);
        info!(
            id = stored.id,
            code = stored.short_code.as_deref().unwrap_or_default(),
            owner = %stored.owner.key(),
            "created short url"
        );
        Ok(stored)
    }

    /// Gives a freshly inserted row its generated code. On any failure the
    /// row is deleted again so no code-less row outlives the call.
    async fn assign_generated_code(&self, inserted: ShortUrl, now: DateTime<Utc>) -> Result<ShortUrl> {
        let id = inserted.id;
        match self.try_assign_code(&inserted, now).await {
            Ok(url) => Ok(url),
            Err(e) => {
                if let Err(cleanup) = self.storage.delete_by_id(id).await {
                    warn!(id, "failed to remove row without code: {cleanup}");
                }
                Err(e)
            }
        }
    }

    async fn try_assign_code(&self, inserted: &ShortUrl, now: DateTime<Utc>) -> Result<ShortUrl> {
        let seed = inserted.id as u64;
        for attempt in 1..=MAX_ASSIGN_ATTEMPTS {
            let generated = self
                .generator
                .generate_at(seed, &inserted.original_url, self.storage.as_ref(), now)
                .await?;

            match self
                .storage
                .update_code(inserted.id, &generated.code, now)
                .await
                .storage_context("update_code", inserted.id)
            {
                Ok(Some(url)) => {
                    debug!(id = url.id, tier = ?generated.tier, "assigned generated code");
                    return Ok(url);
                }
                Ok(None) => return Err(Error::short_url_not_found(inserted.id)),
                Err(Error::Conflict(ConflictKind::CodeTaken(code))) => {
                    warn!(id = inserted.id, code = %code, attempt, "lost race for generated code");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Storage {
            operation: "assign_code",
            target: inserted.id.to_string(),
            source: anyhow::anyhow!("no free code after {MAX_ASSIGN_ATTEMPTS} attempts"),
        })
    }

    pub async fn update(&self, url: &ShortUrl) -> Result<ShortUrl> {
        self.update_at(url, Utc::now()).await
    }

    /// Replaces every mutable field except the code and the click count, if
    /// nobody changed the row since `url` was read.
    pub async fn update_at(&self, url: &ShortUrl, now: DateTime<Utc>) -> Result<ShortUrl> {
        validate_original_url(&url.original_url)?;
        validate_click_limit(url.click_limit)?;
        validate_owner(&url.owner)?;

        let replaced = self
            .storage
            .replace(url, now)
            .await
            .storage_context("replace", url.id)?;

        match replaced {
            Some(updated) => Ok(updated),
            None => match self.get_by_id(url.id).await? {
                Some(current) => {
                    warn!(
                        id = url.id,
                        expected = url.version,
                        actual = current.version,
                        "rejected stale update"
                    );
                    Err(ConflictKind::StaleVersion {
                        id: url.id,
                        expected: url.version,
                    }
                    .into())
                }
                None => Err(Error::short_url_not_found(url.id)),
            },
        }
    }

    pub async fn update_code(&self, id: i64, code: &str) -> Result<ShortUrl> {
        self.update_code_at(id, code, Utc::now()).await
    }

    pub async fn update_code_at(&self, id: i64, code: &str, now: DateTime<Utc>) -> Result<ShortUrl> {
        self.policy.check_shape(code)?;

        let updated = self
            .storage
            .update_code(id, code, now)
            .await
            .storage_context("update_code", id)?;

        updated.ok_or_else(|| Error::short_url_not_found(id))
    }

    pub async fn delete_by_id(&self, id: i64) -> Result<bool> {
        let deleted = self
            .storage
            .delete_by_id(id)
            .await
            .storage_context("delete_by_id", id)?;
        Ok(deleted.is_some())
    }

    pub async fn delete_by_code(&self, code: &str) -> Result<bool> {
        self.storage
            .delete_by_code(code)
            .await
            .storage_context("delete_by_code", code)
    }
}
