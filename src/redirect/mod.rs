//! Resolution of short codes into redirect decisions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result, StorageContext};
use crate::models::{Blocked, ShortUrl};
use crate::password::verify_password_blocking;
use crate::storage::Storage;

/// What a redirect request resolves to. Business failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RedirectOutcome {
    Redirect { url: String },
    NotFound,
    Inactive,
    Expired,
    LimitReached,
    PasswordRequired,
    PasswordIncorrect,
}

impl RedirectOutcome {
    pub fn is_redirect(&self) -> bool {
        matches!(self, RedirectOutcome::Redirect { .. })
    }
}

impl From<Blocked> for RedirectOutcome {
    fn from(blocked: Blocked) -> Self {
        match blocked {
            Blocked::Inactive => RedirectOutcome::Inactive,
            Blocked::Expired => RedirectOutcome::Expired,
            Blocked::LimitReached => RedirectOutcome::LimitReached,
        }
    }
}

pub struct RedirectResolver {
    storage: Arc<dyn Storage>,
}

impl RedirectResolver {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    pub async fn resolve(&self, code: &str, credential: Option<&str>) -> Result<RedirectOutcome> {
        self.resolve_at(code, credential, Utc::now()).await
    }

    /// Checks run in a fixed order: existence, active flag, expiry, click
    /// limit, password. A successful redirect counts one click.
    pub async fn resolve_at(
        &self,
        code: &str,
        credential: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<RedirectOutcome> {
        let Some(url) = self.lookup(code).await? else {
            return Ok(RedirectOutcome::NotFound);
        };

        if let Some(blocked) = url.blocked_at(now) {
            debug!(code, ?blocked, "redirect blocked");
            return Ok(blocked.into());
        }

        if let Some(hash) = &url.password_hash {
            let Some(password) = credential else {
                return Ok(RedirectOutcome::PasswordRequired);
            };
            if !verify_password_blocking(password.to_string(), hash.clone()).await {
                return Ok(RedirectOutcome::PasswordIncorrect);
            }
        }

        let clicked = self
            .storage
            .record_click(code, now)
            .await
            .storage_context("record_click", code)?;

        match clicked {
            Some(updated) => Ok(RedirectOutcome::Redirect {
                url: updated.original_url,
            }),
            None => self.explain_lost_race(code, now).await,
        }
    }

    /// The conditional increment matched nothing; report what changed.
    async fn explain_lost_race(&self, code: &str, now: DateTime<Utc>) -> Result<RedirectOutcome> {
        let current = self
            .storage
            .get_by_code_authoritative(code)
            .await
            .storage_context("get_by_code", code)?;

        let outcome = match current {
            None => RedirectOutcome::NotFound,
            Some(url) => match url.blocked_at(now) {
                Some(blocked) => blocked.into(),
                None => {
                    warn!(code, "click rejected for a link that reads as valid");
                    RedirectOutcome::LimitReached
                }
            },
        };
        debug!(code, ?outcome, "lost redirect race");
        Ok(outcome)
    }

    async fn lookup(&self, code: &str) -> Result<Option<ShortUrl>> {
        self.storage
            .get_by_code(code)
            .await
            .storage_context("get_by_code", code)
    }

    async fn require(&self, code: &str) -> Result<ShortUrl> {
        self.lookup(code)
            .await?
            .ok_or_else(|| Error::short_url_not_found(code))
    }

    pub async fn is_active(&self, code: &str) -> Result<bool> {
        Ok(self.require(code).await?.is_active)
    }

    pub async fn is_valid(&self, code: &str) -> Result<bool> {
        self.is_valid_at(code, Utc::now()).await
    }

    pub async fn is_valid_at(&self, code: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.require(code).await?.is_valid_at(now))
    }

    pub async fn is_click_limit_reached(&self, code: &str) -> Result<bool> {
        Ok(self.require(code).await?.is_click_limit_reached())
    }

    pub async fn is_password_protected(&self, code: &str) -> Result<bool> {
        Ok(self.require(code).await?.is_password_protected())
    }

    /// `false` for unprotected links and wrong passwords alike.
    pub async fn verify_password(&self, code: &str, password: &str) -> Result<bool> {
        let url = self.require(code).await?;
        match url.password_hash {
            Some(hash) => Ok(verify_password_blocking(password.to_string(), hash).await),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocked_maps_to_outcome() {
        assert_eq!(RedirectOutcome::from(Blocked::Inactive), RedirectOutcome::Inactive);
        assert_eq!(RedirectOutcome::from(Blocked::Expired), RedirectOutcome::Expired);
        assert_eq!(
            RedirectOutcome::from(Blocked::LimitReached),
            RedirectOutcome::LimitReached
        );
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let json = serde_json::to_value(RedirectOutcome::Redirect {
            url: "https://example.com".to_string(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "redirect");
        assert_eq!(json["url"], "https://example.com");
    }
}
