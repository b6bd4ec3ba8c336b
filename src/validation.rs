//! Input checks shared by single and bulk creation.

use chrono::{DateTime, Utc};
use url::Url;

use crate::codegen::CodePolicy;
use crate::error::{Error, Result};
use crate::models::{ClickLimit, NewShortUrl};
use crate::ownership::validate_owner;

const MAX_URL_LEN: usize = 2048;

/// Only absolute `http`/`https` URLs with a host are accepted.
pub fn validate_original_url(url: &str) -> Result<()> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(Error::validation("original URL cannot be empty"));
    }
    if trimmed.len() > MAX_URL_LEN {
        return Err(Error::validation(format!(
            "original URL exceeds {MAX_URL_LEN} characters"
        )));
    }

    let parsed =
        Url::parse(trimmed).map_err(|e| Error::validation(format!("invalid URL format: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::validation(format!(
                "invalid protocol: {other}. Only http and https are allowed"
            )))
        }
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::validation("original URL must have a host"));
    }

    Ok(())
}

pub fn validate_click_limit(limit: ClickLimit) -> Result<()> {
    match limit {
        ClickLimit::Max(n) if n < 0 => Err(Error::validation(format!(
            "click limit must be -1 or non-negative, got {n}"
        ))),
        _ => Ok(()),
    }
}

/// Compared at millisecond precision, the resolution expiry is stored at.
pub fn validate_expiry(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<()> {
    match expires_at {
        Some(at) if at.timestamp_millis() <= now.timestamp_millis() => {
            Err(Error::validation("expiry must be in the future"))
        }
        _ => Ok(()),
    }
}

/// Everything about a creation request that can be checked without storage.
pub fn validate_new(input: &NewShortUrl, policy: &CodePolicy, now: DateTime<Utc>) -> Result<()> {
    validate_original_url(&input.original_url)?;
    validate_click_limit(input.click_limit)?;
    validate_expiry(input.expires_at, now)?;
    validate_owner(&input.owner)?;
    if let Some(code) = &input.custom_code {
        policy.check_custom(code)?;
    }
    if matches!(&input.password, Some(p) if p.is_empty()) {
        return Err(Error::validation("password cannot be empty"));
    }
    Ok(())
}
