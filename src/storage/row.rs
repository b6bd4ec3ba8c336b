//! Flat row shape shared by the SQL backends.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::StorageError;
use crate::models::{ClickLimit, Owner, ShortUrl};
use crate::ownership::OwnershipColumns;

#[derive(Debug, FromRow)]
pub(crate) struct ShortUrlRow {
    pub id: i64,
    pub original_url: String,
    pub short_code: Option<String>,
    pub owner_type: i32,
    pub user_id: Option<i64>,
    pub organization_id: Option<i64>,
    pub created_by_member_id: Option<i64>,
    pub anonymous_session_id: Option<String>,
    pub anonymous_ip: Option<String>,
    pub is_active: bool,
    pub tracking_enabled: bool,
    pub click_limit: i64,
    pub total_clicks: i64,
    pub password_hash: Option<String>,
    pub is_private: bool,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub version: i64,
}

impl TryFrom<ShortUrlRow> for ShortUrl {
    type Error = anyhow::Error;

    fn try_from(row: ShortUrlRow) -> anyhow::Result<Self> {
        let id = row.id;
        let owner = Owner::try_from(OwnershipColumns {
            owner_type: i16::try_from(row.owner_type).unwrap_or(i16::MIN),
            user_id: row.user_id,
            organization_id: row.organization_id,
            created_by_member_id: row.created_by_member_id,
            anonymous_session_id: row.anonymous_session_id,
            anonymous_ip: row.anonymous_ip,
        })
        .with_context(|| format!("short url {id} has corrupt ownership columns"))?;

        Ok(ShortUrl {
            id,
            original_url: row.original_url,
            short_code: row.short_code,
            owner,
            is_active: row.is_active,
            tracking_enabled: row.tracking_enabled,
            click_limit: ClickLimit::try_from(row.click_limit).map_err(|e| anyhow!(e))?,
            total_clicks: row.total_clicks,
            password_hash: row.password_hash,
            is_private: row.is_private,
            expires_at: row.expires_at.map(from_millis).transpose()?,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
            version: row.version,
        })
    }
}

pub(crate) fn into_models(rows: Vec<ShortUrlRow>) -> anyhow::Result<Vec<ShortUrl>> {
    rows.into_iter().map(ShortUrl::try_from).collect()
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp {ms} out of range"))
}

/// Classifies a write error: unique violations become [`StorageError::Conflict`].
pub(crate) fn map_write_error(err: sqlx::Error, subject: &str) -> StorageError {
    if let Some(db) = err.as_database_error() {
        if db.is_unique_violation() {
            return StorageError::Conflict(subject.to_string());
        }
    }
    StorageError::Other(err.into())
}
