use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{OwnerKey, ShortUrl};

/// Conjunction of optional predicates over short URLs. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilter {
    pub owner: Option<OwnerKey>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    /// Rows whose expiry is at or before this instant.
    pub expired_as_of: Option<DateTime<Utc>>,
    /// Rows with a finite limit and `total_clicks >= fraction * click_limit`.
    pub approaching_limit: Option<f64>,
    /// Rows with no recorded clicks.
    pub unused: bool,
    /// Rows created strictly before this instant.
    pub created_before: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
}

impl SearchFilter {
    pub fn owned_by(owner: OwnerKey) -> Self {
        Self {
            owner: Some(owner),
            ..Self::default()
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.page_size))
    }
}

/// Short URLs sharing one original URL.
#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    pub original_url: String,
    pub urls: Vec<ShortUrl>,
}
