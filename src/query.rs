//! Filtered, paginated reads.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result, StorageContext};
use crate::models::{DuplicateGroup, OwnerKey, Page, SearchFilter, ShortUrl};
use crate::storage::Storage;

pub const MAX_PAGE_SIZE: u32 = 1000;

pub struct QueryEngine {
    storage: Arc<dyn Storage>,
}

/// Pages are 1-based; out-of-range values are rejected rather than clamped.
fn page_window(page: u32, page_size: u32) -> Result<(i64, i64)> {
    if page < 1 {
        return Err(Error::validation("page must be at least 1"));
    }
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(Error::validation(format!(
            "page_size must be in [1..{MAX_PAGE_SIZE}], got {page_size}"
        )));
    }
    let limit = i64::from(page_size);
    Ok((limit, (i64::from(page) - 1) * limit))
}

impl QueryEngine {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Newest first (`created_at`, then id, descending).
    pub async fn search(
        &self,
        filter: &SearchFilter,
        page: u32,
        page_size: u32,
    ) -> Result<Page<ShortUrl>> {
        let (limit, offset) = page_window(page, page_size)?;
        if let Some(fraction) = filter.approaching_limit {
            if !(fraction > 0.0 && fraction <= 1.0) {
                return Err(Error::validation(format!(
                    "click limit threshold must be in (0, 1], got {fraction}"
                )));
            }
        }
        if let (Some(from), Some(to)) = (filter.created_from, filter.created_to) {
            if from > to {
                return Err(Error::validation("created range start is after its end"));
            }
        }

        let items = self
            .storage
            .search(filter, limit, offset)
            .await
            .storage_context("search", page)?;
        let total = self
            .storage
            .count(filter)
            .await
            .storage_context("count", page)?;

        Ok(Page {
            items,
            page,
            page_size,
            total,
        })
    }

    pub async fn by_user(&self, user_id: i64, page: u32, page_size: u32) -> Result<Page<ShortUrl>> {
        self.search(&SearchFilter::owned_by(OwnerKey::User(user_id)), page, page_size)
            .await
    }

    pub async fn by_organization(
        &self,
        organization_id: i64,
        page: u32,
        page_size: u32,
    ) -> Result<Page<ShortUrl>> {
        let filter = SearchFilter::owned_by(OwnerKey::Organization(organization_id));
        self.search(&filter, page, page_size).await
    }

    pub async fn by_anonymous_session(
        &self,
        session_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Page<ShortUrl>> {
        let filter = SearchFilter::owned_by(OwnerKey::Anonymous(session_id.to_string()));
        self.search(&filter, page, page_size).await
    }

    /// Both bounds inclusive.
    pub async fn created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<ShortUrl>> {
        let filter = SearchFilter {
            created_from: Some(from),
            created_to: Some(to),
            ..SearchFilter::default()
        };
        self.search(&filter, page, page_size).await
    }

    pub async fn expired_as_of(
        &self,
        as_of: DateTime<Utc>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<ShortUrl>> {
        let filter = SearchFilter {
            expired_as_of: Some(as_of),
            ..SearchFilter::default()
        };
        self.search(&filter, page, page_size).await
    }

    /// Links with a finite limit whose clicks reached `threshold` of it.
    pub async fn approaching_click_limit(
        &self,
        threshold: f64,
        page: u32,
        page_size: u32,
    ) -> Result<Page<ShortUrl>> {
        let filter = SearchFilter {
            approaching_limit: Some(threshold),
            ..SearchFilter::default()
        };
        self.search(&filter, page, page_size).await
    }

    /// Links never clicked, optionally only those created before `older_than`.
    pub async fn unused(
        &self,
        older_than: Option<DateTime<Utc>>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<ShortUrl>> {
        let filter = SearchFilter {
            unused: true,
            created_before: older_than,
            ..SearchFilter::default()
        };
        self.search(&filter, page, page_size).await
    }

    /// Groups of links sharing an original URL, ordered by that URL.
    ///
    /// Pagination applies to groups. Only the keys on the requested page are
    /// expanded into rows.
    pub async fn duplicates(
        &self,
        owner: Option<&OwnerKey>,
        page: u32,
        page_size: u32,
    ) -> Result<Page<DuplicateGroup>> {
        let (limit, offset) = page_window(page, page_size)?;

        let keys = self
            .storage
            .duplicate_original_urls(owner, limit, offset)
            .await
            .storage_context("duplicate_original_urls", page)?;
        let total = self
            .storage
            .count_duplicate_original_urls(owner)
            .await
            .storage_context("count_duplicate_original_urls", page)?;

        let rows = self
            .storage
            .find_by_original_urls(&keys, owner)
            .await
            .storage_context("find_by_original_urls", keys.len())?;

        let mut by_url: HashMap<String, Vec<ShortUrl>> = HashMap::new();
        for row in rows {
            by_url.entry(row.original_url.clone()).or_default().push(row);
        }

        let items = keys
            .into_iter()
            .map(|original_url| {
                let urls = by_url.remove(&original_url).unwrap_or_default();
                DuplicateGroup { original_url, urls }
            })
            .collect();

        Ok(Page {
            items,
            page,
            page_size,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_window() {
        assert_eq!(page_window(1, 20).unwrap(), (20, 0));
        assert_eq!(page_window(3, 20).unwrap(), (20, 40));
        assert_eq!(page_window(1, MAX_PAGE_SIZE).unwrap(), (1000, 0));
    }

    #[test]
    fn test_page_window_rejects_out_of_range() {
        assert!(page_window(0, 20).unwrap_err().is_validation());
        assert!(page_window(1, 0).unwrap_err().is_validation());
        assert!(page_window(1, MAX_PAGE_SIZE + 1)
            .unwrap_err()
            .is_validation());
    }
}
