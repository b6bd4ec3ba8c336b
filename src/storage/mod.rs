/// Column list selected and returned by every row-producing statement.
macro_rules! short_url_columns {
    () => {
        "id, original_url, short_code, owner_type, user_id, organization_id, \
         created_by_member_id, anonymous_session_id, anonymous_ip, is_active, \
         tracking_enabled, click_limit, total_clicks, password_hash, is_private, \
         expires_at, created_at, updated_at, version"
    };
}

/// Columns written on insert, in bind order.
macro_rules! insert_columns {
    () => {
        "original_url, short_code, owner_type, user_id, organization_id, \
         created_by_member_id, anonymous_session_id, anonymous_ip, is_active, \
         tracking_enabled, click_limit, total_clicks, is_password_protected, \
         password_hash, is_private, expires_at, created_at, updated_at, version"
    };
}

pub mod cached;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

mod row;

pub use cached::CachedStorage;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{PendingShortUrl, Storage, StorageError, StorageResult};

use std::sync::Arc;
use tracing::info;

use crate::config::{CacheConfig, DatabaseBackend, DatabaseConfig};

/// Connects the configured backend, creates the schema and wraps it in the
/// read cache when enabled.
pub async fn open_storage(
    database: &DatabaseConfig,
    cache: &CacheConfig,
) -> anyhow::Result<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", database.url);
            Arc::new(SqliteStorage::new(&database.url, database.max_connections).await?)
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            Arc::new(PostgresStorage::new(&database.url, database.max_connections).await?)
        }
    };

    storage.init().await?;
    info!("Database initialized successfully");

    if cache.enabled {
        info!(
            max_entries = cache.max_entries,
            ttl_secs = cache.ttl_secs,
            "Read cache enabled"
        );
        Ok(Arc::new(CachedStorage::new(
            storage,
            cache.max_entries,
            cache.ttl_secs,
        )))
    } else {
        Ok(storage)
    }
}
