use crate::models::{OwnerKey, SearchFilter, ShortUrl};
use crate::ownership::OwnershipColumns;
use crate::storage::row::{into_models, map_write_error, to_millis, ShortUrlRow};
use crate::storage::{PendingShortUrl, Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Underlying pool, for maintenance statements outside the trait
    pub fn pool(&self) -> &SqlitePool {
        self.pool.as_ref()
    }
}

/// Appends `AND` clauses for every set predicate.
fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &SearchFilter) {
    builder.push(" WHERE 1 = 1");

    if let Some(owner) = &filter.owner {
        push_owner(builder, owner);
    }
    if let Some(from) = filter.created_from {
        builder.push(" AND created_at >= ").push_bind(to_millis(from));
    }
    if let Some(to) = filter.created_to {
        builder.push(" AND created_at <= ").push_bind(to_millis(to));
    }
    if let Some(before) = filter.created_before {
        builder.push(" AND created_at < ").push_bind(to_millis(before));
    }
    if let Some(as_of) = filter.expired_as_of {
        builder
            .push(" AND expires_at IS NOT NULL AND expires_at <= ")
            .push_bind(to_millis(as_of));
    }
    if let Some(fraction) = filter.approaching_limit {
        builder
            .push(" AND click_limit > 0 AND CAST(total_clicks AS REAL) >= CAST(click_limit AS REAL) * ")
            .push_bind(fraction);
    }
    if filter.unused {
        builder.push(" AND total_clicks = 0");
    }
    if let Some(active) = filter.is_active {
        builder.push(" AND is_active = ").push_bind(active);
    }
}

fn push_owner(builder: &mut QueryBuilder<'_, Sqlite>, owner: &OwnerKey) {
    match owner {
        OwnerKey::User(user_id) => {
            builder
                .push(" AND owner_type = 0 AND user_id = ")
                .push_bind(*user_id);
        }
        OwnerKey::Organization(organization_id) => {
            builder
                .push(" AND owner_type = 1 AND organization_id = ")
                .push_bind(*organization_id);
        }
        OwnerKey::Anonymous(session_id) => {
            builder
                .push(" AND owner_type = 2 AND anonymous_session_id = ")
                .push_bind(session_id.clone());
        }
    }
}

fn push_id_list(builder: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    builder.push(" id IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        // Ownership, click limit and password flag are enforced by CHECK
        // constraints so raw or bulk writes cannot bypass them.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS short_urls (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                original_url TEXT NOT NULL,
                short_code TEXT UNIQUE,
                owner_type INTEGER NOT NULL,
                user_id INTEGER,
                organization_id INTEGER,
                created_by_member_id INTEGER,
                anonymous_session_id TEXT,
                anonymous_ip TEXT,
                is_active BOOLEAN NOT NULL DEFAULT 1,
                tracking_enabled BOOLEAN NOT NULL DEFAULT 1,
                click_limit INTEGER NOT NULL DEFAULT -1,
                total_clicks INTEGER NOT NULL DEFAULT 0,
                is_password_protected BOOLEAN NOT NULL DEFAULT 0,
                password_hash TEXT,
                is_private BOOLEAN NOT NULL DEFAULT 0,
                expires_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                CHECK (click_limit >= -1),
                CHECK (total_clicks >= 0),
                CHECK ((is_password_protected = 1) = (password_hash IS NOT NULL)),
                CHECK (
                    (owner_type = 0 AND user_id IS NOT NULL AND organization_id IS NULL
                        AND created_by_member_id IS NULL AND anonymous_session_id IS NULL
                        AND anonymous_ip IS NULL)
                    OR (owner_type = 1 AND organization_id IS NOT NULL
                        AND created_by_member_id IS NOT NULL AND user_id IS NULL
                        AND anonymous_session_id IS NULL AND anonymous_ip IS NULL)
                    OR (owner_type = 2 AND anonymous_session_id IS NOT NULL
                        AND user_id IS NULL AND organization_id IS NULL
                        AND created_by_member_id IS NULL)
                )
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_short_urls_user ON short_urls(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_short_urls_organization ON short_urls(organization_id)",
            "CREATE INDEX IF NOT EXISTS idx_short_urls_session ON short_urls(anonymous_session_id)",
            "CREATE INDEX IF NOT EXISTS idx_short_urls_created_at ON short_urls(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_short_urls_expires_at ON short_urls(expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_short_urls_original_url ON short_urls(original_url)",
        ] {
            sqlx::query(statement).execute(self.pool.as_ref()).await?;
        }

        Ok(())
    }

    async fn insert(&self, url: &PendingShortUrl) -> StorageResult<ShortUrl> {
        let columns = OwnershipColumns::from(&url.owner);
        let created_at = to_millis(url.created_at);

        let row = sqlx::query_as::<_, ShortUrlRow>(concat!(
            "INSERT INTO short_urls (",
            insert_columns!(),
            ") VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, 0, ?, ?, ?, ?, ?, ?, 0) RETURNING ",
            short_url_columns!()
        ))
        .bind(&url.original_url)
        .bind(&url.short_code)
        .bind(i32::from(columns.owner_type))
        .bind(columns.user_id)
        .bind(columns.organization_id)
        .bind(columns.created_by_member_id)
        .bind(columns.anonymous_session_id)
        .bind(columns.anonymous_ip)
        .bind(url.tracking_enabled)
        .bind(i64::from(url.click_limit))
        .bind(url.password_hash.is_some())
        .bind(&url.password_hash)
        .bind(url.is_private)
        .bind(url.expires_at.map(to_millis))
        .bind(created_at)
        .bind(created_at)
        .fetch_one(self.pool.as_ref())
        .await
        .map_err(|e| map_write_error(e, url.short_code.as_deref().unwrap_or("<pending>")))?;

        Ok(ShortUrl::try_from(row)?)
    }

    async fn insert_many(&self, urls: &[PendingShortUrl]) -> StorageResult<Vec<ShortUrl>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(concat!(
            "INSERT INTO short_urls (",
            insert_columns!(),
            ") "
        ));
        builder.push_values(urls, |mut values, url| {
            let columns = OwnershipColumns::from(&url.owner);
            let created_at = to_millis(url.created_at);
            values
                .push_bind(url.original_url.clone())
                .push_bind(url.short_code.clone())
                .push_bind(i32::from(columns.owner_type))
                .push_bind(columns.user_id)
                .push_bind(columns.organization_id)
                .push_bind(columns.created_by_member_id)
                .push_bind(columns.anonymous_session_id)
                .push_bind(columns.anonymous_ip)
                .push_bind(true)
                .push_bind(url.tracking_enabled)
                .push_bind(i64::from(url.click_limit))
                .push_bind(0i64)
                .push_bind(url.password_hash.is_some())
                .push_bind(url.password_hash.clone())
                .push_bind(url.is_private)
                .push_bind(url.expires_at.map(to_millis))
                .push_bind(created_at)
                .push_bind(created_at)
                .push_bind(0i64);
        });
        builder.push(concat!(" RETURNING ", short_url_columns!()));

        let rows = builder
            .build_query_as::<ShortUrlRow>()
            .fetch_all(self.pool.as_ref())
            .await
            .map_err(|e| map_write_error(e, "bulk insert"))?;

        let mut urls = into_models(rows)?;
        urls.sort_by_key(|url| url.id);
        Ok(urls)
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<ShortUrl>> {
        let row = sqlx::query_as::<_, ShortUrlRow>(concat!(
            "SELECT ",
            short_url_columns!(),
            " FROM short_urls WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(ShortUrl::try_from).transpose()
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<ShortUrl>> {
        let row = sqlx::query_as::<_, ShortUrlRow>(concat!(
            "SELECT ",
            short_url_columns!(),
            " FROM short_urls WHERE short_code = ?"
        ))
        .bind(code)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(ShortUrl::try_from).transpose()
    }

    async fn code_exists(&self, code: &str) -> Result<bool> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM short_urls WHERE short_code = ?")
            .bind(code)
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(count.0 > 0)
    }

    async fn code_holders(&self, codes: &[String]) -> Result<Vec<(String, i64)>> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT short_code, id FROM short_urls WHERE short_code IN (");
        let mut separated = builder.separated(", ");
        for code in codes {
            separated.push_bind(code.clone());
        }
        separated.push_unseparated(")");

        let holders = builder
            .build_query_as::<(String, i64)>()
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(holders)
    }

    async fn replace(&self, url: &ShortUrl, now: DateTime<Utc>) -> StorageResult<Option<ShortUrl>> {
        let columns = OwnershipColumns::from(&url.owner);

        let row = sqlx::query_as::<_, ShortUrlRow>(concat!(
            r#"
            UPDATE short_urls
            SET original_url = ?, owner_type = ?, user_id = ?, organization_id = ?,
                created_by_member_id = ?, anonymous_session_id = ?, anonymous_ip = ?,
                is_active = ?, tracking_enabled = ?, click_limit = ?,
                is_password_protected = ?, password_hash = ?, is_private = ?,
                expires_at = ?, updated_at = ?, version = version + 1
            WHERE id = ? AND version = ?
            RETURNING "#,
            short_url_columns!()
        ))
        .bind(&url.original_url)
        .bind(i32::from(columns.owner_type))
        .bind(columns.user_id)
        .bind(columns.organization_id)
        .bind(columns.created_by_member_id)
        .bind(columns.anonymous_session_id)
        .bind(columns.anonymous_ip)
        .bind(url.is_active)
        .bind(url.tracking_enabled)
        .bind(i64::from(url.click_limit))
        .bind(url.password_hash.is_some())
        .bind(&url.password_hash)
        .bind(url.is_private)
        .bind(url.expires_at.map(to_millis))
        .bind(to_millis(now))
        .bind(url.id)
        .bind(url.version)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| map_write_error(e, url.short_code.as_deref().unwrap_or_default()))?;

        Ok(row.map(ShortUrl::try_from).transpose()?)
    }

    async fn update_code(
        &self,
        id: i64,
        code: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<ShortUrl>> {
        let row = sqlx::query_as::<_, ShortUrlRow>(concat!(
            r#"
            UPDATE short_urls
            SET short_code = ?, updated_at = ?, version = version + 1
            WHERE id = ?
            RETURNING "#,
            short_url_columns!()
        ))
        .bind(code)
        .bind(to_millis(now))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|e| map_write_error(e, code))?;

        Ok(row.map(ShortUrl::try_from).transpose()?)
    }

    async fn delete_by_id(&self, id: i64) -> Result<Option<ShortUrl>> {
        let row = sqlx::query_as::<_, ShortUrlRow>(concat!(
            "DELETE FROM short_urls WHERE id = ? RETURNING ",
            short_url_columns!()
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(ShortUrl::try_from).transpose()
    }

    async fn delete_by_code(&self, code: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM short_urls WHERE short_code = ?")
            .bind(code)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_click(&self, code: &str, now: DateTime<Utc>) -> Result<Option<ShortUrl>> {
        let now = to_millis(now);

        // Validity is re-checked in the same statement that increments
        let row = sqlx::query_as::<_, ShortUrlRow>(concat!(
            r#"
            UPDATE short_urls
            SET total_clicks = total_clicks + 1, updated_at = ?, version = version + 1
            WHERE short_code = ?
              AND is_active = 1
              AND (expires_at IS NULL OR expires_at > ?)
              AND (click_limit = -1 OR total_clicks < click_limit)
            RETURNING "#,
            short_url_columns!()
        ))
        .bind(now)
        .bind(code)
        .bind(now)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(ShortUrl::try_from).transpose()
    }

    async fn search(
        &self,
        filter: &SearchFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ShortUrl>> {
        let mut builder = QueryBuilder::<Sqlite>::new(concat!(
            "SELECT ",
            short_url_columns!(),
            " FROM short_urls"
        ));
        push_filter(&mut builder, filter);
        builder
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = builder
            .build_query_as::<ShortUrlRow>()
            .fetch_all(self.pool.as_ref())
            .await?;

        into_models(rows)
    }

    async fn count(&self, filter: &SearchFilter) -> Result<u64> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM short_urls");
        push_filter(&mut builder, filter);

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn duplicate_original_urls(
        &self,
        owner: Option<&OwnerKey>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<String>> {
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT original_url FROM short_urls WHERE 1 = 1");
        if let Some(owner) = owner {
            push_owner(&mut builder, owner);
        }
        builder
            .push(" GROUP BY original_url HAVING COUNT(*) > 1 ORDER BY original_url LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let urls = builder
            .build_query_scalar::<String>()
            .fetch_all(self.pool.as_ref())
            .await?;

        Ok(urls)
    }

    async fn count_duplicate_original_urls(&self, owner: Option<&OwnerKey>) -> Result<u64> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM (SELECT original_url FROM short_urls WHERE 1 = 1",
        );
        if let Some(owner) = owner {
            push_owner(&mut builder, owner);
        }
        builder.push(" GROUP BY original_url HAVING COUNT(*) > 1) AS duplicates");

        let count = builder
            .build_query_scalar::<i64>()
            .fetch_one(self.pool.as_ref())
            .await?;

        Ok(count.max(0) as u64)
    }

    async fn find_by_original_urls(
        &self,
        urls: &[String],
        owner: Option<&OwnerKey>,
    ) -> Result<Vec<ShortUrl>> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Sqlite>::new(concat!(
            "SELECT ",
            short_url_columns!(),
            " FROM short_urls WHERE original_url IN ("
        ));
        let mut separated = builder.separated(", ");
        for url in urls {
            separated.push_bind(url.clone());
        }
        separated.push_unseparated(")");
        if let Some(owner) = owner {
            push_owner(&mut builder, owner);
        }
        builder.push(" ORDER BY original_url, id");

        let rows = builder
            .build_query_as::<ShortUrlRow>()
            .fetch_all(self.pool.as_ref())
            .await?;

        into_models(rows)
    }

    async fn set_active_many(
        &self,
        ids: &[i64],
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE short_urls SET is_active = ");
        builder
            .push_bind(active)
            .push(", updated_at = ")
            .push_bind(to_millis(now))
            .push(", version = version + 1 WHERE is_active <> ")
            .push_bind(active)
            .push(" AND");
        push_id_list(&mut builder, ids);

        let result = builder.build().execute(self.pool.as_ref()).await?;
        Ok(result.rows_affected())
    }

    async fn set_expiration_many(
        &self,
        ids: &[i64],
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let expires_at = expires_at.map(to_millis);
        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE short_urls SET expires_at = ");
        builder
            .push_bind(expires_at)
            .push(", updated_at = ")
            .push_bind(to_millis(now))
            .push(", version = version + 1 WHERE expires_at IS NOT ")
            .push_bind(expires_at)
            .push(" AND");
        push_id_list(&mut builder, ids);

        let result = builder.build().execute(self.pool.as_ref()).await?;
        Ok(result.rows_affected())
    }

    async fn delete_many(&self, ids: &[i64]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("DELETE FROM short_urls WHERE");
        push_id_list(&mut builder, ids);

        let result = builder.build().execute(self.pool.as_ref()).await?;
        Ok(result.rows_affected())
    }

    async fn update_codes_many(
        &self,
        codes: &[(i64, String)],
        now: DateTime<Utc>,
    ) -> StorageResult<u64> {
        if codes.is_empty() {
            return Ok(0);
        }

        let mut builder = QueryBuilder::<Sqlite>::new("UPDATE short_urls SET short_code = CASE id");
        for (id, code) in codes {
            builder
                .push(" WHEN ")
                .push_bind(*id)
                .push(" THEN ")
                .push_bind(code.clone());
        }
        builder
            .push(" END, updated_at = ")
            .push_bind(to_millis(now))
            .push(", version = version + 1 WHERE");
        let ids: Vec<i64> = codes.iter().map(|(id, _)| *id).collect();
        push_id_list(&mut builder, &ids);

        let result = builder
            .build()
            .execute(self.pool.as_ref())
            .await
            .map_err(|e| map_write_error(e, "bulk rename"))?;

        Ok(result.rows_affected())
    }

    async fn delete_expired(&self, as_of: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM short_urls
            WHERE expires_at IS NOT NULL AND expires_at <= ?
            "#,
        )
        .bind(to_millis(as_of))
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected())
    }
}

