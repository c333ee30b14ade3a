use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;
use uuid::Uuid;

use storefront_core::{
    DomainKind, DomainRecord, DomainStatus, StoreDirectory, StoreRecord, ThemeSettings,
};

const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Begins a transaction spanning several repositories.
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Returns a handle for the `stores` table.
    pub fn stores(&self) -> StoreRepository {
        StoreRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the `domains` table.
    pub fn domains(&self) -> DomainRepository {
        DomainRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for the per-merchant key/value mirror.
    pub fn merchant_cache(&self) -> MerchantCacheRepository {
        MerchantCacheRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(SQLITE_CONSTRAINT_UNIQUE),
        _ => false,
    }
}

/// Repository for store rows, keyed by domain.
#[derive(Clone)]
pub struct StoreRepository {
    pool: SqlitePool,
}

const STORE_COLUMNS: &str = "id, user_id, domain, selected_theme, theme_settings";

impl StoreRepository {
    /// Loads the store bound to exactly `domain`.
    pub async fn fetch_by_domain(&self, domain: &str) -> Result<Option<StoreRecord>, StoreError> {
        let row = sqlx::query_as::<_, StoreRow>(&format!(
            "SELECT {STORE_COLUMNS} FROM stores WHERE domain = ?"
        ))
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StoreRow::into_domain).transpose()
    }

    /// Same as [`fetch_by_domain`](Self::fetch_by_domain) but inside a transaction.
    pub async fn fetch_by_domain_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        domain: &str,
    ) -> Result<Option<StoreRecord>, StoreError> {
        let row = sqlx::query_as::<_, StoreRow>(&format!(
            "SELECT {STORE_COLUMNS} FROM stores WHERE domain = ?"
        ))
        .bind(domain)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(StoreRow::into_domain).transpose()
    }

    /// Inserts or updates the store keyed by domain, returning its identifier.
    ///
    /// An existing row keeps its id so domain rows linked to it stay valid.
    pub async fn upsert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewStore<'_>,
    ) -> Result<String, StoreError> {
        let settings_json = serde_json::to_string(record.theme_settings)?;
        let timestamp = to_rfc3339(record.updated_at);
        let row = sqlx::query(
            "INSERT INTO stores (id, user_id, domain, selected_theme, theme_settings, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(domain) DO UPDATE \
             SET user_id = excluded.user_id, \
                 selected_theme = excluded.selected_theme, \
                 theme_settings = excluded.theme_settings, \
                 updated_at = excluded.updated_at \
             RETURNING id",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(record.user_id)
        .bind(record.domain)
        .bind(record.selected_theme)
        .bind(&settings_json)
        .bind(&timestamp)
        .bind(&timestamp)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get("id"))
    }
}

impl StoreDirectory for StoreRepository {
    type Error = StoreError;

    async fn find_by_domain(&self, domain: &str) -> Result<Option<StoreRecord>, StoreError> {
        self.fetch_by_domain(domain).await
    }
}

/// Payload written by the publication flow.
pub struct NewStore<'a> {
    pub user_id: &'a str,
    pub domain: &'a str,
    pub selected_theme: &'a str,
    pub theme_settings: &'a ThemeSettings,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct StoreRow {
    id: String,
    user_id: Option<String>,
    domain: String,
    selected_theme: Option<String>,
    theme_settings: Option<String>,
}

impl StoreRow {
    fn into_domain(self) -> Result<StoreRecord, StoreError> {
        let theme_settings = match self.theme_settings.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Some(serde_json::from_str(raw)?),
            _ => None,
        };
        Ok(StoreRecord {
            id: self.id,
            user_id: self.user_id,
            domain: self.domain,
            selected_theme: self.selected_theme,
            theme_settings,
        })
    }
}

/// Errors raised by the store repository.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to decode theme settings json: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Repository for domain rows.
#[derive(Clone)]
pub struct DomainRepository {
    pool: SqlitePool,
}

const DOMAIN_COLUMNS: &str = "id, user_id, store_id, domain, status, is_primary, is_custom, \
                              last_checked_at, verified_at, error_message, created_at";

impl DomainRepository {
    /// Inserts a domain for a merchant. The merchant's first domain becomes primary.
    pub async fn insert(&self, record: &NewDomain<'_>) -> Result<DomainRecord, DomainError> {
        let timestamp = to_rfc3339(record.created_at);
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "INSERT INTO domains \
             (id, user_id, store_id, domain, status, is_primary, is_custom, verified_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, \
                     (SELECT NOT EXISTS (SELECT 1 FROM domains WHERE user_id = ? AND is_primary = 1)), \
                     ?, ?, ?, ?) \
             RETURNING {DOMAIN_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(record.user_id)
        .bind(record.store_id)
        .bind(record.domain)
        .bind(record.status.as_str())
        .bind(record.user_id)
        .bind(i64::from(record.kind.is_custom()))
        .bind(record.verified_at.map(to_rfc3339))
        .bind(&timestamp)
        .bind(&timestamp)
        .fetch_one(&self.pool)
        .await
        .map_err(map_domain_write_error)?;

        row.into_domain()
    }

    /// Links a domain to a store inside the publication transaction, creating it if needed.
    ///
    /// Status, primary flag and timestamps of an existing row are kept.
    pub async fn upsert_for_store(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewDomain<'_>,
    ) -> Result<DomainRecord, DomainError> {
        let timestamp = to_rfc3339(record.created_at);
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "INSERT INTO domains \
             (id, user_id, store_id, domain, status, is_primary, is_custom, verified_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, \
                     (SELECT NOT EXISTS (SELECT 1 FROM domains WHERE user_id = ? AND is_primary = 1)), \
                     ?, ?, ?, ?) \
             ON CONFLICT(domain) DO UPDATE \
             SET store_id = excluded.store_id, updated_at = excluded.updated_at \
             RETURNING {DOMAIN_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(record.user_id)
        .bind(record.store_id)
        .bind(record.domain)
        .bind(record.status.as_str())
        .bind(record.user_id)
        .bind(i64::from(record.kind.is_custom()))
        .bind(record.verified_at.map(to_rfc3339))
        .bind(&timestamp)
        .bind(&timestamp)
        .fetch_one(&mut **tx)
        .await
        .map_err(map_domain_write_error)?;

        row.into_domain()
    }

    /// Looks up a domain row by its domain string inside a transaction.
    pub async fn fetch_by_domain_in(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        domain: &str,
    ) -> Result<Option<DomainRecord>, DomainError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains WHERE domain = ?"
        ))
        .bind(domain)
        .fetch_optional(&mut **tx)
        .await?;

        row.map(DomainRow::into_domain).transpose()
    }

    /// Lists a merchant's domains, oldest first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<DomainRecord>, DomainError> {
        let rows = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains WHERE user_id = ? ORDER BY created_at, domain"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DomainRow::into_domain).collect()
    }

    /// Loads one domain when it belongs to `user_id`.
    pub async fn find_for_user(
        &self,
        user_id: &str,
        domain_id: &str,
    ) -> Result<Option<DomainRecord>, DomainError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains WHERE id = ? AND user_id = ?"
        ))
        .bind(domain_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DomainRow::into_domain).transpose()
    }

    /// Makes `domain_id` the merchant's only primary domain.
    ///
    /// Sibling flags are cleared before the target is set, in one transaction.
    pub async fn set_primary(
        &self,
        user_id: &str,
        domain_id: &str,
        updated_at: DateTime<Utc>,
    ) -> Result<DomainRecord, DomainError> {
        let timestamp = to_rfc3339(updated_at);
        let mut tx = self.pool.begin().await?;

        let owned = sqlx::query("SELECT 1 FROM domains WHERE id = ? AND user_id = ?")
            .bind(domain_id)
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if owned.is_none() {
            return Err(DomainError::NotFound);
        }

        sqlx::query(
            "UPDATE domains SET is_primary = 0, updated_at = ? WHERE user_id = ? AND is_primary = 1",
        )
        .bind(&timestamp)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "UPDATE domains SET is_primary = 1, updated_at = ? WHERE id = ? AND user_id = ? \
             RETURNING {DOMAIN_COLUMNS}"
        ))
        .bind(&timestamp)
        .bind(domain_id)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        row.into_domain()
    }

    /// Stores the outcome of a DNS check.
    pub async fn record_check(
        &self,
        domain_id: &str,
        check: &DomainCheck<'_>,
    ) -> Result<DomainRecord, DomainError> {
        let checked_at = to_rfc3339(check.checked_at);
        let verified_at = matches!(check.status, DomainStatus::Verified).then(|| checked_at.clone());
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "UPDATE domains \
             SET status = ?, \
                 last_checked_at = ?, \
                 verified_at = COALESCE(?, verified_at), \
                 error_message = ?, \
                 updated_at = ? \
             WHERE id = ? \
             RETURNING {DOMAIN_COLUMNS}"
        ))
        .bind(check.status.as_str())
        .bind(&checked_at)
        .bind(verified_at)
        .bind(check.error_message)
        .bind(&checked_at)
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DomainError::NotFound)?;

        row.into_domain()
    }

    /// Pending domains never checked, or last checked before `threshold`.
    pub async fn list_due_for_check(
        &self,
        threshold: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DomainRecord>, DomainError> {
        let rows = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains \
             WHERE status = 'pending' AND (last_checked_at IS NULL OR last_checked_at < ?) \
             ORDER BY created_at \
             LIMIT ?"
        ))
        .bind(to_rfc3339(threshold))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DomainRow::into_domain).collect()
    }

    /// Deletes a merchant's domain. Returns `false` when nothing matched.
    pub async fn delete_for_user(&self, user_id: &str, domain_id: &str) -> Result<bool, DomainError> {
        let result = sqlx::query("DELETE FROM domains WHERE id = ? AND user_id = ?")
            .bind(domain_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn map_domain_write_error(err: sqlx::Error) -> DomainError {
    if is_unique_violation(&err) {
        DomainError::Duplicate
    } else {
        DomainError::Database(err)
    }
}

/// Parameters required to insert a domain.
pub struct NewDomain<'a> {
    pub user_id: &'a str,
    pub domain: &'a str,
    pub store_id: Option<&'a str>,
    pub kind: DomainKind,
    pub status: DomainStatus,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Result of a verification attempt.
pub struct DomainCheck<'a> {
    pub status: DomainStatus,
    pub error_message: Option<&'a str>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct DomainRow {
    id: String,
    user_id: String,
    store_id: Option<String>,
    domain: String,
    status: String,
    is_primary: i64,
    is_custom: i64,
    last_checked_at: Option<DateTime<Utc>>,
    verified_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
}

impl DomainRow {
    fn into_domain(self) -> Result<DomainRecord, DomainError> {
        let status = self
            .status
            .parse::<DomainStatus>()
            .map_err(|err| DomainError::Corrupt(err.to_string()))?;
        Ok(DomainRecord {
            id: self.id,
            user_id: self.user_id,
            store_id: self.store_id,
            domain: self.domain,
            status,
            is_primary: self.is_primary != 0,
            kind: if self.is_custom != 0 {
                DomainKind::Custom
            } else {
                DomainKind::Subdomain
            },
            last_checked_at: self.last_checked_at,
            verified_at: self.verified_at,
            error_message: self.error_message,
            created_at: self.created_at,
        })
    }
}

/// Errors raised by the domain repository.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain is already registered")]
    Duplicate,
    #[error("domain not found")]
    NotFound,
    #[error("domain row is corrupt: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err)
    }
}

/// Key/value mirror of merchant state, keyed like `store_<uid>`.
#[derive(Clone)]
pub struct MerchantCacheRepository {
    pool: SqlitePool,
}

impl MerchantCacheRepository {
    /// Overwrites the entry for `key`. Last writer wins.
    pub async fn put(
        &self,
        key: &str,
        value: &serde_json::Value,
        updated_at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO merchant_cache (key, value_json, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(serde_json::to_string(value)?)
        .bind(to_rfc3339(updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let row = sqlx::query("SELECT value_json, updated_at FROM merchant_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.get("value_json");
        Ok(Some(CacheEntry {
            key: key.to_string(),
            value: serde_json::from_str(&raw)?,
            updated_at: row.get("updated_at"),
        }))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to encode cache value: {0}")]
    Json(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use storefront_core::ThemeCatalog;

    async fn setup_db() -> Database {
        let db = Database::connect("sqlite::memory:?cache=shared")
            .await
            .expect("connect");
        db.run_migrations().await.expect("migrations");
        db
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn new_domain<'a>(user_id: &'a str, domain: &'a str, hour: u32) -> NewDomain<'a> {
        NewDomain {
            user_id,
            domain,
            store_id: None,
            kind: DomainKind::Custom,
            status: DomainStatus::Pending,
            verified_at: None,
            created_at: at(hour),
        }
    }

    #[tokio::test]
    async fn migrations_apply() {
        let db = setup_db().await;

        let tables: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('stores', 'domains', 'merchant_cache')",
        )
        .fetch_one(db.pool())
        .await
        .expect("fetch tables");
        assert_eq!(tables.0, 3);
    }

    #[tokio::test]
    async fn store_upsert_keeps_id_and_updates_theme() {
        let db = setup_db().await;
        let repo = db.stores();
        let catalog = ThemeCatalog::builtin();
        let modern = catalog.get("modern").expect("modern").defaults();
        let bold = catalog.get("bold").expect("bold").defaults();

        let mut tx = db.begin().await.expect("begin");
        let first_id = repo
            .upsert(
                &mut tx,
                &NewStore {
                    user_id: "u-1",
                    domain: "d.com",
                    selected_theme: "modern",
                    theme_settings: &modern,
                    updated_at: at(1),
                },
            )
            .await
            .expect("insert");
        let second_id = repo
            .upsert(
                &mut tx,
                &NewStore {
                    user_id: "u-1",
                    domain: "d.com",
                    selected_theme: "bold",
                    theme_settings: &bold,
                    updated_at: at(2),
                },
            )
            .await
            .expect("update");
        tx.commit().await.expect("commit");

        assert_eq!(first_id, second_id);
        let stored = repo
            .fetch_by_domain("d.com")
            .await
            .expect("fetch")
            .expect("row exists");
        assert_eq!(stored.selected_theme.as_deref(), Some("bold"));
        assert_eq!(stored.theme_settings, Some(bold));
        let owned: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM stores WHERE user_id = ?")
            .bind("u-1")
            .fetch_one(db.pool())
            .await
            .expect("count stores");
        assert_eq!(owned.0, 1);
    }

    #[tokio::test]
    async fn store_lookup_is_exact() {
        let db = setup_db().await;
        sqlx::query(
            "INSERT INTO stores (id, user_id, domain, selected_theme, theme_settings, created_at, updated_at) \
             VALUES ('s-1', 'u-1', 'shop.example.com', 'classic', NULL, '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .execute(db.pool())
        .await
        .expect("insert store");

        let repo = db.stores();
        let found = repo.find_by_domain("shop.example.com").await.expect("lookup");
        assert_eq!(found.map(|store| store.id).as_deref(), Some("s-1"));
        assert!(repo
            .find_by_domain("www.shop.example.com")
            .await
            .expect("lookup")
            .is_none());
    }

    #[tokio::test]
    async fn corrupt_settings_surface_as_decode_error() {
        let db = setup_db().await;
        sqlx::query(
            "INSERT INTO stores (id, user_id, domain, selected_theme, theme_settings, created_at, updated_at) \
             VALUES ('s-1', 'u-1', 'broken.example.com', 'classic', '{not json', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
        )
        .execute(db.pool())
        .await
        .expect("insert store");

        let err = db
            .stores()
            .fetch_by_domain("broken.example.com")
            .await
            .expect_err("decode should fail");
        assert!(matches!(err, StoreError::Decode(_)));
    }

    #[tokio::test]
    async fn first_domain_becomes_primary_and_duplicates_are_rejected() {
        let db = setup_db().await;
        let repo = db.domains();

        let first = repo
            .insert(&new_domain("u-1", "one.example.com", 1))
            .await
            .expect("first");
        let second = repo
            .insert(&new_domain("u-1", "two.example.com", 2))
            .await
            .expect("second");
        assert!(first.is_primary);
        assert!(!second.is_primary);
        assert_eq!(first.status, DomainStatus::Pending);

        let err = repo
            .insert(&new_domain("u-2", "one.example.com", 3))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, DomainError::Duplicate));
    }

    #[tokio::test]
    async fn set_primary_clears_all_siblings() {
        let db = setup_db().await;
        let repo = db.domains();
        let mut ids = Vec::new();
        for (hour, domain) in ["a.example.com", "b.example.com", "c.example.com"]
            .into_iter()
            .enumerate()
        {
            let record = repo
                .insert(&new_domain("u-1", domain, hour as u32))
                .await
                .expect("insert");
            ids.push(record.id);
        }
        let other_user = repo
            .insert(&new_domain("u-2", "other.example.com", 4))
            .await
            .expect("other user");

        for target in [&ids[2], &ids[1]] {
            let updated = repo.set_primary("u-1", target, at(5)).await.expect("set primary");
            assert!(updated.is_primary);

            let domains = repo.list_for_user("u-1").await.expect("list");
            let primaries: Vec<_> = domains.iter().filter(|d| d.is_primary).collect();
            assert_eq!(primaries.len(), 1);
            assert_eq!(&primaries[0].id, target);
        }

        let untouched = repo
            .find_for_user("u-2", &other_user.id)
            .await
            .expect("find")
            .expect("exists");
        assert!(untouched.is_primary);
    }

    #[tokio::test]
    async fn set_primary_rejects_foreign_domain() {
        let db = setup_db().await;
        let repo = db.domains();
        let foreign = repo
            .insert(&new_domain("u-2", "theirs.example.com", 1))
            .await
            .expect("insert");

        let err = repo
            .set_primary("u-1", &foreign.id, at(2))
            .await
            .expect_err("not owned");
        assert!(matches!(err, DomainError::NotFound));
    }

    #[tokio::test]
    async fn record_check_tracks_verification_and_due_list() {
        let db = setup_db().await;
        let repo = db.domains();
        let pending = repo
            .insert(&new_domain("u-1", "pending.example.com", 1))
            .await
            .expect("insert");
        let checked = repo
            .insert(&new_domain("u-1", "checked.example.com", 1))
            .await
            .expect("insert");

        let failed = repo
            .record_check(
                &checked.id,
                &DomainCheck {
                    status: DomainStatus::Error,
                    error_message: Some("CNAME record not found"),
                    checked_at: at(3),
                },
            )
            .await
            .expect("record failure");
        assert_eq!(failed.status, DomainStatus::Error);
        assert_eq!(failed.last_checked_at, Some(at(3)));
        assert_eq!(failed.verified_at, None);

        let due = repo.list_due_for_check(at(4), 10).await.expect("due");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, pending.id);

        let verified = repo
            .record_check(
                &pending.id,
                &DomainCheck {
                    status: DomainStatus::Verified,
                    error_message: None,
                    checked_at: at(5),
                },
            )
            .await
            .expect("record success");
        assert_eq!(verified.verified_at, Some(at(5)));
        assert!(repo
            .list_due_for_check(at(6), 10)
            .await
            .expect("due")
            .is_empty());

        let missing = repo
            .record_check(
                "missing",
                &DomainCheck {
                    status: DomainStatus::Verified,
                    error_message: None,
                    checked_at: at(5),
                },
            )
            .await;
        assert!(matches!(missing, Err(DomainError::NotFound)));
    }

    #[tokio::test]
    async fn upsert_for_store_links_existing_domain_without_resetting_status() {
        let db = setup_db().await;
        let domains = db.domains();
        let existing = domains
            .insert(&new_domain("u-1", "linked.example.com", 1))
            .await
            .expect("insert");
        domains
            .record_check(
                &existing.id,
                &DomainCheck {
                    status: DomainStatus::Verified,
                    error_message: None,
                    checked_at: at(2),
                },
            )
            .await
            .expect("verify");

        let settings = ThemeCatalog::builtin()
            .get("minimal")
            .expect("minimal")
            .defaults();
        let mut tx = db.begin().await.expect("begin");
        let store_id = db
            .stores()
            .upsert(
                &mut tx,
                &NewStore {
                    user_id: "u-1",
                    domain: "linked.example.com",
                    selected_theme: "minimal",
                    theme_settings: &settings,
                    updated_at: at(3),
                },
            )
            .await
            .expect("store");
        let linked = domains
            .upsert_for_store(
                &mut tx,
                &NewDomain {
                    store_id: Some(store_id.as_str()),
                    ..new_domain("u-1", "linked.example.com", 3)
                },
            )
            .await
            .expect("link");
        tx.commit().await.expect("commit");

        assert_eq!(linked.id, existing.id);
        assert_eq!(linked.store_id.as_deref(), Some(store_id.as_str()));
        assert_eq!(linked.status, DomainStatus::Verified);
        assert!(linked.is_primary);
    }

    #[tokio::test]
    async fn delete_only_removes_own_domains() {
        let db = setup_db().await;
        let repo = db.domains();
        let record = repo
            .insert(&new_domain("u-1", "gone.example.com", 1))
            .await
            .expect("insert");

        assert!(!repo.delete_for_user("u-2", &record.id).await.expect("delete"));
        assert!(repo.delete_for_user("u-1", &record.id).await.expect("delete"));
        assert!(repo.list_for_user("u-1").await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn merchant_cache_last_writer_wins() {
        let db = setup_db().await;
        let cache = db.merchant_cache();
        assert!(cache.get("themes_u-1").await.expect("get").is_none());

        cache
            .put("themes_u-1", &json!({ "selected": "modern" }), at(1))
            .await
            .expect("put");
        cache
            .put(
                "themes_u-1",
                &json!({ "selected": "bold" }),
                at(1) + Duration::minutes(5),
            )
            .await
            .expect("overwrite");

        let entry = cache.get("themes_u-1").await.expect("get").expect("entry");
        assert_eq!(entry.value["selected"], "bold");
        assert_eq!(entry.updated_at, at(1) + Duration::minutes(5));
    }
}
