use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::domain::{AccessKeyId, DynamicAccessKeyId, LoadBalancerAlgorithm};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDynamicAccessKey {
    pub id: DynamicAccessKeyId,
    pub name: String,
    pub path: String,
    pub prefix: Option<String>,
    pub load_balancer_algorithm: LoadBalancerAlgorithm,
    pub expires_at: Option<DateTime<Utc>>,
    pub access_keys_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAccessKey {
    pub id: AccessKeyId,
    pub name: String,
    pub dynamic_access_key_id: Option<DynamicAccessKeyId>,
    pub created_at: DateTime<Utc>,
}

/// Column values written by create and update. Callers validate first.
#[derive(Debug, Clone)]
pub struct DynamicAccessKeyFields {
    pub name: String,
    pub path: String,
    pub prefix: Option<String>,
    pub load_balancer_algorithm: LoadBalancerAlgorithm,
    pub expires_at: Option<DateTime<Utc>>,
}

const SELECT_DYNAMIC_ACCESS_KEY: &str = "SELECT d.id, d.name, d.path, d.prefix, d.load_balancer_algorithm, d.expires_at, d.created_at, d.updated_at,
        (SELECT COUNT(*) FROM access_keys a WHERE a.dynamic_access_key_id = d.id) AS access_keys_count
     FROM dynamic_access_keys d";

const SELECT_ACCESS_KEY: &str =
    "SELECT id, name, dynamic_access_key_id, created_at FROM access_keys";

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!(%database_url, "storage ready");
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_dynamic_access_key(
        &self,
        fields: &DynamicAccessKeyFields,
    ) -> Result<DynamicAccessKeyId> {
        let now = Utc::now();
        let rec = sqlx::query(
            "INSERT INTO dynamic_access_keys (name, path, prefix, load_balancer_algorithm, expires_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&fields.name)
        .bind(&fields.path)
        .bind(fields.prefix.as_deref())
        .bind(fields.load_balancer_algorithm.as_str())
        .bind(fields.expires_at)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to insert dynamic access key '{}'", fields.name))?;
        Ok(DynamicAccessKeyId(rec.get::<i64, _>(0)))
    }

    /// Returns `false` when no row has the given id.
    pub async fn update_dynamic_access_key(
        &self,
        id: DynamicAccessKeyId,
        fields: &DynamicAccessKeyFields,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE dynamic_access_keys
             SET name = ?, path = ?, prefix = ?, load_balancer_algorithm = ?, expires_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&fields.name)
        .bind(&fields.path)
        .bind(fields.prefix.as_deref())
        .bind(fields.load_balancer_algorithm.as_str())
        .bind(fields.expires_at)
        .bind(Utc::now())
        .bind(id.0)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to update dynamic access key {id}"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns `false` when no row has the given id.
    pub async fn remove_dynamic_access_key(&self, id: DynamicAccessKeyId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM dynamic_access_keys WHERE id = ?")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to remove dynamic access key {id}"))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_dynamic_access_key(
        &self,
        id: DynamicAccessKeyId,
    ) -> Result<Option<StoredDynamicAccessKey>> {
        let row = sqlx::query(&format!("{SELECT_DYNAMIC_ACCESS_KEY} WHERE d.id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| dynamic_access_key_from_row(&r)).transpose()
    }

    pub async fn find_dynamic_access_key_by_path(
        &self,
        path: &str,
    ) -> Result<Option<StoredDynamicAccessKey>> {
        let row = sqlx::query(&format!("{SELECT_DYNAMIC_ACCESS_KEY} WHERE d.path = ?"))
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| dynamic_access_key_from_row(&r)).transpose()
    }

    /// One page of keys whose name contains `term` (ASCII case-insensitive),
    /// ordered by id ascending. `None` matches every key.
    pub async fn list_dynamic_access_keys(
        &self,
        term: Option<&str>,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<StoredDynamicAccessKey>> {
        let rows = sqlx::query(&format!(
            "{SELECT_DYNAMIC_ACCESS_KEY}
             WHERE ?1 IS NULL OR d.name LIKE ?1 ESCAPE '\\'
             ORDER BY d.id ASC
             LIMIT ?2 OFFSET ?3"
        ))
        .bind(term.map(like_pattern))
        .bind(i64::from(limit))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("failed to list dynamic access keys")?;

        rows.iter().map(dynamic_access_key_from_row).collect()
    }

    pub async fn count_dynamic_access_keys(&self, term: Option<&str>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM dynamic_access_keys d WHERE ?1 IS NULL OR d.name LIKE ?1 ESCAPE '\\'",
        )
        .bind(term.map(like_pattern))
        .fetch_one(&self.pool)
        .await
        .context("failed to count dynamic access keys")?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    pub async fn create_access_key(
        &self,
        name: &str,
        dynamic_access_key_id: Option<DynamicAccessKeyId>,
    ) -> Result<AccessKeyId> {
        let rec = sqlx::query(
            "INSERT INTO access_keys (name, dynamic_access_key_id, created_at) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(name)
        .bind(dynamic_access_key_id.map(|id| id.0))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to insert access key '{name}'"))?;
        Ok(AccessKeyId(rec.get::<i64, _>(0)))
    }

    pub async fn get_access_key(&self, id: AccessKeyId) -> Result<Option<StoredAccessKey>> {
        let row = sqlx::query(&format!("{SELECT_ACCESS_KEY} WHERE id = ?"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| access_key_from_row(&r)).transpose()
    }

    /// Access keys attached to `owner`, or the unattached ones for `None`,
    /// ordered by id ascending.
    pub async fn list_access_keys(
        &self,
        owner: Option<DynamicAccessKeyId>,
    ) -> Result<Vec<StoredAccessKey>> {
        let rows = sqlx::query(&format!(
            "{SELECT_ACCESS_KEY} WHERE dynamic_access_key_id IS ? ORDER BY id ASC"
        ))
        .bind(owner.map(|id| id.0))
        .fetch_all(&self.pool)
        .await
        .context("failed to list access keys")?;
        rows.iter().map(access_key_from_row).collect()
    }

    /// Returns `false` when no access key has the given id.
    pub async fn attach_access_key(
        &self,
        id: AccessKeyId,
        owner: DynamicAccessKeyId,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE access_keys SET dynamic_access_key_id = ? WHERE id = ?")
            .bind(owner.0)
            .bind(id.0)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to attach access key {id} to {owner}"))?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns `false` unless the access key was attached to `owner`.
    pub async fn detach_access_key(
        &self,
        id: AccessKeyId,
        owner: DynamicAccessKeyId,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE access_keys SET dynamic_access_key_id = NULL WHERE id = ? AND dynamic_access_key_id = ?",
        )
        .bind(id.0)
        .bind(owner.0)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to detach access key {id} from {owner}"))?;
        Ok(result.rows_affected() > 0)
    }
}

/// Whether `err` was raised by a UNIQUE constraint, such as a second key
/// claiming an existing path.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    })
}

fn access_key_from_row(row: &SqliteRow) -> Result<StoredAccessKey> {
    Ok(StoredAccessKey {
        id: AccessKeyId(row.try_get("id")?),
        name: row.try_get("name")?,
        dynamic_access_key_id: row
            .try_get::<Option<i64>, _>("dynamic_access_key_id")?
            .map(DynamicAccessKeyId),
        created_at: row.try_get("created_at")?,
    })
}

fn dynamic_access_key_from_row(row: &SqliteRow) -> Result<StoredDynamicAccessKey> {
    let algorithm: String = row.try_get("load_balancer_algorithm")?;
    Ok(StoredDynamicAccessKey {
        id: DynamicAccessKeyId(row.try_get("id")?),
        name: row.try_get("name")?,
        path: row.try_get("path")?,
        prefix: row.try_get("prefix")?,
        load_balancer_algorithm: LoadBalancerAlgorithm::parse(&algorithm).unwrap_or_default(),
        expires_at: row.try_get("expires_at")?,
        access_keys_count: u64::try_from(row.try_get::<i64, _>("access_keys_count")?)
            .unwrap_or_default(),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
