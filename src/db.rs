use std::str::FromStr;

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::config::AppConfig;
use crate::models::CacheRecord;

/// Durable cache tier plus the recommendation history log. Rows carry their
/// own TTL; expiry is evaluated against `updated_at` on read, so a refreshed
/// row lives a full TTL from its last write.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        Self::connect(&config.sqlite_dsn()).await
    }

    pub async fn connect(dsn: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)?
            .create_if_missing(true)
            .foreign_keys(true);

        // An in-memory database exists per connection, so the pool must not
        // fan out when tests use one.
        let max_connections = if dsn.contains(":memory:") { 1 } else { 10 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                data_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                ttl_seconds INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS recommendation_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                request_type TEXT NOT NULL,
                input_data TEXT NOT NULL,
                result_data TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Writes or refreshes a cache row. `created_at` survives refreshes;
    /// `updated_at` and the TTL are reset on every write.
    pub async fn upsert_cache(
        &self,
        key: &str,
        payload: &str,
        data_type: &str,
        ttl_seconds: i64,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO cache_entries (key, payload, data_type, created_at, updated_at, ttl_seconds)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                data_type = excluded.data_type,
                updated_at = excluded.updated_at,
                ttl_seconds = excluded.ttl_seconds
            "#,
        )
        .bind(key)
        .bind(payload)
        .bind(data_type)
        .bind(&now)
        .bind(&now)
        .bind(ttl_seconds)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Reads a cache row, treating expired rows as absent. An expired row is
    /// deleted on the way out.
    pub async fn get_cache(&self, key: &str) -> Result<Option<CacheRecord>> {
        let row = sqlx::query(
            r#"
            SELECT key, payload, data_type, created_at, updated_at, ttl_seconds
            FROM cache_entries
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(record) = row.map(row_to_record) else {
            return Ok(None);
        };

        if record.is_expired(Utc::now()) {
            sqlx::query("DELETE FROM cache_entries WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Removes a cache row regardless of expiry.
    pub async fn delete_cache(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Sweeps every expired cache row and reports how many were removed.
    pub async fn purge_expired(&self) -> Result<u64> {
        let rows = sqlx::query(
            "SELECT key, payload, data_type, created_at, updated_at, ttl_seconds FROM cache_entries",
        )
        .fetch_all(&self.pool)
        .await?;

        let now = Utc::now();
        let dead: Vec<String> = rows
            .into_iter()
            .map(row_to_record)
            .filter(|record| record.is_expired(now))
            .map(|record| record.key)
            .collect();

        if dead.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM cache_entries WHERE key IN (");
        let mut separated = qb.separated(",");
        for key in &dead {
            separated.push_bind(key);
        }
        separated.push_unseparated(")");

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Appends one request/response pair to the history log.
    pub async fn record_history(
        &self,
        request_type: &str,
        input_data: &serde_json::Value,
        result_data: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recommendation_history (request_type, input_data, result_data, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(request_type)
        .bind(input_data.to_string())
        .bind(result_data.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_record(row: SqliteRow) -> CacheRecord {
    CacheRecord {
        key: row.get("key"),
        payload: row.get("payload"),
        data_type: row.get("data_type"),
        created_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("created_at"))
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: chrono::DateTime::parse_from_rfc3339(&row.get::<String, _>("updated_at"))
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        ttl_seconds: row.get("ttl_seconds"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use sqlx::Row;

    use super::*;

    async fn memory_db() -> Database {
        Database::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn cache_rows_round_trip() {
        let db = memory_db().await;
        db.upsert_cache("result|a=1", r#"{"ok":true}"#, "recommend", 1800)
            .await
            .unwrap();

        let record = db.get_cache("result|a=1").await.unwrap().unwrap();
        assert_eq!(record.payload, r#"{"ok":true}"#);
        assert_eq!(record.data_type, "recommend");
        assert_eq!(record.ttl_seconds, 1800);
        assert!(!record.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn refresh_keeps_created_at_and_replaces_payload() {
        let db = memory_db().await;
        db.upsert_cache("k", "v1", "recommend", 1800).await.unwrap();
        let first = db.get_cache("k").await.unwrap().unwrap();

        db.upsert_cache("k", "v2", "recommend", 900).await.unwrap();
        let second = db.get_cache("k").await.unwrap().unwrap();

        assert_eq!(second.payload, "v2");
        assert_eq!(second.ttl_seconds, 900);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn expired_rows_read_as_absent() {
        let db = memory_db().await;
        db.upsert_cache("dead", "v", "recommend", 0).await.unwrap();
        assert!(db.get_cache("dead").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_removes_only_expired_rows() {
        let db = memory_db().await;
        db.upsert_cache("dead", "v", "stores", 0).await.unwrap();
        db.upsert_cache("live", "v", "stores", 3600).await.unwrap();

        assert_eq!(db.purge_expired().await.unwrap(), 1);
        assert!(db.get_cache("live").await.unwrap().is_some());
        assert_eq!(db.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn history_rows_are_appended() {
        let db = memory_db().await;
        db.record_history("recommend", &json!({"text": "치킨"}), &json!({"results": []}))
            .await
            .unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n FROM recommendation_history")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 1);
    }
}
