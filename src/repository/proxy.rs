use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use super::{ProxyFilter, ProxyStore, UNKNOWN_COUNTRY};
use crate::error::{PoolError, Result};
use crate::models::{NewProxy, ProbeUpdate, ProxyRecord, UNREACHABLE};

const PROXY_COLUMNS: &str = r#"
    id, address, port, username, password, protocol_class, country_code, provider,
    is_active, reputation_score, success_rate, response_time_avg, consecutive_failures,
    deactivation_reason, last_used_at, created_at, updated_at
"#;

/// Postgres-backed proxy store
#[derive(Clone)]
pub struct PgProxyStore {
    pool: PgPool,
}

impl PgProxyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("23505"))
}

#[async_trait]
impl ProxyStore for PgProxyStore {
    async fn list_active(&self, filter: &ProxyFilter) -> Result<Vec<ProxyRecord>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT ");
        query.push(PROXY_COLUMNS);
        query.push(" FROM proxies WHERE is_active = TRUE");

        if let Some(ref providers) = filter.providers {
            query.push(" AND provider = ANY(").push_bind(providers.clone()).push(")");
        }
        if let Some(ref protocols) = filter.protocols {
            let names: Vec<String> = protocols.iter().map(|p| p.as_str().to_string()).collect();
            query.push(" AND protocol_class = ANY(").push_bind(names).push(")");
        }
        query.push(" ORDER BY id");

        let proxies: Vec<ProxyRecord> = query.build_query_as().fetch_all(&self.pool).await?;
        Ok(proxies)
    }

    async fn list_all(&self) -> Result<Vec<ProxyRecord>> {
        let sql = format!("SELECT {} FROM proxies ORDER BY id", PROXY_COLUMNS);
        let proxies = sqlx::query_as::<_, ProxyRecord>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(proxies)
    }

    async fn get(&self, id: i64) -> Result<Option<ProxyRecord>> {
        let sql = format!("SELECT {} FROM proxies WHERE id = $1", PROXY_COLUMNS);
        let proxy = sqlx::query_as::<_, ProxyRecord>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(proxy)
    }

    async fn find_by_endpoint(&self, address: &str, port: u16) -> Result<Option<ProxyRecord>> {
        let sql = format!(
            "SELECT {} FROM proxies WHERE address = $1 AND port = $2",
            PROXY_COLUMNS
        );
        let proxy = sqlx::query_as::<_, ProxyRecord>(&sql)
            .bind(address)
            .bind(i32::from(port))
            .fetch_optional(&self.pool)
            .await?;

        Ok(proxy)
    }

    async fn insert(&self, proxy: &NewProxy) -> Result<ProxyRecord> {
        let sql = format!(
            r#"
            INSERT INTO proxies (address, port, username, password, protocol_class,
                                 country_code, provider, reputation_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            PROXY_COLUMNS
        );

        let record = sqlx::query_as::<_, ProxyRecord>(&sql)
            .bind(&proxy.address)
            .bind(i32::from(proxy.port))
            .bind(&proxy.username)
            .bind(&proxy.password)
            .bind(proxy.protocol_class.as_str())
            .bind(&proxy.country_code)
            .bind(&proxy.provider)
            .bind(i16::from(proxy.reputation_score))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    PoolError::DuplicateEndpoint {
                        address: proxy.address.clone(),
                        port: proxy.port,
                    }
                } else {
                    e.into()
                }
            })?;

        info!(id = record.id, endpoint = %record.endpoint(), provider = %record.provider, "Created proxy");
        Ok(record)
    }

    async fn update(&self, record: &ProxyRecord) -> Result<ProxyRecord> {
        let sql = format!(
            r#"
            UPDATE proxies
            SET username = $2,
                password = $3,
                protocol_class = $4,
                country_code = $5,
                provider = $6,
                is_active = $7,
                reputation_score = $8,
                success_rate = $9,
                response_time_avg = $10,
                consecutive_failures = $11,
                deactivation_reason = $12,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PROXY_COLUMNS
        );

        let updated = sqlx::query_as::<_, ProxyRecord>(&sql)
            .bind(record.id)
            .bind(&record.username)
            .bind(&record.password)
            .bind(record.protocol_class.as_str())
            .bind(&record.country_code)
            .bind(&record.provider)
            .bind(record.is_active)
            .bind(i16::from(record.reputation_score))
            .bind(record.success_rate)
            .bind(record.response_time_avg)
            .bind(record.consecutive_failures.min(i32::MAX as u32) as i32)
            .bind(&record.deactivation_reason)
            .fetch_optional(&self.pool)
            .await?;

        updated.ok_or(PoolError::ProxyNotFound { id: record.id })
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM proxies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(id = id, "Deleted proxy");
        }

        Ok(deleted)
    }

    async fn touch_last_used(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE proxies SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn adjust_reputation(&self, id: i64, delta: i16) -> Result<Option<ProxyRecord>> {
        let sql = format!(
            r#"
            UPDATE proxies
            SET reputation_score = LEAST(100, GREATEST(0, reputation_score + $2)),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            PROXY_COLUMNS
        );

        let updated = sqlx::query_as::<_, ProxyRecord>(&sql)
            .bind(id)
            .bind(delta)
            .fetch_optional(&self.pool)
            .await?;

        Ok(updated)
    }

    async fn record_probe(&self, id: i64, update: &ProbeUpdate) -> Result<Option<ProxyRecord>> {
        // SET expressions read the pre-update row, so the streak is counted in place.
        let sql = format!(
            r#"
            UPDATE proxies
            SET consecutive_failures = CASE WHEN $2 THEN 0 ELSE consecutive_failures + 1 END,
                reputation_score = LEAST(100, GREATEST(0, reputation_score + $3)),
                success_rate = $4,
                response_time_avg = COALESCE($5, response_time_avg),
                is_active = $2 OR consecutive_failures + 1 < $6,
                deactivation_reason = CASE
                    WHEN NOT $2 AND consecutive_failures + 1 >= $6
                    THEN (consecutive_failures + 1)::TEXT || ' consecutive probe failures (last: ' || $7 || ')'
                    ELSE deactivation_reason
                END,
                updated_at = NOW()
            WHERE id = $1 AND is_active = TRUE
            RETURNING {}
            "#,
            PROXY_COLUMNS
        );

        let updated = sqlx::query_as::<_, ProxyRecord>(&sql)
            .bind(id)
            .bind(update.reachable)
            .bind(update.reputation_delta)
            .bind(update.success_rate)
            .bind(update.response_time_avg)
            .bind(update.max_consecutive_failures.min(i32::MAX as u32) as i32)
            .bind(update.failure_reason.as_deref().unwrap_or(UNREACHABLE))
            .fetch_optional(&self.pool)
            .await?;

        Ok(updated)
    }

    async fn count_by_country(&self) -> Result<HashMap<String, i64>> {
        let rows: Vec<(Option<String>, i64)> = sqlx::query_as(
            r#"
            SELECT UPPER(country_code), COUNT(*)
            FROM proxies
            WHERE is_active = TRUE
            GROUP BY UPPER(country_code)
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for (country, count) in rows {
            let key = country.unwrap_or_else(|| UNKNOWN_COUNTRY.to_string());
            *counts.entry(key).or_insert(0) += count;
        }
        Ok(counts)
    }

    async fn cleanup_stale(&self, older_than_days: u32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM proxies
            WHERE is_active = FALSE
              AND COALESCE(last_used_at, updated_at) < NOW() - make_interval(days => $1)
            "#,
        )
        .bind(older_than_days.min(i32::MAX as u32) as i32)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(count = deleted, days = older_than_days, "Deleted stale proxies");
        }

        Ok(deleted)
    }
}
