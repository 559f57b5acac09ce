//! Proxy store boundary
//!
//! The engine reads and writes proxy records only through [`ProxyStore`].
//! Every call is a short, self-contained operation; nothing holds a
//! transaction across a network probe.

pub mod memory;
pub mod proxy;

pub use memory::MemoryProxyStore;
pub use proxy::PgProxyStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{NewProxy, ProbeUpdate, ProtocolClass, ProxyRecord};

/// Key used by [`ProxyStore::count_by_country`] for records without a country
pub const UNKNOWN_COUNTRY: &str = "unknown";

/// Narrowing applied by [`ProxyStore::list_active`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProxyFilter {
    /// Only these provider tags (hard filter)
    pub providers: Option<Vec<String>>,
    /// Only these protocol classes
    pub protocols: Option<Vec<ProtocolClass>>,
}

impl ProxyFilter {
    /// Check if a record passes this filter (activity is not checked)
    pub fn matches(&self, record: &ProxyRecord) -> bool {
        if let Some(providers) = &self.providers {
            if !providers.iter().any(|p| p == &record.provider) {
                return false;
            }
        }

        if let Some(protocols) = &self.protocols {
            if !protocols.contains(&record.protocol_class) {
                return false;
            }
        }

        true
    }
}

/// CRUD and aggregate queries over proxy records
#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// All `is_active = true` records passing `filter`, ordered by id
    async fn list_active(&self, filter: &ProxyFilter) -> Result<Vec<ProxyRecord>>;

    /// Every record, active or not, ordered by id
    async fn list_all(&self) -> Result<Vec<ProxyRecord>>;

    async fn get(&self, id: i64) -> Result<Option<ProxyRecord>>;

    async fn find_by_endpoint(&self, address: &str, port: u16) -> Result<Option<ProxyRecord>>;

    /// Insert a new record; fails with `DuplicateEndpoint` if `address:port` exists
    async fn insert(&self, proxy: &NewProxy) -> Result<ProxyRecord>;

    /// Overwrite the mutable fields of an existing record
    async fn update(&self, record: &ProxyRecord) -> Result<ProxyRecord>;

    async fn delete(&self, id: i64) -> Result<bool>;

    /// Set `last_used_at` without touching any other column
    async fn touch_last_used(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Shift `reputation_score` by `delta`, clamped to `[0, 100]`, in one write.
    /// Returns `None` if the record does not exist.
    async fn adjust_reputation(&self, id: i64, delta: i16) -> Result<Option<ProxyRecord>>;

    /// Fold one probe result into an active record in one write.
    /// Returns `None` if the record is missing or already inactive.
    async fn record_probe(&self, id: i64, update: &ProbeUpdate) -> Result<Option<ProxyRecord>>;

    /// Active records per country code
    async fn count_by_country(&self) -> Result<HashMap<String, i64>>;

    /// Delete inactive records unused for at least `older_than_days`
    async fn cleanup_stale(&self, older_than_days: u32) -> Result<u64>;
}

/// Store whose every call fails as if the database were unreachable
#[cfg(test)]
pub(crate) struct UnavailableStore;

#[cfg(test)]
#[async_trait]
impl ProxyStore for UnavailableStore {
    async fn list_active(&self, _filter: &ProxyFilter) -> Result<Vec<ProxyRecord>> {
        Err(unavailable())
    }
    async fn list_all(&self) -> Result<Vec<ProxyRecord>> {
        Err(unavailable())
    }
    async fn get(&self, _id: i64) -> Result<Option<ProxyRecord>> {
        Err(unavailable())
    }
    async fn find_by_endpoint(&self, _address: &str, _port: u16) -> Result<Option<ProxyRecord>> {
        Err(unavailable())
    }
    async fn insert(&self, _proxy: &NewProxy) -> Result<ProxyRecord> {
        Err(unavailable())
    }
    async fn update(&self, _record: &ProxyRecord) -> Result<ProxyRecord> {
        Err(unavailable())
    }
    async fn delete(&self, _id: i64) -> Result<bool> {
        Err(unavailable())
    }
    async fn touch_last_used(&self, _id: i64, _at: DateTime<Utc>) -> Result<()> {
        Err(unavailable())
    }
    async fn adjust_reputation(&self, _id: i64, _delta: i16) -> Result<Option<ProxyRecord>> {
        Err(unavailable())
    }
    async fn record_probe(&self, _id: i64, _update: &ProbeUpdate) -> Result<Option<ProxyRecord>> {
        Err(unavailable())
    }
    async fn count_by_country(&self) -> Result<HashMap<String, i64>> {
        Err(unavailable())
    }
    async fn cleanup_stale(&self, _older_than_days: u32) -> Result<u64> {
        Err(unavailable())
    }
}

#[cfg(test)]
fn unavailable() -> crate::error::PoolError {
    crate::error::PoolError::StoreUnavailable("pool timed out while waiting for an open connection".into())
}
