//! In-process proxy store
//!
//! Keeps records in a map behind a `parking_lot` lock. Locks are only held
//! for the duration of a single call, never across an await point.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use super::{ProxyFilter, ProxyStore, UNKNOWN_COUNTRY};
use crate::error::{PoolError, Result};
use crate::models::{NewProxy, ProbeUpdate, ProxyRecord};

/// Proxy store held entirely in memory
pub struct MemoryProxyStore {
    records: RwLock<BTreeMap<i64, ProxyRecord>>,
    next_id: AtomicI64,
}

impl MemoryProxyStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of records held, active or not
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Replace a record wholesale, including timestamps
    #[cfg(test)]
    pub(crate) fn put(&self, record: ProxyRecord) {
        self.next_id.fetch_max(record.id + 1, Ordering::Relaxed);
        self.records.write().insert(record.id, record);
    }
}

impl Default for MemoryProxyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProxyStore for MemoryProxyStore {
    async fn list_active(&self, filter: &ProxyFilter) -> Result<Vec<ProxyRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.is_active && filter.matches(r))
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<ProxyRecord>> {
        Ok(self.records.read().values().cloned().collect())
    }

    async fn get(&self, id: i64) -> Result<Option<ProxyRecord>> {
        Ok(self.records.read().get(&id).cloned())
    }

    async fn find_by_endpoint(&self, address: &str, port: u16) -> Result<Option<ProxyRecord>> {
        Ok(self
            .records
            .read()
            .values()
            .find(|r| r.address == address && r.port == port)
            .cloned())
    }

    async fn insert(&self, proxy: &NewProxy) -> Result<ProxyRecord> {
        let mut records = self.records.write();

        if records
            .values()
            .any(|r| r.address == proxy.address && r.port == proxy.port)
        {
            return Err(PoolError::DuplicateEndpoint {
                address: proxy.address.clone(),
                port: proxy.port,
            });
        }

        let now = Utc::now();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = ProxyRecord {
            id,
            address: proxy.address.clone(),
            port: proxy.port,
            username: proxy.username.clone(),
            password: proxy.password.clone(),
            protocol_class: proxy.protocol_class,
            country_code: proxy.country_code.clone(),
            provider: proxy.provider.clone(),
            is_active: true,
            reputation_score: proxy.reputation_score.min(100),
            success_rate: 1.0,
            response_time_avg: None,
            consecutive_failures: 0,
            deactivation_reason: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        };
        records.insert(id, record.clone());
        Ok(record)
    }

    async fn update(&self, record: &ProxyRecord) -> Result<ProxyRecord> {
        let mut records = self.records.write();
        let existing = records
            .get_mut(&record.id)
            .ok_or(PoolError::ProxyNotFound { id: record.id })?;

        // Identity, endpoint and usage timestamps are not writable through update.
        let mut next = record.clone();
        next.address = existing.address.clone();
        next.port = existing.port;
        next.last_used_at = existing.last_used_at;
        next.created_at = existing.created_at;
        next.updated_at = Utc::now();
        *existing = next.clone();

        Ok(next)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        Ok(self.records.write().remove(&id).is_some())
    }

    async fn touch_last_used(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        if let Some(record) = self.records.write().get_mut(&id) {
            record.last_used_at = Some(at);
        }
        Ok(())
    }

    async fn adjust_reputation(&self, id: i64, delta: i16) -> Result<Option<ProxyRecord>> {
        Ok(self.records.write().get_mut(&id).map(|record| {
            record.adjust_reputation(delta);
            record.updated_at = Utc::now();
            record.clone()
        }))
    }

    async fn record_probe(&self, id: i64, update: &ProbeUpdate) -> Result<Option<ProxyRecord>> {
        Ok(self
            .records
            .write()
            .get_mut(&id)
            .filter(|record| record.is_active)
            .map(|record| {
                update.apply_to(record);
                record.updated_at = Utc::now();
                record.clone()
            }))
    }

    async fn count_by_country(&self) -> Result<HashMap<String, i64>> {
        let mut counts = HashMap::new();
        for record in self.records.read().values().filter(|r| r.is_active) {
            let key = record
                .country_code
                .as_ref()
                .map(|c| c.to_uppercase())
                .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string());
            *counts.entry(key).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn cleanup_stale(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(i64::from(older_than_days));
        let mut records = self.records.write();
        let before = records.len();

        records.retain(|_, r| r.is_active || r.last_used_at.unwrap_or(r.updated_at) >= cutoff);

        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{test_record, ProtocolClass};

    fn new_proxy(address: &str, port: u16) -> NewProxy {
        NewProxy {
            address: address.to_string(),
            port,
            username: None,
            password: None,
            protocol_class: ProtocolClass::Http,
            country_code: Some("US".to_string()),
            provider: "vendor-a".to_string(),
            reputation_score: 50,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_ids_and_rejects_duplicates() {
        let store = MemoryProxyStore::new();
        let a = store.insert(&new_proxy("1.1.1.1", 80)).await.unwrap();
        let b = store.insert(&new_proxy("1.1.1.1", 81)).await.unwrap();
        assert_ne!(a.id, b.id);
        assert!(a.is_active);

        let err = store.insert(&new_proxy("1.1.1.1", 80)).await.unwrap_err();
        assert!(matches!(err, PoolError::DuplicateEndpoint { .. }));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_list_active_skips_inactive() {
        let store = MemoryProxyStore::new();
        let a = store.insert(&new_proxy("1.1.1.1", 80)).await.unwrap();
        store.insert(&new_proxy("2.2.2.2", 80)).await.unwrap();

        let mut inactive = a.clone();
        inactive.deactivate("test");
        store.update(&inactive).await.unwrap();

        let active = store.list_active(&ProxyFilter::default()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].address, "2.2.2.2");
        assert_eq!(store.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_does_not_clobber_last_used() {
        let store = MemoryProxyStore::new();
        let record = store.insert(&new_proxy("1.1.1.1", 80)).await.unwrap();
        let stale_copy = record.clone();

        let used_at = Utc::now();
        store.touch_last_used(record.id, used_at).await.unwrap();

        let mut next = stale_copy;
        next.reputation_score = 70;
        let updated = store.update(&next).await.unwrap();
        assert_eq!(updated.reputation_score, 70);
        assert_eq!(updated.last_used_at, Some(used_at));
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let store = MemoryProxyStore::new();
        let err = store.update(&test_record(42, 50)).await.unwrap_err();
        assert!(matches!(err, PoolError::ProxyNotFound { id: 42 }));
    }

    #[tokio::test]
    async fn test_count_by_country() {
        let store = MemoryProxyStore::new();
        store.insert(&new_proxy("1.1.1.1", 80)).await.unwrap();
        store.insert(&new_proxy("2.2.2.2", 80)).await.unwrap();
        let mut unknown = new_proxy("3.3.3.3", 80);
        unknown.country_code = None;
        store.insert(&unknown).await.unwrap();

        let counts = store.count_by_country().await.unwrap();
        assert_eq!(counts.get("US"), Some(&2));
        assert_eq!(counts.get(UNKNOWN_COUNTRY), Some(&1));
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_stale_inactive() {
        let store = MemoryProxyStore::new();
        let old = Utc::now() - Duration::days(10);

        let mut stale = test_record(1, 50);
        stale.is_active = false;
        stale.last_used_at = Some(old);
        store.put(stale);

        let mut recent_inactive = test_record(2, 50);
        recent_inactive.is_active = false;
        recent_inactive.last_used_at = Some(Utc::now() - Duration::days(1));
        store.put(recent_inactive);

        let mut old_but_active = test_record(3, 50);
        old_but_active.last_used_at = Some(old);
        store.put(old_but_active);

        let mut never_used_inactive = test_record(4, 50);
        never_used_inactive.is_active = false;
        never_used_inactive.updated_at = old;
        store.put(never_used_inactive);

        let removed = store.cleanup_stale(7).await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.get(1).await.unwrap().is_none());
        assert!(store.get(2).await.unwrap().is_some());
        assert!(store.get(3).await.unwrap().is_some());
        assert!(store.get(4).await.unwrap().is_none());
    }
}
