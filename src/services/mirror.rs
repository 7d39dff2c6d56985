//! Per-owner cache mirror of alert rows.
//!
//! An entry holds every alert of one owner (any status) in creation order and
//! carries a version stamp. Writers for one owner queue on a per-owner lock
//! inside the process, and each write is still a compare-and-swap against the
//! version read, so a writer in another process that wins the race forces a
//! re-read and re-apply. Mutations merge idempotently and
//! a status never moves back to `created`, so syncs arriving out of order from
//! the matcher and the API still converge on the store's state.
//!
//! A missing entry is seeded from the store, never from an empty list, so the
//! mirror is either absent or complete.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    error::{AppError, Result},
    models::Alert,
    services::store::AlertStore,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorEntry {
    pub version: u64,
    pub alerts: Vec<Alert>,
}

#[async_trait]
pub trait MirrorBackend: Send + Sync {
    async fn load(&self, owner: &str) -> Result<Option<MirrorEntry>>;

    /// Writes `alerts` for `owner` only if the stored version still equals
    /// `expected` (`None` = no entry yet). Returns false when another writer won.
    async fn compare_and_swap(
        &self,
        owner: &str,
        expected: Option<u64>,
        alerts: &[Alert],
    ) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Insert(Alert),
    /// Carries the row as returned by the store after the transition; its id
    /// selects the mirrored record and its status is the new status.
    UpdateStatus(Alert),
}

impl Mutation {
    fn record(&self) -> &Alert {
        match self {
            Mutation::Insert(a) | Mutation::UpdateStatus(a) => a,
        }
    }
}

/// Applies `mutation` to an owner's list in place. Returns whether anything changed.
pub fn apply(alerts: &mut Vec<Alert>, mutation: &Mutation) -> bool {
    let incoming = mutation.record();

    if let Some(existing) = alerts.iter_mut().find(|a| a.id == incoming.id) {
        if existing.status == incoming.status || existing.status.is_terminal() {
            return false;
        }
        existing.status = incoming.status;
        return true;
    }

    // usually the tail; a racing writer may have landed a newer row first
    let key = incoming.creation_key();
    let pos = alerts.partition_point(|a| a.creation_key() <= key);
    alerts.insert(pos, incoming.clone());
    true
}

/// Per-owner write locks. Writers inside one process queue here; the version
/// CAS still guards against writers in other processes.
#[derive(Default)]
struct OwnerLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OwnerLocks {
    fn get(&self, owner: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(owner.to_string())
            .or_default()
            .clone()
    }

    // drop the map slot once nobody else holds or waits on it
    fn release(&self, owner: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);
        if locks.get(owner).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(owner);
        }
    }
}

#[derive(Clone)]
pub struct MirrorSync {
    backend: Arc<dyn MirrorBackend>,
    store: Arc<dyn AlertStore>,
    max_attempts: u32,
    owners: Arc<OwnerLocks>,
}

impl MirrorSync {
    pub fn new(backend: Arc<dyn MirrorBackend>, store: Arc<dyn AlertStore>, max_attempts: u32) -> Self {
        Self {
            backend,
            store,
            max_attempts: max_attempts.max(1),
            owners: Arc::new(OwnerLocks::default()),
        }
    }

    /// Read-apply-write for one owner as a single transaction.
    ///
    /// Call only after the store confirmed the transition being mirrored.
    /// Writers for the same owner are serialized in-process and fenced by the
    /// entry version across processes. If the CAS keeps losing, the entry is
    /// rebuilt from the store, which already holds the mutation.
    pub async fn apply_and_sync(&self, owner: &str, mutation: Mutation) -> Result<Vec<Alert>> {
        let lock = self.owners.get(owner);
        let guard = lock.lock().await;
        let res = self.sync_locked(owner, &mutation).await;
        drop(guard);
        self.owners.release(owner, lock);
        res
    }

    async fn sync_locked(&self, owner: &str, mutation: &Mutation) -> Result<Vec<Alert>> {
        for attempt in 1..=self.max_attempts {
            let (expected, mut alerts) = match self.backend.load(owner).await? {
                Some(entry) => (Some(entry.version), entry.alerts),
                None => (None, self.store.list_by_owner(owner).await?),
            };

            let changed = apply(&mut alerts, mutation);
            if !changed && expected.is_some() {
                return Ok(alerts);
            }

            if self.backend.compare_and_swap(owner, expected, &alerts).await? {
                debug!(
                    owner,
                    alert_id = mutation.record().id,
                    status = %mutation.record().status,
                    attempt,
                    "mirror synced"
                );
                return Ok(alerts);
            }

            debug!(owner, attempt, "mirror write lost a race, retrying");
            tokio::task::yield_now().await;
        }

        warn!(owner, attempts = self.max_attempts, "mirror sync contended, rebuilding entry from store");
        self.reseed(owner).await
    }

    /// Overwrites the owner's entry with the store's rows, whatever version it holds.
    async fn reseed(&self, owner: &str) -> Result<Vec<Alert>> {
        for _ in 0..self.max_attempts {
            let expected = self.backend.load(owner).await?.map(|e| e.version);
            let rows = self.store.list_by_owner(owner).await?;

            if self.backend.compare_and_swap(owner, expected, &rows).await? {
                debug!(owner, alerts = rows.len(), "mirror rebuilt from store");
                return Ok(rows);
            }
            tokio::task::yield_now().await;
        }

        Err(AppError::Cache(format!(
            "mirror entry for {owner} still contended after {} attempts",
            self.max_attempts
        )))
    }

    /// The owner's mirrored alerts, seeding the entry from the store on a miss.
    /// `None` means the owner has never created an alert.
    pub async fn load_or_seed(&self, owner: &str) -> Result<Option<Vec<Alert>>> {
        if let Some(entry) = self.backend.load(owner).await? {
            return Ok(Some(entry.alerts));
        }

        let lock = self.owners.get(owner);
        let guard = lock.lock().await;
        let res = self.seed_locked(owner).await;
        drop(guard);
        self.owners.release(owner, lock);
        res
    }

    async fn seed_locked(&self, owner: &str) -> Result<Option<Vec<Alert>>> {
        for _ in 0..self.max_attempts {
            if let Some(entry) = self.backend.load(owner).await? {
                return Ok(Some(entry.alerts));
            }

            let rows = self.store.list_by_owner(owner).await?;
            if rows.is_empty() {
                return Ok(None);
            }

            if self.backend.compare_and_swap(owner, None, &rows).await? {
                debug!(owner, alerts = rows.len(), "mirror seeded from store");
                return Ok(Some(rows));
            }
        }

        Err(AppError::Cache(format!("could not seed mirror entry for {owner}")))
    }
}

/// Process-local mirror backend.
#[derive(Default)]
pub struct InMemoryMirror {
    entries: Mutex<HashMap<String, MirrorEntry>>,
}

impl InMemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MirrorBackend for InMemoryMirror {
    async fn load(&self, owner: &str) -> Result<Option<MirrorEntry>> {
        Ok(self.entries.lock().get(owner).cloned())
    }

    async fn compare_and_swap(
        &self,
        owner: &str,
        expected: Option<u64>,
        alerts: &[Alert],
    ) -> Result<bool> {
        let mut entries = self.entries.lock();
        let current = entries.get(owner).map(|e| e.version);
        if current != expected {
            return Ok(false);
        }

        let version = current.map_or(1, |v| v + 1);
        entries.insert(
            owner.to_string(),
            MirrorEntry {
                version,
                alerts: alerts.to_vec(),
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::{models::AlertStatus, services::memory_store::InMemoryAlertStore};

    fn alert(id: i64, secs: i64, status: AlertStatus) -> Alert {
        Alert {
            id,
            owner: "a@x.com".to_string(),
            instrument: "BTC".to_string(),
            target_price: dec!(100),
            status,
            created_at: Utc::now() - Duration::seconds(100 - secs),
        }
    }

    #[test]
    fn insert_appends_and_update_rewrites_in_place() {
        let first = alert(1, 1, AlertStatus::Created);
        let mut list = vec![first.clone()];
        assert!(apply(&mut list, &Mutation::Insert(alert(2, 2, AlertStatus::Created))));

        let fired = Alert { status: AlertStatus::Triggered, ..first };
        assert!(apply(&mut list, &Mutation::UpdateStatus(fired)));

        assert_eq!(list.iter().map(|a| a.id).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(list[0].status, AlertStatus::Triggered);
    }

    #[test]
    fn terminal_status_never_regresses() {
        let triggered = alert(1, 1, AlertStatus::Triggered);
        let mut list = vec![triggered.clone()];

        let stale = Alert { status: AlertStatus::Created, ..triggered.clone() };
        assert!(!apply(&mut list, &Mutation::Insert(stale)));
        let deleted = Alert { status: AlertStatus::Deleted, ..triggered };
        assert!(!apply(&mut list, &Mutation::UpdateStatus(deleted)));

        assert_eq!(list[0].status, AlertStatus::Triggered);
    }

    #[test]
    fn late_insert_lands_in_creation_order() {
        let older = alert(1, 1, AlertStatus::Created);
        let newer = alert(2, 2, AlertStatus::Triggered);
        let mut list = vec![newer];

        assert!(apply(&mut list, &Mutation::Insert(older)));
        assert_eq!(list.iter().map(|a| a.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn cas_rejects_stale_version() {
        let mirror = InMemoryMirror::new();
        let a = alert(1, 1, AlertStatus::Created);

        assert!(mirror.compare_and_swap("a@x.com", None, &[a.clone()]).await.unwrap());
        assert!(!mirror.compare_and_swap("a@x.com", None, &[]).await.unwrap());
        assert!(mirror.compare_and_swap("a@x.com", Some(1), &[]).await.unwrap());
        assert!(!mirror.compare_and_swap("a@x.com", Some(1), &[a]).await.unwrap());

        let entry = mirror.load("a@x.com").await.unwrap().unwrap();
        assert_eq!(entry.version, 2);
        assert!(entry.alerts.is_empty());
    }

    #[tokio::test]
    async fn first_sync_seeds_from_store() {
        let store = Arc::new(InMemoryAlertStore::new());
        let sync = MirrorSync::new(Arc::new(InMemoryMirror::new()), store.clone(), 8);

        // row written before any mirror existed
        let old = store.create("a@x.com", "BTC", dec!(50)).await.unwrap();
        let new = store.create("a@x.com", "ETH", dec!(10)).await.unwrap();

        let mirrored = sync
            .apply_and_sync("a@x.com", Mutation::Insert(new.clone()))
            .await
            .unwrap();
        assert_eq!(mirrored, vec![old, new]);
    }

    /// Loses the first `failures` CAS calls as if another process kept writing.
    struct Contended {
        inner: InMemoryMirror,
        failures: Mutex<u32>,
    }

    #[async_trait]
    impl MirrorBackend for Contended {
        async fn load(&self, owner: &str) -> Result<Option<MirrorEntry>> {
            self.inner.load(owner).await
        }

        async fn compare_and_swap(&self, owner: &str, expected: Option<u64>, alerts: &[Alert]) -> Result<bool> {
            {
                let mut left = self.failures.lock();
                if *left > 0 {
                    *left -= 1;
                    return Ok(false);
                }
            }
            self.inner.compare_and_swap(owner, expected, alerts).await
        }
    }

    #[tokio::test]
    async fn exhausted_retries_rebuild_entry_from_store() {
        let store = Arc::new(InMemoryAlertStore::new());
        let backend = Arc::new(Contended {
            inner: InMemoryMirror::new(),
            failures: Mutex::new(0),
        });
        let sync = MirrorSync::new(backend.clone(), store.clone(), 2);

        let first = store.create("a@x.com", "BTC", dec!(1)).await.unwrap();
        sync.apply_and_sync("a@x.com", Mutation::Insert(first)).await.unwrap();

        let second = store.create("a@x.com", "BTC", dec!(2)).await.unwrap();
        *backend.failures.lock() = 2;
        let mirrored = sync
            .apply_and_sync("a@x.com", Mutation::Insert(second))
            .await
            .unwrap();

        assert_eq!(mirrored, store.list_by_owner("a@x.com").await.unwrap());
        assert_eq!(backend.load("a@x.com").await.unwrap().unwrap().alerts, mirrored);
    }

    #[tokio::test]
    async fn gives_up_only_when_rebuild_also_loses() {
        let store = Arc::new(InMemoryAlertStore::new());
        let backend = Arc::new(Contended {
            inner: InMemoryMirror::new(),
            failures: Mutex::new(4),
        });
        let sync = MirrorSync::new(backend, store.clone(), 2);

        let a = store.create("a@x.com", "BTC", dec!(1)).await.unwrap();
        let err = sync.apply_and_sync("a@x.com", Mutation::Insert(a)).await.unwrap_err();
        assert!(matches!(err, AppError::Cache(_)));
    }

    #[tokio::test]
    async fn load_or_seed_distinguishes_unknown_owner() {
        let store = Arc::new(InMemoryAlertStore::new());
        let sync = MirrorSync::new(Arc::new(InMemoryMirror::new()), store.clone(), 8);

        assert_eq!(sync.load_or_seed("nobody@x.com").await.unwrap(), None);

        let a = store.create("a@x.com", "BTC", dec!(1)).await.unwrap();
        assert_eq!(sync.load_or_seed("a@x.com").await.unwrap(), Some(vec![a]));
    }
}
