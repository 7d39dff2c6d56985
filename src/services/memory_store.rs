use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::{
    error::Result,
    models::{Alert, AlertStatus},
    services::store::{not_found, AlertStore},
};

#[derive(Default)]
struct Rows {
    next_id: i64,
    by_id: BTreeMap<i64, Alert>,
}

/// Process-local store used by `STORE_BACKEND=memory` and the test suite.
#[derive(Default)]
pub struct InMemoryAlertStore {
    rows: Mutex<Rows>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition<F>(&self, id: i64, allowed: F, to: AlertStatus) -> Result<Alert>
    where
        F: Fn(&Alert) -> bool,
    {
        let mut rows = self.rows.lock();
        let Some(a) = rows.by_id.get_mut(&id) else {
            return Err(not_found(id));
        };
        if a.status != AlertStatus::Created || !allowed(a) {
            return Err(not_found(id));
        }

        a.status = to;
        Ok(a.clone())
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn create(&self, owner: &str, instrument: &str, target_price: Decimal) -> Result<Alert> {
        let mut rows = self.rows.lock();
        rows.next_id += 1;

        let alert = Alert {
            id: rows.next_id,
            owner: owner.to_string(),
            instrument: instrument.to_string(),
            target_price,
            status: AlertStatus::Created,
            created_at: Utc::now(),
        };
        rows.by_id.insert(alert.id, alert.clone());

        Ok(alert)
    }

    async fn mark_deleted(&self, id: i64, owner: &str) -> Result<Alert> {
        self.transition(id, |a| a.owner == owner, AlertStatus::Deleted)
    }

    async fn mark_triggered(&self, id: i64) -> Result<Alert> {
        self.transition(id, |_| true, AlertStatus::Triggered)
    }

    async fn list_active_by_instrument(&self, instrument: &str) -> Result<Vec<Alert>> {
        let rows = self.rows.lock();
        Ok(rows
            .by_id
            .values()
            .filter(|a| a.instrument == instrument && a.status == AlertStatus::Created)
            .cloned()
            .collect())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Alert>> {
        let rows = self.rows.lock();
        let mut items: Vec<Alert> = rows
            .by_id
            .values()
            .filter(|a| a.owner == owner)
            .cloned()
            .collect();
        items.sort_by_key(Alert::creation_key);
        Ok(items)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::error::AppError;

    #[tokio::test]
    async fn ids_are_unique_and_increasing() {
        let store = InMemoryAlertStore::new();
        let a = store.create("a@x.com", "BTC", dec!(100)).await.unwrap();
        let b = store.create("b@x.com", "BTC", dec!(100)).await.unwrap();
        assert!(b.id > a.id);
        assert_eq!(a.status, AlertStatus::Created);
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let store = InMemoryAlertStore::new();
        let a = store.create("a@x.com", "BTC", dec!(100)).await.unwrap();

        let t = store.mark_triggered(a.id).await.unwrap();
        assert_eq!(t.status, AlertStatus::Triggered);

        assert!(matches!(store.mark_triggered(a.id).await, Err(AppError::NotFound(_))));
        assert!(matches!(
            store.mark_deleted(a.id, "a@x.com").await,
            Err(AppError::NotFound(_))
        ));

        let rows = store.list_by_owner("a@x.com").await.unwrap();
        assert_eq!(rows[0].status, AlertStatus::Triggered);
    }

    #[tokio::test]
    async fn delete_requires_owner() {
        let store = InMemoryAlertStore::new();
        let a = store.create("a@x.com", "BTC", dec!(100)).await.unwrap();

        assert!(matches!(
            store.mark_deleted(a.id, "b@x.com").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(store.mark_deleted(999, "a@x.com").await, Err(AppError::NotFound(_))));

        let d = store.mark_deleted(a.id, "a@x.com").await.unwrap();
        assert_eq!(d.status, AlertStatus::Deleted);
        assert!(store.list_active_by_instrument("BTC").await.unwrap().is_empty());
    }
}
