use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use mongodb::{
    bson::doc,
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
    Collection, Cursor, Database,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::{Alert, AlertStatus},
    services::store::{not_found, AlertStore},
};

pub const ALERTS: &str = "alerts";
pub const COUNTERS: &str = "counters";

/// Row shape of the `alerts` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AlertDoc {
    #[serde(rename = "_id")]
    id: i64,
    owner: String,
    instrument: String,
    target_price: Decimal,
    status: AlertStatus,
    // unix millis
    created_at: i64,
}

impl From<AlertDoc> for Alert {
    fn from(d: AlertDoc) -> Self {
        Alert {
            id: d.id,
            owner: d.owner,
            instrument: d.instrument,
            target_price: d.target_price,
            status: d.status,
            created_at: DateTime::<Utc>::from_timestamp_millis(d.created_at).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Counter {
    seq: i64,
}

#[derive(Clone)]
pub struct MongoAlertStore {
    db: Database,
    alerts: Collection<AlertDoc>,
    counters: Collection<Counter>,
}

impl MongoAlertStore {
    pub fn new(db: Database) -> Self {
        Self {
            alerts: db.collection::<AlertDoc>(ALERTS),
            counters: db.collection::<Counter>(COUNTERS),
            db,
        }
    }

    async fn next_id(&self) -> Result<i64> {
        let opts = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let counter = self
            .counters
            .find_one_and_update(doc! { "_id": ALERTS }, doc! { "$inc": { "seq": 1_i64 } }, opts)
            .await
            .map_err(AppError::store)?
            .ok_or_else(|| AppError::Store("alert id counter missing after upsert".to_string()))?;

        Ok(counter.seq)
    }

    async fn transition(
        &self,
        filter: mongodb::bson::Document,
        id: i64,
        to: AlertStatus,
    ) -> Result<Alert> {
        let opts = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.alerts
            .find_one_and_update(filter, doc! { "$set": { "status": to.as_str() } }, opts)
            .await
            .map_err(AppError::store)?
            .map(Alert::from)
            .ok_or_else(|| not_found(id))
    }
}

async fn collect(mut cursor: Cursor<AlertDoc>) -> Result<Vec<Alert>> {
    let mut items = Vec::new();
    while let Some(res) = cursor.next().await {
        items.push(Alert::from(res.map_err(AppError::store)?));
    }
    Ok(items)
}

#[async_trait]
impl AlertStore for MongoAlertStore {
    async fn create(&self, owner: &str, instrument: &str, target_price: Decimal) -> Result<Alert> {
        let row = AlertDoc {
            id: self.next_id().await?,
            owner: owner.to_string(),
            instrument: instrument.to_string(),
            target_price,
            status: AlertStatus::Created,
            created_at: Utc::now().timestamp_millis(),
        };

        self.alerts
            .insert_one(&row, None)
            .await
            .map_err(AppError::store)?;

        Ok(row.into())
    }

    async fn mark_deleted(&self, id: i64, owner: &str) -> Result<Alert> {
        let filter = doc! { "_id": id, "owner": owner, "status": AlertStatus::Created.as_str() };
        self.transition(filter, id, AlertStatus::Deleted).await
    }

    async fn mark_triggered(&self, id: i64) -> Result<Alert> {
        let filter = doc! { "_id": id, "status": AlertStatus::Created.as_str() };
        self.transition(filter, id, AlertStatus::Triggered).await
    }

    async fn list_active_by_instrument(&self, instrument: &str) -> Result<Vec<Alert>> {
        let opts = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let cursor = self
            .alerts
            .find(
                doc! { "instrument": instrument, "status": AlertStatus::Created.as_str() },
                opts,
            )
            .await
            .map_err(AppError::store)?;

        collect(cursor).await
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Alert>> {
        let opts = FindOptions::builder()
            .sort(doc! { "created_at": 1, "_id": 1 })
            .build();
        let cursor = self
            .alerts
            .find(doc! { "owner": owner }, opts)
            .await
            .map_err(AppError::store)?;

        collect(cursor).await
    }

    async fn ping(&self) -> Result<()> {
        self.db
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(AppError::store)?;
        Ok(())
    }
}
