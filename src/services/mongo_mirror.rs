use async_trait::async_trait;
use mongodb::{
    bson::doc,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    Collection, Database,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AppError, Result},
    models::Alert,
    services::mirror::{MirrorBackend, MirrorEntry},
};

pub const ALERT_MIRROR: &str = "alert_mirror";

const DUPLICATE_KEY: i32 = 11000;

/// One document per owner; `alerts` is the JSON-encoded ordered list.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MirrorDoc {
    #[serde(rename = "_id")]
    owner: String,
    version: i64,
    alerts: String,
}

fn is_duplicate_key(e: &MongoError) -> bool {
    matches!(
        e.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == DUPLICATE_KEY
    )
}

#[derive(Clone)]
pub struct MongoMirror {
    entries: Collection<MirrorDoc>,
}

impl MongoMirror {
    pub fn new(db: &Database) -> Self {
        Self {
            entries: db.collection::<MirrorDoc>(ALERT_MIRROR),
        }
    }
}

#[async_trait]
impl MirrorBackend for MongoMirror {
    async fn load(&self, owner: &str) -> Result<Option<MirrorEntry>> {
        let Some(found) = self
            .entries
            .find_one(doc! { "_id": owner }, None)
            .await
            .map_err(AppError::cache)?
        else {
            return Ok(None);
        };

        let alerts: Vec<Alert> = serde_json::from_str(&found.alerts).map_err(AppError::cache)?;

        Ok(Some(MirrorEntry {
            version: found.version as u64,
            alerts,
        }))
    }

    async fn compare_and_swap(
        &self,
        owner: &str,
        expected: Option<u64>,
        alerts: &[Alert],
    ) -> Result<bool> {
        let encoded = serde_json::to_string(alerts).map_err(AppError::cache)?;

        match expected {
            None => {
                let fresh = MirrorDoc {
                    owner: owner.to_string(),
                    version: 1,
                    alerts: encoded,
                };
                match self.entries.insert_one(&fresh, None).await {
                    Ok(_) => Ok(true),
                    Err(e) if is_duplicate_key(&e) => Ok(false),
                    Err(e) => Err(AppError::cache(e)),
                }
            }
            Some(version) => {
                let version = version as i64;
                let res = self
                    .entries
                    .update_one(
                        doc! { "_id": owner, "version": version },
                        doc! { "$set": { "alerts": encoded, "version": version + 1 } },
                        None,
                    )
                    .await
                    .map_err(AppError::cache)?;

                Ok(res.matched_count == 1)
            }
        }
    }
}
