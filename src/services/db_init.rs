use mongodb::{
    bson::doc,
    options::CreateCollectionOptions,
    Database, IndexModel,
};

use crate::services::mongo_store::ALERTS;

/// Installs the `alerts` validator and the indexes the store queries by. The
/// mirror collection is only addressed by `_id` and needs none.
pub async fn ensure_schema(db: &Database) -> Result<(), String> {
    // alerts: status restricted to the three lifecycle values
    {
        let validator = doc! {
            "$jsonSchema": {
                "bsonType": "object",
                "required": ["_id", "owner", "instrument", "target_price", "status", "created_at"],
                "properties": {
                    "_id": { "bsonType": "long" },
                    "owner": { "bsonType": "string" },
                    "instrument": { "bsonType": "string" },
                    "target_price": { "bsonType": "string" },
                    "status": { "enum": ["created", "triggered", "deleted"] },
                    "created_at": { "bsonType": "long" },
                }
            }
        };

        let opts = CreateCollectionOptions::builder().validator(validator).build();
        if let Err(e) = db.create_collection(ALERTS, opts).await {
            // already exists on every start after the first
            tracing::debug!(error = %e, "alerts collection not created");
        }
    }

    // alerts: matcher scan (instrument + status)
    {
        let col = db.collection::<mongodb::bson::Document>(ALERTS);
        let model = IndexModel::builder()
            .keys(doc! { "instrument": 1, "status": 1 })
            .build();

        col.create_index(model, None)
            .await
            .map_err(|e| e.to_string())?;
    }

    // alerts: mirror seeding (owner, creation order)
    {
        let col = db.collection::<mongodb::bson::Document>(ALERTS);
        let model = IndexModel::builder()
            .keys(doc! { "owner": 1, "created_at": 1 })
            .build();

        col.create_index(model, None)
            .await
            .map_err(|e| e.to_string())?;
    }

    Ok(())
}
