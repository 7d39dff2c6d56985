//! Library entrypoint for price-trigger.
//!
//! The binary only wires things together; integration tests under `tests/`
//! build an in-memory `AppState` and drive the router from here.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

pub mod config;
pub mod error;
pub mod models;

#[path = "middleware/auth.rs"]
pub mod auth;

pub mod services;

pub mod controllers;
pub mod routes;

use services::{
    matcher::AlertMatcher,
    memory_store::InMemoryAlertStore,
    mirror::{InMemoryMirror, MirrorBackend, MirrorSync},
    mongo_mirror::MongoMirror,
    mongo_store::MongoAlertStore,
    notifier::{self, NotificationSink},
    store::AlertStore,
};

#[derive(Clone)]
pub struct AppState {
    pub settings: config::Settings,
    pub store: Arc<dyn AlertStore>,
    pub mirror: MirrorSync,
    pub events_tx: broadcast::Sender<models::AlertTriggered>,
    /// Flipped to true once on shutdown; long-lived tasks and streams watch it.
    pub shutdown: Arc<watch::Sender<bool>>,
}

impl AppState {
    pub fn new(
        settings: config::Settings,
        store: Arc<dyn AlertStore>,
        mirror_backend: Arc<dyn MirrorBackend>,
    ) -> Self {
        let mirror = MirrorSync::new(mirror_backend, store.clone(), settings.mirror_cas_attempts);
        let (events_tx, _) = broadcast::channel(256);
        let (shutdown, _) = watch::channel(false);

        Self {
            settings,
            store,
            mirror,
            events_tx,
            shutdown: Arc::new(shutdown),
        }
    }

    pub fn in_memory(settings: config::Settings) -> Self {
        Self::new(
            settings,
            Arc::new(InMemoryAlertStore::new()),
            Arc::new(InMemoryMirror::new()),
        )
    }

    /// Connects the configured backend and makes sure the schema is in place.
    pub async fn connect(settings: config::Settings) -> anyhow::Result<Self> {
        if settings.store_backend == config::StoreBackend::Memory {
            tracing::warn!("STORE_BACKEND=memory: alerts are lost on restart");
            return Ok(Self::in_memory(settings));
        }

        let client = mongodb::Client::with_uri_str(&settings.mongodb_uri).await?;
        let db = client.database(&settings.mongodb_db);
        services::db_init::ensure_schema(&db)
            .await
            .map_err(|e| anyhow::anyhow!("schema setup failed: {e}"))?;

        Ok(Self::new(
            settings,
            Arc::new(MongoAlertStore::new(db.clone())),
            Arc::new(MongoMirror::new(&db)),
        ))
    }

    /// Log + SSE + optional webhook, as configured.
    pub fn sink(&self) -> Arc<dyn NotificationSink> {
        notifier::build_sink(&self.settings, self.events_tx.clone())
    }

    pub fn begin_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn matcher(&self, sink: Arc<dyn NotificationSink>) -> AlertMatcher {
        AlertMatcher::new(self.store.clone(), self.mirror.clone(), sink)
    }
}
