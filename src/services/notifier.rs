use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{config::Settings, models::AlertTriggered};

/// Fire-and-forget delivery of triggered alerts. Implementations must not block.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &AlertTriggered);
}

pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, e: &AlertTriggered) {
        tracing::info!(
            owner = %e.owner,
            instrument = %e.instrument,
            target = %e.target_price,
            price = %e.current_price,
            "alert triggered: {} reached {} (target {})",
            e.instrument,
            e.current_price,
            e.target_price
        );
    }
}

/// Feeds the in-process channel behind `GET /events`.
pub struct BroadcastSink {
    tx: broadcast::Sender<AlertTriggered>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<AlertTriggered>) -> Self {
        Self { tx }
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, event: &AlertTriggered) {
        // no subscribers is fine
        let _ = self.tx.send(event.clone());
    }
}

/// POSTs the event as JSON to a configured URL on a detached task.
pub struct WebhookSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }
}

impl NotificationSink for WebhookSink {
    fn notify(&self, event: &AlertTriggered) {
        let http = self.http.clone();
        let url = self.url.clone();
        let event = event.clone();

        tokio::spawn(async move {
            match http.post(&url).json(&event).send().await {
                Ok(res) if !res.status().is_success() => {
                    tracing::warn!(status = %res.status(), alert_id = event.alert_id, "webhook rejected notification");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, alert_id = event.alert_id, "webhook delivery failed");
                }
            }
        });
    }
}

pub struct FanoutSink {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutSink {
    fn notify(&self, event: &AlertTriggered) {
        for sink in &self.sinks {
            sink.notify(event);
        }
    }
}

/// Log + SSE broadcast, plus the webhook when `NOTIFY_WEBHOOK_URL` is set.
pub fn build_sink(
    settings: &Settings,
    events_tx: broadcast::Sender<AlertTriggered>,
) -> Arc<dyn NotificationSink> {
    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![
        Arc::new(LogSink),
        Arc::new(BroadcastSink::new(events_tx)),
    ];

    if let Some(url) = &settings.notify_webhook_url {
        sinks.push(Arc::new(WebhookSink::new(url.clone())));
    }

    Arc::new(FanoutSink::new(sinks))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::{Alert, AlertStatus};

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let (tx, mut rx) = broadcast::channel(4);
        let sink = build_sink(&Settings::default(), tx);

        let alert = Alert {
            id: 7,
            owner: "a@x.com".to_string(),
            instrument: "BTC".to_string(),
            target_price: dec!(100),
            status: AlertStatus::Triggered,
            created_at: chrono::Utc::now(),
        };
        sink.notify(&AlertTriggered::new(&alert, dec!(99.95)));

        let got = rx.recv().await.unwrap();
        assert_eq!(got.alert_id, 7);
        assert_eq!(got.current_price, dec!(99.95));
    }
}
