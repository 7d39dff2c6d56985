use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, error};

use crate::{
    error::{AppError, Result},
    models::AlertTriggered,
    services::{
        mirror::{MirrorSync, Mutation},
        notifier::NotificationSink,
        store::AlertStore,
    },
};

/// Relative half-width of the band around a target that counts as "reached".
pub const TOLERANCE: Decimal = dec!(0.001);

/// `|price - target| <= target * 0.001`, inclusive at the edge.
pub fn within_band(target: Decimal, price: Decimal) -> bool {
    (price - target).abs() <= target * TOLERANCE
}

#[derive(Clone)]
pub struct AlertMatcher {
    store: Arc<dyn AlertStore>,
    mirror: MirrorSync,
    sink: Arc<dyn NotificationSink>,
}

impl AlertMatcher {
    pub fn new(store: Arc<dyn AlertStore>, mirror: MirrorSync, sink: Arc<dyn NotificationSink>) -> Self {
        Self { store, mirror, sink }
    }

    /// Triggers every active alert on `instrument` whose band contains `price`
    /// and returns the notifications emitted.
    ///
    /// A row that stopped being `created` between the listing and the update
    /// (deleted by its owner, or fired by an earlier tick) is skipped. A mirror
    /// failure does not suppress the notification: the store transition is
    /// already committed. The first such failure is returned once every
    /// matching alert has been handled.
    pub async fn evaluate(&self, instrument: &str, price: Decimal) -> Result<Vec<AlertTriggered>> {
        let active = self.store.list_active_by_instrument(instrument).await?;

        let mut fired = Vec::new();
        let mut mirror_err: Option<AppError> = None;

        for alert in active.into_iter().filter(|a| within_band(a.target_price, price)) {
            let triggered = match self.store.mark_triggered(alert.id).await {
                Ok(a) => a,
                Err(AppError::NotFound(_)) => {
                    debug!(alert_id = alert.id, "alert left the active set before triggering");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = self
                .mirror
                .apply_and_sync(&triggered.owner, Mutation::UpdateStatus(triggered.clone()))
                .await
            {
                error!(alert_id = triggered.id, error = %e, "mirror sync failed after trigger");
                mirror_err.get_or_insert(e);
            }

            let event = AlertTriggered::new(&triggered, price);
            self.sink.notify(&event);
            fired.push(event);
        }

        match mirror_err {
            Some(e) => Err(e),
            None => Ok(fired),
        }
    }
}
