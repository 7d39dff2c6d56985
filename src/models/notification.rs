use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Alert;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertTriggered {
    pub alert_id: i64,
    pub owner: String,
    pub instrument: String,
    pub target_price: Decimal,
    pub current_price: Decimal,
    pub triggered_at: DateTime<Utc>,
}

impl AlertTriggered {
    pub fn new(alert: &Alert, current_price: Decimal) -> Self {
        Self {
            alert_id: alert.id,
            owner: alert.owner.clone(),
            instrument: alert.instrument.clone(),
            target_price: alert.target_price,
            current_price,
            triggered_at: Utc::now(),
        }
    }
}
