use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Created,
    Triggered,
    Deleted,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Created => "created",
            AlertStatus::Triggered => "triggered",
            AlertStatus::Deleted => "deleted",
        }
    }

    /// Triggered and Deleted admit no further transition.
    pub fn is_terminal(self) -> bool {
        !matches!(self, AlertStatus::Created)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "created" => Ok(AlertStatus::Created),
            "triggered" => Ok(AlertStatus::Triggered),
            "deleted" => Ok(AlertStatus::Deleted),
            other => Err(AppError::Validation(format!("unknown alert status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub owner: String,
    pub instrument: String,
    pub target_price: Decimal,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Position key for an owner's ordered alert list.
    pub fn creation_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.id)
    }
}
