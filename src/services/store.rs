//! Authoritative alert records.
//!
//! Every status change goes through a conditional update on `status = created`,
//! so a terminal row can never move again and a second `mark_*` call on the same
//! row reports `NotFound` instead of succeeding twice.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::{error::Result, models::Alert};

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Inserts a `created` row and returns it with its assigned id.
    async fn create(&self, owner: &str, instrument: &str, target_price: Decimal) -> Result<Alert>;

    /// `created -> deleted` for a row owned by `owner`.
    async fn mark_deleted(&self, id: i64, owner: &str) -> Result<Alert>;

    /// `created -> triggered`. `NotFound` when the row is gone or already terminal.
    async fn mark_triggered(&self, id: i64) -> Result<Alert>;

    async fn list_active_by_instrument(&self, instrument: &str) -> Result<Vec<Alert>>;

    /// All rows of one owner, any status, in creation order.
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Alert>>;

    async fn ping(&self) -> Result<()>;
}

pub(crate) fn not_found(id: i64) -> crate::error::AppError {
    crate::error::AppError::NotFound(format!("alert {id} not found"))
}
