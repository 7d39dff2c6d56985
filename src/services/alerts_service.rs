use rust_decimal::Decimal;

use crate::{
    config::normalize_symbol,
    error::{AppError, Result},
    models::{Alert, AlertStatus},
    services::mirror::Mutation,
    AppState,
};

pub const DEFAULT_PAGE_SIZE: i64 = 10;

pub async fn create_alert(
    state: &AppState,
    owner: &str,
    instrument: &str,
    target_price: Decimal,
) -> Result<Alert> {
    let sym = normalize_symbol(instrument)
        .ok_or_else(|| AppError::Validation("instrument must be 1-20 letters or digits".to_string()))?;

    if target_price <= Decimal::ZERO {
        return Err(AppError::Validation("target_price must be positive".to_string()));
    }

    let alert = state.store.create(owner, &sym, target_price).await?;
    state
        .mirror
        .apply_and_sync(owner, Mutation::Insert(alert.clone()))
        .await?;

    tracing::info!(owner, alert_id = alert.id, instrument = %alert.instrument, target = %alert.target_price, "alert created");
    Ok(alert)
}

pub async fn delete_alert(state: &AppState, owner: &str, alert_id: i64) -> Result<Alert> {
    let alert = state.store.mark_deleted(alert_id, owner).await?;
    state
        .mirror
        .apply_and_sync(owner, Mutation::UpdateStatus(alert.clone()))
        .await?;

    tracing::info!(owner, alert_id, "alert deleted");
    Ok(alert)
}

/// One page of an owner's alerts, read from the mirror.
pub async fn list_alerts(
    state: &AppState,
    owner: &str,
    status: Option<AlertStatus>,
    page: i64,
    page_size: i64,
) -> Result<Vec<Alert>> {
    validate_page(page, page_size)?;

    let alerts = state
        .mirror
        .load_or_seed(owner)
        .await?
        .ok_or_else(|| AppError::NotFound("no alerts found".to_string()))?;

    paginate(alerts, status, page, page_size)
}

fn validate_page(page: i64, page_size: i64) -> Result<()> {
    if page_size <= 0 {
        return Err(AppError::Validation("page_size must be positive".to_string()));
    }
    if page <= 0 {
        return Err(AppError::Validation("page must be 1 or greater".to_string()));
    }
    Ok(())
}

/// Filters by status (order kept) and slices `[(page-1)*size, page*size)`,
/// clamped to the list. Past the end is an empty page, not an error.
pub fn paginate(
    alerts: Vec<Alert>,
    status: Option<AlertStatus>,
    page: i64,
    page_size: i64,
) -> Result<Vec<Alert>> {
    validate_page(page, page_size)?;

    let filtered: Vec<Alert> = match status {
        Some(s) => alerts.into_iter().filter(|a| a.status == s).collect(),
        None => alerts,
    };

    let len = filtered.len();
    let start = usize::try_from((page - 1).saturating_mul(page_size))
        .unwrap_or(usize::MAX)
        .min(len);
    let end = start.saturating_add(page_size as usize).min(len);

    Ok(filtered
        .into_iter()
        .skip(start)
        .take(end - start)
        .collect())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;

    fn alerts(n: i64) -> Vec<Alert> {
        (1..=n)
            .map(|id| Alert {
                id,
                owner: "a@x.com".to_string(),
                instrument: "BTC".to_string(),
                target_price: dec!(100),
                status: if id % 2 == 0 { AlertStatus::Triggered } else { AlertStatus::Created },
                created_at: Utc::now(),
            })
            .collect()
    }

    fn ids(v: &[Alert]) -> Vec<i64> {
        v.iter().map(|a| a.id).collect()
    }

    #[test]
    fn page_counts_follow_clamped_slice() {
        for len in 0..7_i64 {
            for page in 1..5_i64 {
                for size in 1..4_i64 {
                    let got = paginate(alerts(len), None, page, size).unwrap().len() as i64;
                    let want = (len.min(page * size) - len.min((page - 1) * size)).max(0);
                    assert_eq!(got, want, "len={len} page={page} size={size}");
                }
            }
        }
    }

    #[test]
    fn filter_runs_before_slicing() {
        let page1 = paginate(alerts(7), Some(AlertStatus::Created), 1, 2).unwrap();
        let page2 = paginate(alerts(7), Some(AlertStatus::Created), 2, 2).unwrap();
        let page3 = paginate(alerts(7), Some(AlertStatus::Created), 3, 2).unwrap();

        assert_eq!(ids(&page1), vec![1, 3]);
        assert_eq!(ids(&page2), vec![5, 7]);
        assert!(page3.is_empty());
        assert!(paginate(alerts(7), Some(AlertStatus::Deleted), 1, 10).unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_page_arguments() {
        assert!(matches!(paginate(alerts(3), None, 1, 0), Err(AppError::Validation(_))));
        assert!(matches!(paginate(alerts(3), None, 1, -5), Err(AppError::Validation(_))));
        assert!(matches!(paginate(alerts(3), None, 0, 5), Err(AppError::Validation(_))));
    }

    #[test]
    fn huge_page_is_empty() {
        assert!(paginate(alerts(3), None, i64::MAX, i64::MAX).unwrap().is_empty());
    }
}
