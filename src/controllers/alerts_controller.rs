use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::AppError,
    models::{AlertStatus, Principal},
    services::alerts_service,
    AppState,
};

#[derive(Deserialize)]
pub struct CreateAlertBody {
    pub instrument: String,
    pub target_price: Decimal,
}

#[derive(Deserialize)]
pub struct ListAlertsQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub page: Option<i64>,
    #[serde(default)]
    pub page_size: Option<i64>,
}

fn parse_alert_id(raw: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AppError::Validation("invalid alert id".to_string()))
}

// POST /alerts
pub async fn post_create_alert(
    State(state): State<AppState>,
    user: Option<Extension<Principal>>,
    body: Result<Json<CreateAlertBody>, JsonRejection>,
) -> Response {
    let Some(Extension(p)) = user else {
        return AppError::Unauthorized.into_response();
    };

    let body = match body {
        Ok(Json(b)) => b,
        Err(rejection) => return AppError::Validation(rejection.body_text()).into_response(),
    };

    match alerts_service::create_alert(&state, &p.owner, &body.instrument, body.target_price).await {
        Ok(alert) => (StatusCode::CREATED, Json(alert)).into_response(),
        Err(e) => e.into_response(),
    }
}

// DELETE /alerts/:id
pub async fn delete_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    user: Option<Extension<Principal>>,
) -> Response {
    let Some(Extension(p)) = user else {
        return AppError::Unauthorized.into_response();
    };

    let alert_id = match parse_alert_id(&id) {
        Ok(x) => x,
        Err(e) => return e.into_response(),
    };

    match alerts_service::delete_alert(&state, &p.owner, alert_id).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "message": "alert deleted" }))).into_response(),
        Err(e) => e.into_response(),
    }
}

// GET /alerts?status=&page=&page_size=
pub async fn get_alerts(
    State(state): State<AppState>,
    Query(q): Query<ListAlertsQuery>,
    user: Option<Extension<Principal>>,
) -> Response {
    let Some(Extension(p)) = user else {
        return AppError::Unauthorized.into_response();
    };

    let status = match q.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => match s.parse::<AlertStatus>() {
            Ok(st) => Some(st),
            Err(e) => return e.into_response(),
        },
        None => None,
    };

    let page = q.page.unwrap_or(1);
    let page_size = q.page_size.unwrap_or(alerts_service::DEFAULT_PAGE_SIZE);

    match alerts_service::list_alerts(&state, &p.owner, status, page, page_size).await {
        Ok(alerts) => (StatusCode::OK, Json(json!({ "alerts": alerts }))).into_response(),
        Err(e) => e.into_response(),
    }
}
