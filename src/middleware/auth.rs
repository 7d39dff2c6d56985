use axum::{
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::{error::AppError, models::Principal, AppState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub email: String,
    // expiry (unix timestamp seconds)
    pub exp: usize,
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = raw.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Verifies an HS256 token against the configured secret.
pub fn verify_token(token: &str, secret: &str) -> Option<Principal> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation).ok()?;

    let owner = data.claims.email.trim().to_string();
    (!owner.is_empty()).then_some(Principal { owner })
}

pub async fn inject_principal(
    State(state): State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let token = bearer_token(req.headers()).or_else(|| {
        CookieJar::from_headers(req.headers())
            .get(&state.settings.jwt_cookie_name)
            .map(|c| c.value().to_string())
    });

    if let Some(token) = token {
        match verify_token(&token, &state.settings.jwt_secret) {
            Some(principal) => {
                // Store principal in request extensions so handlers can access it
                req.extensions_mut().insert(principal);
            }
            None => tracing::debug!("rejected session token"),
        }
    }

    next.run(req).await
}

fn is_public_path(path: &str) -> bool {
    path == "/health" || path == "/health/db"
}

pub async fn require_auth(
    State(_state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if is_public_path(req.uri().path()) {
        return next.run(req).await;
    }

    // inject_principal already ran => authenticated
    if req.extensions().get::<Principal>().is_some() {
        return next.run(req).await;
    }

    AppError::Unauthorized.into_response()
}
