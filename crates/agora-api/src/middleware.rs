use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::warn;
use uuid::Uuid;

use agora_types::api::Claims;

use crate::auth::AppState;

/// Who is submitting a vote. Inserted as a request extension by `identify_voter`.
#[derive(Debug, Clone)]
pub enum Voter {
    Anonymous,
    User(Claims),
}

impl Voter {
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::Anonymous => None,
            Self::User(claims) => Some(claims.sub),
        }
    }
}

/// Extract and validate JWT from Authorization header.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let claims = bearer_claims(req.headers(), &state.jwt_secret)?.ok_or(StatusCode::UNAUTHORIZED)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Like `require_auth`, but the token must belong to an administrator.
pub async fn require_admin(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let claims = bearer_claims(req.headers(), &state.jwt_secret)?.ok_or(StatusCode::UNAUTHORIZED)?;

    if !claims.admin {
        warn!("Non-admin '{}' tried {}", claims.username, req.uri().path());
        return Err(StatusCode::FORBIDDEN);
    }

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Attach a `Voter` to the request. A missing Authorization header means an
/// anonymous voter; a present but invalid one is rejected.
pub async fn identify_voter(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let voter = match bearer_claims(req.headers(), &state.jwt_secret)? {
        Some(claims) => Voter::User(claims),
        None => Voter::Anonymous,
    };

    req.extensions_mut().insert(voter);
    Ok(next.run(req).await)
}

fn bearer_claims(headers: &HeaderMap, secret: &str) -> Result<Option<Claims>, StatusCode> {
    let Some(auth_header) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let token = auth_header
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;

    Ok(Some(token_data.claims))
}
