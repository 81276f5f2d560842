use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;
use tracing::{error, info};
use uuid::Uuid;

use agora_db::Database;
use agora_db::models::UserRow;
use agora_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use agora_types::models::TallyMode;

use crate::blocking;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub tally_mode: TallyMode,
    /// Usernames that become administrators when they register.
    pub admin_usernames: Vec<String>,
}

/// POST /auth/register: the first token comes back with the new account.
pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let username_len = req.username.chars().count();
    if !(3..=32).contains(&username_len) || req.password.chars().count() < 8 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let user_id = Uuid::new_v4();
    let admin = state.admin_usernames.iter().any(|name| name == &req.username);
    let username = req.username.clone();

    // Hashing and the insert both run on the blocking pool.
    let inserted = blocking(&state, move |db| {
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(req.password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("hashing password: {}", e))?
            .to_string();
        db.create_user(&user_id.to_string(), &req.username, &password_hash, admin)
    })
    .await?
    .map_err(|e| {
        error!("create_user failed for '{}': {}", username, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    // The UNIQUE username decides races between concurrent registrations.
    if !inserted {
        return Err(StatusCode::CONFLICT);
    }

    if admin {
        info!("Registered administrator '{}'", username);
    }

    let token = create_token(&state.jwt_secret, user_id, &username, admin)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            admin,
            token,
        }),
    ))
}

/// POST /auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = blocking(&state, move |db| -> Result<Option<UserRow>, StatusCode> {
        let Some(user) = db.get_user_by_username(&req.username).map_err(|e| {
            error!("DB error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        else {
            return Ok(None);
        };

        let parsed_hash =
            PasswordHash::new(&user.password).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let verified = Argon2::default()
            .verify_password(req.password.as_bytes(), &parsed_hash)
            .is_ok();

        Ok(verified.then_some(user))
    })
    .await??
    .ok_or(StatusCode::UNAUTHORIZED)?;

    let user_id: Uuid = user.id.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let token = create_token(&state.jwt_secret, user_id, &user.username, user.is_admin)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        admin: user.is_admin,
        token,
    }))
}

pub(crate) fn create_token(
    secret: &str,
    user_id: Uuid,
    username: &str,
    admin: bool,
) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        admin,
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
