pub mod admin;
pub mod auth;
pub mod middleware;
pub mod polls;

use axum::{
    Json, Router,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::{get, post, put},
};
use serde_json::{Value, json};
use tracing::error;

use agora_db::Database;

use crate::auth::AppState;
use crate::middleware::{identify_voter, require_admin, require_auth};

/// All API routes with their auth layers, ready to serve.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/questions", get(polls::index))
        .route("/questions/{question_id}", get(polls::detail))
        .route("/questions/{question_id}/results", get(polls::results));

    let voter_routes = Router::new()
        .route("/questions/{question_id}/vote", post(polls::vote))
        .layer(from_fn_with_state(state.clone(), identify_voter));

    let user_routes = Router::new()
        .route("/questions/{question_id}/my-vote", get(polls::my_vote))
        .layer(from_fn_with_state(state.clone(), require_auth));

    let admin_routes = Router::new()
        .route(
            "/admin/questions",
            get(admin::list_questions).post(admin::create_question),
        )
        .route(
            "/admin/questions/{question_id}",
            put(admin::update_question).delete(admin::delete_question),
        )
        .route("/admin/questions/{question_id}/choices", post(admin::add_choice))
        .layer(from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(public_routes)
        .merge(voter_routes)
        .merge(user_routes)
        .merge(admin_routes)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> T + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

/// `blocking` for plain queries: any storage error is a 500.
pub(crate) async fn db_query<F, T>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    blocking(state, f).await?.map_err(|e| {
        error!("DB error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
