use axum::{
    Extension, Form, Json,
    extract::{FromRequest, Path, Query, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use agora_db::VoteError;
use agora_types::api::{
    CastVoteRequest, ChoiceResponse, Claims, IndexResponse, QuestionDetail, QuestionSummary,
    ResultsResponse, VoteFormError,
};
use agora_types::models::{Choice, Question, TallyMode};

use crate::auth::AppState;
use crate::middleware::Voter;
use crate::{blocking, db_query};

/// Query value set when a closed or not-yet-open poll bounces the client back
/// to the index.
pub const POLL_NOT_AVAILABLE: &str = "poll-not-available";

const POLL_NOT_AVAILABLE_MESSAGE: &str = "Poll not available";
const NO_POLLS_MESSAGE: &str = "No polls are available.";
const NO_CHOICE_MESSAGE: &str = "You didn't select a choice.";

#[derive(Debug, Deserialize)]
pub struct IndexQuery {
    pub notice: Option<String>,
}

/// GET /questions: the latest published questions.
pub async fn index(
    State(state): State<AppState>,
    Query(query): Query<IndexQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let now = Utc::now();
    let questions = db_query(&state, move |db| db.latest_published_questions(now)).await?;

    let mut messages = Vec::new();
    if query.notice.as_deref() == Some(POLL_NOT_AVAILABLE) {
        messages.push(POLL_NOT_AVAILABLE_MESSAGE.to_string());
    }
    if questions.is_empty() {
        messages.push(NO_POLLS_MESSAGE.to_string());
    }

    Ok(Json(IndexResponse {
        questions: questions.iter().map(|q| QuestionSummary::new(q, now)).collect(),
        messages,
    }))
}

/// GET /questions/{question_id}: the voting form. Only served while the
/// question accepts votes.
pub async fn detail(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
) -> Result<Response, StatusCode> {
    let now = Utc::now();
    let (question, choices) = db_query(&state, move |db| {
        db.get_published_question_with_choices(&question_id, now)
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    if !question.can_vote(now) {
        return Ok(poll_not_available());
    }

    Ok(Json(question_detail(&question, &choices)).into_response())
}

/// GET /questions/{question_id}/results
pub async fn results(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
) -> Result<impl IntoResponse, StatusCode> {
    let now = Utc::now();
    let mode = state.tally_mode;
    let (question, choices) = db_query(&state, move |db| {
        let Some(question) = db.get_published_question(&question_id, now)? else {
            return Ok(None);
        };
        let tallies = db.tally(&question_id, mode)?;
        Ok(Some((question, tallies)))
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ResultsResponse {
        id: question.id,
        text: question.text,
        tally_mode: mode,
        total_votes: choices.iter().map(|c| c.votes).sum(),
        choices,
    }))
}

/// POST /questions/{question_id}/vote
///
/// Success redirects to the results. A bad selection answers 400 with the
/// voting form and an error message; a poll outside its window redirects to
/// the index with a notice.
pub async fn vote(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
    Extension(voter): Extension<Voter>,
    request: Request,
) -> Result<Response, StatusCode> {
    let mode = state.tally_mode;
    let voter_id = voter.user_id();
    if mode == TallyMode::PerUser && voter_id.is_none() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let selection = submitted_choice(request).await;
    let now = Utc::now();
    let result = blocking(&state, move |db| {
        db.cast_vote(&question_id, selection.as_deref(), voter_id, mode, now)
    })
    .await?;

    match result {
        Ok(_) => Ok(Redirect::to(&format!("/questions/{}/results", question_id)).into_response()),
        Err(VoteError::InvalidChoice) => {
            let (question, choices) = db_query(&state, move |db| {
                db.get_published_question_with_choices(&question_id, now)
            })
            .await?
            .ok_or(StatusCode::NOT_FOUND)?;

            Ok((
                StatusCode::BAD_REQUEST,
                Json(VoteFormError {
                    question: question_detail(&question, &choices),
                    error_message: NO_CHOICE_MESSAGE.to_string(),
                }),
            )
                .into_response())
        }
        Err(VoteError::NotVotable) => Ok(poll_not_available()),
        Err(VoteError::NotFound) => Err(StatusCode::NOT_FOUND),
        Err(VoteError::Unauthenticated) => Err(StatusCode::UNAUTHORIZED),
        Err(VoteError::Storage(e)) => {
            error!("cast_vote failed on question {}: {}", question_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /questions/{question_id}/my-vote: the caller's current selection.
pub async fn my_vote(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let now = Utc::now();
    let user_id = claims.sub;
    let vote = db_query(&state, move |db| {
        if db.get_published_question(&question_id, now)?.is_none() {
            return Ok(None);
        }
        db.get_vote(&question_id, &user_id)
    })
    .await?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(vote))
}

/// The `choice` field of a JSON or urlencoded form body. A body that does not
/// parse counts as no selection, so it ends up as `InvalidChoice`.
async fn submitted_choice(request: Request) -> Option<String> {
    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));

    let body = if is_form {
        Form::<CastVoteRequest>::from_request(request, &())
            .await
            .map(|Form(body)| body)
            .ok()
    } else {
        Json::<CastVoteRequest>::from_request(request, &())
            .await
            .map(|Json(body)| body)
            .ok()
    };

    body.and_then(|b| b.choice)
}

fn poll_not_available() -> Response {
    Redirect::to(&format!("/questions?notice={}", POLL_NOT_AVAILABLE)).into_response()
}

fn question_detail(question: &Question, choices: &[Choice]) -> QuestionDetail {
    QuestionDetail {
        id: question.id,
        text: question.text.clone(),
        publication_time: question.publication_time,
        end_time: question.end_time,
        choices: choices
            .iter()
            .map(|c| ChoiceResponse {
                id: c.id,
                text: c.text.clone(),
            })
            .collect(),
    }
}
