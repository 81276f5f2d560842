use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use agora_types::api::{
    AdminQuestion, ChoiceResponse, Claims, CreateChoiceRequest, CreateQuestionRequest,
    QuestionDetail, UpdateQuestionRequest,
};
use agora_types::models::Question;

use crate::auth::AppState;
use crate::db_query;

const MAX_TEXT_LEN: usize = 200;

/// GET /admin/questions: every question, published or not.
pub async fn list_questions(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, StatusCode> {
    let now = Utc::now();
    let rows = db_query(&state, |db| db.list_questions()).await?;

    let questions: Vec<AdminQuestion> = rows
        .into_iter()
        .map(|row| {
            let q = row.question;
            AdminQuestion {
                published: q.is_published(now),
                published_recently: q.was_published_recently(now),
                votable: q.can_vote(now),
                id: q.id,
                text: q.text,
                publication_time: q.publication_time,
                end_time: q.end_time,
                choice_count: row.choice_count,
            }
        })
        .collect();

    Ok(Json(questions))
}

/// POST /admin/questions: create a question with its initial choices.
pub async fn create_question(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateQuestionRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let text = clean_text(&req.text)?;
    let choices = req
        .choices
        .iter()
        .map(|c| clean_text(c))
        .collect::<Result<Vec<_>, _>>()?;

    let question = Question {
        id: Uuid::new_v4(),
        text,
        publication_time: req.publication_time.unwrap_or_else(Utc::now),
        end_time: req.end_time,
    };
    check_window(question.publication_time, question.end_time)?;

    let stored = question.clone();
    let created = db_query(&state, move |db| db.create_question(&stored, &choices)).await?;

    info!(
        "{} created question {} with {} choices",
        claims.username,
        question.id,
        created.len()
    );

    Ok((
        StatusCode::CREATED,
        Json(QuestionDetail {
            id: question.id,
            text: question.text,
            publication_time: question.publication_time,
            end_time: question.end_time,
            choices: created
                .into_iter()
                .map(|c| ChoiceResponse { id: c.id, text: c.text })
                .collect(),
        }),
    ))
}

/// PUT /admin/questions/{question_id}
pub async fn update_question(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
    Json(req): Json<UpdateQuestionRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let mut question = db_query(&state, move |db| db.get_question(&question_id))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    if let Some(text) = &req.text {
        question.text = clean_text(text)?;
    }
    if let Some(publication_time) = req.publication_time {
        question.publication_time = publication_time;
    }
    if req.clear_end_time {
        question.end_time = None;
    } else if let Some(end_time) = req.end_time {
        question.end_time = Some(end_time);
    }
    check_window(question.publication_time, question.end_time)?;

    let stored = question.clone();
    let updated = db_query(&state, move |db| db.update_question(&stored)).await?;
    if !updated {
        return Err(StatusCode::NOT_FOUND);
    }

    Ok(Json(question))
}

/// DELETE /admin/questions/{question_id}: removes its choices and votes too.
pub async fn delete_question(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let deleted = db_query(&state, move |db| db.delete_question(&question_id)).await?;
    if !deleted {
        return Err(StatusCode::NOT_FOUND);
    }

    info!("{} deleted question {}", claims.username, question_id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /admin/questions/{question_id}/choices
pub async fn add_choice(
    State(state): State<AppState>,
    Path(question_id): Path<Uuid>,
    Json(req): Json<CreateChoiceRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let text = clean_text(&req.text)?;
    let choice = db_query(&state, move |db| db.add_choice(&question_id, &text))
        .await?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok((
        StatusCode::CREATED,
        Json(ChoiceResponse {
            id: choice.id,
            text: choice.text,
        }),
    ))
}

fn clean_text(raw: &str) -> Result<String, StatusCode> {
    let text = raw.trim();
    if text.is_empty() || text.chars().count() > MAX_TEXT_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(text.to_string())
}

/// Stored rows may close before they open, but new input may not.
fn check_window(
    publication_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
) -> Result<(), StatusCode> {
    match end_time {
        Some(end) if end < publication_time => {
            warn!("Rejected end_time {} before publication_time {}", end, publication_time);
            Err(StatusCode::BAD_REQUEST)
        }
        _ => Ok(()),
    }
}
