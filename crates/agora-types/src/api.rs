use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChoiceTally, Question, TallyMode};

// -- JWT Claims --

/// Bearer token claims. `admin` is fixed at registration time and copied into
/// every token the user receives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    #[serde(default)]
    pub admin: bool,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub admin: bool,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub admin: bool,
    pub token: String,
}

// -- Polls --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSummary {
    pub id: Uuid,
    pub text: String,
    pub publication_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub published_recently: bool,
    pub votable: bool,
}

impl QuestionSummary {
    pub fn new(q: &Question, now: DateTime<Utc>) -> Self {
        Self {
            id: q.id,
            text: q.text.clone(),
            publication_time: q.publication_time,
            end_time: q.end_time,
            published_recently: q.was_published_recently(now),
            votable: q.can_vote(now),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IndexResponse {
    pub questions: Vec<QuestionSummary>,
    /// User-facing notices, e.g. after being redirected away from a closed poll.
    pub messages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceResponse {
    pub id: Uuid,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDetail {
    pub id: Uuid,
    pub text: String,
    pub publication_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub choices: Vec<ChoiceResponse>,
}

/// Body of a rejected vote: the voting form again, with an error to show.
#[derive(Debug, Serialize, Deserialize)]
pub struct VoteFormError {
    pub question: QuestionDetail,
    pub error_message: String,
}

/// Accepted as JSON or as a urlencoded form. Extra fields are ignored.
#[derive(Debug, Deserialize)]
pub struct CastVoteRequest {
    /// Choice id as submitted. Missing or malformed values are rejected by the
    /// voting engine, not by deserialization.
    #[serde(default)]
    pub choice: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultsResponse {
    pub id: Uuid,
    pub text: String,
    pub tally_mode: TallyMode,
    pub total_votes: u64,
    pub choices: Vec<ChoiceTally>,
}

// -- Admin --

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminQuestion {
    pub id: Uuid,
    pub text: String,
    pub publication_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub published: bool,
    pub published_recently: bool,
    pub votable: bool,
    pub choice_count: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateQuestionRequest {
    pub text: String,
    /// Defaults to the time of the request.
    pub publication_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub choices: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateQuestionRequest {
    pub text: Option<String>,
    pub publication_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Removes the end time so the poll never closes. Wins over `end_time`.
    #[serde(default)]
    pub clear_end_time: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateChoiceRequest {
    pub text: String,
}
