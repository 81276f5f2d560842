use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    pub publication_time: DateTime<Utc>,
    /// `None` means voting never closes once the question is published.
    pub end_time: Option<DateTime<Utc>>,
}

impl Question {
    /// True once `now` has reached the publication time.
    pub fn is_published(&self, now: DateTime<Utc>) -> bool {
        self.publication_time <= now
    }

    /// True only during the first day after publication. A question scheduled
    /// for the future is never "recent".
    pub fn was_published_recently(&self, now: DateTime<Utc>) -> bool {
        now - Duration::days(1) <= self.publication_time && self.publication_time <= now
    }

    /// True while `now` lies inside `[publication_time, end_time]`.
    pub fn can_vote(&self, now: DateTime<Utc>) -> bool {
        if !self.is_published(now) {
            return false;
        }
        match self.end_time {
            Some(end) => now <= end,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub id: Uuid,
    pub question_id: Uuid,
    pub text: String,
}

/// One user's current selection on a question (per-user tally mode only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub question_id: Uuid,
    pub choice_id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceTally {
    pub choice_id: Uuid,
    pub text: String,
    pub votes: u64,
}

/// How votes are recorded and counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TallyMode {
    /// Anonymous counter per choice. Every submission increments it, there is
    /// no per-user dedup.
    Counter,
    /// One upserted vote row per (question, user); tallies are aggregated.
    #[default]
    PerUser,
}

impl TallyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::PerUser => "per_user",
        }
    }
}

impl fmt::Display for TallyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TallyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "counter" => Ok(Self::Counter),
            "per_user" | "per-user" => Ok(Self::PerUser),
            other => Err(format!("unknown tally mode '{}', expected 'counter' or 'per_user'", other)),
        }
    }
}
