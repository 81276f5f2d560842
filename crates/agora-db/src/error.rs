use thiserror::Error;

/// Why a vote was not recorded.
#[derive(Debug, Error)]
pub enum VoteError {
    /// No question with that id, or it is not published yet.
    #[error("question not found")]
    NotFound,

    /// The selection is missing, malformed, or names a choice of another question.
    #[error("you didn't select a choice")]
    InvalidChoice,

    /// The question is outside its voting window.
    #[error("poll not available")]
    NotVotable,

    /// Per-user tallies need to know who is voting.
    #[error("a signed-in voter is required")]
    Unauthenticated,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for VoteError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.into())
    }
}
