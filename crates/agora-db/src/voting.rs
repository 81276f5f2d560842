//! Vote recording and tallying.
//!
//! A (question, user) pair is either not voted or voted for exactly one
//! choice. In `Counter` mode there is no voter identity at all and every
//! accepted submission bumps the choice's stored counter.

use agora_types::models::{ChoiceTally, TallyMode, Vote};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::Database;
use crate::error::VoteError;
use crate::queries::{
    OptionalExt, encode_time, query_question, query_user, time_column, uuid_column,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    /// Counter mode: the choice's counter went up by one.
    Counted,
    /// Per-user mode: first vote by this user on the question.
    Created,
    /// Per-user mode: the user moved their vote from another choice.
    Changed { from: Uuid },
    /// Per-user mode: the user re-submitted the choice they already hold.
    Unchanged,
}

impl Database {
    /// Record a vote for `selection` on `question_id`.
    ///
    /// The voting window is checked again here, inside the same transaction
    /// as the write, so a poll that closed after the voter loaded it rejects
    /// the submission. `selection` is the raw submitted value; anything that
    /// is not the id of one of this question's choices is `InvalidChoice`
    /// and changes nothing.
    pub fn cast_vote(
        &self,
        question_id: &Uuid,
        selection: Option<&str>,
        voter: Option<Uuid>,
        mode: TallyMode,
        now: DateTime<Utc>,
    ) -> std::result::Result<VoteOutcome, VoteError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let question = query_question(&tx, question_id)?
            .filter(|q| q.is_published(now))
            .ok_or(VoteError::NotFound)?;

        if !question.can_vote(now) {
            debug!("Vote rejected, question {} is outside its window", question_id);
            return Err(VoteError::NotVotable);
        }

        let choice_id = selection
            .map(str::trim)
            .and_then(|s| s.parse::<Uuid>().ok())
            .ok_or(VoteError::InvalidChoice)?;

        if !choice_belongs_to(&tx, &choice_id, question_id)? {
            debug!("Vote rejected, choice {} is not part of question {}", choice_id, question_id);
            return Err(VoteError::InvalidChoice);
        }

        let outcome = match mode {
            TallyMode::Counter => {
                tx.execute(
                    "UPDATE choices SET votes = votes + 1 WHERE id = ?1 AND question_id = ?2",
                    rusqlite::params![choice_id.to_string(), question_id.to_string()],
                )?;
                VoteOutcome::Counted
            }
            TallyMode::PerUser => {
                let user_id = voter.ok_or(VoteError::Unauthenticated)?;
                // A signed token can outlive its user row, e.g. across a database reset.
                if query_user(&tx, "id", &user_id.to_string())?.is_none() {
                    debug!("Vote rejected, user {} no longer exists", user_id);
                    return Err(VoteError::Unauthenticated);
                }
                upsert_vote(&tx, question_id, &choice_id, &user_id, now)?
            }
        };

        tx.commit()?;

        info!(
            "Vote on question {} for choice {} ({}): {:?}",
            question_id, choice_id, mode, outcome
        );
        Ok(outcome)
    }

    /// Per-choice counts in choice insertion order. Choices nobody picked
    /// report zero.
    pub fn tally(&self, question_id: &Uuid, mode: TallyMode) -> Result<Vec<ChoiceTally>> {
        self.with_conn(|conn| {
            let sql = match mode {
                TallyMode::Counter => {
                    "SELECT c.id, c.text, c.votes
                     FROM choices c
                     WHERE c.question_id = ?1
                     ORDER BY c.rowid"
                }
                TallyMode::PerUser => {
                    "SELECT c.id, c.text, COUNT(v.id)
                     FROM choices c
                     LEFT JOIN votes v ON v.choice_id = c.id
                     WHERE c.question_id = ?1
                     GROUP BY c.id
                     ORDER BY c.rowid"
                }
            };

            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map([question_id.to_string()], |row| {
                    Ok(ChoiceTally {
                        choice_id: uuid_column(row, 0)?,
                        text: row.get(1)?,
                        votes: row.get::<_, i64>(2)?.max(0) as u64,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// The user's current vote on a question, if any.
    pub fn get_vote(&self, question_id: &Uuid, user_id: &Uuid) -> Result<Option<Vote>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT question_id, choice_id, user_id, created_at, updated_at
                 FROM votes
                 WHERE question_id = ?1 AND user_id = ?2",
            )?;

            let row = stmt
                .query_row(
                    rusqlite::params![question_id.to_string(), user_id.to_string()],
                    |row| {
                        Ok(Vote {
                            question_id: uuid_column(row, 0)?,
                            choice_id: uuid_column(row, 1)?,
                            user_id: uuid_column(row, 2)?,
                            created_at: time_column(row, 3)?,
                            updated_at: time_column(row, 4)?,
                        })
                    },
                )
                .optional()?;

            Ok(row)
        })
    }
}

fn choice_belongs_to(conn: &Connection, choice_id: &Uuid, question_id: &Uuid) -> Result<bool> {
    let known: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM choices WHERE id = ?1 AND question_id = ?2)",
        rusqlite::params![choice_id.to_string(), question_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(known)
}

/// Insert or reassign the user's vote. The UNIQUE(question_id, user_id)
/// constraint plus ON CONFLICT keeps it at one row per user and question.
fn upsert_vote(
    conn: &Connection,
    question_id: &Uuid,
    choice_id: &Uuid,
    user_id: &Uuid,
    now: DateTime<Utc>,
) -> Result<VoteOutcome> {
    let previous: Option<String> = conn
        .query_row(
            "SELECT choice_id FROM votes WHERE question_id = ?1 AND user_id = ?2",
            rusqlite::params![question_id.to_string(), user_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    conn.execute(
        "INSERT INTO votes (id, question_id, choice_id, user_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(question_id, user_id)
         DO UPDATE SET choice_id = excluded.choice_id, updated_at = excluded.updated_at",
        rusqlite::params![
            Uuid::new_v4().to_string(),
            question_id.to_string(),
            choice_id.to_string(),
            user_id.to_string(),
            encode_time(&now),
        ],
    )?;

    let outcome = match previous {
        None => VoteOutcome::Created,
        Some(prev) => match prev.parse::<Uuid>() {
            Ok(from) if from == *choice_id => VoteOutcome::Unchanged,
            Ok(from) => VoteOutcome::Changed { from },
            Err(e) => return Err(anyhow::anyhow!("Corrupt choice_id '{}' on vote: {}", prev, e)),
        },
    };

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agora_types::models::{Choice, Question};
    use chrono::Duration;

    struct Poll {
        question: Question,
        choices: Vec<Choice>,
    }

    fn open_poll(db: &Database, now: DateTime<Utc>) -> Poll {
        let question = Question {
            id: Uuid::new_v4(),
            text: "Tabs or spaces?".into(),
            publication_time: now - Duration::days(1),
            end_time: Some(now + Duration::days(1)),
        };
        let choices = db
            .create_question(&question, &["Tabs".to_string(), "Spaces".to_string()])
            .unwrap();
        Poll { question, choices }
    }

    fn user(db: &Database, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), name, "hash", false).unwrap();
        id
    }

    fn counts(db: &Database, poll: &Poll, mode: TallyMode) -> Vec<u64> {
        db.tally(&poll.question.id, mode)
            .unwrap()
            .iter()
            .map(|t| t.votes)
            .collect()
    }

    fn vote_rows(db: &Database) -> i64 {
        db.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM votes", [], |r| r.get(0))?))
            .unwrap()
    }

    #[test]
    fn counter_mode_increments_every_time() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let poll = open_poll(&db, now);
        let tabs = poll.choices[0].id.to_string();

        for _ in 0..3 {
            let outcome = db
                .cast_vote(&poll.question.id, Some(&tabs), None, TallyMode::Counter, now)
                .unwrap();
            assert_eq!(outcome, VoteOutcome::Counted);
        }

        assert_eq!(counts(&db, &poll, TallyMode::Counter), vec![3, 0]);
        assert_eq!(vote_rows(&db), 0);
    }

    #[test]
    fn foreign_choice_leaves_tallies_untouched() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let poll = open_poll(&db, now);
        let other = open_poll(&db, now);
        let alice = user(&db, "alice");
        let foreign = other.choices[0].id.to_string();

        for mode in [TallyMode::Counter, TallyMode::PerUser] {
            let err = db
                .cast_vote(&poll.question.id, Some(&foreign), Some(alice), mode, now)
                .unwrap_err();
            assert!(matches!(err, VoteError::InvalidChoice), "{:?}", err);
            assert_eq!(counts(&db, &poll, mode), vec![0, 0]);
            assert_eq!(counts(&db, &other, mode), vec![0, 0]);
        }
        assert_eq!(vote_rows(&db), 0);
    }

    #[test]
    fn missing_or_malformed_selection_is_invalid_choice() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let poll = open_poll(&db, now);
        let alice = user(&db, "alice");

        for selection in [None, Some(""), Some("not-a-uuid")] {
            let err = db
                .cast_vote(&poll.question.id, selection, Some(alice), TallyMode::PerUser, now)
                .unwrap_err();
            assert!(matches!(err, VoteError::InvalidChoice), "{:?}", err);
        }
        assert_eq!(counts(&db, &poll, TallyMode::PerUser), vec![0, 0]);
    }

    #[test]
    fn revote_keeps_one_row_per_user() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let poll = open_poll(&db, now);
        let alice = user(&db, "alice");
        let tabs = poll.choices[0].id;
        let spaces = poll.choices[1].id;

        let first = db
            .cast_vote(&poll.question.id, Some(&tabs.to_string()), Some(alice), TallyMode::PerUser, now)
            .unwrap();
        assert_eq!(first, VoteOutcome::Created);
        assert_eq!(counts(&db, &poll, TallyMode::PerUser), vec![1, 0]);

        let later = now + Duration::minutes(5);
        let second = db
            .cast_vote(&poll.question.id, Some(&spaces.to_string()), Some(alice), TallyMode::PerUser, later)
            .unwrap();
        assert_eq!(second, VoteOutcome::Changed { from: tabs });
        assert_eq!(counts(&db, &poll, TallyMode::PerUser), vec![0, 1]);
        assert_eq!(vote_rows(&db), 1);

        let vote = db.get_vote(&poll.question.id, &alice).unwrap().unwrap();
        assert_eq!(vote.choice_id, spaces);
        assert!(vote.updated_at > vote.created_at);

        let third = db
            .cast_vote(&poll.question.id, Some(&spaces.to_string()), Some(alice), TallyMode::PerUser, later)
            .unwrap();
        assert_eq!(third, VoteOutcome::Unchanged);
        assert_eq!(vote_rows(&db), 1);
    }

    #[test]
    fn votes_from_different_users_add_up() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let poll = open_poll(&db, now);
        let spaces = poll.choices[1].id.to_string();

        for name in ["alice", "bob", "carol"] {
            let id = user(&db, name);
            db.cast_vote(&poll.question.id, Some(&spaces), Some(id), TallyMode::PerUser, now)
                .unwrap();
        }

        assert_eq!(counts(&db, &poll, TallyMode::PerUser), vec![0, 3]);
    }

    #[test]
    fn per_user_mode_needs_a_voter() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let poll = open_poll(&db, now);
        let tabs = poll.choices[0].id.to_string();

        let err = db
            .cast_vote(&poll.question.id, Some(&tabs), None, TallyMode::PerUser, now)
            .unwrap_err();
        assert!(matches!(err, VoteError::Unauthenticated), "{:?}", err);
    }

    #[test]
    fn unknown_user_is_unauthenticated() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let poll = open_poll(&db, now);
        let tabs = poll.choices[0].id.to_string();

        let err = db
            .cast_vote(&poll.question.id, Some(&tabs), Some(Uuid::new_v4()), TallyMode::PerUser, now)
            .unwrap_err();
        assert!(matches!(err, VoteError::Unauthenticated), "{:?}", err);
        assert_eq!(vote_rows(&db), 0);
    }

    #[test]
    fn schema_allows_one_vote_row_per_user_and_question() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let poll = open_poll(&db, now);
        let alice = user(&db, "alice");
        let insert = |choice: &Choice| {
            db.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO votes (id, question_id, choice_id, user_id, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    rusqlite::params![
                        Uuid::new_v4().to_string(),
                        poll.question.id.to_string(),
                        choice.id.to_string(),
                        alice.to_string(),
                        encode_time(&now),
                    ],
                )?;
                Ok(())
            })
        };

        insert(&poll.choices[0]).unwrap();
        let err = insert(&poll.choices[1]).unwrap_err();
        let sqlite = err.downcast_ref::<rusqlite::Error>().unwrap();
        assert_eq!(
            sqlite.sqlite_error_code(),
            Some(rusqlite::ErrorCode::ConstraintViolation)
        );
        assert_eq!(vote_rows(&db), 1);
    }

    #[test]
    fn closed_poll_rejects_votes_at_submission() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let poll = open_poll(&db, now);
        let tabs = poll.choices[0].id.to_string();

        let after_close = now + Duration::days(2);
        let err = db
            .cast_vote(&poll.question.id, Some(&tabs), None, TallyMode::Counter, after_close)
            .unwrap_err();
        assert!(matches!(err, VoteError::NotVotable), "{:?}", err);
        assert_eq!(counts(&db, &poll, TallyMode::Counter), vec![0, 0]);
    }

    #[test]
    fn unpublished_or_unknown_question_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let poll = open_poll(&db, now);
        let tabs = poll.choices[0].id.to_string();

        let before_publication = now - Duration::days(2);
        let err = db
            .cast_vote(&poll.question.id, Some(&tabs), None, TallyMode::Counter, before_publication)
            .unwrap_err();
        assert!(matches!(err, VoteError::NotFound), "{:?}", err);

        let err = db
            .cast_vote(&Uuid::new_v4(), Some(&tabs), None, TallyMode::Counter, now)
            .unwrap_err();
        assert!(matches!(err, VoteError::NotFound), "{:?}", err);
    }

    #[test]
    fn deleting_question_drops_its_votes() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let poll = open_poll(&db, now);
        let alice = user(&db, "alice");
        let tabs = poll.choices[0].id.to_string();

        db.cast_vote(&poll.question.id, Some(&tabs), Some(alice), TallyMode::PerUser, now)
            .unwrap();
        assert_eq!(vote_rows(&db), 1);

        db.delete_question(&poll.question.id).unwrap();
        assert_eq!(vote_rows(&db), 0);
        assert!(db.tally(&poll.question.id, TallyMode::PerUser).unwrap().is_empty());
    }
}
