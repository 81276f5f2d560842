use agora_types::models::{Choice, Question};
use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, Row, types::Type};
use uuid::Uuid;

use crate::Database;
use crate::models::{QuestionListRow, UserRow};

/// How many questions the index lists.
pub const INDEX_PAGE_SIZE: u32 = 5;

impl Database {
    // -- Users --

    /// Returns false when the username is already taken.
    pub fn create_user(
        &self,
        id: &str,
        username: &str,
        password_hash: &str,
        is_admin: bool,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT INTO users (id, username, password, is_admin) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(username) DO NOTHING",
                rusqlite::params![id, username, password_hash, is_admin],
            )?;
            Ok(n > 0)
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    // -- Questions (admin) --

    /// Insert a question together with its initial choices, all or nothing.
    pub fn create_question(&self, question: &Question, choices: &[String]) -> Result<Vec<Choice>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO questions (id, text, publication_time, end_time) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    question.id.to_string(),
                    question.text,
                    encode_time(&question.publication_time),
                    question.end_time.as_ref().map(encode_time),
                ],
            )?;

            let mut created = Vec::with_capacity(choices.len());
            for text in choices {
                created.push(insert_choice(&tx, &question.id, text)?);
            }

            tx.commit()?;
            Ok(created)
        })
    }

    /// Returns false when no question has that id.
    pub fn update_question(&self, question: &Question) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE questions SET text = ?2, publication_time = ?3, end_time = ?4 WHERE id = ?1",
                rusqlite::params![
                    question.id.to_string(),
                    question.text,
                    encode_time(&question.publication_time),
                    question.end_time.as_ref().map(encode_time),
                ],
            )?;
            Ok(n > 0)
        })
    }

    /// Deletes the question; choices and votes go with it.
    pub fn delete_question(&self, id: &Uuid) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM questions WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }

    /// Returns `None` when the question does not exist.
    pub fn add_choice(&self, question_id: &Uuid, text: &str) -> Result<Option<Choice>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            if query_question(&tx, question_id)?.is_none() {
                return Ok(None);
            }
            let choice = insert_choice(&tx, question_id, text)?;
            tx.commit()?;
            Ok(Some(choice))
        })
    }

    /// Unfiltered lookup, regardless of publication time.
    pub fn get_question(&self, id: &Uuid) -> Result<Option<Question>> {
        self.with_conn(|conn| query_question(conn, id))
    }

    /// Every question with its number of choices, newest publication first.
    pub fn list_questions(&self) -> Result<Vec<QuestionListRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT q.id, q.text, q.publication_time, q.end_time, COUNT(c.id)
                 FROM questions q
                 LEFT JOIN choices c ON c.question_id = q.id
                 GROUP BY q.id
                 ORDER BY q.publication_time DESC, q.rowid DESC",
            )?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(QuestionListRow {
                        question: question_from_row(row)?,
                        choice_count: row.get::<_, i64>(4)?.max(0) as u64,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Questions (public) --

    /// The most recently published questions, newest first. Questions sharing
    /// a publication time come out in reverse insertion order.
    pub fn latest_published_questions(&self, now: DateTime<Utc>) -> Result<Vec<Question>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, text, publication_time, end_time
                 FROM questions
                 WHERE publication_time <= ?1
                 ORDER BY publication_time DESC, rowid DESC
                 LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![encode_time(&now), INDEX_PAGE_SIZE], question_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Unpublished questions look exactly like missing ones.
    pub fn get_published_question(&self, id: &Uuid, now: DateTime<Utc>) -> Result<Option<Question>> {
        self.with_conn(|conn| query_published_question(conn, id, now))
    }

    pub fn get_published_question_with_choices(
        &self,
        id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<(Question, Vec<Choice>)>> {
        self.with_conn(|conn| {
            let Some(question) = query_published_question(conn, id, now)? else {
                return Ok(None);
            };
            let choices = query_choices(conn, id)?;
            Ok(Some((question, choices)))
        })
    }
}

pub(crate) fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, is_admin, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                is_admin: row.get(3)?,
                created_at: row.get(4)?,
            })
        })
        .optional()?;

    Ok(row)
}

pub(crate) fn query_question(conn: &Connection, id: &Uuid) -> Result<Option<Question>> {
    let mut stmt =
        conn.prepare("SELECT id, text, publication_time, end_time FROM questions WHERE id = ?1")?;

    let row = stmt
        .query_row([id.to_string()], question_from_row)
        .optional()?;

    Ok(row)
}

fn query_published_question(
    conn: &Connection,
    id: &Uuid,
    now: DateTime<Utc>,
) -> Result<Option<Question>> {
    let mut stmt = conn.prepare(
        "SELECT id, text, publication_time, end_time
         FROM questions
         WHERE id = ?1 AND publication_time <= ?2",
    )?;

    let row = stmt
        .query_row(rusqlite::params![id.to_string(), encode_time(&now)], question_from_row)
        .optional()?;

    Ok(row)
}

pub(crate) fn query_choices(conn: &Connection, question_id: &Uuid) -> Result<Vec<Choice>> {
    let mut stmt = conn.prepare(
        "SELECT id, question_id, text FROM choices WHERE question_id = ?1 ORDER BY rowid",
    )?;

    let rows = stmt
        .query_map([question_id.to_string()], |row| {
            Ok(Choice {
                id: uuid_column(row, 0)?,
                question_id: uuid_column(row, 1)?,
                text: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn insert_choice(conn: &Connection, question_id: &Uuid, text: &str) -> Result<Choice> {
    let choice = Choice {
        id: Uuid::new_v4(),
        question_id: *question_id,
        text: text.to_string(),
    };
    conn.execute(
        "INSERT INTO choices (id, question_id, text) VALUES (?1, ?2, ?3)",
        rusqlite::params![choice.id.to_string(), question_id.to_string(), text],
    )?;
    Ok(choice)
}

fn question_from_row(row: &Row<'_>) -> rusqlite::Result<Question> {
    let end_time: Option<String> = row.get(3)?;
    Ok(Question {
        id: uuid_column(row, 0)?,
        text: row.get(1)?,
        publication_time: time_column(row, 2)?,
        end_time: end_time.map(|raw| decode_time(3, &raw)).transpose()?,
    })
}

/// Fixed-width RFC 3339 in UTC with microseconds, so SQL string comparison
/// orders timestamps correctly.
pub(crate) fn encode_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    decode_time(idx, &raw)
}

fn decode_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_question(db: &Database, text: &str, days: i64, now: DateTime<Utc>) -> Question {
        let q = Question {
            id: Uuid::new_v4(),
            text: text.to_string(),
            publication_time: now + Duration::days(days),
            end_time: None,
        };
        db.create_question(&q, &["Yes".to_string(), "No".to_string()]).unwrap();
        q
    }

    fn texts(questions: &[Question]) -> Vec<&str> {
        questions.iter().map(|q| q.text.as_str()).collect()
    }

    #[test]
    fn no_questions() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.latest_published_questions(Utc::now()).unwrap().is_empty());
    }

    #[test]
    fn future_question_is_not_listed() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        create_question(&db, "Future question.", 30, now);
        assert!(db.latest_published_questions(now).unwrap().is_empty());
    }

    #[test]
    fn future_question_and_past_question() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        create_question(&db, "Past question.", -30, now);
        create_question(&db, "Future question.", 30, now);

        let listed = db.latest_published_questions(now).unwrap();
        assert_eq!(texts(&listed), vec!["Past question."]);
    }

    #[test]
    fn two_past_questions_newest_first() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        create_question(&db, "Past question 1.", -30, now);
        create_question(&db, "Past question 2.", -5, now);

        let listed = db.latest_published_questions(now).unwrap();
        assert_eq!(texts(&listed), vec!["Past question 2.", "Past question 1."]);
    }

    #[test]
    fn listing_is_capped_and_ties_break_by_insertion() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        for i in 0..4 {
            create_question(&db, &format!("old {}", i), -10, now);
        }
        create_question(&db, "newest", -1, now);
        create_question(&db, "oldest", -20, now);

        let listed = db.latest_published_questions(now).unwrap();
        assert_eq!(listed.len(), INDEX_PAGE_SIZE as usize);
        assert_eq!(texts(&listed), vec!["newest", "old 3", "old 2", "old 1", "old 0"]);
    }

    #[test]
    fn question_published_exactly_now_is_listed() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        create_question(&db, "Right now.", 0, now);
        assert_eq!(texts(&db.latest_published_questions(now).unwrap()), vec!["Right now."]);
    }

    #[test]
    fn unpublished_question_is_indistinguishable_from_missing() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let future = create_question(&db, "Future question.", 5, now);
        let past = create_question(&db, "Past question.", -5, now);

        assert!(db.get_published_question(&future.id, now).unwrap().is_none());
        assert!(db.get_published_question(&Uuid::new_v4(), now).unwrap().is_none());
        assert!(db.get_question(&future.id).unwrap().is_some());

        let (q, choices) = db.get_published_question_with_choices(&past.id, now).unwrap().unwrap();
        assert_eq!(q.id, past.id);
        let labels: Vec<_> = choices.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(labels, vec!["Yes", "No"]);
    }

    #[test]
    fn timestamps_survive_storage() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let q = Question {
            id: Uuid::new_v4(),
            text: "Window".into(),
            publication_time: now - Duration::days(1),
            end_time: Some(now + Duration::days(1)),
        };
        db.create_question(&q, &[]).unwrap();

        let stored = db.get_question(&q.id).unwrap().unwrap();
        assert_eq!(encode_time(&stored.publication_time), encode_time(&q.publication_time));
        assert_eq!(stored.end_time.map(|t| encode_time(&t)), q.end_time.map(|t| encode_time(&t)));
        assert!(stored.can_vote(now));
    }

    #[test]
    fn update_and_add_choice() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let mut q = create_question(&db, "Before", -1, now);

        q.text = "After".into();
        q.end_time = Some(now - Duration::hours(1));
        assert!(db.update_question(&q).unwrap());

        let stored = db.get_question(&q.id).unwrap().unwrap();
        assert_eq!(stored.text, "After");
        assert!(!stored.can_vote(now));

        let choice = db.add_choice(&q.id, "Maybe").unwrap().unwrap();
        assert_eq!(choice.question_id, q.id);
        assert!(db.add_choice(&Uuid::new_v4(), "Orphan").unwrap().is_none());

        let listed = db.list_questions().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].choice_count, 3);

        let ghost = Question { id: Uuid::new_v4(), ..q };
        assert!(!db.update_question(&ghost).unwrap());
    }

    #[test]
    fn delete_cascades_to_choices() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let q = create_question(&db, "Doomed", -1, now);

        assert!(db.delete_question(&q.id).unwrap());
        assert!(!db.delete_question(&q.id).unwrap());

        let remaining: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM choices", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn users_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4().to_string();
        assert!(db.create_user(&id, "alice", "hash", true).unwrap());

        let user = db.get_user_by_username("alice").unwrap().unwrap();
        assert_eq!(user.id, id);
        assert!(user.is_admin);
        assert!(db.get_user_by_id(&id).unwrap().is_some());
        assert!(db.get_user_by_username("bob").unwrap().is_none());
        assert!(!db.create_user(&Uuid::new_v4().to_string(), "alice", "hash", false).unwrap());
        assert_eq!(db.get_user_by_username("alice").unwrap().unwrap().id, id);
    }
}
