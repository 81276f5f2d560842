use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, questions, choices)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                is_admin    INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- Timestamps are fixed-width RFC 3339 UTC strings, so text order
            -- is chronological order.
            CREATE TABLE questions (
                id                TEXT PRIMARY KEY,
                text              TEXT NOT NULL,
                publication_time  TEXT NOT NULL,
                end_time          TEXT,
                created_at        TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_questions_publication
                ON questions(publication_time);

            CREATE TABLE choices (
                id           TEXT PRIMARY KEY,
                question_id  TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
                text         TEXT NOT NULL,
                votes        INTEGER NOT NULL DEFAULT 0 CHECK (votes >= 0)
            );

            CREATE INDEX idx_choices_question
                ON choices(question_id);

            INSERT INTO schema_version (version) VALUES (1);
            "
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (per-user votes)");
        conn.execute_batch(
            "
            CREATE TABLE votes (
                id           TEXT PRIMARY KEY,
                question_id  TEXT NOT NULL REFERENCES questions(id) ON DELETE CASCADE,
                choice_id    TEXT NOT NULL REFERENCES choices(id) ON DELETE CASCADE,
                user_id      TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL,
                UNIQUE(question_id, user_id)
            );

            CREATE INDEX idx_votes_choice
                ON votes(choice_id);

            INSERT INTO schema_version (version) VALUES (2);
            "
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 2);

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }
}
