use rusqlite_migration::{M, Migrations};
use std::sync::LazyLock;

pub static MIGRATIONS: LazyLock<Migrations<'static>> = LazyLock::new(|| {
    Migrations::new(vec![
        M::up(
            "
CREATE TABLE exercises (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    concept     TEXT NOT NULL,
    level       TEXT
);

CREATE TABLE interactions (
    id          TEXT PRIMARY KEY,
    learner_id  TEXT NOT NULL,
    exercise_id TEXT NOT NULL,
    started_at  TEXT NOT NULL
);

CREATE TABLE messages (
    id             INTEGER PRIMARY KEY,
    interaction_id TEXT NOT NULL REFERENCES interactions(id) ON DELETE CASCADE,
    seq            INTEGER NOT NULL,
    role           TEXT NOT NULL,
    content        TEXT NOT NULL
);

-- No foreign key on exercise_id: results may reference removed exercises.
CREATE TABLE results (
    id               INTEGER PRIMARY KEY,
    learner_id       TEXT NOT NULL,
    exercise_id      TEXT NOT NULL,
    interaction_id   TEXT NOT NULL,
    timestamp        TEXT NOT NULL,
    message_count    INTEGER NOT NULL DEFAULT 0,
    solved_first_try INTEGER NOT NULL DEFAULT 0,
    ai_analysis      TEXT,
    ai_advice        TEXT,
    error_tags       TEXT NOT NULL DEFAULT '[]',
    classifier_status TEXT
);

CREATE INDEX idx_results_learner ON results(learner_id, timestamp);
CREATE INDEX idx_exercises_concept ON exercises(concept);
CREATE INDEX idx_messages_interaction ON messages(interaction_id, seq);
",
        ),
    ])
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_valid() {
        MIGRATIONS.validate().unwrap();
    }

    #[test]
    fn migrations_apply_to_fresh_db() {
        let mut conn = rusqlite::Connection::open_in_memory().unwrap();
        MIGRATIONS.to_latest(&mut conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
                 AND name IN ('exercises', 'interactions', 'messages', 'results')",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
    }
}
