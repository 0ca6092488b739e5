//! SQLite reads and writes for results, exercises and interaction transcripts.

use crate::TutorError;
use crate::model::{ChatMessage, ErrorTag, ExerciseLink, ExerciseRef, NewResult, ResultRecord};
use rusqlite::{Connection, OptionalExtension, params};

fn row_to_exercise(row: &rusqlite::Row) -> rusqlite::Result<ExerciseRef> {
    Ok(ExerciseRef {
        id: row.get(0)?,
        title: row.get(1)?,
        concept: row.get(2)?,
        level: row.get(3)?,
    })
}

fn row_to_result(row: &rusqlite::Row) -> rusqlite::Result<ResultRecord> {
    let exercise_id: String = row.get(2)?;
    let resolved_id: Option<String> = row.get(10)?;
    let exercise = match resolved_id {
        Some(id) => ExerciseLink::Resolved(ExerciseRef {
            id,
            title: row.get(11)?,
            concept: row.get(12)?,
            level: row.get(13)?,
        }),
        None => ExerciseLink::Unresolved(exercise_id),
    };

    // A corrupt tag column reads as "no tags" rather than failing the report.
    let tags_json: String = row.get(9)?;
    let error_tags: Vec<ErrorTag> = serde_json::from_str(&tags_json).unwrap_or_default();

    Ok(ResultRecord {
        id: row.get(0)?,
        learner_id: row.get(1)?,
        exercise,
        interaction_id: row.get(3)?,
        timestamp: row.get(4)?,
        message_count: row.get(5)?,
        solved_first_try: row.get::<_, i64>(6)? != 0,
        ai_analysis: row.get(7)?,
        ai_advice: row.get(8)?,
        error_tags,
    })
}

/// All results for a learner, newest first, with the exercise joined in.
pub fn results_for_learner(
    conn: &Connection,
    learner_id: &str,
) -> Result<Vec<ResultRecord>, TutorError> {
    let mut stmt = conn.prepare(
        "SELECT r.id, r.learner_id, r.exercise_id, r.interaction_id, r.timestamp,
                r.message_count, r.solved_first_try, r.ai_analysis, r.ai_advice, r.error_tags,
                e.id, e.title, e.concept, e.level
         FROM results r
         LEFT JOIN exercises e ON e.id = r.exercise_id
         WHERE r.learner_id = ?1
         ORDER BY r.timestamp DESC, r.id DESC",
    )?;
    let records = stmt
        .query_map(params![learner_id], row_to_result)?
        .collect::<Result<_, _>>()?;
    Ok(records)
}

/// First exercise (by id) for a concept. `None` is a normal answer.
pub fn exercise_by_concept(
    conn: &Connection,
    concept: &str,
) -> Result<Option<ExerciseRef>, TutorError> {
    let exercise = conn
        .query_row(
            "SELECT id, title, concept, level FROM exercises
             WHERE concept = ?1 ORDER BY id LIMIT 1",
            params![concept],
            row_to_exercise,
        )
        .optional()?;
    Ok(exercise)
}

pub fn exercise_by_id(conn: &Connection, id: &str) -> Result<Option<ExerciseRef>, TutorError> {
    let exercise = conn
        .query_row(
            "SELECT id, title, concept, level FROM exercises WHERE id = ?1",
            params![id],
            row_to_exercise,
        )
        .optional()?;
    Ok(exercise)
}

/// Transcript of an interaction in message order, or `None` if the
/// interaction does not exist. An interaction with no messages yields `Some(vec![])`.
pub fn interaction_transcript(
    conn: &Connection,
    interaction_id: &str,
) -> Result<Option<Vec<ChatMessage>>, TutorError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM interactions WHERE id = ?1)",
        params![interaction_id],
        |r| r.get(0),
    )?;
    if !exists {
        return Ok(None);
    }

    let mut stmt = conn.prepare(
        "SELECT role, content FROM messages WHERE interaction_id = ?1 ORDER BY seq, id",
    )?;
    let messages = stmt
        .query_map(params![interaction_id], |row| {
            Ok(ChatMessage {
                role: row.get(0)?,
                content: row.get(1)?,
            })
        })?
        .collect::<Result<_, _>>()?;
    Ok(Some(messages))
}

pub fn insert_result(conn: &Connection, result: &NewResult) -> Result<i64, TutorError> {
    let tags_json = serde_json::to_string(&result.error_tags)?;
    conn.execute(
        "INSERT INTO results (learner_id, exercise_id, interaction_id, timestamp, message_count,
                              solved_first_try, ai_analysis, ai_advice, error_tags, classifier_status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            result.learner_id,
            result.exercise_id,
            result.interaction_id,
            result.timestamp,
            result.message_count,
            result.solved_first_try as i64,
            result.ai_analysis,
            result.ai_advice,
            tags_json,
            result.classifier_status.as_str(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_exercise(conn: &Connection, exercise: &ExerciseRef) -> Result<(), TutorError> {
    conn.execute(
        "INSERT INTO exercises (id, title, concept, level) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET title = excluded.title,
                                       concept = excluded.concept,
                                       level = excluded.level",
        params![exercise.id, exercise.title, exercise.concept, exercise.level],
    )?;
    Ok(())
}

/// Insert an interaction and its transcript in one transaction.
pub fn insert_interaction(
    conn: &mut Connection,
    id: &str,
    learner_id: &str,
    exercise_id: &str,
    started_at: &str,
    messages: &[ChatMessage],
) -> Result<(), TutorError> {
    let tx = conn.transaction()?;
    write_interaction(&tx, id, learner_id, exercise_id, started_at, messages)?;
    tx.commit()?;
    Ok(())
}

/// Insert an interaction and its transcript on a connection the caller
/// already holds a transaction on.
pub fn write_interaction(
    conn: &Connection,
    id: &str,
    learner_id: &str,
    exercise_id: &str,
    started_at: &str,
    messages: &[ChatMessage],
) -> Result<(), TutorError> {
    conn.execute(
        "INSERT INTO interactions (id, learner_id, exercise_id, started_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, learner_id, exercise_id, started_at],
    )?;
    let mut stmt = conn.prepare(
        "INSERT INTO messages (interaction_id, seq, role, content) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (seq, msg) in messages.iter().enumerate() {
        stmt.execute(params![id, seq as i64, msg.role, msg.content])?;
    }
    Ok(())
}
