//! Seed the database from JSON lines on stdin: exercises, interactions with
//! their transcripts, and historical results.

use crate::TutorError;
use crate::calendar::parse_instant;
use crate::config::load_config;
use crate::db::open_db;
use crate::model::{ChatMessage, ClassifierStatus, ErrorTag, ExerciseRef, NewResult, validate_id};
use crate::store;
use crate::vocabulary::{self, AcVocabulary, UNKNOWN_TAG};
use chrono::SecondsFormat;
use chrono_tz::Tz;
use rusqlite::Connection;
use serde::Deserialize;
use std::io::BufRead;
use std::path::Path;

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ImportLine {
    Exercise {
        id: String,
        title: String,
        concept: String,
        #[serde(default)]
        level: Option<String>,
    },
    Interaction {
        id: String,
        learner_id: String,
        exercise_id: String,
        started_at: String,
        #[serde(default)]
        messages: Vec<ChatMessage>,
    },
    Result {
        learner_id: String,
        exercise_id: String,
        interaction_id: String,
        timestamp: String,
        #[serde(default)]
        message_count: u32,
        #[serde(default)]
        solved_first_try: bool,
        #[serde(default)]
        ai_analysis: Option<String>,
        #[serde(default)]
        ai_advice: Option<String>,
        #[serde(default)]
        error_tags: Vec<ErrorTag>,
    },
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub exercises: usize,
    pub interactions: usize,
    pub results: usize,
}

/// Normalize to UTC RFC 3339 so text ordering in SQLite matches time ordering.
fn normalize_timestamp(ts: &str, tz: Tz) -> Result<String, TutorError> {
    parse_instant(ts, tz)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| TutorError::InvalidInput(format!("unparseable timestamp {ts:?}")))
}

/// Tags must come from the closed vocabulary, or be the sentinel.
fn check_tags(tags: &[ErrorTag], vocab: &AcVocabulary) -> Result<(), TutorError> {
    match tags.iter().find(|t| t.label != UNKNOWN_TAG && !vocab.contains(&t.label)) {
        Some(bad) => Err(TutorError::InvalidInput(format!(
            "error tag {:?} is not in the AC vocabulary",
            bad.label
        ))),
        None => Ok(()),
    }
}

fn import_line(
    conn: &Connection,
    line: ImportLine,
    tz: Tz,
    vocab: &AcVocabulary,
    stats: &mut ImportStats,
) -> Result<(), TutorError> {
    match line {
        ImportLine::Exercise { id, title, concept, level } => {
            validate_id("id", &id)?;
            store::insert_exercise(conn, &ExerciseRef { id, title, concept, level })?;
            stats.exercises += 1;
        }
        ImportLine::Interaction { id, learner_id, exercise_id, started_at, messages } => {
            validate_id("id", &id)?;
            validate_id("learner_id", &learner_id)?;
            validate_id("exercise_id", &exercise_id)?;
            let started_at = normalize_timestamp(&started_at, tz)?;
            store::write_interaction(conn, &id, &learner_id, &exercise_id, &started_at, &messages)?;
            stats.interactions += 1;
        }
        ImportLine::Result {
            learner_id,
            exercise_id,
            interaction_id,
            timestamp,
            message_count,
            solved_first_try,
            ai_analysis,
            ai_advice,
            error_tags,
        } => {
            validate_id("learner_id", &learner_id)?;
            validate_id("exercise_id", &exercise_id)?;
            validate_id("interaction_id", &interaction_id)?;
            check_tags(&error_tags, vocab)?;
            let result = NewResult {
                learner_id,
                exercise_id,
                interaction_id,
                timestamp: normalize_timestamp(&timestamp, tz)?,
                message_count,
                solved_first_try,
                ai_analysis,
                ai_advice,
                error_tags,
                classifier_status: ClassifierStatus::Skipped,
            };
            store::insert_result(conn, &result)?;
            stats.results += 1;
        }
    }
    Ok(())
}

/// Import every non-blank line in one transaction. The first bad line is
/// named in the error and nothing is kept.
pub fn import_records<R: BufRead>(
    conn: &mut Connection,
    reader: R,
    tz: Tz,
    vocab: &AcVocabulary,
) -> Result<ImportStats, TutorError> {
    let tx = conn.transaction()?;
    let mut stats = ImportStats::default();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let parsed: ImportLine = serde_json::from_str(&line)
            .map_err(|e| TutorError::InvalidInput(format!("line {}: {e}", i + 1)))?;
        import_line(&tx, parsed, tz, vocab, &mut stats).map_err(|e| match e {
            TutorError::InvalidInput(msg) => TutorError::InvalidInput(format!("line {}: {msg}", i + 1)),
            other => other,
        })?;
    }
    tx.commit()?;
    Ok(stats)
}

pub fn handle_import(db_path: &Path) -> Result<(), TutorError> {
    let config = load_config()?;
    let tz = config.calendar.tz()?;
    let vocab = vocabulary::init(config.classifier.vocabulary_path.as_deref())?;
    let mut conn = open_db(db_path)?;
    let stdin = std::io::stdin();
    let stats = import_records(&mut conn, stdin.lock(), tz, vocab)?;
    eprintln!(
        "tutorlens: imported {} exercises, {} interactions, {} results",
        stats.exercises, stats.interactions, stats.results
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MADRID: Tz = chrono_tz::Europe::Madrid;

    fn vocab() -> AcVocabulary {
        AcVocabulary::embedded().unwrap()
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn imports_all_kinds() {
        let mut conn = crate::store::tests::test_conn();
        let input = r#"
{"kind": "exercise", "id": "65a1f0c2e4b0a1b2c3d4e5f7", "title": "Two bulbs", "concept": "series", "level": "basic"}
{"kind": "interaction", "id": "65a1f0c2e4b0a1b2c3d4e5f8", "learner_id": "65a1f0c2e4b0a1b2c3d4e5f6", "exercise_id": "65a1f0c2e4b0a1b2c3d4e5f7", "started_at": "2024-06-10T20:00:00+02:00", "messages": [{"role": "user", "content": "hi"}]}

{"kind": "result", "learner_id": "65a1f0c2e4b0a1b2c3d4e5f6", "exercise_id": "65a1f0c2e4b0a1b2c3d4e5f7", "interaction_id": "65a1f0c2e4b0a1b2c3d4e5f8", "timestamp": "2024-06-10T20:30:00+02:00", "message_count": 6, "error_tags": [{"label": "AC1", "text": "x"}]}
"#;
        let stats = import_records(&mut conn, input.as_bytes(), MADRID, &vocab()).unwrap();
        assert_eq!(stats, ImportStats { exercises: 1, interactions: 1, results: 1 });

        let records = store::results_for_learner(&conn, "65a1f0c2e4b0a1b2c3d4e5f6").unwrap();
        assert_eq!(records[0].timestamp, "2024-06-10T18:30:00.000Z");
        assert_eq!(records[0].message_count, 6);
        assert_eq!(records[0].exercise.concept(), Some("series"));
    }

    #[test]
    fn bad_line_is_reported_with_number() {
        let mut conn = crate::store::tests::test_conn();
        let input = "{\"kind\": \"exercise\", \"id\": \"65a1f0c2e4b0a1b2c3d4e5f7\", \"title\": \"t\", \"concept\": \"c\"}\n{\"kind\": \"exercise\", \"id\": \"short\", \"title\": \"t\", \"concept\": \"c\"}\n";
        let err = import_records(&mut conn, input.as_bytes(), MADRID, &vocab()).unwrap_err();
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn unparseable_timestamp_rejected() {
        let mut conn = crate::store::tests::test_conn();
        let input = r#"{"kind": "result", "learner_id": "65a1f0c2e4b0a1b2c3d4e5f6", "exercise_id": "65a1f0c2e4b0a1b2c3d4e5f7", "interaction_id": "65a1f0c2e4b0a1b2c3d4e5f8", "timestamp": "last tuesday"}"#;
        let err = import_records(&mut conn, input.as_bytes(), MADRID, &vocab()).unwrap_err();
        assert!(matches!(err, TutorError::InvalidInput(_)));
    }

    #[test]
    fn unknown_kind_rejected() {
        let mut conn = crate::store::tests::test_conn();
        let err = import_records(&mut conn, r#"{"kind": "badge"}"#.as_bytes(), MADRID, &vocab()).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn tag_outside_vocabulary_rejected() {
        let mut conn = crate::store::tests::test_conn();
        let input = r#"{"kind": "result", "learner_id": "65a1f0c2e4b0a1b2c3d4e5f6", "exercise_id": "65a1f0c2e4b0a1b2c3d4e5f7", "interaction_id": "65a1f0c2e4b0a1b2c3d4e5f8", "timestamp": "2024-06-10T20:30:00Z", "error_tags": [{"label": "BOGUS", "text": "x"}]}"#;
        let err = import_records(&mut conn, input.as_bytes(), MADRID, &vocab()).unwrap_err();
        assert!(matches!(err, TutorError::InvalidInput(_)));
        assert!(err.to_string().contains("line 1"), "{err}");
        assert!(err.to_string().contains("BOGUS"), "{err}");
        assert_eq!(count(&conn, "results"), 0);
    }

    #[test]
    fn sentinel_tag_accepted() {
        let mut conn = crate::store::tests::test_conn();
        let input = r#"{"kind": "result", "learner_id": "65a1f0c2e4b0a1b2c3d4e5f6", "exercise_id": "65a1f0c2e4b0a1b2c3d4e5f7", "interaction_id": "65a1f0c2e4b0a1b2c3d4e5f8", "timestamp": "2024-06-10T20:30:00Z", "error_tags": [{"label": "AC_UNK", "text": "Unknown cause: timeout"}, {"label": "AC2", "text": "y"}]}"#;
        let stats = import_records(&mut conn, input.as_bytes(), MADRID, &vocab()).unwrap();
        assert_eq!(stats.results, 1);
    }

    #[test]
    fn bad_line_rolls_back_earlier_lines() {
        let mut conn = crate::store::tests::test_conn();
        let input = r#"{"kind": "exercise", "id": "65a1f0c2e4b0a1b2c3d4e5f7", "title": "t", "concept": "c"}
{"kind": "interaction", "id": "65a1f0c2e4b0a1b2c3d4e5f8", "learner_id": "65a1f0c2e4b0a1b2c3d4e5f6", "exercise_id": "65a1f0c2e4b0a1b2c3d4e5f7", "started_at": "2024-06-10T20:00:00Z", "messages": [{"role": "user", "content": "hi"}]}
{"kind": "exercise", "id": "short", "title": "t", "concept": "c"}
"#;
        let err = import_records(&mut conn, input.as_bytes(), MADRID, &vocab()).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
        assert_eq!(count(&conn, "exercises"), 0);
        assert_eq!(count(&conn, "interactions"), 0);
        assert_eq!(count(&conn, "messages"), 0);
    }
}
