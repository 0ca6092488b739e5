use crate::TutorError;
use crate::db::open_db_readonly;
use rusqlite::Connection;
use std::path::Path;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DbCounts {
    pub exercises: i64,
    pub interactions: i64,
    pub results: i64,
    pub learners: i64,
}

pub fn db_counts(conn: &Connection) -> Result<DbCounts, TutorError> {
    let count = |sql: &str| -> Result<i64, TutorError> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
    Ok(DbCounts {
        exercises: count("SELECT COUNT(*) FROM exercises")?,
        interactions: count("SELECT COUNT(*) FROM interactions")?,
        results: count("SELECT COUNT(*) FROM results")?,
        learners: count("SELECT COUNT(DISTINCT learner_id) FROM results")?,
    })
}

/// Classifier outcome breakdown over stored results.
fn status_breakdown(conn: &Connection) -> Result<Vec<(String, i64)>, TutorError> {
    let mut stmt = conn.prepare(
        "SELECT COALESCE(classifier_status, 'unknown'), COUNT(*) FROM results
         GROUP BY 1 ORDER BY COUNT(*) DESC",
    )?;
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;
    Ok(rows)
}

pub fn handle_status(db_path: &Path) -> Result<(), TutorError> {
    if !db_path.exists() {
        eprintln!("tutorlens: no database at {}", db_path.display());
        return Ok(());
    }

    let db_size = std::fs::metadata(db_path)?.len();
    let conn = open_db_readonly(db_path)?;
    let counts = db_counts(&conn)?;
    let breakdown = status_breakdown(&conn)?;

    let last_result: Option<String> = conn
        .query_row("SELECT MAX(timestamp) FROM results", [], |r| r.get(0))
        .ok()
        .flatten();

    eprintln!("tutorlens: database — {}", fmt_size(db_size));
    eprintln!("tutorlens: exercises — {}", counts.exercises);
    eprintln!("tutorlens: interactions — {}", counts.interactions);
    if breakdown.is_empty() {
        eprintln!("tutorlens: results — {}", counts.results);
    } else {
        let parts: Vec<String> = breakdown.iter().map(|(s, c)| format!("{s}: {c}")).collect();
        eprintln!("tutorlens: results — {} ({})", counts.results, parts.join(", "));
    }
    eprintln!("tutorlens: learners — {}", counts.learners);
    if let Some(ts) = last_result {
        eprintln!("tutorlens: last result — {ts}");
    }

    Ok(())
}

fn fmt_size(bytes: u64) -> String {
    if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}
