//! Learner progress report: interaction averages, per-concept difficulty,
//! weekly activity, streak, frequent errors and the next recommendation.
//!
//! Everything here is a pure function of the learner's results plus `now` and
//! the calendar zone, except the exercise lookup used for the recommendation.

use crate::TutorError;
use crate::calendar::{compute_streak, parse_instant};
use crate::model::{ExerciseRef, ResultRecord, validate_id};
use crate::recommend::{Recommendation, select_recommendation};
use crate::store;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

const DEFAULT_TITLE: &str = "Untitled exercise";
const DEFAULT_ANALYSIS: &str = "No analysis is available for this session yet.";
const DEFAULT_ADVICE: &str = "No advice is available for this session yet.";
const WELCOME_TITLE: &str = "Welcome!";
const WELCOME_ANALYSIS: &str = "Your first session analysis will appear here.";
const WELCOME_ADVICE: &str = "Pick any exercise to get started.";

const WEEKLY_WINDOW_DAYS: i64 = 7;
const TOP_ERRORS: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptEfficiency {
    pub concept: String,
    pub mean_interactions: f64,
    pub sessions: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrequentError {
    pub label: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklySummary {
    pub completed_exercises: u32,
    pub distinct_concepts: u32,
    pub streak_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastSession {
    pub title: String,
    pub analysis: String,
    pub advice: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub mean_interactions: f64,
    pub per_concept_efficiency: Vec<ConceptEfficiency>,
    pub weekly_summary: WeeklySummary,
    pub last_session: LastSession,
    pub frequent_errors: Vec<FrequentError>,
    pub recommendation: Recommendation,
}

impl ProgressReport {
    /// Fixed payload for a learner with no history.
    pub fn welcome() -> Self {
        Self {
            mean_interactions: 0.0,
            per_concept_efficiency: Vec::new(),
            weekly_summary: WeeklySummary::default(),
            last_session: LastSession {
                title: WELCOME_TITLE.into(),
                analysis: WELCOME_ANALYSIS.into(),
                advice: WELCOME_ADVICE.into(),
            },
            frequent_errors: Vec::new(),
            recommendation: Recommendation::get_started(),
        }
    }
}

pub fn mean_interactions(records: &[ResultRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let total: u64 = records.iter().map(|r| u64::from(r.message_count)).sum();
    total as f64 / records.len() as f64
}

/// Mean interactions per concept, in first-seen order. Records without a
/// resolvable concept name are left out.
pub fn per_concept_efficiency(records: &[ResultRecord]) -> Vec<ConceptEfficiency> {
    let mut order: Vec<&str> = Vec::new();
    let mut sums: HashMap<&str, (u64, u32)> = HashMap::new();
    for record in records {
        let Some(concept) = record.exercise.concept() else {
            continue;
        };
        let entry = sums.entry(concept).or_insert_with(|| {
            order.push(concept);
            (0, 0)
        });
        entry.0 += u64::from(record.message_count);
        entry.1 += 1;
    }

    order
        .into_iter()
        .map(|concept| {
            let (total, sessions) = sums[concept];
            ConceptEfficiency {
                concept: concept.to_string(),
                mean_interactions: total as f64 / f64::from(sessions),
                sessions,
            }
        })
        .collect()
}

/// Activity in the seven days before `now` (wall-clock, exclusive lower bound)
/// plus the streak over the full history.
pub fn weekly_summary(records: &[ResultRecord], now: DateTime<Utc>, tz: Tz) -> WeeklySummary {
    let cutoff = now - Duration::days(WEEKLY_WINDOW_DAYS);
    let mut exercises: HashSet<&str> = HashSet::new();
    let mut concepts: HashSet<&str> = HashSet::new();

    for record in records {
        let Some(at) = parse_instant(&record.timestamp, tz) else {
            continue;
        };
        if at <= cutoff {
            continue;
        }
        exercises.insert(record.exercise.key());
        if let Some(concept) = record.exercise.concept() {
            concepts.insert(concept);
        }
    }

    WeeklySummary {
        completed_exercises: exercises.len() as u32,
        distinct_concepts: concepts.len() as u32,
        streak_days: compute_streak(records.iter().map(|r| Some(r.timestamp.as_str())), tz),
    }
}

/// Summary of the first record, which callers supply newest-first.
pub fn last_session(records: &[ResultRecord]) -> Option<LastSession> {
    let latest = records.first()?;
    let non_blank = |s: &Option<String>| s.as_deref().filter(|t| !t.trim().is_empty()).map(str::to_string);
    Some(LastSession {
        title: latest.exercise.title().unwrap_or(DEFAULT_TITLE).to_string(),
        analysis: non_blank(&latest.ai_analysis).unwrap_or_else(|| DEFAULT_ANALYSIS.into()),
        advice: non_blank(&latest.ai_advice).unwrap_or_else(|| DEFAULT_ADVICE.into()),
    })
}

/// Top three error labels by count. Equal counts keep first-seen order.
pub fn frequent_errors(records: &[ResultRecord]) -> Vec<FrequentError> {
    let mut counts: Vec<FrequentError> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for tag in records.iter().flat_map(|r| r.error_tags.iter()) {
        match index.get(tag.label.as_str()) {
            Some(&i) => counts[i].count += 1,
            None => {
                index.insert(&tag.label, counts.len());
                counts.push(FrequentError { label: tag.label.clone(), count: 1 });
            }
        }
    }
    // sort_by is stable
    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(TOP_ERRORS);
    counts
}

/// Build the full report from newest-first records.
pub fn summarize<F>(
    records: &[ResultRecord],
    now: DateTime<Utc>,
    tz: Tz,
    lookup: F,
) -> Result<ProgressReport, TutorError>
where
    F: FnMut(&str) -> Result<Option<ExerciseRef>, TutorError>,
{
    let Some(last) = last_session(records) else {
        return Ok(ProgressReport::welcome());
    };

    let per_concept = per_concept_efficiency(records);
    let errors = frequent_errors(records);
    let recommendation = select_recommendation(&errors, records.first(), &per_concept, lookup)?;

    Ok(ProgressReport {
        mean_interactions: mean_interactions(records),
        per_concept_efficiency: per_concept,
        weekly_summary: weekly_summary(records, now, tz),
        last_session: last,
        frequent_errors: errors,
        recommendation,
    })
}

/// Load a learner's history and summarize it.
pub fn learner_progress(
    conn: &Connection,
    learner_id: &str,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<ProgressReport, TutorError> {
    validate_id("learnerId", learner_id)?;
    let records = store::results_for_learner(conn, learner_id)?;
    log::debug!("learner {learner_id}: {} results", records.len());
    summarize(&records, now, tz, |concept| store::exercise_by_concept(conn, concept))
}
