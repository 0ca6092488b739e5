//! Next-exercise recommendation from a learner's errors and per-concept effort.

use crate::TutorError;
use crate::model::{ExerciseRef, ResultRecord};
use crate::progress::{ConceptEfficiency, FrequentError};
use crate::vocabulary::UNKNOWN_TAG;
use serde::Serialize;

const MOTIVE_ERRORS: &str = "Based on your recent errors: this exercise targets the same concept.";
const MOTIVE_ERRORS_NO_EXERCISE: &str =
    "Based on your recent errors, reviewing this concept should help.";
const MOTIVE_HARDEST: &str = "This is the concept that currently takes you the most interactions.";
const MOTIVE_HARDEST_NO_EXERCISE: &str =
    "This concept takes you the most interactions; a review may help.";
const MOTIVE_GET_STARTED: &str = "Complete your first exercise to get personalised recommendations.";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub title: Option<String>,
    pub motive: String,
    pub exercise_id: Option<String>,
    pub concept: Option<String>,
}

impl Recommendation {
    pub fn get_started() -> Self {
        Self {
            title: None,
            motive: MOTIVE_GET_STARTED.into(),
            exercise_id: None,
            concept: None,
        }
    }

    fn for_concept(concept: &str, found: Option<ExerciseRef>, motive: &str, fallback: &str) -> Self {
        match found {
            Some(ex) => Self {
                title: Some(ex.title),
                motive: motive.into(),
                exercise_id: Some(ex.id),
                concept: Some(concept.to_string()),
            },
            None => Self {
                title: Some(format!("Review: {concept}")),
                motive: fallback.into(),
                exercise_id: None,
                concept: Some(concept.to_string()),
            },
        }
    }
}

/// Hardest concept by mean interactions. Ties keep the first seen.
fn hardest_concept(per_concept: &[ConceptEfficiency]) -> Option<&ConceptEfficiency> {
    per_concept.iter().fold(None, |best, c| match best {
        Some(b) if b.mean_interactions >= c.mean_interactions => Some(b),
        _ => Some(c),
    })
}

/// Pick the next exercise.
///
/// Order: real (non-sentinel) frequent errors target the latest session's
/// concept; otherwise the hardest concept; otherwise a get-started nudge.
/// `lookup` answers `Ok(None)` when no exercise exists for a concept, which
/// still yields a concept-only recommendation.
pub fn select_recommendation<F>(
    frequent_errors: &[FrequentError],
    latest: Option<&ResultRecord>,
    per_concept: &[ConceptEfficiency],
    mut lookup: F,
) -> Result<Recommendation, TutorError>
where
    F: FnMut(&str) -> Result<Option<ExerciseRef>, TutorError>,
{
    let has_real_errors = frequent_errors.iter().any(|e| e.label != UNKNOWN_TAG);
    if has_real_errors
        && let Some(concept) = latest.and_then(|r| r.exercise.concept())
    {
        let found = lookup(concept)?;
        return Ok(Recommendation::for_concept(
            concept,
            found,
            MOTIVE_ERRORS,
            MOTIVE_ERRORS_NO_EXERCISE,
        ));
    }

    if let Some(hardest) = hardest_concept(per_concept) {
        let found = lookup(&hardest.concept)?;
        return Ok(Recommendation::for_concept(
            &hardest.concept,
            found,
            MOTIVE_HARDEST,
            MOTIVE_HARDEST_NO_EXERCISE,
        ));
    }

    Ok(Recommendation::get_started())
}
