//! Records shared by the progress engine, the classifier pipeline and storage.

use crate::TutorError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static OBJECT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-fA-F]{24}$").expect("valid regex"));

/// Reject anything that is not a 24-char hex object id.
/// `field` names the offending input in the error message.
pub fn validate_id(field: &str, value: &str) -> Result<(), TutorError> {
    if OBJECT_ID.is_match(value) {
        Ok(())
    } else {
        Err(TutorError::InvalidInput(format!(
            "{field} must be a 24-character hex identifier, got {value:?}"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseRef {
    pub id: String,
    pub title: String,
    pub concept: String,
    #[serde(default)]
    pub level: Option<String>,
}

/// A result's pointer to its exercise. Storage resolves it when the exercise
/// row still exists; otherwise only the raw id is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExerciseLink {
    Resolved(ExerciseRef),
    Unresolved(String),
}

impl ExerciseLink {
    /// Identifier used for distinct-exercise counting.
    pub fn key(&self) -> &str {
        match self {
            ExerciseLink::Resolved(ex) => &ex.id,
            ExerciseLink::Unresolved(raw) => raw,
        }
    }

    pub fn resolved(&self) -> Option<&ExerciseRef> {
        match self {
            ExerciseLink::Resolved(ex) => Some(ex),
            ExerciseLink::Unresolved(_) => None,
        }
    }

    /// Concept name, if the exercise is resolved and names one.
    pub fn concept(&self) -> Option<&str> {
        self.resolved()
            .map(|ex| ex.concept.trim())
            .filter(|c| !c.is_empty())
    }

    pub fn title(&self) -> Option<&str> {
        self.resolved()
            .map(|ex| ex.title.as_str())
            .filter(|t| !t.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorTag {
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub id: i64,
    pub learner_id: String,
    pub exercise: ExerciseLink,
    pub interaction_id: String,
    pub timestamp: String,
    pub message_count: u32,
    pub solved_first_try: bool,
    pub ai_analysis: Option<String>,
    pub ai_advice: Option<String>,
    pub error_tags: Vec<ErrorTag>,
}

/// A result built in full before its single insert.
#[derive(Debug, Clone)]
pub struct NewResult {
    pub learner_id: String,
    pub exercise_id: String,
    pub interaction_id: String,
    pub timestamp: String,
    pub message_count: u32,
    pub solved_first_try: bool,
    pub ai_analysis: Option<String>,
    pub ai_advice: Option<String>,
    pub error_tags: Vec<ErrorTag>,
    pub classifier_status: ClassifierStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassificationOutcome {
    pub analysis: Option<String>,
    pub advice: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierStatus {
    Ok,
    FailTimeout,
    FailInvalidJson,
    Skipped,
}

impl ClassifierStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ClassifierStatus::Ok => "ok",
            ClassifierStatus::FailTimeout => "fail_timeout",
            ClassifierStatus::FailInvalidJson => "fail_invalid_json",
            ClassifierStatus::Skipped => "skipped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_object_ids() {
        assert!(validate_id("learnerId", "65a1f0c2e4b0a1b2c3d4e5f6").is_ok());
        assert!(validate_id("learnerId", "65A1F0C2E4B0A1B2C3D4E5F6").is_ok());
    }

    #[test]
    fn rejects_malformed_ids() {
        for bad in ["", "abc", "65a1f0c2e4b0a1b2c3d4e5fz", "65a1f0c2e4b0a1b2c3d4e5f6a"] {
            let err = validate_id("exerciseId", bad).unwrap_err();
            assert!(matches!(err, TutorError::InvalidInput(_)), "{bad}");
            assert!(err.to_string().contains("exerciseId"));
        }
    }

    #[test]
    fn link_key_prefers_resolved_id() {
        let resolved = ExerciseLink::Resolved(ExerciseRef {
            id: "ex-1".into(),
            title: "Series circuits".into(),
            concept: "series".into(),
            level: None,
        });
        assert_eq!(resolved.key(), "ex-1");
        assert_eq!(resolved.concept(), Some("series"));

        let raw = ExerciseLink::Unresolved("ex-2".into());
        assert_eq!(raw.key(), "ex-2");
        assert_eq!(raw.concept(), None);
        assert_eq!(raw.title(), None);
    }

    #[test]
    fn blank_concept_is_unresolvable() {
        let link = ExerciseLink::Resolved(ExerciseRef {
            id: "ex-1".into(),
            title: "T".into(),
            concept: "  ".into(),
            level: None,
        });
        assert_eq!(link.concept(), None);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&ClassifierStatus::FailInvalidJson).unwrap();
        assert_eq!(json, "\"fail_invalid_json\"");
        assert_eq!(ClassifierStatus::FailTimeout.as_str(), "fail_timeout");
    }
}
