use crate::TutorError;
use crate::classify::{Classifier, PipelineRun, run_pipeline};
use crate::model::{ChatMessage, ClassificationOutcome, ClassifierStatus, NewResult, validate_id};
use crate::store;
use crate::vocabulary::AcVocabulary;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

const MSG_SAVED: &str = "Session saved.";
const MSG_SAVED_UNCLASSIFIED: &str = "Session saved. Automatic feedback is not available right now.";

#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    /// Learner id (24-char hex).
    pub learner_id: String,
    /// Exercise id (24-char hex).
    pub exercise_id: String,
    /// Interaction whose transcript is classified (24-char hex).
    pub interaction_id: String,
    /// Whether the learner solved the exercise on the first attempt.
    #[serde(default)]
    pub solved_first_try: bool,
}

impl FinalizeRequest {
    pub fn validate(&self) -> Result<(), TutorError> {
        validate_id("learnerId", &self.learner_id)?;
        validate_id("exerciseId", &self.exercise_id)?;
        validate_id("interactionId", &self.interaction_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSummary {
    pub message_count: u32,
    pub has_analysis: bool,
    pub has_advice: bool,
    pub error_labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub message: String,
    pub classifier_status: ClassifierStatus,
    pub saved: SavedSummary,
}

/// Validate the request and load the transcript it refers to.
pub fn load_transcript(conn: &Connection, request: &FinalizeRequest) -> Result<Vec<ChatMessage>, TutorError> {
    request.validate()?;
    store::interaction_transcript(conn, &request.interaction_id)?
        .ok_or_else(|| TutorError::NotFound(format!("interaction {}", request.interaction_id)))
}

/// Run the classifier, or mark the run skipped when there is none. Touches no
/// storage, so callers can release their connection while it blocks.
pub fn classify_transcript<C>(
    interaction_id: &str,
    transcript: &[ChatMessage],
    classifier: Option<&C>,
    vocab: &AcVocabulary,
) -> PipelineRun
where
    C: Classifier + ?Sized,
{
    let run = match classifier {
        Some(c) => run_pipeline(c, vocab, transcript),
        None => PipelineRun {
            outcome: ClassificationOutcome::default(),
            status: ClassifierStatus::Skipped,
            error_tags: Vec::new(),
        },
    };
    crate::metrics::record_classifier_run(run.status);
    log::info!(
        "interaction {interaction_id}: classifier {} with {} tags",
        run.status.as_str(),
        run.error_tags.len()
    );
    run
}

/// Persist one result for a classified (or skipped) session.
pub fn save_result(
    conn: &Connection,
    request: &FinalizeRequest,
    message_count: usize,
    run: PipelineRun,
    now: DateTime<Utc>,
) -> Result<FinalizeResponse, TutorError> {
    let result = NewResult {
        learner_id: request.learner_id.clone(),
        exercise_id: request.exercise_id.clone(),
        interaction_id: request.interaction_id.clone(),
        timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        message_count: u32::try_from(message_count).unwrap_or(u32::MAX),
        solved_first_try: request.solved_first_try,
        ai_analysis: run.outcome.analysis,
        ai_advice: run.outcome.advice,
        error_tags: run.error_tags,
        classifier_status: run.status,
    };
    store::insert_result(conn, &result)?;

    let message = if run.status == ClassifierStatus::Ok {
        MSG_SAVED
    } else {
        MSG_SAVED_UNCLASSIFIED
    };

    Ok(FinalizeResponse {
        message: message.into(),
        classifier_status: run.status,
        saved: SavedSummary {
            message_count: result.message_count,
            has_analysis: result.ai_analysis.is_some(),
            has_advice: result.ai_advice.is_some(),
            error_labels: result.error_tags.into_iter().map(|t| t.label).collect(),
        },
    })
}

/// Classify the interaction's transcript and persist one result.
///
/// `classifier: None` means classification is switched off; the result is
/// still saved with status `skipped`. Classifier failures are folded into the
/// status and never prevent the insert.
pub fn finalize_session<C>(
    conn: &Connection,
    request: &FinalizeRequest,
    classifier: Option<&C>,
    vocab: &AcVocabulary,
    now: DateTime<Utc>,
) -> Result<FinalizeResponse, TutorError>
where
    C: Classifier + ?Sized,
{
    let transcript = load_transcript(conn, request)?;
    let run = classify_transcript(&request.interaction_id, &transcript, classifier, vocab);
    save_result(conn, request, transcript.len(), run, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassifierError;
    use crate::classify::tests::ScriptedClassifier;
    use crate::vocabulary::UNKNOWN_TAG;
    use chrono::TimeZone;

    const LEARNER: &str = "65a1f0c2e4b0a1b2c3d4e5f6";
    const EXERCISE: &str = "65a1f0c2e4b0a1b2c3d4e5f7";
    const INTERACTION: &str = "65a1f0c2e4b0a1b2c3d4e5f8";
    const EMPTY_INTERACTION: &str = "65a1f0c2e4b0a1b2c3d4e5f9";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 10, 21, 15, 0).unwrap()
    }

    fn setup() -> Connection {
        let mut conn = crate::store::tests::test_conn();
        let msgs = vec![
            ChatMessage { role: "user".into(), content: "The current is smaller after the bulb".into() },
            ChatMessage { role: "assistant".into(), content: "Where could it go?".into() },
            ChatMessage { role: "user".into(), content: "The bulb uses it".into() },
        ];
        store::insert_interaction(&mut conn, INTERACTION, LEARNER, EXERCISE, "2024-06-10T21:00:00Z", &msgs)
            .unwrap();
        store::insert_interaction(&mut conn, EMPTY_INTERACTION, LEARNER, EXERCISE, "2024-06-10T21:00:00Z", &[])
            .unwrap();
        conn
    }

    fn request(interaction: &str) -> FinalizeRequest {
        FinalizeRequest {
            learner_id: LEARNER.into(),
            exercise_id: EXERCISE.into(),
            interaction_id: interaction.into(),
            solved_first_try: false,
        }
    }

    fn vocab() -> AcVocabulary {
        AcVocabulary::embedded().unwrap()
    }

    fn saved_rows(conn: &Connection) -> Vec<(String, String, Option<String>)> {
        let mut stmt = conn
            .prepare("SELECT classifier_status, error_tags, ai_analysis FROM results ORDER BY id")
            .unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn classified_session_is_saved() {
        let conn = setup();
        let classifier = ScriptedClassifier::new(vec![Ok(
            r#"{"analysis": "Believes the bulb consumes current.", "advice": "Measure before and after the bulb.", "acs": ["AC1", "NOPE"]}"#.into(),
        )]);
        let resp = finalize_session(&conn, &request(INTERACTION), Some(&classifier), &vocab(), now())
            .unwrap();

        assert_eq!(resp.classifier_status, ClassifierStatus::Ok);
        assert_eq!(resp.message, MSG_SAVED);
        assert_eq!(resp.saved, SavedSummary {
            message_count: 3,
            has_analysis: true,
            has_advice: true,
            error_labels: vec!["AC1".into()],
        });

        let rows = saved_rows(&conn);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "ok");
        assert!(rows[0].1.contains("AC1"));
    }

    #[test]
    fn invalid_json_still_saves_with_sentinel() {
        let conn = setup();
        let classifier = ScriptedClassifier::new(vec![Ok("no json here".into()), Ok("nope".into())]);
        let resp = finalize_session(&conn, &request(INTERACTION), Some(&classifier), &vocab(), now())
            .unwrap();

        assert_eq!(resp.classifier_status, ClassifierStatus::FailInvalidJson);
        assert_eq!(resp.message, MSG_SAVED_UNCLASSIFIED);
        assert_eq!(resp.saved.error_labels, vec![UNKNOWN_TAG.to_string()]);
        assert!(!resp.saved.has_analysis);
        assert_eq!(saved_rows(&conn).len(), 1);
    }

    #[test]
    fn timeout_on_empty_conversation_saves_without_tags() {
        let conn = setup();
        let classifier =
            ScriptedClassifier::new(vec![Err(ClassifierError::Timeout("120s elapsed".into()))]);
        let resp =
            finalize_session(&conn, &request(EMPTY_INTERACTION), Some(&classifier), &vocab(), now())
                .unwrap();
        assert_eq!(resp.classifier_status, ClassifierStatus::FailTimeout);
        assert_eq!(resp.saved.message_count, 0);
        assert!(resp.saved.error_labels.is_empty());
        assert_eq!(saved_rows(&conn)[0].1, "[]");
    }

    #[test]
    fn disabled_classifier_is_skipped() {
        let conn = setup();
        let resp = finalize_session::<ScriptedClassifier>(
            &conn,
            &request(INTERACTION),
            None,
            &vocab(),
            now(),
        )
        .unwrap();
        assert_eq!(resp.classifier_status, ClassifierStatus::Skipped);
        assert_eq!(saved_rows(&conn)[0].0, "skipped");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["classifierStatus"], "skipped");
        assert_eq!(json["saved"]["messageCount"], 3);
        assert_eq!(json["saved"]["hasAnalysis"], false);
    }

    #[test]
    fn malformed_id_rejected_before_storage() {
        let conn = Connection::open_in_memory().unwrap();
        let mut req = request(INTERACTION);
        req.learner_id = "bob".into();
        let err = finalize_session::<ScriptedClassifier>(&conn, &req, None, &vocab(), now())
            .unwrap_err();
        assert!(matches!(err, TutorError::InvalidInput(_)));
    }

    #[test]
    fn missing_interaction_is_not_found() {
        let conn = setup();
        let classifier = ScriptedClassifier::new(vec![]);
        let err = finalize_session(
            &conn,
            &request("ffffffffffffffffffffffff"),
            Some(&classifier),
            &vocab(),
            now(),
        )
        .unwrap_err();
        assert!(matches!(err, TutorError::NotFound(_)));
        assert_eq!(classifier.calls(), 0);
        assert!(saved_rows(&conn).is_empty());
    }

    #[test]
    fn saved_result_feeds_progress() {
        let conn = setup();
        let classifier = ScriptedClassifier::new(vec![Ok(r#"{"acs": ["AC13"]}"#.into())]);
        finalize_session(&conn, &request(INTERACTION), Some(&classifier), &vocab(), now()).unwrap();

        let report =
            crate::progress::learner_progress(&conn, LEARNER, now(), chrono_tz::Europe::Madrid)
                .unwrap();
        assert_eq!(report.mean_interactions, 3.0);
        assert_eq!(report.frequent_errors[0].label, "AC13");
        assert_eq!(report.weekly_summary.streak_days, 1);
    }
}
