use crate::TutorError;
use crate::classify::{Classifier, HttpClassifier};
use crate::config::load_config;
use crate::db::open_db;
use crate::finalize::{FinalizeRequest, classify_transcript, load_transcript, save_result};
use crate::progress::learner_progress;
use crate::vocabulary::{self, AcVocabulary};
use chrono::Utc;
use chrono_tz::Tz;
use rmcp::{
    ErrorData, ServerHandler, ServiceExt,
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router,
    transport::stdio,
};
use rusqlite::Connection;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

type DbHandle = Arc<Mutex<Connection>>;
pub type SharedClassifier = Arc<dyn Classifier + Send + Sync>;

#[derive(Clone)]
pub struct TutorServer {
    db: DbHandle,
    vocab: &'static AcVocabulary,
    tz: Tz,
    classifier: Option<SharedClassifier>,
    #[allow(dead_code)]
    tool_router: ToolRouter<Self>,
}

// --- Parameter types ---

#[derive(Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProgressParams {
    /// Learner id (24-char hex).
    pub learner_id: String,
}

// --- Response types ---

#[derive(Serialize)]
struct VocabularyEntry<'a> {
    id: &'a str,
    name: &'a str,
}

// --- Helpers ---

fn tool_err(e: TutorError) -> ErrorData {
    if e.is_client_error() {
        ErrorData::new(ErrorCode::INVALID_PARAMS, e.to_string(), None)
    } else {
        log::error!("tool failed: {e}");
        ErrorData::new(ErrorCode::INTERNAL_ERROR, "internal error", None)
    }
}

fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, ErrorData> {
    let json = serde_json::to_string(value).map_err(|e| tool_err(e.into()))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

// --- Core logic (pub for testing) ---

impl TutorServer {
    fn lock_db(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ErrorData> {
        self.db
            .lock()
            .map_err(|e| tool_err(TutorError::Config(format!("db lock poisoned: {e}"))))
    }

    pub fn do_learner_progress(&self, params: LearnerProgressParams) -> Result<CallToolResult, ErrorData> {
        let db = self.lock_db()?;
        let report = learner_progress(&db, &params.learner_id, Utc::now(), self.tz).map_err(tool_err)?;
        json_result(&report)
    }

    /// Runs the classifier synchronously; callers on a runtime must not hold a
    /// core thread while this blocks. The connection is not held during the
    /// classifier call.
    pub fn do_finalize_session(&self, request: FinalizeRequest) -> Result<CallToolResult, ErrorData> {
        let transcript = {
            let db = self.lock_db()?;
            load_transcript(&db, &request).map_err(tool_err)?
        };
        let run = classify_transcript(
            &request.interaction_id,
            &transcript,
            self.classifier.as_deref(),
            self.vocab,
        );
        let db = self.lock_db()?;
        let response =
            save_result(&db, &request, transcript.len(), run, Utc::now()).map_err(tool_err)?;
        json_result(&response)
    }

    pub fn do_ac_vocabulary(&self) -> Result<CallToolResult, ErrorData> {
        let entries: Vec<VocabularyEntry> = self
            .vocab
            .entries()
            .map(|(id, name)| VocabularyEntry { id, name })
            .collect();
        json_result(&entries)
    }
}

// --- MCP tool wrappers (delegate to do_* methods) ---

#[tool_router]
impl TutorServer {
    pub fn new(
        db: DbHandle,
        vocab: &'static AcVocabulary,
        tz: Tz,
        classifier: Option<SharedClassifier>,
    ) -> Self {
        Self {
            db,
            vocab,
            tz,
            classifier,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Progress report for a learner: mean interactions, per-concept efficiency, weekly summary, last session, frequent errors and a recommended next exercise.",
        annotations(read_only_hint = true, open_world_hint = false)
    )]
    async fn learner_progress(
        &self,
        p: Parameters<LearnerProgressParams>,
    ) -> Result<CallToolResult, ErrorData> {
        let start = Instant::now();
        let result = self.do_learner_progress(p.0);
        crate::metrics::record_query("learner_progress", start);
        result
    }

    #[tool(
        description = "Close a tutoring session: classify the interaction transcript against the alternative-conception catalog and save the result. Always saves, even when classification fails.",
        annotations(read_only_hint = false, destructive_hint = false, open_world_hint = true)
    )]
    async fn finalize_session(
        &self,
        p: Parameters<FinalizeRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let start = Instant::now();
        let result = tokio::task::block_in_place(|| self.do_finalize_session(p.0));
        crate::metrics::record_query("finalize_session", start);
        result
    }

    #[tool(
        description = "List the alternative-conception (AC) catalog used to tag learner errors.",
        annotations(read_only_hint = true, open_world_hint = false)
    )]
    async fn ac_vocabulary(&self) -> Result<CallToolResult, ErrorData> {
        let start = Instant::now();
        let result = self.do_ac_vocabulary();
        crate::metrics::record_query("ac_vocabulary", start);
        result
    }
}

#[tool_handler]
impl ServerHandler for TutorServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "tutorlens: learner progress analytics and misconception tagging for tutoring sessions",
        )
    }
}

pub fn handle_serve(db_path: &Path) -> Result<(), TutorError> {
    let config = load_config()?;
    let tz = config.calendar.tz()?;
    let vocab = vocabulary::init(config.classifier.vocabulary_path.as_deref())?;
    let conn = open_db(db_path)?;
    let db: DbHandle = Arc::new(Mutex::new(conn));
    let classifier = if config.classifier.enabled {
        let http: SharedClassifier = Arc::new(HttpClassifier::new(&config.classifier));
        Some(http)
    } else {
        log::info!("classifier disabled; results will be saved as skipped");
        None
    };
    let server = TutorServer::new(db, vocab, tz, classifier);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(TutorError::Io)?;

    rt.block_on(async {
        let provider = crate::metrics::init_meter_provider(&config.metrics);

        eprintln!("tutorlens: serve starting");
        let service = server
            .serve(stdio())
            .await
            .map_err(|e| TutorError::Config(format!("mcp: {e}")))?;
        service
            .waiting()
            .await
            .map_err(|e| TutorError::Config(format!("mcp: {e}")))?;
        eprintln!("tutorlens: serve stopped");

        if let Some(p) = provider {
            let _ = p.shutdown();
        }

        Ok(())
    })
}
