//! Tag a finished tutoring conversation with alternative conceptions using a
//! remote LLM.
//!
//! One request, one retry with a stricter prompt if the reply holds no JSON
//! object, then validation against the closed vocabulary. Failures never
//! propagate: they become a [`ClassifierStatus`] plus, for non-empty
//! conversations, a single sentinel tag.

use crate::config::ClassifierConfig;
use crate::model::{ChatMessage, ClassificationOutcome, ClassifierStatus, ErrorTag};
use crate::vocabulary::{AcVocabulary, UNKNOWN_TAG};
use serde_json::{Map, Value};
use std::time::Duration;

pub const MAX_TAGS: usize = 3;

const SYSTEM_PROMPT: &str = "You are an assistant that reviews tutoring conversations about electric circuits and detects the learner's alternative conceptions. Return ONLY valid JSON, no markdown, no explanation.";

const PROMPT_TEMPLATE: &str = r#"Review the tutoring conversation below and identify the learner's alternative conceptions.

Allowed alternative conception ids: {VOCABULARY}

Return a JSON object with these fields:
- "analysis": one or two sentences describing how the learner reasoned.
- "advice": one or two sentences of advice addressed to the learner.
- "acs": an array with at most 3 ids taken only from the allowed list above. Use [] if none apply.

Do not wrap the JSON in markdown or code fences. Return at most 3 ids.

Conversation:
{TRANSCRIPT}

Return ONLY the JSON object."#;

const STRICT_PREAMBLE: &str =
    "Respond with JSON only, nothing else. No prose, no markdown, no code fences.\n\n";

const EMPTY_TRANSCRIPT: &str = "(the conversation has no messages)";

const SENTINEL_TIMEOUT: &str = "Unknown cause: timeout";
const SENTINEL_INVALID_FORMAT: &str = "Unknown cause: invalid format";

/// `role: content` lines, or a placeholder for an empty conversation.
pub fn render_transcript(transcript: &[ChatMessage]) -> String {
    if transcript.is_empty() {
        return EMPTY_TRANSCRIPT.to_string();
    }
    transcript
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn build_prompt(vocab: &AcVocabulary, transcript: &[ChatMessage]) -> String {
    let ids = vocab.ids().collect::<Vec<_>>().join(", ");
    PROMPT_TEMPLATE
        .replace("{VOCABULARY}", &ids)
        .replace("{TRANSCRIPT}", &render_transcript(transcript))
}

pub fn build_strict_prompt(vocab: &AcVocabulary, transcript: &[ChatMessage]) -> String {
    format!("{STRICT_PREAMBLE}{}", build_prompt(vocab, transcript))
}

/// Strip markdown code fences from LLM response.
pub fn strip_fences(text: &str) -> &str {
    let t = text.trim();
    if let Some(rest) = t.strip_prefix("```") {
        // Skip optional language tag: the rest of the opening line, or just
        // the tag word when the whole reply sits on one line
        let rest = match rest.find('\n') {
            Some(nl) => &rest[nl + 1..],
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        };
        let rest = rest.trim();
        return rest.strip_suffix("```").unwrap_or(rest).trim();
    }
    t
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    Parsed(Map<String, Value>),
    Malformed,
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn brace_span(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    parse_object(&text[start..=end])
}

/// Find a JSON object in a model reply: the whole reply once fences are
/// stripped, else the span from the first `{` to the last `}` of the cleaned
/// reply, then of the raw reply.
pub fn extract_json(text: &str) -> ParseResult {
    let cleaned = strip_fences(text);
    if cleaned.starts_with('{')
        && cleaned.ends_with('}')
        && let Some(map) = parse_object(cleaned)
    {
        return ParseResult::Parsed(map);
    }
    match brace_span(cleaned).or_else(|| brace_span(text)) {
        Some(map) => ParseResult::Parsed(map),
        None => ParseResult::Malformed,
    }
}

fn non_empty_text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Keep only well-formed fields. Tags are filtered against the vocabulary
/// first and capped afterwards, so unknown ids never use up a slot.
pub fn validate(obj: &Map<String, Value>, vocab: &AcVocabulary) -> ClassificationOutcome {
    let mut tags: Vec<String> = Vec::new();
    if let Some(Value::Array(items)) = obj.get("acs").or_else(|| obj.get("tags")) {
        for id in items.iter().filter_map(Value::as_str).map(str::trim) {
            if tags.len() == MAX_TAGS {
                break;
            }
            if vocab.contains(id) && !tags.iter().any(|t| t == id) {
                tags.push(id.to_string());
            }
        }
    }
    ClassificationOutcome {
        analysis: non_empty_text(obj, "analysis"),
        advice: non_empty_text(obj, "advice"),
        tags,
    }
}

#[derive(Debug)]
pub enum ClassifierError {
    Timeout(String),
    Transport(String),
    Response(String),
}

impl ClassifierError {
    /// Timeout by variant, or by a message that says so (some transports
    /// only surface it as text).
    pub fn is_timeout(&self) -> bool {
        match self {
            ClassifierError::Timeout(_) => true,
            ClassifierError::Transport(msg) | ClassifierError::Response(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("timeout") || msg.contains("timed out")
            }
        }
    }
}

impl std::fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifierError::Timeout(msg) => write!(f, "timeout: {msg}"),
            ClassifierError::Transport(msg) => write!(f, "transport: {msg}"),
            ClassifierError::Response(msg) => write!(f, "response: {msg}"),
        }
    }
}

impl std::error::Error for ClassifierError {}

/// A text-completion backend. Blocks until the reply arrives or times out.
pub trait Classifier {
    fn complete(&self, prompt: &str) -> Result<String, ClassifierError>;
}

/// Ollama-style `/api/chat` client. Also reads OpenAI-compatible replies.
pub struct HttpClassifier {
    agent: ureq::Agent,
    url: String,
    model: String,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        let mut builder = ureq::config::Config::builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)));
        if config.insecure {
            log::warn!("classifier TLS certificate verification disabled");
            builder = builder.tls_config(
                ureq::tls::TlsConfig::builder()
                    .disable_verification(true)
                    .build(),
            );
        }
        Self {
            agent: ureq::Agent::new_with_config(builder.build()),
            url: config.chat_url(),
            model: config.model.clone(),
        }
    }
}

fn map_ureq_error(e: ureq::Error) -> ClassifierError {
    let msg = e.to_string();
    match e {
        ureq::Error::Timeout(_) => ClassifierError::Timeout(msg),
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            ClassifierError::Timeout(msg)
        }
        _ => ClassifierError::Transport(msg),
    }
}

impl Classifier for HttpClassifier {
    fn complete(&self, prompt: &str) -> Result<String, ClassifierError> {
        // temperature is sent both ways: Ollama reads options, OpenAI-compatible servers the top level
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "format": "json",
            "temperature": 0.0,
            "options": {"temperature": 0.0},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
        });

        let resp: Value = self
            .agent
            .post(&self.url)
            .send_json(&body)
            .map_err(map_ureq_error)?
            .body_mut()
            .read_json()
            .map_err(map_ureq_error)?;

        resp.pointer("/message/content")
            .or_else(|| resp.pointer("/choices/0/message/content"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ClassifierError::Response("no message content in classifier reply".into()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRun {
    pub outcome: ClassificationOutcome,
    pub status: ClassifierStatus,
    pub error_tags: Vec<ErrorTag>,
}

enum Failure {
    Timeout(String),
    InvalidJson(String),
}

impl From<ClassifierError> for Failure {
    fn from(e: ClassifierError) -> Self {
        if e.is_timeout() {
            Failure::Timeout(e.to_string())
        } else {
            Failure::InvalidJson(e.to_string())
        }
    }
}

fn call_and_validate<C>(
    classifier: &C,
    vocab: &AcVocabulary,
    transcript: &[ChatMessage],
) -> Result<ClassificationOutcome, Failure>
where
    C: Classifier + ?Sized,
{
    let reply = classifier.complete(&build_prompt(vocab, transcript))?;
    if let ParseResult::Parsed(obj) = extract_json(&reply) {
        return Ok(validate(&obj, vocab));
    }

    log::debug!("classifier reply held no JSON object, retrying with strict prompt");
    let reply = classifier.complete(&build_strict_prompt(vocab, transcript))?;
    match extract_json(&reply) {
        ParseResult::Parsed(obj) => Ok(validate(&obj, vocab)),
        ParseResult::Malformed => Err(Failure::InvalidJson(
            "no JSON object after retry".into(),
        )),
    }
}

/// Classify a conversation. Always returns; failures are reported through
/// the status and a sentinel tag.
pub fn run_pipeline<C>(classifier: &C, vocab: &AcVocabulary, transcript: &[ChatMessage]) -> PipelineRun
where
    C: Classifier + ?Sized,
{
    match call_and_validate(classifier, vocab, transcript) {
        Ok(outcome) => {
            let error_tags = outcome
                .tags
                .iter()
                .map(|id| ErrorTag {
                    label: id.clone(),
                    text: vocab.display_name(id).unwrap_or(id.as_str()).to_string(),
                })
                .collect();
            PipelineRun {
                outcome,
                status: ClassifierStatus::Ok,
                error_tags,
            }
        }
        Err(failure) => {
            let (status, sentinel_text) = match &failure {
                Failure::Timeout(cause) => {
                    log::warn!("classifier failed (timeout): {cause}");
                    (ClassifierStatus::FailTimeout, SENTINEL_TIMEOUT)
                }
                Failure::InvalidJson(cause) => {
                    log::warn!("classifier failed (invalid format): {cause}");
                    (ClassifierStatus::FailInvalidJson, SENTINEL_INVALID_FORMAT)
                }
            };
            let error_tags = if transcript.is_empty() {
                Vec::new()
            } else {
                vec![ErrorTag {
                    label: UNKNOWN_TAG.into(),
                    text: sentinel_text.into(),
                }]
            };
            PipelineRun {
                outcome: ClassificationOutcome::default(),
                status,
                error_tags,
            }
        }
    }
}
