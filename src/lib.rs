pub mod calendar;
pub mod classify;
pub mod cli;
pub mod config;
pub mod db;
pub mod finalize;
pub mod import;
pub mod metrics;
pub mod model;
pub mod progress;
pub mod recommend;
pub mod schema;
pub mod serve;
pub mod status;
pub mod store;
pub mod vocabulary;

#[derive(Debug)]
pub enum TutorError {
    Database(rusqlite::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
    Config(String),
    /// Malformed identifier or missing field. Raised before storage is touched.
    InvalidInput(String),
    NotFound(String),
}

impl TutorError {
    /// True for errors the caller caused (4xx-equivalent).
    pub fn is_client_error(&self) -> bool {
        matches!(self, TutorError::InvalidInput(_) | TutorError::NotFound(_))
    }
}

impl std::fmt::Display for TutorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TutorError::Database(e) => write!(f, "database: {e}"),
            TutorError::Io(e) => write!(f, "io: {e}"),
            TutorError::Json(e) => write!(f, "json: {e}"),
            TutorError::Config(msg) => write!(f, "config: {msg}"),
            TutorError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            TutorError::NotFound(msg) => write!(f, "not found: {msg}"),
        }
    }
}

impl std::error::Error for TutorError {}

impl From<rusqlite::Error> for TutorError {
    fn from(e: rusqlite::Error) -> Self {
        TutorError::Database(e)
    }
}

impl From<std::io::Error> for TutorError {
    fn from(e: std::io::Error) -> Self {
        TutorError::Io(e)
    }
}

impl From<serde_json::Error> for TutorError {
    fn from(e: serde_json::Error) -> Self {
        TutorError::Json(e)
    }
}

impl From<rusqlite_migration::Error> for TutorError {
    fn from(e: rusqlite_migration::Error) -> Self {
        match e {
            rusqlite_migration::Error::RusqliteError { query: _, err } => TutorError::Database(err),
            other => TutorError::Config(format!("migration: {other}")),
        }
    }
}

pub fn schema_migrations() -> &'static rusqlite_migration::Migrations<'static> {
    &schema::MIGRATIONS
}
