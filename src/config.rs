use crate::TutorError;
use crate::metrics::MetricsConfig;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default)]
pub struct TutorConfig {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_classifier_base_url")]
    pub base_url: String,
    #[serde(default = "default_classifier_model")]
    pub model: String,
    #[serde(default = "default_classifier_timeout")]
    pub timeout_secs: u64,
    /// Skip TLS certificate verification. Self-signed lab servers only.
    #[serde(default)]
    pub insecure: bool,
    /// External AC catalog; the embedded one is used when unset.
    #[serde(default)]
    pub vocabulary_path: Option<PathBuf>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_classifier_base_url(),
            model: default_classifier_model(),
            timeout_secs: default_classifier_timeout(),
            insecure: false,
            vocabulary_path: None,
        }
    }
}

impl ClassifierConfig {
    /// Chat endpoint. A base URL that already names a chat path is used as-is.
    pub fn chat_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/api/chat") || base.ends_with("/chat/completions") {
            base.to_string()
        } else {
            format!("{base}/api/chat")
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_classifier_base_url() -> String {
    "http://localhost:11434".into()
}

fn default_classifier_model() -> String {
    "qwen2.5:7b-instruct".into()
}

fn default_classifier_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalendarConfig {
    /// IANA zone used for day keys and streaks.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

impl CalendarConfig {
    pub fn tz(&self) -> Result<Tz, TutorError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| TutorError::Config(format!("calendar.timezone {:?}: {e}", self.timezone)))
    }
}

fn default_timezone() -> String {
    "Europe/Madrid".into()
}

/// Env flag values that mean "on". Anything else is off.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

/// Load config from TUTORLENS_CONFIG, ~/.tutorlens/config.toml, or defaults,
/// then apply environment overrides.
pub fn load_config() -> Result<TutorConfig, TutorError> {
    let mut config = match config_path() {
        Some(p) if p.exists() => {
            let content = std::fs::read_to_string(&p)?;
            toml::from_str(&content)
                .map_err(|e| TutorError::Config(format!("{}: {e}", p.display())))?
        }
        _ => TutorConfig::default(),
    };
    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config)?;
    Ok(config)
}

fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("TUTORLENS_CONFIG") {
        return Some(PathBuf::from(p));
    }
    let home = std::env::var("HOME").ok()?;
    Some(Path::new(&home).join(".tutorlens").join("config.toml"))
}

/// Environment wins over the file. `lookup` is injected so tests do not touch
/// the process environment.
pub fn apply_env_overrides<F>(config: &mut TutorConfig, lookup: F) -> Result<(), TutorError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("TUTORLENS_CLASSIFIER_URL") {
        config.classifier.base_url = url;
    }
    if let Some(model) = lookup("TUTORLENS_CLASSIFIER_MODEL") {
        config.classifier.model = model;
    }
    if let Some(raw) = lookup("TUTORLENS_CLASSIFIER_TIMEOUT_SECS") {
        config.classifier.timeout_secs = raw.trim().parse().map_err(|e| {
            TutorError::Config(format!("TUTORLENS_CLASSIFIER_TIMEOUT_SECS {raw:?}: {e}"))
        })?;
    }
    if let Some(raw) = lookup("TUTORLENS_CLASSIFIER_INSECURE") {
        config.classifier.insecure = is_truthy(&raw);
    }
    if let Some(raw) = lookup("TUTORLENS_CLASSIFIER_ENABLED") {
        config.classifier.enabled = is_truthy(&raw);
    }
    if let Some(tz) = lookup("TUTORLENS_TIMEZONE") {
        config.calendar.timezone = tz;
    }
    Ok(())
}

fn validate_config(config: &TutorConfig) -> Result<(), TutorError> {
    config.calendar.tz()?;
    if config.classifier.timeout_secs == 0 {
        return Err(TutorError::Config("classifier.timeout_secs must be > 0".into()));
    }
    if config.classifier.base_url.trim().is_empty() {
        return Err(TutorError::Config("classifier.base_url must not be empty".into()));
    }
    if let Some(p) = &config.classifier.vocabulary_path
        && !p.exists()
    {
        return Err(TutorError::Config(format!(
            "classifier.vocabulary_path not found: {}",
            p.display()
        )));
    }
    Ok(())
}
