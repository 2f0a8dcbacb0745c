//! Configuration types.
//!
//! Everything comes from environment variables. Missing credentials and
//! unparsable values are startup errors.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::capabilities::weather::DEFAULT_WEATHER_API_URL;
use crate::classifier::TaskTaxonomy;
use crate::error::ConfigError;
use crate::llm::{LlmBackend, LlmConfig};

/// Which conversation store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// One JSON file per conversation.
    File,
    /// libSQL database.
    LibSql,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" | "json" => Ok(Self::File),
            "libsql" | "sqlite" => Ok(Self::LibSql),
            other => Err(format!("unknown store backend '{other}'")),
        }
    }
}

/// Weather capability settings. Present only when an API key is set.
#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub api_key: SecretString,
    pub api_url: String,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub llm: LlmConfig,
    /// Sampling temperature for classifier and responder calls.
    pub temperature: f32,
    pub store: StoreBackend,
    /// Directory of conversation JSON files (file store).
    pub storage_dir: PathBuf,
    /// Database file (libSQL store).
    pub db_path: PathBuf,
    /// Default `get_history` window.
    pub max_history: usize,
    /// History window the router loads per request.
    pub router_history: usize,
    pub oracle_timeout: Option<Duration>,
    pub provider_timeout: Option<Duration>,
    /// Passages fetched for document enrichment.
    pub document_top_k: usize,
    /// Extra `agent_task:<name>` taxonomy entries.
    pub extra_agents: Vec<(String, String)>,
    pub weather: Option<WeatherConfig>,
    /// HTTP API port. `None` disables the HTTP server.
    pub http_port: Option<u16>,
    /// Rolling log file directory.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` for every variable. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let backend: LlmBackend = parse_or(&get, "ASSIST_LLM_BACKEND", LlmBackend::OpenAi)?;
        let (key_var, default_model) = match backend {
            LlmBackend::OpenAi => ("OPENAI_API_KEY", "gpt-4o"),
            LlmBackend::Anthropic => ("ANTHROPIC_API_KEY", "claude-sonnet-4-20250514"),
        };
        let api_key = get(key_var).ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;

        let llm = LlmConfig {
            backend,
            api_key: SecretString::from(api_key),
            model: get("ASSIST_MODEL").unwrap_or_else(|| default_model.to_string()),
        };

        let weather = get("WEATHER_API_KEY").map(|key| WeatherConfig {
            api_key: SecretString::from(key),
            api_url: get("WEATHER_API_URL").unwrap_or_else(|| DEFAULT_WEATHER_API_URL.to_string()),
        });

        let extra_agents = match get("ASSIST_EXTRA_AGENTS") {
            Some(raw) => parse_extra_agents(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            llm,
            temperature: parse_or(&get, "ASSIST_TEMPERATURE", 0.0_f32)?,
            store: parse_or(&get, "ASSIST_STORE", StoreBackend::File)?,
            storage_dir: get("ASSIST_STORAGE_DIR")
                .unwrap_or_else(|| "data/conversation_logs".to_string())
                .into(),
            db_path: get("ASSIST_DB_PATH")
                .unwrap_or_else(|| "data/conversations.db".to_string())
                .into(),
            max_history: parse_or(&get, "ASSIST_MAX_HISTORY", 20)?,
            router_history: parse_or(&get, "ASSIST_ROUTER_HISTORY", 10)?,
            oracle_timeout: timeout_secs(parse_or(&get, "ASSIST_ORACLE_TIMEOUT_SECS", 60)?),
            provider_timeout: timeout_secs(parse_or(&get, "ASSIST_PROVIDER_TIMEOUT_SECS", 60)?),
            document_top_k: parse_or(&get, "ASSIST_DOCUMENT_TOP_K", 5)?,
            extra_agents,
            weather,
            http_port: get("ASSIST_HTTP_PORT")
                .map(|v| parse_value("ASSIST_HTTP_PORT", &v))
                .transpose()?,
            log_dir: get("ASSIST_LOG_DIR").map(PathBuf::from),
        })
    }

    /// The default taxonomy plus configured extra agents.
    pub fn taxonomy(&self) -> TaskTaxonomy {
        self.extra_agents
            .iter()
            .fold(TaskTaxonomy::default(), |taxonomy, (name, description)| {
                taxonomy.with_agent(name, description)
            })
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

/// `0` disables the bound.
fn timeout_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Parse `name=description;name=description`.
fn parse_extra_agents(raw: &str) -> Result<Vec<(String, String)>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (name, description) =
                entry
                    .split_once('=')
                    .ok_or_else(|| ConfigError::InvalidValue {
                        key: "ASSIST_EXTRA_AGENTS".to_string(),
                        message: format!("expected name=description, got '{entry}'"),
                    })?;
            let name = name.trim();
            if name.is_empty() || name.contains(':') || name.contains(char::is_whitespace) {
                return Err(ConfigError::InvalidValue {
                    key: "ASSIST_EXTRA_AGENTS".to_string(),
                    message: format!("invalid agent name '{name}'"),
                });
            }
            Ok((name.to_string(), description.trim().to_string()))
        })
        .collect()
}
