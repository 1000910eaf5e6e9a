//! Environment-driven engine configuration.
//!
//! All persistent state roots at `VERITAS_DATA_DIR`. Secrets are read but
//! never logged; an empty `VERITAS_API_SECRET` is kept as `None` and
//! refused at the point of use rather than at startup.

use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::memory::DEFAULT_MAX_RECORDS_PER_USER;

/// Default request body cap in bytes.
pub const DEFAULT_MAX_REQUEST_BODY: u64 = 10 * 1024 * 1024;
/// Default per-call LLM timeout.
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(60);
/// Default overall decide deadline.
pub const DEFAULT_DECIDE_DEADLINE: Duration = Duration::from_secs(120);

/// Errors raised while building the configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    /// A required variable is missing or empty.
    #[error("required environment variable {key} is missing or empty")]
    #[diagnostic(code(veritas::config::missing_env))]
    MissingEnv {
        /// Variable name.
        key: &'static str,
    },

    /// A variable failed to parse.
    #[error("environment variable {key} failed to parse: {message}")]
    #[diagnostic(code(veritas::config::parse_env))]
    ParseEnv {
        /// Variable name.
        key: &'static str,
        /// What went wrong.
        message: String,
    },
}

/// Typed engine configuration.
#[derive(Debug, Clone)]
pub struct VeritasConfig {
    /// Base directory for all persistent state.
    pub data_dir: PathBuf,
    /// Shared API secret for the transport layer.
    pub api_key: Option<String>,
    /// HMAC signing key; `None` when unset/empty and refused at use.
    pub api_secret: Option<String>,
    /// Gates internal error detail disclosure in responses.
    pub debug_mode: bool,
    /// Request body cap in bytes.
    pub max_request_body_size: u64,
    /// Per-user memory record cap.
    pub memory_max_records_per_user: usize,
    /// Per-call LLM timeout.
    pub llm_timeout: Duration,
    /// Maximum LLM attempts per call.
    pub llm_max_attempts: u32,
    /// LLM model name handed to the provider.
    pub model: String,
    /// Overall deadline for one decide call.
    pub decide_deadline: Duration,
    /// TrustLog rotation threshold in bytes.
    pub trust_log_max_size: u64,
}

impl VeritasConfig {
    /// Test- and embedding-friendly constructor with defaults.
    #[must_use]
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            api_key: None,
            api_secret: None,
            debug_mode: false,
            max_request_body_size: DEFAULT_MAX_REQUEST_BODY,
            memory_max_records_per_user: DEFAULT_MAX_RECORDS_PER_USER,
            llm_timeout: DEFAULT_LLM_TIMEOUT,
            llm_max_attempts: 3,
            model: "default".to_string(),
            decide_deadline: DEFAULT_DECIDE_DEADLINE,
            trust_log_max_size: 8 * 1024 * 1024,
        }
    }

    /// Load from the process environment (and `.env` when present).
    ///
    /// `VERITAS_DATA_DIR` and a non-empty `VERITAS_API_KEY` are required;
    /// everything else has defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on missing requirements or unparseable
    /// values.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let data_dir = required("VERITAS_DATA_DIR")?;
        let api_key = required("VERITAS_API_KEY")?;

        let mut config = Self::for_data_dir(PathBuf::from(data_dir));
        config.api_key = Some(api_key);
        config.api_secret = std::env::var("VERITAS_API_SECRET")
            .ok()
            .filter(|s| !s.is_empty());
        config.debug_mode = flag("VERITAS_DEBUG_MODE");

        if let Some(raw) = optional("MAX_REQUEST_BODY_SIZE") {
            config.max_request_body_size =
                raw.parse().map_err(|_| ConfigError::ParseEnv {
                    key: "MAX_REQUEST_BODY_SIZE",
                    message: format!("expected bytes, got {raw:?}"),
                })?;
        }
        if let Some(raw) = optional("VERITAS_MEMORY_MAX_PER_USER") {
            config.memory_max_records_per_user =
                raw.parse().map_err(|_| ConfigError::ParseEnv {
                    key: "VERITAS_MEMORY_MAX_PER_USER",
                    message: format!("expected a count, got {raw:?}"),
                })?;
        }
        if let Some(raw) = optional("VERITAS_LLM_TIMEOUT_SECS") {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::ParseEnv {
                key: "VERITAS_LLM_TIMEOUT_SECS",
                message: format!("expected seconds, got {raw:?}"),
            })?;
            config.llm_timeout = Duration::from_secs(secs);
        }
        if let Some(model) = optional("VERITAS_LLM_MODEL") {
            config.model = model;
        }

        Ok(config)
    }

    /// The HMAC signing key.
    ///
    /// # Errors
    ///
    /// Refused when unset: signing with an empty key must never happen.
    pub fn require_api_secret(&self) -> Result<&str, ConfigError> {
        self.api_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::MissingEnv {
                key: "VERITAS_API_SECRET",
            })
    }

    /// Path of the FUJI policy document.
    #[must_use]
    pub fn policy_path(&self) -> PathBuf {
        self.data_dir.join("fuji_policy.json")
    }

    /// Directory of the TrustLog.
    #[must_use]
    pub fn trust_log_dir(&self) -> PathBuf {
        self.data_dir.join("trust")
    }

    /// Directory of the memory shards.
    #[must_use]
    pub fn memory_dir(&self) -> PathBuf {
        self.data_dir.join("memory")
    }

    /// Path of the value-core EMA state.
    #[must_use]
    pub fn values_path(&self) -> PathBuf {
        self.data_dir.join("value_ema.json")
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingEnv { key })
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
