//! The decide request and its normalization.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::coercion::{CoercionLog, kinds};

/// Maximum characters accepted for `query`.
pub const MAX_QUERY_CHARS: usize = 10_000;
/// Maximum alternatives accepted per request.
pub const MAX_ALTERNATIVES: usize = 100;
/// Maximum metadata fields per alternative.
pub const MAX_ALT_FIELDS: usize = 10;
/// Maximum characters per alternative field.
pub const MAX_ALT_FIELD_CHARS: usize = 10_000;
/// Maximum serialized bytes for the alternatives payload.
pub const MAX_ALTERNATIVES_BYTES: usize = 1024 * 1024;

/// Validation failures that abort the pipeline before any stage runs.
#[derive(Debug, Error, Diagnostic)]
pub enum InvalidInput {
    /// `query` is empty.
    #[error("query must not be empty")]
    #[diagnostic(code(veritas::schema::empty_query))]
    EmptyQuery,

    /// `query` exceeds [`MAX_QUERY_CHARS`].
    #[error("query too long: {chars} chars (limit {MAX_QUERY_CHARS})")]
    #[diagnostic(code(veritas::schema::query_too_long))]
    QueryTooLong {
        /// Offending length.
        chars: usize,
    },

    /// Too many alternatives.
    #[error("too many alternatives: {count} (limit {MAX_ALTERNATIVES})")]
    #[diagnostic(code(veritas::schema::too_many_alternatives))]
    TooManyAlternatives {
        /// Offending count.
        count: usize,
    },

    /// An alternative field exceeds size limits.
    #[error("alternative '{id}' field '{field}' too large")]
    #[diagnostic(code(veritas::schema::alt_field_too_large))]
    AltFieldTooLarge {
        /// Alternative id.
        id: String,
        /// Field name.
        field: String,
    },

    /// The alternatives payload exceeds the total byte budget.
    #[error("alternatives payload exceeds {MAX_ALTERNATIVES_BYTES} bytes")]
    #[diagnostic(code(veritas::schema::alternatives_too_large))]
    AlternativesTooLarge,
}

/// One candidate action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AltItem {
    /// Stable identifier within the request.
    #[serde(default)]
    pub id: String,
    /// Short title.
    #[serde(default)]
    pub title: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Caller-supplied prior score.
    #[serde(default = "default_alt_score")]
    pub score: f64,
    /// Arbitrary metadata, preserved verbatim.
    #[serde(flatten)]
    pub extra: FxHashMap<String, Value>,
}

fn default_alt_score() -> f64 {
    0.5
}

/// Time horizon hint for the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeHorizon {
    /// Days.
    Short,
    /// Weeks to months.
    Mid,
    /// Months to years.
    Long,
}

/// Normalized request context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestContext {
    /// Requesting user. Overwritten by the authenticated principal at the
    /// transport boundary before the pipeline runs.
    pub user_id: Option<String>,
    /// Stated goals.
    pub goals: Vec<String>,
    /// Stated constraints.
    pub constraints: Vec<String>,
    /// Planner time horizon. Populated during normalization from the raw
    /// `time_horizon` context key so unrecognized values coerce to an
    /// event instead of a deserialization failure.
    #[serde(skip_deserializing)]
    pub time_horizon: Option<TimeHorizon>,
    /// Weights over the value axes.
    pub telos_weights: FxHashMap<String, f64>,
    /// Tools the caller permits.
    pub tools_allowed: Vec<String>,
    /// Affect hint for persona shaping.
    pub affect_hint: Option<String>,
    /// Unknown context keys, preserved.
    #[serde(flatten)]
    pub extra: FxHashMap<String, Value>,
}

/// The decide request, as deserialized from the transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DecideRequest {
    /// Natural-language query. Required, bounded.
    pub query: String,
    /// Request context.
    pub context: RequestContext,
    /// Canonical candidate list.
    pub alternatives: Vec<AltItem>,
    /// Legacy mirror of `alternatives`.
    pub options: Vec<AltItem>,
    /// Minimum evidence items to retain (0..=100).
    pub min_evidence: u32,
    /// Persist the decision episode to memory.
    pub memory_auto_put: bool,
    /// Allow persona evolution from this interaction.
    pub persona_evolve: bool,
    /// Client-supplied request id, echoed when present.
    pub request_id: Option<String>,
    /// Unknown request keys, preserved.
    #[serde(flatten)]
    pub extra: FxHashMap<String, Value>,
}

impl DecideRequest {
    /// Convenience constructor for a bare query.
    #[must_use]
    pub fn from_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Normalize in place, recording every substitution in `log`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidInput`] for violations that must abort the
    /// pipeline (empty/oversized query, oversized alternative payloads).
    pub fn normalize(&mut self, log: &mut CoercionLog) -> Result<(), InvalidInput> {
        if self.query.trim().is_empty() {
            return Err(InvalidInput::EmptyQuery);
        }
        let chars = self.query.chars().count();
        if chars > MAX_QUERY_CHARS {
            return Err(InvalidInput::QueryTooLong { chars });
        }

        self.normalize_alternatives(log)?;

        if self.min_evidence > 100 {
            log.record(
                kinds::MIN_EVIDENCE_CLAMPED,
                "min_evidence",
                format!("{} clamped to 100", self.min_evidence),
            );
            self.min_evidence = 100;
        }

        if !self.extra.is_empty() {
            let mut keys: Vec<&String> = self.extra.keys().collect();
            keys.sort_unstable();
            log.record(
                kinds::REQUEST_EXTRA_KEYS_ALLOWED,
                "extra",
                format!("preserved unknown keys: {keys:?}"),
            );
        }

        // Unknown time_horizon strings arrive through context.extra when
        // serde could not match the enum; they are dropped with an event.
        if let Some(raw) = self.context.extra.remove("time_horizon") {
            match raw.as_str().map(str::to_ascii_lowercase).as_deref() {
                Some("short") => self.context.time_horizon = Some(TimeHorizon::Short),
                Some("mid") => self.context.time_horizon = Some(TimeHorizon::Mid),
                Some("long") => self.context.time_horizon = Some(TimeHorizon::Long),
                _ => log.record(
                    kinds::TIME_HORIZON_DROPPED,
                    "context.time_horizon",
                    format!("unrecognized value {raw}"),
                ),
            }
        }

        Ok(())
    }

    /// Mirror `options` and `alternatives`, `alternatives` canonical.
    fn normalize_alternatives(&mut self, log: &mut CoercionLog) -> Result<(), InvalidInput> {
        match (self.alternatives.is_empty(), self.options.is_empty()) {
            (true, false) => {
                self.alternatives = self.options.clone();
                log.record(
                    kinds::OPTIONS_TO_ALTERNATIVES,
                    "alternatives",
                    "legacy options mirrored into alternatives",
                );
            }
            (false, false) if self.alternatives != self.options => {
                self.options = self.alternatives.clone();
                log.record(
                    kinds::OPTIONS_OVERRIDDEN,
                    "alternatives",
                    "alternatives took precedence over differing options",
                );
            }
            _ => {
                self.options = self.alternatives.clone();
            }
        }

        if self.alternatives.len() > MAX_ALTERNATIVES {
            return Err(InvalidInput::TooManyAlternatives {
                count: self.alternatives.len(),
            });
        }

        let mut total_bytes = 0usize;
        for (idx, alt) in self.alternatives.iter_mut().enumerate() {
            if alt.id.is_empty() {
                alt.id = format!("alt-{idx}");
            }
            if alt.extra.len() > MAX_ALT_FIELDS {
                return Err(InvalidInput::AltFieldTooLarge {
                    id: alt.id.clone(),
                    field: "(metadata)".to_string(),
                });
            }
            for (field, value) in
                [("title", &alt.title), ("description", &alt.description)]
            {
                if value.chars().count() > MAX_ALT_FIELD_CHARS {
                    return Err(InvalidInput::AltFieldTooLarge {
                        id: alt.id.clone(),
                        field: field.to_string(),
                    });
                }
            }
            total_bytes += alt.title.len() + alt.description.len();
            for value in alt.extra.values() {
                total_bytes += value.to_string().len();
            }
        }
        if total_bytes > MAX_ALTERNATIVES_BYTES {
            return Err(InvalidInput::AlternativesTooLarge);
        }

        // Keep the mirror in sync with assigned ids.
        self.options = self.alternatives.clone();
        Ok(())
    }
}
