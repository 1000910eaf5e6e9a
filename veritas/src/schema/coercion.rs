//! Coercion events: the audit trail of silent input normalization.
//!
//! Whenever the schema layer substitutes, mirrors, or tolerates a
//! non-canonical input shape, it records a [`CoercionEvent`] so the
//! normalization is visible in the response (`coercion_events`) and in
//! `meta.x_coerced_fields`.

use serde::{Deserialize, Serialize};

/// Well-known coercion kinds.
pub mod kinds {
    /// `options` supplied without `alternatives`; mirrored over.
    pub const OPTIONS_TO_ALTERNATIVES: &str = "coercion.options_to_alternatives";
    /// Both supplied and differing; `alternatives` won.
    pub const OPTIONS_OVERRIDDEN: &str = "coercion.options_overridden_by_alternatives";
    /// Response-side mirror of the override, stamped during finalize.
    pub const RESPONSE_OPTIONS_OVERRIDDEN: &str =
        "coercion.response_options_overridden_by_alternatives";
    /// Unknown request keys preserved rather than rejected.
    pub const REQUEST_EXTRA_KEYS_ALLOWED: &str = "coercion.request_extra_keys_allowed";
    /// A `trust_log` payload failed promotion to the canonical type and
    /// was kept raw.
    pub const TRUST_LOG_PROMOTION_FAILED: &str = "coercion.trust_log_promotion_failed";
    /// `time_horizon` was not one of `short|mid|long` and was dropped.
    pub const TIME_HORIZON_DROPPED: &str = "coercion.time_horizon_dropped";
    /// `min_evidence` was outside 0..=100 and was clamped.
    pub const MIN_EVIDENCE_CLAMPED: &str = "coercion.min_evidence_clamped";
}

/// One recorded normalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoercionEvent {
    /// Namespaced kind, e.g. `coercion.options_to_alternatives`.
    pub kind: String,
    /// Field the normalization applied to.
    pub field: String,
    /// Human-readable description of what happened.
    pub detail: String,
}

impl CoercionEvent {
    /// Build an event.
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        field: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            field: field.into(),
            detail: detail.into(),
        }
    }
}

/// Accumulates events during normalization and finalize.
#[derive(Debug, Clone, Default)]
pub struct CoercionLog {
    events: Vec<CoercionEvent>,
}

impl CoercionLog {
    /// Record an event.
    pub fn record(
        &mut self,
        kind: impl Into<String>,
        field: impl Into<String>,
        detail: impl Into<String>,
    ) {
        self.events.push(CoercionEvent::new(kind, field, detail));
    }

    /// True when a given kind was recorded.
    #[must_use]
    pub fn has(&self, kind: &str) -> bool {
        self.events.iter().any(|e| e.kind == kind)
    }

    /// All events in recording order.
    #[must_use]
    pub fn events(&self) -> &[CoercionEvent] {
        &self.events
    }

    /// Distinct coerced field names, in first-seen order.
    #[must_use]
    pub fn coerced_fields(&self) -> Vec<String> {
        let mut fields = Vec::new();
        for event in &self.events {
            if !fields.contains(&event.field) {
                fields.push(event.field.clone());
            }
        }
        fields
    }

    /// Consume the log, yielding the events.
    #[must_use]
    pub fn into_events(self) -> Vec<CoercionEvent> {
        self.events
    }
}
