//! Capability manifest and optional capability traits.
//!
//! Optional features are declared at startup from explicit configuration,
//! never discovered through import-time probing. Stages consult the
//! manifest; the transport exposes it on `/health` for operational
//! visibility.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Declares which optional capabilities this instance runs with.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilityManifest {
    /// A web-search backend is wired in.
    pub web_search: bool,
    /// An LLM safety advisor is wired in for the gate.
    pub llm_safety_head: bool,
    /// The subprocess self-diagnostic is permitted. Off by default;
    /// [`sanitized`](Self::sanitized) refuses it when no OS-level
    /// sandboxing is detected.
    pub self_diagnostic: bool,
}

impl CapabilityManifest {
    /// Apply startup refusal rules: `self_diagnostic` is cleared (with a
    /// warning) unless [`sandbox_detected`] reports OS-level sandboxing
    /// around this process.
    #[must_use]
    pub fn sanitized(self) -> Self {
        self.sanitize_with(sandbox_detected())
    }

    fn sanitize_with(mut self, sandboxed: bool) -> Self {
        if self.self_diagnostic && !sandboxed {
            warn!("self_diagnostic capability refused: no OS-level sandboxing detected");
            self.self_diagnostic = false;
        }
        self
    }
}

/// Best-effort detection of OS-level sandboxing around this process.
///
/// On Linux this checks for an active seccomp filter in
/// `/proc/self/status` and for the common container markers
/// (`/.dockerenv`, `/run/.containerenv`). Anywhere else, or when nothing
/// is found, the answer is `false` and the self-diagnostic stays refused.
#[must_use]
pub fn sandbox_detected() -> bool {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(mode) = line.strip_prefix("Seccomp:") {
                    if mode.trim() != "0" {
                        return true;
                    }
                }
            }
        }
        if std::path::Path::new("/.dockerenv").exists()
            || std::path::Path::new("/run/.containerenv").exists()
        {
            return true;
        }
    }
    false
}

/// Bounds for web-search calls.
pub const WEB_SEARCH_MIN_RESULTS: usize = 1;
/// Upper clamp for `max_results`.
pub const WEB_SEARCH_MAX_RESULTS: usize = 100;

/// One web-search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Result URL.
    pub url: String,
    /// Text snippet.
    pub snippet: String,
    /// Source reliability estimate in \[0.0, 1.0\].
    pub reliability: f32,
}

/// Errors raised by search backends.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The backend is unavailable or failing.
    #[error("web search unavailable: {0}")]
    Unavailable(String),
}

/// The web-search capability consumed by the evidence stage.
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Search, with `max_results` clamped to
    /// \[[`WEB_SEARCH_MIN_RESULTS`], [`WEB_SEARCH_MAX_RESULTS`]\] by the
    /// caller.
    ///
    /// # Errors
    ///
    /// Returns [`SearchError`] when no results could be produced.
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError>;
}

/// Clamp a requested result count to the supported range.
#[must_use]
pub fn clamp_max_results(requested: usize) -> usize {
    requested.clamp(WEB_SEARCH_MIN_RESULTS, WEB_SEARCH_MAX_RESULTS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_defaults_off() {
        let manifest = CapabilityManifest::default();
        assert!(!manifest.web_search);
        assert!(!manifest.llm_safety_head);
        assert!(!manifest.self_diagnostic);
    }

    #[test]
    fn clamping() {
        assert_eq!(clamp_max_results(0), 1);
        assert_eq!(clamp_max_results(50), 50);
        assert_eq!(clamp_max_results(5000), 100);
    }

    #[test]
    fn self_diagnostic_refused_without_sandbox() {
        let manifest = CapabilityManifest {
            web_search: true,
            llm_safety_head: true,
            self_diagnostic: true,
        };
        let sanitized = manifest.sanitize_with(false);
        assert!(!sanitized.self_diagnostic);
        // Only the refused capability is touched.
        assert!(sanitized.web_search);
        assert!(sanitized.llm_safety_head);
    }

    #[test]
    fn self_diagnostic_kept_inside_sandbox() {
        let manifest = CapabilityManifest {
            self_diagnostic: true,
            ..Default::default()
        };
        assert!(manifest.sanitize_with(true).self_diagnostic);
    }

    #[test]
    fn manifest_round_trips() {
        let manifest = CapabilityManifest {
            web_search: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&manifest).unwrap();
        let back: CapabilityManifest = serde_json::from_str(&json).unwrap();
        assert!(back.web_search);
        assert!(!back.self_diagnostic);
    }
}
