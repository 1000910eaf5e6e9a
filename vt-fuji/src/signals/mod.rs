//! Risk signals combined by the gate.
//!
//! Each signal inspects the candidate action text and returns a
//! [`SignalReport`](crate::outcome::SignalReport) with an unweighted score
//! in \[0.0, 1.0\] plus the violations backing it. The gate weights the
//! reports per [`SignalWeights`](crate::policy::SignalWeights) and buckets
//! the combined risk.

pub mod advisor;
pub mod content;
pub mod injection;
pub mod keywords;
pub mod pii;

pub use advisor::SafetyAdvisor;
pub use content::ContentClassifiers;
pub use injection::InjectionScanner;
pub use keywords::KeywordScanner;
pub use pii::PiiScanner;

/// The text surfaces a gate evaluation inspects.
///
/// `action` is the candidate action under evaluation (usually the chosen
/// alternative's title + description); `query` is the originating user
/// query; `context_text` is a flattened rendition of request context
/// fields that may carry user-supplied text.
#[derive(Debug, Clone, Default)]
pub struct GateInput {
    /// Candidate action text.
    pub action: String,
    /// Originating user query.
    pub query: String,
    /// Flattened request context text.
    pub context_text: String,
    /// Authenticated user, when known. Drives auto-stop accounting.
    pub user_id: Option<String>,
}

impl GateInput {
    /// Build an input from the query alone.
    #[must_use]
    pub fn from_query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Iterate the non-empty surfaces in evaluation order.
    pub(crate) fn surfaces(&self) -> impl Iterator<Item = &str> {
        [
            self.action.as_str(),
            self.query.as_str(),
            self.context_text.as_str(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
    }
}
