//! Prompt-injection pattern scanner.
//!
//! [`InjectionScanner`] compiles the five fixed patterns into a
//! [`RegexSet`] for O(n) multi-pattern matching, then re-searches with
//! individual [`Regex`]es only for matched patterns to extract the
//! offending span for audit.

use std::borrow::Cow;

use regex::{Regex, RegexSet};
use thiserror::Error;

use crate::outcome::{SignalKind, SignalReport, Violation};

/// A fixed injection pattern.
#[derive(Debug, Clone)]
struct InjectionPattern {
    id: Cow<'static, str>,
    description: Cow<'static, str>,
    regex_str: Cow<'static, str>,
    weight: f32,
}

macro_rules! pat {
    ($id:expr, $desc:expr, $re:expr, $w:expr) => {
        InjectionPattern {
            id: Cow::Borrowed($id),
            description: Cow::Borrowed($desc),
            regex_str: Cow::Borrowed($re),
            weight: $w,
        }
    };
}

/// The five fixed prompt-injection patterns.
fn fixed_patterns() -> Vec<InjectionPattern> {
    vec![
        pat!(
            "INJ-001",
            "Ignore previous instructions",
            r"(?i)ignore\s+(all\s+)?(previous|prior|above)\s+instructions",
            1.0
        ),
        pat!(
            "INJ-002",
            "Role redefinition (you are now / act as)",
            r"(?i)(you\s+are\s+now\b|act\s+as\s+(a|an)\b|pretend\s+(to\s+be|you\s+are)\b)",
            0.8
        ),
        pat!(
            "INJ-003",
            "System prompt extraction",
            r"(?i)(reveal|show|print|repeat)\s+(your\s+)?(system\s+prompt|hidden\s+instructions|initial\s+prompt)",
            0.9
        ),
        pat!(
            "INJ-004",
            "Delimiter or special-token abuse",
            r"(?i)(<\|im_start\|>|<\|im_end\|>|\[/?(INST|SYS)\]|```\s*system\b)",
            0.7
        ),
        pat!(
            "INJ-005",
            "Guardrail disable request",
            r"(?i)(disable|bypass|turn\s+off|without)\s+(your\s+)?(safety|guardrails?|filters?|restrictions?)",
            0.9
        ),
    ]
}

/// Errors raised while compiling the scanner.
#[derive(Debug, Error)]
pub enum ScannerError {
    /// A pattern failed to compile.
    #[error("injection pattern '{id}' failed to compile: {source}")]
    Compile {
        /// Pattern identifier.
        id: String,
        /// Underlying regex error.
        source: regex::Error,
    },
}

/// Fast multi-pattern injection scanner.
#[derive(Debug, Clone)]
pub struct InjectionScanner {
    regex_set: RegexSet,
    individual: Vec<Regex>,
    patterns: Vec<InjectionPattern>,
}

impl InjectionScanner {
    /// Compile the fixed pattern set.
    ///
    /// # Errors
    ///
    /// Returns [`ScannerError`] if a pattern fails to compile.
    pub fn new() -> Result<Self, ScannerError> {
        let patterns = fixed_patterns();
        let strs: Vec<&str> = patterns.iter().map(|p| p.regex_str.as_ref()).collect();

        let regex_set = RegexSet::new(&strs).map_err(|source| ScannerError::Compile {
            id: "set".to_string(),
            source,
        })?;
        let individual = patterns
            .iter()
            .map(|p| {
                Regex::new(p.regex_str.as_ref()).map_err(|source| ScannerError::Compile {
                    id: p.id.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            regex_set,
            individual,
            patterns,
        })
    }

    /// Scan all surfaces and aggregate the strongest matches.
    #[must_use]
    pub fn evaluate(&self, surfaces: impl Iterator<Item = impl AsRef<str>>) -> SignalReport {
        let mut report = SignalReport::clean();

        for surface in surfaces {
            let text = surface.as_ref();
            for idx in self.regex_set.matches(text) {
                let Some(m) = self.individual[idx].find(text) else {
                    continue;
                };
                let pattern = &self.patterns[idx];
                let matched: String = m.as_str().chars().take(50).collect();
                report.score = report.score.max(pattern.weight);
                report.violations.push(Violation {
                    signal: SignalKind::Injection,
                    rule_id: pattern.id.clone(),
                    detail: format!("{}: \"{matched}\"", pattern.description),
                    raw_score: pattern.weight,
                });
            }
        }

        report
    }
}
