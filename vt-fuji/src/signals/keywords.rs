//! Keyword hard/soft list matcher.
//!
//! Hard matches mark the report as a hard block – the gate rejects
//! regardless of the weighted score. Soft matches add a fixed penalty
//! each, capped at 1.0.

use std::borrow::Cow;

use regex::RegexSet;
use thiserror::Error;

use crate::outcome::{SignalKind, SignalReport, Violation};

/// Penalty added per soft-list match.
pub const SOFT_PENALTY: f32 = 0.15;

/// Hard-block phrases. A match forces rejection when
/// `fuji_rules.keyword_hard_block` is enabled.
const HARD_PATTERNS: &[(&str, &str)] = &[
    (
        "KW-HARD-001",
        r"(?i)bypass\s+(internal\s+)?(auth|authentication|authorization)",
    ),
    (
        "KW-HARD-002",
        r"(?i)(gain|escalate\s+to|obtain)\s+(admin|root)\s+(privileges?|access)",
    ),
    (
        "KW-HARD-003",
        r"(?i)(build|make|synthesi[sz]e)\s+(a\s+)?(bomb|explosive|nerve\s+agent)",
    ),
    ("KW-HARD-004", r"(?i)steal\s+(credentials?|passwords?|api\s+keys?)"),
    (
        "KW-HARD-005",
        r"(?i)(exfiltrate|dump)\s+(the\s+)?(database|customer\s+data|user\s+records)",
    ),
];

/// Soft phrases that raise suspicion without forcing rejection.
const SOFT_PATTERNS: &[(&str, &str)] = &[
    ("KW-SOFT-001", r"(?i)\bhack(ing|er)?\b"),
    ("KW-SOFT-002", r"(?i)\bexploit\b"),
    ("KW-SOFT-003", r"(?i)\b(crack|keygen|warez)\b"),
    ("KW-SOFT-004", r"(?i)without\s+(them|her|him|anyone)\s+knowing"),
    ("KW-SOFT-005", r"(?i)\buntraceable\b"),
];

/// Errors raised while compiling the keyword lists.
#[derive(Debug, Error)]
pub enum KeywordError {
    /// A list failed to compile.
    #[error("keyword list '{list}' failed to compile: {source}")]
    Compile {
        /// Which list (`hard` or `soft`).
        list: &'static str,
        /// Underlying regex error.
        source: regex::Error,
    },
}

/// Compiled hard and soft keyword lists.
#[derive(Debug, Clone)]
pub struct KeywordScanner {
    hard: RegexSet,
    soft: RegexSet,
}

impl KeywordScanner {
    /// Compile both lists.
    ///
    /// # Errors
    ///
    /// Returns [`KeywordError`] if either list fails to compile.
    pub fn new() -> Result<Self, KeywordError> {
        let hard = RegexSet::new(HARD_PATTERNS.iter().map(|(_, re)| *re)).map_err(|source| {
            KeywordError::Compile {
                list: "hard",
                source,
            }
        })?;
        let soft = RegexSet::new(SOFT_PATTERNS.iter().map(|(_, re)| *re)).map_err(|source| {
            KeywordError::Compile {
                list: "soft",
                source,
            }
        })?;
        Ok(Self { hard, soft })
    }

    /// Evaluate all surfaces.
    ///
    /// `hard_enabled` / `soft_enabled` mirror the policy's
    /// `keyword_hard_block` / `keyword_soft_penalty` flags.
    #[must_use]
    pub fn evaluate(
        &self,
        surfaces: impl Iterator<Item = impl AsRef<str>>,
        hard_enabled: bool,
        soft_enabled: bool,
    ) -> SignalReport {
        let mut report = SignalReport::clean();

        for surface in surfaces {
            let text = surface.as_ref();

            if hard_enabled {
                for idx in self.hard.matches(text) {
                    let (id, _) = HARD_PATTERNS[idx];
                    report.hard_block = true;
                    report.score = 1.0;
                    report.violations.push(Violation {
                        signal: SignalKind::Keywords,
                        rule_id: Cow::Borrowed(id),
                        detail: "hard-blocked phrase matched".to_string(),
                        raw_score: 1.0,
                    });
                }
            }

            if soft_enabled {
                for idx in self.soft.matches(text) {
                    let (id, _) = SOFT_PATTERNS[idx];
                    report.score = (report.score + SOFT_PENALTY).min(1.0);
                    report.violations.push(Violation {
                        signal: SignalKind::Keywords,
                        rule_id: Cow::Borrowed(id),
                        detail: "soft keyword matched".to_string(),
                        raw_score: SOFT_PENALTY,
                    });
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str, hard: bool, soft: bool) -> SignalReport {
        KeywordScanner::new()
            .unwrap()
            .evaluate(std::iter::once(text), hard, soft)
    }

    #[test]
    fn hard_match_sets_hard_block() {
        let report = scan(
            "shortest steps to bypass internal auth and gain admin privileges",
            true,
            true,
        );
        assert!(report.hard_block);
        assert_eq!(report.score, 1.0);
        assert!(report.violations.iter().any(|v| v.rule_id == "KW-HARD-001"));
        assert!(report.violations.iter().any(|v| v.rule_id == "KW-HARD-002"));
    }

    #[test]
    fn hard_disabled_skips_hard_list() {
        let report = scan("bypass internal auth", false, true);
        assert!(!report.hard_block);
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn soft_matches_accumulate_penalty() {
        let report = scan("an exploit to hack the thing, untraceable", true, true);
        assert!(!report.hard_block);
        let expected = (3.0 * SOFT_PENALTY).min(1.0);
        assert!((report.score - expected).abs() < f32::EPSILON);
    }

    #[test]
    fn clean_text_is_clean() {
        let report = scan("what should I cook tonight?", true, true);
        assert_eq!(report.score, 0.0);
        assert!(report.violations.is_empty());
    }
}
