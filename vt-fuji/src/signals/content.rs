//! Heuristic content classifiers: minors, violence, self-harm, illicit.
//!
//! Each classifier is a small pattern bundle producing a category score;
//! the signal score is the maximum across enabled categories. These are
//! deliberately conservative heuristics – the optional LLM safety advisor
//! covers the long tail.

use std::borrow::Cow;

use regex::RegexSet;
use thiserror::Error;

use crate::outcome::{SignalKind, SignalReport, Violation};
use crate::policy::FujiRules;

/// Content category under inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCategory {
    /// Sexual or exploitative content involving minors.
    Minors,
    /// Instructions or incitement toward violence.
    Violence,
    /// Self-harm encouragement or methods.
    SelfHarm,
    /// Illicit activity facilitation (drugs, fraud, weapons trafficking).
    Illicit,
}

impl ContentCategory {
    fn label(self) -> &'static str {
        match self {
            Self::Minors => "minors",
            Self::Violence => "violence",
            Self::SelfHarm => "self_harm",
            Self::Illicit => "illicit",
        }
    }

    fn score(self) -> f32 {
        match self {
            Self::Minors => 1.0,
            Self::Violence => 0.8,
            Self::SelfHarm => 0.85,
            Self::Illicit => 0.7,
        }
    }
}

const MINORS_PATTERNS: &[&str] = &[
    r"(?i)\b(minor|child|underage)\b.{0,40}\b(sexual|explicit|nude)",
    r"(?i)\b(sexual|explicit|nude)\b.{0,40}\b(minor|child|underage)\b",
];

const VIOLENCE_PATTERNS: &[&str] = &[
    r"(?i)how\s+to\s+(kill|maim|hurt)\s+(a\s+)?(person|someone|people)",
    r"(?i)\b(mass\s+casualt|school\s+shooting)",
    r"(?i)(plan|commit)\s+(an?\s+)?(attack|assault)\s+on",
];

const SELF_HARM_PATTERNS: &[&str] = &[
    r"(?i)(best|painless|effective)\s+(way|method)s?\s+to\s+(end\s+my\s+life|kill\s+myself)",
    r"(?i)how\s+to\s+(cut|harm|starve)\s+myself",
];

const ILLICIT_PATTERNS: &[&str] = &[
    r"(?i)(cook|manufacture|synthesi[sz]e)\s+(meth|fentanyl|mdma)",
    r"(?i)(launder|laundering)\s+money",
    r"(?i)(buy|sell)\s+.{0,20}\b(stolen|counterfeit)\b",
    r"(?i)ghost\s+gun|untraceable\s+(firearm|weapon)",
];

/// Errors raised while compiling the classifiers.
#[derive(Debug, Error)]
pub enum ContentError {
    /// A category pattern set failed to compile.
    #[error("content classifier '{category}' failed to compile: {source}")]
    Compile {
        /// Category label.
        category: &'static str,
        /// Underlying regex error.
        source: regex::Error,
    },
}

/// The four compiled classifiers.
#[derive(Debug, Clone)]
pub struct ContentClassifiers {
    minors: RegexSet,
    violence: RegexSet,
    self_harm: RegexSet,
    illicit: RegexSet,
}

impl ContentClassifiers {
    /// Compile all four categories.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError`] naming the category that failed.
    pub fn new() -> Result<Self, ContentError> {
        let compile = |category, patterns: &[&str]| {
            RegexSet::new(patterns).map_err(|source| ContentError::Compile { category, source })
        };
        Ok(Self {
            minors: compile("minors", MINORS_PATTERNS)?,
            violence: compile("violence", VIOLENCE_PATTERNS)?,
            self_harm: compile("self_harm", SELF_HARM_PATTERNS)?,
            illicit: compile("illicit", ILLICIT_PATTERNS)?,
        })
    }

    /// Evaluate all surfaces against the categories enabled by `rules`.
    #[must_use]
    pub fn evaluate(
        &self,
        surfaces: impl Iterator<Item = impl AsRef<str>>,
        rules: &FujiRules,
    ) -> SignalReport {
        let mut report = SignalReport::clean();

        let categories: [(ContentCategory, &RegexSet, bool); 4] = [
            (ContentCategory::Minors, &self.minors, rules.minors_protection),
            (ContentCategory::Violence, &self.violence, rules.violence_filter),
            (
                ContentCategory::SelfHarm,
                &self.self_harm,
                rules.self_harm_illicit_filter,
            ),
            (
                ContentCategory::Illicit,
                &self.illicit,
                rules.self_harm_illicit_filter,
            ),
        ];

        for surface in surfaces {
            let text = surface.as_ref();
            for (category, set, enabled) in &categories {
                if !enabled || !set.is_match(text) {
                    continue;
                }
                report.score = report.score.max(category.score());
                report.violations.push(Violation {
                    signal: SignalKind::Content,
                    rule_id: Cow::Owned(format!("CNT-{}", category.label())),
                    detail: format!("{} classifier matched", category.label()),
                    raw_score: category.score(),
                });
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(text: &str) -> SignalReport {
        ContentClassifiers::new()
            .unwrap()
            .evaluate(std::iter::once(text), &FujiRules::default())
    }

    #[test]
    fn violence_matches() {
        let report = scan("how to kill a person silently");
        assert!(report.score >= 0.8);
        assert!(report.violations.iter().any(|v| v.rule_id == "CNT-violence"));
    }

    #[test]
    fn illicit_matches() {
        let report = scan("steps to launder money through shell companies");
        assert!(report.violations.iter().any(|v| v.rule_id == "CNT-illicit"));
    }

    #[test]
    fn disabled_rules_skip_categories() {
        let rules = FujiRules {
            violence_filter: false,
            ..FujiRules::default()
        };
        let report = ContentClassifiers::new()
            .unwrap()
            .evaluate(std::iter::once("how to kill a person"), &rules);
        assert_eq!(report.score, 0.0);
    }

    #[test]
    fn benign_text_is_clean() {
        let report = scan("how to kill a process on linux");
        assert!(report.violations.is_empty());
    }
}
