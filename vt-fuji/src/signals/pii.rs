//! PII detection and redaction.
//!
//! Combines regex candidates with checksum verification: credit-card
//! candidates must pass the Luhn check and Japanese My Number candidates
//! must pass the national check-digit algorithm before they count as
//! findings. Redaction is deterministic – the same input always produces
//! the same output – so redacted payloads remain diffable across audit
//! reads.

use std::borrow::Cow;

use regex::Regex;

use crate::outcome::{Modification, SignalKind, SignalReport, Violation};

/// Kinds of PII the scanner recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiKind {
    /// Email address.
    Email,
    /// Phone number (international or Japanese domestic form).
    Phone,
    /// Payment-card number passing the Luhn check.
    CreditCard,
    /// Japanese My Number (12 digits with valid check digit).
    NationalId,
}

impl PiiKind {
    fn label(self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Phone => "phone",
            Self::CreditCard => "credit_card",
            Self::NationalId => "national_id",
        }
    }

    fn score(self) -> f32 {
        match self {
            Self::Email => 0.3,
            Self::Phone => 0.35,
            Self::CreditCard => 0.9,
            Self::NationalId => 0.95,
        }
    }
}

/// A single PII finding with its byte span.
#[derive(Debug, Clone)]
pub struct PiiMatch {
    /// What was found.
    pub kind: PiiKind,
    /// Byte span in the scanned text.
    pub span: std::ops::Range<usize>,
}

/// Regex + checksum PII scanner.
#[derive(Debug, Clone)]
pub struct PiiScanner {
    email: Regex,
    phone: Regex,
    card_candidate: Regex,
    my_number_candidate: Regex,
}

impl PiiScanner {
    /// Compile the detector regexes. The patterns are static, so failure
    /// here indicates a programming error; it is still surfaced as a
    /// `Result` to keep construction fallible like the other scanners.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`regex::Error`].
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")?,
            phone: Regex::new(r"(?:\+?\d{1,3}[-. ])?(?:\(?\d{2,4}\)?[-. ])\d{2,4}[-. ]\d{3,4}")?,
            card_candidate: Regex::new(r"\b(?:\d[ -]?){13,19}\b")?,
            my_number_candidate: Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}\b")?,
        })
    }

    /// Find all verified PII spans in `text`, ordered by start offset.
    #[must_use]
    pub fn find(&self, text: &str) -> Vec<PiiMatch> {
        let mut matches = Vec::new();

        for m in self.email.find_iter(text) {
            matches.push(PiiMatch {
                kind: PiiKind::Email,
                span: m.range(),
            });
        }
        for m in self.phone.find_iter(text) {
            matches.push(PiiMatch {
                kind: PiiKind::Phone,
                span: m.range(),
            });
        }
        for m in self.card_candidate.find_iter(text) {
            if luhn_valid(m.as_str()) {
                matches.push(PiiMatch {
                    kind: PiiKind::CreditCard,
                    span: m.range(),
                });
            }
        }
        for m in self.my_number_candidate.find_iter(text) {
            if my_number_valid(m.as_str()) {
                matches.push(PiiMatch {
                    kind: PiiKind::NationalId,
                    span: m.range(),
                });
            }
        }

        // Longest span wins at equal start offsets, so an enclosing match
        // (a full card number) is not shadowed by a shorter prefix match.
        matches.sort_by(|a, b| {
            a.span
                .start
                .cmp(&b.span.start)
                .then(b.span.end.cmp(&a.span.end))
        });
        matches
    }

    /// Evaluate all surfaces for the gate.
    #[must_use]
    pub fn evaluate(&self, surfaces: impl Iterator<Item = impl AsRef<str>>) -> SignalReport {
        let mut report = SignalReport::clean();

        for surface in surfaces {
            for found in self.find(surface.as_ref()) {
                report.score = report.score.max(found.kind.score());
                report.violations.push(Violation {
                    signal: SignalKind::Pii,
                    rule_id: Cow::Owned(format!("PII-{}", found.kind.label())),
                    detail: format!("{} detected at bytes {:?}", found.kind.label(), found.span),
                    raw_score: found.kind.score(),
                });
            }
        }

        if !report.violations.is_empty() {
            report.modifications.push(Modification {
                signal: SignalKind::Pii,
                kind: Cow::Borrowed("redact_pii"),
                detail: "replace detected PII spans with [REDACTED:*] markers".to_string(),
            });
        }

        report
    }

    /// Replace every verified PII span with a `[REDACTED:<kind>]` marker.
    ///
    /// Overlapping spans are collapsed left-to-right; the result is
    /// deterministic for a given input.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        let matches = self.find(text);
        if matches.is_empty() {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0usize;
        for m in matches {
            if m.span.start < cursor {
                continue; // swallowed by a previous replacement
            }
            out.push_str(&text[cursor..m.span.start]);
            out.push_str("[REDACTED:");
            out.push_str(m.kind.label());
            out.push(']');
            cursor = m.span.end;
        }
        out.push_str(&text[cursor..]);
        out
    }
}

/// Luhn checksum over the digits of `candidate`; separators are ignored.
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Japanese My Number check digit (JIS X 0601 appendix algorithm).
fn my_number_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() != 12 {
        return false;
    }
    // Weights for the leading 11 digits, applied most-significant first:
    // positions n = 11..=1 get weight n - 5 for n >= 7, else n + 1.
    let sum: u32 = digits[..11]
        .iter()
        .enumerate()
        .map(|(i, &d)| {
            let n = 11 - i as u32;
            let weight = if n >= 7 { n - 5 } else { n + 1 };
            d * weight
        })
        .sum();
    let remainder = sum % 11;
    let check = if remainder <= 1 { 0 } else { 11 - remainder };
    check == digits[11]
}
