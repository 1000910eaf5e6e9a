//! ```text
//! FujiPolicy (JSON) ──► PolicyStore ──► Arc<FujiPolicy> snapshot
//!                          │                  │
//!                          │ hot reload       ▼
//!                          │ (fd-based)    FujiGate ──► Signals ──► FujiDecision
//!                          │                  │           ├─► PiiScanner
//!                          │                  │           ├─► KeywordScanner
//!                          │                  │           ├─► InjectionScanner
//!                          │                  │           ├─► ContentClassifiers
//!                          │                  │           └─► SafetyAdvisor (optional)
//!                          │                  │
//!                          │                  └─► auto-stop circuit
//!                          └─► validation: monotone thresholds, ranges
//! ```
//!
//! # vt-fuji
//!
//! **The FUJI safety gate for the VERITAS decision engine.**
//!
//! `vt-fuji` maps a candidate action and its originating query to a
//! scalar risk score and a bucketed decision (allow / modify /
//! human-review / rejected), driven entirely by a declarative
//! [`FujiPolicy`](policy::FujiPolicy) document that is hot reloaded
//! without restarting the process.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vt_fuji::prelude::*;
//!
//! # async fn example() -> Result<(), vt_fuji::gate::GateError> {
//! let store = Arc::new(PolicyStore::open("data/fuji_policy.json")?);
//! let gate = FujiGate::new(store)?;
//!
//! let decision = gate
//!     .evaluate(&GateInput::from_query("Should I pack an umbrella?"))
//!     .await;
//! assert!(decision.is_permitted());
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - **Fail-closed reload** – a policy that fails to parse or validate
//!   never replaces the running one.
//! - **TOCTOU-free reads** – reload stats and reads the policy through a
//!   single file descriptor.
//! - **Snapshot consistency** – every signal of one evaluation observes
//!   the same policy object.
//! - **Audit-traceable risk** – per-signal weights live in the policy
//!   document, not in code.
//!
//! ## Modules
//!
//! - [`policy`] – the declarative policy schema and its validation
//! - [`reload`] – the hot-reloading policy store
//! - [`signals`] – PII, keyword, injection, and content risk signals
//! - [`gate`] – signal aggregation, bucketing, and the auto-stop circuit
//! - [`outcome`] – decision and violation types

#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod gate;
pub mod outcome;
pub mod policy;
pub mod reload;
pub mod signals;

/// Re-exports for convenient access to core types.
pub mod prelude {
    pub use crate::gate::{FujiGate, GateError};
    pub use crate::outcome::{DecisionStatus, FujiDecision, Modification, SignalKind, Violation};
    pub use crate::policy::{AuditLevel, FujiPolicy, FujiRules, PolicyError, RiskThresholds};
    pub use crate::reload::PolicyStore;
    pub use crate::signals::{GateInput, SafetyAdvisor};
}
