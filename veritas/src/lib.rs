//! # VERITAS: an auditable LLM decision engine
//!
//! VERITAS wraps a Large Language Model as a safe, reproducible policy
//! engine. A client submits a natural-language query and context; the
//! engine returns a structured decision – a chosen action, ranked
//! alternatives, evidence, critique, debate, and a safety verdict –
//! together with an immutable, hash-chained audit record.
//!
//! ## The pipeline
//!
//! ```text
//! normalize → plan → collect_evidence → critique → debate → score → gate → finalize
//!                        │                                    │        │
//!                        └── Memory (read) ── ValueCore ──────┘        ├─► TrustLog (append)
//!                                                                      └─► DecideResponse
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use veritas::config::VeritasConfig;
//! use veritas::llm::ScriptedCompleter;
//! use veritas::pipeline::{DecisionPipeline, Services};
//! use veritas::schema::DecideRequest;
//!
//! # async fn example() -> Result<(), veritas::pipeline::BootError> {
//! let config = VeritasConfig::for_data_dir("./data");
//! let completer = Arc::new(ScriptedCompleter::always("{}"));
//! let services = Arc::new(Services::bootstrap(config, completer)?);
//! let pipeline = DecisionPipeline::new(services);
//!
//! let response = pipeline
//!     .decide("user-1", DecideRequest::from_query("Should I pack an umbrella?"))
//!     .await;
//! assert!(response.ok);
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - **Auditability** – every decision appends a SHA-256 hash-chained
//!   entry to the TrustLog; chain breaks are detected and reported, never
//!   repaired.
//! - **Fail-closed safety** – the FUJI gate never runs without a
//!   validated policy, and a failed hot reload keeps the previous policy.
//! - **Crash safety** – all persistent state is written through atomic
//!   temp-file-rename or `O_APPEND` plus fsync of file and directory.
//! - **Isolation** – memory is sharded per authenticated principal;
//!   request bodies are never trusted for ownership.
//!
//! ## Module guide
//!
//! - [`schema`] – request/response types and the coercion layer
//! - [`pipeline`] – stage trait, the eight stages, and the orchestrator
//! - [`llm`] – the `ChatCompleter` seam, retry policy, JSON extraction
//! - [`memory`] – per-user records and vector similarity search
//! - [`values`] – value-axis scoring and EMA drift
//! - [`trustlog`] – the hash-chained audit log
//! - [`fsio`] – atomic write/append primitives and path guards
//! - [`events`] – the decision event stream
//! - [`capability`] – the capability manifest and optional backends
//! - [`config`] – environment-driven configuration
//! - [`telemetry`] – tracing subscriber setup for binaries

pub mod capability;
pub mod config;
pub mod events;
pub mod fsio;
pub mod llm;
pub mod memory;
pub mod pipeline;
pub mod schema;
pub mod telemetry;
pub mod trustlog;
pub mod utils;
pub mod values;

pub use vt_fuji;

/// Re-exports for convenient access to the engine surface.
pub mod prelude {
    pub use crate::capability::CapabilityManifest;
    pub use crate::config::VeritasConfig;
    pub use crate::llm::{ChatCompleter, ChatRequest};
    pub use crate::memory::{MemoryKind, MemoryService};
    pub use crate::pipeline::{BootError, DecisionPipeline, Services};
    pub use crate::schema::{DecideRequest, DecideResponse};
    pub use crate::trustlog::TrustLog;
    pub use vt_fuji::outcome::DecisionStatus;
}
