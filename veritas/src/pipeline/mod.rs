//! The decision pipeline: fixed stage order, degraded-stage policy,
//! deadline enforcement, and response assembly.
//!
//! ```text
//! normalize → plan → collect_evidence → critique → debate → score → gate → finalize
//! ```
//!
//! The orchestrator owns ordering and timeouts. Stage failures with a
//! recoverable kind become `stage_degraded` markers on the response;
//! fatal kinds (invalid input, policy failure, deadline) abort the
//! pipeline and shape the final status. A gate *rejection* is not an
//! error: the pipeline continues to finalize, and the response carries
//! `decision_status = rejected` in-band.

pub mod deliberate;
pub mod evidence;
pub mod finalize;
pub mod gate;
pub mod normalize;
pub mod plan;
pub mod score;
pub mod stage;

pub use stage::{DecisionCtx, PipelineStage, StageError};

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;
use vt_fuji::gate::{FujiGate, GateError};
use vt_fuji::outcome::DecisionStatus;
use vt_fuji::policy::{FujiPolicy, PolicyError};
use vt_fuji::reload::PolicyStore;

use crate::capability::{CapabilityManifest, WebSearch};
use crate::config::VeritasConfig;
use crate::events::{DecisionEvent, EventEmitter, null_emitter};
use crate::fsio::FsIoError;
use crate::llm::ChatCompleter;
use crate::memory::{HashEmbedder, MemoryError, MemoryService};
use crate::schema::coercion::kinds;
use crate::schema::request::DecideRequest;
use crate::schema::response::{DecideResponse, GateOut, StageDegraded};
use crate::trustlog::{TrustLog, TrustLogError};
use crate::values::{DriftTracker, drift::DEFAULT_ALPHA};

/// Errors raised while wiring the engine at startup.
#[derive(Debug, Error, Diagnostic)]
pub enum BootError {
    /// The FUJI policy is missing or invalid. Fatal at startup.
    #[error(transparent)]
    Policy(#[from] PolicyError),

    /// The gate could not be constructed.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// The TrustLog could not be opened.
    #[error(transparent)]
    #[diagnostic(transparent)]
    TrustLog(#[from] TrustLogError),

    /// The memory store could not be opened.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Memory(#[from] MemoryError),

    /// A state file could not be created.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Io(#[from] FsIoError),
}

/// Everything the stages need, wired once at startup and shared.
pub struct Services {
    /// Engine configuration.
    pub config: VeritasConfig,
    /// Audit log.
    pub trust_log: Arc<TrustLog>,
    /// Memory store.
    pub memory: Arc<MemoryService>,
    /// Value-core EMA tracker.
    pub drift: Arc<DriftTracker>,
    /// FUJI gate.
    pub gate: Arc<FujiGate>,
    /// LLM completion capability.
    pub completer: Arc<dyn ChatCompleter>,
    /// Optional web-search backend.
    pub web_search: Option<Arc<dyn WebSearch>>,
    /// Declared optional capabilities.
    pub manifest: CapabilityManifest,
    /// Decision event stream.
    pub events: EventEmitter,
}

impl Services {
    /// Wire the engine, requiring an existing policy file.
    ///
    /// # Errors
    ///
    /// Returns [`BootError::Policy`] when the policy file is missing or
    /// invalid – startup never proceeds without a validated policy.
    pub fn open(
        config: VeritasConfig,
        completer: Arc<dyn ChatCompleter>,
    ) -> Result<Self, BootError> {
        let store = Arc::new(PolicyStore::open(config.policy_path())?);
        Self::assemble(config, completer, store)
    }

    /// Wire the engine, seeding a baseline policy when none exists.
    ///
    /// Intended for fresh data directories (first boot, tests).
    ///
    /// # Errors
    ///
    /// Propagates wiring failures as [`BootError`].
    pub fn bootstrap(
        config: VeritasConfig,
        completer: Arc<dyn ChatCompleter>,
    ) -> Result<Self, BootError> {
        std::fs::create_dir_all(&config.data_dir).map_err(|source| FsIoError::Io {
            path: config.data_dir.clone(),
            source,
        })?;
        let policy_path = config.policy_path();
        let store = if policy_path.exists() {
            Arc::new(PolicyStore::open(&policy_path)?)
        } else {
            Arc::new(PolicyStore::seed(
                &policy_path,
                &FujiPolicy::baseline("bootstrap"),
            )?)
        };
        Self::assemble(config, completer, store)
    }

    fn assemble(
        config: VeritasConfig,
        completer: Arc<dyn ChatCompleter>,
        store: Arc<PolicyStore>,
    ) -> Result<Self, BootError> {
        let gate = Arc::new(FujiGate::new(store)?);
        let trust_log = Arc::new(TrustLog::open(
            config.trust_log_dir(),
            config.trust_log_max_size,
        )?);
        let memory = Arc::new(
            MemoryService::open(
                config.memory_dir(),
                Arc::new(HashEmbedder::default()),
                config.memory_max_records_per_user,
            )?
            .with_redactor(Arc::new(gate.pii_scanner().clone())),
        );
        let drift = Arc::new(DriftTracker::open(config.values_path(), DEFAULT_ALPHA)?);

        Ok(Self {
            config,
            trust_log,
            memory,
            drift,
            gate,
            completer,
            web_search: None,
            manifest: CapabilityManifest::default(),
            events: null_emitter(),
        })
    }

    /// Attach a web-search backend and declare the capability.
    #[must_use]
    pub fn with_web_search(mut self, backend: Arc<dyn WebSearch>) -> Self {
        self.web_search = Some(backend);
        self.manifest.web_search = true;
        self
    }

    /// Attach an event emitter.
    #[must_use]
    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    /// Replace the capability manifest. Startup refusal rules apply:
    /// `self_diagnostic` is cleared unless OS-level sandboxing was
    /// detected around this process.
    #[must_use]
    pub fn with_manifest(mut self, manifest: CapabilityManifest) -> Self {
        self.manifest = manifest.sanitized();
        self
    }
}

/// The fixed-order decision pipeline.
pub struct DecisionPipeline {
    services: Arc<Services>,
    stages: Vec<Box<dyn PipelineStage>>,
}

impl DecisionPipeline {
    /// Build the pipeline over wired services.
    #[must_use]
    pub fn new(services: Arc<Services>) -> Self {
        let stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(normalize::NormalizeStage),
            Box::new(plan::PlanStage::new(services.clone())),
            Box::new(evidence::EvidenceStage::new(services.clone())),
            Box::new(deliberate::CritiqueStage::new(services.clone())),
            Box::new(deliberate::DebateStage::new(services.clone())),
            Box::new(score::ScoreStage::new(services.clone())),
            Box::new(gate::GateStage::new(services.clone())),
            Box::new(finalize::FinalizeStage::new(services.clone())),
        ];
        Self { services, stages }
    }

    /// The services backing this pipeline.
    #[must_use]
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Run one decision for the authenticated `principal`.
    ///
    /// The principal overwrites any `user_id` in the request body – the
    /// body is never trusted for ownership.
    pub async fn decide(&self, principal: &str, mut request: DecideRequest) -> DecideResponse {
        let request_id = request
            .request_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        request.context.user_id = Some(principal.to_string());

        let mut ctx = DecisionCtx::new(request, request_id, principal.to_string());
        let deadline = tokio::time::Instant::now() + self.services.config.decide_deadline;
        let mut fatal: Option<StageError> = None;

        for stage in &self.stages {
            let name = stage.name();
            self.services.events.emit(DecisionEvent::StageStarted {
                request_id: ctx.request_id.clone(),
                stage: name,
            });

            match tokio::time::timeout_at(deadline, stage.run(&mut ctx)).await {
                Err(_elapsed) => {
                    warn!(request_id = %ctx.request_id, stage = name, "deadline expired");
                    fatal = Some(StageError::DeadlineExceeded);
                    break;
                }
                Ok(Ok(())) => {
                    self.services.events.emit(DecisionEvent::StageCompleted {
                        request_id: ctx.request_id.clone(),
                        stage: name,
                    });
                }
                Ok(Err(err)) if err.is_fatal() => {
                    warn!(
                        request_id = %ctx.request_id,
                        stage = name,
                        kind = err.kind(),
                        error = %err,
                        "fatal stage failure"
                    );
                    fatal = Some(err);
                    break;
                }
                Ok(Err(err)) => {
                    warn!(
                        request_id = %ctx.request_id,
                        stage = name,
                        kind = err.kind(),
                        error = %err,
                        "stage degraded"
                    );
                    ctx.degraded.push(StageDegraded {
                        stage: name.to_string(),
                        reason: err.kind().to_string(),
                    });
                    self.services.events.emit(DecisionEvent::StageDegraded {
                        request_id: ctx.request_id.clone(),
                        stage: name,
                        reason: err.kind().to_string(),
                    });
                }
            }
        }

        self.assemble(ctx, fatal)
    }

    /// Turn the accumulated context into the response.
    fn assemble(&self, ctx: DecisionCtx, fatal: Option<StageError>) -> DecideResponse {
        let DecisionCtx {
            request,
            request_id,
            mut coercions,
            plan,
            planner,
            evidence,
            critique,
            debate,
            values,
            drift,
            gate,
            degraded,
            memory_citations,
            memory_used_count,
            persona,
            trust_log,
            ..
        } = ctx;

        let mut resp = DecideResponse::skeleton(request_id);

        if let Some(err) = &fatal {
            resp.ok = false;
            resp.decision_status = match err {
                StageError::DeadlineExceeded => DecisionStatus::Abstain,
                _ => DecisionStatus::Rejected,
            };
            resp.error = Some(if self.services.config.debug_mode {
                err.to_string()
            } else {
                err.kind().to_string()
            });
            resp.rejection_reason = Some(err.kind().to_string());
        } else if let Some(decision) = &gate {
            resp.decision_status = decision.decision_status;
            if decision.is_rejected() {
                resp.rejection_reason = Some(decision.reason.clone());
            }
        }

        // Alternatives are already ranked; chosen is emitted even for
        // rejected decisions, flagged by rejection_reason.
        resp.chosen = request.alternatives.first().cloned();
        resp.alternatives = request.alternatives.clone();
        if coercions.has(kinds::OPTIONS_OVERRIDDEN) {
            coercions.record(
                kinds::RESPONSE_OPTIONS_OVERRIDDEN,
                "options",
                "response options mirror the canonical alternatives",
            );
        }
        resp.options = resp.alternatives.clone();

        if let Some(values) = values {
            resp.telos_score = values.total;
            resp.values = values;
        }
        if let Some(decision) = gate {
            resp.gate = Some(GateOut::from(&decision));
            resp.fuji = Some(decision);
        }
        if let Some(drift) = drift {
            if let Ok(value) = serde_json::to_value(&drift) {
                resp.extras.insert("value_drift".to_string(), value);
            }
        }

        resp.plan = plan;
        resp.planner = planner;
        resp.evidence = evidence;
        resp.critique = critique;
        resp.debate = debate;
        resp.persona = persona;
        resp.memory_citations = memory_citations;
        resp.memory_used_count = memory_used_count;
        resp.trust_log = trust_log;
        resp.stage_degraded = degraded;
        resp.meta.x_coerced_fields = coercions.coerced_fields();
        resp.coercion_events = coercions.into_events();

        info!(
            request_id = %resp.request_id,
            status = %resp.decision_status,
            degraded = resp.stage_degraded.len(),
            "decision assembled"
        );
        resp
    }
}
