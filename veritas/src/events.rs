//! Decision event stream.
//!
//! A slim flume-backed channel carrying pipeline lifecycle events to
//! whatever the embedding application wires up (SSE fan-out, tests,
//! metrics). Emission never blocks the pipeline: when the buffer is full
//! the event is dropped and counted, not awaited.

use flume::{Receiver, Sender, TrySendError};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Events emitted during pipeline execution and governance changes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionEvent {
    /// A stage began.
    StageStarted {
        /// Request id.
        request_id: String,
        /// Stage name.
        stage: &'static str,
    },
    /// A stage finished normally.
    StageCompleted {
        /// Request id.
        request_id: String,
        /// Stage name.
        stage: &'static str,
    },
    /// A stage failed recoverably and the pipeline continued.
    StageDegraded {
        /// Request id.
        request_id: String,
        /// Stage name.
        stage: &'static str,
        /// Redacted reason.
        reason: String,
    },
    /// A new policy was published.
    PolicyReloaded {
        /// New policy version.
        version: String,
    },
    /// A policy reload was rejected and the previous policy kept running.
    PolicyReloadFailed {
        /// Redacted reason.
        reason: String,
    },
    /// A TrustLog entry was appended.
    TrustAppended {
        /// Request id.
        request_id: String,
        /// Entry hash.
        sha256: String,
    },
    /// A chain break was detected during verification.
    ChainBreak {
        /// File containing the divergence.
        file: String,
        /// 1-based line.
        line: usize,
    },
}

/// Cloneable emitter handle.
#[derive(Clone)]
pub struct EventEmitter {
    tx: Sender<DecisionEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventEmitter {
    /// Emit without blocking; full buffers drop the event.
    pub fn emit(&self, event: DecisionEvent) {
        match self.tx.try_send(event) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Events dropped due to backpressure so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a bounded event stream.
#[must_use]
pub fn channel(capacity: usize) -> (EventEmitter, Receiver<DecisionEvent>) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    (
        EventEmitter {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

/// An emitter with no subscriber; every event is discarded silently.
#[must_use]
pub fn null_emitter() -> EventEmitter {
    let (emitter, rx) = channel(1);
    drop(rx);
    emitter
}
