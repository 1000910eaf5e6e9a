//! Request/response schema and the coercion layer.
//!
//! Deserialization is tolerant: unknown keys are preserved and every
//! silent normalization is recorded as a [`CoercionEvent`] so callers can
//! audit exactly what the engine changed about their input.

pub mod coercion;
pub mod request;
pub mod response;

pub use coercion::{CoercionEvent, CoercionLog};
pub use request::{AltItem, DecideRequest, InvalidInput, RequestContext, TimeHorizon};
pub use response::{
    DecideResponse, EvidenceItem, GateOut, ResponseMeta, StageDegraded, TrustLogField, TrustLogRef,
};
