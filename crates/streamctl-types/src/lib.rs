//! Core data model for the streamctl IPTV control plane.
//!
//! This crate owns the types every other `streamctl-*` crate shares:
//! session identity, the session record and its FSM, the reason-code
//! taxonomy, and the lease key namespace. Nothing here does I/O.

pub mod context;
pub mod fsm;
pub mod id;
pub mod lease;
pub mod profile;
pub mod reason;
pub mod record;

pub use context::ContextData;
pub use fsm::{transition, Event, PipelineState, SessionState, TransitionOutcome};
pub use id::{CorrelationId, InvalidSessionId, SessionId};
pub use lease::{LeaseKey, LeaseRecord};
pub use profile::{ProfileSpec, RepairStage, StreamInfo};
pub use reason::{classify_reason, Cause, ReasonCode, ReasonError, DEDUP_LEASE_HELD_DETAIL};
pub use record::{Mode, SessionRecord};
