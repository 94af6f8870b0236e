//! External collaborator seams: `Tuner`, `Transcoder`,
//! `EventBus`, `Fs`. Each is a small capability trait with no hidden mutable
//! state; a mock implementation backs the S1-S6 scenario tests, and a
//! process/filesystem-backed implementation stands in for production.

mod bus;
mod error;
mod fs;
mod tuner;
mod transcoder;

pub use bus::{BusPublisher, EventBus, InMemoryEventBus, StartSessionEvent, StopSessionEvent, Subscription};
pub use error::AdapterError;
pub use fs::{DirEntryInfo, Fs, MockFs, RealFs};
pub use tuner::{MockTuner, MockTunerFactory, Tuner, TunerFactory};
pub use transcoder::{
    contains_corruption_signature, ExitInfo, MockBehavior, MockTranscoder, MockTranscoderFactory,
    Transcoder, TranscoderFactory, CORRUPTION_SIGNATURES,
};

#[cfg(feature = "process-adapters")]
pub use transcoder::process::{ProcessTranscoder, ProcessTranscoderFactory};
