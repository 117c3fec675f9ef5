//! Stream event protocol: type + payload + envelope.
//!
//! This crate defines the wire shape of a single stream event and envelope injection. It has no
//! dependency on the control-plane crate; callers bridge their own state into `ProtocolEvent`
//! and call `to_json`.

pub mod envelope;
pub mod event;

pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::ProtocolEvent;
