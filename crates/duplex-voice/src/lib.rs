//! Core orchestration for a full-duplex voice conversation gateway.
//!
//! The crate wires four concerns together per connection: audio ingest with
//! energy-based speech gating, streaming recognition, sentence-segmented LLM
//! generation, and ordered speech synthesis. Barge-in is first-class: user
//! speech cancels whatever the assistant is saying, at every stage, at any
//! time. Transport is left to the embedding server; this crate speaks
//! through an outbound frame channel.

pub mod config;
pub mod error;
pub mod generation;
pub mod heartbeat;
pub mod history;
pub mod ingest;
pub mod interrupt;
pub mod protocol;
pub mod providers;
pub mod recognition;
pub mod registry;
pub mod session;
pub mod synthesis;

pub use config::GatewayConfig;
pub use error::{VoiceError, VoiceResult};
pub use registry::{Capability, ConnectionRegistry, ProviderRegistry};
pub use session::ConnectionSession;
