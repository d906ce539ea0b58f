//! dBFT consensus replica.
//!
//! Split into a pure, synchronously-testable state machine
//! ([`context::Context`]) and a tokio task ([`service::Service`]) owning
//! channels, timers and the validator key. The context consumes signed
//! [`message::ConsensusPayload`]s and emits [`context::Action`]s; the
//! service wires those to the network and the blockchain engine.

pub mod context;
pub mod message;
pub mod service;
