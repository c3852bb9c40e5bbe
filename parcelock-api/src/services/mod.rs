//! Leaf components invoked by the HTTP handlers
//!
//! Each handler calls exactly one of these.

pub mod actuator;
pub mod content_verifier;
pub mod key_generator;
pub mod tag_transceiver;

pub use actuator::ActuatorController;
pub use content_verifier::{ContentVerifier, VerificationResult};
pub use key_generator::generate_key;
pub use tag_transceiver::TagTransceiver;
