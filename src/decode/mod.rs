//! # Frame Decoding
//!
//! The bit-level decoding family: byte cursor, variable-byte integers,
//! group codecs, predictor engine and the per-field frame decode loop.
//!
//! Everything here is deterministic plumbing driven by the frame loop in
//! [`crate::log`]; nothing in this module owns parser state.

pub mod event;
pub mod frame;
pub mod predictor;
pub mod stream;
pub mod tags;

// Re-export the types callers meet through the public API
pub use event::LogEvent;
pub use frame::{Encoding, FrameKind};
pub use predictor::Predictor;
pub use stream::ByteCursor;
