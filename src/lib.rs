//! # BBL Decoder
//!
//! Decoder core for Cleanflight/Baseflight blackbox flight data recorder
//! logs.
//!
//! A flight controller writes a compact binary stream while the craft is
//! armed: a textual header declaring field names, per-field predictors
//! and encodings, followed by delta-coded binary frames. This crate
//! parses one such stream and hands fully-decoded, validated frames to
//! the caller through the [`FrameSink`] trait:
//!
//! - `I` intra frames are self-contained keyframes
//! - `P` inter frames are deltas against up to two prior main frames
//! - `G`/`H` frames carry GPS positions against a home reference
//! - `E` frames carry firmware events
//!
//! Logs are frequently truncated or corrupted mid-flight; the decoder
//! detects bad frames, reports them, and resynchronises on the next
//! marker without reading past the end of the log.

pub mod decode;
pub mod error;
pub mod header;
pub mod log;
pub mod stats;

// Re-export commonly used types
pub use decode::event::LogEvent;
pub use decode::frame::{Encoding, FrameKind};
pub use decode::predictor::Predictor;
pub use error::{BblDecoderError, Result};
pub use header::{FirmwareType, FrameDef, LogHeader, SysConfig, MAX_FIELDS};
pub use log::{FlightLog, FrameSink, FrameView, LOG_START_MARKER, MAX_LOGS_IN_FILE};
pub use stats::{FieldStats, FrameTypeStats, LogStats, MAX_FRAME_LENGTH};
