//! # Decode Statistics
//!
//! Live counters maintained while a sub-log is parsed: per-frame-type
//! byte and validity totals, a frame-size histogram, per-field ranges and
//! the global corruption counts.

use crate::decode::frame::FrameKind;

/// Hard cap on the byte length of a single frame; anything longer is
/// treated as corruption
pub const MAX_FRAME_LENGTH: usize = 256;

/// Counters for one frame type
#[derive(Debug, Clone)]
pub struct FrameTypeStats {
    /// Total bytes across valid frames
    pub bytes: u64,
    pub valid_count: u32,
    pub corrupt_count: u32,
    /// Inter frames received while the stream was desynchronised
    pub desync_count: u32,
    /// Histogram of valid frame sizes
    pub size_count: [u32; MAX_FRAME_LENGTH + 1],
}

impl Default for FrameTypeStats {
    fn default() -> Self {
        Self {
            bytes: 0,
            valid_count: 0,
            corrupt_count: 0,
            desync_count: 0,
            size_count: [0; MAX_FRAME_LENGTH + 1],
        }
    }
}

/// Observed range of one main-frame field
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldStats {
    pub min: i64,
    pub max: i64,
}

/// All statistics for one parse of a sub-log
#[derive(Debug, Clone, Default)]
pub struct LogStats {
    /// Size of the sub-log's data section
    pub total_bytes: u64,
    pub total_corrupt_frames: u32,
    /// Loop iterations skipped on purpose by the logging rate
    pub intentionally_absent_iterations: u32,
    /// Per-main-frame-field ranges, signedness-aware
    pub field: Vec<FieldStats>,
    frame: [FrameTypeStats; FrameKind::COUNT],
}

impl LogStats {
    /// Counters for one frame type
    pub fn frame(&self, kind: FrameKind) -> &FrameTypeStats {
        &self.frame[kind.index()]
    }

    pub(crate) fn frame_mut(&mut self, kind: FrameKind) -> &mut FrameTypeStats {
        &mut self.frame[kind.index()]
    }

    /// Running maximum for a field, 0 before the first accepted frame
    pub(crate) fn field_max(&self, index: usize) -> i64 {
        self.field.get(index).map_or(0, |field| field.max)
    }

    /// Fold a completed main frame into the per-field ranges
    ///
    /// The very first accepted frame initialises the ranges instead of
    /// comparing against the zeroed defaults. Unsigned fields compare as
    /// their 32-bit unsigned reinterpretation.
    pub(crate) fn update_field_stats(&mut self, values: &[i32], signed: &[bool]) {
        let first_frame = self.frame(FrameKind::Intra).valid_count
            + self.frame(FrameKind::Inter).valid_count
            <= 1;

        for (index, &value) in values.iter().enumerate() {
            let Some(entry) = self.field.get_mut(index) else {
                break;
            };

            let widened = if signed.get(index).copied().unwrap_or(false) {
                value as i64
            } else {
                value as u32 as i64
            };

            if first_frame {
                entry.min = widened;
                entry.max = widened;
            } else {
                entry.min = entry.min.min(widened);
                entry.max = entry.max.max(widened);
            }
        }
    }
}
