//! # Event Frames
//!
//! `E` frames carry out-of-band firmware events rather than field tables.
//! Each event is self-describing: a one-byte id followed by an
//! id-specific payload. Unknown ids are soft errors; the record is marked
//! invalid and the stream carries on.

use super::stream::ByteCursor;

const EVENT_SYNC_BEEP: u8 = 0;
const EVENT_AUTOTUNE_CYCLE_START: u8 = 10;
const EVENT_AUTOTUNE_CYCLE_RESULT: u8 = 11;

/// One decoded event record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEvent {
    /// The flight controller beeped for log/video synchronisation
    SyncBeep {
        /// Beep time in microseconds
        time: u32,
    },
    /// An autotune cycle began
    AutotuneCycleStart {
        phase: u8,
        cycle: u8,
        p: u8,
        i: u8,
        d: u8,
    },
    /// An autotune cycle finished
    AutotuneCycleResult { overshot: u8, p: u8, i: u8, d: u8 },
    /// Unrecognised event id
    Invalid,
}

/// Decode the event frame at the cursor
pub fn read_event_frame(cursor: &mut ByteCursor<'_>) -> LogEvent {
    match cursor.read_byte() {
        EVENT_SYNC_BEEP => LogEvent::SyncBeep {
            time: cursor.read_unsigned_vb(),
        },
        EVENT_AUTOTUNE_CYCLE_START => LogEvent::AutotuneCycleStart {
            phase: cursor.read_byte(),
            cycle: cursor.read_byte(),
            p: cursor.read_byte(),
            i: cursor.read_byte(),
            d: cursor.read_byte(),
        },
        EVENT_AUTOTUNE_CYCLE_RESULT => LogEvent::AutotuneCycleResult {
            overshot: cursor.read_byte(),
            p: cursor.read_byte(),
            i: cursor.read_byte(),
            d: cursor.read_byte(),
        },
        _ => LogEvent::Invalid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_beep() {
        let data = [0x00, 0xE8, 0x07];
        let mut cursor = ByteCursor::new(&data, 0, data.len());

        assert_eq!(
            read_event_frame(&mut cursor),
            LogEvent::SyncBeep { time: 1000 }
        );
    }

    #[test]
    fn test_autotune_cycle_start() {
        let data = [10, 1, 2, 40, 30, 23];
        let mut cursor = ByteCursor::new(&data, 0, data.len());

        assert_eq!(
            read_event_frame(&mut cursor),
            LogEvent::AutotuneCycleStart {
                phase: 1,
                cycle: 2,
                p: 40,
                i: 30,
                d: 23,
            }
        );
    }

    #[test]
    fn test_autotune_cycle_result() {
        let data = [11, 1, 42, 31, 24];
        let mut cursor = ByteCursor::new(&data, 0, data.len());

        assert_eq!(
            read_event_frame(&mut cursor),
            LogEvent::AutotuneCycleResult {
                overshot: 1,
                p: 42,
                i: 31,
                d: 24,
            }
        );
    }

    #[test]
    fn test_unknown_id_is_invalid() {
        let data = [0x7F, 0x01, 0x02];
        let mut cursor = ByteCursor::new(&data, 0, data.len());

        assert_eq!(read_event_frame(&mut cursor), LogEvent::Invalid);
        // Only the id byte is consumed
        assert_eq!(cursor.offset(), 1);
    }
}
