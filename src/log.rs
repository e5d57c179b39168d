//! # Flight Log
//!
//! The top level of the decoder: maps an input file, indexes the
//! sub-logs inside it (the flight controller appends a new log every time
//! it arms), and drives the header/data state machine that turns one
//! sub-log into a stream of decoded frames.
//!
//! Frames are delivered synchronously through a [`FrameSink`]; the
//! decoder owns all frame history and never retains references into the
//! input after [`FlightLog::parse`] returns.

use std::fs::File;
use std::ops::Deref;
use std::path::Path;

use memmap2::Mmap;
use tracing::{debug, warn};

use crate::decode::event::{read_event_frame, LogEvent};
use crate::decode::frame::{parse_frame_fields, FrameKind};
use crate::decode::predictor::PredictorContext;
use crate::decode::stream::ByteCursor;
use crate::error::{BblDecoderError, Result};
use crate::header::{parse_header_line, LogHeader, MAX_FIELDS};
use crate::stats::{FieldStats, LogStats, MAX_FRAME_LENGTH};

/// Literal line that starts every sub-log
pub const LOG_START_MARKER: &[u8] =
    b"H Product:Blackbox flight data recorder by Nicholas Sherlock\n";

/// Upper bound on sub-logs indexed within one file
pub const MAX_LOGS_IN_FILE: usize = 128;

/// Main-frame field index of the loop iteration counter
const FIELD_INDEX_ITERATION: usize = 0;
/// Main-frame field index of the loop time
const FIELD_INDEX_TIME: usize = 1;

/// One frame attempt as reported to a [`FrameSink`]
#[derive(Debug)]
pub struct FrameView<'a> {
    pub kind: FrameKind,
    /// Whether the stream was synchronised and monotonic when this frame
    /// completed; GPS frames report whether a home position was known
    pub stream_valid: bool,
    /// Decoded field values; `None` exactly for corrupt frames
    pub values: Option<&'a [i32]>,
    pub field_count: usize,
    /// Byte offset of the frame body from the start of the whole file
    pub file_offset: usize,
    /// Frame length in bytes, including the marker
    pub size: usize,
}

/// Receiver for decode results
///
/// All methods default to doing nothing, so implementations only pick up
/// the callbacks they care about. Callbacks run synchronously on the
/// caller's thread, in stream order, and must not re-enter the decoder.
pub trait FrameSink {
    /// Fired once per parse, after the header section and before the
    /// first data frame
    fn on_metadata_ready(&mut self, _header: &LogHeader) {}

    /// Fired once per frame attempt, valid or corrupt
    fn on_frame(&mut self, _frame: FrameView<'_>, _header: &LogHeader) {}

    /// Fired once per event frame
    fn on_event(&mut self, _event: &LogEvent, _header: &LogHeader) {}
}

/// Sink that discards everything; parse for the statistics alone
impl FrameSink for () {}

enum LogData {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for LogData {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            LogData::Mapped(mapping) => mapping,
            LogData::Owned(data) => data,
        }
    }
}

/// A mapped blackbox log file and its sub-log index
pub struct FlightLog {
    data: LogData,
    /// Start offset of each sub-log found in the file
    log_begin: Vec<usize>,
    header: LogHeader,
    stats: LogStats,
}

impl FlightLog {
    /// Map a log file from a path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(&File::open(path)?)
    }

    /// Map an already-open log file
    pub fn new(file: &File) -> Result<Self> {
        let mapping = unsafe { Mmap::map(file)? };
        Self::from_data(LogData::Mapped(mapping))
    }

    /// Decode from an in-memory buffer instead of a mapping
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_data(LogData::Owned(data))
    }

    fn from_data(data: LogData) -> Result<Self> {
        if data.is_empty() {
            return Err(BblDecoderError::EmptyLog);
        }

        let log_begin = scan_log_offsets(&data);
        debug!(
            "indexed {} sub-log(s) in {} bytes",
            log_begin.len(),
            data.len()
        );

        Ok(Self {
            data,
            log_begin,
            header: LogHeader::new(),
            stats: LogStats::default(),
        })
    }

    /// Number of sub-logs found in the file
    pub fn log_count(&self) -> usize {
        self.log_begin.len()
    }

    /// Header metadata from the most recent parse
    pub fn header(&self) -> &LogHeader {
        &self.header
    }

    /// Statistics from the most recent parse
    pub fn stats(&self) -> &LogStats {
        &self.stats
    }

    /// Decode one sub-log end-to-end, reporting frames to `sink`
    ///
    /// `raw` disables predictor application, so every field reports the
    /// residual exactly as it travelled on the stream.
    ///
    /// Header metadata and statistics reset on entry and remain readable
    /// afterwards; the mapping and sub-log index are reusable across
    /// calls.
    ///
    /// # Errors
    ///
    /// Fails for an out-of-range `log_index`, a sub-log with no data
    /// frames, missing main field definitions, and the fatal decode
    /// conditions (unknown predictor/encoding codes, predictors against
    /// undeclared fields). Corruption inside the data section is not an
    /// error: affected frames are reported through the sink and the
    /// decoder resynchronises.
    pub fn parse<S: FrameSink>(&mut self, log_index: usize, sink: &mut S, raw: bool) -> Result<()> {
        let count = self.log_begin.len();
        if log_index >= count {
            return Err(BblDecoderError::InvalidLogIndex {
                index: log_index,
                count,
            });
        }

        let start = self.log_begin[log_index];
        let end = self
            .log_begin
            .get(log_index + 1)
            .copied()
            .unwrap_or(self.data.len());

        self.header = LogHeader::new();
        self.stats = LogStats::default();

        let mut decoder = LogDecoder {
            cursor: ByteCursor::new(&self.data, start, end),
            header: &mut self.header,
            stats: &mut self.stats,
            history: MainHistory::new(),
            gps_home_current: [0; MAX_FIELDS],
            gps_home: [0; MAX_FIELDS],
            last_gps: [0; MAX_FIELDS],
            last_event: LogEvent::Invalid,
            main_stream_is_valid: false,
            gps_home_is_valid: false,
            raw,
        };
        decoder.run(sink)?;

        self.stats.total_bytes = (end - start) as u64;

        Ok(())
    }
}

/// Find the start offsets of every sub-log in the file
fn scan_log_offsets(data: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut search_from = 0;

    while offsets.len() < MAX_LOGS_IN_FILE {
        let remaining = &data[search_from..];
        let Some(found) = remaining
            .windows(LOG_START_MARKER.len())
            .position(|window| window == LOG_START_MARKER)
        else {
            break;
        };

        offsets.push(search_from + found);
        search_from += found + LOG_START_MARKER.len();
    }

    offsets
}

/// Rotating main-frame history: the decode target plus up to two
/// reference frames
///
/// Slots are owned arrays rather than indices into a shared ring; an
/// intra frame publishes itself as both references by copying, which
/// keeps the aliasing story trivial.
struct MainHistory {
    current: [i32; MAX_FIELDS],
    previous: [i32; MAX_FIELDS],
    previous2: [i32; MAX_FIELDS],
    /// False until an intra frame is accepted (and again after one is
    /// rejected); the reference slots are meaningless while false
    has_reference: bool,
}

impl MainHistory {
    fn new() -> Self {
        Self {
            current: [0; MAX_FIELDS],
            previous: [0; MAX_FIELDS],
            previous2: [0; MAX_FIELDS],
            has_reference: false,
        }
    }

    /// An accepted intra frame becomes both references; nothing older
    /// than the new keyframe may be looked at again
    fn rotate_intra(&mut self) {
        self.previous = self.current;
        self.previous2 = self.current;
        self.has_reference = true;
    }

    fn rotate_inter(&mut self) {
        self.previous2 = self.previous;
        self.previous = self.current;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Header,
    Data,
}

/// Per-parse decoder state over one sub-log
struct LogDecoder<'a> {
    cursor: ByteCursor<'a>,
    header: &'a mut LogHeader,
    stats: &'a mut LogStats,
    history: MainHistory,
    /// GPS home slot 0: decode target
    gps_home_current: [i32; MAX_FIELDS],
    /// GPS home slot 1: published position the predictors reference
    gps_home: [i32; MAX_FIELDS],
    last_gps: [i32; MAX_FIELDS],
    last_event: LogEvent,
    main_stream_is_valid: bool,
    gps_home_is_valid: bool,
    raw: bool,
}

impl<'a> LogDecoder<'a> {
    fn run<S: FrameSink>(&mut self, sink: &mut S) -> Result<()> {
        let mut state = ParserState::Header;
        let mut premature_eof = false;
        let mut frame_start = self.cursor.offset();
        let mut last_frame: Option<FrameKind> = None;

        loop {
            let command = self.cursor.read();

            match state {
                ParserState::Header => match command {
                    Some(b'H') => parse_header_line(&mut self.cursor, self.header),
                    None => return Err(BblDecoderError::NoFrames),
                    Some(byte) => {
                        if FrameKind::from_marker(byte).is_some() {
                            self.cursor.unread();

                            if self.header.main_field_names.is_empty() {
                                return Err(BblDecoderError::MissingFieldDefinitions);
                            }

                            self.header.fix_up_home_coord_pairs();
                            self.stats.field =
                                vec![FieldStats::default(); self.header.main_field_names.len()];

                            debug!(
                                "header complete ({} main fields), entering data section",
                                self.header.main_field_names.len()
                            );

                            state = ParserState::Data;
                            last_frame = None;
                            frame_start = self.cursor.offset();

                            sink.on_metadata_ready(self.header);
                        }
                        // Anything else is garbage ahead of the first
                        // frame; skip it
                    }
                },
                ParserState::Data => {
                    if let Some(last) = last_frame {
                        // The previous frame ends where the byte just
                        // read begins
                        let frame_size = self.cursor.offset() - frame_start;
                        let next_kind = command.and_then(FrameKind::from_marker);
                        let frame_completed =
                            next_kind.is_some() || (command.is_none() && !premature_eof);

                        if frame_size <= MAX_FRAME_LENGTH && frame_completed {
                            let frame_stats = self.stats.frame_mut(last);
                            frame_stats.bytes += frame_size as u64;
                            frame_stats.size_count[frame_size] += 1;
                            frame_stats.valid_count += 1;

                            self.complete_frame(last, frame_start, frame_size, sink);
                        } else {
                            self.main_stream_is_valid = false;
                            self.stats.frame_mut(last).corrupt_count += 1;
                            self.stats.total_corrupt_frames += 1;

                            warn!(
                                "corrupt {} frame at offset {} ({} bytes), resynchronising",
                                last.marker() as char,
                                frame_start,
                                frame_size
                            );

                            sink.on_frame(
                                FrameView {
                                    kind: last,
                                    stream_valid: false,
                                    values: None,
                                    field_count: 0,
                                    file_offset: frame_start,
                                    size: frame_size,
                                },
                                self.header,
                            );

                            // Resume the marker search just past the
                            // first byte of the corrupt frame, so a
                            // truncated frame's successor is still found
                            self.cursor.rewind_to(frame_start);
                            last_frame = None;
                            premature_eof = false;
                            continue;
                        }
                    }

                    let Some(byte) = command else {
                        break;
                    };

                    let kind = FrameKind::from_marker(byte);
                    frame_start = self.cursor.offset();

                    match kind {
                        Some(kind) if self.frame_decodable(kind) => {
                            self.parse_frame_body(kind)?;

                            if self.cursor.eof() {
                                premature_eof = true;
                            }

                            last_frame = Some(kind);
                        }
                        _ => {
                            // Unknown marker, or a frame type the header
                            // never defined; scan onwards for the next
                            // marker
                            self.main_stream_is_valid = false;
                            last_frame = None;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Frame types whose field tables were never declared can't be
    /// decoded; the main types are guaranteed at the header transition
    fn frame_decodable(&self, kind: FrameKind) -> bool {
        match kind {
            FrameKind::Gps => !self.header.gps_field_names.is_empty(),
            FrameKind::GpsHome => !self.header.gps_home_field_names.is_empty(),
            _ => true,
        }
    }

    /// Decode the frame body following a recognised marker
    fn parse_frame_body(&mut self, kind: FrameKind) -> Result<()> {
        if kind == FrameKind::Event {
            self.last_event = read_event_frame(&mut self.cursor);
            return Ok(());
        }

        let skipped_frames = match kind {
            FrameKind::Intra | FrameKind::Inter => {
                let skipped = self.count_skipped_frames();
                self.stats.intentionally_absent_iterations += skipped;
                skipped
            }
            _ => 0,
        };

        let LogDecoder {
            cursor,
            header,
            history,
            gps_home_current,
            gps_home,
            last_gps,
            raw,
            ..
        } = self;

        let ctx = PredictorContext {
            sysconfig: &header.sysconfig,
            main_signed: &header.main_field_signed,
            motor0_index: header.motor0_index,
            home0_index: header.home0_index,
            home1_index: header.home1_index,
            gps_home: &gps_home[..],
        };

        let (def, target, previous, previous2, field_count): (
            _,
            &mut [i32],
            Option<&[i32]>,
            Option<&[i32]>,
            usize,
        ) = match kind {
            FrameKind::Intra => (
                header.frame_def(b'I'),
                &mut history.current,
                history.has_reference.then_some(&history.previous[..]),
                None,
                header.main_field_names.len(),
            ),
            FrameKind::Inter => (
                header.frame_def(b'P'),
                &mut history.current,
                history.has_reference.then_some(&history.previous[..]),
                history.has_reference.then_some(&history.previous2[..]),
                header.main_field_names.len(),
            ),
            FrameKind::Gps => (
                header.frame_def(b'G'),
                &mut last_gps[..],
                None,
                None,
                header.gps_field_names.len(),
            ),
            FrameKind::GpsHome => (
                header.frame_def(b'H'),
                &mut gps_home_current[..],
                None,
                None,
                header.gps_home_field_names.len(),
            ),
            FrameKind::Event => unreachable!(),
        };

        parse_frame_fields(
            cursor,
            def,
            &ctx,
            target,
            previous,
            previous2,
            field_count,
            skipped_frames,
            *raw,
        )
    }

    /// How many loop iterations the logging rate dropped between the
    /// previous main frame and this one
    fn count_skipped_frames(&self) -> u32 {
        if !self.history.has_reference {
            return 0;
        }

        let mut skipped = 0;
        let mut index = (self.history.previous[FIELD_INDEX_ITERATION] as u32).wrapping_add(1);

        while !self.header.sysconfig.should_have_frame(index) {
            skipped += 1;
            index = index.wrapping_add(1);
        }

        skipped
    }

    fn complete_frame<S: FrameSink>(
        &mut self,
        kind: FrameKind,
        frame_start: usize,
        frame_size: usize,
        sink: &mut S,
    ) {
        match kind {
            FrameKind::Intra => self.complete_intra(frame_start, frame_size, sink),
            FrameKind::Inter => self.complete_inter(frame_start, frame_size, sink),
            FrameKind::Gps => self.complete_gps(frame_start, frame_size, sink),
            FrameKind::GpsHome => self.complete_gps_home(frame_start, frame_size, sink),
            FrameKind::Event => sink.on_event(&self.last_event, self.header),
        }
    }

    fn complete_intra<S: FrameSink>(&mut self, frame_start: usize, frame_size: usize, sink: &mut S) {
        // Only accept the keyframe if iteration and time move forward;
        // otherwise this is stale data from a corrupted region
        let iteration = self.history.current[FIELD_INDEX_ITERATION] as u32 as i64;
        let time = self.history.current[FIELD_INDEX_TIME] as u32 as i64;

        let accepted = self.raw
            || (iteration >= self.stats.field_max(FIELD_INDEX_ITERATION)
                && time >= self.stats.field_max(FIELD_INDEX_TIME));

        if accepted {
            self.main_stream_is_valid = true;
            self.update_main_field_stats();
        } else {
            warn!(
                "intra frame at offset {} went backwards, invalidating stream",
                frame_start
            );
            self.main_stream_is_valid = false;
            self.history.has_reference = false;
        }

        let field_count = self.header.main_field_names.len().min(MAX_FIELDS);
        sink.on_frame(
            FrameView {
                kind: FrameKind::Intra,
                stream_valid: self.main_stream_is_valid,
                values: Some(&self.history.current[..field_count]),
                field_count,
                file_offset: frame_start,
                size: frame_size,
            },
            self.header,
        );

        if self.main_stream_is_valid {
            self.history.rotate_intra();
        }
    }

    fn complete_inter<S: FrameSink>(&mut self, frame_start: usize, frame_size: usize, sink: &mut S) {
        if self.main_stream_is_valid {
            self.update_main_field_stats();
        } else {
            // An inter frame can't resynchronise the stream; it is
            // reported but its values are built on lost references
            self.stats.frame_mut(FrameKind::Inter).desync_count += 1;
        }

        let field_count = self.header.main_field_names.len().min(MAX_FIELDS);
        sink.on_frame(
            FrameView {
                kind: FrameKind::Inter,
                stream_valid: self.main_stream_is_valid,
                values: Some(&self.history.current[..field_count]),
                field_count,
                file_offset: frame_start,
                size: frame_size,
            },
            self.header,
        );

        if self.main_stream_is_valid {
            self.history.rotate_inter();
        }
    }

    fn complete_gps<S: FrameSink>(&mut self, frame_start: usize, frame_size: usize, sink: &mut S) {
        let field_count = self.header.gps_field_names.len().min(MAX_FIELDS);
        sink.on_frame(
            FrameView {
                kind: FrameKind::Gps,
                stream_valid: self.gps_home_is_valid,
                values: Some(&self.last_gps[..field_count]),
                field_count,
                file_offset: frame_start,
                size: frame_size,
            },
            self.header,
        );
    }

    fn complete_gps_home<S: FrameSink>(
        &mut self,
        frame_start: usize,
        frame_size: usize,
        sink: &mut S,
    ) {
        // Publish the decoded position for the home-coordinate predictors
        self.gps_home = self.gps_home_current;
        self.gps_home_is_valid = true;

        let field_count = self.header.gps_home_field_names.len().min(MAX_FIELDS);
        sink.on_frame(
            FrameView {
                kind: FrameKind::GpsHome,
                stream_valid: true,
                values: Some(&self.gps_home[..field_count]),
                field_count,
                file_offset: frame_start,
                size: frame_size,
            },
            self.header,
        );
    }

    fn update_main_field_stats(&mut self) {
        let field_count = self.header.main_field_names.len().min(MAX_FIELDS);
        self.stats.update_field_stats(
            &self.history.current[..field_count],
            &self.header.main_field_signed,
        );
    }
}
