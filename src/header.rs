//! # Log Header
//!
//! The textual header section of a sub-log: `H <key>:<value>` lines
//! declaring field names, per-field predictors and encodings, and the
//! firmware tuning constants the predictors reference.
//!
//! Malformed lines (no colon, NUL bytes, overlong, truncated by EOF) are
//! silently dropped, and unknown keys are ignored; real logs carry many
//! keys this decoder has no use for.

use tracing::trace;

use crate::decode::predictor::Predictor;
use crate::decode::stream::ByteCursor;

/// Upper bound on fields within a single frame type
pub const MAX_FIELDS: usize = 128;

/// Longest header line we accept
const HEADER_LINE_LIMIT: usize = 1024;

/// Per-frame-type decode tables, indexed in field order
#[derive(Debug, Clone)]
pub struct FrameDef {
    /// Predictor wire codes (u16 so the synthetic [`Predictor::HomeCoord1`]
    /// code fits after the pair fix-up)
    pub predictor: [u16; MAX_FIELDS],
    /// Encoding wire codes
    pub encoding: [u8; MAX_FIELDS],
}

impl FrameDef {
    pub fn new() -> Self {
        Self {
            predictor: [0; MAX_FIELDS],
            encoding: [0; MAX_FIELDS],
        }
    }
}

impl Default for FrameDef {
    fn default() -> Self {
        Self::new()
    }
}

/// Which firmware family wrote the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirmwareType {
    #[default]
    Baseflight,
    Cleanflight,
}

/// Tuning constants carried on the log header
///
/// Defaults are the MultiWii-era values the firmware assumes when a key
/// is absent.
#[derive(Debug, Clone)]
pub struct SysConfig {
    pub minthrottle: i32,
    pub maxthrottle: i32,
    pub rc_rate: i32,
    pub vbatscale: i32,
    pub vbatref: i32,
    pub vbatmincellvoltage: i32,
    pub vbatwarningcellvoltage: i32,
    pub vbatmaxcellvoltage: i32,
    /// Gyro output scale, radians per microsecond
    pub gyro_scale: f32,
    pub acc_1g: i32,
    /// Interval between intra frames, in loop iterations
    pub frame_interval_i: i32,
    pub frame_interval_p_num: i32,
    pub frame_interval_p_denom: i32,
    pub data_version: i32,
    pub firmware_type: FirmwareType,
}

impl Default for SysConfig {
    fn default() -> Self {
        Self {
            minthrottle: 1150,
            maxthrottle: 1850,
            rc_rate: 0,
            vbatscale: 110,
            vbatref: 4095,
            vbatmincellvoltage: 33,
            vbatwarningcellvoltage: 35,
            vbatmaxcellvoltage: 43,
            gyro_scale: 0.0,
            acc_1g: 0,
            frame_interval_i: 32,
            frame_interval_p_num: 1,
            frame_interval_p_denom: 1,
            data_version: 0,
            firmware_type: FirmwareType::Baseflight,
        }
    }
}

impl SysConfig {
    /// Convert a raw vbat ADC reading to millivolts
    ///
    /// The ADC is 12 bit against a 3.3V reference; `vbatscale` arrives
    /// premultiplied by 100.
    pub fn vbat_to_millivolts(&self, vbat: u16) -> u32 {
        (vbat as u32 * 330 * self.vbatscale as u32) / 0xFFF
    }

    /// Estimate the battery cell count from the reference voltage
    pub fn estimate_num_cells(&self) -> i32 {
        let ref_voltage = (self.vbat_to_millivolts(self.vbatref as u16) / 100) as i32;

        for cells in 1..8 {
            if ref_voltage < cells * self.vbatmaxcellvoltage {
                return cells;
            }
        }

        8
    }

    /// Should a main frame with this loop iteration exist in the log,
    /// given the logging rate the user selected?
    pub fn should_have_frame(&self, frame_index: u32) -> bool {
        let index = frame_index as i64;
        let num = self.frame_interval_p_num as i64;
        let denom = self.frame_interval_p_denom as i64;

        (index % self.frame_interval_i as i64 + num - 1) % denom < num
    }
}

/// Everything learned from the header section
#[derive(Debug, Clone)]
pub struct LogHeader {
    pub main_field_names: Vec<String>,
    /// Per-field signedness for main frames, from `Field I signed`
    pub main_field_signed: Vec<bool>,
    pub gps_field_names: Vec<String>,
    pub gps_home_field_names: Vec<String>,
    pub sysconfig: SysConfig,

    /// Sparse decode-table store indexed by the frame marker byte
    frame_defs: Vec<FrameDef>,

    pub(crate) motor0_index: Option<usize>,
    pub(crate) home0_index: Option<usize>,
    pub(crate) home1_index: Option<usize>,
}

impl LogHeader {
    pub(crate) fn new() -> Self {
        Self {
            main_field_names: Vec::new(),
            main_field_signed: Vec::new(),
            gps_field_names: Vec::new(),
            gps_home_field_names: Vec::new(),
            sysconfig: SysConfig::default(),
            frame_defs: vec![FrameDef::new(); 256],
            motor0_index: None,
            home0_index: None,
            home1_index: None,
        }
    }

    /// Decode tables declared for the frame marker byte
    pub fn frame_def(&self, marker: u8) -> &FrameDef {
        &self.frame_defs[marker as usize]
    }

    fn frame_def_mut(&mut self, marker: u8) -> &mut FrameDef {
        &mut self.frame_defs[marker as usize]
    }

    /// Rewrite the second half of each adjacent home-coordinate predictor
    /// pair so latitude and longitude resolve against their own home
    /// field
    ///
    /// The header writes the same predictor code for both halves; runs on
    /// the HEADER to DATA transition.
    pub(crate) fn fix_up_home_coord_pairs(&mut self) {
        let count = self.gps_field_names.len().min(MAX_FIELDS);
        let def = &mut self.frame_defs[b'G' as usize];

        for i in 1..count {
            if def.predictor[i - 1] == Predictor::HomeCoord as u16
                && def.predictor[i] == Predictor::HomeCoord as u16
            {
                def.predictor[i] = Predictor::HomeCoord1 as u16;
            }
        }
    }
}

/// Parse one header line; the leading `H` has already been consumed
///
/// Expects a space, then `key:value` terminated by a newline. Bad lines
/// are dropped without advancing parser state; whatever bytes they leave
/// behind are skipped as garbage by the frame loop.
pub(crate) fn parse_header_line(cursor: &mut ByteCursor<'_>, header: &mut LogHeader) {
    if cursor.peek() != Some(b' ') {
        return;
    }
    cursor.read();

    let mut line: Vec<u8> = Vec::with_capacity(64);
    let mut colon: Option<usize> = None;
    let mut terminated = false;

    for _ in 0..HEADER_LINE_LIMIT {
        let Some(byte) = cursor.read() else {
            return;
        };

        if byte == b':' && colon.is_none() {
            colon = Some(line.len());
        }

        if byte == b'\n' {
            terminated = true;
            break;
        }

        if byte == 0 {
            // Binary garbage where a header line should be
            return;
        }

        line.push(byte);
    }

    let Some(colon) = colon else {
        return;
    };
    if !terminated {
        return;
    }

    let (Ok(name), Ok(value)) = (
        std::str::from_utf8(&line[..colon]),
        std::str::from_utf8(&line[colon + 1..]),
    ) else {
        return;
    };

    apply_header_line(header, name, value);
}

fn apply_header_line(header: &mut LogHeader, name: &str, value: &str) {
    match name {
        "Field I name" => {
            header.main_field_names = parse_field_names(value);
            // Indexes feed fixed MAX_FIELDS-sized history buffers
            header.motor0_index = header
                .main_field_names
                .iter()
                .position(|name| name == "motor[0]")
                .filter(|&index| index < MAX_FIELDS);
        }
        "Field P name" => {
            // Inter frames reuse the I field names
        }
        "Field G name" => {
            header.gps_field_names = parse_field_names(value);
        }
        "Field H name" => {
            header.gps_home_field_names = parse_field_names(value);
            header.home0_index = header
                .gps_home_field_names
                .iter()
                .position(|name| name == "GPS_home[0]")
                .filter(|&index| index < MAX_FIELDS);
            header.home1_index = header
                .gps_home_field_names
                .iter()
                .position(|name| name == "GPS_home[1]")
                .filter(|&index| index < MAX_FIELDS);
        }
        "Field I signed" => {
            header.main_field_signed = parse_int_list(value)
                .take(MAX_FIELDS)
                .map(|flag| flag != 0)
                .collect();
        }
        "I interval" => {
            header.sysconfig.frame_interval_i = parse_int(value).max(1);
        }
        "P interval" => {
            if let Some((num, denom)) = value.split_once('/') {
                // Zero would wedge the skipped-frame scan
                header.sysconfig.frame_interval_p_num = parse_int(num).max(1);
                header.sysconfig.frame_interval_p_denom = parse_int(denom).max(1);
            }
        }
        "Data version" => header.sysconfig.data_version = parse_int(value),
        "Firmware type" => {
            header.sysconfig.firmware_type = if value == "Cleanflight" {
                FirmwareType::Cleanflight
            } else {
                FirmwareType::Baseflight
            };
        }
        "minthrottle" => header.sysconfig.minthrottle = parse_int(value),
        "maxthrottle" => header.sysconfig.maxthrottle = parse_int(value),
        "rcRate" => header.sysconfig.rc_rate = parse_int(value),
        "vbatscale" => header.sysconfig.vbatscale = parse_int(value),
        "vbatref" => header.sysconfig.vbatref = parse_int(value),
        "vbatcellvoltage" => {
            let mut cells = parse_int_list(value);
            if let (Some(min), Some(warning), Some(max)) =
                (cells.next(), cells.next(), cells.next())
            {
                header.sysconfig.vbatmincellvoltage = min;
                header.sysconfig.vbatwarningcellvoltage = warning;
                header.sysconfig.vbatmaxcellvoltage = max;
            }
        }
        "acc_1G" => header.sysconfig.acc_1g = parse_int(value),
        "gyro.scale" => {
            let hex = value.trim().trim_start_matches("0x");
            let bits = u32::from_str_radix(hex, 16).unwrap_or(0);
            let mut scale = f32::from_bits(bits);

            // Cleanflight logs degrees per second; convert to
            // Baseflight's radians per microsecond
            if header.sysconfig.firmware_type == FirmwareType::Cleanflight {
                scale = (scale as f64 * (std::f64::consts::PI / 180.0) * 0.000001) as f32;
            }

            header.sysconfig.gyro_scale = scale;
        }
        _ if is_frame_table_key(name, " predictor") => {
            let marker = name.as_bytes()[6];
            let def = header.frame_def_mut(marker);
            for (slot, code) in def.predictor.iter_mut().zip(parse_int_list(value)) {
                *slot = code as u16;
            }
        }
        _ if is_frame_table_key(name, " encoding") => {
            let marker = name.as_bytes()[6];
            let def = header.frame_def_mut(marker);
            for (slot, code) in def.encoding.iter_mut().zip(parse_int_list(value)) {
                *slot = code as u8;
            }
        }
        _ => trace!("ignoring header line {:?}", name),
    }
}

/// Does `name` look like `Field X<suffix>` for a single marker byte `X`?
fn is_frame_table_key(name: &str, suffix: &str) -> bool {
    name.len() == "Field ".len() + 1 + suffix.len()
        && name.starts_with("Field ")
        && name.ends_with(suffix)
}

fn parse_field_names(value: &str) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        value.split(',').map(str::to_owned).collect()
    }
}

fn parse_int(value: &str) -> i32 {
    value.trim().parse().unwrap_or(0)
}

fn parse_int_list(value: &str) -> impl Iterator<Item = i32> + '_ {
    value.split(',').map(parse_int)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_line(header: &mut LogHeader, line: &str) {
        // The frame loop consumes the leading 'H' before delegating
        let bytes = line.as_bytes().to_vec();
        assert_eq!(bytes[0], b'H');
        let mut cursor = ByteCursor::new(&bytes, 1, bytes.len());
        parse_header_line(&mut cursor, header);
    }

    #[test]
    fn test_main_field_names_and_motor_index() {
        let mut header = LogHeader::new();
        parse_line(
            &mut header,
            "H Field I name:loopIteration,time,motor[0],motor[1]\n",
        );

        assert_eq!(header.main_field_names.len(), 4);
        assert_eq!(header.main_field_names[1], "time");
        assert_eq!(header.motor0_index, Some(2));
    }

    #[test]
    fn test_home_field_indexes() {
        let mut header = LogHeader::new();
        parse_line(
            &mut header,
            "H Field H name:GPS_home[0],GPS_home[1]\n",
        );

        assert_eq!(header.home0_index, Some(0));
        assert_eq!(header.home1_index, Some(1));
    }

    #[test]
    fn test_frame_tables_keyed_by_marker() {
        let mut header = LogHeader::new();
        parse_line(&mut header, "H Field I predictor:0,4,5,9\n");
        parse_line(&mut header, "H Field I encoding:1,0,0,3\n");
        parse_line(&mut header, "H Field G predictor:0,7,7\n");

        assert_eq!(&header.frame_def(b'I').predictor[..4], &[0, 4, 5, 9]);
        assert_eq!(&header.frame_def(b'I').encoding[..4], &[1, 0, 0, 3]);
        assert_eq!(&header.frame_def(b'G').predictor[..3], &[0, 7, 7]);
        // Other slots stay untouched
        assert_eq!(header.frame_def(b'P').predictor[0], 0);
    }

    #[test]
    fn test_signed_flags() {
        let mut header = LogHeader::new();
        parse_line(&mut header, "H Field I signed:0,0,1,1,0\n");

        assert_eq!(
            header.main_field_signed,
            vec![false, false, true, true, false]
        );
    }

    #[test]
    fn test_intervals() {
        let mut header = LogHeader::new();
        parse_line(&mut header, "H I interval:64\n");
        parse_line(&mut header, "H P interval:1/4\n");

        assert_eq!(header.sysconfig.frame_interval_i, 64);
        assert_eq!(header.sysconfig.frame_interval_p_num, 1);
        assert_eq!(header.sysconfig.frame_interval_p_denom, 4);

        // Non-positive intervals clamp
        parse_line(&mut header, "H I interval:0\n");
        assert_eq!(header.sysconfig.frame_interval_i, 1);

        // Without a slash the pair is left alone
        parse_line(&mut header, "H P interval:3\n");
        assert_eq!(header.sysconfig.frame_interval_p_num, 1);
        assert_eq!(header.sysconfig.frame_interval_p_denom, 4);
    }

    #[test]
    fn test_tuning_constants() {
        let mut header = LogHeader::new();
        parse_line(&mut header, "H minthrottle:1100\n");
        parse_line(&mut header, "H maxthrottle:2000\n");
        parse_line(&mut header, "H rcRate:90\n");
        parse_line(&mut header, "H vbatscale:112\n");
        parse_line(&mut header, "H vbatref:4027\n");
        parse_line(&mut header, "H vbatcellvoltage:32,34,44\n");
        parse_line(&mut header, "H acc_1G:4096\n");
        parse_line(&mut header, "H Data version:2\n");

        let config = &header.sysconfig;
        assert_eq!(config.minthrottle, 1100);
        assert_eq!(config.maxthrottle, 2000);
        assert_eq!(config.rc_rate, 90);
        assert_eq!(config.vbatscale, 112);
        assert_eq!(config.vbatref, 4027);
        assert_eq!(config.vbatmincellvoltage, 32);
        assert_eq!(config.vbatwarningcellvoltage, 34);
        assert_eq!(config.vbatmaxcellvoltage, 44);
        assert_eq!(config.acc_1g, 4096);
        assert_eq!(config.data_version, 2);
    }

    #[test]
    fn test_gyro_scale_baseflight() {
        let mut header = LogHeader::new();
        // 0x3089705F is the binary32 for ~1.0e-9
        parse_line(&mut header, "H gyro.scale:0x3089705f\n");

        let expected = f32::from_bits(0x3089_705F);
        assert_eq!(header.sysconfig.gyro_scale, expected);
    }

    #[test]
    fn test_gyro_scale_cleanflight_conversion() {
        let mut header = LogHeader::new();
        parse_line(&mut header, "H Firmware type:Cleanflight\n");
        parse_line(&mut header, "H gyro.scale:0x3f800000\n"); // 1.0

        assert_eq!(header.sysconfig.firmware_type, FirmwareType::Cleanflight);
        let expected = (std::f64::consts::PI / 180.0 * 0.000001) as f32;
        assert!((header.sysconfig.gyro_scale - expected).abs() < f32::EPSILON);
    }

    #[test]
    fn test_firmware_type_fallback() {
        let mut header = LogHeader::new();
        parse_line(&mut header, "H Firmware type:SomethingElse\n");
        assert_eq!(header.sysconfig.firmware_type, FirmwareType::Baseflight);
    }

    #[test]
    fn test_malformed_lines_are_dropped() {
        let mut header = LogHeader::new();

        // No colon
        parse_line(&mut header, "H Field I name loopIteration\n");
        assert!(header.main_field_names.is_empty());

        // NUL byte inside the line
        parse_line(&mut header, "H Field I name:loop\0Iteration\n");
        assert!(header.main_field_names.is_empty());

        // Missing the leading space
        let bytes = b"HField I name:time\n".to_vec();
        let mut cursor = ByteCursor::new(&bytes, 1, bytes.len());
        parse_header_line(&mut cursor, &mut header);
        assert!(header.main_field_names.is_empty());

        // Truncated by end of log
        let bytes = b"H Field I name:time".to_vec();
        let mut cursor = ByteCursor::new(&bytes, 1, bytes.len());
        parse_header_line(&mut cursor, &mut header);
        assert!(header.main_field_names.is_empty());
    }

    #[test]
    fn test_overlong_line_is_dropped() {
        let mut header = LogHeader::new();
        let line = format!("H Field I name:{}\n", "x".repeat(2000));
        parse_line(&mut header, &line);
        assert!(header.main_field_names.is_empty());
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let mut header = LogHeader::new();
        parse_line(&mut header, "H Product:Blackbox flight data recorder\n");
        parse_line(&mut header, "H Craft name:test quad\n");

        assert!(header.main_field_names.is_empty());
        assert_eq!(header.sysconfig.minthrottle, 1150);
    }

    #[test]
    fn test_home_coord_pair_fix_up() {
        let mut header = LogHeader::new();
        parse_line(&mut header, "H Field G name:a,b,c,d\n");
        parse_line(&mut header, "H Field G predictor:0,7,7,0\n");

        header.fix_up_home_coord_pairs();

        assert_eq!(&header.frame_def(b'G').predictor[..4], &[0, 7, 256, 0]);
    }

    #[test]
    fn test_should_have_frame_default_rate() {
        let config = SysConfig::default();
        for index in 0..100 {
            assert!(config.should_have_frame(index));
        }
    }

    #[test]
    fn test_should_have_frame_downsampled() {
        let config = SysConfig {
            frame_interval_p_num: 1,
            frame_interval_p_denom: 2,
            ..SysConfig::default()
        };

        // Half the iterations are intentionally absent
        assert!(config.should_have_frame(0));
        assert!(!config.should_have_frame(1));
        assert!(config.should_have_frame(2));
        assert!(!config.should_have_frame(3));
    }

    #[test]
    fn test_vbat_to_millivolts() {
        let config = SysConfig::default();
        // 4095 * 330 * 110 / 4095 = 36300 -> 36.3V at the divider input
        assert_eq!(config.vbat_to_millivolts(4095), 36300);
        assert_eq!(config.vbat_to_millivolts(0), 0);
    }

    #[test]
    fn test_estimate_num_cells() {
        let config = SysConfig {
            vbatref: 1530,
            ..SysConfig::default()
        };
        // 1530 -> 13563 mV -> 135 dV; 135/43 -> fits under 4 cells
        assert_eq!(config.estimate_num_cells(), 4);
    }
}
