//! # Frame Field Decoding
//!
//! The per-field decode loop shared by every frame type: dispatch each
//! field's encoding, pull one raw value (or a whole group) off the
//! stream, and run it through the predictor engine.

use super::predictor::{apply_prediction, Predictor, PredictorContext};
use super::stream::ByteCursor;
use super::tags::{
    read_tag2_3s32, read_tag8_4s16_v1, read_tag8_4s16_v2, read_tag8_8svb, sign_extend_14bit,
};
use crate::error::{BblDecoderError, Result};
use crate::header::FrameDef;

/// The five frame markers a log may contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// `I`: self-contained reference frame
    Intra,
    /// `P`: delta frame against up to two prior main frames
    Inter,
    /// `G`: GPS position
    Gps,
    /// `H`: GPS home position
    GpsHome,
    /// `E`: event
    Event,
}

impl FrameKind {
    /// Number of distinct frame kinds
    pub const COUNT: usize = 5;

    /// Look up a frame kind by its marker byte
    pub fn from_marker(marker: u8) -> Option<Self> {
        match marker {
            b'I' => Some(Self::Intra),
            b'P' => Some(Self::Inter),
            b'G' => Some(Self::Gps),
            b'H' => Some(Self::GpsHome),
            b'E' => Some(Self::Event),
            _ => None,
        }
    }

    /// The marker byte written before frames of this kind
    pub fn marker(self) -> u8 {
        match self {
            Self::Intra => b'I',
            Self::Inter => b'P',
            Self::Gps => b'G',
            Self::GpsHome => b'H',
            Self::Event => b'E',
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Intra => 0,
            Self::Inter => 1,
            Self::Gps => 2,
            Self::GpsHome => 3,
            Self::Event => 4,
        }
    }
}

/// Closed enumeration of field encodings
///
/// Discriminants are the wire codes from the `Field X encoding` header
/// lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    /// Zig-zag variable-byte integer
    SignedVb = 0,
    /// Variable-byte integer
    UnsignedVb = 1,
    /// Unsigned VB, sign-extended from 14 bits and negated
    Neg14Bit = 3,
    /// Up to eight signed VB values behind a presence bitmap
    Tag8_8Svb = 6,
    /// Three signed 32-bit values with a shared 2-bit width tag
    Tag2_3S32 = 7,
    /// Four signed 16-bit values with a selector byte
    Tag8_4S16 = 8,
    /// No bytes on the stream; the raw value is zero
    Null = 9,
}

impl Encoding {
    /// Look up an encoding by its wire code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::SignedVb),
            1 => Some(Self::UnsignedVb),
            3 => Some(Self::Neg14Bit),
            6 => Some(Self::Tag8_8Svb),
            7 => Some(Self::Tag2_3S32),
            8 => Some(Self::Tag8_4S16),
            9 => Some(Self::Null),
            _ => None,
        }
    }
}

/// The predictor actually applied to a raw value
///
/// Raw mode pins every stream-carried residual to predictor zero without
/// consulting (or validating) the declared code.
fn effective_predictor(raw: bool, code: u16) -> Result<Predictor> {
    if raw {
        Ok(Predictor::Zero)
    } else {
        Predictor::from_code(code).ok_or(BblDecoderError::UnknownPredictor(code))
    }
}

/// Decode one frame's fields into `target`
///
/// Walks the field definitions for this frame type, reading scalar
/// encodings one value at a time and group encodings as a unit. Group
/// encodings advance the field index by the whole group: `TAG8_4S16`
/// always covers four fields, `TAG2_3S32` three, and `TAG8_8SVB` as many
/// consecutive `TAG8_8SVB` fields as follow (at most eight).
///
/// Fields whose predictor is `Increment` consume no stream bytes; their
/// value is the skipped-iteration count plus one, accumulated onto the
/// previous frame's value. This applies in raw mode too.
///
/// # Errors
///
/// Fails on unknown predictor or encoding codes in the definition table,
/// and when a predictor references a field index the header never
/// declared. These abort the whole parse; truncation and garbage are
/// instead caught later by the frame-boundary checks.
#[allow(clippy::too_many_arguments)]
pub fn parse_frame_fields(
    cursor: &mut ByteCursor<'_>,
    def: &FrameDef,
    ctx: &PredictorContext<'_>,
    target: &mut [i32],
    previous: Option<&[i32]>,
    previous2: Option<&[i32]>,
    field_count: usize,
    skipped_frames: u32,
    raw: bool,
) -> Result<()> {
    let field_count = field_count.min(target.len());
    let mut values = [0i32; 8];

    let mut i = 0;
    while i < field_count {
        if def.predictor[i] == Predictor::Increment as u16 {
            let mut value = skipped_frames.wrapping_add(1) as i32;
            if let Some(previous) = previous {
                value = value.wrapping_add(previous[i]);
            }
            target[i] = value;

            i += 1;
            continue;
        }

        let code = def.encoding[i];
        let encoding = Encoding::from_code(code).ok_or(BblDecoderError::UnknownEncoding(code))?;

        let group_count = match encoding {
            Encoding::SignedVb => {
                values[0] = cursor.read_signed_vb();
                1
            }
            Encoding::UnsignedVb => {
                values[0] = cursor.read_unsigned_vb() as i32;
                1
            }
            Encoding::Neg14Bit => {
                values[0] = -sign_extend_14bit(cursor.read_unsigned_vb() as u16);
                1
            }
            Encoding::Null => {
                values[0] = 0;
                1
            }
            Encoding::Tag8_4S16 => {
                if ctx.sysconfig.data_version < 2 {
                    read_tag8_4s16_v1(cursor, &mut values);
                } else {
                    read_tag8_4s16_v2(cursor, &mut values);
                }
                4
            }
            Encoding::Tag2_3S32 => {
                read_tag2_3s32(cursor, &mut values);
                3
            }
            Encoding::Tag8_8Svb => {
                // The group spans every directly following field with the
                // same encoding, up to eight in total
                let mut end = i + 1;
                while end < field_count
                    && end < i + 8
                    && def.encoding[end] == Encoding::Tag8_8Svb as u8
                {
                    end += 1;
                }
                let count = end - i;

                read_tag8_8svb(cursor, &mut values, count);
                count
            }
        };

        for &value in values.iter().take(group_count) {
            if i >= field_count {
                break;
            }

            let predictor = effective_predictor(raw, def.predictor[i])?;
            let decoded =
                apply_prediction(ctx, i, predictor, value as u32, target, previous, previous2)?;
            target[i] = decoded;

            i += 1;
        }
    }

    Ok(())
}
