//! # Field Predictors
//!
//! A frame field travels as a residual against a predicted value; the
//! predictor recovers the real value from the residual plus context: the
//! partially-decoded current frame, up to two reference frames, the GPS
//! home position, and tuning constants from the log header.
//!
//! All additions are performed in wrapping unsigned 32-bit arithmetic
//! with an unconditional final cast to signed, matching the firmware's
//! encoder.

use crate::error::{BblDecoderError, Result};
use crate::header::SysConfig;

/// Closed enumeration of the predictors a log may declare
///
/// Discriminants are the wire codes from the `Field X predictor` header
/// lines. `HomeCoord1` is synthetic: the header writes the same code for
/// both halves of a latitude/longitude pair and the decoder rewrites the
/// second one after header parsing (see the pair fix-up in the frame
/// loop), so its discriminant is deliberately outside the 8-bit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Predictor {
    /// The value is its own prediction
    Zero = 0,
    /// Previous frame's value for this field
    Previous = 1,
    /// Linear extrapolation from the two previous frames
    StraightLine = 2,
    /// Mean of the two previous frames' values
    Average2 = 3,
    /// The `minthrottle` tuning constant
    MinThrottle = 4,
    /// The current frame's `motor[0]` value
    Motor0 = 5,
    /// Skipped-iteration counter, handled inline by the frame parser
    Increment = 6,
    /// GPS home latitude
    HomeCoord = 7,
    /// The constant 1500 (RC command midpoint)
    Add1500 = 8,
    /// The `vbatref` tuning constant
    VbatRef = 9,
    /// GPS home longitude (synthetic, assigned by the pair fix-up)
    HomeCoord1 = 256,
}

impl Predictor {
    /// Look up a predictor by its wire code
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::Zero),
            1 => Some(Self::Previous),
            2 => Some(Self::StraightLine),
            3 => Some(Self::Average2),
            4 => Some(Self::MinThrottle),
            5 => Some(Self::Motor0),
            6 => Some(Self::Increment),
            7 => Some(Self::HomeCoord),
            8 => Some(Self::Add1500),
            9 => Some(Self::VbatRef),
            256 => Some(Self::HomeCoord1),
            _ => None,
        }
    }
}

/// Everything the prediction formulas may reference besides the frame
/// history itself
pub struct PredictorContext<'a> {
    pub sysconfig: &'a SysConfig,
    /// Per-field signedness of the main frame, from `Field I signed`
    pub main_signed: &'a [bool],
    pub motor0_index: Option<usize>,
    pub home0_index: Option<usize>,
    pub home1_index: Option<usize>,
    /// Published GPS home slot referenced by the home-coordinate predictors
    pub gps_home: &'a [i32],
}

/// Recover a field value from its stream residual
///
/// `current` is the partially-decoded frame being filled in (earlier
/// fields are already final), `previous`/`previous2` the reference frames
/// where available.
///
/// # Errors
///
/// Fails when a predictor needs a named field the header never declared
/// (`motor[0]`, `GPS_home[0]`, `GPS_home[1]`), and for the `Increment`
/// predictor, which the frame parser must intercept before decoding.
pub fn apply_prediction(
    ctx: &PredictorContext<'_>,
    field_index: usize,
    predictor: Predictor,
    value: u32,
    current: &[i32],
    previous: Option<&[i32]>,
    previous2: Option<&[i32]>,
) -> Result<i32> {
    let mut value = value;

    match predictor {
        Predictor::Zero => {}
        Predictor::MinThrottle => {
            value = value.wrapping_add(ctx.sysconfig.minthrottle as u32);
        }
        Predictor::Add1500 => {
            value = value.wrapping_add(1500);
        }
        Predictor::Motor0 => {
            let index = ctx
                .motor0_index
                .ok_or(BblDecoderError::MissingFieldIndex {
                    predictor: "motor[0]",
                    field: "motor[0]",
                })?;
            value = value.wrapping_add(current[index] as u32);
        }
        Predictor::VbatRef => {
            value = value.wrapping_add(ctx.sysconfig.vbatref as u32);
        }
        Predictor::Previous => {
            if let Some(previous) = previous {
                value = value.wrapping_add(previous[field_index] as u32);
            }
        }
        Predictor::StraightLine => {
            if let (Some(previous), Some(previous2)) = (previous, previous2) {
                value = value.wrapping_add(
                    (previous[field_index] as u32)
                        .wrapping_mul(2)
                        .wrapping_sub(previous2[field_index] as u32),
                );
            }
        }
        Predictor::Average2 => {
            if let (Some(previous), Some(previous2)) = (previous, previous2) {
                let sum =
                    (previous[field_index] as u32).wrapping_add(previous2[field_index] as u32);

                // The halving must match the field's declared signedness
                let mean = if ctx.main_signed.get(field_index).copied().unwrap_or(false) {
                    ((sum as i32) / 2) as u32
                } else {
                    sum / 2
                };

                value = value.wrapping_add(mean);
            }
        }
        Predictor::HomeCoord => {
            let index = ctx.home0_index.ok_or(BblDecoderError::MissingFieldIndex {
                predictor: "home coordinate",
                field: "GPS_home[0]",
            })?;
            value = value.wrapping_add(ctx.gps_home[index] as u32);
        }
        Predictor::HomeCoord1 => {
            let index = ctx.home1_index.ok_or(BblDecoderError::MissingFieldIndex {
                predictor: "home coordinate",
                field: "GPS_home[1]",
            })?;
            value = value.wrapping_add(ctx.gps_home[index] as u32);
        }
        Predictor::Increment => {
            return Err(BblDecoderError::UnknownPredictor(Predictor::Increment as u16));
        }
    }

    Ok(value as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context<'a>(
        sysconfig: &'a SysConfig,
        signed: &'a [bool],
        gps_home: &'a [i32],
    ) -> PredictorContext<'a> {
        PredictorContext {
            sysconfig,
            main_signed: signed,
            motor0_index: Some(2),
            home0_index: Some(0),
            home1_index: Some(1),
            gps_home,
        }
    }

    #[test]
    fn test_zero_is_identity() {
        let sysconfig = SysConfig::default();
        let ctx = test_context(&sysconfig, &[], &[]);

        let value = apply_prediction(&ctx, 0, Predictor::Zero, 42, &[], None, None).unwrap();
        assert_eq!(value, 42);

        // Negative residuals pass through the unsigned cast unchanged
        let value =
            apply_prediction(&ctx, 0, Predictor::Zero, -7i32 as u32, &[], None, None).unwrap();
        assert_eq!(value, -7);
    }

    #[test]
    fn test_constant_predictors() {
        let sysconfig = SysConfig::default();
        let ctx = test_context(&sysconfig, &[], &[]);

        let value =
            apply_prediction(&ctx, 0, Predictor::MinThrottle, 10, &[], None, None).unwrap();
        assert_eq!(value, 1160); // default minthrottle 1150

        let value = apply_prediction(&ctx, 0, Predictor::Add1500, -20i32 as u32, &[], None, None)
            .unwrap();
        assert_eq!(value, 1480);

        let value = apply_prediction(&ctx, 0, Predictor::VbatRef, 5, &[], None, None).unwrap();
        assert_eq!(value, 4100); // default vbatref 4095
    }

    #[test]
    fn test_previous_without_reference() {
        let sysconfig = SysConfig::default();
        let ctx = test_context(&sysconfig, &[], &[]);

        let value = apply_prediction(&ctx, 1, Predictor::Previous, 9, &[], None, None).unwrap();
        assert_eq!(value, 9);
    }

    #[test]
    fn test_previous_and_straight_line() {
        let sysconfig = SysConfig::default();
        let ctx = test_context(&sysconfig, &[], &[]);
        let previous = [0, 110];
        let previous2 = [0, 100];

        let value =
            apply_prediction(&ctx, 1, Predictor::Previous, 4, &[], Some(&previous), None).unwrap();
        assert_eq!(value, 114);

        // 2*110 - 100 = 120, plus residual 4
        let value = apply_prediction(
            &ctx,
            1,
            Predictor::StraightLine,
            4,
            &[],
            Some(&previous),
            Some(&previous2),
        )
        .unwrap();
        assert_eq!(value, 124);
    }

    #[test]
    fn test_average2_signedness() {
        let sysconfig = SysConfig::default();
        let signed = [true, false];
        let ctx = test_context(&sysconfig, &signed, &[]);
        let previous = [-3, 0];
        let previous2 = [-4, 0];

        // Signed field: (-3 + -4) / 2 truncates toward zero to -3
        let value = apply_prediction(
            &ctx,
            0,
            Predictor::Average2,
            0,
            &[],
            Some(&previous),
            Some(&previous2),
        )
        .unwrap();
        assert_eq!(value, -3);

        // Unsigned field: the same bit pattern halves logically
        let previous = [0, -3];
        let previous2 = [0, -4];
        let value = apply_prediction(
            &ctx,
            1,
            Predictor::Average2,
            0,
            &[],
            Some(&previous),
            Some(&previous2),
        )
        .unwrap();
        assert_eq!(value, ((-7i32 as u32) / 2) as i32);
    }

    #[test]
    fn test_motor0_reads_current_frame() {
        let sysconfig = SysConfig::default();
        let ctx = test_context(&sysconfig, &[], &[]);
        let current = [0, 0, 1320];

        let value =
            apply_prediction(&ctx, 3, Predictor::Motor0, 25, &current, None, None).unwrap();
        assert_eq!(value, 1345);
    }

    #[test]
    fn test_motor0_missing_is_fatal() {
        let sysconfig = SysConfig::default();
        let mut ctx = test_context(&sysconfig, &[], &[]);
        ctx.motor0_index = None;

        let result = apply_prediction(&ctx, 3, Predictor::Motor0, 25, &[], None, None);
        assert!(matches!(
            result,
            Err(BblDecoderError::MissingFieldIndex { .. })
        ));
    }

    #[test]
    fn test_home_coordinates() {
        let sysconfig = SysConfig::default();
        let gps_home = [520_000_000, 44_000_000];
        let ctx = test_context(&sysconfig, &[], &gps_home);

        let value = apply_prediction(&ctx, 0, Predictor::HomeCoord, 100, &[], None, None).unwrap();
        assert_eq!(value, 520_000_100);

        let value =
            apply_prediction(&ctx, 1, Predictor::HomeCoord1, -50i32 as u32, &[], None, None)
                .unwrap();
        assert_eq!(value, 43_999_950);
    }

    #[test]
    fn test_home_coordinate_missing_is_fatal() {
        let sysconfig = SysConfig::default();
        let mut ctx = test_context(&sysconfig, &[], &[]);
        ctx.home0_index = None;

        let result = apply_prediction(&ctx, 0, Predictor::HomeCoord, 0, &[], None, None);
        assert!(matches!(
            result,
            Err(BblDecoderError::MissingFieldIndex { .. })
        ));
    }

    #[test]
    fn test_wrapping_addition() {
        let sysconfig = SysConfig::default();
        let ctx = test_context(&sysconfig, &[], &[]);
        let previous = [i32::MAX];

        let value =
            apply_prediction(&ctx, 0, Predictor::Previous, 1, &[], Some(&previous), None).unwrap();
        assert_eq!(value, i32::MIN);
    }

    #[test]
    fn test_from_code_round_trip() {
        for code in [0u16, 1, 2, 3, 4, 5, 6, 7, 8, 9, 256] {
            let predictor = Predictor::from_code(code).unwrap();
            assert_eq!(predictor as u16, code);
        }
        assert!(Predictor::from_code(10).is_none());
        assert!(Predictor::from_code(255).is_none());
    }
}
