//! Frame Builder: composes waveform × envelope → LUT → stroke
//! scaling → offset into the raw target vector for one instant *t*.

use crate::envelope;
use crate::store::{GlobalParams, ModeParams};
use crate::tonecurve::ToneCurve;
use crate::waveform::{self, EvalCtx};

const DEFAULT_STROKE_LENGTH_LIMIT: i64 = 50_000;

/// `make_frame(t, N)`.
///
/// `lut` is passed in rather than rebuilt here because it only changes when
/// `LUT_Y` is mutated; callers that evaluate many frames against the same
/// mode (tests, the easing snapshot at the start of a transition) should
/// build it once.
pub fn make_frame(t: f64, global: &GlobalParams, mode: &ModeParams, lut: &ToneCurve) -> Vec<f64> {
    let n = global.num_servos;
    let direction = f64::from(mode.direction);

    let wave_ctx = EvalCtx::new(t * direction, n, mode);
    let raw = waveform::eval(&mode.func, &wave_ctx);

    let amp_ctx = EvalCtx::new(t, n, mode);
    let amp = envelope::eval(&mode.amp_mode, &amp_ctx);

    let combined: Vec<f64> = raw.iter().zip(amp.iter()).map(|(r, a)| r * a).collect();
    let shaped = lut.apply(&combined);

    let limit = mode
        .stroke_length_limit_specific
        .or(global.stroke_length_limit)
        .unwrap_or(DEFAULT_STROKE_LENGTH_LIMIT);
    let stroke_length = mode.stroke_length.clamp(0, limit) as f64;
    let offset = global.stroke_offset as f64;

    shaped.iter().map(|v| v * stroke_length + offset).collect()
}

/// Convenience for the common case of building the LUT straight from a
/// snapshot's global record.
pub fn lut_from_global(global: &GlobalParams) -> ToneCurve {
    ToneCurve::new(global.lut_y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_solid_is_constant_across_channels() {
        let mut global = GlobalParams::default();
        global.num_servos = 6;
        global.stroke_offset = 50_000;
        let mut mode = ModeParams::default();
        mode.func = "sin".to_string(); // sin(0)=0, so product with solid envelope is 0 at t=0
        mode.amp_mode = "solid".to_string();
        mode.stroke_length = 1000;
        let lut = ToneCurve::identity();

        let frame = make_frame(0.0, &global, &mode, &lut);
        assert_eq!(frame.len(), 6);
        for v in &frame {
            assert!((v - 50_000.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_stroke_length_clamped_by_specific_limit() {
        let global = GlobalParams::default();
        let mut mode = ModeParams::default();
        mode.func = "sin".to_string();
        mode.amp_mode = "amp_emerging".to_string(); // nonzero so scaling is observable
        mode.amp_param_a = 1.0;
        mode.stroke_length = 999_999;
        mode.stroke_length_limit_specific = Some(10);
        let lut = ToneCurve::identity();

        let frame = make_frame(1.0, &global, &mode, &lut);
        // amplitude*stroke_length must never exceed the clamped limit (10) in magnitude.
        for v in frame {
            assert!((v - global.stroke_offset as f64).abs() <= 10.0 + 1e-6);
        }
    }

    #[test]
    fn test_default_stroke_length_limit_is_50000() {
        let global = GlobalParams::default();
        let mut mode = ModeParams::default();
        mode.stroke_length = 999_999;
        let lut = ToneCurve::identity();
        let frame = make_frame(0.25, &global, &mode, &lut);
        for v in frame {
            assert!((v - global.stroke_offset as f64).abs() <= DEFAULT_STROKE_LENGTH_LIMIT as f64 + 1e-6);
        }
    }
}
