//! Amplitude-envelope library, same registry style as
//! [`crate::waveform`] but keyed from the mode record's `amp_mode`.

use std::collections::HashMap;
use std::f64::consts::PI;

use once_cell::sync::Lazy;
use tracing::warn;

use crate::waveform::EvalCtx;

const EPS: f64 = 1e-6;

type EnvelopeFn = fn(&EvalCtx) -> Vec<f64>;

fn a_solid(c: &EvalCtx) -> Vec<f64> {
    vec![1.0; c.n as usize]
}

fn a_cone(c: &EvalCtx) -> Vec<f64> {
    let a = 2.0 * c.mode.amp_param_a - 1.0;
    let denom = (c.n as f64 - 1.0).max(1.0);
    (0..c.n)
        .map(|i| {
            let tau = f64::from(i) / denom;
            if a >= 0.0 {
                tau.powf(4.0 * a)
            } else {
                (1.0 - tau).powf(4.0 * a.abs())
            }
        })
        .collect()
}

fn a_amp_sin(c: &EvalCtx) -> Vec<f64> {
    let freq = c.mode.amp_freq;
    let delta = (2.0 * PI / f64::from(c.n) / c.mode.amp_param_b.max(EPS)) / 2.0;
    (0..c.n)
        .map(|i| {
            (1.0 - c.mode.amp_param_a)
                + c.mode.amp_param_a * (2.0 * PI * freq * c.t + f64::from(i) * delta).sin()
        })
        .collect()
}

fn a_amp_gaussian_window(c: &EvalCtx) -> Vec<f64> {
    let freq = c.mode.amp_freq;
    let f = freq.abs() / 5.0;
    let t_cycle = c.t - (c.t * freq).floor() / freq.abs().max(EPS);
    let duty = c.mode.amp_param_a / f.max(EPS);
    let center = 0.65 * duty;
    let sigma = (duty / 4.0).max(EPS);
    let v = (-((t_cycle - center).powi(2)) / (2.0 * sigma * sigma)).exp();
    vec![v; c.n as usize]
}

fn a_amp_emerging(c: &EvalCtx) -> Vec<f64> {
    let v = 1.0 - (-c.mode.amp_param_a.max(EPS) * c.t).exp();
    vec![v; c.n as usize]
}

fn a_amp_locational(c: &EvalCtx) -> Vec<f64> {
    let loc = c.location();
    let k = c.mode.amp_param_a.max(EPS);
    loc.distance.iter().map(|d| (-k * d).exp()).collect()
}

static ENVELOPES: Lazy<HashMap<&'static str, EnvelopeFn>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, EnvelopeFn> = HashMap::new();
    m.insert("solid", a_solid);
    m.insert("cone", a_cone);
    m.insert("amp_sin", a_amp_sin);
    m.insert("amp_gaussian_window", a_amp_gaussian_window);
    m.insert("amp_emerging", a_amp_emerging);
    m.insert("amp_locational", a_amp_locational);
    m
});

/// Resolve `name` and evaluate it, falling back to `solid` for unknown
/// names.
pub fn eval(name: &str, ctx: &EvalCtx) -> Vec<f64> {
    match ENVELOPES.get(name) {
        Some(f) => f(ctx),
        None => {
            warn!(name, "unknown envelope, falling back to solid");
            #[allow(clippy::unwrap_used)]
            ENVELOPES.get("solid").unwrap()(ctx)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ModeParams;

    #[test]
    fn test_solid_is_all_ones() {
        let m = ModeParams::default();
        let ctx = EvalCtx::new(0.0, 5, &m);
        assert_eq!(eval("solid", &ctx), vec![1.0; 5]);
    }

    #[test]
    fn test_cone_decreasing_for_positive_a() {
        let mut m = ModeParams::default();
        m.amp_param_a = 0.75; // a = 0.5 >= 0
        let ctx = EvalCtx::new(0.0, 5, &m);
        let v = eval("cone", &ctx);
        assert!(v[0] <= v[4]);
    }

    #[test]
    fn test_unknown_envelope_falls_back_to_solid() {
        let m = ModeParams::default();
        let ctx = EvalCtx::new(0.0, 3, &m);
        assert_eq!(eval("nope", &ctx), eval("solid", &ctx));
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_unknown_envelope_logs_fallback_warning() {
        let m = ModeParams::default();
        let ctx = EvalCtx::new(0.0, 3, &m);
        eval("nope", &ctx);
        assert!(logs_contain("unknown envelope, falling back to solid"));
    }
}
