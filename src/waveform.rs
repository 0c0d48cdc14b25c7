//! Waveform Library.
//!
//! A closed registry of pure functions `f(t, N) → [-1,1]^N`, keyed by string
//! name and resolved from the active mode record's `func`. Unknown names
//! fall back to `sin` with a warning.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::f64::consts::PI;

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::store::ModeParams;

const EPS: f64 = 1e-6;

/// A point on the notional helical observer geometry ("Location model"),
/// precomputed once per frame and shared by every locational
/// waveform/envelope that needs it.
#[derive(Clone, Debug)]
pub struct Locational {
    pub distance: Vec<f64>,
    pub dot: Vec<f64>,
}

impl Locational {
    fn compute(n: u32, mode: &ModeParams) -> Self {
        let n = n.max(1);
        let num_turns = f64::from(n) / 3.0;
        let obs = [
            (2.0 * PI * mode.location_degree).cos(),
            (2.0 * PI * mode.location_degree).sin(),
            10.0 * mode.location_height,
        ];
        let obs_norm = norm(&obs).max(EPS);
        let obs_hat = [obs[0] / obs_norm, obs[1] / obs_norm, obs[2] / obs_norm];

        let mut distance = Vec::with_capacity(n as usize);
        let mut dot = Vec::with_capacity(n as usize);
        for i in 0..n {
            let frac = f64::from(i) / f64::from(n);
            let theta = frac * num_turns * 2.0 * PI;
            let z = frac * num_turns;
            let p = [theta.cos(), theta.sin(), z];
            let d = [p[0] - obs[0], p[1] - obs[1], p[2] - obs[2]];
            distance.push(norm(&d));
            let p_norm = norm(&p).max(EPS);
            let p_hat = [p[0] / p_norm, p[1] / p_norm, p[2] / p_norm];
            dot.push(p_hat[0] * obs_hat[0] + p_hat[1] * obs_hat[1] + p_hat[2] * obs_hat[2]);
        }
        Locational { distance, dot }
    }
}

fn norm(v: &[f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

/// Shared evaluation context passed to every waveform/envelope function.
pub struct EvalCtx<'a> {
    pub t: f64,
    pub n: u32,
    pub mode: &'a ModeParams,
    location: OnceCell<Locational>,
}

impl<'a> EvalCtx<'a> {
    pub fn new(t: f64, n: u32, mode: &'a ModeParams) -> Self {
        Self {
            t,
            n,
            mode,
            location: OnceCell::new(),
        }
    }

    pub fn location(&self) -> &Locational {
        self.location.get_or_init(|| Locational::compute(self.n, self.mode))
    }
}

/// `phase(i, N) = -(i/N)·π·phase_rate`
pub fn phase(i: u32, n: u32, mode: &ModeParams) -> f64 {
    (f64::from(i) / f64::from(n)) * PI * mode.phase_rate * -1.0
}

/// `azimuth_phase(i) = (i mod 3)/3 · 2π`
pub fn azimuth_phase(i: u32) -> f64 {
    f64::from(i % 3) / 3.0 * 2.0 * PI
}

/// `azimuth_phase_variable(i, f) = (i mod 3)/3 · clamp(f,0,1) · 2π`
pub fn azimuth_phase_variable(i: u32, f: f64) -> f64 {
    f64::from(i % 3) / 3.0 * f.clamp(0.0, 1.0) * 2.0 * PI
}

fn seeded_uniform(seed: i64, lo: f64, hi: f64) -> f64 {
    let mut rng = StdRng::seed_from_u64(seed as u64);
    rng.gen_range(lo..hi)
}

type WaveformFn = fn(&EvalCtx) -> Vec<f64>;

fn w_sin(c: &EvalCtx) -> Vec<f64> {
    let freq = c.mode.base_freq;
    (0..c.n)
        .map(|i| (2.0 * PI * freq * c.t + phase(i, c.n, c.mode)).sin())
        .collect()
}

fn w_azimuth(c: &EvalCtx) -> Vec<f64> {
    let freq = c.mode.base_freq;
    let period = 1.0 / freq.max(EPS);
    let t_mod = c.t.rem_euclid(period);
    (0..c.n)
        .map(|i| (2.0 * PI * freq * t_mod + azimuth_phase(i) + phase(i, c.n, c.mode)).sin())
        .collect()
}

fn w_azimuth_variable(c: &EvalCtx) -> Vec<f64> {
    let freq = c.mode.base_freq;
    let period = 1.0 / freq.max(EPS);
    let t_mod = c.t.rem_euclid(period);
    (0..c.n)
        .map(|i| {
            (2.0 * PI * freq * t_mod + azimuth_phase_variable(i, c.mode.param_b) + phase(i, c.n, c.mode))
                .sin()
        })
        .collect()
}

fn w_soliton(c: &EvalCtx) -> Vec<f64> {
    let period = 1.0 / c.mode.base_freq.max(EPS);
    let width = c.mode.param_a.max(EPS);
    (0..c.n)
        .map(|i| {
            let frac = f64::from(i) / f64::from(c.n);
            let tau = (((c.t + c.mode.phase_rate * period).rem_euclid(period)) / period
                - frac * c.mode.param_b)
                .rem_euclid(1.0);
            let num = (tau * period - width * period / 2.0).powi(2);
            let den = 2.0 * (width * period / 4.0).powi(2);
            (-num / den).exp()
        })
        .collect()
}

fn w_damped_oscillation(c: &EvalCtx) -> Vec<f64> {
    let damping = c.mode.amp_param_a.max(EPS) * 10.0;
    let freq = c.mode.amp_freq;
    (0..c.n)
        .map(|i| (-damping * c.t).exp() * (2.0 * PI * freq * c.t + phase(i, c.n, c.mode)).sin())
        .collect()
}

fn w_damped_oscillation_locational(c: &EvalCtx) -> Vec<f64> {
    let damping = c.mode.amp_param_a.max(EPS) * 10.0;
    let freq = c.mode.amp_freq;
    let convey = c.mode.amp_param_b * 10.0;
    let loc = c.location();
    (0..c.n)
        .map(|i| {
            let t_i = c.t - loc.distance[i as usize] * convey / (2.0 * PI * freq);
            if t_i < 0.0 {
                0.0
            } else {
                (-damping * t_i).exp() * (2.0 * PI * freq * t_i + phase(i, c.n, c.mode)).sin()
            }
        })
        .collect()
}

fn w_damped_oscillation_displace(c: &EvalCtx) -> Vec<f64> {
    let damping = c.mode.param_a.max(EPS) * 10.0;
    let freq = c.mode.amp_freq;
    let convey = c.mode.amp_param_a * 10.0;
    let loc = c.location();
    (0..c.n)
        .map(|i| {
            let t_i = c.t - loc.distance[i as usize] * convey / (2.0 * PI * freq);
            if t_i < 0.0 {
                0.0
            } else {
                (-damping * t_i).exp()
                    * (2.0 * PI * freq * t_i + phase(i, c.n, c.mode)).sin()
                    * loc.dot[i as usize]
            }
        })
        .collect()
}

fn w_random(c: &EvalCtx) -> Vec<f64> {
    let base = (c.t * c.mode.base_freq).floor() as i64;
    (0..c.n)
        .map(|i| seeded_uniform(base + i64::from(i), -1.0, 1.0))
        .collect()
}

fn w_random_sin(c: &EvalCtx) -> Vec<f64> {
    let freq = c.mode.base_freq;
    (0..c.n)
        .map(|i| {
            let phi = seeded_uniform(i64::from(i), 0.0, 2.0 * PI);
            (2.0 * PI * freq * c.t + phi).sin()
        })
        .collect()
}

fn w_random_sin_freq(c: &EvalCtx) -> Vec<f64> {
    let base_freq = c.mode.base_freq;
    (0..c.n)
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(i as u64);
            let freq_u: f64 = rng.gen_range(0.1..base_freq.max(0.1 + EPS));
            let phi: f64 = rng.gen_range(0.0..2.0 * PI);
            (2.0 * PI * freq_u * freq_u * c.t + phi).sin()
        })
        .collect()
}

static WAVEFORMS: Lazy<HashMap<&'static str, WaveformFn>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, WaveformFn> = HashMap::new();
    m.insert("sin", w_sin);
    m.insert("azimuth", w_azimuth);
    m.insert("azimuth_variable", w_azimuth_variable);
    m.insert("soliton", w_soliton);
    m.insert("damped_oscillation", w_damped_oscillation);
    m.insert("damped_oscillation_locational", w_damped_oscillation_locational);
    m.insert("damped_oscillation_displace", w_damped_oscillation_displace);
    m.insert("random", w_random);
    m.insert("random_sin", w_random_sin);
    m.insert("random_sin_freq", w_random_sin_freq);
    m
});

/// Resolve `name` and evaluate it, falling back to `sin` for unknown names.
pub fn eval(name: &str, ctx: &EvalCtx) -> Vec<f64> {
    match WAVEFORMS.get(name) {
        Some(f) => f(ctx),
        None => {
            warn!(name, "unknown waveform, falling back to sin");
            #[allow(clippy::unwrap_used)]
            WAVEFORMS.get("sin").unwrap()(ctx)
        }
    }
}
