//! Motion Engine: the fixed-rate frame loop — phase-variable
//! advancement, mode-switch easing, exponential smoothing, safety limits,
//! dispatch, and pacing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::frame::{self, lut_from_global};
use crate::safety;
use crate::store::{ParamStore, Snapshot};

/// Engine state not persisted by the store.
#[derive(Debug)]
struct EngineState {
    prev_vals: Vec<i64>,
    current_speed: Vec<i64>,
    avg_speed: f64,
    u: f64,
    u_t_rate: f64,
    u_t_rate_target: f64,
    u_t_keep: f64,
    easing_from: Vec<f64>,
    easing_to: Vec<f64>,
    active_mode_id: Option<String>,
    repeat_flag: bool,
    first_frame: bool,
}

impl EngineState {
    fn new(n: usize, stroke_offset: i64) -> Self {
        Self {
            prev_vals: vec![stroke_offset; n],
            current_speed: vec![0; n],
            avg_speed: 0.0,
            u: 0.0,
            u_t_rate: 0.0,
            u_t_rate_target: 0.0,
            u_t_keep: 0.0,
            easing_from: vec![stroke_offset as f64; n],
            easing_to: vec![stroke_offset as f64; n],
            active_mode_id: None,
            repeat_flag: false,
            first_frame: true,
        }
    }

    fn resize_if_needed(&mut self, n: usize, stroke_offset: i64) {
        if self.prev_vals.len() != n {
            *self = Self::new(n, stroke_offset);
        }
    }
}

/// The engine's one-frame computation, separated from [`EngineHandle`] so
/// tests can drive it without spawning a task.
#[derive(Clone)]
pub struct Engine {
    store: ParamStore,
    state: Arc<Mutex<EngineState>>,
    dispatcher: Arc<Dispatcher>,
}

impl Engine {
    pub fn new(store: ParamStore, dispatcher: Arc<Dispatcher>) -> Self {
        let n = store.snapshot().global.num_servos as usize;
        Self {
            state: Arc::new(Mutex::new(EngineState::new(n, 0))),
            store,
            dispatcher,
        }
    }

    /// Mirrors `init`'s `prev_vals <- [stroke_offset]*N` reset.
    pub fn reset_prev_vals(&self, stroke_offset: i64, n: usize) {
        let mut state = self.state.lock().expect("engine state poisoned");
        *state = EngineState::new(n, stroke_offset);
    }

    /// The position report the homing coordinator and dispatcher share
    /// (`prev_vals`).
    pub fn snapshot_positions(&self) -> Vec<i64> {
        self.state.lock().expect("engine state poisoned").prev_vals.clone()
    }

    pub fn set_position(&self, index: usize, value: i64) {
        let mut state = self.state.lock().expect("engine state poisoned");
        if let Some(slot) = state.prev_vals.get_mut(index) {
            *slot = value;
        }
    }

    pub fn current_speed(&self) -> Vec<i64> {
        self.state.lock().expect("engine state poisoned").current_speed.clone()
    }

    pub fn average_speed(&self) -> f64 {
        self.state.lock().expect("engine state poisoned").avg_speed
    }

    /// External one-shot forcing re-entry of the transition branch even
    /// when `mode_id` is unchanged (the `MODE` key).
    pub fn request_repeat(&self) {
        self.state.lock().expect("engine state poisoned").repeat_flag = true;
    }

    /// Advance by exactly one frame. Returns the dispatched (filtered)
    /// frame for observability in tests.
    pub async fn tick(&self) -> Vec<i64> {
        let snap = self.store.snapshot();
        let dt = 1.0 / f64::from(snap.global.rate_fps.max(1));
        let filt = self.compute_frame(&snap, dt);
        self.dispatcher.dispatch(&filt, &snap.global).await;
        filt
    }

    fn compute_frame(&self, snap: &Snapshot, dt: f64) -> Vec<i64> {
        let n = snap.global.num_servos as usize;
        let lut = lut_from_global(&snap.global);
        let mut state = self.state.lock().expect("engine state poisoned");
        state.resize_if_needed(n, snap.global.stroke_offset);

        let mode_changed = state.active_mode_id.as_deref() != Some(snap.global.mode_id.as_str());
        if mode_changed || state.repeat_flag || state.first_frame {
            state.easing_from = state.prev_vals.iter().map(|&v| v as f64).collect();
            state.easing_to = frame::make_frame(0.0, &snap.global, &snap.mode, &lut);
            state.u = -snap.mode.easing_duration;
            state.u_t_keep = 0.0;
            state.repeat_flag = false;
            state.active_mode_id = Some(snap.global.mode_id.clone());
            state.first_frame = false;
            debug!(mode_id = %snap.global.mode_id, "mode transition started");
        }

        state.u_t_keep += dt;
        let raw = if state.u >= 0.0 {
            advance_phase_rate(&mut state, &snap.mode);
            state.u += state.u_t_rate * dt;
            frame::make_frame(state.u, &snap.global, &snap.mode, &lut)
        } else {
            let easing_duration = snap.mode.easing_duration.max(1e-9);
            let frac = (state.u_t_keep / easing_duration).min(1.0);
            let raw: Vec<f64> = state
                .easing_from
                .iter()
                .zip(state.easing_to.iter())
                .map(|(from, to)| from * (1.0 - frac) + to * frac)
                .collect();
            state.u += dt;
            raw
        };

        let (filt, tags) = safety::apply(&raw, &state.prev_vals, &snap.global);
        if tags.any() {
            warn!(tags = %tags.as_tag_string(), "frame safety limit triggered");
        }

        state.current_speed = filt.iter().zip(state.prev_vals.iter()).map(|(f, p)| f - p).collect();
        let mean_abs_speed = if state.current_speed.is_empty() {
            0.0
        } else {
            state.current_speed.iter().map(|v| (*v as f64).abs()).sum::<f64>() / state.current_speed.len() as f64
        };
        state.avg_speed += snap.global.alpha * (mean_abs_speed - state.avg_speed);
        state.prev_vals = filt.clone();
        filt
    }
}

fn advance_phase_rate(state: &mut EngineState, mode: &crate::store::ModeParams) {
    if mode.u_frequentness <= 0.0 || mode.u_width <= 0.0 {
        state.u_t_rate_target = mode.u_average;
    } else {
        let interval = 1.0 / mode.u_frequentness;
        if state.u_t_keep >= interval {
            let lo = mode.u_average - mode.u_width / 2.0;
            let hi = mode.u_average + mode.u_width / 2.0;
            state.u_t_rate_target = rand::thread_rng().gen_range(lo..=hi);
            state.u_t_keep = 0.0;
        }
    }
    let step = (state.u_t_rate_target - state.u_t_rate).clamp(-0.01, 0.01);
    state.u_t_rate = (state.u_t_rate + step).max(0.0);
}

/// Owns the long-lived motion engine worker. `start`/`stop` are
/// idempotent and drive the single engine task on and off.
pub struct EngineHandle {
    engine: Engine,
    task: tokio::sync::Mutex<Option<(oneshot::Sender<()>, tokio::task::JoinHandle<()>)>>,
}

impl EngineHandle {
    pub fn new(store: ParamStore, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            engine: Engine::new(store, dispatcher),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Spawn the frame loop if it isn't already running. Returns whether it
    /// was (re)started.
    pub async fn start(&self) -> bool {
        let mut guard = self.task.lock().await;
        if guard.is_some() {
            return false;
        }
        let (tx, rx) = oneshot::channel();
        let engine = self.engine.clone();
        let handle = tokio::spawn(run_loop(engine, rx));
        *guard = Some((tx, handle));
        info!("motion engine worker started");
        true
    }

    pub fn is_running_blocking(&self) -> bool {
        self.task.try_lock().map(|g| g.is_some()).unwrap_or(true)
    }

    /// Signal the loop to stop and join it with a 2s timeout.
    pub async fn stop(&self) {
        let entry = self.task.lock().await.take();
        if let Some((tx, handle)) = entry {
            let _ = tx.send(());
            if tokio::time::timeout(Duration::from_secs(2), handle).await.is_err() {
                warn!("engine worker did not stop within timeout");
            }
            info!("motion engine worker stopped");
        }
    }
}

async fn run_loop(engine: Engine, mut stop_rx: oneshot::Receiver<()>) {
    let mut t_schedule = Instant::now();
    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }
        engine.tick().await;

        let dt = 1.0 / f64::from(engine.store.snapshot().global.rate_fps.max(1));
        t_schedule += Duration::from_secs_f64(dt);
        let now = Instant::now();
        if t_schedule > now {
            tokio::select! {
                _ = tokio::time::sleep_until(t_schedule) => {}
                _ = &mut stop_rx => break,
            }
        } else {
            warn!("frame deadline slipped, resynchronising schedule");
            t_schedule = now + Duration::from_secs_f64(dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportPool;

    fn test_engine() -> Engine {
        let store = ParamStore::in_memory();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(TransportPool::new())));
        Engine::new(store, dispatcher)
    }

    #[tokio::test]
    async fn test_mode_switch_starts_easing_at_negative_duration() {
        let engine = test_engine();
        {
            let store = &engine.store;
            store.set_mode_field("EASING_DURATION", serde_json::json!(1.0)).unwrap();
        }
        let snap = engine.store.snapshot();
        let dt = 1.0 / f64::from(snap.global.rate_fps);
        engine.compute_frame(&snap, dt);
        let u = engine.state.lock().unwrap().u;
        assert!(u > -1.0 - 1e-9 && u < 0.0 + dt + 1e-9);
    }

    #[tokio::test]
    async fn test_easing_reaches_target_after_enough_frames() {
        let engine = test_engine();
        engine.store.set_mode_field("EASING_DURATION", serde_json::json!(0.2)).unwrap();
        engine.store.set_global("RATE_fps", serde_json::json!(10)).unwrap();
        engine.store.set_global("ALPHA", serde_json::json!(1.0)).unwrap();
        let snap = engine.store.snapshot();
        let dt = 1.0 / f64::from(snap.global.rate_fps);
        for _ in 0..5 {
            engine.compute_frame(&snap, dt);
        }
        let u = engine.state.lock().unwrap().u;
        assert!(u >= -1e-6);
    }

    #[tokio::test]
    async fn test_repeat_flag_forces_retransition() {
        let engine = test_engine();
        engine.store.set_mode_field("EASING_DURATION", serde_json::json!(1.0)).unwrap();
        let snap = engine.store.snapshot();
        let dt = 1.0 / f64::from(snap.global.rate_fps);
        engine.compute_frame(&snap, dt);
        engine.compute_frame(&snap, dt); // second frame, no longer at u=-duration
        engine.request_repeat();
        engine.compute_frame(&snap, dt);
        let u = engine.state.lock().unwrap().u;
        assert!(u < 0.0);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_safety_limit_trip_logs_warning() {
        let engine = test_engine();
        engine.store.set_global("ALPHA", serde_json::json!(1.0)).unwrap();
        engine.store.set_global("LIMIT_ABSOLUTE", serde_json::json!(100_000)).unwrap();
        engine.store.set_mode_field("STROKE_LENGTH", serde_json::json!(200_000)).unwrap();
        engine.store.set_mode_field("EASING_DURATION", serde_json::json!(0.0)).unwrap();
        let snap = engine.store.snapshot();
        let dt = 1.0 / f64::from(snap.global.rate_fps);
        // Several frames to clear the easing branch and reach a raw value past the limit.
        for _ in 0..4 {
            engine.compute_frame(&snap, dt);
        }
        assert!(logs_contain("frame safety limit triggered"));
    }

    #[tokio::test]
    async fn test_engine_handle_ticks_advance_positions_under_paused_clock() {
        tokio_test::time::pause();
        let store = ParamStore::in_memory();
        store.set_global("RATE_fps", serde_json::json!(10)).unwrap();
        store.set_global("ALPHA", serde_json::json!(1.0)).unwrap();
        store.set_global("STROKE_OFFSET", serde_json::json!(0)).unwrap();
        store.set_mode_field("PHASE_RATE", serde_json::json!(1.0)).unwrap();
        store.set_mode_field("EASING_DURATION", serde_json::json!(0.0)).unwrap();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(TransportPool::new())));
        let handle = EngineHandle::new(store.clone(), dispatcher);

        handle.start().await;
        tokio_test::time::advance(Duration::from_millis(150)).await;
        let mid = handle.engine().snapshot_positions();
        tokio_test::time::advance(Duration::from_millis(350)).await;
        let later = handle.engine().snapshot_positions();
        handle.stop().await;

        // The schedule keeps producing distinct frames as paused time advances,
        // rather than stalling after the first tick.
        assert_ne!(mid, later);
    }
}
