//! Homing Coordinator: reset, boot-detection, parameter push,
//! neutral-rail movement, and pairwise homing with cancellation. Shares the
//! parameter store and the engine's `prev_vals` with the motion engine,
//! preempting it (`stop`) for the duration of any direct-setpoint sweep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::dispatch::Dispatcher;
use crate::engine::EngineHandle;
use crate::error::{AppResult, EngineError};
use crate::store::ParamStore;
use crate::transport::Arg;

/// Outcome of homing a single motor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum HomingStatus {
    /// Board-reported status code (`3` = success, `4` = board timeout).
    Status(i64),
    /// Polling exceeded `homing_timeout` without a qualifying report.
    Timeout,
    /// `motor_id` fell outside `[1, num_servos]`.
    OutOfRange,
}

/// Outcome of a `home_all` sweep (`OK`, `NG {reason}`, `CANCELLED`).
#[derive(Clone, Debug, PartialEq)]
pub enum HomingResult {
    /// Every motor reported success.
    Ok,
    /// At least one motor failed; carries the per-motor `'o'/'x'/'_'` pattern.
    Ng(String),
    /// Aborted via `home_all_cancel` before completion.
    Cancelled,
}

fn resolve_endpoint(motor_id: i64, num_servos: u32, vals_per_host: usize) -> AppResult<(usize, i64)> {
    if motor_id < 1 || motor_id > i64::from(num_servos) {
        return Err(EngineError::MotorOutOfRange(motor_id));
    }
    let k = vals_per_host as i64;
    let endpoint = ((motor_id - 1) / k) as usize;
    let local_id = ((motor_id - 1) % k) + 1;
    Ok((endpoint, local_id))
}

pub struct HomingCoordinator {
    store: ParamStore,
    engine_handle: Arc<EngineHandle>,
    dispatcher: Arc<Dispatcher>,
    homing_status: Mutex<HashMap<i64, i64>>,
    position: Mutex<HashMap<i64, i64>>,
    booted: AtomicU32,
    home_all_cancel: AtomicBool,
    home_all_running: AtomicBool,
}

impl HomingCoordinator {
    pub fn new(store: ParamStore, engine_handle: Arc<EngineHandle>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            store,
            engine_handle,
            dispatcher,
            homing_status: Mutex::new(HashMap::new()),
            position: Mutex::new(HashMap::new()),
            booted: AtomicU32::new(0),
            home_all_cancel: AtomicBool::new(false),
            home_all_running: AtomicBool::new(false),
        }
    }

    /// Upstream `/homingStatus (local_id, status)` hook; the caller has
    /// already resolved `local_id` + port index into `motor_id`.
    pub fn report_homing_status(&self, motor_id: i64, status: i64) {
        self.homing_status.lock().expect("homing status poisoned").insert(motor_id, status);
    }

    /// Upstream `/position (local_id, position)` hook.
    pub fn report_position(&self, motor_id: i64, position: i64) {
        self.position.lock().expect("position map poisoned").insert(motor_id, position);
    }

    /// Upstream `/booted` hook.
    pub fn report_booted(&self) {
        self.booted.fetch_add(1, Ordering::SeqCst);
    }

    pub fn last_known_position(&self, motor_id: i64) -> Option<i64> {
        self.position.lock().expect("position map poisoned").get(&motor_id).copied()
    }

    /// Linearly ramp `prev_vals` toward `[stroke_offset]*N` at `neutral_speed`
    /// units/s over a 20ms tick, dispatching each step.
    pub async fn set_neutral(&self) {
        self.engine_handle.stop().await;
        let snap = self.store.snapshot();
        let target = snap.global.stroke_offset;
        const TICK: Duration = Duration::from_millis(20);
        let step_per_tick = (snap.global.neutral_speed * TICK.as_secs_f64()).max(1.0);

        loop {
            let mut v = self.engine_handle.engine().snapshot_positions();
            let mut done = true;
            for x in v.iter_mut() {
                if *x != target {
                    done = false;
                    let delta = (target - *x) as f64;
                    *x += delta.clamp(-step_per_tick, step_per_tick).round() as i64;
                }
            }
            for (i, &val) in v.iter().enumerate() {
                self.engine_handle.engine().set_position(i, val);
            }
            self.dispatcher.dispatch(&v, &snap.global).await;
            if done {
                break;
            }
            tokio::time::sleep(TICK).await;
        }
        self.engine_handle.start().await;
    }

    /// Home a single motor. Not directly exposed to the router —
    /// `home_all` is the external entry point — but usable standalone.
    pub async fn homing(&self, motor_id: i64) -> HomingStatus {
        let snap = self.store.snapshot();
        let (endpoint, local_id) = match resolve_endpoint(motor_id, snap.global.num_servos, snap.global.vals_per_host) {
            Ok(v) => v,
            Err(_) => {
                warn!(motor_id, "homing requested for motor id out of range");
                return HomingStatus::OutOfRange;
            }
        };

        let _ = self
            .dispatcher
            .send_single(&snap.global, endpoint, "/enableServoMode", &[Arg::Int(local_id), Arg::Int(0)])
            .await;
        let _ = self
            .dispatcher
            .send_single(&snap.global, endpoint, "/setKval", &[Arg::Int(local_id), Arg::Int(10), Arg::Int(25), Arg::Int(25), Arg::Int(25)])
            .await;
        self.homing_status.lock().expect("homing status poisoned").remove(&motor_id);
        let _ = self.dispatcher.send_single(&snap.global, endpoint, "/homing", &[Arg::Int(local_id)]).await;

        let deadline = Instant::now() + Duration::from_secs_f64(snap.global.homing_timeout);
        let outcome = loop {
            if let Some(&status) = self.homing_status.lock().expect("homing status poisoned").get(&motor_id) {
                if status >= 3 {
                    break HomingStatus::Status(status);
                }
            }
            if Instant::now() >= deadline {
                break HomingStatus::Timeout;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        };

        let hold_args = [
            Arg::Int(local_id),
            Arg::Int(snap.global.k_val_hold),
            Arg::Int(snap.global.k_val_normal),
            Arg::Int(snap.global.k_val_normal),
            Arg::Int(snap.global.k_val_normal),
        ];
        let _ = self.dispatcher.send_single(&snap.global, endpoint, "/setKval", &hold_args).await;
        let _ = self
            .dispatcher
            .send_single(&snap.global, endpoint, "/enableServoMode", &[Arg::Int(local_id), Arg::Int(1)])
            .await;

        if outcome == HomingStatus::Status(3) {
            self.engine_handle.engine().set_position((motor_id - 1) as usize, 0);
        }
        outcome
    }

    async fn finalize_motor(&self, marks: &mut [char], physical_index: usize, status: HomingStatus, snap: &crate::store::Snapshot) {
        let motor_id = physical_index as i64 + 1;
        marks[physical_index] = if status == HomingStatus::Status(3) { 'o' } else { 'x' };
        if status != HomingStatus::Status(3) {
            if let Ok((endpoint, local_id)) = resolve_endpoint(motor_id, snap.global.num_servos, snap.global.vals_per_host) {
                let _ = self.dispatcher.send_single(&snap.global, endpoint, "/hardHiZ", &[Arg::Int(local_id)]).await;
            }
        }
    }

    /// Symmetric inward sweep. Returns without side effects if already
    /// running.
    pub async fn home_all(&self) -> HomingResult {
        if self.home_all_running.swap(true, Ordering::SeqCst) {
            return HomingResult::Ng("home_all already running".to_string());
        }
        self.engine_handle.stop().await;

        let snap = self.store.snapshot();
        let n = snap.global.num_servos as usize;
        let mapping: Vec<usize> = if snap.global.motor_position_mapping.len() == n {
            snap.global.motor_position_mapping.clone()
        } else {
            (0..n).collect()
        };
        let mut marks = vec!['_'; n];
        let half = n / 2;
        let mut cancelled = false;

        for i in 0..half {
            if self.home_all_cancel.load(Ordering::SeqCst) {
                cancelled = true;
                break;
            }
            let idx_a = mapping[i];
            let idx_b = mapping[n - 1 - i];
            let motor_a = idx_a as i64 + 1;
            let motor_b = idx_b as i64 + 1;

            if n % 2 == 0 && i == half - 1 {
                let sa = self.homing(motor_a).await;
                self.set_neutral_no_preempt(&snap).await;
                let sb = self.homing(motor_b).await;
                self.finalize_motor(&mut marks, idx_a, sa, &snap).await;
                self.finalize_motor(&mut marks, idx_b, sb, &snap).await;
            } else {
                let (sa, sb) = tokio::join!(self.homing(motor_a), self.homing(motor_b));
                self.finalize_motor(&mut marks, idx_a, sa, &snap).await;
                self.finalize_motor(&mut marks, idx_b, sb, &snap).await;
            }
            self.set_neutral_no_preempt(&snap).await;
        }

        if !cancelled && n % 2 == 1 {
            if self.home_all_cancel.load(Ordering::SeqCst) {
                cancelled = true;
            } else {
                let idx_mid = mapping[half];
                let motor_mid = idx_mid as i64 + 1;
                let s = self.homing(motor_mid).await;
                self.finalize_motor(&mut marks, idx_mid, s, &snap).await;
            }
        }

        self.home_all_running.store(false, Ordering::SeqCst);
        self.home_all_cancel.store(false, Ordering::SeqCst);
        self.engine_handle.start().await;

        let pattern: String = marks.iter().collect();
        if cancelled {
            info!(pattern = %pattern, "home_all cancelled");
            HomingResult::Cancelled
        } else if marks.iter().all(|&c| c == 'o') {
            info!(pattern = %pattern, "home_all succeeded");
            HomingResult::Ok
        } else {
            info!(pattern = %pattern, "home_all finished with failures");
            HomingResult::Ng(pattern)
        }
    }

    /// Variant of `set_neutral` used inside `home_all`, which has already
    /// stopped the engine and will restart it itself at the end.
    async fn set_neutral_no_preempt(&self, snap: &crate::store::Snapshot) {
        let target = snap.global.stroke_offset;
        const TICK: Duration = Duration::from_millis(20);
        let step_per_tick = (snap.global.neutral_speed * TICK.as_secs_f64()).max(1.0);
        loop {
            let mut v = self.engine_handle.engine().snapshot_positions();
            let mut done = true;
            for x in v.iter_mut() {
                if *x != target {
                    done = false;
                    let delta = (target - *x) as f64;
                    *x += delta.clamp(-step_per_tick, step_per_tick).round() as i64;
                }
            }
            for (i, &val) in v.iter().enumerate() {
                self.engine_handle.engine().set_position(i, val);
            }
            self.dispatcher.dispatch(&v, &snap.global).await;
            if done {
                break;
            }
            tokio::time::sleep(TICK).await;
        }
    }

    /// Signal an in-flight `home_all` to abort at its next checkpoint.
    pub fn cancel_home_all(&self) {
        self.home_all_cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_home_all_running(&self) -> bool {
        self.home_all_running.load(Ordering::SeqCst)
    }

    /// `init(enable)`.
    pub async fn init(&self, enable: bool) {
        if self.home_all_running.load(Ordering::SeqCst) {
            self.home_all_cancel.store(true, Ordering::SeqCst);
            while self.home_all_running.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
        self.engine_handle.stop().await;
        let snap = self.store.snapshot();

        self.dispatcher.broadcast(&snap.global, "/resetDevice", &[]).await;
        self.booted.store(0, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_secs_f64(snap.global.boot_wait);
        while self.booted.load(Ordering::SeqCst) < snap.global.expected_boot_count {
            if Instant::now() >= deadline {
                warn!("boot wait timed out before expected endpoint count reported");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.dispatcher.broadcast(&snap.global, "/setDestIp", &[]).await;
        let kval_args = [
            Arg::Int(255),
            Arg::Int(snap.global.k_val_hold),
            Arg::Int(snap.global.k_val_normal),
            Arg::Int(snap.global.k_val_normal),
            Arg::Int(snap.global.k_val_normal),
        ];
        self.dispatcher.broadcast(&snap.global, "/setKval", &kval_args).await;
        self.dispatcher.broadcast(&snap.global, "/setGoUntilTimeout", &[Arg::Int(20000)]).await;
        self.dispatcher.broadcast(&snap.global, "/setHomingSpeed", &[Arg::Int(100)]).await;
        self.dispatcher
            .broadcast(&snap.global, "/setPosition", &[Arg::Int(snap.global.stroke_offset)])
            .await;

        self.engine_handle
            .engine()
            .reset_prev_vals(snap.global.stroke_offset, snap.global.num_servos as usize);

        self.dispatcher
            .broadcast(&snap.global, "/enableServoMode", &[Arg::Int(255), Arg::Int(enable as i64)])
            .await;
        if !enable {
            self.dispatcher.broadcast(&snap.global, "/softHiZ", &[Arg::Int(255)]).await;
        }
        self.dispatcher
            .broadcast(
                &snap.global,
                "/setServoParam",
                &[Arg::Int(255), Arg::Float(snap.global.kp), Arg::Float(snap.global.ki), Arg::Float(snap.global.kd)],
            )
            .await;

        self.engine_handle.start().await;
    }

    /// `halt`: terminal for the engine, never restarted here.
    pub async fn halt(&self) {
        let snap = self.store.snapshot();
        self.dispatcher.broadcast(&snap.global, "/hardHiZ", &[Arg::Int(255)]).await;
        self.engine_handle.stop().await;
    }

    /// `/reset_pos` single-motor passthrough.
    pub async fn reset_pos(&self, motor_id: i64) -> AppResult<()> {
        let snap = self.store.snapshot();
        let (endpoint, local_id) = resolve_endpoint(motor_id, snap.global.num_servos, snap.global.vals_per_host)?;
        self.dispatcher
            .send_single(&snap.global, endpoint, "/enableServoMode", &[Arg::Int(local_id), Arg::Int(0)])
            .await
            .map_err(|source| EngineError::Transport { endpoint: snap.global.hosts[endpoint].clone(), source })?;
        let _ = self.dispatcher.send_single(&snap.global, endpoint, "/resetPos", &[Arg::Int(local_id)]).await;
        let _ = self
            .dispatcher
            .send_single(&snap.global, endpoint, "/enableServoMode", &[Arg::Int(local_id), Arg::Int(1)])
            .await;
        Ok(())
    }

    /// `/set_target_position` single-motor passthrough.
    pub async fn set_target_position(&self, motor_id: i64, position: i64) -> AppResult<()> {
        let snap = self.store.snapshot();
        let (endpoint, local_id) = resolve_endpoint(motor_id, snap.global.num_servos, snap.global.vals_per_host)?;
        self.dispatcher
            .send_single(&snap.global, endpoint, "/setTargetPosition", &[Arg::Int(local_id), Arg::Int(position)])
            .await
            .map_err(|source| EngineError::Transport { endpoint: snap.global.hosts[endpoint].clone(), source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportPool;

    fn coordinator() -> HomingCoordinator {
        let store = ParamStore::in_memory();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(TransportPool::new())));
        let engine_handle = Arc::new(EngineHandle::new(store.clone(), dispatcher.clone()));
        HomingCoordinator::new(store, engine_handle, dispatcher)
    }

    #[test]
    fn test_resolve_endpoint_first_and_last_channel() {
        assert_eq!(resolve_endpoint(1, 16, 8).unwrap(), (0, 1));
        assert_eq!(resolve_endpoint(8, 16, 8).unwrap(), (0, 8));
        assert_eq!(resolve_endpoint(9, 16, 8).unwrap(), (1, 1));
    }

    #[test]
    fn test_resolve_endpoint_out_of_range() {
        assert!(matches!(resolve_endpoint(0, 16, 8), Err(EngineError::MotorOutOfRange(0))));
        assert!(matches!(resolve_endpoint(17, 16, 8), Err(EngineError::MotorOutOfRange(17))));
    }

    #[tokio::test]
    async fn test_homing_out_of_range_motor() {
        let coord = coordinator();
        let n = coord.store.snapshot().global.num_servos;
        let status = coord.homing(n as i64 + 1).await;
        assert_eq!(status, HomingStatus::OutOfRange);
    }

    #[tokio::test]
    async fn test_homing_times_out_without_reports() {
        let coord = coordinator();
        coord.store.set_global("HOMING_TIMEOUT", serde_json::json!(0.05)).unwrap();
        let status = coord.homing(1).await;
        assert_eq!(status, HomingStatus::Timeout);
    }

    #[tokio::test]
    async fn test_homing_reports_status_and_zeroes_position() {
        let coord = coordinator();
        coord.store.set_global("HOMING_TIMEOUT", serde_json::json!(1.0)).unwrap();
        coord.engine_handle.engine().set_position(0, 12345);

        let coord = Arc::new(coord);
        let c2 = coord.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            c2.report_homing_status(1, 3);
        });
        let status = coord.homing(1).await;
        assert_eq!(status, HomingStatus::Status(3));
        assert_eq!(coord.engine_handle.engine().snapshot_positions()[0], 0);
    }

    #[tokio::test]
    async fn test_home_all_cancel_before_first_pair_reports_cancelled() {
        let coord = coordinator();
        coord.store.set_global("HOMING_TIMEOUT", serde_json::json!(0.05)).unwrap();
        coord.cancel_home_all();
        let result = coord.home_all().await;
        assert_eq!(result, HomingResult::Cancelled);
    }
}
