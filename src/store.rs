//! Parameter Store — process-wide configuration.
//!
//! Holds the flat global parameter record and the nested map of named modes,
//! and persists the whole document as human-readable JSON on every
//! mutation, reloading it at startup via `figment` layered over compiled-in
//! defaults.
//!
//! The store is the only mutable state read concurrently by the motion
//! engine; every read takes a cheap [`Snapshot`] (a clone of the top-level
//! map and the active mode map) so a single frame sees a consistent view.
//! Writes serialise through a single mutex and persist synchronously before
//! returning.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use figment::providers::{Format, Json};
use figment::Figment;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{AppResult, EngineError};

/// Default parameter file name.
pub const DEFAULT_PARAMS_FILE: &str = "params.json";

fn default_num_servos() -> u32 {
    31
}
fn default_rate_fps() -> u32 {
    24
}
fn default_alpha() -> f64 {
    0.2
}
fn default_vals_per_host() -> usize {
    8
}
fn default_lut_y() -> [f64; 7] {
    [-1.0, -2.0 / 3.0, -1.0 / 3.0, 0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0]
}
fn default_homing_timeout() -> f64 {
    21.0
}
fn default_getpos_timeout() -> f64 {
    2.0
}
fn default_boot_wait() -> f64 {
    10.0
}
fn default_port() -> u16 {
    50000
}
fn default_neutral_speed() -> f64 {
    2000.0
}
fn default_expected_boot_count() -> u32 {
    1
}

/// Global configuration record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GlobalParams {
    #[serde(rename = "MODE")]
    pub mode_id: String,

    #[serde(rename = "NUM_SERVOS", default = "default_num_servos")]
    pub num_servos: u32,

    #[serde(rename = "RATE_fps", default = "default_rate_fps")]
    pub rate_fps: u32,

    #[serde(rename = "ALPHA", default = "default_alpha")]
    pub alpha: f64,

    #[serde(rename = "STROKE_OFFSET", default)]
    pub stroke_offset: i64,

    #[serde(rename = "LIMIT_ABSOLUTE", default = "default_limit_absolute")]
    pub limit_absolute: i64,

    #[serde(rename = "LIMIT_RELATIONAL", default = "default_limit_relational")]
    pub limit_relational: i64,

    #[serde(rename = "LIMIT_SPEED", default = "default_limit_speed")]
    pub limit_speed: i64,

    #[serde(rename = "Kp", default)]
    pub kp: f64,
    #[serde(rename = "Ki", default)]
    pub ki: f64,
    #[serde(rename = "Kd", default)]
    pub kd: f64,

    #[serde(rename = "K_VAL_NORMAL", default = "default_k_val_normal")]
    pub k_val_normal: i64,
    #[serde(rename = "K_VAL_HOLD", default = "default_k_val_hold")]
    pub k_val_hold: i64,

    #[serde(rename = "HOSTS", default)]
    pub hosts: Vec<String>,
    #[serde(rename = "PORT", default = "default_port")]
    pub port: u16,

    #[serde(rename = "GHOST_HOST", default)]
    pub ghost_host: Option<String>,
    #[serde(rename = "GHOST_PORT", default)]
    pub ghost_port: Option<u16>,
    #[serde(rename = "SEND_CLIENTS", default = "default_true")]
    pub send_clients: bool,
    #[serde(rename = "SEND_CLIENT_GH", default)]
    pub send_ghost: bool,

    #[serde(rename = "VALS_PER_HOST", default = "default_vals_per_host")]
    pub vals_per_host: usize,

    #[serde(rename = "MOTOR_POSITION_MAPPING", default)]
    pub motor_position_mapping: Vec<usize>,

    #[serde(rename = "RECV_PORTS", default)]
    pub recv_ports: Vec<u16>,

    #[serde(rename = "HOMING_TIMEOUT", default = "default_homing_timeout")]
    pub homing_timeout: f64,
    #[serde(rename = "GETPOS_TIMEOUT", default = "default_getpos_timeout")]
    pub getpos_timeout: f64,
    #[serde(rename = "BOOT_WAIT", default = "default_boot_wait")]
    pub boot_wait: f64,
    /// Ramp rate used by `set_neutral` (units/s). Defaulted and recorded as
    /// an open question in DESIGN.md.
    #[serde(rename = "NEUTRAL_SPEED", default = "default_neutral_speed")]
    pub neutral_speed: f64,
    /// Number of `/booted` notifications `init` waits for before proceeding.
    #[serde(rename = "EXPECTED_BOOT_COUNT", default = "default_expected_boot_count")]
    pub expected_boot_count: u32,

    #[serde(rename = "LUT_Y", default = "default_lut_y")]
    pub lut_y: [f64; 7],

    /// Global fallback for `stroke_length_limit_specific`.
    #[serde(rename = "STROKE_LENGTH_LIMIT", default)]
    pub stroke_length_limit: Option<i64>,

    #[serde(rename = "LOCKED_KEYS", default)]
    pub locked_keys: HashSet<String>,

    #[serde(rename = "MODES", default)]
    pub modes: HashMap<String, ModeParams>,

    /// Unknown keys loaded verbatim and round-tripped on save.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

fn default_limit_absolute() -> i64 {
    100_000
}
fn default_limit_relational() -> i64 {
    100_000
}
fn default_limit_speed() -> i64 {
    100_000
}
fn default_k_val_normal() -> i64 {
    25
}
fn default_k_val_hold() -> i64 {
    10
}
fn default_true() -> bool {
    true
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            mode_id: "1".to_string(),
            num_servos: default_num_servos(),
            rate_fps: default_rate_fps(),
            alpha: default_alpha(),
            stroke_offset: 0,
            limit_absolute: default_limit_absolute(),
            limit_relational: default_limit_relational(),
            limit_speed: default_limit_speed(),
            kp: 0.06,
            ki: 0.0,
            kd: 0.0,
            k_val_normal: default_k_val_normal(),
            k_val_hold: default_k_val_hold(),
            hosts: vec!["127.0.0.1".to_string()],
            port: default_port(),
            ghost_host: None,
            ghost_port: None,
            send_clients: true,
            send_ghost: false,
            vals_per_host: default_vals_per_host(),
            motor_position_mapping: Vec::new(),
            recv_ports: Vec::new(),
            homing_timeout: default_homing_timeout(),
            getpos_timeout: default_getpos_timeout(),
            boot_wait: default_boot_wait(),
            neutral_speed: default_neutral_speed(),
            expected_boot_count: default_expected_boot_count(),
            lut_y: default_lut_y(),
            stroke_length_limit: None,
            locked_keys: HashSet::new(),
            modes: default_modes(),
            extra: HashMap::new(),
        }
    }
}

fn default_modes() -> HashMap<String, ModeParams> {
    let mut modes = HashMap::new();
    modes.insert("1".to_string(), ModeParams::default());
    modes
}

/// Per-mode waveform/envelope/transition parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModeParams {
    #[serde(rename = "NAME", default)]
    pub name: String,
    #[serde(rename = "FUNC", default = "default_func")]
    pub func: String,
    #[serde(rename = "AMP_MODE", default = "default_amp_mode")]
    pub amp_mode: String,

    #[serde(rename = "BASE_FREQ", default = "default_base_freq")]
    pub base_freq: f64,
    #[serde(rename = "PHASE_RATE", default)]
    pub phase_rate: f64,
    #[serde(rename = "DIRECTION", default = "default_direction")]
    pub direction: i8,

    #[serde(rename = "STROKE_LENGTH", default)]
    pub stroke_length: i64,
    #[serde(rename = "STROKE_LENGTH_LIMIT_SPECIFIC", default)]
    pub stroke_length_limit_specific: Option<i64>,

    #[serde(rename = "PARAM_A", default)]
    pub param_a: f64,
    #[serde(rename = "PARAM_B", default)]
    pub param_b: f64,

    #[serde(rename = "AMP_FREQ", default)]
    pub amp_freq: f64,
    #[serde(rename = "AMP_PARAM_A", default)]
    pub amp_param_a: f64,
    #[serde(rename = "AMP_PARAM_B", default)]
    pub amp_param_b: f64,

    #[serde(rename = "LOCATION_DEGREE", default)]
    pub location_degree: f64,
    #[serde(rename = "LOCATION_HEIGHT", default)]
    pub location_height: f64,

    #[serde(rename = "EASING_DURATION", default)]
    pub easing_duration: f64,

    #[serde(rename = "U_AVERAGE", default = "default_u_average")]
    pub u_average: f64,
    #[serde(rename = "U_WIDTH", default)]
    pub u_width: f64,
    #[serde(rename = "U_FREQUENTNESS", default)]
    pub u_frequentness: f64,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

fn default_func() -> String {
    "sin".to_string()
}
fn default_amp_mode() -> String {
    "solid".to_string()
}
fn default_base_freq() -> f64 {
    1.0
}
fn default_direction() -> i8 {
    1
}
fn default_u_average() -> f64 {
    1.0
}

impl Default for ModeParams {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            func: default_func(),
            amp_mode: default_amp_mode(),
            base_freq: default_base_freq(),
            phase_rate: 0.0,
            direction: default_direction(),
            stroke_length: 1000,
            stroke_length_limit_specific: None,
            param_a: 0.15,
            param_b: 1.0,
            amp_freq: 0.2,
            amp_param_a: 0.2,
            amp_param_b: 0.2,
            location_degree: 0.0,
            location_height: 0.0,
            easing_duration: 1.0,
            u_average: default_u_average(),
            u_width: 0.0,
            u_frequentness: 0.0,
            extra: HashMap::new(),
        }
    }
}

/// A cheap, consistent read of the store taken once per frame.
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub global: GlobalParams,
    pub mode: ModeParams,
    pub mode_resolved: bool,
}

struct Inner {
    doc: GlobalParams,
    path: PathBuf,
}

/// Thread-safe, process-wide configuration singleton.
#[derive(Clone)]
pub struct ParamStore {
    inner: Arc<Mutex<Inner>>,
}

impl ParamStore {
    /// Load from `path`, falling back to defaults if the file is absent or
    /// malformed.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let doc = Self::load_doc(&path).unwrap_or_else(|_| {
            debug!(path = %path.display(), "no existing params file found, using defaults");
            GlobalParams::default()
        });
        Self {
            inner: Arc::new(Mutex::new(Inner { doc, path })),
        }
    }

    fn load_doc(path: &Path) -> AppResult<GlobalParams> {
        if !path.exists() {
            return Ok(GlobalParams::default());
        }
        let mut doc: GlobalParams = Figment::from(Json::file(path)).extract()?;
        // An empty HOSTS list is treated as absent so defaults still apply.
        if doc.hosts.is_empty() {
            doc.hosts = GlobalParams::default().hosts;
        }
        Ok(doc)
    }

    /// Construct a store over compiled-in defaults without touching disk
    /// (used by tests and by `Snapshot`-only callers).
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                doc: GlobalParams::default(),
                path: PathBuf::from(DEFAULT_PARAMS_FILE),
            })),
        }
    }

    /// Take a consistent snapshot for one frame.
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.inner.lock().expect("param store poisoned");
        let global = inner.doc.clone();
        match global.modes.get(&global.mode_id) {
            Some(mode) => Snapshot {
                global,
                mode: mode.clone(),
                mode_resolved: true,
            },
            None => {
                warn!(mode_id = %global.mode_id, "unknown mode id, falling back to sin/solid");
                let mut fallback = ModeParams::default();
                fallback.func = "sin".to_string();
                fallback.amp_mode = "solid".to_string();
                Snapshot {
                    global,
                    mode: fallback,
                    mode_resolved: false,
                }
            }
        }
    }

    /// Mutate a global-record field by key, atomically persisting the
    /// result. Rejects locked keys. Unknown keys that were never loaded from
    /// disk are ignored with a warning (nothing to coerce against).
    pub fn set_global(&self, key: &str, value: Value) -> AppResult<Value> {
        let mut inner = self.inner.lock().expect("param store poisoned");
        if inner.doc.locked_keys.contains(key) {
            warn!(key, "rejected mutation of locked key");
            return Err(EngineError::LockedKey(key.to_string()));
        }
        let old = set_global_field(&mut inner.doc, key, value)?;
        Self::persist(&inner)?;
        Ok(old)
    }

    /// Mutate a field of the active mode's record.
    pub fn set_mode_field(&self, key: &str, value: Value) -> AppResult<Value> {
        let mut inner = self.inner.lock().expect("param store poisoned");
        if inner.doc.locked_keys.contains(key) {
            warn!(key, "rejected mutation of locked key");
            return Err(EngineError::LockedKey(key.to_string()));
        }
        let mode_id = inner.doc.mode_id.clone();
        let mode = inner.doc.modes.entry(mode_id).or_insert_with(ModeParams::default);
        let old = set_mode_field(mode, key, value)?;
        Self::persist(&inner)?;
        Ok(old)
    }

    /// Does the key belong to the active mode's record?
    pub fn mode_has_key(&self, key: &str) -> bool {
        let inner = self.inner.lock().expect("param store poisoned");
        let mode_id = inner.doc.mode_id.clone();
        inner
            .doc
            .modes
            .get(&mode_id)
            .map(|m| mode_field_value(m, key).is_some())
            .unwrap_or(false)
    }

    /// Does the key belong to the global record?
    pub fn global_has_key(&self, key: &str) -> bool {
        let inner = self.inner.lock().expect("param store poisoned");
        global_field_value(&inner.doc, key).is_some()
    }

    fn persist(inner: &Inner) -> AppResult<()> {
        let text = serde_json::to_string_pretty(&inner.doc)?;
        std::fs::write(&inner.path, text)?;
        Ok(())
    }

    /// Force-persist the current document (used after non-`set_*` mutations
    /// like mode selection in the router).
    pub fn save(&self) -> AppResult<()> {
        let inner = self.inner.lock().expect("param store poisoned");
        Self::persist(&inner)
    }

    /// Replace the active mode id directly (router's `set_mode` path).
    pub fn set_mode_id(&self, mode: String) -> AppResult<()> {
        let mut inner = self.inner.lock().expect("param store poisoned");
        inner.doc.mode_id = mode;
        Self::persist(&inner)
    }
}

/// Coerce `incoming` to the JSON type of `existing`, the way a dynamically
/// typed store would do `type(existing)(val)`.
fn coerce(existing: &Value, incoming: Value) -> Option<Value> {
    match existing {
        Value::Bool(_) => match incoming {
            Value::Bool(b) => Some(Value::Bool(b)),
            Value::Number(n) => Some(Value::Bool(n.as_f64()? != 0.0)),
            Value::String(s) => Some(Value::Bool(s.eq_ignore_ascii_case("true") || s == "1")),
            _ => None,
        },
        Value::Number(n) if n.is_i64() || n.is_u64() => match incoming {
            Value::Number(n) => Some(Value::Number(serde_json::Number::from(
                n.as_f64()?.trunc() as i64,
            ))),
            Value::String(s) => s.parse::<i64>().ok().map(Value::from),
            Value::Bool(b) => Some(Value::from(b as i64)),
            _ => None,
        },
        Value::Number(_) => match incoming {
            Value::Number(n) => Some(Value::from(n.as_f64()?)),
            Value::String(s) => s.parse::<f64>().ok().map(Value::from),
            _ => None,
        },
        Value::String(_) => match incoming {
            Value::String(s) => Some(Value::String(s)),
            other => Some(Value::String(other.to_string())),
        },
        _ => None,
    }
}

fn global_field_value(g: &GlobalParams, key: &str) -> Option<Value> {
    serde_json::to_value(g).ok().and_then(|v| v.get(key).cloned()).or_else(|| g.extra.get(key).cloned())
}

fn mode_field_value(m: &ModeParams, key: &str) -> Option<Value> {
    serde_json::to_value(m).ok().and_then(|v| v.get(key).cloned()).or_else(|| m.extra.get(key).cloned())
}

fn set_global_field(g: &mut GlobalParams, key: &str, value: Value) -> AppResult<Value> {
    let coerce_against = |old: &Value| {
        coerce(old, value.clone()).ok_or_else(|| EngineError::ParameterCoercion {
            key: key.to_string(),
            value: value.to_string(),
        })
    };
    macro_rules! field {
        ($target:expr, $to:expr) => {{
            let old = serde_json::to_value(&$target)?;
            let coerced = coerce_against(&old)?;
            $target = $to(coerced)?;
            return Ok(old);
        }};
    }
    match key {
        "MODE" => field!(g.mode_id, |v: Value| Ok::<_, EngineError>(
            v.as_str().unwrap_or_default().to_string()
        )),
        "NUM_SERVOS" => field!(g.num_servos, as_u32),
        "RATE_fps" => field!(g.rate_fps, as_u32),
        "ALPHA" => field!(g.alpha, as_f64),
        "STROKE_OFFSET" => field!(g.stroke_offset, as_i64),
        "LIMIT_ABSOLUTE" => field!(g.limit_absolute, as_i64),
        "LIMIT_RELATIONAL" => field!(g.limit_relational, as_i64),
        "LIMIT_SPEED" => field!(g.limit_speed, as_i64),
        "Kp" => field!(g.kp, as_f64),
        "Ki" => field!(g.ki, as_f64),
        "Kd" => field!(g.kd, as_f64),
        "K_VAL_NORMAL" => field!(g.k_val_normal, as_i64),
        "K_VAL_HOLD" => field!(g.k_val_hold, as_i64),
        "PORT" => field!(g.port, as_u16),
        "SEND_CLIENTS" => field!(g.send_clients, as_bool),
        "SEND_CLIENT_GH" => field!(g.send_ghost, as_bool),
        "VALS_PER_HOST" => field!(g.vals_per_host, as_usize),
        "HOMING_TIMEOUT" => field!(g.homing_timeout, as_f64),
        "GETPOS_TIMEOUT" => field!(g.getpos_timeout, as_f64),
        "BOOT_WAIT" => field!(g.boot_wait, as_f64),
        "NEUTRAL_SPEED" => field!(g.neutral_speed, as_f64),
        "EXPECTED_BOOT_COUNT" => field!(g.expected_boot_count, as_u32),
        _ => {
            if let Some(old) = g.extra.get(key).cloned() {
                let coerced = coerce_against(&old)?;
                g.extra.insert(key.to_string(), coerced);
                Ok(old)
            } else {
                warn!(key, "no matching global param key, mutation ignored");
                Err(EngineError::ParameterCoercion {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            }
        }
    }
}

fn set_mode_field(m: &mut ModeParams, key: &str, value: Value) -> AppResult<Value> {
    let coerce_against = |old: &Value| {
        coerce(old, value.clone()).ok_or_else(|| EngineError::ParameterCoercion {
            key: key.to_string(),
            value: value.to_string(),
        })
    };
    macro_rules! field {
        ($target:expr, $to:expr) => {{
            let old = serde_json::to_value(&$target)?;
            let coerced = coerce_against(&old)?;
            $target = $to(coerced)?;
            return Ok(old);
        }};
    }
    match key {
        "FUNC" => field!(m.func, |v: Value| Ok::<_, EngineError>(
            v.as_str().unwrap_or_default().to_string()
        )),
        "AMP_MODE" => field!(m.amp_mode, |v: Value| Ok::<_, EngineError>(
            v.as_str().unwrap_or_default().to_string()
        )),
        "BASE_FREQ" => field!(m.base_freq, as_f64),
        "PHASE_RATE" => field!(m.phase_rate, as_f64),
        "DIRECTION" => field!(m.direction, as_i8),
        "STROKE_LENGTH" => field!(m.stroke_length, as_i64),
        "PARAM_A" => field!(m.param_a, as_f64),
        "PARAM_B" => field!(m.param_b, as_f64),
        "AMP_FREQ" => field!(m.amp_freq, as_f64),
        "AMP_PARAM_A" => field!(m.amp_param_a, as_f64),
        "AMP_PARAM_B" => field!(m.amp_param_b, as_f64),
        "LOCATION_DEGREE" => field!(m.location_degree, as_f64),
        "LOCATION_HEIGHT" => field!(m.location_height, as_f64),
        "EASING_DURATION" => field!(m.easing_duration, as_f64),
        "U_AVERAGE" => field!(m.u_average, as_f64),
        "U_WIDTH" => field!(m.u_width, as_f64),
        "U_FREQUENTNESS" => field!(m.u_frequentness, as_f64),
        _ => {
            if let Some(old) = m.extra.get(key).cloned() {
                let coerced = coerce_against(&old)?;
                m.extra.insert(key.to_string(), coerced);
                Ok(old)
            } else {
                warn!(key, "no matching mode param key, mutation ignored");
                Err(EngineError::ParameterCoercion {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            }
        }
    }
}

fn as_f64(v: Value) -> AppResult<f64> {
    v.as_f64().ok_or_else(|| EngineError::ParameterCoercion {
        key: "?".into(),
        value: v.to_string(),
    })
}
fn as_i64(v: Value) -> AppResult<i64> {
    v.as_i64().ok_or_else(|| EngineError::ParameterCoercion {
        key: "?".into(),
        value: v.to_string(),
    })
}
fn as_i8(v: Value) -> AppResult<i8> {
    Ok(as_i64(v)? as i8)
}
fn as_u32(v: Value) -> AppResult<u32> {
    Ok(as_i64(v)?.max(0) as u32)
}
fn as_u16(v: Value) -> AppResult<u16> {
    Ok(as_i64(v)?.clamp(0, u16::MAX as i64) as u16)
}
fn as_usize(v: Value) -> AppResult<usize> {
    Ok(as_i64(v)?.max(0) as usize)
}
fn as_bool(v: Value) -> AppResult<bool> {
    v.as_bool().ok_or_else(|| EngineError::ParameterCoercion {
        key: "?".into(),
        value: v.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_resolve_mode() {
        let store = ParamStore::in_memory();
        let snap = store.snapshot();
        assert!(snap.mode_resolved);
        assert_eq!(snap.mode.func, "sin");
    }

    #[test]
    fn test_unknown_mode_falls_back_to_sin_solid() {
        let store = ParamStore::in_memory();
        store.set_global("MODE", Value::String("missing".into())).unwrap();
        let snap = store.snapshot();
        assert!(!snap.mode_resolved);
        assert_eq!(snap.mode.func, "sin");
        assert_eq!(snap.mode.amp_mode, "solid");
    }

    #[test]
    fn test_locked_key_rejected() {
        let store = ParamStore::in_memory();
        {
            let mut inner = store.inner.lock().unwrap();
            inner.doc.locked_keys.insert("ALPHA".to_string());
        }
        let err = store.set_global("ALPHA", Value::from(0.9)).unwrap_err();
        assert!(matches!(err, EngineError::LockedKey(_)));
    }

    #[test]
    fn test_set_global_persists_to_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.json");
        let store = ParamStore::load(&path);
        store.set_global("ALPHA", Value::from(0.5)).unwrap();
        assert!(path.exists());
        let reloaded = ParamStore::load(&path);
        assert_eq!(reloaded.snapshot().global.alpha, 0.5);
    }

    #[test]
    fn test_coercion_rejects_bad_type() {
        let store = ParamStore::in_memory();
        let err = store
            .set_global("NUM_SERVOS", Value::String("not-a-number".into()))
            .unwrap_err();
        assert!(matches!(err, EngineError::ParameterCoercion { .. }));
    }

    #[test]
    fn test_empty_hosts_field_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{"HOSTS": []}"#).unwrap();
        let store = ParamStore::load(&path);
        assert!(!store.snapshot().global.hosts.is_empty());
    }

    #[test]
    fn test_mode_field_mutation() {
        let store = ParamStore::in_memory();
        let old = store.set_mode_field("BASE_FREQ", Value::from(2.5)).unwrap();
        assert_eq!(old, Value::from(1.0));
        assert_eq!(store.snapshot().mode.base_freq, 2.5);
    }
}
