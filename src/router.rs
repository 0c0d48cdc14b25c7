//! Upstream Callback Router: resolves decoded `(address, args)`
//! messages (or bundles of them) against the mode-scoped or global parameter
//! record, and dispatches the small set of no-arg transport commands.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::engine::EngineHandle;
use crate::error::{AppResult, EngineError};
use crate::homing::HomingCoordinator;
use crate::store::ParamStore;

/// Outbound events published to the external UI channel (default port
/// 10001). The wire encoding of that channel is out of scope; this is the
/// payload the listener on that side would serialise.
#[derive(Clone, Debug)]
pub enum OutboundEvent {
    /// A parameter mutation succeeded (`(key, value)`).
    ParamChanged { key: String, value: Value },
    /// `/Homed [motor_id, 1|-1]` or `/Homed [1|-1]` for a whole sweep.
    Homed { motor_id: Option<i64>, ok: bool },
    /// `/Initialized [1]`.
    Initialized,
    /// `/AverageSpeed [f64]`.
    AverageSpeed(f64),
    /// `/Speed [ints...]`.
    Speed(Vec<i64>),
    /// `/Position [ints...]`.
    Position(Vec<i64>),
}

/// The no-arg transport commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Init,
    Home,
    Neutral,
    Release,
    Halt,
    GetAverageSpeed,
    GetSpeed,
    GetPosition,
    RaiseError,
}

impl Command {
    fn parse(key: &str) -> Option<Self> {
        Some(match key {
            "Start" => Self::Start,
            "Stop" => Self::Stop,
            "Init" => Self::Init,
            "Home" => Self::Home,
            "Neutral" => Self::Neutral,
            "Release" => Self::Release,
            "Halt" => Self::Halt,
            "GetAverageSpeed" => Self::GetAverageSpeed,
            "GetSpeed" => Self::GetSpeed,
            "GetPosition" => Self::GetPosition,
            "RaiseError" => Self::RaiseError,
            _ => return None,
        })
    }
}

pub struct Router {
    store: ParamStore,
    engine_handle: Arc<EngineHandle>,
    homing: Arc<HomingCoordinator>,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
}

impl Router {
    pub fn new(
        store: ParamStore,
        engine_handle: Arc<EngineHandle>,
        homing: Arc<HomingCoordinator>,
    ) -> (Self, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                engine_handle,
                homing,
                outbound: tx,
            },
            rx,
        )
    }

    /// Handle one decoded message. `address` still carries its leading `/`.
    pub async fn dispatch_message(&self, address: &str, args: &[Value]) -> AppResult<()> {
        let key = address.strip_prefix('/').unwrap_or(address);

        if let Some(cmd) = Command::parse(key) {
            self.run_command(cmd).await;
            return Ok(());
        }

        let Some(value) = args.first().cloned() else {
            warn!(address, "parameter update message carried no argument, ignored");
            return Ok(());
        };
        self.apply_param(key, value)
    }

    /// Handle a bundle of messages, applying each independently; the engine
    /// sees the net effect at the next frame read.
    pub async fn dispatch_bundle(&self, messages: &[(String, Vec<Value>)]) {
        for (address, args) in messages {
            if let Err(e) = self.dispatch_message(address, args).await {
                warn!(address = address.as_str(), error = %e, "bundle element rejected, continuing with the rest");
            }
        }
    }

    fn apply_param(&self, key: &str, value: Value) -> AppResult<()> {
        let result = if self.store.mode_has_key(key) {
            self.store.set_mode_field(key, value.clone())
        } else if self.store.global_has_key(key) {
            self.store.set_global(key, value.clone())
        } else {
            warn!(key, "parameter update addresses an unknown key, ignored");
            return Ok(());
        };

        match result {
            Ok(_old) => {
                if key == "MODE" {
                    self.engine_handle.engine().request_repeat();
                }
                let _ = self.outbound.send(OutboundEvent::ParamChanged { key: key.to_string(), value });
                Ok(())
            }
            Err(EngineError::LockedKey(k)) => {
                warn!(key = k.as_str(), "rejected mutation of locked key");
                Err(EngineError::LockedKey(k))
            }
            Err(e) => Err(e),
        }
    }

    async fn run_command(&self, cmd: Command) {
        match cmd {
            Command::Start => {
                self.engine_handle.start().await;
            }
            Command::Stop => {
                self.engine_handle.stop().await;
            }
            Command::Init => {
                self.homing.init(true).await;
                let _ = self.outbound.send(OutboundEvent::Initialized);
            }
            Command::Release => {
                self.homing.init(false).await;
                let _ = self.outbound.send(OutboundEvent::Initialized);
            }
            Command::Home => {
                if self.homing.is_home_all_running() {
                    info!("Home ignored, home_all already in progress");
                } else {
                    let homing = self.homing.clone();
                    let outbound = self.outbound.clone();
                    tokio::spawn(async move {
                        let result = homing.home_all().await;
                        let ok = matches!(result, crate::homing::HomingResult::Ok);
                        let _ = outbound.send(OutboundEvent::Homed { motor_id: None, ok });
                    });
                }
            }
            Command::Neutral => {
                let homing = self.homing.clone();
                tokio::spawn(async move {
                    homing.set_neutral().await;
                });
            }
            Command::Halt => {
                self.homing.halt().await;
            }
            Command::GetAverageSpeed => {
                let avg = self.engine_handle.engine().average_speed();
                let _ = self.outbound.send(OutboundEvent::AverageSpeed(avg));
            }
            Command::GetSpeed => {
                let speed = self.engine_handle.engine().current_speed();
                let _ = self.outbound.send(OutboundEvent::Speed(speed));
            }
            Command::GetPosition => {
                let pos = self.engine_handle.engine().snapshot_positions();
                let _ = self.outbound.send(OutboundEvent::Position(pos));
            }
            Command::RaiseError => {
                error!("RaiseError diagnostic command invoked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::transport::TransportPool;

    fn router() -> (Router, mpsc::UnboundedReceiver<OutboundEvent>) {
        let store = ParamStore::in_memory();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(TransportPool::new())));
        let engine_handle = Arc::new(EngineHandle::new(store.clone(), dispatcher.clone()));
        let homing = Arc::new(HomingCoordinator::new(store.clone(), engine_handle.clone(), dispatcher));
        Router::new(store, engine_handle, homing)
    }

    #[tokio::test]
    async fn test_global_param_update_emits_event() {
        let (router, mut rx) = router();
        router.dispatch_message("/ALPHA", &[Value::from(0.5)]).await.unwrap();
        assert_eq!(router.store.snapshot().global.alpha, 0.5);
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, OutboundEvent::ParamChanged { key, .. } if key == "ALPHA"));
    }

    #[tokio::test]
    async fn test_mode_scoped_key_resolves_before_global() {
        let (router, _rx) = router();
        router.dispatch_message("/BASE_FREQ", &[Value::from(3.0)]).await.unwrap();
        assert_eq!(router.store.snapshot().mode.base_freq, 3.0);
    }

    #[tokio::test]
    async fn test_locked_key_rejected_with_no_event() {
        use crate::store::ParamStore;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        let path = dir.path().join("params.json");
        std::fs::write(&path, r#"{"LOCKED_KEYS": ["ALPHA"]}"#).unwrap();
        let store = ParamStore::load(&path);
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(TransportPool::new())));
        let engine_handle = Arc::new(EngineHandle::new(store.clone(), dispatcher.clone()));
        let homing = Arc::new(HomingCoordinator::new(store.clone(), engine_handle.clone(), dispatcher));
        let (router, mut rx) = Router::new(store, engine_handle, homing);

        let err = router.dispatch_message("/ALPHA", &[Value::from(0.1)]).await;
        assert!(matches!(err, Err(EngineError::LockedKey(_))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mode_change_sets_engine_repeat_flag() {
        let (router, _rx) = router();
        router.dispatch_message("/MODE", &[Value::String("1".into())]).await.unwrap();
        // repeat_flag forces the transition branch to re-enter; after one tick
        // the engine reports a finite average speed and has dispatched a frame.
        let frame = router.engine_handle.engine().tick().await;
        assert_eq!(frame.len(), router.store.snapshot().global.num_servos as usize);
    }

    #[tokio::test]
    async fn test_unknown_key_ignored() {
        let (router, mut rx) = router();
        router.dispatch_message("/NOT_A_KEY", &[Value::from(1)]).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_get_position_emits_event() {
        let (router, mut rx) = router();
        router.dispatch_message("/GetPosition", &[]).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, OutboundEvent::Position(_)));
    }
}
