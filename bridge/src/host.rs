use std::{
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{Mutex, Notify},
};
use tracing::{debug, info, warn};

use aircon_common::{
    event_queue, AcDriver, BridgeAction, BridgeEngine, BridgeEvent, BridgeStatus,
    EnvironmentReading, EnvironmentSensor, EventReceiver, EventSender, IrError, IrTransport,
    RuntimeConfig, SensorError, SessionAction, SleepPlan, SleepStep, StatusIndicator,
    DEFAULT_EVENT_QUEUE_DEPTH,
};

// HCI reason codes reported by the simulated stack.
const REASON_REMOTE_USER_TERMINATED: i32 = 0x13;
const REASON_AUTHENTICATION_FAILURE: i32 = 0x05;
const MAX_PULSE_US: u16 = 32_767;

#[derive(Clone)]
struct AppState {
    events: EventSender,
    link: Arc<Mutex<SimulatedLink>>,
    status: Arc<Mutex<Option<BridgeStatus>>>,
}

#[derive(Debug, Default)]
struct SimulatedLink {
    next_handle: u16,
    active: Option<ActiveLink>,
}

#[derive(Debug, Clone, Copy)]
struct ActiveLink {
    conn_handle: u16,
    encrypted: bool,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct ConnectRequest {
    peer: String,
    #[serde(default = "default_encrypted")]
    encrypted: bool,
}

fn default_encrypted() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct ConnectResponse {
    #[serde(rename = "connHandle")]
    conn_handle: u16,
}

#[derive(Debug, Deserialize)]
struct MtuRequest {
    mtu: u16,
}

/// Logs frames instead of driving an LED.
struct LoggingTransport;

#[derive(Default)]
struct LogIndicator {
    lit: bool,
}

/// Slowly drifting readings so the published value changes over time.
#[derive(Default)]
struct SimulatedSensor {
    samples: u32,
    asleep: bool,
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    info!(
        "config loaded: name=`{}`, power_managed={}, sensor={}",
        runtime.ble.advertised_name, runtime.power.enabled, runtime.sensor.enabled
    );

    let (events, receiver) = event_queue(DEFAULT_EVENT_QUEUE_DEPTH);
    let app_state = AppState {
        events,
        link: Arc::new(Mutex::new(SimulatedLink::default())),
        status: Arc::new(Mutex::new(None)),
    };

    let suspended = Arc::new(Notify::new());
    spawn_control_loop(app_state.clone(), runtime, receiver, suspended.clone());

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/ble/connect", post(handle_connect))
        .route("/api/ble/disconnect", post(handle_disconnect))
        .route("/api/ble/command", post(handle_command))
        .route("/api/ble/mtu", post(handle_mtu))
        .route("/api/ble/environment", get(handle_get_environment))
        .with_state(app_state);

    let port = std::env::var("BRIDGE_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind bridge simulator at {addr}"))?;

    info!("bridge simulator listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(suspended))
        .await?;
    Ok(())
}

async fn shutdown_signal(suspended: Arc<Notify>) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!("failed to listen for ctrl-c: {err}");
            }
            info!("ctrl-c received, shutting down");
        }
        _ = suspended.notified() => info!("bridge suspended, stopping simulator"),
    }
}

fn spawn_control_loop(
    app_state: AppState,
    runtime: RuntimeConfig,
    receiver: EventReceiver,
    suspended: Arc<Notify>,
) {
    tokio::spawn(async move {
        let mut engine = BridgeEngine::new(&runtime, monotonic_ms());
        let mut driver = AcDriver::new(LoggingTransport);
        let mut indicator = LogIndicator::default();
        let mut sensor = SimulatedSensor::default();
        let mut interval =
            tokio::time::interval(Duration::from_millis(runtime.power.loop_interval_ms));

        info!("advertising as `{}`", runtime.ble.advertised_name);

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            for event in receiver.drain() {
                for action in engine.handle_event(event, now_ms) {
                    match action {
                        BridgeAction::Session(action) => {
                            apply_session_action(&app_state, action).await
                        }
                        BridgeAction::Ac(action) => {
                            // Failures are already counted and logged by the driver.
                            let _ = driver.execute(&[action], &mut indicator);
                        }
                    }
                }
            }

            if engine.sample_due(now_ms) {
                engine.record_sample(sensor.read(), now_ms);
            }

            let plan = engine.tick(now_ms);
            *app_state.status.lock().await = Some(engine.status(now_ms, driver.status()));

            if let Some(plan) = plan {
                execute_sleep_plan(plan, &mut indicator, &mut sensor);
                suspended.notify_one();
                break;
            }
        }
    });
}

async fn apply_session_action(app_state: &AppState, action: SessionAction) {
    match action {
        SessionAction::UpdateConnParams {
            conn_handle,
            params,
        } => info!(
            "connection parameters for handle {conn_handle}: interval {}-{}, latency {}, timeout {}",
            params.min_interval, params.max_interval, params.latency, params.supervision_timeout
        ),
        SessionAction::Disconnect { conn_handle } => {
            let mut link = app_state.link.lock().await;
            if link.active.map(|active| active.conn_handle) == Some(conn_handle)
                && app_state.events.push(BridgeEvent::Disconnected {
                    conn_handle,
                    reason: REASON_AUTHENTICATION_FAILURE,
                })
            {
                link.active = None;
            }
        }
        SessionAction::RestartAdvertising => info!("advertising restarted"),
    }
}

fn execute_sleep_plan(
    plan: SleepPlan,
    indicator: &mut impl StatusIndicator,
    sensor: &mut impl EnvironmentSensor,
) {
    for step in plan.steps() {
        match step {
            SleepStep::StopAdvertising => info!("advertising stopped"),
            SleepStep::ClearStatusIndicator => indicator.set_lit(false),
            SleepStep::QuiesceSensor => {
                if let Err(err) = sensor.sleep() {
                    warn!("failed to put sensor to sleep: {err}");
                }
            }
            SleepStep::ReleaseSensorBus => sensor.release_bus(),
            SleepStep::ArmWakeTimer { wake_after_ms } => {
                info!("wake timer armed for {wake_after_ms}ms")
            }
            SleepStep::Suspend => info!("suspending ({:?})", plan.reason),
        }
    }
}

async fn handle_get_status(State(state): State<AppState>) -> axum::response::Response {
    match state.status.lock().await.clone() {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "bridge is starting"),
    }
}

async fn handle_connect(
    State(state): State<AppState>,
    Json(request): Json<ConnectRequest>,
) -> axum::response::Response {
    let mut link = state.link.lock().await;
    if link.active.is_some() {
        return error_response(StatusCode::CONFLICT, "a client is already connected");
    }

    let conn_handle = link.next_handle;
    link.next_handle = link.next_handle.wrapping_add(1);

    let connected = state.events.push(BridgeEvent::Connected {
        conn_handle,
        address: request.peer,
    });
    if !connected {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "event queue closed");
    }
    link.active = Some(ActiveLink {
        conn_handle,
        encrypted: request.encrypted,
    });

    state.events.push(BridgeEvent::AuthenticationComplete {
        conn_handle,
        encrypted: request.encrypted,
    });

    (StatusCode::ACCEPTED, Json(ConnectResponse { conn_handle })).into_response()
}

async fn handle_disconnect(State(state): State<AppState>) -> axum::response::Response {
    let mut link = state.link.lock().await;
    let Some(active) = link.active else {
        return error_response(StatusCode::CONFLICT, "no client connected");
    };

    let disconnected = state.events.push(BridgeEvent::Disconnected {
        conn_handle: active.conn_handle,
        reason: REASON_REMOTE_USER_TERMINATED,
    });
    if !disconnected {
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "event queue closed");
    }
    link.active = None;
    StatusCode::ACCEPTED.into_response()
}

async fn handle_command(State(state): State<AppState>, body: String) -> axum::response::Response {
    let link = state.link.lock().await;
    match link.active {
        None => return error_response(StatusCode::CONFLICT, "no client connected"),
        Some(active) if !active.encrypted => {
            return error_response(StatusCode::FORBIDDEN, "encrypted link required")
        }
        Some(_) => {}
    }

    if state
        .events
        .push(BridgeEvent::CommandWritten(body.into_bytes()))
    {
        StatusCode::ACCEPTED.into_response()
    } else {
        error_response(StatusCode::SERVICE_UNAVAILABLE, "event queue full")
    }
}

async fn handle_mtu(
    State(state): State<AppState>,
    Json(request): Json<MtuRequest>,
) -> axum::response::Response {
    let link = state.link.lock().await;
    let Some(active) = link.active else {
        return error_response(StatusCode::CONFLICT, "no client connected");
    };

    state.events.push(BridgeEvent::MtuChanged {
        conn_handle: active.conn_handle,
        mtu: request.mtu,
    });
    StatusCode::ACCEPTED.into_response()
}

async fn handle_get_environment(State(state): State<AppState>) -> axum::response::Response {
    let payload = state
        .status
        .lock()
        .await
        .as_ref()
        .and_then(|status| status.environment_payload.clone());

    match payload {
        Some(payload) => payload.into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no reading published yet"),
    }
}

impl IrTransport for LoggingTransport {
    fn transmit(&mut self, timings: &[u16]) -> Result<(), IrError> {
        if let Some(&bad) = timings
            .iter()
            .find(|&&duration| duration == 0 || duration > MAX_PULSE_US)
        {
            return Err(IrError::InvalidPulse(bad));
        }

        let total_us: u64 = timings.iter().map(|&duration| u64::from(duration)).sum();
        info!(
            "IR: {} timings, {}ms on air",
            timings.len(),
            total_us / 1_000
        );
        Ok(())
    }
}

impl StatusIndicator for LogIndicator {
    fn set_lit(&mut self, lit: bool) {
        if self.lit != lit {
            self.lit = lit;
            debug!("status LED {}", if lit { "on" } else { "off" });
        }
    }
}

impl EnvironmentSensor for SimulatedSensor {
    fn read(&mut self) -> Result<EnvironmentReading, SensorError> {
        if self.asleep {
            return Err(SensorError::Bus("sensor is asleep".to_string()));
        }

        let step = self.samples % 20;
        self.samples = self.samples.wrapping_add(1);
        Ok(EnvironmentReading {
            temperature_c: 23.0 + (step as f32 - 10.0) * 0.05,
            relative_humidity_pct: 45.0 + (step % 7) as f32 * 0.3,
        })
    }

    fn sleep(&mut self) -> Result<(), SensorError> {
        self.asleep = true;
        info!("sensor sleep command sent");
        Ok(())
    }

    fn release_bus(&mut self) {
        info!("sensor bus lines floating");
    }
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("AIRCON_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.aircon"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use aircon_common::{Command, MitsubishiAc, SleepReason};

    use super::*;

    #[derive(Clone, Default)]
    struct StepLog(Rc<RefCell<Vec<&'static str>>>);

    impl StepLog {
        fn record(&self, step: &'static str) {
            self.0.borrow_mut().push(step);
        }
    }

    struct RecordingIndicator {
        log: StepLog,
        lit: bool,
    }

    impl StatusIndicator for RecordingIndicator {
        fn set_lit(&mut self, lit: bool) {
            self.lit = lit;
            self.log.record(if lit { "led on" } else { "led off" });
        }
    }

    struct RecordingSensor(StepLog);

    impl EnvironmentSensor for RecordingSensor {
        fn read(&mut self) -> Result<EnvironmentReading, SensorError> {
            Err(SensorError::Bus("unused".to_string()))
        }

        fn sleep(&mut self) -> Result<(), SensorError> {
            self.0.record("sensor sleep");
            Ok(())
        }

        fn release_bus(&mut self) {
            self.0.record("bus released");
        }
    }

    fn app_state() -> (AppState, EventReceiver) {
        let (events, receiver) = event_queue(DEFAULT_EVENT_QUEUE_DEPTH);
        let state = AppState {
            events,
            link: Arc::new(Mutex::new(SimulatedLink::default())),
            status: Arc::new(Mutex::new(None)),
        };
        (state, receiver)
    }

    #[test]
    fn sleep_plan_clears_indicator_then_quiesces_sensor() {
        let log = StepLog::default();
        let mut indicator = RecordingIndicator {
            log: log.clone(),
            lit: true,
        };
        let mut sensor = RecordingSensor(log.clone());
        let plan = SleepPlan {
            reason: SleepReason::IdleTimeout,
            wake_after_ms: 300_000,
        };

        execute_sleep_plan(plan, &mut indicator, &mut sensor);

        assert!(!indicator.lit);
        assert_eq!(
            log.0.borrow().clone(),
            vec!["led off", "sensor sleep", "bus released"]
        );
    }

    #[tokio::test]
    async fn disconnect_keeps_link_when_event_is_not_queued() {
        let (state, receiver) = app_state();
        state.link.lock().await.active = Some(ActiveLink {
            conn_handle: 4,
            encrypted: true,
        });
        drop(receiver);

        let response = handle_disconnect(State(state.clone())).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            state.link.lock().await.active.map(|active| active.conn_handle),
            Some(4)
        );
    }

    #[tokio::test]
    async fn disconnect_queues_event_and_clears_link() {
        let (state, receiver) = app_state();
        state.link.lock().await.active = Some(ActiveLink {
            conn_handle: 2,
            encrypted: true,
        });

        let response = handle_disconnect(State(state.clone())).await;

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(state.link.lock().await.active.is_none());
        assert_eq!(
            receiver.drain(),
            vec![BridgeEvent::Disconnected {
                conn_handle: 2,
                reason: REASON_REMOTE_USER_TERMINATED,
            }]
        );
    }

    #[test]
    fn logging_transport_accepts_a_full_frame() {
        let mut driver = AcDriver::new(LoggingTransport);
        let mut indicator = LogIndicator::default();
        let actions = aircon_common::translate(&Command::parse("TEMP:22;MODE:COOL;"));

        assert!(driver.execute(&actions, &mut indicator).is_ok());
        assert!(!indicator.lit);
        assert_eq!(driver.frames_sent(), 1);
    }

    #[test]
    fn logging_transport_rejects_zero_pulse() {
        let mut timings = MitsubishiAc::new().timings();
        timings[3] = 0;
        assert_eq!(
            LoggingTransport.transmit(&timings),
            Err(IrError::InvalidPulse(0))
        );
    }

    #[test]
    fn simulated_sensor_stops_after_sleep() {
        let mut sensor = SimulatedSensor::default();
        let reading = sensor.read().unwrap();
        assert!(reading.validate().is_ok());

        sensor.sleep().unwrap();
        assert!(sensor.read().is_err());
    }
}
