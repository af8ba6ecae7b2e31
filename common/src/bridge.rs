use log::{debug, info};

use crate::{
    command::Command,
    config::RuntimeConfig,
    environment::{EnvironmentReading, EnvironmentSampler},
    error::SensorError,
    events::BridgeEvent,
    power::{PowerController, PowerState, SleepPlan},
    session::{SessionAction, SessionState},
    translate::{translate, AcAction},
    types::{AcStatus, BridgeStatus},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeAction {
    Session(SessionAction),
    Ac(AcAction),
}

/// Control-loop state for the receiver. Every event and tick goes through
/// here, and the caller applies the returned actions to the hardware.
#[derive(Debug, Clone)]
pub struct BridgeEngine {
    session: SessionState,
    power: PowerController,
    sampler: Option<EnvironmentSampler>,
    boot_ms: u64,
    last_command: Option<Command>,
    commands_received: u64,
}

impl BridgeEngine {
    pub fn new(config: &RuntimeConfig, now_ms: u64) -> Self {
        let sampler = config
            .sensor
            .enabled
            .then(|| EnvironmentSampler::new(config.sensor.sample_period_ms));

        Self {
            session: SessionState::new(config.ble.connection, now_ms),
            power: PowerController::new(config.power),
            sampler,
            boot_ms: now_ms,
            last_command: None,
            commands_received: 0,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn power_state(&self) -> PowerState {
        self.power.state()
    }

    pub fn last_command(&self) -> Option<&Command> {
        self.last_command.as_ref()
    }

    pub fn published_payload(&self) -> Option<String> {
        self.sampler
            .as_ref()
            .and_then(EnvironmentSampler::published_payload)
    }

    pub fn handle_event(&mut self, event: BridgeEvent, now_ms: u64) -> Vec<BridgeAction> {
        match event {
            BridgeEvent::Connected {
                conn_handle,
                address,
            } => session_actions(self.session.on_connect(conn_handle, address, now_ms)),
            BridgeEvent::Disconnected {
                conn_handle,
                reason,
            } => session_actions(self.session.on_disconnect(conn_handle, reason, now_ms)),
            BridgeEvent::AuthenticationComplete {
                conn_handle,
                encrypted,
            } => session_actions(
                self.session
                    .on_authentication_complete(conn_handle, encrypted),
            ),
            BridgeEvent::MtuChanged { conn_handle, mtu } => {
                info!("MTU updated: {mtu} (handle {conn_handle})");
                Vec::new()
            }
            BridgeEvent::CommandWritten(payload) => self.handle_command(&payload, now_ms),
        }
    }

    fn handle_command(&mut self, payload: &[u8], now_ms: u64) -> Vec<BridgeAction> {
        if payload.is_empty() {
            debug!("empty command ignored");
            return Vec::new();
        }

        let text = String::from_utf8_lossy(payload);
        let command = Command::parse(&text);
        info!(
            "command received: {text:?} -> temp={} mode={} preset={}",
            command.temperature,
            command.mode.as_str(),
            command.preset
        );

        self.session.touch(now_ms);
        self.commands_received = self.commands_received.saturating_add(1);
        let actions = translate(&command)
            .into_iter()
            .map(BridgeAction::Ac)
            .collect();
        self.last_command = Some(command);
        actions
    }

    /// Runs the power rules. A returned plan must be executed before the
    /// next tick.
    pub fn tick(&mut self, now_ms: u64) -> Option<SleepPlan> {
        self.power.tick(&self.session, now_ms)
    }

    pub fn sample_due(&self, now_ms: u64) -> bool {
        self.power.state() != PowerState::Sleeping
            && self
                .sampler
                .as_ref()
                .is_some_and(|sampler| sampler.is_due(now_ms))
    }

    pub fn record_sample(
        &mut self,
        result: Result<EnvironmentReading, SensorError>,
        now_ms: u64,
    ) -> Option<String> {
        self.sampler
            .as_mut()
            .and_then(|sampler| sampler.record(result, now_ms))
    }

    pub fn status(&self, now_ms: u64, ac: AcStatus) -> BridgeStatus {
        let sampler = self.sampler.as_ref();
        BridgeStatus {
            connected: self.session.is_connected(),
            peer: self.session.peer().cloned(),
            power_state: self.power.state().as_str(),
            power_managed: self.power.config().enabled,
            idle_ms: self.session.idle_ms(now_ms),
            uptime_ms: now_ms.saturating_sub(self.boot_ms),
            last_command: self.last_command.clone(),
            commands_received: self.commands_received,
            environment: sampler.and_then(EnvironmentSampler::published),
            environment_payload: sampler.and_then(EnvironmentSampler::published_payload),
            failed_sensor_reads: sampler.map(EnvironmentSampler::failed_reads).unwrap_or(0),
            ac,
        }
    }
}

fn session_actions(actions: Vec<SessionAction>) -> Vec<BridgeAction> {
    actions.into_iter().map(BridgeAction::Session).collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        command::AcMode, config::ConnectionParams, mitsubishi::MitsubishiMode, power::SleepReason,
    };

    fn power_managed() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.power.enabled = true;
        config.power.advertising_window_ms = 60_000;
        config.power.idle_timeout_ms = 120_000;
        config.sensor.enabled = true;
        config.sensor.sample_period_ms = 30_000;
        config
    }

    fn connect(engine: &mut BridgeEngine, now_ms: u64) -> Vec<BridgeAction> {
        engine.handle_event(
            BridgeEvent::Connected {
                conn_handle: 1,
                address: "11:22:33:44:55:66".to_string(),
            },
            now_ms,
        )
    }

    fn write(engine: &mut BridgeEngine, payload: &str, now_ms: u64) -> Vec<BridgeAction> {
        engine.handle_event(BridgeEvent::CommandWritten(payload.as_bytes().to_vec()), now_ms)
    }

    #[test]
    fn connect_requests_connection_parameters() {
        let mut engine = BridgeEngine::new(&RuntimeConfig::default(), 0);
        assert_eq!(
            connect(&mut engine, 10),
            vec![BridgeAction::Session(SessionAction::UpdateConnParams {
                conn_handle: 1,
                params: ConnectionParams::default(),
            })]
        );
        assert!(engine.session().is_connected());
    }

    #[test]
    fn heat_command_drives_the_ac() {
        let mut engine = BridgeEngine::new(&RuntimeConfig::default(), 0);
        connect(&mut engine, 0);

        assert_eq!(
            write(&mut engine, "TEMP:18;MODE:HEAT;", 5_000),
            vec![
                BridgeAction::Ac(AcAction::PowerOn),
                BridgeAction::Ac(AcAction::SetMode(MitsubishiMode::Heat)),
                BridgeAction::Ac(AcAction::SetTemp(18)),
                BridgeAction::Ac(AcAction::Transmit),
            ]
        );

        let command = engine.last_command().unwrap();
        assert_eq!(command.temperature, 18);
        assert_eq!(command.mode, AcMode::Heat);
        assert_eq!(command.preset, "NORMAL");
        assert_eq!(engine.session().last_activity_ms(), 5_000);
    }

    #[test]
    fn empty_write_is_a_no_op() {
        let mut engine = BridgeEngine::new(&RuntimeConfig::default(), 0);
        connect(&mut engine, 100);

        assert!(write(&mut engine, "", 9_000).is_empty());
        assert_eq!(engine.session().last_activity_ms(), 100);
        assert!(engine.last_command().is_none());
    }

    #[test]
    fn mode_off_only_powers_down() {
        let mut engine = BridgeEngine::new(&RuntimeConfig::default(), 0);
        assert_eq!(
            write(&mut engine, "MODE:off", 1),
            vec![
                BridgeAction::Ac(AcAction::PowerOff),
                BridgeAction::Ac(AcAction::Transmit),
            ]
        );
    }

    #[test]
    fn non_utf8_payload_still_parses() {
        let mut engine = BridgeEngine::new(&RuntimeConfig::default(), 0);
        let mut payload = b"TEMP:22;MODE:COOL;PRESET:".to_vec();
        payload.push(0xFF);

        let actions = engine.handle_event(BridgeEvent::CommandWritten(payload), 1);
        assert_eq!(actions[2], BridgeAction::Ac(AcAction::SetTemp(22)));
    }

    #[test]
    fn unencrypted_link_is_disconnected() {
        let mut engine = BridgeEngine::new(&RuntimeConfig::default(), 0);
        connect(&mut engine, 0);

        assert_eq!(
            engine.handle_event(
                BridgeEvent::AuthenticationComplete {
                    conn_handle: 1,
                    encrypted: false,
                },
                1,
            ),
            vec![BridgeAction::Session(SessionAction::Disconnect {
                conn_handle: 1
            })]
        );
    }

    #[test]
    fn disconnect_restarts_advertising_and_window() {
        let mut engine = BridgeEngine::new(&power_managed(), 0);
        connect(&mut engine, 1_000);

        assert_eq!(
            engine.handle_event(
                BridgeEvent::Disconnected {
                    conn_handle: 1,
                    reason: 0x13,
                },
                50_000,
            ),
            vec![BridgeAction::Session(SessionAction::RestartAdvertising)]
        );
        assert_eq!(engine.tick(110_000), None);
        assert_eq!(
            engine.tick(110_001).map(|plan| plan.reason),
            Some(SleepReason::AdvertisingWindowElapsed)
        );
    }

    #[test]
    fn commands_keep_a_connected_bridge_awake() {
        let mut engine = BridgeEngine::new(&power_managed(), 0);
        connect(&mut engine, 0);

        write(&mut engine, "TEMP:22;MODE:COOL;", 100_000);
        assert_eq!(engine.tick(220_000), None);
        assert_eq!(engine.power_state(), PowerState::AwakeConnected);

        let plan = engine.tick(220_001).unwrap();
        assert_eq!(plan.reason, SleepReason::IdleTimeout);
        assert_eq!(plan.wake_after_ms, 300_000);
        assert!(!engine.sample_due(400_000));
    }

    #[test]
    fn basic_variant_never_sleeps() {
        let mut engine = BridgeEngine::new(&RuntimeConfig::default(), 0);
        assert_eq!(engine.tick(u64::MAX / 2), None);
        assert!(!engine.sample_due(0));
    }

    #[test]
    fn sampler_publishes_and_reports_status() {
        let mut engine = BridgeEngine::new(&power_managed(), 0);
        assert!(engine.sample_due(0));

        let reading = EnvironmentReading {
            temperature_c: 21.04,
            relative_humidity_pct: 48.26,
        };
        assert_eq!(
            engine.record_sample(Ok(reading), 0),
            Some("T=21.0;H=48.3;".to_string())
        );
        assert!(!engine.sample_due(29_999));
        assert_eq!(engine.published_payload(), Some("T=21.0;H=48.3;".to_string()));

        engine.record_sample(Err(SensorError::Bus("nack".to_string())), 30_000);

        let ac = crate::driver::AcDriver::new(NullTransport).status();
        let status = engine.status(31_000, ac);
        assert_eq!(status.environment, Some(reading));
        assert_eq!(status.failed_sensor_reads, 1);
        assert_eq!(status.power_state, "AWAKE_ADVERTISING");
        assert_eq!(status.uptime_ms, 31_000);
        assert!(!status.connected);
    }

    struct NullTransport;

    impl crate::driver::IrTransport for NullTransport {
        fn transmit(&mut self, _timings: &[u16]) -> Result<(), crate::error::IrError> {
            Ok(())
        }
    }
}
