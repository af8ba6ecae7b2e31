use serde::Serialize;

use crate::{
    command::Command, environment::EnvironmentReading, mitsubishi::MitsubishiMode, session::Peer,
};

#[derive(Debug, Clone, Serialize)]
pub struct AcStatus {
    pub power: bool,
    pub mode: MitsubishiMode,
    #[serde(rename = "tempC")]
    pub temp_c: u8,
    pub frame: String,
    #[serde(rename = "framesSent")]
    pub frames_sent: u64,
    #[serde(rename = "failedTransmits")]
    pub failed_transmits: u64,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub connected: bool,
    pub peer: Option<Peer>,
    #[serde(rename = "powerState")]
    pub power_state: &'static str,
    #[serde(rename = "powerManaged")]
    pub power_managed: bool,
    #[serde(rename = "idleMs")]
    pub idle_ms: u64,
    #[serde(rename = "uptimeMs")]
    pub uptime_ms: u64,
    #[serde(rename = "lastCommand")]
    pub last_command: Option<Command>,
    #[serde(rename = "commandsReceived")]
    pub commands_received: u64,
    pub environment: Option<EnvironmentReading>,
    #[serde(rename = "environmentPayload")]
    pub environment_payload: Option<String>,
    #[serde(rename = "failedSensorReads")]
    pub failed_sensor_reads: u64,
    pub ac: AcStatus,
}
