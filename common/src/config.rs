use serde::{Deserialize, Serialize};

use crate::{mitsubishi, shtc3};

/// BLE connection parameters requested after a client connects. Intervals are
/// in 1.25 ms units, the supervision timeout in 10 ms units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub min_interval: u16,
    pub max_interval: u16,
    pub latency: u16,
    pub supervision_timeout: u16,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            min_interval: 24,
            max_interval: 48,
            latency: 0,
            supervision_timeout: 180,
        }
    }
}

impl ConnectionParams {
    pub fn sanitize(&mut self) {
        self.min_interval = self.min_interval.clamp(6, 3200);
        self.max_interval = self.max_interval.clamp(self.min_interval, 3200);
        self.latency = self.latency.min(499);
        self.supervision_timeout = self.supervision_timeout.clamp(10, 3200);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BleConfig {
    pub device_name: String,
    pub advertised_name: String,
    #[serde(default)]
    pub connection: ConnectionParams,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            device_name: "NimBLE".to_string(),
            advertised_name: "NimBLE-Server".to_string(),
            connection: ConnectionParams::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IrHardwareConfig {
    pub tx_pin: i32,
    pub rmt_channel: u8,
    pub carrier_khz: u32,
}

impl Default for IrHardwareConfig {
    fn default() -> Self {
        Self {
            tx_pin: 7,
            rmt_channel: 0,
            carrier_khz: mitsubishi::CARRIER_KHZ,
        }
    }
}

impl IrHardwareConfig {
    pub fn sanitize(&mut self) {
        if self.tx_pin < 0 {
            self.tx_pin = 7;
        }

        if self.rmt_channel > 7 {
            self.rmt_channel = 0;
        }

        self.carrier_khz = self.carrier_khz.clamp(10, 100);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PowerConfig {
    /// When false the bridge stays awake and advertising forever.
    pub enabled: bool,
    pub advertising_window_ms: u64,
    pub idle_timeout_ms: u64,
    pub sleep_duration_ms: u64,
    pub loop_interval_ms: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            advertising_window_ms: 60_000,
            idle_timeout_ms: 120_000,
            sleep_duration_ms: 300_000,
            loop_interval_ms: 200,
        }
    }
}

impl PowerConfig {
    pub fn sanitize(&mut self) {
        self.advertising_window_ms = self.advertising_window_ms.max(1_000);
        self.idle_timeout_ms = self.idle_timeout_ms.max(1_000);
        self.sleep_duration_ms = self.sleep_duration_ms.clamp(1_000, 86_400_000);
        self.loop_interval_ms = self.loop_interval_ms.clamp(10, 5_000);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SensorConfig {
    pub enabled: bool,
    pub i2c_address: u8,
    pub sda_pin: i32,
    pub scl_pin: i32,
    pub sample_period_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            i2c_address: shtc3::DEFAULT_ADDRESS,
            sda_pin: 8,
            scl_pin: 9,
            sample_period_ms: 30_000,
        }
    }
}

impl SensorConfig {
    pub fn sanitize(&mut self) {
        if self.i2c_address > 0x7F {
            self.i2c_address = shtc3::DEFAULT_ADDRESS;
        }
        if self.sda_pin < 0 {
            self.sda_pin = 8;
        }
        if self.scl_pin < 0 {
            self.scl_pin = 9;
        }
        self.sample_period_ms = self.sample_period_ms.max(1_000);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub ble: BleConfig,
    #[serde(default)]
    pub ir: IrHardwareConfig,
    #[serde(default)]
    pub power: PowerConfig,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default = "default_status_led_pin")]
    pub status_led_pin: i32,
}

fn default_status_led_pin() -> i32 {
    12
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            ble: BleConfig::default(),
            ir: IrHardwareConfig::default(),
            power: PowerConfig::default(),
            sensor: SensorConfig::default(),
            status_led_pin: default_status_led_pin(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.ble.connection.sanitize();
        self.ir.sanitize();
        self.power.sanitize();
        self.sensor.sanitize();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_json_loads_defaults() {
        let runtime: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(runtime, RuntimeConfig::default());
    }

    #[test]
    fn partial_json_keeps_other_sections() {
        let runtime: RuntimeConfig = serde_json::from_str(
            r#"{"power":{"enabled":true,"advertising_window_ms":5000,"idle_timeout_ms":9000,"sleep_duration_ms":60000,"loop_interval_ms":100}}"#,
        )
        .unwrap();

        assert!(runtime.power.enabled);
        assert_eq!(runtime.power.idle_timeout_ms, 9_000);
        assert_eq!(runtime.ir, IrHardwareConfig::default());
        assert_eq!(runtime.status_led_pin, 12);
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let mut runtime = RuntimeConfig::default();
        runtime.ir.tx_pin = -1;
        runtime.ir.rmt_channel = 9;
        runtime.ir.carrier_khz = 500;
        runtime.power.loop_interval_ms = 0;
        runtime.sensor.i2c_address = 0xF0;
        runtime.ble.connection.min_interval = 100;
        runtime.ble.connection.max_interval = 50;

        runtime.sanitize();

        assert_eq!(runtime.ir.tx_pin, 7);
        assert_eq!(runtime.ir.rmt_channel, 0);
        assert_eq!(runtime.ir.carrier_khz, 100);
        assert_eq!(runtime.power.loop_interval_ms, 10);
        assert_eq!(runtime.sensor.i2c_address, shtc3::DEFAULT_ADDRESS);
        assert_eq!(runtime.ble.connection.max_interval, 100);
    }
}
