use core::convert::TryInto;
use std::{
    sync::{Arc, OnceLock},
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use esp32_nimble::{
    enums::{AuthReq, SecurityIOCap},
    utilities::{mutex::Mutex, BleUuid},
    BLEAdvertisementData, BLEAdvertising, BLECharacteristic, BLEDevice, BLEServer,
    NimbleProperties,
};
use esp_idf_hal::{
    delay::{Ets, FreeRtos, BLOCK},
    gpio::{AnyIOPin, AnyOutputPin, Output, PinDriver},
    i2c::{I2cConfig, I2cDriver, I2C0},
    units::FromValueType,
};
use esp_idf_svc::{
    hal::{prelude::Peripherals, rmt::RMT},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
};
use log::{info, warn, LevelFilter};

use aircon_common::{
    gatt, shtc3, AcDriver, BleConfig, BridgeAction, BridgeEngine, BridgeEvent, EnvironmentReading,
    EnvironmentSensor, EventSender, IrHardwareConfig, RuntimeConfig, SensorConfig, SensorError,
    SessionAction, SleepPlan, SleepStep, StatusIndicator, DEFAULT_EVENT_QUEUE_DEPTH,
};

use crate::ir::IrTransmitter;

const NVS_NAMESPACE: &str = "aircon";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const WATCHDOG_TIMEOUT_SEC: u32 = 10;
const STATUS_LOG_INTERVAL_MS: u64 = 60_000;
const I2C_BAUDRATE_KHZ: u32 = 100;

struct StatusLed {
    pin: Option<PinDriver<'static, AnyOutputPin, Output>>,
    lit: bool,
}

struct Shtc3 {
    i2c: Option<I2cDriver<'static>>,
    config: SensorConfig,
}

struct BleLink {
    server: &'static mut BLEServer,
    advertising: &'static Mutex<BLEAdvertising>,
    environment: Arc<Mutex<BLECharacteristic>>,
}

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();
    log::set_max_level(if cfg!(feature = "diagnostics") {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    });

    let nvs_store = NvsStore {
        partition: EspDefaultNvsPartition::take()?,
    };
    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sanitize();

    info!(
        "config loaded: name=`{}`, power_managed={}, sensor={}",
        runtime.ble.advertised_name, runtime.power.enabled, runtime.sensor.enabled
    );

    let Peripherals { rmt, i2c0, .. } = Peripherals::take()?;

    let transmitter = match init_ir_transmitter(rmt, &runtime.ir) {
        Ok(transmitter) => {
            info!(
                "IR transmitter initialized on RMT channel{} / GPIO{} @ {}kHz",
                runtime.ir.rmt_channel, runtime.ir.tx_pin, runtime.ir.carrier_khz
            );
            transmitter
        }
        Err(err) => {
            warn!("failed to initialize IR transmitter, running disabled: {err:#}");
            IrTransmitter::disabled(runtime.ir.carrier_khz)
        }
    };

    let mut sensor = if runtime.sensor.enabled {
        match Shtc3::new(i2c0, runtime.sensor) {
            Ok(sensor) => Some(sensor),
            Err(err) => {
                warn!("SHTC3 unavailable, sampling disabled: {err:#}");
                None
            }
        }
    } else {
        None
    };

    let (events, receiver) = aircon_common::event_queue(DEFAULT_EVENT_QUEUE_DEPTH);
    let mut ble = setup_ble(&runtime.ble, events)?;
    ble.start_advertising();

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    if let Err(err) = add_current_task_to_watchdog() {
        warn!("failed to register control loop with watchdog: {err:#}");
    }

    let mut status_led = init_status_led(runtime.status_led_pin);
    let mut driver = AcDriver::new(transmitter);
    let mut engine = BridgeEngine::new(&runtime, monotonic_ms());
    let loop_interval = Duration::from_millis(runtime.power.loop_interval_ms);
    let mut last_status_log_ms = 0_u64;

    loop {
        feed_watchdog();
        let now_ms = monotonic_ms();

        for event in receiver.drain() {
            for action in engine.handle_event(event, now_ms) {
                match action {
                    BridgeAction::Session(action) => ble.apply(action),
                    BridgeAction::Ac(action) => {
                        // Failures are already counted and logged by the driver.
                        let _ = driver.execute(&[action], &mut status_led);
                    }
                }
            }
        }

        if engine.sample_due(now_ms) {
            let result = match sensor.as_mut() {
                Some(sensor) => sensor.read(),
                None => Err(SensorError::Bus("sensor not initialized".to_string())),
            };
            if let Some(payload) = engine.record_sample(result, now_ms) {
                ble.publish_environment(&payload);
            }
        }

        if let Some(plan) = engine.tick(now_ms) {
            enter_sleep(plan, &mut ble, &mut status_led, sensor.as_mut());
        }

        if cfg!(feature = "diagnostics")
            && now_ms.saturating_sub(last_status_log_ms) >= STATUS_LOG_INTERVAL_MS
        {
            last_status_log_ms = now_ms;
            match serde_json::to_string(&engine.status(now_ms, driver.status())) {
                Ok(status) => info!("status: {status}"),
                Err(err) => warn!("status serialization failed: {err}"),
            }
            match serde_json::to_string(&driver.transport().diagnostics()) {
                Ok(diagnostics) => info!("ir: {diagnostics}"),
                Err(err) => warn!("IR diagnostics serialization failed: {err}"),
            }
        }

        thread::sleep(loop_interval);
    }
}

fn setup_ble(config: &BleConfig, events: EventSender) -> anyhow::Result<BleLink> {
    let device = BLEDevice::take();
    BLEDevice::set_device_name(&config.device_name)
        .map_err(|err| anyhow!("failed to set BLE device name: {err:?}"))?;
    device
        .security()
        .set_auth(AuthReq::Bond | AuthReq::Mitm | AuthReq::Sc)
        .set_io_cap(SecurityIOCap::NoInputNoOutput);

    let server = device.get_server();
    server.advertise_on_disconnect(false);

    let on_connect = events.clone();
    server.on_connect(move |_server, desc| {
        on_connect.push(BridgeEvent::Connected {
            conn_handle: desc.conn_handle(),
            address: desc.address().to_string(),
        });
    });

    let on_disconnect = events.clone();
    server.on_disconnect(move |desc, reason| {
        let reason = match reason {
            Ok(()) => 0,
            Err(err) => err.code() as i32,
        };
        on_disconnect.push(BridgeEvent::Disconnected {
            conn_handle: desc.conn_handle(),
            reason,
        });
    });

    let on_auth = events.clone();
    server.on_authentication_complete(move |desc, result| {
        on_auth.push(BridgeEvent::AuthenticationComplete {
            conn_handle: desc.conn_handle(),
            encrypted: result.is_ok() && desc.encrypted(),
        });
    });

    let service = server.create_service(BleUuid::from_uuid16(gatt::SERVICE_UUID));

    let command = service.lock().create_characteristic(
        BleUuid::from_uuid16(gatt::COMMAND_CHAR_UUID),
        NimbleProperties::READ
            | NimbleProperties::WRITE
            | NimbleProperties::READ_ENC
            | NimbleProperties::WRITE_ENC,
    );
    command.lock().set_value(gatt::COMMAND_INITIAL_VALUE);
    command.lock().on_write(move |args| {
        events.push(BridgeEvent::CommandWritten(args.recv_data().to_vec()));
    });

    let environment = service.lock().create_characteristic(
        BleUuid::from_uuid16(gatt::ENVIRONMENT_CHAR_UUID),
        NimbleProperties::READ | NimbleProperties::NOTIFY,
    );

    let advertising = device.get_advertising();
    advertising
        .lock()
        .scan_response(false)
        .set_data(
            BLEAdvertisementData::new()
                .name(&config.advertised_name)
                .add_service_uuid(BleUuid::from_uuid16(gatt::SERVICE_UUID)),
        )
        .map_err(|err| anyhow!("failed to set advertisement data: {err:?}"))?;

    info!(
        "BLE service {:#06x} ready as `{}`",
        gatt::SERVICE_UUID,
        config.advertised_name
    );

    Ok(BleLink {
        server,
        advertising,
        environment,
    })
}

impl BleLink {
    fn apply(&mut self, action: SessionAction) {
        match action {
            SessionAction::UpdateConnParams {
                conn_handle,
                params,
            } => {
                if let Err(err) = self.server.update_conn_params(
                    conn_handle,
                    params.min_interval,
                    params.max_interval,
                    params.latency,
                    params.supervision_timeout,
                ) {
                    warn!("connection parameter update failed: {err:?}");
                }
            }
            SessionAction::Disconnect { conn_handle } => {
                if let Err(err) = self.server.disconnect(conn_handle) {
                    warn!("failed to disconnect handle {conn_handle}: {err:?}");
                }
            }
            SessionAction::RestartAdvertising => self.start_advertising(),
        }
    }

    fn start_advertising(&mut self) {
        match self.advertising.lock().start() {
            Ok(()) => info!("advertising started"),
            Err(err) => warn!("failed to start advertising: {err:?}"),
        }
    }

    fn stop_advertising(&mut self) {
        if let Err(err) = self.advertising.lock().stop() {
            warn!("failed to stop advertising: {err:?}");
        }
    }

    fn publish_environment(&mut self, payload: &str) {
        self.environment
            .lock()
            .set_value(payload.as_bytes())
            .notify();
    }
}

fn enter_sleep(
    plan: SleepPlan,
    ble: &mut BleLink,
    status_led: &mut StatusLed,
    mut sensor: Option<&mut Shtc3>,
) {
    for step in plan.steps() {
        match step {
            SleepStep::StopAdvertising => ble.stop_advertising(),
            SleepStep::ClearStatusIndicator => status_led.set_lit(false),
            SleepStep::QuiesceSensor => {
                if let Some(sensor) = sensor.as_deref_mut() {
                    if let Err(err) = sensor.sleep() {
                        warn!("failed to put SHTC3 to sleep: {err}");
                    }
                }
            }
            SleepStep::ReleaseSensorBus => {
                if let Some(sensor) = sensor.as_deref_mut() {
                    sensor.release_bus();
                }
            }
            SleepStep::ArmWakeTimer { wake_after_ms } => {
                let rc = unsafe {
                    esp_idf_svc::sys::esp_sleep_enable_timer_wakeup(
                        wake_after_ms.saturating_mul(1_000),
                    )
                };
                if rc != esp_idf_svc::sys::ESP_OK {
                    warn!("failed to arm wake timer: esp_err_t={rc}");
                }
            }
            SleepStep::Suspend => {
                info!("suspending for {}ms", plan.wake_after_ms);
                unsafe { esp_idf_svc::sys::esp_deep_sleep_start() };
            }
        }
    }
}

impl StatusIndicator for StatusLed {
    fn set_lit(&mut self, lit: bool) {
        let Some(pin) = self.pin.as_mut() else {
            return;
        };

        if lit == self.lit {
            return;
        }

        let result = if lit { pin.set_high() } else { pin.set_low() };
        if let Err(err) = result {
            warn!("failed to drive status LED: {err}");
        } else {
            self.lit = lit;
        }
    }
}

impl Shtc3 {
    fn new(i2c: I2C0, config: SensorConfig) -> anyhow::Result<Self> {
        let sda = unsafe { AnyIOPin::new(config.sda_pin) };
        let scl = unsafe { AnyIOPin::new(config.scl_pin) };
        let i2c_config = I2cConfig::new().baudrate(I2C_BAUDRATE_KHZ.kHz().into());
        let driver = I2cDriver::new(i2c, sda, scl, &i2c_config).context("failed to init I2C")?;

        let mut sensor = Self {
            i2c: Some(driver),
            config,
        };
        sensor.command(shtc3::CMD_WAKEUP)?;
        Ets::delay_us(shtc3::WAKEUP_DELAY_US);
        sensor.command(shtc3::CMD_SOFT_RESET)?;
        Ets::delay_us(shtc3::WAKEUP_DELAY_US);

        let mut id = [0_u8; 3];
        sensor.command(shtc3::CMD_READ_ID)?;
        sensor.read_into(&mut id)?;
        let id = shtc3::decode_id(&id)?;
        info!(
            "SHTC3 found at {:#04x} (id {id:#06x}) on SDA{} / SCL{}",
            config.i2c_address, config.sda_pin, config.scl_pin
        );
        sensor.command(shtc3::CMD_SLEEP)?;

        Ok(sensor)
    }

    fn command(&mut self, command: u16) -> Result<(), SensorError> {
        let address = self.config.i2c_address;
        let i2c = self.bus()?;
        i2c.write(address, &shtc3::command_bytes(command), BLOCK)
            .map_err(|err| SensorError::Bus(err.to_string()))
    }

    fn read_into(&mut self, buf: &mut [u8]) -> Result<(), SensorError> {
        let address = self.config.i2c_address;
        let i2c = self.bus()?;
        i2c.read(address, buf, BLOCK)
            .map_err(|err| SensorError::Bus(err.to_string()))
    }

    fn bus(&mut self) -> Result<&mut I2cDriver<'static>, SensorError> {
        self.i2c
            .as_mut()
            .ok_or_else(|| SensorError::Bus("I2C bus released".to_string()))
    }
}

impl EnvironmentSensor for Shtc3 {
    fn read(&mut self) -> Result<EnvironmentReading, SensorError> {
        self.command(shtc3::CMD_WAKEUP)?;
        Ets::delay_us(shtc3::WAKEUP_DELAY_US);
        self.command(shtc3::CMD_MEASURE_T_FIRST)?;
        FreeRtos::delay_ms(shtc3::MEASUREMENT_DELAY_MS);

        let mut buf = [0_u8; shtc3::MEASUREMENT_LEN];
        let read = self.read_into(&mut buf);
        let slept = self.command(shtc3::CMD_SLEEP);
        read?;
        slept?;

        shtc3::decode_measurement(&buf)
    }

    fn sleep(&mut self) -> Result<(), SensorError> {
        self.command(shtc3::CMD_SLEEP)
    }

    fn release_bus(&mut self) {
        drop(self.i2c.take());
        for pin in [self.config.sda_pin, self.config.scl_pin] {
            let rc = unsafe {
                esp_idf_svc::sys::gpio_reset_pin(pin);
                esp_idf_svc::sys::gpio_set_direction(
                    pin,
                    esp_idf_svc::sys::gpio_mode_t_GPIO_MODE_INPUT,
                );
                esp_idf_svc::sys::gpio_set_pull_mode(
                    pin,
                    esp_idf_svc::sys::gpio_pull_mode_t_GPIO_FLOATING,
                )
            };
            if rc != esp_idf_svc::sys::ESP_OK {
                warn!("failed to float GPIO{pin}: esp_err_t={rc}");
            }
        }
    }
}

fn init_ir_transmitter(rmt: RMT, ir: &IrHardwareConfig) -> anyhow::Result<IrTransmitter> {
    if ir.tx_pin < 0 {
        return Err(anyhow!("invalid tx pin: {}", ir.tx_pin));
    }

    let pin = ir.tx_pin;
    let carrier_khz = ir.carrier_khz;

    match ir.rmt_channel {
        0 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel0, AnyOutputPin::new(pin), carrier_khz)
        },
        1 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel1, AnyOutputPin::new(pin), carrier_khz)
        },
        2 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel2, AnyOutputPin::new(pin), carrier_khz)
        },
        3 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel3, AnyOutputPin::new(pin), carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        4 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel4, AnyOutputPin::new(pin), carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        5 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel5, AnyOutputPin::new(pin), carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        6 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel6, AnyOutputPin::new(pin), carrier_khz)
        },
        #[cfg(any(esp32, esp32s3))]
        7 => unsafe {
            IrTransmitter::new_with_carrier(rmt.channel7, AnyOutputPin::new(pin), carrier_khz)
        },
        _ => Err(anyhow!("unsupported RMT channel: {}", ir.rmt_channel)),
    }
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 2048];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => {
                warn!("no runtime config in NVS, using defaults");
                Ok(RuntimeConfig::default())
            }
        }
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn init_status_led(pin: i32) -> StatusLed {
    let driver = unsafe { PinDriver::output(AnyOutputPin::new(pin)) };
    match driver {
        Ok(mut driver) => {
            let _ = driver.set_low();
            StatusLed {
                pin: Some(driver),
                lit: false,
            }
        }
        Err(err) => {
            warn!("status LED unavailable on GPIO{pin}: {err}");
            StatusLed {
                pin: None,
                lit: false,
            }
        }
    }
}

pub(crate) fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
