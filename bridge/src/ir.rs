use std::{thread, time::Duration};

use anyhow::Context;
use esp_idf_hal::{
    gpio::OutputPin,
    peripheral::Peripheral,
    rmt::{
        config::{CarrierConfig, DutyPercent, TransmitConfig},
        PinState, Pulse, PulseTicks, RmtChannel, TxRmtDriver, VariableLengthSignal,
    },
    units::FromValueType,
};
use log::warn;
use serde::Serialize;

use aircon_common::{IrError, IrTransport};

use crate::esp::monotonic_ms;

// 80 MHz APB / 80 gives 1 µs ticks, matching the frame timings.
const IR_TICK_DIVIDER: u8 = 80;
const IR_DUTY_PERCENT: u8 = 33;
const MIN_SEND_INTERVAL_MS: u64 = 300;

enum IrBackend {
    Rmt(TxRmtDriver<'static>),
    Disabled,
}

pub struct IrTransmitter {
    backend: IrBackend,
    carrier_khz: u32,
    last_send_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IrDiagnostics {
    pub enabled: bool,
    #[serde(rename = "carrierKHz")]
    pub carrier_khz: u32,
    #[serde(rename = "minSendIntervalMs")]
    pub min_send_interval_ms: u64,
    #[serde(rename = "lastSendMs")]
    pub last_send_ms: Option<u64>,
}

impl IrTransmitter {
    pub fn new_with_carrier<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
        carrier_khz: u32,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let carrier = CarrierConfig::new()
            .frequency(carrier_khz.kHz().into())
            .carrier_level(PinState::High)
            .duty_percent(DutyPercent::new(IR_DUTY_PERCENT)?);

        let config = TransmitConfig::new()
            .clock_divider(IR_TICK_DIVIDER)
            .carrier(Some(carrier))
            .idle(Some(PinState::Low));

        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT IR driver")?;

        Ok(Self {
            backend: IrBackend::Rmt(tx),
            carrier_khz,
            last_send_ms: None,
        })
    }

    pub fn disabled(carrier_khz: u32) -> Self {
        Self {
            backend: IrBackend::Disabled,
            carrier_khz,
            last_send_ms: None,
        }
    }

    pub fn diagnostics(&self) -> IrDiagnostics {
        IrDiagnostics {
            enabled: matches!(self.backend, IrBackend::Rmt(_)),
            carrier_khz: self.carrier_khz,
            min_send_interval_ms: MIN_SEND_INTERVAL_MS,
            last_send_ms: self.last_send_ms,
        }
    }

    fn send_raw(&mut self, raw: &[u16]) -> Result<(), IrError> {
        if raw.is_empty() {
            return Ok(());
        }

        let IrBackend::Rmt(_) = self.backend else {
            warn!("IR disabled, dropping frame with {} timings", raw.len());
            return Err(IrError::Disabled);
        };

        let signal = build_signal(raw)?;
        self.rate_limit();

        if let IrBackend::Rmt(tx) = &mut self.backend {
            tx.start_blocking(&signal)
                .map_err(|err| IrError::Transmit(err.to_string()))?;
        }

        self.last_send_ms = Some(monotonic_ms());
        Ok(())
    }

    fn rate_limit(&mut self) {
        let now = monotonic_ms();
        if let Some(last) = self.last_send_ms {
            let elapsed = now.saturating_sub(last);
            if elapsed < MIN_SEND_INTERVAL_MS {
                thread::sleep(Duration::from_millis(MIN_SEND_INTERVAL_MS - elapsed));
            }
        }
    }
}

impl IrTransport for IrTransmitter {
    fn transmit(&mut self, timings: &[u16]) -> Result<(), IrError> {
        self.send_raw(timings)
    }
}

/// Marks on even indices, spaces on odd ones.
fn build_signal(raw: &[u16]) -> Result<VariableLengthSignal, IrError> {
    let mut pulses = Vec::with_capacity(raw.len());
    for (index, duration) in raw.iter().enumerate() {
        let level = if index % 2 == 0 {
            PinState::High
        } else {
            PinState::Low
        };

        let ticks = PulseTicks::new(*duration).map_err(|_| IrError::InvalidPulse(*duration))?;
        pulses.push(Pulse::new(level, ticks));
    }

    let pulse_refs: Vec<&Pulse> = pulses.iter().collect();
    let mut signal = VariableLengthSignal::with_capacity(pulses.len());
    signal
        .push(pulse_refs)
        .map_err(|err| IrError::Transmit(err.to_string()))?;
    Ok(signal)
}
