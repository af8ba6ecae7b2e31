//! Mitsubishi 144-bit air-conditioner IR protocol.
//!
//! The remote sends its complete state on every key press: an 18-byte frame,
//! least significant bit first, transmitted twice. Byte 17 is the 8-bit sum of
//! the preceding bytes.

use log::warn;
use serde::Serialize;

pub const STATE_LENGTH: usize = 18;
pub const MIN_TEMP_C: u8 = 16;
pub const MAX_TEMP_C: u8 = 31;
pub const CARRIER_KHZ: u32 = 38;
/// The frame is always sent once and then repeated once.
pub const FRAME_SENDS: usize = 2;

pub const HDR_MARK_US: u16 = 3400;
pub const HDR_SPACE_US: u16 = 1750;
pub const BIT_MARK_US: u16 = 450;
pub const ONE_SPACE_US: u16 = 1300;
pub const ZERO_SPACE_US: u16 = 420;
pub const RPT_MARK_US: u16 = 440;
pub const RPT_SPACE_US: u16 = 17100;

const HEADER: [u8; 5] = [0x23, 0xCB, 0x26, 0x01, 0x00];

const POWER_BYTE: usize = 5;
const POWER_BIT: u8 = 0x20;
const MODE_BYTE: usize = 6;
const MODE_SHIFT: u8 = 3;
const TEMP_BYTE: usize = 7;
const MODE_AUX_BYTE: usize = 8;
const FAN_BYTE: usize = 9;
const FAN_AUTO_BIT: u8 = 0x80;
const CHECKSUM_BYTE: usize = STATE_LENGTH - 1;

/// Target-side operating modes understood by the indoor unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MitsubishiMode {
    Auto,
    Cool,
    Dry,
    Heat,
    Fan,
}

impl MitsubishiMode {
    fn code(self) -> u8 {
        match self {
            Self::Heat => 0b001,
            Self::Dry => 0b010,
            Self::Cool => 0b011,
            Self::Auto => 0b100,
            Self::Fan => 0b111,
        }
    }

    fn aux(self) -> u8 {
        match self {
            Self::Auto | Self::Heat => 0b0011_0000,
            Self::Cool => 0b0011_0110,
            Self::Dry => 0b0011_0010,
            Self::Fan => 0b0011_0111,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0b001 => Some(Self::Heat),
            0b010 => Some(Self::Dry),
            0b011 => Some(Self::Cool),
            0b100 => Some(Self::Auto),
            0b111 => Some(Self::Fan),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MitsubishiAc {
    state: [u8; STATE_LENGTH],
}

impl Default for MitsubishiAc {
    fn default() -> Self {
        let mut ac = Self {
            state: [0; STATE_LENGTH],
        };
        ac.state[..HEADER.len()].copy_from_slice(&HEADER);
        ac.state[FAN_BYTE] = FAN_AUTO_BIT;
        ac.set_mode(MitsubishiMode::Auto);
        ac.set_temp(24);
        ac
    }
}

impl MitsubishiAc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self) {
        self.state[POWER_BYTE] |= POWER_BIT;
    }

    pub fn off(&mut self) {
        self.state[POWER_BYTE] &= !POWER_BIT;
    }

    pub fn is_on(&self) -> bool {
        self.state[POWER_BYTE] & POWER_BIT != 0
    }

    pub fn set_mode(&mut self, mode: MitsubishiMode) {
        self.state[MODE_BYTE] = mode.code() << MODE_SHIFT;
        self.state[MODE_AUX_BYTE] = mode.aux();
    }

    pub fn mode(&self) -> MitsubishiMode {
        MitsubishiMode::from_code(self.state[MODE_BYTE] >> MODE_SHIFT)
            .unwrap_or(MitsubishiMode::Auto)
    }

    /// Sets the target temperature in °C, clamped to what the unit accepts.
    pub fn set_temp(&mut self, temp_c: i32) -> u8 {
        let clamped = temp_c.clamp(i32::from(MIN_TEMP_C), i32::from(MAX_TEMP_C)) as u8;
        if i32::from(clamped) != temp_c {
            warn!(
                "temperature {temp_c}°C outside {MIN_TEMP_C}..={MAX_TEMP_C}°C, using {clamped}°C"
            );
        }
        self.state[TEMP_BYTE] = clamped - MIN_TEMP_C;
        clamped
    }

    pub fn temp(&self) -> u8 {
        (self.state[TEMP_BYTE] & 0x0F) + MIN_TEMP_C
    }

    /// The full 18-byte frame with a fresh checksum.
    pub fn raw(&self) -> [u8; STATE_LENGTH] {
        let mut raw = self.state;
        raw[CHECKSUM_BYTE] = checksum(&raw[..CHECKSUM_BYTE]);
        raw
    }

    /// Mark/space durations in microseconds for one frame, starting with a
    /// mark. Send it [`FRAME_SENDS`] times back to back.
    pub fn timings(&self) -> Vec<u16> {
        encode_timings(&self.raw())
    }
}

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0_u8, |sum, byte| sum.wrapping_add(*byte))
}

pub fn encode_timings(frame: &[u8]) -> Vec<u16> {
    let mut timings = Vec::with_capacity(4 + frame.len() * 16);
    timings.push(HDR_MARK_US);
    timings.push(HDR_SPACE_US);

    for byte in frame {
        for bit in 0..8 {
            timings.push(BIT_MARK_US);
            timings.push(if byte & (1 << bit) != 0 {
                ONE_SPACE_US
            } else {
                ZERO_SPACE_US
            });
        }
    }

    timings.push(RPT_MARK_US);
    timings.push(RPT_SPACE_US);
    timings
}

pub fn to_hex(frame: &[u8]) -> String {
    frame.iter().map(|byte| format!("{byte:02X}")).collect()
}
