//! Sensirion SHTC3 temperature/humidity sensor commands.
//!
//! Every word read back from the sensor is followed by a CRC-8
//! (polynomial 0x31, init 0xFF).

use crate::{environment::EnvironmentReading, error::SensorError};

pub const DEFAULT_ADDRESS: u8 = 0x70;

pub const CMD_WAKEUP: u16 = 0x3517;
pub const CMD_SLEEP: u16 = 0xB098;
pub const CMD_SOFT_RESET: u16 = 0x805D;
pub const CMD_READ_ID: u16 = 0xEFC8;
/// Normal power mode, clock stretching disabled, temperature first.
pub const CMD_MEASURE_T_FIRST: u16 = 0x7866;

pub const WAKEUP_DELAY_US: u32 = 240;
pub const MEASUREMENT_DELAY_MS: u32 = 13;

pub const MEASUREMENT_LEN: usize = 6;

pub fn command_bytes(command: u16) -> [u8; 2] {
    command.to_be_bytes()
}

pub fn crc8(data: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for &byte in data {
        crc ^= byte;
        for _ in 0..8 {
            if crc & 0x80 != 0 {
                crc = (crc << 1) ^ 0x31;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn checked_word(chunk: &[u8]) -> Result<u16, SensorError> {
    let [msb, lsb, crc] = chunk else {
        return Err(SensorError::Bus(format!(
            "expected 3 bytes per word, got {}",
            chunk.len()
        )));
    };

    let expected = crc8(&[*msb, *lsb]);
    if expected != *crc {
        return Err(SensorError::Crc {
            expected,
            actual: *crc,
        });
    }

    Ok(u16::from_be_bytes([*msb, *lsb]))
}

pub fn raw_to_celsius(raw: u16) -> f32 {
    -45.0 + 175.0 * f32::from(raw) / 65536.0
}

pub fn raw_to_humidity(raw: u16) -> f32 {
    100.0 * f32::from(raw) / 65536.0
}

/// Decodes a temperature-first measurement (`T`, `CRC`, `RH`, `CRC`).
pub fn decode_measurement(buf: &[u8; MEASUREMENT_LEN]) -> Result<EnvironmentReading, SensorError> {
    let temperature = checked_word(&buf[..3])?;
    let humidity = checked_word(&buf[3..])?;

    Ok(EnvironmentReading {
        temperature_c: raw_to_celsius(temperature),
        relative_humidity_pct: raw_to_humidity(humidity),
    })
}

/// Decodes the ID register; the low six bits identify the part.
pub fn decode_id(buf: &[u8; 3]) -> Result<u16, SensorError> {
    checked_word(buf).map(|id| id & 0x083F)
}
