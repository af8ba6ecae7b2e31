use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IrError {
    #[error("IR transmitter is disabled")]
    Disabled,
    #[error("invalid IR pulse duration {0}us")]
    InvalidPulse(u16),
    #[error("IR transmit failed: {0}")]
    Transmit(String),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("sensor bus error: {0}")]
    Bus(String),
    #[error("sensor CRC mismatch: expected {expected:#04x}, got {actual:#04x}")]
    Crc { expected: u8, actual: u8 },
    #[error("sensor value out of range: {temperature_c}°C / {humidity_pct}%")]
    OutOfRange { temperature_c: f32, humidity_pct: f32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadingParseError {
    #[error("reading is missing field `{0}`")]
    MissingField(&'static str),
    #[error("reading field `{field}` is not a number: `{value}`")]
    InvalidNumber { field: &'static str, value: String },
}
