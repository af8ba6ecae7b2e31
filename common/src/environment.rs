use log::{info, warn};
use serde::Serialize;

use crate::{
    error::{ReadingParseError, SensorError},
    fields::Fields,
};

const MIN_VALID_TEMP_C: f32 = -40.0;
const MAX_VALID_TEMP_C: f32 = 125.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnvironmentReading {
    #[serde(rename = "temperatureC")]
    pub temperature_c: f32,
    #[serde(rename = "relativeHumidityPct")]
    pub relative_humidity_pct: f32,
}

impl EnvironmentReading {
    /// `T=<°C>;H=<%RH>;`, both with one decimal.
    pub fn to_payload(&self) -> String {
        format!(
            "T={:.1};H={:.1};",
            self.temperature_c, self.relative_humidity_pct
        )
    }

    pub fn parse_payload(payload: &str) -> Result<Self, ReadingParseError> {
        let fields = Fields::tokenize(payload, '=');
        Ok(Self {
            temperature_c: parse_number(&fields, "T")?,
            relative_humidity_pct: parse_number(&fields, "H")?,
        })
    }

    pub fn validate(self) -> Result<Self, SensorError> {
        let temperature_ok = self.temperature_c.is_finite()
            && (MIN_VALID_TEMP_C..=MAX_VALID_TEMP_C).contains(&self.temperature_c);
        let humidity_ok = self.relative_humidity_pct.is_finite()
            && (0.0..=100.0).contains(&self.relative_humidity_pct);

        if temperature_ok && humidity_ok {
            Ok(self)
        } else {
            Err(SensorError::OutOfRange {
                temperature_c: self.temperature_c,
                humidity_pct: self.relative_humidity_pct,
            })
        }
    }
}

fn parse_number(fields: &Fields<'_>, field: &'static str) -> Result<f32, ReadingParseError> {
    let raw = fields
        .get(field)
        .ok_or(ReadingParseError::MissingField(field))?;
    raw.parse::<f32>()
        .map_err(|_| ReadingParseError::InvalidNumber {
            field,
            value: raw.to_string(),
        })
}

/// Polls the sensor on a fixed period and keeps the latest good reading.
#[derive(Debug, Clone)]
pub struct EnvironmentSampler {
    period_ms: u64,
    last_attempt_ms: Option<u64>,
    published: Option<EnvironmentReading>,
    failed_reads: u64,
}

impl EnvironmentSampler {
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_attempt_ms: None,
            published: None,
            failed_reads: 0,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.last_attempt_ms
            .map(|last| now_ms.saturating_sub(last) >= self.period_ms)
            .unwrap_or(true)
    }

    /// Records the outcome of one sensor read. Returns the payload to publish,
    /// or `None` when the read failed and this period is skipped.
    pub fn record(
        &mut self,
        result: Result<EnvironmentReading, SensorError>,
        now_ms: u64,
    ) -> Option<String> {
        self.last_attempt_ms = Some(now_ms);

        match result.and_then(EnvironmentReading::validate) {
            Ok(reading) => {
                let payload = reading.to_payload();
                info!("environment reading published: {payload}");
                self.published = Some(reading);
                Some(payload)
            }
            Err(err) => {
                self.failed_reads = self.failed_reads.saturating_add(1);
                warn!("environment sample skipped: {err}");
                None
            }
        }
    }

    pub fn published(&self) -> Option<EnvironmentReading> {
        self.published
    }

    pub fn published_payload(&self) -> Option<String> {
        self.published.map(|reading| reading.to_payload())
    }

    pub fn failed_reads(&self) -> u64 {
        self.failed_reads
    }
}
