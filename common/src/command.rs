use serde::{Deserialize, Serialize};

use crate::fields::Fields;

pub const DEFAULT_TEMPERATURE_C: i32 = 24;
pub const DEFAULT_PRESET: &str = "NORMAL";

const KEY_TEMP: &str = "TEMP";
const KEY_MODE: &str = "MODE";
const KEY_PRESET: &str = "PRESET";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AcMode {
    Cool,
    Heat,
    HeatCool,
    FanOnly,
    Off,
    Auto,
}

impl AcMode {
    /// Case-insensitive keyword lookup. Unknown keywords resolve to `Auto`.
    pub fn from_keyword(keyword: &str) -> Self {
        const KEYWORDS: [(&str, AcMode); 6] = [
            ("COOL", AcMode::Cool),
            ("HEAT", AcMode::Heat),
            ("HEAT_COOL", AcMode::HeatCool),
            ("FAN_ONLY", AcMode::FanOnly),
            ("OFF", AcMode::Off),
            ("AUTO", AcMode::Auto),
        ];

        KEYWORDS
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(keyword))
            .map(|(_, mode)| *mode)
            .unwrap_or(AcMode::Auto)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cool => "COOL",
            Self::Heat => "HEAT",
            Self::HeatCool => "HEAT_COOL",
            Self::FanOnly => "FAN_ONLY",
            Self::Off => "OFF",
            Self::Auto => "AUTO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Command {
    pub temperature: i32,
    pub mode: AcMode,
    // Carried through but not consumed by any translation rule yet.
    pub preset: String,
}

impl Default for Command {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE_C,
            mode: AcMode::Cool,
            preset: DEFAULT_PRESET.to_string(),
        }
    }
}

impl Command {
    /// Parses a `TEMP:<int>;MODE:<mode>;PRESET:<text>;` payload.
    ///
    /// Never fails: missing fields keep their defaults, an unparseable
    /// temperature becomes 0 and unknown modes become [`AcMode::Auto`].
    pub fn parse(input: &str) -> Self {
        Self::from_fields(&Fields::tokenize(input, ':'))
    }

    pub fn from_fields(fields: &Fields<'_>) -> Self {
        let mut command = Self::default();

        if let Some(raw) = fields.get(KEY_TEMP) {
            command.temperature = parse_leading_int(raw);
        }

        if let Some(raw) = fields.get(KEY_MODE) {
            command.mode = AcMode::from_keyword(raw);
        }

        if let Some(raw) = fields.get(KEY_PRESET) {
            command.preset = raw.to_string();
        }

        command
    }
}

/// `atoi`-style integer parse: optional whitespace and sign followed by the
/// longest run of digits. Returns 0 when no digits are present and saturates
/// instead of overflowing.
pub fn parse_leading_int(raw: &str) -> i32 {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut value: i32 = 0;
    for byte in digits.bytes().take_while(u8::is_ascii_digit) {
        let digit = i32::from(byte - b'0');
        value = if negative {
            value.saturating_mul(10).saturating_sub(digit)
        } else {
            value.saturating_mul(10).saturating_add(digit)
        };
    }

    value
}
