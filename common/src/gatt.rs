pub const SERVICE_UUID: u16 = 0xFFF1;
pub const COMMAND_CHAR_UUID: u16 = 0xFFF2;
pub const ENVIRONMENT_CHAR_UUID: u16 = 0xFFF3;

pub const COMMAND_INITIAL_VALUE: &[u8] = b"0";
