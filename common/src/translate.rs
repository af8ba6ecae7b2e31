use crate::{
    command::{AcMode, Command},
    mitsubishi::MitsubishiMode,
};

/// One call against the air-conditioner driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcAction {
    PowerOn,
    PowerOff,
    SetMode(MitsubishiMode),
    SetTemp(i32),
    Transmit,
}

pub fn target_mode(mode: AcMode) -> Option<MitsubishiMode> {
    match mode {
        AcMode::Off => None,
        AcMode::Cool => Some(MitsubishiMode::Cool),
        AcMode::Heat => Some(MitsubishiMode::Heat),
        AcMode::HeatCool | AcMode::Auto => Some(MitsubishiMode::Auto),
        AcMode::FanOnly => Some(MitsubishiMode::Fan),
    }
}

/// Driver calls for one command, always ending in a single transmit.
pub fn translate(command: &Command) -> Vec<AcAction> {
    match target_mode(command.mode) {
        None => vec![AcAction::PowerOff, AcAction::Transmit],
        Some(mode) => vec![
            AcAction::PowerOn,
            AcAction::SetMode(mode),
            AcAction::SetTemp(command.temperature),
            AcAction::Transmit,
        ],
    }
}
