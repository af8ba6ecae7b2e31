use log::info;
use serde::{Deserialize, Serialize};

use crate::{config::PowerConfig, session::SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    AwakeAdvertising,
    AwakeConnected,
    Sleeping,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AwakeAdvertising => "AWAKE_ADVERTISING",
            Self::AwakeConnected => "AWAKE_CONNECTED",
            Self::Sleeping => "SLEEPING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepReason {
    AdvertisingWindowElapsed,
    IdleTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepStep {
    StopAdvertising,
    ClearStatusIndicator,
    QuiesceSensor,
    ReleaseSensorBus,
    ArmWakeTimer { wake_after_ms: u64 },
    Suspend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepPlan {
    pub reason: SleepReason,
    pub wake_after_ms: u64,
}

impl SleepPlan {
    /// Shutdown steps in the order they must run.
    pub fn steps(&self) -> [SleepStep; 6] {
        [
            SleepStep::StopAdvertising,
            SleepStep::ClearStatusIndicator,
            SleepStep::QuiesceSensor,
            SleepStep::ReleaseSensorBus,
            SleepStep::ArmWakeTimer {
                wake_after_ms: self.wake_after_ms,
            },
            SleepStep::Suspend,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct PowerController {
    config: PowerConfig,
    state: PowerState,
}

impl PowerController {
    pub fn new(config: PowerConfig) -> Self {
        Self {
            config,
            state: PowerState::AwakeAdvertising,
        }
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    /// Evaluates the sleep rules once. Returns a plan exactly once, on the
    /// tick that enters [`PowerState::Sleeping`].
    pub fn tick(&mut self, session: &SessionState, now_ms: u64) -> Option<SleepPlan> {
        if self.state == PowerState::Sleeping {
            return None;
        }

        self.state = if session.is_connected() {
            PowerState::AwakeConnected
        } else {
            PowerState::AwakeAdvertising
        };

        if !self.config.enabled {
            return None;
        }

        let elapsed = session.idle_ms(now_ms);
        let reason = match self.state {
            PowerState::AwakeConnected if elapsed > self.config.idle_timeout_ms => {
                SleepReason::IdleTimeout
            }
            PowerState::AwakeAdvertising if elapsed > self.config.advertising_window_ms => {
                SleepReason::AdvertisingWindowElapsed
            }
            _ => return None,
        };

        info!(
            "entering deep sleep ({reason:?} after {elapsed}ms), waking in {}ms",
            self.config.sleep_duration_ms
        );
        self.state = PowerState::Sleeping;

        Some(SleepPlan {
            reason,
            wake_after_ms: self.config.sleep_duration_ms,
        })
    }
}
