pub mod bridge;
pub mod command;
pub mod config;
pub mod driver;
pub mod environment;
pub mod error;
pub mod events;
pub mod fields;
pub mod gatt;
pub mod mitsubishi;
pub mod power;
pub mod session;
pub mod shtc3;
pub mod translate;
pub mod types;

pub use bridge::{BridgeAction, BridgeEngine};
pub use command::{AcMode, Command};
pub use config::{
    BleConfig, ConnectionParams, IrHardwareConfig, PowerConfig, RuntimeConfig, SensorConfig,
};
pub use driver::{AcDriver, EnvironmentSensor, IrTransport, StatusIndicator};
pub use environment::{EnvironmentReading, EnvironmentSampler};
pub use error::{IrError, ReadingParseError, SensorError};
pub use events::{event_queue, BridgeEvent, EventReceiver, EventSender, DEFAULT_EVENT_QUEUE_DEPTH};
pub use gatt::*;
pub use mitsubishi::{MitsubishiAc, MitsubishiMode};
pub use power::{PowerController, PowerState, SleepPlan, SleepReason, SleepStep};
pub use session::{Peer, SessionAction, SessionState};
pub use translate::{translate, AcAction};
pub use types::{AcStatus, BridgeStatus};
