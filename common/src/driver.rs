use log::{info, warn};

use crate::{
    environment::EnvironmentReading,
    error::{IrError, SensorError},
    mitsubishi::{self, MitsubishiAc},
    translate::AcAction,
    types::AcStatus,
};

/// Sends one IR frame given as alternating mark/space durations in µs.
pub trait IrTransport {
    fn transmit(&mut self, timings: &[u16]) -> Result<(), IrError>;
}

pub trait StatusIndicator {
    fn set_lit(&mut self, lit: bool);
}

pub trait EnvironmentSensor {
    fn read(&mut self) -> Result<EnvironmentReading, SensorError>;

    /// Puts the sensor in its lowest-power state.
    fn sleep(&mut self) -> Result<(), SensorError>;

    /// Leaves the bus lines floating so they do not leak current.
    fn release_bus(&mut self) {}
}

/// Air-conditioner driver: the Mitsubishi state plus the transport it is
/// sent over.
#[derive(Debug)]
pub struct AcDriver<T> {
    ac: MitsubishiAc,
    transport: T,
    frames_sent: u64,
    failed_transmits: u64,
    last_error: Option<String>,
}

impl<T: IrTransport> AcDriver<T> {
    pub fn new(transport: T) -> Self {
        Self {
            ac: MitsubishiAc::new(),
            transport,
            frames_sent: 0,
            failed_transmits: 0,
            last_error: None,
        }
    }

    pub fn state(&self) -> &MitsubishiAc {
        &self.ac
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    pub fn failed_transmits(&self) -> u64 {
        self.failed_transmits
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn status(&self) -> AcStatus {
        AcStatus {
            power: self.ac.is_on(),
            mode: self.ac.mode(),
            temp_c: self.ac.temp(),
            frame: mitsubishi::to_hex(&self.ac.raw()),
            frames_sent: self.frames_sent,
            failed_transmits: self.failed_transmits,
            last_error: self.last_error.clone(),
        }
    }

    /// Runs the actions in order. The indicator is lit only while a frame is
    /// on the wire.
    pub fn execute<S: StatusIndicator>(
        &mut self,
        actions: &[AcAction],
        indicator: &mut S,
    ) -> Result<(), IrError> {
        let mut result = Ok(());

        for action in actions {
            match *action {
                AcAction::PowerOn => self.ac.on(),
                AcAction::PowerOff => self.ac.off(),
                AcAction::SetMode(mode) => self.ac.set_mode(mode),
                AcAction::SetTemp(temp_c) => {
                    self.ac.set_temp(temp_c);
                }
                AcAction::Transmit => {
                    let timings = self.ac.timings().repeat(mitsubishi::FRAME_SENDS);
                    indicator.set_lit(true);
                    let sent = self.transport.transmit(&timings);
                    indicator.set_lit(false);
                    self.record_transmit(&sent);
                    if sent.is_err() {
                        result = sent;
                    }
                }
            }
        }

        result
    }

    fn record_transmit(&mut self, sent: &Result<(), IrError>) {
        match sent {
            Ok(()) => {
                self.frames_sent = self.frames_sent.saturating_add(1);
                self.last_error = None;
                info!(
                    "IR frame sent: {} (power={}, mode={:?}, temp={}°C)",
                    mitsubishi::to_hex(&self.ac.raw()),
                    self.ac.is_on(),
                    self.ac.mode(),
                    self.ac.temp()
                );
            }
            Err(err) => {
                self.failed_transmits = self.failed_transmits.saturating_add(1);
                self.last_error = Some(err.to_string());
                warn!("IR transmit failed: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        command::Command,
        mitsubishi::{MitsubishiMode, STATE_LENGTH},
        translate::translate,
    };

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Lit(bool),
        Frame(usize),
    }

    #[derive(Clone, Default)]
    struct Log(Rc<RefCell<Vec<Event>>>);

    struct FakeTransport {
        log: Log,
        fail: bool,
    }

    impl IrTransport for FakeTransport {
        fn transmit(&mut self, timings: &[u16]) -> Result<(), IrError> {
            self.log.0.borrow_mut().push(Event::Frame(timings.len()));
            if self.fail {
                Err(IrError::Transmit("rmt busy".to_string()))
            } else {
                Ok(())
            }
        }
    }

    struct FakeIndicator(Log);

    impl StatusIndicator for FakeIndicator {
        fn set_lit(&mut self, lit: bool) {
            self.0 .0.borrow_mut().push(Event::Lit(lit));
        }
    }

    fn driver(fail: bool) -> (AcDriver<FakeTransport>, FakeIndicator, Log) {
        let log = Log::default();
        let transport = FakeTransport {
            log: log.clone(),
            fail,
        };
        (AcDriver::new(transport), FakeIndicator(log.clone()), log)
    }

    #[test]
    fn indicator_wraps_the_transmit() {
        let (mut driver, mut indicator, log) = driver(false);
        let actions = translate(&Command::parse("TEMP:18;MODE:HEAT;"));

        driver.execute(&actions, &mut indicator).unwrap();

        let frame_len = (4 + STATE_LENGTH * 16) * mitsubishi::FRAME_SENDS;
        assert_eq!(
            log.0.borrow().clone(),
            vec![Event::Lit(true), Event::Frame(frame_len), Event::Lit(false)]
        );
        assert!(driver.state().is_on());
        assert_eq!(driver.state().mode(), MitsubishiMode::Heat);
        assert_eq!(driver.state().temp(), 18);
        assert_eq!(driver.frames_sent(), 1);
    }

    #[test]
    fn off_keeps_previous_mode_and_temperature() {
        let (mut driver, mut indicator, _log) = driver(false);
        driver
            .execute(&translate(&Command::parse("TEMP:27;MODE:COOL")), &mut indicator)
            .unwrap();
        driver
            .execute(&translate(&Command::parse("MODE:off")), &mut indicator)
            .unwrap();

        assert!(!driver.state().is_on());
        assert_eq!(driver.state().mode(), MitsubishiMode::Cool);
        assert_eq!(driver.state().temp(), 27);
        assert_eq!(driver.frames_sent(), 2);
    }

    #[test]
    fn out_of_range_temperature_is_clamped() {
        let (mut driver, mut indicator, _log) = driver(false);
        driver
            .execute(&translate(&Command::parse("TEMP:abc;MODE:COOL")), &mut indicator)
            .unwrap();
        assert_eq!(driver.state().temp(), mitsubishi::MIN_TEMP_C);
    }

    #[test]
    fn failed_transmit_still_clears_indicator() {
        let (mut driver, mut indicator, log) = driver(true);
        let result = driver.execute(&translate(&Command::default()), &mut indicator);

        assert!(result.is_err());
        assert_eq!(log.0.borrow().last(), Some(&Event::Lit(false)));
        assert_eq!(driver.failed_transmits(), 1);
        assert_eq!(driver.last_error(), Some("IR transmit failed: rmt busy"));
        assert_eq!(driver.status().last_error.as_deref(), driver.last_error());
    }
}
