use std::{thread, time::Duration};

use anyhow::Context;
use esp_idf_hal::gpio::PinDriver;
use esp_idf_svc::{hal::prelude::Peripherals, log::EspLogger};
use log::info;

const BLINK_PERIOD: Duration = Duration::from_secs(1);

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let peripherals = Peripherals::take()?;
    let mut led = PinDriver::output(peripherals.pins.gpio13).context("failed to claim GPIO13")?;

    loop {
        led.set_high()?;
        info!("LED is ON");
        thread::sleep(BLINK_PERIOD);

        led.set_low()?;
        info!("LED is OFF");
        thread::sleep(BLINK_PERIOD);
    }
}
