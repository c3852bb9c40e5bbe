//! Raspberry Pi backends (feature `rpi`)
//!
//! - Tag reader: MFRC522 on SPI0/CE0, RST on a claimed GPIO output
//! - Servo: software PWM on a GPIO output, 50Hz
//!
//! `rppal` resets claimed pins when they are dropped, which is what releases
//! the hardware at the end of every session.

use super::mfrc522::{uid_to_id, Mfrc522, RegisterBus, DATA_BLOCK, DEFAULT_KEY, TRAILER_BLOCK};
use super::{
    decode_payload, servo_pulse_width, HardwareError, ServoDriver, ServoHandle, TagDriver,
    TagReading, TagSession, TAG_PAYLOAD_LEN,
};
use parcelock_common::config::{ReaderConfig, ServoConfig};
use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const SERVO_PERIOD: Duration = Duration::from_millis(20);

impl RegisterBus for Spi {
    type Error = rppal::spi::Error;

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), Self::Error> {
        self.write(&[(reg << 1) & 0x7E, value])?;
        Ok(())
    }

    fn read_register(&mut self, reg: u8) -> Result<u8, Self::Error> {
        let mut rx = [0u8; 2];
        self.transfer(&mut rx, &[((reg << 1) & 0x7E) | 0x80, 0])?;
        Ok(rx[1])
    }
}

/// MFRC522 reader wired to the Pi's SPI0
pub struct RpiTagDriver {
    reset_pin: u8,
    spi_clock_hz: u32,
    timeout: Duration,
}

impl RpiTagDriver {
    pub fn new(config: &ReaderConfig) -> Self {
        Self {
            reset_pin: config.reset_pin,
            spi_clock_hz: config.spi_clock_hz,
            timeout: config.timeout(),
        }
    }
}

impl TagDriver for RpiTagDriver {
    fn open(&self) -> Result<Box<dyn TagSession + '_>, HardwareError> {
        let open_err = |reason: String| HardwareError::Open {
            device: "MFRC522 reader",
            reason,
        };

        let mut reset = Gpio::new()
            .and_then(|gpio| gpio.get(self.reset_pin))
            .map_err(|e| open_err(format!("GPIO {}: {}", self.reset_pin, e)))?
            .into_output();
        reset.set_high();

        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, self.spi_clock_hz, Mode::Mode0)
            .map_err(|e| open_err(format!("SPI0: {}", e)))?;

        let mut chip = Mfrc522::new(spi);
        chip.init()?;
        debug!(reset_pin = self.reset_pin, "MFRC522 session opened");

        Ok(Box::new(RpiTagSession {
            chip,
            _reset: reset,
            timeout: self.timeout,
        }))
    }
}

struct RpiTagSession {
    chip: Mfrc522<Spi>,
    // Held for the session; dropping it releases the pin
    _reset: OutputPin,
    timeout: Duration,
}

impl RpiTagSession {
    fn wait_for_tag(&mut self) -> Result<[u8; 5], HardwareError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.chip.request()? {
                if let Some(uid) = self.chip.anticollision()? {
                    return Ok(uid);
                }
            }
            if Instant::now() >= deadline {
                return Err(HardwareError::NoTag(self.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Select and authenticate, run `op`, then end the session whatever happened
    fn with_authenticated<T>(
        &mut self,
        op: impl FnOnce(&mut Mfrc522<Spi>) -> Result<T, HardwareError>,
    ) -> Result<(u64, T), HardwareError> {
        let uid = self.wait_for_tag()?;
        self.chip.select(&uid)?;
        self.chip.authenticate(TRAILER_BLOCK, &DEFAULT_KEY, &uid)?;

        let result = op(&mut self.chip);

        self.chip.end_session();

        result.map(|value| (uid_to_id(&uid), value))
    }
}

impl TagSession for RpiTagSession {
    fn read(&mut self) -> Result<TagReading, HardwareError> {
        let (id, block) = self.with_authenticated(|chip| chip.read_block(DATA_BLOCK))?;
        Ok(TagReading {
            id,
            text: decode_payload(&block),
        })
    }

    fn write(&mut self, payload: &[u8; TAG_PAYLOAD_LEN]) -> Result<(), HardwareError> {
        let (id, ()) = self.with_authenticated(|chip| chip.write_block(DATA_BLOCK, payload))?;
        debug!(tag = id, "Tag block {} written", DATA_BLOCK);
        Ok(())
    }
}

impl Drop for RpiTagSession {
    fn drop(&mut self) {
        if let Err(e) = self.chip.antenna_off() {
            warn!("Failed to switch reader antenna off: {}", e);
        }
    }
}

/// Hobby servo on a GPIO pin
pub struct RpiServoDriver {
    pin: u8,
    min_pulse_us: u64,
    max_pulse_us: u64,
}

impl RpiServoDriver {
    pub fn new(config: &ServoConfig) -> Self {
        Self {
            pin: config.pin,
            min_pulse_us: config.min_pulse_us,
            max_pulse_us: config.max_pulse_us,
        }
    }
}

impl ServoDriver for RpiServoDriver {
    fn attach(&self) -> Result<Box<dyn ServoHandle + '_>, HardwareError> {
        let pin = Gpio::new()
            .and_then(|gpio| gpio.get(self.pin))
            .map_err(|e| HardwareError::Open {
                device: "servo",
                reason: format!("GPIO {}: {}", self.pin, e),
            })?
            .into_output();

        Ok(Box::new(RpiServoHandle { pin, driver: self }))
    }
}

struct RpiServoHandle<'a> {
    pin: OutputPin,
    driver: &'a RpiServoDriver,
}

impl ServoHandle for RpiServoHandle<'_> {
    fn set_angle(&mut self, degrees: f64) -> Result<(), HardwareError> {
        let pulse = servo_pulse_width(degrees, self.driver.min_pulse_us, self.driver.max_pulse_us);
        self.pin
            .set_pwm(SERVO_PERIOD, pulse)
            .map_err(|e| HardwareError::Servo(format!("PWM on GPIO {}: {}", self.driver.pin, e)))
    }
}

impl Drop for RpiServoHandle<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.pin.clear_pwm() {
            warn!("Failed to stop servo PWM: {}", e);
        }
    }
}
