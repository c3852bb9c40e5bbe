//! Physical device seam
//!
//! The tag reader and the compartment servo are reached through the driver
//! traits below. Opening a session claims the device; dropping it releases
//! the device, so every exit path (including `?` early returns) cleans up.
//!
//! Backends:
//! - `simulated`: in-memory devices, always available
//! - `rpi`: MFRC522 over SPI and software-PWM servo via `rppal` (feature `rpi`)

pub mod mfrc522;
pub mod simulated;

#[cfg(feature = "rpi")]
pub mod rpi;

use parcelock_common::config::{HardwareBackend, ReaderConfig, ServoConfig};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub use simulated::{SimulatedServoDriver, SimulatedTagDriver};

/// Bytes stored on a tag (one MIFARE Classic block)
pub const TAG_PAYLOAD_LEN: usize = 16;

/// Hardware errors
#[derive(Debug, Error)]
pub enum HardwareError {
    /// Device handle or pin could not be claimed
    #[error("Failed to open {device}: {reason}")]
    Open { device: &'static str, reason: String },

    /// Nothing answered before the driver gave up polling
    #[error("No tag responded within {0:?}")]
    NoTag(Duration),

    /// Tag answered but the exchange failed
    #[error("Tag transceive failed: {0}")]
    Transceive(String),

    /// Servo could not be driven to the requested angle
    #[error("Servo error: {0}")]
    Servo(String),

    /// Blocking worker panicked or was cancelled
    #[error("Hardware task failed: {0}")]
    Task(String),
}

/// What a tag read returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagReading {
    /// Numeric identifier derived from the tag UID
    pub id: u64,
    /// Stored text, untrimmed
    pub text: String,
}

/// A tag reader/writer
pub trait TagDriver: Send + Sync {
    /// Claim the reader. The returned session releases it on drop.
    fn open(&self) -> Result<Box<dyn TagSession + '_>, HardwareError>;
}

/// An open reader session
pub trait TagSession {
    /// Block until a tag is presented and return its id and text
    fn read(&mut self) -> Result<TagReading, HardwareError>;

    /// Block until a tag is presented and store `payload` on it
    fn write(&mut self, payload: &[u8; TAG_PAYLOAD_LEN]) -> Result<(), HardwareError>;
}

/// A positional servo
pub trait ServoDriver: Send + Sync {
    /// Claim the servo pin. The returned handle stops the signal on drop.
    fn attach(&self) -> Result<Box<dyn ServoHandle + '_>, HardwareError>;
}

/// An attached servo
pub trait ServoHandle {
    /// Move to `degrees` in -90.0..=90.0
    fn set_angle(&mut self, degrees: f64) -> Result<(), HardwareError>;
}

/// Build the tag driver selected by configuration
pub fn tag_driver_from_config(
    config: &ReaderConfig,
) -> parcelock_common::Result<Arc<dyn TagDriver>> {
    match config.backend {
        HardwareBackend::Simulated => {
            info!("Tag reader: simulated");
            Ok(Arc::new(SimulatedTagDriver::new()))
        }
        #[cfg(feature = "rpi")]
        HardwareBackend::Rpi => {
            info!(reset_pin = config.reset_pin, "Tag reader: MFRC522 on SPI0");
            Ok(Arc::new(rpi::RpiTagDriver::new(config)))
        }
        #[cfg(not(feature = "rpi"))]
        HardwareBackend::Rpi => Err(rpi_unavailable("reader")),
    }
}

/// Build the servo driver selected by configuration
pub fn servo_driver_from_config(
    config: &ServoConfig,
) -> parcelock_common::Result<Arc<dyn ServoDriver>> {
    match config.backend {
        HardwareBackend::Simulated => {
            info!("Servo: simulated");
            Ok(Arc::new(SimulatedServoDriver::new()))
        }
        #[cfg(feature = "rpi")]
        HardwareBackend::Rpi => {
            info!(pin = config.pin, "Servo: software PWM");
            Ok(Arc::new(rpi::RpiServoDriver::new(config)))
        }
        #[cfg(not(feature = "rpi"))]
        HardwareBackend::Rpi => Err(rpi_unavailable("servo")),
    }
}

#[cfg(not(feature = "rpi"))]
fn rpi_unavailable(section: &str) -> parcelock_common::Error {
    parcelock_common::Error::Config(format!(
        "{}.backend = \"rpi\" requires building with `--features rpi`",
        section
    ))
}

/// Fit text into exactly one tag block
///
/// Shorter input is right-padded with ASCII spaces and longer input is cut at
/// 16 bytes. Bytes, not characters, are counted because the tag stores raw
/// bytes.
pub fn normalize_payload(text: &str) -> [u8; TAG_PAYLOAD_LEN] {
    let mut block = [b' '; TAG_PAYLOAD_LEN];
    let bytes = text.as_bytes();
    let len = bytes.len().min(TAG_PAYLOAD_LEN);
    block[..len].copy_from_slice(&bytes[..len]);
    block
}

/// Turn a raw block back into text
///
/// Trailing NULs (factory-blank blocks) are dropped. Whitespace is kept for
/// the caller to trim.
pub fn decode_payload(block: &[u8]) -> String {
    String::from_utf8_lossy(block)
        .trim_end_matches('\0')
        .to_string()
}

/// Servo pulse width for an angle, mapped linearly across the pulse range
pub fn servo_pulse_width(degrees: f64, min_pulse_us: u64, max_pulse_us: u64) -> Duration {
    let clamped = degrees.clamp(-90.0, 90.0);
    let span = max_pulse_us.saturating_sub(min_pulse_us) as f64;
    let micros = min_pulse_us as f64 + (clamped + 90.0) / 180.0 * span;
    Duration::from_nanos((micros * 1000.0).round() as u64)
}
