//! In-memory reader and servo
//!
//! Used when no Raspberry Pi is attached and by the test suite. Both devices
//! count sessions so callers can check that every claim is released.

use super::{
    decode_payload, HardwareError, ServoDriver, ServoHandle, TagDriver, TagReading, TagSession,
    TAG_PAYLOAD_LEN,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Simulated tag held permanently in the reader field
pub struct SimulatedTagDriver {
    tag: Mutex<SimulatedTag>,
    open_sessions: AtomicUsize,
    writes: AtomicUsize,
}

struct SimulatedTag {
    present: bool,
    fault: Option<String>,
    id: u64,
    block: [u8; TAG_PAYLOAD_LEN],
}

impl SimulatedTagDriver {
    /// A blank tag is present in the field
    pub fn new() -> Self {
        Self {
            tag: Mutex::new(SimulatedTag {
                present: true,
                fault: None,
                id: 0x88_04_1C_2A_B6,
                block: [0; TAG_PAYLOAD_LEN],
            }),
            open_sessions: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    fn tag(&self) -> MutexGuard<'_, SimulatedTag> {
        self.tag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overwrite the stored block directly, bypassing the write counter
    pub fn set_contents(&self, bytes: &[u8]) {
        let mut tag = self.tag();
        tag.block = [0; TAG_PAYLOAD_LEN];
        let len = bytes.len().min(TAG_PAYLOAD_LEN);
        tag.block[..len].copy_from_slice(&bytes[..len]);
    }

    /// Raw bytes currently on the tag
    pub fn contents(&self) -> [u8; TAG_PAYLOAD_LEN] {
        self.tag().block
    }

    /// Put the tag in or take it out of the field
    pub fn set_present(&self, present: bool) {
        self.tag().present = present;
    }

    /// Make `open` fail with `reason` until cleared with `None`
    pub fn set_fault(&self, reason: Option<&str>) {
        self.tag().fault = reason.map(str::to_string);
    }

    /// Number of successful writes
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Sessions currently holding the reader
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedTagDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl TagDriver for SimulatedTagDriver {
    fn open(&self) -> Result<Box<dyn TagSession + '_>, HardwareError> {
        if let Some(reason) = self.tag().fault.clone() {
            return Err(HardwareError::Open {
                device: "simulated tag reader",
                reason,
            });
        }

        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedTagSession { driver: self }))
    }
}

struct SimulatedTagSession<'a> {
    driver: &'a SimulatedTagDriver,
}

impl TagSession for SimulatedTagSession<'_> {
    fn read(&mut self) -> Result<TagReading, HardwareError> {
        let tag = self.driver.tag();
        if !tag.present {
            return Err(HardwareError::NoTag(Duration::ZERO));
        }

        Ok(TagReading {
            id: tag.id,
            text: decode_payload(&tag.block),
        })
    }

    fn write(&mut self, payload: &[u8; TAG_PAYLOAD_LEN]) -> Result<(), HardwareError> {
        let mut tag = self.driver.tag();
        if !tag.present {
            return Err(HardwareError::NoTag(Duration::ZERO));
        }

        tag.block = *payload;
        self.driver.writes.fetch_add(1, Ordering::SeqCst);
        debug!(tag = tag.id, "Simulated tag written");
        Ok(())
    }
}

impl Drop for SimulatedTagSession<'_> {
    fn drop(&mut self) {
        self.driver.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Simulated servo that records every angle it is driven to
pub struct SimulatedServoDriver {
    angles: Mutex<Vec<f64>>,
    fault: Mutex<Option<String>>,
    attached: AtomicUsize,
}

impl SimulatedServoDriver {
    pub fn new() -> Self {
        Self {
            angles: Mutex::new(Vec::new()),
            fault: Mutex::new(None),
            attached: AtomicUsize::new(0),
        }
    }

    /// Angles commanded so far, oldest first
    pub fn angles(&self) -> Vec<f64> {
        self.angles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Make `attach` fail with `reason` until cleared with `None`
    pub fn set_fault(&self, reason: Option<&str>) {
        *self.fault.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
            reason.map(str::to_string);
    }

    /// Handles currently holding the servo pin
    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedServoDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl ServoDriver for SimulatedServoDriver {
    fn attach(&self) -> Result<Box<dyn ServoHandle + '_>, HardwareError> {
        let fault = self
            .fault
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(reason) = fault {
            return Err(HardwareError::Open {
                device: "simulated servo",
                reason,
            });
        }

        self.attached.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedServoHandle { driver: self }))
    }
}

struct SimulatedServoHandle<'a> {
    driver: &'a SimulatedServoDriver,
}

impl ServoHandle for SimulatedServoHandle<'_> {
    fn set_angle(&mut self, degrees: f64) -> Result<(), HardwareError> {
        if !(-90.0..=90.0).contains(&degrees) {
            return Err(HardwareError::Servo(format!(
                "angle {} outside -90..=90",
                degrees
            )));
        }

        self.driver
            .angles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(degrees);
        Ok(())
    }
}

impl Drop for SimulatedServoHandle<'_> {
    fn drop(&mut self) {
        self.driver.attached.fetch_sub(1, Ordering::SeqCst);
    }
}
