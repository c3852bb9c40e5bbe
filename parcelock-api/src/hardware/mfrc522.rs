//! MFRC522 contactless reader protocol
//!
//! Speaks to MIFARE Classic 1K tags through the chip's register interface.
//! The driver is generic over [`RegisterBus`] so it does not care how
//! registers are reached (SPI on the Pi, see `rpi.rs`).
//!
//! Tag layout: the 16-byte payload lives in block 8 (sector 2), authenticated
//! with key A against sector trailer block 11.

use super::{HardwareError, TAG_PAYLOAD_LEN};
use std::fmt::Display;
use std::thread;
use std::time::Duration;
use tracing::warn;

// Registers
const COMMAND_REG: u8 = 0x01;
const COM_IEN_REG: u8 = 0x02;
const COM_IRQ_REG: u8 = 0x04;
const DIV_IRQ_REG: u8 = 0x05;
const ERROR_REG: u8 = 0x06;
const STATUS2_REG: u8 = 0x08;
const FIFO_DATA_REG: u8 = 0x09;
const FIFO_LEVEL_REG: u8 = 0x0A;
const CONTROL_REG: u8 = 0x0C;
const BIT_FRAMING_REG: u8 = 0x0D;
const MODE_REG: u8 = 0x11;
const TX_CONTROL_REG: u8 = 0x14;
const TX_ASK_REG: u8 = 0x15;
const CRC_RESULT_REG_H: u8 = 0x21;
const CRC_RESULT_REG_L: u8 = 0x22;
const T_MODE_REG: u8 = 0x2A;
const T_PRESCALER_REG: u8 = 0x2B;
const T_RELOAD_REG_H: u8 = 0x2C;
const T_RELOAD_REG_L: u8 = 0x2D;

// Chip commands
const PCD_IDLE: u8 = 0x00;
const PCD_CALC_CRC: u8 = 0x03;
const PCD_TRANSCEIVE: u8 = 0x0C;
const PCD_AUTHENT: u8 = 0x0E;
const PCD_SOFT_RESET: u8 = 0x0F;

// Tag commands
const PICC_REQIDL: u8 = 0x26;
const PICC_ANTICOLL_CL1: u8 = 0x93;
const PICC_AUTH_KEY_A: u8 = 0x60;
const PICC_READ: u8 = 0x30;
const PICC_WRITE: u8 = 0xA0;
const PICC_HALT: u8 = 0x50;

/// Block holding the payload
pub const DATA_BLOCK: u8 = 8;
/// Sector trailer guarding [`DATA_BLOCK`]
pub const TRAILER_BLOCK: u8 = 11;
/// Factory transport key
pub const DEFAULT_KEY: [u8; 6] = [0xFF; 6];

/// Register-level access to the chip
pub trait RegisterBus {
    type Error: Display;

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), Self::Error>;
    fn read_register(&mut self, reg: u8) -> Result<u8, Self::Error>;
}

/// Fold the 5 anticollision bytes (4 UID bytes + BCC) into one number
pub fn uid_to_id(uid: &[u8; 5]) -> u64 {
    uid.iter().fold(0u64, |acc, &b| acc * 256 + u64::from(b))
}

/// BCC is the XOR of the four UID bytes
pub fn uid_checksum_ok(uid: &[u8; 5]) -> bool {
    uid[..4].iter().fold(0u8, |acc, &b| acc ^ b) == uid[4]
}

/// MFRC522 driver
pub struct Mfrc522<B> {
    bus: B,
}

type Frame = (Vec<u8>, usize);

impl<B: RegisterBus> Mfrc522<B> {
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    fn write(&mut self, reg: u8, value: u8) -> Result<(), HardwareError> {
        self.bus
            .write_register(reg, value)
            .map_err(|e| HardwareError::Transceive(format!("register write 0x{:02X}: {}", reg, e)))
    }

    fn read(&mut self, reg: u8) -> Result<u8, HardwareError> {
        self.bus
            .read_register(reg)
            .map_err(|e| HardwareError::Transceive(format!("register read 0x{:02X}: {}", reg, e)))
    }

    fn set_bits(&mut self, reg: u8, mask: u8) -> Result<(), HardwareError> {
        let current = self.read(reg)?;
        self.write(reg, current | mask)
    }

    fn clear_bits(&mut self, reg: u8, mask: u8) -> Result<(), HardwareError> {
        let current = self.read(reg)?;
        self.write(reg, current & !mask)
    }

    /// Soft reset, configure the timer and turn the antenna on
    pub fn init(&mut self) -> Result<(), HardwareError> {
        self.write(COMMAND_REG, PCD_SOFT_RESET)?;
        thread::sleep(Duration::from_millis(50));

        // Timer: ~25ms timeout for tag responses
        self.write(T_MODE_REG, 0x8D)?;
        self.write(T_PRESCALER_REG, 0x3E)?;
        self.write(T_RELOAD_REG_L, 30)?;
        self.write(T_RELOAD_REG_H, 0)?;
        // Force 100% ASK modulation
        self.write(TX_ASK_REG, 0x40)?;
        // CRC preset 0x6363
        self.write(MODE_REG, 0x3D)?;

        self.antenna_on()
    }

    fn antenna_on(&mut self) -> Result<(), HardwareError> {
        if self.read(TX_CONTROL_REG)? & 0x03 != 0x03 {
            self.set_bits(TX_CONTROL_REG, 0x03)?;
        }
        Ok(())
    }

    pub fn antenna_off(&mut self) -> Result<(), HardwareError> {
        self.clear_bits(TX_CONTROL_REG, 0x03)
    }

    /// Run a chip command against the FIFO
    ///
    /// Returns `None` when the tag did not answer or the chip flagged a
    /// protocol error. Bus failures are `Err`.
    fn to_card(&mut self, command: u8, data: &[u8]) -> Result<Option<Frame>, HardwareError> {
        let (irq_en, wait_irq) = match command {
            PCD_AUTHENT => (0x12, 0x10),
            PCD_TRANSCEIVE => (0x77, 0x30),
            _ => (0x00, 0x00),
        };

        self.write(COM_IEN_REG, irq_en | 0x80)?;
        self.clear_bits(COM_IRQ_REG, 0x80)?;
        self.set_bits(FIFO_LEVEL_REG, 0x80)?;
        self.write(COMMAND_REG, PCD_IDLE)?;

        for &byte in data {
            self.write(FIFO_DATA_REG, byte)?;
        }

        self.write(COMMAND_REG, command)?;
        if command == PCD_TRANSCEIVE {
            // StartSend
            self.set_bits(BIT_FRAMING_REG, 0x80)?;
        }

        let mut remaining = 2000u32;
        let irq = loop {
            let irq = self.read(COM_IRQ_REG)?;
            remaining -= 1;
            if remaining == 0 || irq & 0x01 != 0 || irq & wait_irq != 0 {
                break irq;
            }
        };

        self.clear_bits(BIT_FRAMING_REG, 0x80)?;

        if remaining == 0 || self.read(ERROR_REG)? & 0x1B != 0 {
            return Ok(None);
        }

        // Timer fired before the tag answered
        if irq & irq_en & 0x01 != 0 {
            return Ok(None);
        }

        let mut back = Vec::new();
        let mut bits = 0;
        if command == PCD_TRANSCEIVE {
            let level = usize::from(self.read(FIFO_LEVEL_REG)?);
            let last_bits = usize::from(self.read(CONTROL_REG)? & 0x07);
            bits = if last_bits != 0 {
                level.saturating_sub(1) * 8 + last_bits
            } else {
                level * 8
            };

            for _ in 0..level.clamp(1, 16) {
                back.push(self.read(FIFO_DATA_REG)?);
            }
        }

        Ok(Some((back, bits)))
    }

    fn calculate_crc(&mut self, data: &[u8]) -> Result<[u8; 2], HardwareError> {
        self.clear_bits(DIV_IRQ_REG, 0x04)?;
        self.set_bits(FIFO_LEVEL_REG, 0x80)?;
        for &byte in data {
            self.write(FIFO_DATA_REG, byte)?;
        }
        self.write(COMMAND_REG, PCD_CALC_CRC)?;

        for _ in 0..255 {
            if self.read(DIV_IRQ_REG)? & 0x04 != 0 {
                return Ok([self.read(CRC_RESULT_REG_L)?, self.read(CRC_RESULT_REG_H)?]);
            }
        }

        Err(HardwareError::Transceive("CRC coprocessor timed out".to_string()))
    }

    fn with_crc(&mut self, mut frame: Vec<u8>) -> Result<Vec<u8>, HardwareError> {
        let crc = self.calculate_crc(&frame)?;
        frame.extend_from_slice(&crc);
        Ok(frame)
    }

    /// REQA: true if a tag in idle state answered
    pub fn request(&mut self) -> Result<bool, HardwareError> {
        self.write(BIT_FRAMING_REG, 0x07)?;
        Ok(matches!(
            self.to_card(PCD_TRANSCEIVE, &[PICC_REQIDL])?,
            Some((_, 0x10))
        ))
    }

    /// Cascade level 1 anticollision: UID bytes plus BCC
    pub fn anticollision(&mut self) -> Result<Option<[u8; 5]>, HardwareError> {
        self.write(BIT_FRAMING_REG, 0x00)?;
        match self.to_card(PCD_TRANSCEIVE, &[PICC_ANTICOLL_CL1, 0x20])? {
            Some((back, _)) if back.len() == 5 => {
                let uid = [back[0], back[1], back[2], back[3], back[4]];
                Ok(uid_checksum_ok(&uid).then_some(uid))
            }
            _ => Ok(None),
        }
    }

    /// Select the tag; returns its SAK
    pub fn select(&mut self, uid: &[u8; 5]) -> Result<u8, HardwareError> {
        let mut frame = vec![PICC_ANTICOLL_CL1, 0x70];
        frame.extend_from_slice(uid);
        let frame = self.with_crc(frame)?;

        match self.to_card(PCD_TRANSCEIVE, &frame)? {
            Some((back, 0x18)) => Ok(back[0]),
            _ => Err(HardwareError::Transceive("tag select failed".to_string())),
        }
    }

    /// Authenticate `block` with key A
    pub fn authenticate(
        &mut self,
        block: u8,
        key: &[u8; 6],
        uid: &[u8; 5],
    ) -> Result<(), HardwareError> {
        let mut frame = vec![PICC_AUTH_KEY_A, block];
        frame.extend_from_slice(key);
        frame.extend_from_slice(&uid[..4]);

        self.to_card(PCD_AUTHENT, &frame)?;

        // MFCrypto1On
        if self.read(STATUS2_REG)? & 0x08 == 0 {
            return Err(HardwareError::Transceive(format!(
                "authentication failed for block {}",
                block
            )));
        }
        Ok(())
    }

    pub fn stop_crypto(&mut self) -> Result<(), HardwareError> {
        self.clear_bits(STATUS2_REG, 0x08)
    }

    pub fn read_block(&mut self, block: u8) -> Result<[u8; TAG_PAYLOAD_LEN], HardwareError> {
        let frame = self.with_crc(vec![PICC_READ, block])?;
        match self.to_card(PCD_TRANSCEIVE, &frame)? {
            Some((back, _)) if back.len() >= TAG_PAYLOAD_LEN => {
                let mut data = [0u8; TAG_PAYLOAD_LEN];
                data.copy_from_slice(&back[..TAG_PAYLOAD_LEN]);
                Ok(data)
            }
            _ => Err(HardwareError::Transceive(format!("read of block {} failed", block))),
        }
    }

    pub fn write_block(
        &mut self,
        block: u8,
        data: &[u8; TAG_PAYLOAD_LEN],
    ) -> Result<(), HardwareError> {
        let command = self.with_crc(vec![PICC_WRITE, block])?;
        self.expect_ack(&command, block)?;

        let payload = self.with_crc(data.to_vec())?;
        self.expect_ack(&payload, block)
    }

    fn expect_ack(&mut self, frame: &[u8], block: u8) -> Result<(), HardwareError> {
        match self.to_card(PCD_TRANSCEIVE, frame)? {
            Some((back, 4)) if back[0] & 0x0F == 0x0A => Ok(()),
            _ => Err(HardwareError::Transceive(format!(
                "tag refused write to block {}",
                block
            ))),
        }
    }

    /// Put the tag to sleep so it does not answer the next REQA
    pub fn halt(&mut self) -> Result<(), HardwareError> {
        let frame = self.with_crc(vec![PICC_HALT, 0x00])?;
        // HLTA is acknowledged by silence
        self.to_card(PCD_TRANSCEIVE, &frame)?;
        Ok(())
    }

    /// Drop crypto and halt the tag after an exchange, whatever its outcome
    ///
    /// Both steps always run; failures are logged, not returned, so they
    /// never mask the exchange's own result.
    pub fn end_session(&mut self) {
        if let Err(e) = self.stop_crypto() {
            warn!("Failed to stop crypto after tag exchange: {}", e);
        }
        if let Err(e) = self.halt() {
            warn!("Failed to halt tag after exchange: {}", e);
        }
    }
}
