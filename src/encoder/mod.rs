use std::sync::{
    Arc,
    atomic::{AtomicU16, Ordering},
};

use crate::peripheral::i2c::bus::{I2CAddress, I2CDevice};

pub const AS5600_ADDRESS: I2CAddress = I2CAddress::SevenBit(0x36);

const ADDR_RAW_ANGLE: u8 = 0x0c; // 0x0d - lower byte
const ADDR_ANGLE: u8 = 0x0e; // 0x0f - lower byte
const ADDR_STATUS: u8 = 0x0b; // magnet status
const ADDR_AGC: u8 = 0x1a;
const ADDR_MAGNITUDE: u8 = 0x1b; // magnitude of internal CORDIC;  0x1c - lower byte
const ADDR_MAGNITUDE_LOWER: u8 = ADDR_MAGNITUDE + 1;

const STATUS_MAGNET_DETECTED: u8 = 0x20;
const ANGLE_MASK: u16 = 0x0fff; // 12-bit

/// Simulate AS5600 magnetic rotary encoder
///
/// The first byte of a write selects the register, reads continue from there
/// and auto-increment. The shaft angle can be moved from outside through
/// [`AS5600::angle_handle`] while the device sits on a bus.
pub struct AS5600 {
    register_address: u8, // the register being addressed by master
    angle: Arc<AtomicU16>,
}

impl Default for AS5600 {
    fn default() -> Self {
        Self::new()
    }
}

impl AS5600 {
    pub fn new() -> Self {
        Self {
            register_address: 0xff,
            angle: Arc::new(AtomicU16::new(0)),
        }
    }

    pub fn with_angle(angle: u16) -> Self {
        let encoder = Self::new();
        encoder.angle.store(angle & ANGLE_MASK, Ordering::Relaxed);
        encoder
    }

    pub fn angle_handle(&self) -> Arc<AtomicU16> {
        self.angle.clone()
    }

    /// Returns the value in the addressed register
    fn read_value(&mut self) -> u8 {
        let angle = self.angle.load(Ordering::Relaxed) & ANGLE_MASK;
        let register = self.register_address;
        let value = match register {
            ADDR_STATUS => STATUS_MAGNET_DETECTED,
            ADDR_RAW_ANGLE | ADDR_ANGLE => (angle >> 8) as u8,
            r if r == ADDR_RAW_ANGLE + 1 || r == ADDR_ANGLE + 1 => angle as u8,
            ADDR_AGC => 0x80,
            ADDR_MAGNITUDE => 0x0f,
            ADDR_MAGNITUDE_LOWER => 0x00,
            _ => {
                tracing::warn!(register, "AS5600: unknown register");
                0x00
            }
        };
        self.register_address = self.register_address.wrapping_add(1);
        value
    }
}

impl I2CDevice for AS5600 {
    fn write(&mut self, bytes: &[u8]) {
        // registers are read-only here, only the address pointer is taken
        if let Some(&register) = bytes.first() {
            self.register_address = register;
        }
        if bytes.len() > 1 {
            tracing::debug!(count = bytes.len() - 1, "AS5600: register writes ignored");
        }
    }

    fn read(&mut self, count: usize) -> Vec<u8> {
        (0..count).map(|_| self.read_value()).collect()
    }

    fn finish_transaction(&mut self) {}

    fn reset(&mut self) {
        self.register_address = 0xff;
    }
}

#[cfg(test)]
mod encoder_tests {
    use std::sync::atomic::Ordering;

    use super::{AS5600, AS5600_ADDRESS};
    use crate::peripheral::i2c::{I2CController, bus::I2CDevice, config::I2CControllerConfig};

    #[test]
    fn read_status_and_magnitude() {
        // Arrange
        let mut encoder = AS5600::new();

        // Act
        encoder.write(&[0x0b]);
        let status = encoder.read(1);
        encoder.write(&[0x1b]);
        let magnitude = encoder.read(2);

        // Assert
        assert_eq!(status, vec![0x20]);
        assert_eq!(magnitude, vec![0x0f, 0x00]);
    }

    #[test]
    fn angle_follows_handle() {
        let mut encoder = AS5600::with_angle(0x123);
        let handle = encoder.angle_handle();

        encoder.write(&[0x0e]);
        assert_eq!(encoder.read(2), vec![0x01, 0x23]);

        handle.store(0xabc, Ordering::Relaxed);
        encoder.write(&[0x0c]);
        assert_eq!(encoder.read(2), vec![0x0a, 0xbc]);
    }

    #[test]
    fn unknown_register_reads_zero() {
        let mut encoder = AS5600::new();
        encoder.write(&[0x42]);
        assert_eq!(encoder.read(1), vec![0x00]);
    }

    #[test]
    fn angle_through_controller() {
        // Arrange
        let mut i2c = I2CController::new(I2CControllerConfig::default());
        i2c.attach(AS5600_ADDRESS, Box::new(AS5600::with_angle(0x800)))
            .unwrap();

        // Act
        i2c.request_start();
        i2c.set_address(AS5600_ADDRESS, false);
        i2c.push_tx_byte(0x0e);
        i2c.request_restart();
        i2c.set_transfer_size(2);
        i2c.set_address(AS5600_ADDRESS, true);
        let angle = [i2c.pop_rx_byte(), i2c.pop_rx_byte()];
        i2c.request_stop();

        // Assert
        assert_eq!(angle, [0x08, 0x00]);
    }
}
