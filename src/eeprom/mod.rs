use crate::peripheral::i2c::bus::{I2CAddress, I2CDevice};

pub const AT24C_ADDRESS: I2CAddress = I2CAddress::SevenBit(0x50);

/// Simulate an AT24Cxx serial EEPROM
///
/// A write transaction starts with the word address (one or two bytes,
/// high byte first), followed by data bytes that are page-written and wrap
/// inside the current page. Reads are sequential from the current word
/// address and wrap at the end of memory.
///
/// The device contract carries no start notification, so the word address is
/// expected again after a stop or after a read phase. Two write phases joined
/// by a repeated start are seen as one write.
pub struct AT24C {
    memory: Vec<u8>,
    page_size: usize,
    address_width: usize, // word address bytes, 1 or 2

    pointer: usize, // current word address
    address_received: usize, // word address bytes seen in this transaction
}

impl AT24C {
    pub fn new(memory_size: usize, page_size: usize, address_width: usize) -> Self {
        Self {
            memory: vec![0xff; memory_size.max(1)],
            page_size: page_size.max(1),
            address_width: address_width.clamp(1, 2),
            pointer: 0,
            address_received: 0,
        }
    }

    /// 2 Kbit, 8-byte pages
    pub fn at24c02() -> Self {
        Self::new(256, 8, 1)
    }

    /// 256 Kbit, 64-byte pages
    pub fn at24c256() -> Self {
        Self::new(32 * 1024, 64, 2)
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn pointer(&self) -> usize {
        self.pointer
    }

    fn write_memory(&mut self, value: u8) {
        let page_base = self.pointer - self.pointer % self.page_size;
        let offset = (self.pointer + 1) % self.page_size;
        self.memory[self.pointer] = value;
        // page writes roll over inside the page
        self.pointer = (page_base + offset) % self.memory.len();
    }

    fn take_address_byte(&mut self, value: u8) {
        self.pointer = if self.address_received == 0 {
            value as usize
        } else {
            (self.pointer << 8) | value as usize
        };
        self.pointer %= self.memory.len();
        self.address_received += 1;
    }

    /// `reset` keeps the memory contents, this does not
    pub fn power_cycle(&mut self) {
        self.erase_memory();
        self.reset();
    }

    fn erase_memory(&mut self) {
        self.memory.fill(0xff);
    }
}

impl I2CDevice for AT24C {
    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if self.address_received < self.address_width {
                self.take_address_byte(byte);
            } else {
                self.write_memory(byte);
            }
        }
        tracing::trace!(pointer = self.pointer, count = bytes.len(), "AT24C: write");
    }

    fn read(&mut self, count: usize) -> Vec<u8> {
        self.address_received = 0;
        (0..count)
            .map(|_| {
                let value = self.memory[self.pointer];
                self.pointer = (self.pointer + 1) % self.memory.len();
                value
            })
            .collect()
    }

    fn finish_transaction(&mut self) {
        self.address_received = 0;
    }

    fn reset(&mut self) {
        self.pointer = 0;
        self.address_received = 0;
    }
}
