use std::{collections::HashMap, fmt};

pub const MAX_SEVEN_BIT_ADDRESS: u16 = 0x7f;
pub const MAX_TEN_BIT_ADDRESS: u16 = 0x3ff;

/// First address byte of a 10-bit transfer: `11110xx` followed by R/W
pub const TEN_BIT_PREFIX: u8 = 0b1111_0000;
pub const TEN_BIT_PREFIX_MASK: u8 = 0b1111_1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum I2CAddress {
    SevenBit(u8),
    TenBit(u16),
}

impl I2CAddress {
    pub fn is_valid(&self) -> bool {
        match *self {
            I2CAddress::SevenBit(address) => address as u16 <= MAX_SEVEN_BIT_ADDRESS,
            I2CAddress::TenBit(address) => address <= MAX_TEN_BIT_ADDRESS,
        }
    }
}

impl fmt::Display for I2CAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            I2CAddress::SevenBit(address) => write!(f, "{:#04x}", address),
            I2CAddress::TenBit(address) => write!(f, "{:#05x} (10-bit)", address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Write, // controller -> device
    Read,  // device -> controller
}

impl Direction {
    pub fn from_rw_bit(rw: u8) -> Self {
        crate::ternary!(rw & 0x1, Direction::Read, Direction::Write)
    }

    pub fn is_read(&self) -> bool {
        matches!(self, Direction::Read)
    }
}

/// A target device connected to the bus.
///
/// All calls are synchronous and must return promptly. None of them can fail
/// from the controller's point of view; a device that cannot honour a request
/// logs it and carries on.
pub trait I2CDevice: Send {
    /// Bytes sent by the controller during one write phase
    fn write(&mut self, bytes: &[u8]);

    /// Produce up to `count` bytes. Returning fewer is a short read.
    fn read(&mut self, count: usize) -> Vec<u8>;

    /// A stop condition ended the transaction. Must be idempotent.
    fn finish_transaction(&mut self);

    /// Return to power-up state
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    AddressInUse(I2CAddress),
    InvalidAddress(I2CAddress),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::AddressInUse(address) => {
                write!(f, "a device is already attached at {}", address)
            }
            BusError::InvalidAddress(address) => write!(f, "{} is not a valid bus address", address),
        }
    }
}

impl std::error::Error for BusError {}

/// Devices attached to one I2C bus, keyed by address
#[derive(Default)]
pub struct I2CBus {
    devices: HashMap<I2CAddress, Box<dyn I2CDevice>>,
}

impl I2CBus {
    pub fn new() -> Self {
        Self {
            devices: HashMap::new(),
        }
    }

    pub fn attach(
        &mut self,
        address: I2CAddress,
        device: Box<dyn I2CDevice>,
    ) -> Result<(), BusError> {
        if !address.is_valid() {
            return Err(BusError::InvalidAddress(address));
        }
        if self.devices.contains_key(&address) {
            return Err(BusError::AddressInUse(address));
        }
        tracing::debug!(%address, "device attached");
        self.devices.insert(address, device);
        Ok(())
    }

    pub fn detach(&mut self, address: I2CAddress) -> Option<Box<dyn I2CDevice>> {
        let device = self.devices.remove(&address);
        if device.is_some() {
            tracing::debug!(%address, "device detached");
        }
        device
    }

    pub fn contains(&self, address: I2CAddress) -> bool {
        self.devices.contains_key(&address)
    }

    pub fn device_mut(&mut self, address: I2CAddress) -> Option<&mut (dyn I2CDevice + 'static)> {
        self.devices.get_mut(&address).map(|device| device.as_mut())
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Sorted, so listings are stable
    pub fn addresses(&self) -> Vec<I2CAddress> {
        let mut addresses: Vec<I2CAddress> = self.devices.keys().copied().collect();
        addresses.sort();
        addresses
    }

    pub fn reset_devices(&mut self) {
        for device in self.devices.values_mut() {
            device.reset();
        }
    }
}

#[cfg(test)]
pub(crate) mod bus_tests {
    use std::sync::{Arc, Mutex};

    use super::{BusError, Direction, I2CAddress, I2CBus, I2CDevice};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum DeviceCall {
        Write(Vec<u8>),
        Read(usize),
        Finish,
        Reset,
    }

    pub type CallLog = Arc<Mutex<Vec<DeviceCall>>>;

    /// Records every contract call and answers reads from a scripted queue
    pub struct RecordingDevice {
        pub log: CallLog,
        pub replies: Vec<Vec<u8>>,
        pub default_reply: Option<u8>,
    }

    impl RecordingDevice {
        pub fn new() -> (Self, CallLog) {
            let log: CallLog = Arc::new(Mutex::new(vec![]));
            let device = Self {
                log: log.clone(),
                replies: vec![],
                default_reply: None,
            };
            (device, log)
        }

        pub fn with_replies(replies: Vec<Vec<u8>>) -> (Self, CallLog) {
            let (mut device, log) = Self::new();
            device.replies = replies;
            (device, log)
        }

        /// Answers every read with `count` copies of `value`
        pub fn filled(value: u8) -> (Self, CallLog) {
            let (mut device, log) = Self::new();
            device.default_reply = Some(value);
            (device, log)
        }
    }

    impl I2CDevice for RecordingDevice {
        fn write(&mut self, bytes: &[u8]) {
            self.log.lock().unwrap().push(DeviceCall::Write(bytes.to_vec()));
        }

        fn read(&mut self, count: usize) -> Vec<u8> {
            self.log.lock().unwrap().push(DeviceCall::Read(count));
            if !self.replies.is_empty() {
                return self.replies.remove(0);
            }
            match self.default_reply {
                Some(value) => vec![value; count],
                None => vec![],
            }
        }

        fn finish_transaction(&mut self) {
            self.log.lock().unwrap().push(DeviceCall::Finish);
        }

        fn reset(&mut self) {
            self.log.lock().unwrap().push(DeviceCall::Reset);
        }
    }

    #[test]
    fn attach_and_lookup() {
        // Arrange
        let mut bus = I2CBus::new();
        let (device, _) = RecordingDevice::new();

        // Act
        bus.attach(I2CAddress::SevenBit(0x50), Box::new(device)).unwrap();

        // Assert
        assert!(bus.contains(I2CAddress::SevenBit(0x50)));
        assert!(!bus.contains(I2CAddress::TenBit(0x50))); // separate address space
        assert!(bus.device_mut(I2CAddress::SevenBit(0x50)).is_some());
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn one_device_per_address() {
        let mut bus = I2CBus::new();
        let (first, _) = RecordingDevice::new();
        let (second, _) = RecordingDevice::new();
        bus.attach(I2CAddress::SevenBit(0x36), Box::new(first)).unwrap();

        let result = bus.attach(I2CAddress::SevenBit(0x36), Box::new(second));

        assert_eq!(
            result.err(),
            Some(BusError::AddressInUse(I2CAddress::SevenBit(0x36)))
        );
    }

    #[test]
    fn rejects_out_of_range_addresses() {
        let mut bus = I2CBus::new();
        let (a, _) = RecordingDevice::new();
        let (b, _) = RecordingDevice::new();

        assert_eq!(
            bus.attach(I2CAddress::SevenBit(0x80), Box::new(a)).err(),
            Some(BusError::InvalidAddress(I2CAddress::SevenBit(0x80)))
        );
        assert_eq!(
            bus.attach(I2CAddress::TenBit(0x400), Box::new(b)).err(),
            Some(BusError::InvalidAddress(I2CAddress::TenBit(0x400)))
        );
        assert!(bus.is_empty());
    }

    #[test]
    fn detach_returns_device() {
        let mut bus = I2CBus::new();
        let (device, _) = RecordingDevice::new();
        bus.attach(I2CAddress::TenBit(0x123), Box::new(device)).unwrap();

        assert!(bus.detach(I2CAddress::TenBit(0x123)).is_some());
        assert!(bus.detach(I2CAddress::TenBit(0x123)).is_none());
        assert!(bus.is_empty());
    }

    #[test]
    fn reset_devices_reaches_every_device() {
        let mut bus = I2CBus::new();
        let (a, log_a) = RecordingDevice::new();
        let (b, log_b) = RecordingDevice::new();
        bus.attach(I2CAddress::SevenBit(0x10), Box::new(a)).unwrap();
        bus.attach(I2CAddress::SevenBit(0x11), Box::new(b)).unwrap();

        bus.reset_devices();

        assert_eq!(*log_a.lock().unwrap(), vec![DeviceCall::Reset]);
        assert_eq!(*log_b.lock().unwrap(), vec![DeviceCall::Reset]);
    }

    #[test]
    fn addresses_sorted() {
        let mut bus = I2CBus::new();
        for address in [0x52, 0x10, 0x36] {
            let (device, _) = RecordingDevice::new();
            bus.attach(I2CAddress::SevenBit(address), Box::new(device)).unwrap();
        }
        assert_eq!(
            bus.addresses(),
            vec![
                I2CAddress::SevenBit(0x10),
                I2CAddress::SevenBit(0x36),
                I2CAddress::SevenBit(0x52)
            ]
        );
    }

    #[test]
    fn direction_from_rw_bit() {
        assert_eq!(Direction::from_rw_bit(0xa1), Direction::Read);
        assert_eq!(Direction::from_rw_bit(0xa0), Direction::Write);
    }
}
