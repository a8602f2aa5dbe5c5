use std::sync::{Arc, Mutex};

use crate::{
    interrupt::{I2CCondition, I2CStatus, InterruptAggregator, IrqListener},
    peripheral::i2c::{
        bus::{BusError, Direction, I2CAddress, I2CBus, I2CDevice, TEN_BIT_PREFIX, TEN_BIT_PREFIX_MASK},
        config::{BurstEndPolicy, I2CControllerConfig, RequestGranularity, RestartPolicy, TxFlushPolicy},
        fifo::I2CFifo,
    },
    ternary,
};

pub mod bus;
pub mod config;
pub mod fifo;

/// A controller driven from several threads has to sit behind one lock
pub type SharedI2CController = Arc<Mutex<I2CController>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2CState {
    Idle,
    AwaitingAddress, // start sent, address not resolved yet
    Transmitting,
    Receiving,
    Error, // address phase failed, only stop is accepted
}

/// Protocol events, in the order the controller produced them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum I2CBusEvent {
    Start,
    RepeatedStart,
    AddressAck {
        address: I2CAddress,
        direction: Direction,
    },
    AddressNack {
        address: I2CAddress,
        direction: Direction,
    },
    ByteComplete(u8),
    ByteReceived(u8),
    Stop,
    ArbitrationLost,
    Reset,
}

// AVR TWSR status codes, for glue that exposes a status register
const STATUS_IDLE: u8 = 0xf8;
const STATUS_START: u8 = 0x08;
const STATUS_REPEATED_START: u8 = 0x10;
const STATUS_SLAW_ACK: u8 = 0x18;
const STATUS_SLAW_NACK: u8 = 0x20;
const STATUS_DATA_SENT_ACK: u8 = 0x28;
const STATUS_ARBITRATION_LOST: u8 = 0x38;
const STATUS_SLAR_ACK: u8 = 0x40;
const STATUS_SLAR_NACK: u8 = 0x48;
const STATUS_DATA_RECEIVED_ACK: u8 = 0x50;

impl I2CBusEvent {
    pub fn twi_status(&self) -> u8 {
        match self {
            I2CBusEvent::Start => STATUS_START,
            I2CBusEvent::RepeatedStart => STATUS_REPEATED_START,
            I2CBusEvent::AddressAck { direction, .. } => {
                ternary!(direction.is_read() as u8, STATUS_SLAR_ACK, STATUS_SLAW_ACK)
            }
            I2CBusEvent::AddressNack { direction, .. } => {
                ternary!(direction.is_read() as u8, STATUS_SLAR_NACK, STATUS_SLAW_NACK)
            }
            I2CBusEvent::ByteComplete(_) => STATUS_DATA_SENT_ACK,
            I2CBusEvent::ByteReceived(_) => STATUS_DATA_RECEIVED_ACK,
            I2CBusEvent::ArbitrationLost => STATUS_ARBITRATION_LOST,
            I2CBusEvent::Stop | I2CBusEvent::Reset => STATUS_IDLE,
        }
    }
}

/// Live state of the current bus operation
#[derive(Debug, Clone, Default)]
struct I2CTransaction {
    selected: Option<(I2CAddress, Direction)>,
    address_bytes: u8, // address-phase bytes consumed so far
    ten_bit_high: Option<u8>, // upper two bits from a `11110xx0` byte
    previous: Option<I2CAddress>, // device selected before the last repeated start
    pending_restart: bool,
    remaining: Option<usize>, // bytes still expected in this read burst, None = unbounded
}

impl I2CTransaction {
    fn restart(&mut self) {
        if let Some((address, _)) = self.selected.take() {
            self.previous = Some(address);
        }
        self.address_bytes = 0;
        self.ten_bit_high = None;
        self.pending_restart = true;
        self.remaining = None;
    }
}

/// Master-mode I2C transaction engine.
///
/// The register glue of a particular chip translates its register accesses
/// into calls on this type. Every call runs to completion: state transition,
/// FIFO movement, device calls and interrupt recomputation all happen before
/// it returns.
pub struct I2CController {
    config: I2CControllerConfig,
    pub bus: I2CBus,

    state: I2CState,
    transaction: Option<I2CTransaction>,
    engaged: Vec<I2CAddress>, // devices to notify at the next stop

    tx: I2CFifo,
    rx: I2CFifo,
    transfer_size: usize, // 0 = unbounded

    irq: InterruptAggregator,
    tx_watermark_level: bool,
    rx_watermark_level: bool,

    last_event: Option<I2CBusEvent>,
}

impl I2CController {
    pub fn new(config: I2CControllerConfig) -> Self {
        Self::with_bus(config, I2CBus::new())
    }

    pub fn with_bus(config: I2CControllerConfig, bus: I2CBus) -> Self {
        let tx = I2CFifo::with_depth(config.tx_capacity).with_watermark(config.tx_watermark);
        let rx = I2CFifo::with_depth(config.rx_capacity).with_watermark(config.rx_watermark);
        let irq = InterruptAggregator::with_lines(config.line_masks())
            .with_reset_enables(config.enable_mask());
        let mut i2c = Self {
            config,
            bus,
            state: I2CState::Idle,
            transaction: None,
            engaged: vec![],
            tx,
            rx,
            transfer_size: 0,
            irq,
            tx_watermark_level: false,
            rx_watermark_level: false,
            last_event: None,
        };
        i2c.latch_watermarks();
        i2c
    }

    pub fn into_shared(self) -> SharedI2CController {
        Arc::new(Mutex::new(self))
    }

    pub fn attach(&mut self, address: I2CAddress, device: Box<dyn I2CDevice>) -> Result<(), BusError> {
        self.bus.attach(address, device)
    }

    pub fn config(&self) -> &I2CControllerConfig {
        &self.config
    }

    pub fn state(&self) -> I2CState {
        self.state
    }

    pub fn last_event(&self) -> Option<I2CBusEvent> {
        self.last_event
    }

    pub fn selected(&self) -> Option<(I2CAddress, Direction)> {
        self.transaction.as_ref().and_then(|transaction| transaction.selected)
    }

    /// Address-phase bytes consumed by the current address phase
    pub fn address_bytes(&self) -> u8 {
        self.transaction
            .as_ref()
            .map_or(0, |transaction| transaction.address_bytes)
    }

    pub fn restart_pending(&self) -> bool {
        self.transaction
            .as_ref()
            .is_some_and(|transaction| transaction.pending_restart)
    }

    pub fn tx(&self) -> &I2CFifo {
        &self.tx
    }

    pub fn rx(&self) -> &I2CFifo {
        &self.rx
    }

    /// Number of bytes the next read phase expects from the device, `0` for unbounded
    pub fn set_transfer_size(&mut self, size: usize) {
        self.transfer_size = size;
    }

    pub fn transfer_size(&self) -> usize {
        self.transfer_size
    }

    // === protocol control ===

    pub fn request_start(&mut self) {
        match self.state {
            I2CState::Idle => self.begin(),
            I2CState::AwaitingAddress | I2CState::Transmitting | I2CState::Receiving => {
                self.request_restart()
            }
            I2CState::Error => self.misuse("start requested after a failed address phase"),
        }
    }

    pub fn request_restart(&mut self) {
        match self.state {
            I2CState::Idle => {
                tracing::debug!("repeated start on an idle bus, treated as start");
                self.begin();
            }
            I2CState::Error => self.misuse("repeated start requested after a failed address phase"),
            I2CState::Transmitting => {
                match self.config.restart_policy {
                    RestartPolicy::Flush => self.flush_tx_to_device(),
                    RestartPolicy::Discard => {
                        let dropped = self.tx.drain_all();
                        if !dropped.is_empty() {
                            tracing::debug!(count = dropped.len(), "unsent TX bytes discarded on repeated start");
                            self.irq.raise(I2CCondition::TxEmpty);
                        }
                    }
                }
                self.enter_restart();
            }
            I2CState::Receiving => {
                self.discard_rx("repeated start");
                self.enter_restart();
            }
            I2CState::AwaitingAddress => self.enter_restart(),
        }
    }

    pub fn request_stop(&mut self) {
        match self.state {
            I2CState::Idle => tracing::trace!("stop on an idle bus"),
            I2CState::Transmitting => {
                self.flush_tx_to_device();
                self.end_transaction();
            }
            I2CState::Receiving => {
                self.discard_rx("stop");
                self.end_transaction();
            }
            I2CState::AwaitingAddress | I2CState::Error => self.end_transaction(),
        }
    }

    /// Another master won the bus: drop everything without telling the devices
    pub fn signal_arbitration_lost(&mut self) {
        if self.state == I2CState::Idle {
            return self.misuse("arbitration loss signalled on an idle bus");
        }
        tracing::debug!(state = ?self.state, "arbitration lost");
        self.transaction = None;
        self.engaged.clear();
        self.tx.clear();
        self.rx.clear();
        self.state = I2CState::Idle;
        self.emit(I2CBusEvent::ArbitrationLost);
        self.update_watermarks();
    }

    /// Power-up state. In-flight data is discarded and no device is notified.
    pub fn reset(&mut self) {
        self.state = I2CState::Idle;
        self.transaction = None;
        self.engaged.clear();
        self.tx.clear();
        self.rx.clear();
        self.transfer_size = 0;
        self.irq.reset();
        self.latch_watermarks();
        self.last_event = Some(I2CBusEvent::Reset);
    }

    // === address phase ===

    pub fn set_address(&mut self, address: I2CAddress, is_read: bool) {
        if !self.ready_for_address() {
            return;
        }
        let direction = if is_read { Direction::Read } else { Direction::Write };
        if let Some(transaction) = self.transaction.as_mut() {
            transaction.address_bytes = match address {
                I2CAddress::SevenBit(_) => 1,
                I2CAddress::TenBit(_) => 2,
            };
        }
        self.resolve(address, direction);
    }

    /// Address byte as written to the data register of byte-oriented controllers:
    /// `address << 1 | r/w` for 7-bit, or the two-byte `11110xx0` form for 10-bit.
    pub fn write_address_byte(&mut self, byte: u8) {
        if !self.ready_for_address() {
            return;
        }
        let Some(transaction) = self.transaction.as_mut() else {
            return;
        };
        transaction.address_bytes += 1;

        if let Some(high) = transaction.ten_bit_high.take() {
            let address = I2CAddress::TenBit(((high as u16) << 8) | byte as u16);
            self.resolve(address, Direction::Write);
            return;
        }

        if byte & TEN_BIT_PREFIX_MASK != TEN_BIT_PREFIX {
            self.resolve(I2CAddress::SevenBit(byte >> 1), Direction::from_rw_bit(byte));
            return;
        }

        let high = (byte >> 1) & 0x3;
        match Direction::from_rw_bit(byte) {
            Direction::Write => {
                tracing::trace!(high, "10-bit address, waiting for low byte");
                transaction.ten_bit_high = Some(high);
            }
            Direction::Read => {
                // a 10-bit read only re-selects the device addressed before the repeated start
                let previous = match transaction.previous {
                    Some(I2CAddress::TenBit(address))
                        if transaction.pending_restart && (address >> 8) as u8 == high =>
                    {
                        Some(address)
                    }
                    _ => None,
                };
                match previous {
                    Some(address) => self.resolve(I2CAddress::TenBit(address), Direction::Read),
                    None => {
                        tracing::warn!(high, "10-bit read without a preceding 10-bit write address");
                        self.address_failed(I2CAddress::TenBit((high as u16) << 8), Direction::Read);
                    }
                }
            }
        }
    }

    // === data phase ===

    pub fn push_tx_byte(&mut self, value: u8) {
        match self.state {
            I2CState::Transmitting => {}
            I2CState::Idle => return self.misuse("data byte written while the bus is idle"),
            I2CState::AwaitingAddress => return self.misuse("data byte written before the address phase"),
            I2CState::Receiving => return self.misuse("data byte written during a read phase"),
            I2CState::Error => return self.misuse("data byte written after a failed address phase"),
        }

        match self.tx.push(value) {
            Ok(()) => {
                tracing::trace!(value, "TX byte queued");
                self.emit(I2CBusEvent::ByteComplete(value));
                if self.config.tx_flush == TxFlushPolicy::WhenFull && self.tx.is_full() {
                    self.flush_tx_to_device();
                }
            }
            Err(overflow) => {
                tracing::warn!(value = overflow.0, "TX FIFO full, byte dropped");
                self.irq.raise(I2CCondition::TxOverflow);
            }
        }
        self.update_watermarks();
    }

    /// Reads the receive data port. Never blocks: with nothing to return the
    /// configured sentinel comes back and RX underflow is flagged.
    pub fn pop_rx_byte(&mut self) -> u8 {
        if self.state != I2CState::Receiving {
            self.misuse("receive data read outside of a read phase");
            return self.underflow();
        }

        if self.rx.is_empty() {
            let burst_done = self
                .transaction
                .as_ref()
                .is_some_and(|transaction| transaction.remaining == Some(0));
            if !burst_done {
                self.fill_rx();
            } else if self.config.burst_end == BurstEndPolicy::Refill {
                tracing::debug!("burst exhausted, requesting a new one");
                let burst = self.transfer_size;
                if let Some(transaction) = self.transaction.as_mut() {
                    transaction.remaining = Some(burst.max(1));
                }
                self.fill_rx();
            }
        }

        match self.rx.pop() {
            Some(value) => {
                tracing::trace!(value, "RX byte read");
                self.emit(I2CBusEvent::ByteReceived(value));
                self.update_watermarks();
                value
            }
            None => self.underflow(),
        }
    }

    /// Discards queued TX bytes, as a FIFO reset bit would
    pub fn flush_tx(&mut self) {
        self.tx.clear();
        self.irq.raise(I2CCondition::TxEmpty);
        self.update_watermarks();
    }

    pub fn flush_rx(&mut self) {
        self.rx.clear();
        self.update_watermarks();
    }

    // === status & interrupts ===

    pub fn status_snapshot(&self) -> I2CStatus {
        self.irq.flags()
    }

    pub fn clear_sticky(&mut self, condition: I2CCondition) {
        self.irq.clear(condition);
    }

    pub fn set_enable(&mut self, condition: I2CCondition, enabled: bool) {
        self.irq.set_enable(condition, enabled);
    }

    pub fn interrupt_line(&self) -> bool {
        self.irq.interrupt_line()
    }

    pub fn interrupt_lines(&self) -> &[bool] {
        self.irq.lines()
    }

    pub fn set_irq_listener(&mut self, listener: IrqListener) {
        self.irq.set_listener(listener);
    }

    pub fn irq(&self) -> &InterruptAggregator {
        &self.irq
    }

    /// Raw access for register glue (enable register writes, write-one-to-clear)
    pub fn irq_mut(&mut self) -> &mut InterruptAggregator {
        &mut self.irq
    }

    // === internals ===

    fn begin(&mut self) {
        self.transaction = Some(I2CTransaction::default());
        self.state = I2CState::AwaitingAddress;
        self.emit(I2CBusEvent::Start);
    }

    fn enter_restart(&mut self) {
        self.transaction.get_or_insert_with(I2CTransaction::default).restart();
        self.state = I2CState::AwaitingAddress;
        self.emit(I2CBusEvent::RepeatedStart);
    }

    fn ready_for_address(&mut self) -> bool {
        match self.state {
            I2CState::AwaitingAddress => true,
            I2CState::Idle if self.config.implicit_start => {
                self.begin();
                true
            }
            I2CState::Idle => {
                self.misuse("address written without a start condition");
                false
            }
            I2CState::Transmitting | I2CState::Receiving => {
                self.misuse("address written during a data phase");
                false
            }
            I2CState::Error => {
                self.misuse("address written after a failed address phase");
                false
            }
        }
    }

    fn resolve(&mut self, address: I2CAddress, direction: Direction) {
        if !address.is_valid() || !self.bus.contains(address) {
            self.address_failed(address, direction);
            return;
        }

        if let Some(transaction) = self.transaction.as_mut() {
            transaction.selected = Some((address, direction));
            transaction.ten_bit_high = None;
            transaction.pending_restart = false;
        }
        if !self.engaged.contains(&address) {
            self.engaged.push(address);
        }
        self.emit(I2CBusEvent::AddressAck { address, direction });

        match direction {
            Direction::Write => {
                self.state = I2CState::Transmitting;
                if self.tx.is_empty() {
                    self.irq.raise(I2CCondition::TxEmpty);
                }
                self.update_watermarks();
            }
            Direction::Read => {
                self.state = I2CState::Receiving;
                let remaining = match self.transfer_size {
                    0 => None,
                    size => Some(size),
                };
                if let Some(transaction) = self.transaction.as_mut() {
                    transaction.remaining = remaining;
                }
                self.fill_rx();
            }
        }
    }

    fn address_failed(&mut self, address: I2CAddress, direction: Direction) {
        tracing::debug!(%address, ?direction, "address not acknowledged");
        self.tx.clear();
        self.transaction = None;
        self.state = I2CState::Error;
        self.emit(I2CBusEvent::AddressNack { address, direction });
        self.update_watermarks();
    }

    /// Requests the next chunk of the current read burst from the device
    fn fill_rx(&mut self) {
        let Some(transaction) = self.transaction.as_mut() else {
            return;
        };
        let Some((address, _)) = transaction.selected else {
            return;
        };

        let wanted = match self.config.request_granularity {
            RequestGranularity::Byte => 1,
            RequestGranularity::Bulk => transaction.remaining.unwrap_or(1),
        };
        let count = wanted
            .min(transaction.remaining.unwrap_or(usize::MAX))
            .min(self.rx.free());
        if count == 0 {
            return;
        }
        if let Some(remaining) = transaction.remaining.as_mut() {
            *remaining -= count;
        }

        let mut bytes = match self.bus.device_mut(address) {
            Some(device) => device.read(count),
            None => {
                tracing::warn!(%address, "selected device is gone");
                vec![]
            }
        };

        if bytes.len() < count {
            tracing::warn!(%address, requested = count, got = bytes.len(), "short read, zero-filled");
            bytes.resize(count, 0);
            self.irq.raise(I2CCondition::RxUnderflow);
        } else if bytes.len() > count {
            tracing::warn!(%address, requested = count, got = bytes.len(), "long read, truncated");
            bytes.truncate(count);
            self.irq.raise(I2CCondition::RxOverflow);
        }

        for byte in bytes {
            if let Err(overflow) = self.rx.push(byte) {
                tracing::warn!(value = overflow.0, "RX FIFO full, byte dropped");
                self.irq.raise(I2CCondition::RxOverflow);
            }
        }
        tracing::trace!(%address, count, "RX refilled");

        if !self.rx.is_empty() {
            self.irq.raise(I2CCondition::RxReady);
        }
        self.update_watermarks();
    }

    fn flush_tx_to_device(&mut self) {
        if self.tx.is_empty() {
            return;
        }
        let bytes = self.tx.drain_all();
        match self.selected() {
            Some((address, Direction::Write)) => match self.bus.device_mut(address) {
                Some(device) => {
                    tracing::debug!(%address, count = bytes.len(), "TX flushed to device");
                    device.write(&bytes);
                }
                None => tracing::warn!(%address, count = bytes.len(), "selected device is gone, TX dropped"),
            },
            _ => tracing::warn!(count = bytes.len(), "no write target, TX dropped"),
        }
        self.irq.raise(I2CCondition::TxEmpty);
        self.update_watermarks();
    }

    fn discard_rx(&mut self, reason: &str) {
        if !self.rx.is_empty() {
            tracing::debug!(count = self.rx.len(), reason, "unread RX bytes discarded");
            self.rx.clear();
        }
        self.update_watermarks();
    }

    fn end_transaction(&mut self) {
        for address in std::mem::take(&mut self.engaged) {
            if let Some(device) = self.bus.device_mut(address) {
                device.finish_transaction();
            }
        }
        self.transaction = None;
        self.tx.clear();
        self.rx.clear();
        self.state = I2CState::Idle;
        self.emit(I2CBusEvent::Stop);
        self.update_watermarks();
    }

    fn underflow(&mut self) -> u8 {
        tracing::warn!(sentinel = self.config.underflow_sentinel, "RX read with no data");
        self.irq.raise(I2CCondition::RxUnderflow);
        self.config.underflow_sentinel
    }

    fn misuse(&self, what: &str) {
        tracing::warn!(state = ?self.state, "{}, ignored", what);
    }

    fn emit(&mut self, event: I2CBusEvent) {
        match event {
            I2CBusEvent::Start | I2CBusEvent::RepeatedStart => {
                tracing::debug!(?event, "start condition");
                self.irq.raise(I2CCondition::Start);
            }
            I2CBusEvent::AddressAck { address, direction } => {
                tracing::debug!(%address, ?direction, "address acknowledged");
                self.irq.raise(I2CCondition::AddressAck);
            }
            I2CBusEvent::AddressNack { .. } => self.irq.raise(I2CCondition::Nack),
            I2CBusEvent::ByteComplete(_) => self.irq.raise(I2CCondition::ByteComplete),
            I2CBusEvent::Stop => {
                tracing::debug!("stop condition");
                self.irq.raise(I2CCondition::StopDetected);
            }
            I2CBusEvent::ArbitrationLost => self.irq.raise(I2CCondition::ArbitrationLost),
            I2CBusEvent::ByteReceived(_) | I2CBusEvent::Reset => {}
        }
        self.last_event = Some(event);
    }

    /// Raises the watermark conditions on the edge into the threshold
    fn update_watermarks(&mut self) {
        let tx_level = self.tx.watermark_reached();
        if tx_level && !self.tx_watermark_level {
            self.irq.raise(I2CCondition::TxWatermark);
        }
        self.tx_watermark_level = tx_level;

        let rx_level = self.rx.watermark_reached();
        if rx_level && !self.rx_watermark_level {
            self.irq.raise(I2CCondition::RxWatermark);
        }
        self.rx_watermark_level = rx_level;
    }

    fn latch_watermarks(&mut self) {
        self.tx_watermark_level = self.tx.watermark_reached();
        self.rx_watermark_level = self.rx.watermark_reached();
    }
}
