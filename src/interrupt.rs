use std::{fmt, str::FromStr};

use bitflags::bitflags;
use serde::Deserialize;

bitflags! {
    /// Sticky status bits of an I2C controller, also used as the enable mask
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct I2CStatus: u32 {
        const START = 1 << 0;
        const ADDRESS_ACK = 1 << 1;
        const NACK = 1 << 2;
        const BYTE_COMPLETE = 1 << 3;
        const TX_EMPTY = 1 << 4;
        const RX_READY = 1 << 5;
        const STOP_DETECTED = 1 << 6;
        const ARBITRATION_LOST = 1 << 7;
        const TX_OVERFLOW = 1 << 8;
        const RX_OVERFLOW = 1 << 9;
        const RX_UNDERFLOW = 1 << 10;
        const TX_WATERMARK = 1 << 11;
        const RX_WATERMARK = 1 << 12;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum I2CCondition {
    Start,
    AddressAck,
    Nack,
    ByteComplete,
    TxEmpty,
    RxReady,
    StopDetected,
    ArbitrationLost,
    TxOverflow,
    RxOverflow,
    RxUnderflow,
    TxWatermark,
    RxWatermark,
}

impl I2CCondition {
    pub const ALL: [I2CCondition; 13] = [
        I2CCondition::Start,
        I2CCondition::AddressAck,
        I2CCondition::Nack,
        I2CCondition::ByteComplete,
        I2CCondition::TxEmpty,
        I2CCondition::RxReady,
        I2CCondition::StopDetected,
        I2CCondition::ArbitrationLost,
        I2CCondition::TxOverflow,
        I2CCondition::RxOverflow,
        I2CCondition::RxUnderflow,
        I2CCondition::TxWatermark,
        I2CCondition::RxWatermark,
    ];

    pub fn mask(self) -> I2CStatus {
        match self {
            I2CCondition::Start => I2CStatus::START,
            I2CCondition::AddressAck => I2CStatus::ADDRESS_ACK,
            I2CCondition::Nack => I2CStatus::NACK,
            I2CCondition::ByteComplete => I2CStatus::BYTE_COMPLETE,
            I2CCondition::TxEmpty => I2CStatus::TX_EMPTY,
            I2CCondition::RxReady => I2CStatus::RX_READY,
            I2CCondition::StopDetected => I2CStatus::STOP_DETECTED,
            I2CCondition::ArbitrationLost => I2CStatus::ARBITRATION_LOST,
            I2CCondition::TxOverflow => I2CStatus::TX_OVERFLOW,
            I2CCondition::RxOverflow => I2CStatus::RX_OVERFLOW,
            I2CCondition::RxUnderflow => I2CStatus::RX_UNDERFLOW,
            I2CCondition::TxWatermark => I2CStatus::TX_WATERMARK,
            I2CCondition::RxWatermark => I2CStatus::RX_WATERMARK,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            I2CCondition::Start => "start",
            I2CCondition::AddressAck => "address-ack",
            I2CCondition::Nack => "nack",
            I2CCondition::ByteComplete => "byte-complete",
            I2CCondition::TxEmpty => "tx-empty",
            I2CCondition::RxReady => "rx-ready",
            I2CCondition::StopDetected => "stop-detected",
            I2CCondition::ArbitrationLost => "arbitration-lost",
            I2CCondition::TxOverflow => "tx-overflow",
            I2CCondition::RxOverflow => "rx-overflow",
            I2CCondition::RxUnderflow => "rx-underflow",
            I2CCondition::TxWatermark => "tx-watermark",
            I2CCondition::RxWatermark => "rx-watermark",
        }
    }
}

impl fmt::Display for I2CCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCondition(pub String);

impl fmt::Display for UnknownCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown interrupt condition `{}`", self.0)
    }
}

impl std::error::Error for UnknownCondition {}

impl FromStr for I2CCondition {
    type Err = UnknownCondition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        I2CCondition::ALL
            .into_iter()
            .find(|condition| condition.name() == s)
            .ok_or_else(|| UnknownCondition(s.to_string()))
    }
}

/// Called with `(line, level)` whenever an interrupt line changes value
pub type IrqListener = Box<dyn FnMut(usize, bool) + Send>;

/// Sticky status bits, their enable mask and the interrupt line(s) they drive.
///
/// Every mutation recomputes the line levels before returning, so a reader
/// of [`InterruptAggregator::interrupt_line`] always sees the latest state.
/// Enabling or disabling a condition never touches its sticky flag.
pub struct InterruptAggregator {
    flags: I2CStatus,
    enables: I2CStatus,
    reset_enables: I2CStatus,

    lines: Vec<I2CStatus>, // conditions routed to each output line
    levels: Vec<bool>,

    listener: Option<IrqListener>,
}

impl InterruptAggregator {
    /// One output line fed by every condition
    pub fn single() -> Self {
        Self::with_lines(vec![I2CStatus::all()])
    }

    /// One output line per entry, each fed by the conditions in its mask
    pub fn with_lines(lines: Vec<I2CStatus>) -> Self {
        let lines = if lines.is_empty() {
            vec![I2CStatus::all()]
        } else {
            lines
        };
        let levels = vec![false; lines.len()];
        Self {
            flags: I2CStatus::empty(),
            enables: I2CStatus::empty(),
            reset_enables: I2CStatus::empty(),
            lines,
            levels,
            listener: None,
        }
    }

    /// Enable mask restored by [`InterruptAggregator::reset`]
    pub fn with_reset_enables(mut self, enables: I2CStatus) -> Self {
        self.reset_enables = enables;
        self.enables = enables;
        self.update_lines();
        self
    }

    pub fn set_listener(&mut self, listener: IrqListener) {
        self.listener = Some(listener);
    }

    pub fn raise(&mut self, condition: I2CCondition) {
        self.flags |= condition.mask();
        self.update_lines();
    }

    pub fn clear(&mut self, condition: I2CCondition) {
        self.flags &= !condition.mask();
        self.update_lines();
    }

    pub fn set_enable(&mut self, condition: I2CCondition, enabled: bool) {
        self.enables.set(condition.mask(), enabled);
        self.update_lines();
    }

    pub fn is_set(&self, condition: I2CCondition) -> bool {
        self.flags.contains(condition.mask())
    }

    pub fn is_enabled(&self, condition: I2CCondition) -> bool {
        self.enables.contains(condition.mask())
    }

    pub fn flags(&self) -> I2CStatus {
        self.flags
    }

    pub fn enables(&self) -> I2CStatus {
        self.enables
    }

    /// Sticky bits that are currently driving a line
    pub fn pending(&self) -> I2CStatus {
        self.flags & self.enables
    }

    /// Replaces the whole enable mask, as an interrupt-enable register write would
    pub fn write_enables(&mut self, enables: I2CStatus) {
        self.enables = enables;
        self.update_lines();
    }

    /// Write-one-to-clear
    pub fn clear_mask(&mut self, mask: I2CStatus) {
        self.flags &= !mask;
        self.update_lines();
    }

    /// Clears every sticky bit and restores the power-up enable mask
    pub fn reset(&mut self) {
        self.flags = I2CStatus::empty();
        self.enables = self.reset_enables;
        self.update_lines();
    }

    pub fn interrupt_line(&self) -> bool {
        self.levels.iter().any(|level| *level)
    }

    pub fn lines(&self) -> &[bool] {
        &self.levels
    }

    fn update_lines(&mut self) {
        let pending = self.pending();
        for (index, members) in self.lines.iter().enumerate() {
            let level = pending.intersects(*members);
            if self.levels[index] != level {
                self.levels[index] = level;
                tracing::trace!(line = index, level, "interrupt line changed");
                if let Some(listener) = self.listener.as_mut() {
                    listener(index, level);
                }
            }
        }
    }
}

impl Default for InterruptAggregator {
    fn default() -> Self {
        Self::single()
    }
}
