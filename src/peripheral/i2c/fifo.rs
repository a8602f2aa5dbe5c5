use std::collections::VecDeque;

use serde::Deserialize;

use crate::ternary;

/// Returned by [`I2CFifo::push`] when the FIFO is full. The byte was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overflow(pub u8);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WatermarkTrigger {
    AtOrAbove, // len() >= threshold, typical for RX
    AtOrBelow, // len() <= threshold, typical for TX
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Watermark {
    pub threshold: usize,
    pub trigger: WatermarkTrigger,
}

impl Watermark {
    pub fn at_or_above(threshold: usize) -> Self {
        Self {
            threshold,
            trigger: WatermarkTrigger::AtOrAbove,
        }
    }

    pub fn at_or_below(threshold: usize) -> Self {
        Self {
            threshold,
            trigger: WatermarkTrigger::AtOrBelow,
        }
    }

    pub fn reached(&self, len: usize) -> bool {
        match self.trigger {
            WatermarkTrigger::AtOrAbove => len >= self.threshold,
            WatermarkTrigger::AtOrBelow => len <= self.threshold,
        }
    }
}

/// Byte FIFO sitting between the controller and the addressed device.
///
/// The FIFO has no opinion about what a dropped byte means: overflow is
/// reported to the caller, which decides which status bit to raise.
#[derive(Debug, Clone)]
pub struct I2CFifo {
    data: VecDeque<u8>,
    capacity: Option<usize>, // None models an unbounded software-side buffer
    watermark: Option<Watermark>,
}

impl I2CFifo {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: VecDeque::with_capacity(capacity),
            capacity: Some(capacity),
            watermark: None,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            data: VecDeque::new(),
            capacity: None,
            watermark: None,
        }
    }

    /// `0` selects an unbounded FIFO
    pub fn with_depth(depth: usize) -> Self {
        ternary!(depth, Self::new(depth), Self::unbounded())
    }

    pub fn with_watermark(mut self, watermark: Option<Watermark>) -> Self {
        self.watermark = watermark;
        self
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|capacity| self.data.len() >= capacity)
    }

    /// Number of bytes that can still be pushed, `usize::MAX` when unbounded
    pub fn free(&self) -> usize {
        match self.capacity {
            Some(capacity) => capacity.saturating_sub(self.data.len()),
            None => usize::MAX,
        }
    }

    pub fn push(&mut self, value: u8) -> Result<(), Overflow> {
        if self.is_full() {
            return Err(Overflow(value));
        }
        self.data.push_back(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<u8> {
        self.data.pop_front()
    }

    /// Removes every queued byte at once, oldest first
    pub fn drain_all(&mut self) -> Vec<u8> {
        self.data.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    pub fn watermark(&self) -> Option<Watermark> {
        self.watermark
    }

    pub fn watermark_reached(&self) -> bool {
        self.watermark
            .is_some_and(|watermark| watermark.reached(self.data.len()))
    }
}

#[cfg(test)]
mod fifo_tests {
    use proptest::{collection::vec, prelude::any, prop_assert_eq, proptest};

    use super::{I2CFifo, Overflow, Watermark};

    #[test]
    fn push_pop_in_order() {
        // Arrange
        let mut fifo = I2CFifo::new(4);

        // Act
        fifo.push(0x10).unwrap();
        fifo.push(0x20).unwrap();

        // Assert
        assert_eq!(fifo.len(), 2);
        assert_eq!(fifo.pop(), Some(0x10));
        assert_eq!(fifo.pop(), Some(0x20));
        assert_eq!(fifo.pop(), None);
    }

    #[test]
    fn overflow_drops_byte_and_keeps_length() {
        // Arrange
        let mut fifo = I2CFifo::new(2);
        fifo.push(1).unwrap();
        fifo.push(2).unwrap();

        // Act
        let result = fifo.push(3);

        // Assert
        assert_eq!(result, Err(Overflow(3)));
        assert_eq!(fifo.len(), 2);
        assert_eq!(fifo.drain_all(), vec![1, 2]);
    }

    #[test]
    fn unbounded_never_overflows() {
        let mut fifo = I2CFifo::with_depth(0);
        for i in 0..1000 {
            fifo.push(i as u8).unwrap();
        }
        assert_eq!(fifo.capacity(), None);
        assert_eq!(fifo.len(), 1000);
        assert!(!fifo.is_full());
    }

    #[test]
    fn drain_all_empties_fifo() {
        let mut fifo = I2CFifo::new(8);
        for byte in [0xaa, 0xbb, 0xcc] {
            fifo.push(byte).unwrap();
        }

        assert_eq!(fifo.drain_all(), vec![0xaa, 0xbb, 0xcc]);
        assert!(fifo.is_empty());
        assert_eq!(fifo.free(), 8);
    }

    #[test]
    fn watermark_directions() {
        // Arrange
        let mut rx = I2CFifo::new(8).with_watermark(Some(Watermark::at_or_above(3)));
        let mut tx = I2CFifo::new(8).with_watermark(Some(Watermark::at_or_below(1)));

        // Act & Assert
        rx.push(1).unwrap();
        rx.push(2).unwrap();
        assert!(!rx.watermark_reached());
        rx.push(3).unwrap();
        assert!(rx.watermark_reached());

        assert!(tx.watermark_reached()); // empty is below threshold
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        assert!(!tx.watermark_reached());
        tx.pop();
        assert!(tx.watermark_reached());
    }

    #[test]
    fn no_watermark_never_reached() {
        let fifo = I2CFifo::new(1);
        assert!(!fifo.watermark_reached());
    }

    proptest! {
        #[test]
        fn pops_match_pushes(bytes in vec(any::<u8>(), 0..=32)) {
            let mut fifo = I2CFifo::new(32);
            for &byte in &bytes {
                fifo.push(byte).unwrap();
            }
            let popped: Vec<u8> = std::iter::from_fn(|| fifo.pop()).collect();
            prop_assert_eq!(popped, bytes);
        }

        #[test]
        fn length_never_exceeds_capacity(capacity in 1usize..16, bytes in vec(any::<u8>(), 0..64)) {
            let mut fifo = I2CFifo::new(capacity);
            let mut dropped = 0;
            for &byte in &bytes {
                if fifo.push(byte).is_err() {
                    dropped += 1;
                }
            }
            prop_assert_eq!(fifo.len(), bytes.len().min(capacity));
            prop_assert_eq!(dropped, bytes.len().saturating_sub(capacity));
        }
    }
}
