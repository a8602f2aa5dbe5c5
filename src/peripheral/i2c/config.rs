//! Per-instance controller policy.
//!
//! Real controllers disagree on FIFO depth, how reads are requested from the
//! target, what happens to queued bytes on a repeated start and what a read
//! past the end of a burst returns. All of that is captured here so a single
//! transaction engine can stand in for each of them.

use std::fmt;

use serde::Deserialize;

use crate::{
    interrupt::{I2CCondition, I2CStatus},
    peripheral::i2c::fifo::Watermark,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestGranularity {
    /// One `read(1)` per refill, as byte-oriented controllers do
    Byte,
    /// `read(n)` sized by the transfer-size field
    #[default]
    Bulk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    /// Queued TX bytes are written to the device before the new address phase
    #[default]
    Flush,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BurstEndPolicy {
    /// Reads past the end of a burst return the sentinel and flag underflow
    #[default]
    Pad,
    /// Reads past the end of a burst issue a fresh device read
    Refill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TxFlushPolicy {
    /// TX bytes are collected and written once, at stop or repeated start
    #[default]
    OnStop,
    /// A full TX FIFO is shifted out to the device immediately
    WhenFull,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct I2CControllerConfig {
    pub tx_capacity: usize, // 0 = unbounded
    pub rx_capacity: usize, // 0 = unbounded
    pub request_granularity: RequestGranularity,
    pub restart_policy: RestartPolicy,
    pub burst_end: BurstEndPolicy,
    pub tx_flush: TxFlushPolicy,
    pub underflow_sentinel: u8,
    /// Addressing from `Idle` behaves as if a start had been requested first
    pub implicit_start: bool,
    pub tx_watermark: Option<Watermark>,
    pub rx_watermark: Option<Watermark>,
    /// Conditions enabled at power-up and after reset
    pub enabled: Vec<I2CCondition>,
    /// Per-cause interrupt lines. Empty means a single line fed by everything.
    pub lines: Vec<Vec<I2CCondition>>,
}

impl Default for I2CControllerConfig {
    fn default() -> Self {
        Self {
            tx_capacity: 16,
            rx_capacity: 16,
            request_granularity: RequestGranularity::Bulk,
            restart_policy: RestartPolicy::Flush,
            burst_end: BurstEndPolicy::Pad,
            tx_flush: TxFlushPolicy::OnStop,
            underflow_sentinel: 0x00,
            implicit_start: true,
            tx_watermark: None,
            rx_watermark: None,
            enabled: vec![],
            lines: vec![],
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    /// TOML parsing failed
    Toml(toml::de::Error),
    /// Watermark threshold does not fit the FIFO
    WatermarkOutOfRange { fifo: &'static str, threshold: usize },
    /// A line group with no conditions can never fire
    EmptyLine(usize),
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Toml(e)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Toml(e) => write!(f, "invalid controller config: {}", e),
            ConfigError::WatermarkOutOfRange { fifo, threshold } => write!(
                f,
                "{} watermark threshold {} exceeds the FIFO capacity",
                fifo, threshold
            ),
            ConfigError::EmptyLine(index) => {
                write!(f, "interrupt line {} has no conditions", index)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Toml(e) => Some(e),
            _ => None,
        }
    }
}

impl I2CControllerConfig {
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Single data register in each direction, one byte per request (AVR TWI style)
    pub fn byte_oriented() -> Self {
        Self {
            tx_capacity: 0,
            rx_capacity: 1,
            request_granularity: RequestGranularity::Byte,
            ..Self::default()
        }
    }

    /// FIFO-based controller of the given depth with bulk requests
    pub fn fifo(depth: usize) -> Self {
        Self {
            tx_capacity: depth,
            rx_capacity: depth,
            tx_watermark: Some(Watermark::at_or_below(depth / 4)),
            rx_watermark: Some(Watermark::at_or_above(depth.saturating_sub(depth / 4).max(1))),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_watermark("tx", self.tx_capacity, self.tx_watermark)?;
        check_watermark("rx", self.rx_capacity, self.rx_watermark)?;
        if let Some(index) = self.lines.iter().position(|line| line.is_empty()) {
            return Err(ConfigError::EmptyLine(index));
        }
        Ok(())
    }

    pub fn enable_mask(&self) -> I2CStatus {
        conditions_mask(&self.enabled)
    }

    pub fn line_masks(&self) -> Vec<I2CStatus> {
        self.lines.iter().map(|line| conditions_mask(line)).collect()
    }
}

fn conditions_mask(conditions: &[I2CCondition]) -> I2CStatus {
    conditions
        .iter()
        .fold(I2CStatus::empty(), |mask, condition| mask | condition.mask())
}

fn check_watermark(
    fifo: &'static str,
    capacity: usize,
    watermark: Option<Watermark>,
) -> Result<(), ConfigError> {
    let Some(watermark) = watermark else {
        return Ok(());
    };
    if capacity != 0 && watermark.threshold > capacity {
        return Err(ConfigError::WatermarkOutOfRange {
            fifo,
            threshold: watermark.threshold,
        });
    }
    Ok(())
}
