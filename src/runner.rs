//! Line-oriented replay of upstream operations against a controller.
//!
//! One command per line, `#` starts a comment. Numbers are decimal, `0x` hex
//! or `0b` binary. Addresses above `0x7f` are taken as 10-bit.
//!
//! ```text
//! attach at24c02 0x50
//! size 2
//! addr 0x50 w
//! tx 0x00 0xde 0xad
//! stop
//! addr 0x50 w
//! tx 0x00
//! restart
//! addr 0x50 r
//! rx 2
//! flush rx
//! status
//! ```

use std::fmt;

use crate::{
    eeprom::AT24C,
    encoder::AS5600,
    interrupt::I2CCondition,
    peripheral::i2c::{
        I2CController,
        bus::{BusError, I2CAddress, I2CDevice, MAX_SEVEN_BIT_ADDRESS},
        config::I2CControllerConfig,
    },
    util::parse_number,
};

/// Upper bound for a single `rx <count>`
const MAX_RX_COUNT: usize = 4096;

#[derive(Debug)]
pub enum ScriptError {
    UnknownCommand { line: usize, command: String },
    MissingArgument { line: usize, command: String },
    BadArgument { line: usize, argument: String },
    Bus { line: usize, source: BusError },
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::UnknownCommand { line, command } => {
                write!(f, "line {}: unknown command `{}`", line, command)
            }
            ScriptError::MissingArgument { line, command } => {
                write!(f, "line {}: `{}` is missing an argument", line, command)
            }
            ScriptError::BadArgument { line, argument } => {
                write!(f, "line {}: bad argument `{}`", line, argument)
            }
            ScriptError::Bus { line, source } => write!(f, "line {}: {}", line, source),
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScriptError::Bus { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub struct ScriptRunner {
    pub i2c: I2CController,
}

impl ScriptRunner {
    pub fn new(config: I2CControllerConfig) -> Self {
        Self {
            i2c: I2CController::new(config),
        }
    }

    /// Runs every line and returns what `rx`, `status` and `irq` printed
    pub fn run(&mut self, script: &str) -> Result<Vec<String>, ScriptError> {
        let mut output = vec![];
        for (index, line) in script.lines().enumerate() {
            if let Some(printed) = self.execute(index + 1, line)? {
                output.push(printed);
            }
        }
        Ok(output)
    }

    pub fn execute(&mut self, line: usize, text: &str) -> Result<Option<String>, ScriptError> {
        let text = text.split('#').next().unwrap_or("").trim();
        let mut tokens = text.split_whitespace();
        let Some(command) = tokens.next() else {
            return Ok(None);
        };
        let args: Vec<&str> = tokens.collect();
        let cmd = Command { line, name: command, args: &args };
        tracing::trace!(line, command, ?args, "script");

        match command {
            "attach" => {
                let kind = cmd.arg(0)?;
                let (device, default_address): (Box<dyn I2CDevice>, u16) = match kind {
                    "at24c02" => (Box::new(AT24C::at24c02()), 0x50),
                    "at24c256" => (Box::new(AT24C::at24c256()), 0x50),
                    "as5600" => (Box::new(AS5600::new()), 0x36),
                    _ => return Err(cmd.bad(kind)),
                };
                let address = match args.get(1) {
                    Some(_) => cmd.address(1)?,
                    None => to_address(default_address),
                };
                self.i2c
                    .attach(address, device)
                    .map_err(|source| ScriptError::Bus { line, source })?;
            }
            "detach" => {
                let address = cmd.address(0)?;
                if self.i2c.bus.detach(address).is_none() {
                    tracing::warn!(%address, "detach: nothing attached");
                }
            }
            "start" => self.i2c.request_start(),
            "restart" => self.i2c.request_restart(),
            "stop" => self.i2c.request_stop(),
            "reset" => self.i2c.reset(),
            "addr" => {
                let value = cmd.number(0)?;
                let address = u8::try_from(value).map_err(|_| cmd.bad(args[0]))?;
                self.i2c.set_address(I2CAddress::SevenBit(address), cmd.is_read(1)?);
            }
            "addr10" => {
                let value = cmd.number(0)?;
                let address = u16::try_from(value).map_err(|_| cmd.bad(args[0]))?;
                self.i2c.set_address(I2CAddress::TenBit(address), cmd.is_read(1)?);
            }
            "addr-byte" => {
                cmd.arg(0)?;
                for index in 0..args.len() {
                    let byte = cmd.byte(index)?;
                    self.i2c.write_address_byte(byte);
                }
            }
            "size" => {
                let size = cmd.number(0)?;
                self.i2c.set_transfer_size(size as usize);
            }
            "tx" => {
                cmd.arg(0)?;
                for index in 0..args.len() {
                    let byte = cmd.byte(index)?;
                    self.i2c.push_tx_byte(byte);
                }
            }
            "rx" => {
                let count = match args.first() {
                    Some(_) => cmd.number(0)? as usize,
                    None => 1,
                };
                if count > MAX_RX_COUNT {
                    return Err(cmd.bad(args[0]));
                }
                let bytes: Vec<String> = (0..count)
                    .map(|_| format!("{:02x}", self.i2c.pop_rx_byte()))
                    .collect();
                return Ok(Some(format!("rx: {}", bytes.join(" "))));
            }
            "flush" => match cmd.arg(0)? {
                "tx" => self.i2c.flush_tx(),
                "rx" => self.i2c.flush_rx(),
                other => return Err(cmd.bad(other)),
            },
            "status" => {
                let status = self.i2c.status_snapshot();
                let set: Vec<&str> = I2CCondition::ALL
                    .into_iter()
                    .filter(|condition| status.contains(condition.mask()))
                    .map(I2CCondition::name)
                    .collect();
                return Ok(Some(format!(
                    "status: {:?} [{}]",
                    self.i2c.state(),
                    set.join(" ")
                )));
            }
            "clear" => match cmd.arg(0)? {
                "all" => {
                    let status = self.i2c.status_snapshot();
                    self.i2c.irq_mut().clear_mask(status);
                }
                _ => self.i2c.clear_sticky(cmd.condition(0)?),
            },
            "enable" => self.i2c.set_enable(cmd.condition(0)?, true),
            "disable" => self.i2c.set_enable(cmd.condition(0)?, false),
            "irq" => {
                let lines: Vec<&str> = self
                    .i2c
                    .interrupt_lines()
                    .iter()
                    .map(|&level| if level { "1" } else { "0" })
                    .collect();
                return Ok(Some(format!("irq: {}", lines.join(" "))));
            }
            _ => {
                return Err(ScriptError::UnknownCommand {
                    line,
                    command: command.to_string(),
                });
            }
        }
        Ok(None)
    }
}

fn to_address(value: u16) -> I2CAddress {
    if value > MAX_SEVEN_BIT_ADDRESS {
        I2CAddress::TenBit(value)
    } else {
        I2CAddress::SevenBit(value as u8)
    }
}

/// Argument accessors that turn parse failures into line-numbered errors
struct Command<'a> {
    line: usize,
    name: &'a str,
    args: &'a [&'a str],
}

impl<'a> Command<'a> {
    fn arg(&self, index: usize) -> Result<&'a str, ScriptError> {
        self.args
            .get(index)
            .copied()
            .ok_or_else(|| ScriptError::MissingArgument {
                line: self.line,
                command: self.name.to_string(),
            })
    }

    fn bad(&self, argument: &str) -> ScriptError {
        ScriptError::BadArgument {
            line: self.line,
            argument: argument.to_string(),
        }
    }

    fn number(&self, index: usize) -> Result<u32, ScriptError> {
        let token = self.arg(index)?;
        parse_number(token).ok_or_else(|| self.bad(token))
    }

    fn byte(&self, index: usize) -> Result<u8, ScriptError> {
        let token = self.arg(index)?;
        parse_number(token)
            .and_then(|value| u8::try_from(value).ok())
            .ok_or_else(|| self.bad(token))
    }

    fn address(&self, index: usize) -> Result<I2CAddress, ScriptError> {
        let token = self.arg(index)?;
        parse_number(token)
            .and_then(|value| u16::try_from(value).ok())
            .map(to_address)
            .ok_or_else(|| self.bad(token))
    }

    fn is_read(&self, index: usize) -> Result<bool, ScriptError> {
        match self.arg(index)? {
            "r" | "read" => Ok(true),
            "w" | "write" => Ok(false),
            other => Err(self.bad(other)),
        }
    }

    fn condition(&self, index: usize) -> Result<I2CCondition, ScriptError> {
        let token = self.arg(index)?;
        token.parse().map_err(|_| self.bad(token))
    }
}

#[cfg(test)]
mod runner_tests {
    use super::{ScriptError, ScriptRunner};
    use crate::peripheral::i2c::{I2CState, config::I2CControllerConfig};

    #[test]
    fn eeprom_round_trip() {
        // Arrange
        let mut runner = ScriptRunner::new(I2CControllerConfig::default());
        let script = r#"
            attach at24c02          # defaults to 0x50
            addr 0x50 w
            tx 0x10 0xca 0xfe
            stop

            addr 0x50 w
            tx 0x10
            restart
            size 2
            addr 0x50 r
            rx 2
            stop
            status
        "#;

        // Act
        let output = runner.run(script).unwrap();

        // Assert
        assert_eq!(output[0], "rx: ca fe");
        assert!(output[1].starts_with("status: Idle"));
        assert!(output[1].contains("stop-detected"));
        assert_eq!(runner.i2c.state(), I2CState::Idle);
    }

    #[test]
    fn nack_and_interrupt_line() {
        let mut runner = ScriptRunner::new(I2CControllerConfig::default());
        let script = "
            enable nack
            start
            addr-byte 0xa0
            irq
            clear nack
            irq
            stop
        ";

        let output = runner.run(script).unwrap();

        assert_eq!(output, vec!["irq: 1", "irq: 0"]);
    }

    #[test]
    fn ten_bit_attach() {
        let mut runner = ScriptRunner::new(I2CControllerConfig::default());
        let output = runner
            .run("attach as5600 0x236\naddr10 0x236 w\ntx 0x0b\nrestart\naddr-byte 0xf5\nrx\n")
            .unwrap();
        assert_eq!(output, vec!["rx: 20"]);
    }

    #[test]
    fn clear_all() {
        let mut runner = ScriptRunner::new(I2CControllerConfig::default());
        let output = runner.run("start\nstop\nclear all\nstatus").unwrap();
        assert_eq!(output, vec!["status: Idle []"]);
    }

    #[test]
    fn unknown_command_reports_line() {
        let mut runner = ScriptRunner::new(I2CControllerConfig::default());

        let result = runner.run("start\n\nfrobnicate\n");

        assert!(matches!(
            result,
            Err(ScriptError::UnknownCommand { line: 3, ref command }) if command == "frobnicate"
        ));
    }

    #[test]
    fn bad_arguments() {
        let mut runner = ScriptRunner::new(I2CControllerConfig::default());

        assert!(matches!(
            runner.run("tx 0x100"),
            Err(ScriptError::BadArgument { line: 1, .. })
        ));
        assert!(matches!(
            runner.run("addr 0x50"),
            Err(ScriptError::MissingArgument { line: 1, .. })
        ));
        assert!(matches!(
            runner.run("enable nothing"),
            Err(ScriptError::BadArgument { line: 1, .. })
        ));
    }

    #[test]
    fn flush_commands() {
        // Arrange
        let mut runner = ScriptRunner::new(I2CControllerConfig::default());
        let script = "
            attach at24c02
            addr 0x50 w
            tx 0x00 0x11
            flush tx
            stop
            size 2
            addr 0x50 w
            tx 0x00
            restart
            addr 0x50 r
            flush rx
            rx
            status
        ";

        // Act
        let output = runner.run(script).unwrap();

        // Assert
        assert_eq!(output[0], "rx: 00"); // burst dropped, sentinel returned
        assert!(output[1].contains("rx-underflow"));
        assert!(matches!(
            runner.run("flush both"),
            Err(ScriptError::BadArgument { line: 1, .. })
        ));
    }

    #[test]
    fn rx_count_is_bounded() {
        let mut runner = ScriptRunner::new(I2CControllerConfig::default());

        let result = runner.run("rx 4000000000");

        assert!(matches!(
            result,
            Err(ScriptError::BadArgument { line: 1, ref argument }) if argument == "4000000000"
        ));
        assert!(runner.run("rx 4096").is_ok());
    }

    #[test]
    fn double_attach_is_bus_error() {
        let mut runner = ScriptRunner::new(I2CControllerConfig::default());
        let result = runner.run("attach at24c02\nattach as5600 0x50");
        assert!(matches!(result, Err(ScriptError::Bus { line: 2, .. })));
    }
}
