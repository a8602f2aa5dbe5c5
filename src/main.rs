use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

use anyhow::Context;
use clap::Parser;
use i2c_sim::{peripheral::i2c::config::I2CControllerConfig, runner::ScriptRunner};

mod cli;

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::prelude::*;

    let cli::App {
        script,
        config,
        output,
    } = cli::App::parse();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().without_time())
        .with(output.trace_filter)
        .init();

    let config = match config {
        Some(path) => {
            let source = read_file(&path)?;
            I2CControllerConfig::from_toml(&source)
                .with_context(|| format!("loading config {}", path.display()))?
        }
        None => I2CControllerConfig::default(),
    };

    let source = read_file(&script)?;
    let mut runner = ScriptRunner::new(config);
    tracing::debug!(config = ?runner.i2c.config(), "controller config");
    let printed = runner
        .run(&source)
        .with_context(|| format!("running {}", script.display()))?;
    for line in printed {
        println!("{}", line);
    }
    Ok(())
}

fn read_file(path: &Path) -> anyhow::Result<String> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut buf = String::new();
    reader
        .read_to_string(&mut buf)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(buf)
}
