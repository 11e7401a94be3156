// This file is part of stemlabd, an application to drive the signal-processing modules of a StemLab FPGA board over the network.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// stemlabd is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// stemlabd is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! `stemlab` - command-line client for the stemlabd daemon.
//!
//! Every command is one or a few DBus calls to `com.canonical.stemlabd` on the system bus.
//!
//! # Error Handling
//!
//! Errors raised by the daemon arrive as DBus errors whose message names the daemon error,
//! e.g. `StemlabError::UnknownModule: No module named 'pid7'`. They are printed as received
//! and the command exits with status 1.
//!
//! # Examples
//!
//! ```bash
//! stemlab status
//! stemlab get pid0 setpoint
//! stemlab set pid0 input in1
//! stemlab setup pid0 p=0.5 i=100 input=in1
//! stemlab acquire iir lockbox
//! stemlab read 0x40300100 4
//! ```

mod control;
mod proxies;
mod status;

use clap::{Parser, Subcommand};
use log::debug;

#[derive(Parser, Debug)]
#[command(name = "stemlab")]
#[command(bin_name = "stemlab")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show all modules with their owners, or the setup of one module
    Status { module: Option<String> },
    /// Show one attribute value, or the attribute names of a module
    Get {
        module: String,
        attribute: Option<String>,
    },
    /// Set one attribute value
    Set {
        module: String,
        attribute: String,
        value: String,
    },
    /// Apply several `name=value` assignments as one setup
    Setup {
        module: String,
        #[arg(required = true)]
        assignments: Vec<String>,
    },
    /// Reserve a module for an owner
    Acquire { module: String, owner: String },
    /// Free a module and restore its setup from before the acquisition
    Release { module: String },
    /// Mean, standard deviation, maximum and minimum of a signal
    Stats {
        signal: String,
        #[arg(long = "duration-ms", default_value_t = 100)]
        duration_ms: u32,
    },
    /// Print the last scope trace as `time ch1 ch2` columns
    Curve {
        #[arg(default_value = "scope")]
        module: String,
    },
    /// Read raw 32-bit registers
    Read {
        #[arg(value_parser = parse_number)]
        address: u32,
        #[arg(default_value_t = 1)]
        length: u32,
    },
    /// Write raw 32-bit registers starting at an address
    Write {
        #[arg(value_parser = parse_number)]
        address: u32,
        #[arg(required = true, value_parser = parse_number)]
        values: Vec<u32>,
    },
}

/// Decimal or `0x` prefixed hexadecimal.
fn parse_number(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse::<u32>(),
    };
    parsed.map_err(|e| format!("'{text}' is not a 32-bit number: {e}"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();
    debug!("parsed cli command with {cli:?}");
    let result = match cli.command {
        Commands::Status { module } => status::status_handler(&module).await,
        Commands::Get { module, attribute } => status::get_handler(&module, &attribute).await,
        Commands::Set {
            module,
            attribute,
            value,
        } => control::set_handler(&module, &attribute, &value).await,
        Commands::Setup {
            module,
            assignments,
        } => control::setup_handler(&module, &assignments).await,
        Commands::Acquire { module, owner } => control::acquire_handler(&module, &owner).await,
        Commands::Release { module } => control::release_handler(&module).await,
        Commands::Stats {
            signal,
            duration_ms,
        } => status::stats_handler(&signal, duration_ms).await,
        Commands::Curve { module } => status::curve_handler(&module).await,
        Commands::Read { address, length } => status::read_handler(address, length).await,
        Commands::Write { address, values } => control::write_handler(address, values).await,
    };
    match result {
        Ok(msg) => {
            println!("{msg}");
            Ok(())
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[rstest]
    #[case::decimal("256", 256)]
    #[case::hex("0x40300100", 0x4030_0100)]
    #[case::upper_hex("0XFF", 0xFF)]
    fn numbers_parse(#[case] text: &str, #[case] expected: u32) {
        assert_eq!(parse_number(text), Ok(expected));
    }

    #[rstest]
    #[case::negative("-1")]
    #[case::too_wide("0x100000000")]
    #[case::word("pid0")]
    fn other_text_is_rejected(#[case] text: &str) {
        assert!(parse_number(text).is_err());
    }

    #[test]
    fn setup_needs_assignments() {
        assert!(Cli::try_parse_from(["stemlab", "setup", "pid0"]).is_err());
        let cli = Cli::try_parse_from(["stemlab", "setup", "pid0", "p=0.5"]).expect("parse failed");
        assert!(matches!(cli.command, Commands::Setup { .. }));
    }
}
