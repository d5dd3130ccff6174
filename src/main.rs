// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// XMODEM protocol implementation
mod protocol;
mod receiver;
mod sender;
mod serial;
mod session;

use clap::{Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

use protocol::BLOCK_SIZE;
use receiver::Receiver;
use sender::Sender;
use serial::SerialLink;
use session::{BlockStatus, TransferError};

#[derive(Parser)]
#[command(name = "xmlink")]
#[command(about = "XMODEM protocol implementation for RS-232 file transfer", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS")]
    stop_bits: u8,

    /// Per-wait timeout in milliseconds
    #[arg(long, default_value = "1000", value_name = "MS")]
    timeout: u64,

    /// Retry budget per protocol step
    #[arg(long, default_value = "10", value_name = "COUNT")]
    retries: u32,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file as 128-byte XMODEM blocks
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Receive XMODEM blocks into a file
    Receive {
        /// File to write
        file: PathBuf,
    },
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug)]
enum AppError {
    Io(std::io::Error),
    Transfer(TransferError),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppError::Io(e) => write!(f, "I/O error: {}", e),
            AppError::Transfer(e) => write!(f, "transfer error: {}", e),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Io(e) => Some(e),
            AppError::Transfer(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        AppError::Transfer(err)
    }
}

// ============================================================================
// Serial Parameter Parsing
// ============================================================================

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let cli = Cli::parse();

    let data_bits = match parse_data_bits(cli.data_bits) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let parity = match parse_parity(&cli.parity) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let stop_bits = match parse_stop_bits(cli.stop_bits) {
        Ok(sb) => sb,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    println!("Opening serial port: {}", cli.port);
    println!("Settings: {} baud, {:?}, {:?}, {:?}", cli.baud, data_bits, parity, stop_bits);

    let link = match SerialLink::open(&cli.port, cli.baud, data_bits, parity, stop_bits) {
        Ok(link) => link,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    let timeout = Duration::from_millis(cli.timeout);

    match cli.command {
        Commands::Send { file } => {
            println!("\nSending file: {}", file.display());
            if let Err(e) = send_file(link, file, timeout, cli.retries, cli.debug) {
                eprintln!("Send failed: {}", e);
                std::process::exit(1);
            }
            println!("\nFile sent successfully!");
        }
        Commands::Receive { file } => {
            println!("\nReceiving into: {}", file.display());
            if let Err(e) = receive_file(link, file, timeout, cli.retries, cli.debug) {
                eprintln!("Receive failed: {}", e);
                std::process::exit(1);
            }
            println!("\nFile received successfully!");
        }
    }
}

// ============================================================================
// Transfer Drivers
// ============================================================================

fn send_file(
    link: SerialLink,
    file: PathBuf,
    timeout: Duration,
    retries: u32,
    debug: bool,
) -> Result<(), AppError> {
    let mut source = File::open(&file)?;
    let mut session = Sender::new(Box::new(link), timeout, retries);

    session.begin()?;
    if debug {
        println!("Receiver ready");
    }

    let mut buf = [0u8; BLOCK_SIZE];
    let mut seq: u8 = 1;
    let mut blocks: u32 = 0;

    loop {
        let count = read_block(&mut source, &mut buf)?;
        if count == 0 {
            break;
        }

        match session.send_block(&buf[..count], seq) {
            Ok(sent) => {
                if debug {
                    println!("Sent block {} ({} bytes)", blocks + 1, sent);
                }
                blocks += 1;
                seq = seq.wrapping_add(1);
            }
            Err(TransferError::Cancelled) => {
                return Err(AppError::Transfer(TransferError::Cancelled));
            }
            Err(e) => {
                session.cancel();
                return Err(AppError::Transfer(e));
            }
        }
    }

    session.end()?;
    if debug {
        println!("Session closed: {:?}", session.state());
    }
    println!("Sent {} blocks", blocks);
    Ok(())
}

fn receive_file(
    link: SerialLink,
    file: PathBuf,
    timeout: Duration,
    retries: u32,
    debug: bool,
) -> Result<(), AppError> {
    let mut output = File::create(&file)?;
    let mut session = Receiver::new(Box::new(link), timeout, retries);

    session.begin()?;
    if debug {
        println!("Ready signal sent");
    }

    let mut buf = [0u8; BLOCK_SIZE];
    let mut seq: u8 = 1;
    let mut blocks: u32 = 0;
    let mut failures: u32 = 0;

    loop {
        match session.recv_block(&mut buf, seq) {
            Ok(BlockStatus::Received(count)) => {
                output.write_all(&buf[..count])?;
                if debug {
                    println!("Stored block {} ({} bytes)", blocks + 1, count);
                }
                blocks += 1;
                seq = seq.wrapping_add(1);
                failures = 0;
            }
            Ok(BlockStatus::Finished) => {
                session.end()?;
                break;
            }
            Err(TransferError::Cancelled) => {
                return Err(AppError::Transfer(TransferError::Cancelled));
            }
            Err(e @ (TransferError::Nak | TransferError::Timeout)) => {
                // The engine already re-NAKed; let the sender try again
                failures += 1;
                if debug {
                    println!("Block {} attempt failed: {}", blocks + 1, e);
                }
                if failures >= retries {
                    session.cancel();
                    return Err(AppError::Transfer(e));
                }
            }
            Err(e) => {
                session.cancel();
                return Err(AppError::Transfer(e));
            }
        }
    }

    output.flush()?;
    if debug {
        println!("Session closed: {:?}", session.state());
    }
    println!("Received {} blocks", blocks);
    Ok(())
}

/// Fill `buf` from `source`, stopping early only at end of file. A plain
/// `read` may return short mid-file, which would misalign every block after
/// it.
fn read_block(source: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let count = source.read(&mut buf[filled..])?;
        if count == 0 {
            break;
        }
        filled += count;
    }
    Ok(filled)
}
