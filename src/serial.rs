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

use std::time::{Duration, Instant};
use serialport::{SerialPort, DataBits, Parity, StopBits};

// ============================================================================
// Link Trait
// ============================================================================

/// Byte link with a one-shot wait timer - the transport capability the
/// protocol engine is written against.
///
/// `write_byte` enqueues; `flush` drains the queue. The timer is armed per
/// wait: `timer_start`, then poll `timer_is_elapsed` until data arrives or
/// the duration passes.
pub trait Link: Send {
    /// Count of bytes readable right now without blocking.
    fn available(&mut self) -> u32;

    /// Next byte. Callers check `available` first; with no byte pending the
    /// result is unspecified.
    fn read_byte(&mut self) -> u8;

    fn write_byte(&mut self, byte: u8);

    /// Drain queued bytes to the line. The status is advisory; transport
    /// failures surface as timeouts on the reply wait.
    fn flush(&mut self) -> std::io::Result<()>;

    fn timer_start(&mut self, timeout: Duration);

    fn timer_stop(&mut self);

    fn timer_is_elapsed(&mut self) -> bool;

    fn timer_is_enabled(&mut self) -> bool;
}

// ============================================================================
// Real Serial Link
// ============================================================================

/// Serial port link backed by the serialport crate.
pub struct SerialLink {
    port: Box<dyn SerialPort>,
    tx_queue: Vec<u8>,
    deadline: Option<Instant>,
}

impl SerialLink {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(SerialLink {
            port,
            tx_queue: Vec::new(),
            deadline: None,
        })
    }
}

impl Link for SerialLink {
    fn available(&mut self) -> u32 {
        self.port.bytes_to_read().unwrap_or(0)
    }

    fn read_byte(&mut self) -> u8 {
        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(_) => buf[0],
            Err(_) => 0,
        }
    }

    fn write_byte(&mut self, byte: u8) {
        self.tx_queue.push(byte);
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port.write_all(&self.tx_queue)?;
        self.tx_queue.clear();
        self.port.flush()?;
        Ok(())
    }

    fn timer_start(&mut self, timeout: Duration) {
        self.deadline = Some(Instant::now() + timeout);
    }

    fn timer_stop(&mut self) {
        self.deadline = None;
    }

    fn timer_is_elapsed(&mut self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    fn timer_is_enabled(&mut self) -> bool {
        self.deadline.is_some()
    }
}

// ============================================================================
// Mock Link for Testing
// ============================================================================

#[cfg(test)]
pub struct MockLink {
    // Read script: Some(byte) is a byte on the line, None is a timeout marker
    reads: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
    armed: bool,
    // Poll budget per armed timer, so a starved wait terminates
    polls_left: u32,
}

#[cfg(test)]
impl MockLink {
    pub fn new(reads: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockLink {
            reads,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
            armed: false,
            polls_left: 0,
        }
    }
}

#[cfg(test)]
impl Link for MockLink {
    fn available(&mut self) -> u32 {
        self.reads[self.read_pos..]
            .iter()
            .take_while(|entry| entry.is_some())
            .count() as u32
    }

    fn read_byte(&mut self) -> u8 {
        let byte = self.reads[self.read_pos].expect("read_byte hit a timeout marker");
        self.read_pos += 1;
        byte
    }

    fn write_byte(&mut self, byte: u8) {
        self.write_log.push(byte);
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn timer_start(&mut self, _timeout: Duration) {
        self.armed = true;
        self.polls_left = 64;
    }

    fn timer_stop(&mut self) {
        self.armed = false;
    }

    fn timer_is_elapsed(&mut self) -> bool {
        if !self.armed {
            return false;
        }

        // Out of script, or a scripted timeout marker up next
        if self.read_pos >= self.reads.len() {
            return true;
        }
        if self.reads[self.read_pos].is_none() {
            self.read_pos += 1;
            return true;
        }

        self.polls_left = self.polls_left.saturating_sub(1);
        self.polls_left == 0
    }

    fn timer_is_enabled(&mut self) -> bool {
        self.armed
    }
}

#[cfg(test)]
impl Drop for MockLink {
    fn drop(&mut self) {
        assert_eq!(
            self.read_pos,
            self.reads.len(),
            "MockLink dropped with {} unconsumed responses (read {} of {})",
            self.reads.len() - self.read_pos,
            self.read_pos,
            self.reads.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockLink write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}
