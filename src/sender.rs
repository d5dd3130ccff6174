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

use std::time::Duration;
use crate::protocol::*;
use crate::serial::Link;
use crate::session::{self, SessionState, TransferError, wait_byte};

// ============================================================================
// Sender Session
// ============================================================================

/// Sending side of a transfer. One value drives at most one logical
/// transfer: `begin` once, `send_block` per block, `end` once.
pub struct Sender {
    link: Box<dyn Link>,
    timeout: Duration,
    attempts: u32,
    state: SessionState,
}

impl Sender {
    pub fn new(link: Box<dyn Link>, timeout: Duration, attempts: u32) -> Sender {
        Sender {
            link,
            timeout,
            attempts,
            state: SessionState::Idle,
        }
    }

    fn wait(&mut self, pending: u32) -> Result<u8, TransferError> {
        wait_byte(self.link.as_mut(), self.timeout, pending)
    }

    /// Poll for the receiver's ready signal (NAK).
    ///
    /// Every attempt re-polls with the full timeout; an unrecognized byte
    /// does not end the loop early. A cancel marker is answered with a
    /// single ACK before reporting.
    pub fn begin(&mut self) -> Result<(), TransferError> {
        for _ in 0..self.attempts {
            match self.wait(1) {
                Ok(NAK) => {
                    self.state = SessionState::Started;
                    return Ok(());
                }
                Ok(CAN) => {
                    self.link.write_byte(ACK);
                    let _ = self.link.flush();
                    self.state = SessionState::Cancelled;
                    return Err(TransferError::Cancelled);
                }
                _ => {}
            }
        }

        self.state = SessionState::Failed;
        Err(TransferError::Unknown)
    }

    /// Transmit one block and wait for its acknowledgment, re-sending on
    /// NAK or timeout up to the attempt budget.
    ///
    /// At most [`BLOCK_SIZE`] bytes of `data` go out; a shorter slice is
    /// padded with SUB on the wire. Returns the count of real payload bytes
    /// sent. The block's sequence number is `seq`, supplied by the caller's
    /// own counter.
    pub fn send_block(&mut self, data: &[u8], seq: u8) -> Result<usize, TransferError> {
        let count = data.len().min(BLOCK_SIZE);
        let mut last = TransferError::Timeout;

        for _ in 0..self.attempts {
            self.link.write_byte(SOH);
            self.link.write_byte(seq);
            self.link.write_byte(!seq);

            for &byte in &data[..count] {
                self.link.write_byte(byte);
            }

            let mut sum = checksum(0, &data[..count]);
            for _ in count..BLOCK_SIZE {
                sum = checksum(sum, &[SUB]);
                self.link.write_byte(SUB);
            }

            self.link.write_byte(sum);
            let _ = self.link.flush();

            match self.wait(1) {
                Ok(ACK) => {
                    self.state = SessionState::Exchanging;
                    return Ok(count);
                }
                Ok(NAK) => last = TransferError::Nak,
                Ok(CAN) => {
                    self.state = SessionState::Cancelled;
                    return Err(TransferError::Cancelled);
                }
                _ => last = TransferError::Timeout,
            }
        }

        self.state = SessionState::Failed;
        Err(last)
    }

    /// Close the transfer: send EOT until the receiver acknowledges it.
    pub fn end(&mut self) -> Result<(), TransferError> {
        let mut last = TransferError::Timeout;

        for _ in 0..self.attempts {
            self.link.write_byte(EOT);
            let _ = self.link.flush();

            match self.wait(1) {
                Ok(ACK) => {
                    self.state = SessionState::Ended;
                    return Ok(());
                }
                Ok(NAK) => last = TransferError::Nak,
                Ok(CAN) => {
                    self.state = SessionState::Cancelled;
                    return Err(TransferError::Cancelled);
                }
                _ => last = TransferError::Timeout,
            }
        }

        self.state = SessionState::Failed;
        Err(last)
    }

    /// Abort the session, notifying the peer.
    pub fn cancel(&mut self) {
        session::cancel(self.link.as_mut());
        self.state = SessionState::Cancelled;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }
}

// ============================================================================
// Tests
// ============================================================================
