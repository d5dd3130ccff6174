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
use crate::session::{self, BlockStatus, SessionState, TransferError, wait_byte};

// ============================================================================
// Receiver Session
// ============================================================================

/// Receiving side of a transfer. One value drives at most one logical
/// transfer: `begin` once, `recv_block` per block until `Finished`, `end`
/// once.
pub struct Receiver {
    link: Box<dyn Link>,
    timeout: Duration,
    attempts: u32,
    state: SessionState,
}

impl Receiver {
    pub fn new(link: Box<dyn Link>, timeout: Duration, attempts: u32) -> Receiver {
        Receiver {
            link,
            timeout,
            attempts,
            state: SessionState::Idle,
        }
    }

    fn wait(&mut self, pending: u32) -> Result<u8, TransferError> {
        wait_byte(self.link.as_mut(), self.timeout, pending)
    }

    /// Signal readiness to the sender. The NAK arms the sender's begin
    /// poll.
    pub fn begin(&mut self) -> Result<(), TransferError> {
        self.link.write_byte(NAK);
        let _ = self.link.flush();
        self.state = SessionState::Started;
        Ok(())
    }

    /// Wait for one block and store it into `buf`, which must hold at least
    /// [`BLOCK_SIZE`] bytes.
    ///
    /// `seq` is the caller's expected sequence number for this block. A
    /// valid frame is acknowledged and yields `Received`; a corrupt or
    /// mis-sequenced frame is answered with NAK so the sender re-sends, and
    /// the caller retries with the same `seq`. EOT yields `Finished` with
    /// no acknowledgment written - the closing ACK belongs to `end`. Every
    /// timed-out attempt re-NAKs the sender.
    pub fn recv_block(&mut self, buf: &mut [u8], seq: u8) -> Result<BlockStatus, TransferError> {
        if buf.len() < BLOCK_SIZE {
            return Err(TransferError::BufferTooSmall);
        }

        for _ in 0..self.attempts {
            match self.wait(1) {
                Ok(SOH) => {
                    // A header frame, good or bad, ends the attempt loop
                    return match self.read_frame(buf, seq) {
                        Ok(()) => {
                            self.link.write_byte(ACK);
                            let _ = self.link.flush();
                            self.state = SessionState::Exchanging;
                            Ok(BlockStatus::Received(BLOCK_SIZE))
                        }
                        Err(err) => {
                            self.link.write_byte(NAK);
                            let _ = self.link.flush();
                            Err(err)
                        }
                    };
                }
                Ok(CAN) => {
                    // The per-attempt reply runs for the cancel outcome too
                    self.link.write_byte(NAK);
                    let _ = self.link.flush();
                    self.state = SessionState::Cancelled;
                    return Err(TransferError::Cancelled);
                }
                Ok(EOT) => {
                    let _ = self.link.flush();
                    return Ok(BlockStatus::Finished);
                }
                _ => {
                    self.link.write_byte(NAK);
                    let _ = self.link.flush();
                }
            }
        }

        self.state = SessionState::Failed;
        Err(TransferError::Timeout)
    }

    /// Read and validate the rest of a frame after its SOH: sequence pair,
    /// payload, checksum. Any mismatch or mid-frame timeout degrades to the
    /// NAK outcome.
    fn read_frame(&mut self, buf: &mut [u8], seq: u8) -> Result<(), TransferError> {
        let number = self.wait(1);
        let complement = self.wait(1);

        match (number, complement) {
            (Ok(number), Ok(complement)) if number == seq && !complement == seq => {}
            _ => return Err(TransferError::Nak),
        }

        for i in 0..BLOCK_SIZE {
            match self.wait((BLOCK_SIZE - i) as u32) {
                Ok(byte) => buf[i] = byte,
                Err(_) => return Err(TransferError::Nak),
            }
        }

        match self.wait(1) {
            Ok(sum) if sum == checksum(0, &buf[..BLOCK_SIZE]) => Ok(()),
            _ => Err(TransferError::Nak),
        }
    }

    /// Close out the transfer: the final ACK answering the sender's EOT.
    pub fn end(&mut self) -> Result<(), TransferError> {
        self.link.write_byte(ACK);
        let _ = self.link.flush();
        self.state = SessionState::Ended;
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::MockLink;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn receiver(reads: Vec<Option<u8>>, expected_writes: Vec<u8>, attempts: u32) -> Receiver {
        Receiver::new(Box::new(MockLink::new(reads, expected_writes)), TIMEOUT, attempts)
    }

    fn frame(seq: u8, data: &[u8]) -> Vec<u8> {
        let mut out = vec![SOH, seq, !seq];
        let mut block = data.to_vec();
        block.resize(BLOCK_SIZE, SUB);
        out.extend_from_slice(&block);
        out.push(checksum(0, &block));
        out
    }

    fn script(bytes: &[u8]) -> Vec<Option<u8>> {
        bytes.iter().map(|&b| Some(b)).collect()
    }

    #[test]
    fn test_begin_sends_ready_signal() {
        let mut r = receiver(vec![], vec![NAK], 10);
        assert_eq!(r.begin(), Ok(()));
        assert_eq!(r.state(), SessionState::Started);
    }

    #[test]
    fn test_recv_block_stores_valid_block() {
        let mut r = receiver(script(&frame(1, b"Test data")), vec![ACK], 10);
        let mut buf = [0u8; BLOCK_SIZE];

        assert_eq!(r.recv_block(&mut buf, 1), Ok(BlockStatus::Received(BLOCK_SIZE)));
        assert_eq!(&buf[..9], b"Test data");
        assert!(buf[9..].iter().all(|&b| b == SUB));
        assert_eq!(r.state(), SessionState::Exchanging);
    }

    #[test]
    fn test_recv_block_rejects_bad_checksum() {
        let mut bytes = frame(1, b"corrupt");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let mut r = receiver(script(&bytes), vec![NAK], 10);
        let mut buf = [0u8; BLOCK_SIZE];

        assert_eq!(r.recv_block(&mut buf, 1), Err(TransferError::Nak));
    }

    #[test]
    fn test_recv_block_rejects_corrupted_payload_byte() {
        let mut bytes = frame(1, b"corrupt");
        bytes[3 + 2] ^= 0x01;

        let mut r = receiver(script(&bytes), vec![NAK], 10);
        let mut buf = [0u8; BLOCK_SIZE];

        assert_eq!(r.recv_block(&mut buf, 1), Err(TransferError::Nak));
    }

    #[test]
    fn test_recv_block_rejects_sequence_mismatch() {
        // Validation fails on the header pair; the frame body is not read
        let mut r = receiver(script(&[SOH, 0x02, !0x02]), vec![NAK], 10);
        let mut buf = [0u8; BLOCK_SIZE];

        assert_eq!(r.recv_block(&mut buf, 1), Err(TransferError::Nak));
    }

    #[test]
    fn test_recv_block_rejects_corrupted_complement() {
        let mut r = receiver(script(&[SOH, 0x01, 0x01]), vec![NAK], 10);
        let mut buf = [0u8; BLOCK_SIZE];

        assert_eq!(r.recv_block(&mut buf, 1), Err(TransferError::Nak));
    }

    #[test]
    fn test_recv_block_truncated_frame_naks() {
        let mut r = receiver(script(&[SOH, 0x01, !0x01]), vec![NAK], 10);
        let mut buf = [0u8; BLOCK_SIZE];

        assert_eq!(r.recv_block(&mut buf, 1), Err(TransferError::Nak));
    }

    #[test]
    fn test_recv_block_finished_on_eot() {
        // No acknowledgment for this call; the closing ACK belongs to end()
        let mut r = receiver(vec![Some(EOT)], vec![], 10);
        let mut buf = [0u8; BLOCK_SIZE];

        assert_eq!(r.recv_block(&mut buf, 1), Ok(BlockStatus::Finished));
    }

    #[test]
    fn test_recv_block_cancelled_by_peer() {
        let mut r = receiver(vec![Some(CAN)], vec![NAK], 10);
        let mut buf = [0u8; BLOCK_SIZE];

        assert_eq!(r.recv_block(&mut buf, 1), Err(TransferError::Cancelled));
        assert_eq!(r.state(), SessionState::Cancelled);
    }

    #[test]
    fn test_recv_block_renaks_on_timeout_then_accepts() {
        let mut reads = vec![None];
        reads.extend(script(&frame(1, b"late")));

        let mut r = receiver(reads, vec![NAK, ACK], 10);
        let mut buf = [0u8; BLOCK_SIZE];

        assert_eq!(r.recv_block(&mut buf, 1), Ok(BlockStatus::Received(BLOCK_SIZE)));
        assert_eq!(&buf[..4], b"late");
    }

    #[test]
    fn test_recv_block_exhausts_attempts_on_junk() {
        let mut r = receiver(vec![Some(0x7F), Some(0x7F)], vec![NAK, NAK], 2);
        let mut buf = [0u8; BLOCK_SIZE];

        assert_eq!(r.recv_block(&mut buf, 1), Err(TransferError::Timeout));
        assert_eq!(r.state(), SessionState::Failed);
    }

    #[test]
    fn test_recv_block_requires_full_buffer() {
        // Rejected before any transport I/O
        let mut r = receiver(vec![], vec![], 10);
        let mut buf = [0u8; 64];

        assert_eq!(r.recv_block(&mut buf, 1), Err(TransferError::BufferTooSmall));
    }

    #[test]
    fn test_end_sends_final_ack() {
        let mut r = receiver(vec![], vec![ACK], 10);
        assert_eq!(r.end(), Ok(()));
        assert_eq!(r.state(), SessionState::Ended);
    }

    #[test]
    fn test_cancel_notifies_peer() {
        let mut r = receiver(vec![], vec![CAN, CAN, CAN], 10);
        r.cancel();
        assert_eq!(r.state(), SessionState::Cancelled);
    }

    #[test]
    fn test_full_session() {
        let mut reads = script(&frame(1, b"only block"));
        reads.push(Some(EOT));

        let mut r = receiver(reads, vec![NAK, ACK, ACK], 10);
        let mut buf = [0u8; BLOCK_SIZE];

        assert_eq!(r.begin(), Ok(()));
        assert_eq!(r.recv_block(&mut buf, 1), Ok(BlockStatus::Received(BLOCK_SIZE)));
        assert_eq!(&buf[..10], b"only block");
        assert_eq!(r.recv_block(&mut buf, 2), Ok(BlockStatus::Finished));
        assert_eq!(r.end(), Ok(()));
        assert_eq!(r.state(), SessionState::Ended);
    }
}
