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

//! Session machinery shared by both roles: outcome signals, the bounded
//! wait, and the role-independent cancel.

use std::time::Duration;
use crate::protocol::CAN;
use crate::serial::Link;

// ============================================================================
// Outcome Signals
// ============================================================================

/// Failure signal from a protocol step. A step retries internally up to its
/// attempt budget; exhaustion surfaces the last outcome observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    /// Peer rejected the block, or local validation failed
    Nak,
    /// A cancel marker was observed or issued
    Cancelled,
    /// No recognizable byte arrived within the configured duration
    Timeout,
    /// Caller-supplied buffer is shorter than one block
    BufferTooSmall,
    /// Unexpected byte while polling for the receiver's ready signal
    Unknown,
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::Nak => write!(f, "block rejected by peer"),
            TransferError::Cancelled => write!(f, "transfer cancelled"),
            TransferError::Timeout => write!(f, "timed out waiting for data"),
            TransferError::BufferTooSmall => write!(f, "buffer is smaller than one block"),
            TransferError::Unknown => write!(f, "unexpected byte during handshake"),
        }
    }
}

impl std::error::Error for TransferError {}

/// Positive outcome of one receiver exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// A block was validated and stored; carries the byte count written
    Received(usize),
    /// The sender signalled end of transmission; no more blocks follow
    Finished,
}

// ============================================================================
// Session Lifecycle
// ============================================================================

/// Lifecycle of a session. `Ended` and `Cancelled` are terminal; `Failed`
/// ends the step but the caller may still cancel to notify the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Started,
    Exchanging,
    Ended,
    Cancelled,
    Failed,
}

// ============================================================================
// Bounded Wait
// ============================================================================

/// Block until at least `pending` bytes are readable, then return the next
/// byte, or return `Timeout` once the armed duration passes.
///
/// Busy-polls the link for up to `timeout`, occupying the calling thread.
/// `pending` counts down across the reads of a multi-byte frame so a
/// transport can answer partial-availability checks cheaply.
pub(crate) fn wait_byte(
    link: &mut dyn Link,
    timeout: Duration,
    pending: u32,
) -> Result<u8, TransferError> {
    link.timer_start(timeout);

    while link.timer_is_enabled() && !link.timer_is_elapsed() {
        if link.available() >= pending {
            link.timer_stop();
            return Ok(link.read_byte());
        }
    }

    Err(TransferError::Timeout)
}

// ============================================================================
// Cancel
// ============================================================================

/// Abort a session in progress. Role-independent: three cancel markers,
/// then flush.
pub fn cancel(link: &mut dyn Link) {
    link.write_byte(CAN);
    link.write_byte(CAN);
    link.write_byte(CAN);
    let _ = link.flush();
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ACK;
    use crate::serial::MockLink;

    #[test]
    fn test_wait_byte_returns_available_byte() {
        let mut link = MockLink::new(vec![Some(ACK)], vec![]);
        assert_eq!(wait_byte(&mut link, Duration::from_secs(1), 1), Ok(ACK));
    }

    #[test]
    fn test_wait_byte_times_out() {
        let mut link = MockLink::new(vec![None], vec![]);
        assert_eq!(
            wait_byte(&mut link, Duration::from_secs(1), 1),
            Err(TransferError::Timeout)
        );
    }

    #[test]
    fn test_wait_byte_empty_line_times_out() {
        let mut link = MockLink::new(vec![], vec![]);
        assert_eq!(
            wait_byte(&mut link, Duration::from_secs(1), 1),
            Err(TransferError::Timeout)
        );
    }

    #[test]
    fn test_wait_byte_requires_pending_count() {
        // Three bytes queued: a wait for three returns the first of them
        let mut link = MockLink::new(vec![Some(0x10), Some(0x20), Some(0x30)], vec![]);
        assert_eq!(wait_byte(&mut link, Duration::from_secs(1), 3), Ok(0x10));
        assert_eq!(wait_byte(&mut link, Duration::from_secs(1), 2), Ok(0x20));
        assert_eq!(wait_byte(&mut link, Duration::from_secs(1), 1), Ok(0x30));
    }

    #[test]
    fn test_wait_byte_starved_of_pending_count_times_out() {
        let mut link = MockLink::new(vec![Some(0x10)], vec![]);
        assert_eq!(
            wait_byte(&mut link, Duration::from_secs(1), 2),
            Err(TransferError::Timeout)
        );
        // The lone byte is still on the line afterwards
        assert_eq!(wait_byte(&mut link, Duration::from_secs(1), 1), Ok(0x10));
    }

    #[test]
    fn test_cancel_sends_three_cancel_markers() {
        let mut link = MockLink::new(vec![], vec![CAN, CAN, CAN]);
        cancel(&mut link);
    }
}
