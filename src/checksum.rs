//! Two-stage checksum carried in the last two bytes of every data packet.
//!
//! The first byte is a plain sum of the 36 leading bytes; the second is a sum of the running
//! (prefix) sums, which makes it sensitive to byte order as well as content.

use crate::frame::{CHECKSUM_OFFSET, PACKET_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The two checksum bytes of a data packet.
pub struct ChecksumPair {
    pub checksum1: u8,
    pub checksum2: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Result of verifying one packet candidate.
pub enum PacketOutcome {
    Pass,
    Fail,
}

impl PacketOutcome {
    pub fn is_pass(self) -> bool {
        self == PacketOutcome::Pass
    }
}

/// Computes the checksum over the first 36 bytes of `bytes`.
///
/// Shorter inputs are summed as far as they go.
pub fn compute(bytes: &[u8]) -> ChecksumPair {
    let mut sum: u8 = 0;
    let mut running: u8 = 0;
    let mut prefix_sum: u8 = 0;
    for &b in bytes.iter().take(CHECKSUM_OFFSET) {
        sum = sum.wrapping_add(b);
        running = running.wrapping_add(b);
        prefix_sum = prefix_sum.wrapping_add(running);
    }
    ChecksumPair {
        checksum1: sum,
        checksum2: prefix_sum,
    }
}

/// Checks length and both checksum bytes of a packet.
pub fn verify(packet: &[u8]) -> PacketOutcome {
    if packet.len() != PACKET_LEN {
        return PacketOutcome::Fail;
    }
    let expected = compute(packet);
    if packet[CHECKSUM_OFFSET] == expected.checksum1
        && packet[CHECKSUM_OFFSET + 1] == expected.checksum2
    {
        PacketOutcome::Pass
    } else {
        PacketOutcome::Fail
    }
}

/// Writes the checksum of the first 36 bytes into bytes 36 and 37.
pub fn stamp(packet: &mut [u8; PACKET_LEN]) {
    let pair = compute(&packet[..]);
    packet[CHECKSUM_OFFSET] = pair.checksum1;
    packet[CHECKSUM_OFFSET + 1] = pair.checksum2;
}
