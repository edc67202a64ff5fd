/*
 *  Copyright (C) 2024 Michael Bachmann
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU Affero General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU Affero General Public License for more details.
 *
 *  You should have received a copy of the GNU Affero General Public License
 *  along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use crate::time::Timestamp;

/// The timestamp words of a receive descriptor, as little-endian values
/// straight from descriptor memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(C)]
pub struct RxDescTimestamp {
    /// Nanoseconds.
    pub timestamp_low: u32,
    /// Seconds, bits 0..31.
    pub timestamp_high: u32,
    /// Seconds, bits 32 and up.
    pub timestamp_hhigh: u32,
}

impl RxDescTimestamp {
    pub const SIZE: usize = 12;

    pub fn from_descriptor_bytes(bytes: [u8; Self::SIZE]) -> Self {
        // descriptor memory is kept as is, decoding converts from little-endian
        let word =
            |i: usize| u32::from_ne_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            timestamp_low: word(0),
            timestamp_high: word(4),
            timestamp_hhigh: word(8),
        }
    }
}

/// Receive metadata handed up the stack together with a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketMetadata {
    pub hw_timestamp: Option<Timestamp>,
}

pub fn decode_rx_timestamp(desc: &RxDescTimestamp) -> Timestamp {
    let high = u32::from_le(desc.timestamp_high) as u64;
    let hhigh = u32::from_le(desc.timestamp_hhigh) as u64;
    let seconds = high + (hhigh << 32);
    let nanoseconds = u32::from_le(desc.timestamp_low);
    Timestamp::new(seconds, nanoseconds)
}

pub fn attach_rx_timestamp(metadata: &mut PacketMetadata, desc: &RxDescTimestamp) {
    metadata.hw_timestamp = Some(decode_rx_timestamp(desc));
}
