use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::MidiTimestamp;

/// Bit offset of the first data byte in the packed representation.
const DATA1_SHIFT: u32 = 8;
/// Bit offset of the second data byte. Data bytes are 7 bit wide, so the
/// second one is packed directly after the first.
const DATA2_SHIFT: u32 = 15;
/// Bit offset of the (coarse) timestamp in the packed representation.
const TIMESTAMP_SHIFT: u32 = 22;
/// The packed timestamp drops this many low bits (roughly microsecond grid).
const TIMESTAMP_DROP_BITS: u32 = 10;

/// A complete MIDI message of one to three bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ShortMessage {
    /// Status byte (0x80..=0xFF).
    pub status: u8,
    /// First data byte, if the status carries one.
    pub data1: Option<u8>,
    /// Second data byte, if the status carries two.
    pub data2: Option<u8>,
    /// Arrival time of the byte that started this message, including the
    /// transmission delay compensation.
    pub timestamp: MidiTimestamp,
}

impl ShortMessage {
    /// Creates a message from its parts.
    pub fn new(status: u8, data1: Option<u8>, data2: Option<u8>, timestamp: MidiTimestamp) -> Self {
        Self {
            status,
            data1,
            data2,
            timestamp,
        }
    }

    /// Creates a message consisting of a status byte only.
    pub fn single(status: u8, timestamp: MidiTimestamp) -> Self {
        Self::new(status, None, None, timestamp)
    }

    /// Number of data bytes that follow `status` in a short message.
    ///
    /// Returns `None` for bytes that never start a short message: data bytes,
    /// system exclusive framing (0xF0, 0xF7) and the undefined statuses
    /// 0xF4, 0xF5, 0xF9 and 0xFD.
    pub fn data_len(status: u8) -> Option<usize> {
        match status {
            0x80..=0xBF | 0xE0..=0xEF => Some(2),
            0xC0..=0xDF => Some(1),
            0xF1 | 0xF3 => Some(1),
            0xF2 => Some(2),
            0xF6 | 0xF8 | 0xFA..=0xFC | 0xFE | 0xFF => Some(0),
            _ => None,
        }
    }

    /// Raw bytes of the message, status first.
    pub fn bytes(&self) -> SmallVec<[u8; 3]> {
        let mut bytes = SmallVec::new();
        bytes.push(self.status);
        bytes.extend(self.data1);
        bytes.extend(self.data2);
        bytes
    }

    /// Zero based MIDI channel for channel voice messages.
    pub fn channel(&self) -> Option<u8> {
        (0x80..0xF0)
            .contains(&self.status)
            .then_some(self.status & 0x0F)
    }

    /// Whether this is a single byte system real-time message.
    pub fn is_realtime(&self) -> bool {
        self.status >= 0xF8
    }

    /// Packs the message into the integer layout used by native interop
    /// callers: status in bits 0-7, data bytes in bits 8-14 and 15-21, and the
    /// timestamp shifted right by 10 bits above bit 22.
    pub fn pack(&self) -> u64 {
        u64::from(self.status)
            | u64::from(self.data1.unwrap_or(0) & 0x7F) << DATA1_SHIFT
            | u64::from(self.data2.unwrap_or(0) & 0x7F) << DATA2_SHIFT
            | (self.timestamp >> TIMESTAMP_DROP_BITS) << TIMESTAMP_SHIFT
    }

    /// Inverse of [`ShortMessage::pack`]. The timestamp comes back truncated
    /// to a multiple of 1024 ns.
    pub fn unpack(packed: u64) -> Self {
        let timestamp = (packed >> TIMESTAMP_SHIFT) << TIMESTAMP_DROP_BITS;
        Self::from_accumulator((packed & 0x3F_FFFF) as u32, timestamp)
    }

    /// Builds a message from decoder accumulator bits, keeping only as many
    /// data bytes as the status defines.
    pub(crate) fn from_accumulator(accumulator: u32, timestamp: MidiTimestamp) -> Self {
        let status = (accumulator & 0xFF) as u8;
        let data1 = ((accumulator >> DATA1_SHIFT) & 0x7F) as u8;
        let data2 = ((accumulator >> DATA2_SHIFT) & 0x7F) as u8;
        match Self::data_len(status) {
            Some(2) => Self::new(status, Some(data1), Some(data2), timestamp),
            Some(1) => Self::new(status, Some(data1), None, timestamp),
            _ => Self::single(status, timestamp),
        }
    }
}

impl fmt::Display for ShortMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, byte) in self.bytes().iter().enumerate() {
            if index > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        write!(f, " @ {}ns", self.timestamp)
    }
}
