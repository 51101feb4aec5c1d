//! Incremental decoder for raw MIDI byte streams.
//!
//! The decoder consumes one byte at a time and keeps every bit of progress in
//! [`DecoderState`], so a read that runs out of input can be resumed later
//! without losing the partially received message. Real-time bytes may arrive
//! in the middle of any other message; they are reported on their own and the
//! interrupted message continues afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::message::ShortMessage;
use crate::source::ByteSource;
use crate::{MidiTimestamp, Result};

/// Added to every timestamp to account for the two bytes still in flight on a
/// 31250 baud serial link when the first byte of a message arrives.
pub const CONSTANT_DELAY_NANOS: u64 = 600_000;

/// No message in progress; the next byte is expected to be a status byte.
const SHIFT_IDLE: u32 = 0;
/// Status received; the next data byte goes to bits 8..15.
const SHIFT_FIRST_DATA: u32 = 8;
/// First of two data bytes received; the second is packed at bit 15. This
/// value doubles as the "one more byte completes it" marker.
const SHIFT_SECOND_DATA: u32 = 15;

/// Tune request: a system common message without data bytes.
const TUNE_REQUEST: u8 = 0xF6;
/// End of a system exclusive message.
const END_OF_EXCLUSIVE: u8 = 0xF7;

/// Decode progress of a single input stream.
///
/// Created when the stream opens, mutated by every received byte and dropped
/// when the stream closes. It is never shared between streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderState {
    running_status: u8,
    accumulator: u32,
    bit_shift: u32,
    pending_timestamp: MidiTimestamp,
    closing: bool,
    delay_nanos: u64,
}

impl Default for DecoderState {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderState {
    /// Creates an idle decoder using [`CONSTANT_DELAY_NANOS`].
    pub fn new() -> Self {
        Self::with_delay(CONSTANT_DELAY_NANOS)
    }

    /// Creates an idle decoder with a custom transmission delay compensation.
    pub fn with_delay(delay_nanos: u64) -> Self {
        Self {
            running_status: 0,
            accumulator: 0,
            bit_shift: SHIFT_IDLE,
            pending_timestamp: 0,
            closing: false,
            delay_nanos,
        }
    }

    /// Forgets any partial message and the running status.
    pub fn reset(&mut self) {
        self.running_status = 0;
        self.accumulator = 0;
        self.bit_shift = SHIFT_IDLE;
    }

    /// Whether no message is currently being assembled.
    pub fn is_idle(&self) -> bool {
        self.bit_shift == SHIFT_IDLE
    }

    /// Last channel voice status, or 0 when none is established.
    pub fn running_status(&self) -> u8 {
        self.running_status
    }

    /// Current bit offset for the next data byte (0, 8 or 15).
    pub fn bit_shift(&self) -> u32 {
        self.bit_shift
    }

    /// Message bytes received so far, packed low to high.
    pub fn accumulator(&self) -> u32 {
        self.accumulator
    }

    /// Timestamp captured for the message in progress.
    pub fn pending_timestamp(&self) -> MidiTimestamp {
        self.pending_timestamp
    }

    /// Transmission delay added to every timestamp.
    pub fn delay_nanos(&self) -> u64 {
        self.delay_nanos
    }

    /// Marks the state as closing. Further decode attempts report closure.
    pub fn request_close(&mut self) {
        self.closing = true;
    }

    /// Whether a close has been requested.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    fn current_status(&self) -> u8 {
        if self.bit_shift == SHIFT_IDLE {
            0
        } else {
            (self.accumulator & 0xFF) as u8
        }
    }

    /// Timestamp of a byte received at `now`, saturating at the end of time.
    fn arrival(&self, now: MidiTimestamp) -> MidiTimestamp {
        now.saturating_add(self.delay_nanos)
    }

    fn begin(&mut self, status: u8, now: MidiTimestamp) {
        self.accumulator = u32::from(status);
        self.bit_shift = SHIFT_FIRST_DATA;
        self.pending_timestamp = self.arrival(now);
    }

    fn clear_message(&mut self) {
        self.accumulator = 0;
        self.bit_shift = SHIFT_IDLE;
    }

    fn resync(&mut self, byte: u8, status: u8) {
        debug!(
            byte = format_args!("{byte:#04x}"),
            status = format_args!("{status:#04x}"),
            "unexpected MIDI data byte, resynchronising"
        );
        self.reset();
    }

    fn complete(&mut self) -> ShortMessage {
        let message = ShortMessage::from_accumulator(self.accumulator, self.pending_timestamp);
        self.clear_message();
        message
    }

    /// Folds one received byte into the state.
    ///
    /// `now` is the arrival time of `byte` on the stream clock. Returns a
    /// message once one is complete; real-time messages are returned
    /// immediately and leave any partial message untouched.
    pub fn feed(&mut self, byte: u8, now: MidiTimestamp) -> Option<ShortMessage> {
        match byte {
            0xF8..=0xFF => self.feed_realtime(byte, now),
            0xF0..=0xF7 => self.feed_system_common(byte, now),
            0x80..=0xEF => {
                self.feed_channel_status(byte, now);
                None
            }
            _ => self.feed_data(byte, now),
        }
    }

    fn feed_realtime(&mut self, byte: u8, now: MidiTimestamp) -> Option<ShortMessage> {
        match byte {
            0xF9 | 0xFD => {
                debug!(byte = format_args!("{byte:#04x}"), "dropping undefined real-time byte");
                None
            }
            _ => Some(ShortMessage::single(byte, self.arrival(now))),
        }
    }

    fn feed_system_common(&mut self, byte: u8, now: MidiTimestamp) -> Option<ShortMessage> {
        self.running_status = 0;
        let current = self.current_status();
        // Only an undefined 0xF4 message ends silently; 0xF5 is reported like
        // any other interrupted status.
        let silent = current == 0xF4;
        let closes_exclusive = current == 0xF0 && byte == END_OF_EXCLUSIVE;
        if current != 0 && !silent && !closes_exclusive {
            debug!(
                byte = format_args!("{byte:#04x}"),
                status = format_args!("{current:#04x}"),
                "unexpected MIDI status byte, data byte expected"
            );
        }
        match byte {
            TUNE_REQUEST => {
                self.clear_message();
                self.pending_timestamp = self.arrival(now);
                Some(ShortMessage::single(byte, self.pending_timestamp))
            }
            END_OF_EXCLUSIVE => {
                self.clear_message();
                None
            }
            _ => {
                // 0xF0, 0xF4 and 0xF5 also start here; their data bytes are
                // dropped until the next status byte.
                self.begin(byte, now);
                None
            }
        }
    }

    fn feed_channel_status(&mut self, byte: u8, now: MidiTimestamp) {
        let current = self.current_status();
        if current != 0 {
            debug!(
                byte = format_args!("{byte:#04x}"),
                status = format_args!("{current:#04x}"),
                "unexpected MIDI status byte, data byte expected"
            );
        }
        self.running_status = byte;
        self.begin(byte, now);
    }

    fn feed_data(&mut self, byte: u8, now: MidiTimestamp) -> Option<ShortMessage> {
        let mut status = self.current_status();
        if status == 0 {
            status = self.running_status;
            if status == 0 {
                self.resync(byte, status);
                return None;
            }
            self.begin(status, now);
        }

        let kind = if status < 0xF0 { status & 0xF0 } else { status };
        match kind {
            0xC0 | 0xD0 | 0xF1 | 0xF3 => {
                if self.bit_shift == SHIFT_FIRST_DATA {
                    self.accumulator |= u32::from(byte) << SHIFT_FIRST_DATA;
                    Some(self.complete())
                } else {
                    self.resync(byte, status);
                    None
                }
            }
            0x80 | 0x90 | 0xA0 | 0xB0 | 0xE0 | 0xF2 => match self.bit_shift {
                SHIFT_SECOND_DATA => {
                    self.accumulator |= u32::from(byte) << SHIFT_SECOND_DATA;
                    Some(self.complete())
                }
                SHIFT_FIRST_DATA => {
                    self.accumulator |= u32::from(byte) << SHIFT_FIRST_DATA;
                    self.bit_shift = SHIFT_SECOND_DATA;
                    None
                }
                _ => {
                    self.resync(byte, status);
                    None
                }
            },
            // System exclusive payload and undefined system common messages.
            0xF0 | 0xF4 | 0xF5 => None,
            _ => {
                self.resync(byte, status);
                None
            }
        }
    }
}

/// Result of a single decode attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete message was decoded.
    Message(ShortMessage),
    /// The source has no byte available right now. Retry later.
    NoData,
    /// The stream is closing; no further messages will be produced.
    Closed,
}

/// Cross-thread close request observed between byte reads.
#[derive(Debug, Clone, Default)]
pub struct CloseSignal(Arc<AtomicBool>);

impl CloseSignal {
    /// Creates a signal that has not been raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether the signal has been raised.
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Pulls bytes from a [`ByteSource`] and assembles them into messages.
#[derive(Debug, Default)]
pub struct MidiDecoder {
    state: DecoderState,
    close_signal: Option<CloseSignal>,
}

impl MidiDecoder {
    /// Creates a decoder around an existing state.
    pub fn new(state: DecoderState) -> Self {
        Self {
            state,
            close_signal: None,
        }
    }

    /// Attaches a close signal that another thread may raise.
    pub fn with_close_signal(mut self, signal: CloseSignal) -> Self {
        self.close_signal = Some(signal);
        self
    }

    /// Current decode state.
    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    /// Mutable access to the decode state.
    pub fn state_mut(&mut self) -> &mut DecoderState {
        &mut self.state
    }

    /// Latches a raised close signal into the state and reports closure.
    fn check_close(&mut self) -> bool {
        if !self.state.closing
            && self
                .close_signal
                .as_ref()
                .is_some_and(CloseSignal::is_requested)
        {
            self.state.request_close();
        }
        self.state.closing
    }

    /// Reads bytes until a message completes, the source runs dry, or a close
    /// is requested.
    ///
    /// Running dry does not touch the state, so the next call continues where
    /// this one stopped. Errors reported by the source are terminal for the
    /// stream.
    pub fn decode_next<S, C>(&mut self, source: &mut S, clock: &C) -> Result<ReadOutcome>
    where
        S: ByteSource + ?Sized,
        C: Clock + ?Sized,
    {
        loop {
            if self.check_close() {
                return Ok(ReadOutcome::Closed);
            }
            let Some(byte) = source.read_byte()? else {
                return Ok(ReadOutcome::NoData);
            };
            if let Some(message) = self.state.feed(byte, clock.now_nanos()) {
                return Ok(ReadOutcome::Message(message));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::source::MemorySource;

    fn feed_all(state: &mut DecoderState, bytes: &[u8]) -> Vec<ShortMessage> {
        bytes
            .iter()
            .filter_map(|&byte| state.feed(byte, 0))
            .collect()
    }

    #[test]
    fn decodes_note_on_with_status_timestamp() {
        let mut state = DecoderState::new();
        assert_eq!(state.feed(0x90, 0), None);
        assert_eq!(state.feed(0x3C, 1_000), None);
        let msg = state.feed(0x7F, 2_000).unwrap();
        assert_eq!(msg, ShortMessage::new(0x90, Some(0x3C), Some(0x7F), 600_000));
        assert!(state.is_idle());
    }

    #[test]
    fn shift_walks_through_sentinels() {
        let mut state = DecoderState::new();
        assert_eq!(state.bit_shift(), 0);
        state.feed(0xB0, 0);
        assert_eq!(state.bit_shift(), 8);
        state.feed(0x07, 0);
        assert_eq!(state.bit_shift(), 15);
        state.feed(0x64, 0);
        assert_eq!(state.bit_shift(), 0);
    }

    #[test]
    fn realtime_leaves_partial_message_untouched() {
        let mut state = DecoderState::new();
        state.feed(0x80, 0);
        state.feed(0x3C, 10);
        let before = state.clone();

        let clock = state.feed(0xF8, 20).unwrap();
        assert_eq!(clock, ShortMessage::single(0xF8, 20 + CONSTANT_DELAY_NANOS));
        assert_eq!(state, before);

        let note_off = state.feed(0x00, 30).unwrap();
        assert_eq!(note_off, ShortMessage::new(0x80, Some(0x3C), Some(0x00), CONSTANT_DELAY_NANOS));
    }

    #[test]
    fn undefined_realtime_bytes_are_dropped() {
        let mut state = DecoderState::new();
        let messages = feed_all(&mut state, &[0xF9, 0x90, 0xFD, 0x40, 0xF9, 0x7F, 0xFD]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].bytes().as_slice(), &[0x90, 0x40, 0x7F]);
    }

    #[test]
    fn running_status_reuses_last_channel_status() {
        let mut state = DecoderState::new();
        let messages = feed_all(&mut state, &[0x90, 0x40, 0x7F, 0x50, 0x60]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].bytes().as_slice(), &[0x90, 0x50, 0x60]);
        assert_eq!(state.running_status(), 0x90);
    }

    #[test]
    fn running_status_timestamp_uses_first_data_byte() {
        let mut state = DecoderState::with_delay(0);
        state.feed(0xC1, 100);
        assert_eq!(state.feed(0x05, 200).unwrap().timestamp, 100);
        assert_eq!(state.feed(0x06, 300).unwrap().timestamp, 300);
    }

    #[test]
    fn one_data_byte_messages_complete_immediately() {
        let mut state = DecoderState::new();
        let messages = feed_all(&mut state, &[0xC3, 0x11, 0xD3, 0x22, 0xF1, 0x33, 0xF3, 0x44]);
        let bytes: Vec<_> = messages.iter().map(|m| m.bytes().to_vec()).collect();
        assert_eq!(
            bytes,
            vec![vec![0xC3, 0x11], vec![0xD3, 0x22], vec![0xF1, 0x33], vec![0xF3, 0x44]]
        );
    }

    #[test]
    fn song_position_takes_two_data_bytes() {
        let mut state = DecoderState::new();
        let messages = feed_all(&mut state, &[0xF2, 0x10, 0x20]);
        assert_eq!(messages[0].bytes().as_slice(), &[0xF2, 0x10, 0x20]);
    }

    #[test]
    fn system_common_clears_running_status() {
        let mut state = DecoderState::new();
        feed_all(&mut state, &[0x90, 0x40, 0x7F]);
        assert_eq!(state.running_status(), 0x90);
        feed_all(&mut state, &[0xF3, 0x01]);
        assert_eq!(state.running_status(), 0);
        // Without running status a bare data pair is discarded.
        assert!(feed_all(&mut state, &[0x40, 0x7F]).is_empty());
    }

    #[test]
    fn tune_request_is_emitted_alone() {
        let mut state = DecoderState::with_delay(0);
        state.feed(0x90, 0);
        let tune = state.feed(0xF6, 50).unwrap();
        assert_eq!(tune, ShortMessage::single(0xF6, 50));
        assert!(state.is_idle());
        assert_eq!(state.running_status(), 0);
    }

    #[test]
    fn system_exclusive_payload_is_dropped() {
        let mut state = DecoderState::new();
        let messages = feed_all(
            &mut state,
            &[0xF0, 0x7E, 0x00, 0x09, 0x01, 0xF7, 0x90, 0x3C, 0x40],
        );
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].bytes().as_slice(), &[0x90, 0x3C, 0x40]);
    }

    #[test]
    fn undefined_system_common_payload_is_dropped() {
        let mut state = DecoderState::new();
        let messages = feed_all(&mut state, &[0xF4, 0x01, 0x02, 0xF5, 0x03, 0xC0, 0x09]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].bytes().as_slice(), &[0xC0, 0x09]);
    }

    #[test]
    fn stray_data_byte_resynchronises() {
        let mut state = DecoderState::new();
        let messages = feed_all(&mut state, &[0x40, 0x90, 0x40, 0x7F]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].bytes().as_slice(), &[0x90, 0x40, 0x7F]);
    }

    #[test]
    fn status_interrupting_message_restarts() {
        let mut state = DecoderState::new();
        let messages = feed_all(&mut state, &[0x90, 0x40, 0xB0, 0x07, 0x64]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].bytes().as_slice(), &[0xB0, 0x07, 0x64]);
    }

    #[test]
    fn decode_next_resumes_after_no_data() {
        let clock = ManualClock::new();
        let mut decoder = MidiDecoder::default();
        let mut source = MemorySource::new("test", [0x90, 0x3C]);

        assert_eq!(decoder.decode_next(&mut source, &clock).unwrap(), ReadOutcome::NoData);
        let snapshot = decoder.state().clone();
        assert_eq!(decoder.decode_next(&mut source, &clock).unwrap(), ReadOutcome::NoData);
        assert_eq!(decoder.state(), &snapshot);

        source.push(0x7F);
        let outcome = decoder.decode_next(&mut source, &clock).unwrap();
        assert_eq!(
            outcome,
            ReadOutcome::Message(ShortMessage::new(0x90, Some(0x3C), Some(0x7F), CONSTANT_DELAY_NANOS))
        );
    }

    #[test]
    fn decode_next_reports_close_before_reading() {
        let clock = ManualClock::new();
        let signal = CloseSignal::new();
        let mut decoder = MidiDecoder::default().with_close_signal(signal.clone());
        let mut source = MemorySource::new("test", [0xF8]);

        signal.request();
        assert_eq!(decoder.decode_next(&mut source, &clock).unwrap(), ReadOutcome::Closed);
        assert!(decoder.state().is_closing());
        assert_eq!(source.remaining(), 1);
    }

    #[test]
    fn huge_delay_saturates_timestamps() {
        let mut state = DecoderState::with_delay(u64::MAX);
        assert_eq!(state.feed(0xF8, 1), Some(ShortMessage::single(0xF8, u64::MAX)));
        assert_eq!(state.feed(0xC0, 2), None);
        assert_eq!(
            state.feed(0x05, 3),
            Some(ShortMessage::new(0xC0, Some(0x05), None, u64::MAX))
        );
        assert_eq!(state.feed(0xF6, 4), Some(ShortMessage::single(0xF6, u64::MAX)));
    }
}
