//! An open raw MIDI input stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::clock::Clock;
use crate::config::MidiInSettings;
use crate::decoder::{CloseSignal, DecoderState, MidiDecoder, ReadOutcome};
use crate::message::ShortMessage;
use crate::source::ByteSource;
use crate::{MidiTimestamp, Result};

/// Outcome of a close request issued through a [`CloseHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseRequest {
    /// No read was in flight; the stream will not produce further messages.
    Accepted,
    /// A read is in flight and will unwind within one poll timeout.
    Pending,
}

/// Thread safe handle used to close a stream that another thread reads.
#[derive(Debug, Clone)]
pub struct CloseHandle {
    signal: CloseSignal,
    reading: Arc<AtomicBool>,
}

impl CloseHandle {
    /// Asks the stream to close.
    pub fn request_close(&self) -> CloseRequest {
        self.signal.request();
        if self.reading.load(Ordering::Acquire) {
            CloseRequest::Pending
        } else {
            CloseRequest::Accepted
        }
    }

    /// Whether a close has been requested.
    pub fn is_close_requested(&self) -> bool {
        self.signal.is_requested()
    }

    /// Whether a blocking read is currently in flight on the stream.
    pub fn is_reading(&self) -> bool {
        self.reading.load(Ordering::Acquire)
    }
}

/// Raw MIDI input stream: one byte source, one clock and one decoder.
///
/// Exactly one thread reads from a stream; other threads interact with it
/// only through [`CloseHandle`].
pub struct MidiInStream<S: ByteSource, C: Clock> {
    name: String,
    source: Option<S>,
    clock: C,
    decoder: MidiDecoder,
    close_signal: CloseSignal,
    reading: Arc<AtomicBool>,
    poll_timeout: Duration,
    timestamping: bool,
}

impl<S: ByteSource, C: Clock> MidiInStream<S, C> {
    /// Wraps an opened byte source. `clock` should read zero at open time.
    pub fn open(source: S, clock: C, settings: &MidiInSettings) -> Self {
        let name = source.name().to_string();
        let close_signal = CloseSignal::new();
        let decoder = MidiDecoder::new(DecoderState::with_delay(settings.delay_compensation_nanos))
            .with_close_signal(close_signal.clone());
        info!(device = %name, "opened raw MIDI input");
        Self {
            name,
            source: Some(source),
            clock,
            decoder,
            close_signal,
            reading: Arc::new(AtomicBool::new(false)),
            poll_timeout: settings.poll_timeout(),
            timestamping: settings.timestamping,
        }
    }

    /// Name of the underlying device.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the device is still held by this stream.
    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    /// Handle that other threads can use to close this stream.
    pub fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            signal: self.close_signal.clone(),
            reading: Arc::clone(&self.reading),
        }
    }

    /// Current decoder state.
    pub fn decoder_state(&self) -> &DecoderState {
        self.decoder.state()
    }

    /// Enables or disables timestamps. Disabled streams stamp every message with 0.
    pub fn set_timestamping(&mut self, enabled: bool) {
        self.timestamping = enabled;
    }

    /// Whether messages carry timestamps.
    pub fn is_timestamping(&self) -> bool {
        self.timestamping
    }

    /// Current time on the stream clock.
    pub fn timestamp_now(&self) -> MidiTimestamp {
        self.clock.now_nanos()
    }

    fn stamp(&self, mut message: ShortMessage) -> ShortMessage {
        if !self.timestamping {
            message.timestamp = 0;
        }
        message
    }

    /// Decodes as far as the currently available bytes allow, without waiting.
    pub fn try_read(&mut self) -> Result<ReadOutcome> {
        let Some(source) = self.source.as_mut() else {
            return Ok(ReadOutcome::Closed);
        };
        match self.decoder.decode_next(source, &self.clock)? {
            ReadOutcome::Message(message) => Ok(ReadOutcome::Message(self.stamp(message))),
            other => Ok(other),
        }
    }

    /// Blocks until a message is decoded or the stream is closed.
    ///
    /// Returns `Ok(None)` once closed. While waiting, the close request is
    /// re-checked at least once per poll timeout.
    pub fn read_message(&mut self) -> Result<Option<ShortMessage>> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        self.reading.store(true, Ordering::Release);
        let outcome = loop {
            match self.decoder.decode_next(source, &self.clock) {
                Ok(ReadOutcome::NoData) => {
                    if let Err(err) = source.poll_ready(self.poll_timeout) {
                        break Err(err);
                    }
                }
                other => break other,
            }
        };
        self.reading.store(false, Ordering::Release);
        match outcome? {
            ReadOutcome::Message(message) => Ok(Some(self.stamp(message))),
            ReadOutcome::NoData | ReadOutcome::Closed => Ok(None),
        }
    }

    /// Length of the pending system exclusive message. System exclusive input
    /// is not assembled, so this is always 0.
    pub fn long_message_len(&self) -> usize {
        0
    }

    /// Copies a pending system exclusive message into `buf`. System exclusive
    /// input is not assembled, so nothing is copied.
    pub fn read_long(&mut self, _buf: &mut [u8]) -> usize {
        0
    }

    /// Closes the stream and releases the device. Idempotent.
    pub fn close(&mut self) {
        self.close_signal.request();
        self.decoder.state_mut().request_close();
        if let Some(mut source) = self.source.take() {
            source.close();
            info!(device = %self.name, "closed raw MIDI input");
        }
    }
}

impl<S: ByteSource, C: Clock> Drop for MidiInStream<S, C> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<S: ByteSource, C: Clock> std::fmt::Debug for MidiInStream<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MidiInStream")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .field("state", self.decoder.state())
            .finish()
    }
}
