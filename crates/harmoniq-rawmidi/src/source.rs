//! Byte level endpoints consumed and fed by the decoder.

use std::collections::VecDeque;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::{MidiInError, Result};

/// A non-blocking supplier of raw MIDI bytes.
pub trait ByteSource {
    /// Human readable name of the endpoint.
    fn name(&self) -> &str;

    /// Returns the next byte, or `None` when no byte is available right now.
    fn read_byte(&mut self) -> Result<Option<u8>>;

    /// Waits up to `timeout` for input. Returns `true` when a byte may be
    /// read. A `false` return carries no information beyond the timeout.
    fn poll_ready(&mut self, timeout: Duration) -> Result<bool>;

    /// Releases the underlying device. Called once when the stream closes.
    fn close(&mut self) {}
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        (**self).read_byte()
    }

    fn poll_ready(&mut self, timeout: Duration) -> Result<bool> {
        (**self).poll_ready(timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// A consumer of raw MIDI bytes, such as a MIDI OUT port.
pub trait ByteSink {
    /// Writes all of `bytes`.
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    /// Blocks until everything written has been transmitted.
    fn drain(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Creates an in-process byte pipe.
///
/// The sender half can be moved to a driver callback; the source half plugs
/// into a [`crate::MidiInStream`].
pub fn byte_channel(name: impl Into<String>) -> (ChannelByteSender, ChannelByteSource) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        ChannelByteSender { tx },
        ChannelByteSource {
            name: name.into(),
            rx: Some(rx),
            pending: None,
        },
    )
}

/// Sending half of [`byte_channel`].
#[derive(Debug, Clone)]
pub struct ChannelByteSender {
    tx: Sender<u8>,
}

impl ChannelByteSender {
    /// Queues one byte. Fails once the source has been closed or dropped.
    pub fn send(&self, byte: u8) -> Result<()> {
        self.tx.send(byte).map_err(|_| MidiInError::Closed)
    }

    /// Queues every byte of `bytes` in order.
    pub fn send_bytes(&self, bytes: &[u8]) -> Result<()> {
        bytes.iter().try_for_each(|&byte| self.send(byte))
    }
}

/// Receiving half of [`byte_channel`].
#[derive(Debug)]
pub struct ChannelByteSource {
    name: String,
    rx: Option<Receiver<u8>>,
    /// Byte taken off the channel while polling, handed out by the next read.
    pending: Option<u8>,
}

impl ByteSource for ChannelByteSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        if let Some(byte) = self.pending.take() {
            return Ok(Some(byte));
        }
        let Some(rx) = self.rx.as_ref() else {
            return Err(MidiInError::Closed);
        };
        match rx.try_recv() {
            Ok(byte) => Ok(Some(byte)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(MidiInError::Closed),
        }
    }

    fn poll_ready(&mut self, timeout: Duration) -> Result<bool> {
        if self.pending.is_some() {
            return Ok(true);
        }
        let Some(rx) = self.rx.as_ref() else {
            return Ok(true);
        };
        match rx.recv_timeout(timeout) {
            Ok(byte) => {
                self.pending = Some(byte);
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            // Let the next read report the disconnect.
            Err(RecvTimeoutError::Disconnected) => Ok(true),
        }
    }

    fn close(&mut self) {
        self.pending = None;
        self.rx = None;
    }
}

/// Byte source over an in-memory buffer, used for replay and tests.
///
/// Nothing can arrive while a reader waits, so polling an empty buffer sleeps
/// for the whole timeout.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    bytes: VecDeque<u8>,
}

impl MemorySource {
    /// Creates a source that yields `bytes` in order.
    pub fn new(name: impl Into<String>, bytes: impl IntoIterator<Item = u8>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into_iter().collect(),
        }
    }

    /// Appends a byte to the end of the buffer.
    pub fn push(&mut self, byte: u8) {
        self.bytes.push_back(byte);
    }

    /// Appends several bytes to the end of the buffer.
    pub fn extend(&mut self, bytes: impl IntoIterator<Item = u8>) {
        self.bytes.extend(bytes);
    }

    /// Number of bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }
}

impl ByteSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        Ok(self.bytes.pop_front())
    }

    fn poll_ready(&mut self, timeout: Duration) -> Result<bool> {
        if self.bytes.is_empty() {
            std::thread::sleep(timeout);
            return Ok(false);
        }
        Ok(true)
    }
}

/// Sink that keeps everything written to it.
#[derive(Debug, Clone, Default)]
pub struct VecSink {
    bytes: Vec<u8>,
}

impl VecSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ByteSink for VecSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.bytes.extend_from_slice(bytes);
        Ok(())
    }
}
