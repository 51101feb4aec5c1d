//! Raw MIDI input with Linux-first support.
//!
//! Bytes arrive one at a time from a [`ByteSource`] (an ALSA rawmidi device, a
//! midir port, or an in-process channel) and are folded into complete short
//! messages by a resumable running-status decoder.

use thiserror::Error;

pub mod clock;
pub mod config;
pub mod decoder;
pub mod device;
pub mod input;
pub mod message;
pub mod source;
pub mod stream;

#[cfg(all(feature = "alsa", target_os = "linux"))]
pub mod backend_alsa;
#[cfg(feature = "midir")]
pub mod backend_midir;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::MidiInSettings;
pub use decoder::{CloseSignal, DecoderState, MidiDecoder, ReadOutcome, CONSTANT_DELAY_NANOS};
pub use device::{
    device_entry_list, BoxedByteSource, DeviceStream, MidiBackend, MidiInDeviceEntry,
    MidiInDeviceManager,
};
pub use input::{ListenerId, MidiInput};
pub use message::ShortMessage;
pub use source::{
    byte_channel, ByteSink, ByteSource, ChannelByteSender, ChannelByteSource, MemorySource,
    VecSink,
};
pub use stream::{CloseHandle, CloseRequest, MidiInStream};

/// Timestamp in nanoseconds since the owning stream was opened.
pub type MidiTimestamp = u64;

/// Errors that can be produced while reading raw MIDI input.
#[derive(Debug, Error)]
pub enum MidiInError {
    /// The requested device name is not known to the backend.
    #[error("unknown MIDI device '{0}'")]
    UnknownDevice(String),
    /// The stream or its byte source has been closed.
    #[error("MIDI input closed")]
    Closed,
    /// I/O failure on the underlying device.
    #[error("MIDI device I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Backend specific failure with additional context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MidiInError>;
