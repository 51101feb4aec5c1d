use std::fmt;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::clock::MonotonicClock;
use crate::config::MidiInSettings;
use crate::source::ByteSource;
use crate::stream::{CloseHandle, MidiInStream};
use crate::MidiInError;

/// Name of the device that resolves to the system default MIDI input.
pub const DEFAULT_DEVICE: &str = "default";
/// Name of the device that creates a virtual input port.
pub const VIRTUAL_DEVICE: &str = "virtual";

/// Byte source handed out by backends.
pub type BoxedByteSource = Box<dyn ByteSource + Send>;

/// Stream type produced by [`MidiInDeviceManager::open`].
pub type DeviceStream = MidiInStream<BoxedByteSource, MonotonicClock>;

/// An openable MIDI input as reported by a backend.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MidiInDeviceEntry {
    /// Name passed to [`MidiBackend::open_input`], e.g. `hw:1,0`.
    pub dev_name: String,
    /// Human readable description.
    pub driver_name: String,
}

impl MidiInDeviceEntry {
    /// Create an entry from a device name and its description.
    pub fn new(dev_name: impl Into<String>, driver_name: impl Into<String>) -> Self {
        Self {
            dev_name: dev_name.into(),
            driver_name: driver_name.into(),
        }
    }

    /// Device name padded to a 12 column field followed by the driver name.
    pub fn full_info_string(&self) -> String {
        format!("{:<12}: {}", self.dev_name, self.driver_name)
    }
}

impl fmt::Display for MidiInDeviceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.dev_name, self.driver_name)
    }
}

/// Surround hardware entries with the `default` and `virtual` pseudo devices.
pub fn device_entry_list(hardware: impl IntoIterator<Item = MidiInDeviceEntry>) -> Vec<MidiInDeviceEntry> {
    let mut entries = vec![MidiInDeviceEntry::new(DEFAULT_DEVICE, "ALSA default MIDI device")];
    entries.extend(hardware);
    entries.push(MidiInDeviceEntry::new(VIRTUAL_DEVICE, "ALSA virtual MIDI device"));
    entries
}

/// Backend abstraction for platform specific MIDI inputs.
pub trait MidiBackend: Send {
    /// Enumerate available input devices.
    fn enumerate(&self) -> anyhow::Result<Vec<MidiInDeviceEntry>>;

    /// Open an input device as a non-blocking byte source.
    fn open_input(&mut self, dev_name: &str) -> anyhow::Result<BoxedByteSource>;
}

impl<B: MidiBackend + ?Sized> MidiBackend for Box<B> {
    fn enumerate(&self) -> anyhow::Result<Vec<MidiInDeviceEntry>> {
        (**self).enumerate()
    }

    fn open_input(&mut self, dev_name: &str) -> anyhow::Result<BoxedByteSource> {
        (**self).open_input(dev_name)
    }
}

/// Opens streams through a backend and closes them all when dropped.
pub struct MidiInDeviceManager<B: MidiBackend> {
    backend: B,
    open: Vec<(String, CloseHandle)>,
}

impl<B: MidiBackend> MidiInDeviceManager<B> {
    /// Create a manager around `backend` with no open streams.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            open: Vec::new(),
        }
    }

    /// Access the backend instance.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable access to the backend instance.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Enumerate available input devices.
    pub fn list_devices(&self) -> anyhow::Result<Vec<MidiInDeviceEntry>> {
        self.backend.enumerate()
    }

    /// Open `dev_name` with a fresh clock starting at zero.
    pub fn open(&mut self, dev_name: &str, settings: &MidiInSettings) -> anyhow::Result<DeviceStream> {
        let known = self
            .backend
            .enumerate()
            .context("failed to enumerate MIDI inputs")?
            .iter()
            .any(|entry| entry.dev_name == dev_name);
        if !known {
            return Err(MidiInError::UnknownDevice(dev_name.to_string()).into());
        }
        let source = self
            .backend
            .open_input(dev_name)
            .with_context(|| format!("failed to open MIDI input '{dev_name}'"))?;
        let stream = MidiInStream::open(source, MonotonicClock::new(), settings);
        self.open.retain(|(_, handle)| !handle.is_close_requested());
        self.open.push((dev_name.to_string(), stream.close_handle()));
        Ok(stream)
    }

    /// Names of devices opened through this manager and not yet closed.
    pub fn open_devices(&self) -> impl Iterator<Item = &str> {
        self.open
            .iter()
            .filter(|(_, handle)| !handle.is_close_requested())
            .map(|(name, _)| name.as_str())
    }

    /// Ask every stream opened through this manager to close.
    pub fn close_all(&mut self) {
        for (name, handle) in self.open.drain(..) {
            let request = handle.request_close();
            tracing::debug!(device = %name, ?request, "closing MIDI input");
        }
    }
}

impl<B: MidiBackend> Drop for MidiInDeviceManager<B> {
    fn drop(&mut self) {
        self.close_all();
    }
}
