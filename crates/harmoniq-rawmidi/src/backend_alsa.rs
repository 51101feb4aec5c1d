//! ALSA rawmidi backend.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use alsa::ctl::Ctl;
use alsa::poll::Descriptors;
use alsa::rawmidi::Rawmidi;
use alsa::Direction;
use anyhow::Context;

use crate::device::{device_entry_list, BoxedByteSource, MidiBackend, MidiInDeviceEntry};
use crate::source::{ByteSink, ByteSource};
use crate::{MidiInError, Result};

fn alsa_err(err: alsa::Error) -> MidiInError {
    MidiInError::Backend(err.to_string())
}

/// Backend talking to ALSA rawmidi devices directly.
#[derive(Debug, Default)]
pub struct AlsaRawmidiBackend;

impl AlsaRawmidiBackend {
    fn hardware_entries() -> anyhow::Result<Vec<MidiInDeviceEntry>> {
        let mut entries = Vec::new();
        for card in alsa::card::Iter::new() {
            let card = card.context("failed to iterate sound cards")?;
            let index = card.get_index();
            let ctl = match Ctl::from_card(&card, false) {
                Ok(ctl) => ctl,
                Err(err) => {
                    tracing::warn!(?err, card = index, "cannot open control interface");
                    continue;
                }
            };
            let card_name = card.get_name().ok();
            for info in alsa::rawmidi::Iter::new(&ctl) {
                let Ok(info) = info else {
                    continue;
                };
                if info.get_stream() != Direction::Capture || info.get_subdevice() != 0 {
                    continue;
                }
                let driver_name = card_name
                    .clone()
                    .or_else(|| info.get_subdevice_name().ok())
                    .unwrap_or_else(|| format!("card {index}"));
                entries.push(MidiInDeviceEntry::new(
                    format!("hw:{index},{}", info.get_device()),
                    driver_name,
                ));
            }
        }
        Ok(entries)
    }
}

impl MidiBackend for AlsaRawmidiBackend {
    fn enumerate(&self) -> anyhow::Result<Vec<MidiInDeviceEntry>> {
        Ok(device_entry_list(Self::hardware_entries()?))
    }

    fn open_input(&mut self, dev_name: &str) -> anyhow::Result<BoxedByteSource> {
        let source = RawmidiSource::open(dev_name, false)
            .with_context(|| format!("failed to open rawmidi input '{dev_name}'"))?;
        Ok(Box::new(source))
    }
}

/// A rawmidi capture device.
pub struct RawmidiSource {
    name: String,
    rawmidi: Option<Rawmidi>,
    blocking: bool,
}

impl RawmidiSource {
    /// Opens `name` for capture. Blocking sources wait inside `read_byte`.
    pub fn open(name: &str, blocking: bool) -> Result<Self> {
        let rawmidi = Rawmidi::new(name, Direction::Capture, !blocking).map_err(alsa_err)?;
        tracing::debug!(device = name, blocking, "opened rawmidi capture");
        Ok(Self {
            name: name.to_string(),
            rawmidi: Some(rawmidi),
            blocking,
        })
    }

    fn rawmidi(&self) -> Result<&Rawmidi> {
        self.rawmidi.as_ref().ok_or(MidiInError::Closed)
    }
}

impl ByteSource for RawmidiSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.rawmidi()?.io().read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn poll_ready(&mut self, timeout: Duration) -> Result<bool> {
        if self.blocking {
            return Ok(true);
        }
        let rawmidi = self.rawmidi()?;
        let mut fds = Descriptors::get(rawmidi).map_err(alsa_err)?;
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let ready = alsa::poll::poll(&mut fds, timeout_ms).map_err(alsa_err)?;
        Ok(ready > 0)
    }

    fn close(&mut self) {
        if self.rawmidi.take().is_some() {
            tracing::debug!(device = %self.name, "closed rawmidi capture");
        }
    }
}

/// A rawmidi playback device.
pub struct RawmidiSink {
    name: String,
    rawmidi: Rawmidi,
}

impl RawmidiSink {
    /// Opens `name` for blocking playback.
    pub fn open(name: &str) -> Result<Self> {
        let rawmidi = Rawmidi::new(name, Direction::Playback, false).map_err(alsa_err)?;
        Ok(Self {
            name: name.to_string(),
            rawmidi,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ByteSink for RawmidiSink {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.rawmidi.io().write_all(bytes)?;
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.rawmidi.drain().map_err(alsa_err)
    }
}

impl Drop for RawmidiSink {
    fn drop(&mut self) {
        if let Err(err) = self.rawmidi.drain() {
            tracing::debug!(?err, device = %self.name, "failed to drain rawmidi output");
        }
    }
}
