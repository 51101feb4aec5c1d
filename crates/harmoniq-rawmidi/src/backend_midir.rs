use std::time::Duration;

use anyhow::Context;
use midir::{Ignore, MidiInput, MidiInputConnection};

use crate::device::{BoxedByteSource, MidiBackend, MidiInDeviceEntry};
use crate::source::{byte_channel, ByteSource, ChannelByteSource};
use crate::Result;

const CLIENT_NAME: &str = "harmoniq-rawmidi";
const PORT_PREFIX: &str = "midir:";

/// Backend implemented using the `midir` crate.
///
/// Devices are named `midir:<port index>`. midir hands over whole messages;
/// their bytes are fed to the decoder one at a time like any other source.
#[derive(Debug, Default)]
pub struct MidirBackend;

fn port_index(dev_name: &str) -> Option<usize> {
    dev_name.strip_prefix(PORT_PREFIX)?.parse().ok()
}

impl MidiBackend for MidirBackend {
    fn enumerate(&self) -> anyhow::Result<Vec<MidiInDeviceEntry>> {
        let input = MidiInput::new(CLIENT_NAME).context("initialise midir for enumeration")?;
        let entries = input
            .ports()
            .iter()
            .enumerate()
            .map(|(index, port)| {
                let name = input
                    .port_name(port)
                    .unwrap_or_else(|_| format!("Port {index}"));
                MidiInDeviceEntry::new(format!("{PORT_PREFIX}{index}"), name)
            })
            .collect();
        Ok(entries)
    }

    fn open_input(&mut self, dev_name: &str) -> anyhow::Result<BoxedByteSource> {
        let Some(index) = port_index(dev_name) else {
            anyhow::bail!("'{dev_name}' is not a midir port name");
        };
        let mut input = MidiInput::new(CLIENT_NAME).context("initialise midir for input")?;
        input.ignore(Ignore::None);
        let ports = input.ports();
        let Some(port) = ports.get(index) else {
            anyhow::bail!("midi port index out of range");
        };
        let (sender, source) = byte_channel(dev_name);
        let connection = input
            .connect(
                port,
                "harmoniq-rawmidi-conn",
                move |_timestamp, message, _| {
                    // The reader may already be gone; the connection is dropped with it.
                    let _ = sender.send_bytes(message);
                },
                (),
            )
            .map_err(|err| anyhow::anyhow!("failed to connect midi input: {err}"))?;
        Ok(Box::new(MidirByteSource {
            connection: Some(connection),
            source,
        }))
    }
}

/// Byte source fed by a live midir connection.
pub struct MidirByteSource {
    connection: Option<MidiInputConnection<()>>,
    source: ChannelByteSource,
}

impl ByteSource for MidirByteSource {
    fn name(&self) -> &str {
        self.source.name()
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        self.source.read_byte()
    }

    fn poll_ready(&mut self, timeout: Duration) -> Result<bool> {
        self.source.poll_ready(timeout)
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
        self.source.close();
    }
}
