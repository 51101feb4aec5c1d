//! The echo loop: copy every received byte to the output and report it.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use harmoniq_rawmidi::{ByteSink, ByteSource, DecoderState};

#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Print a dot for every status byte.
    pub verbose: bool,
    /// Print the arrival time of every byte.
    pub timing: bool,
    /// Print every decoded message.
    pub decode: bool,
    /// How long to wait for input before checking the stop flag again.
    pub poll_timeout: Duration,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            timing: false,
            decode: false,
            poll_timeout: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub received: usize,
    pub decoded: usize,
}

/// Echo bytes from `source` to `sink` until `stop` is raised.
pub fn run_loop<S, K, W>(
    source: &mut S,
    mut sink: Option<&mut K>,
    stop: &AtomicBool,
    options: &LoopOptions,
    out: &mut W,
) -> anyhow::Result<LoopReport>
where
    S: ByteSource + ?Sized,
    K: ByteSink + ?Sized,
    W: Write,
{
    let start = Instant::now();
    let mut decoder = DecoderState::new();
    let mut report = LoopReport::default();

    while !stop.load(Ordering::Acquire) {
        let byte = source.read_byte().context("failed to read MIDI IN")?;
        if stop.load(Ordering::Acquire) {
            break;
        }
        let Some(byte) = byte else {
            source
                .poll_ready(options.poll_timeout)
                .context("failed to wait for MIDI IN")?;
            continue;
        };

        if let Some(sink) = sink.as_deref_mut() {
            if let Err(err) = sink.write_bytes(&[byte]) {
                tracing::error!(?err, "error writing byte to MIDI OUT");
            }
        }
        report.received += 1;
        if options.timing {
            writeln!(
                out,
                "{}ms: received byte {}: {byte:2x}",
                start.elapsed().as_millis(),
                report.received
            )?;
            out.flush()?;
        } else if options.verbose && byte & 0x80 != 0 {
            write!(out, ".")?;
            out.flush()?;
        }
        if options.decode {
            let now = start.elapsed().as_nanos() as u64;
            if let Some(message) = decoder.feed(byte, now) {
                report.decoded += 1;
                writeln!(out, "decoded: {message}")?;
            }
        }
    }

    if options.verbose {
        writeln!(out, "\nEnd...")?;
    }
    writeln!(out, "received bytes:       {}", report.received)?;
    if let Some(sink) = sink {
        sink.drain().context("failed to drain MIDI OUT")?;
    }
    Ok(report)
}
