use anyhow::Result;
use clap::Parser;
use harmoniq_rawmidi::MidiBackend;
use tracing_subscriber::EnvFilter;

mod echo;

use echo::LoopOptions;

#[derive(Parser)]
#[command(author, version, about = "Echoes raw MIDI IN to MIDI OUT")]
struct Cli {
    /// Verbose mode.
    #[arg(short, long)]
    verbose: bool,
    /// Print the time of every incoming byte.
    #[arg(short, long)]
    timing: bool,
    /// MIDI input only, no output device.
    #[arg(short, long)]
    input_only: bool,
    /// Use a blocking read instead of polling.
    #[arg(short, long)]
    blocking: bool,
    /// Also decode the received bytes and print every message.
    #[arg(long)]
    decode: bool,
    /// List MIDI input devices and exit.
    #[arg(long)]
    list: bool,
    /// Rawmidi input device, e.g. `hw:1,0`.
    in_dev: Option<String>,
    /// Rawmidi output device.
    out_dev: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    if cli.list {
        return list_devices();
    }

    let Some(in_dev) = cli.in_dev.as_deref() else {
        anyhow::bail!("too few parameters: an input device is required");
    };
    let out_dev = if cli.input_only {
        None
    } else {
        match cli.out_dev.as_deref() {
            Some(name) => Some(name),
            None => anyhow::bail!("too few parameters: an output device is required without --input-only"),
        }
    };
    if cli.verbose {
        match out_dev {
            Some(out_dev) => eprintln!("Using:\n  Input: {in_dev}  Output: {out_dev}"),
            None => eprintln!("Using:\n  Input: {in_dev}"),
        }
    }

    let options = LoopOptions {
        verbose: cli.verbose,
        timing: cli.timing,
        decode: cli.decode,
        ..LoopOptions::default()
    };
    run(in_dev, out_dev, cli.blocking, &options)
}

#[cfg(target_os = "linux")]
fn backend() -> harmoniq_rawmidi::backend_alsa::AlsaRawmidiBackend {
    harmoniq_rawmidi::backend_alsa::AlsaRawmidiBackend
}

#[cfg(not(target_os = "linux"))]
fn backend() -> harmoniq_rawmidi::backend_midir::MidirBackend {
    harmoniq_rawmidi::backend_midir::MidirBackend
}

fn list_devices() -> Result<()> {
    for entry in backend().enumerate()? {
        println!("{}", entry.full_info_string());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn install_stop_handler(blocking: bool) -> Result<std::sync::Arc<std::sync::atomic::AtomicBool>> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    let stop = Arc::new(AtomicBool::new(false));
    let stop_clone = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_clone.store(true, Ordering::SeqCst);
        if blocking {
            println!("Press a MIDI key now (to bail out of the blocking read call).");
        }
    })?;
    Ok(stop)
}

#[cfg(target_os = "linux")]
fn run(in_dev: &str, out_dev: Option<&str>, blocking: bool, options: &LoopOptions) -> Result<()> {
    use anyhow::Context;
    use harmoniq_rawmidi::backend_alsa::{RawmidiSink, RawmidiSource};
    use harmoniq_rawmidi::ByteSource;

    let mut source =
        RawmidiSource::open(in_dev, blocking).with_context(|| format!("failed to open {in_dev}"))?;
    let mut sink = out_dev
        .map(|name| RawmidiSink::open(name).with_context(|| format!("failed to open {name}")))
        .transpose()?;
    let stop = install_stop_handler(blocking)?;

    if blocking {
        println!("After Ctrl-C, press a MIDI key to quit.");
    } else {
        println!("Press Ctrl-C to quit.");
    }

    let report = echo::run_loop(&mut source, sink.as_mut(), &stop, options, &mut std::io::stdout())?;
    tracing::debug!(received = report.received, decoded = report.decoded, "closing");
    source.close();
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn run(_in_dev: &str, _out_dev: Option<&str>, _blocking: bool, _options: &LoopOptions) -> Result<()> {
    anyhow::bail!("midiloop needs ALSA rawmidi devices and only runs on Linux")
}
