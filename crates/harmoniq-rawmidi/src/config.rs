use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decoder::CONSTANT_DELAY_NANOS;

/// Persisted raw MIDI input settings stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiInSettings {
    /// Device to open, e.g. `default`, `hw:1,0` or `virtual`.
    pub device: String,
    /// How long a blocked read waits for input before re-checking for close.
    pub poll_timeout_ms: u64,
    /// Transmission delay added to every message timestamp.
    pub delay_compensation_nanos: u64,
    /// When disabled, all messages carry timestamp 0.
    pub timestamping: bool,
    /// Capacity of the decoded message queue of a threaded input.
    pub queue_capacity: usize,
}

impl Default for MidiInSettings {
    fn default() -> Self {
        Self {
            device: "default".into(),
            poll_timeout_ms: 200,
            delay_compensation_nanos: CONSTANT_DELAY_NANOS,
            timestamping: true,
            queue_capacity: 1024,
        }
    }
}

impl MidiInSettings {
    /// Poll timeout as a [`Duration`].
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

fn settings_path() -> Option<PathBuf> {
    let mut base = dirs::config_dir()?;
    base.push("HarmoniqStudio");
    if !base.exists() {
        let _ = fs::create_dir_all(&base);
    }
    base.push("rawmidi.json");
    Some(base)
}

/// Load settings from the user configuration directory. Returns defaults if
/// loading fails.
pub fn load() -> MidiInSettings {
    settings_path()
        .map(|path| load_from(&path))
        .unwrap_or_default()
}

/// Load settings from `path`. Returns defaults if the file is missing or invalid.
pub fn load_from(path: &Path) -> MidiInSettings {
    match fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|err| {
            tracing::warn!(?err, path = %path.display(), "invalid raw MIDI settings, using defaults");
            MidiInSettings::default()
        }),
        Err(_) => MidiInSettings::default(),
    }
}

/// Save settings to the user configuration directory.
pub fn save(settings: &MidiInSettings) {
    if let Some(path) = settings_path() {
        save_to(&path, settings);
    }
}

/// Save settings to `path`.
pub fn save_to(path: &Path, settings: &MidiInSettings) {
    if let Ok(json) = serde_json::to_string_pretty(settings) {
        if let Err(err) = fs::write(path, json) {
            tracing::warn!(?err, "failed to write raw MIDI settings");
        }
    }
}
