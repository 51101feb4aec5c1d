//! Threaded MIDI input delivering decoded messages to listeners.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::MidiInSettings;
use crate::message::ShortMessage;
use crate::source::ByteSource;
use crate::stream::{CloseHandle, MidiInStream};
use crate::MidiInError;

/// Identifier returned by [`MidiInput::add_listener`].
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&ShortMessage) + Send + Sync>;

static NEXT_INSTANCE: AtomicUsize = AtomicUsize::new(0);

struct Shared {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    timestamping: AtomicBool,
    open: AtomicBool,
    received: AtomicU64,
}

/// A MIDI input stream read on its own thread.
///
/// Messages go to every registered listener and into a bounded queue that
/// can be drained with [`MidiInput::try_recv`].
pub struct MidiInput {
    name: String,
    index: usize,
    close: CloseHandle,
    shared: Arc<Shared>,
    next_listener: AtomicU64,
    rx: Receiver<ShortMessage>,
    thread: Option<thread::JoinHandle<()>>,
}

impl MidiInput {
    /// Start reading `stream` on a dedicated thread.
    pub fn spawn<S, C>(mut stream: MidiInStream<S, C>, settings: &MidiInSettings) -> anyhow::Result<Self>
    where
        S: ByteSource + Send + 'static,
        C: Clock + 'static,
    {
        let name = stream.name().to_string();
        let close = stream.close_handle();
        // The shared switch below decides; the stream always stamps.
        stream.set_timestamping(true);
        let (tx, rx) = crossbeam_channel::bounded(settings.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            listeners: Mutex::new(Vec::new()),
            timestamping: AtomicBool::new(settings.timestamping),
            open: AtomicBool::new(true),
            received: AtomicU64::new(0),
        });
        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("harmoniq-rawmidi-in".into())
            .spawn(move || read_loop(stream, tx, thread_shared))?;
        Ok(Self {
            name,
            index: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            close,
            shared,
            next_listener: AtomicU64::new(1),
            rx,
            thread: Some(handle),
        })
    }

    /// Name of the device being read.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Process wide index of this input, in creation order.
    pub fn instance_index(&self) -> usize {
        self.index
    }

    /// Whether the reader thread is still delivering messages.
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// Register a listener called on the reader thread for every message.
    pub fn add_listener(&self, listener: impl Fn(&ShortMessage) + Send + Sync + 'static) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.shared.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(candidate, _)| *candidate != id);
        listeners.len() != before
    }

    /// When disabled, all delivered messages carry timestamp 0.
    pub fn set_timestamping(&self, enabled: bool) {
        self.shared.timestamping.store(enabled, Ordering::Release);
    }

    /// Whether delivered messages carry timestamps.
    pub fn is_timestamping(&self) -> bool {
        self.shared.timestamping.load(Ordering::Acquire)
    }

    /// Number of messages decoded so far.
    pub fn messages_received(&self) -> u64 {
        self.shared.received.load(Ordering::Acquire)
    }

    /// Receive the next queued message, if available.
    pub fn try_recv(&self) -> Option<ShortMessage> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next queued message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ShortMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// The queue receiver, for use with `crossbeam_channel::select!`.
    pub fn receiver(&self) -> &Receiver<ShortMessage> {
        &self.rx
    }

    /// Stop the reader thread and release the device.
    pub fn close(&mut self) {
        self.close.request_close();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::warn!(device = %self.name, "raw MIDI reader thread panicked");
            }
        }
        self.shared.open.store(false, Ordering::Release);
    }
}

impl Drop for MidiInput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Marks the input closed when the reader thread ends, including by panic.
struct OpenGuard(Arc<Shared>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.open.store(false, Ordering::Release);
    }
}

fn read_loop<S: ByteSource, C: Clock>(
    stream: MidiInStream<S, C>,
    tx: Sender<ShortMessage>,
    shared: Arc<Shared>,
) {
    let _guard = OpenGuard(Arc::clone(&shared));
    // Declared after the guard so the device is released before the input
    // reports itself closed.
    let mut stream = stream;
    loop {
        match stream.read_message() {
            Ok(Some(mut message)) => {
                if !shared.timestamping.load(Ordering::Acquire) {
                    message.timestamp = 0;
                }
                shared.received.fetch_add(1, Ordering::AcqRel);
                let listeners: Vec<Listener> = shared
                    .listeners
                    .lock()
                    .iter()
                    .map(|(_, listener)| Arc::clone(listener))
                    .collect();
                for listener in listeners {
                    listener(&message);
                }
                match tx.try_send(message) {
                    Ok(()) | Err(TrySendError::Disconnected(_)) => {}
                    Err(TrySendError::Full(_)) => {
                        tracing::debug!(device = %stream.name(), %message, "MIDI input queue full, dropping message");
                    }
                }
            }
            Ok(None) => break,
            Err(MidiInError::Closed) => {
                tracing::info!(device = %stream.name(), "raw MIDI source disconnected");
                break;
            }
            Err(err) => {
                tracing::error!(?err, device = %stream.name(), "raw MIDI input terminated with error");
                break;
            }
        }
    }
    stream.close();
}
