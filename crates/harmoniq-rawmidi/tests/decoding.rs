use std::collections::VecDeque;
use std::time::Duration;

use harmoniq_rawmidi::{
    ByteSource, Clock, DecoderState, ManualClock, MemorySource, MidiDecoder, MidiInSettings,
    MidiInStream, MidiTimestamp, ReadOutcome, ShortMessage, CONSTANT_DELAY_NANOS,
};
use proptest::prelude::*;

/// Byte source that moves a shared clock to each byte's arrival time.
struct ScriptedSource {
    bytes: VecDeque<(u8, MidiTimestamp)>,
    clock: ManualClock,
}

impl ScriptedSource {
    fn new(clock: &ManualClock, script: impl IntoIterator<Item = (u8, MidiTimestamp)>) -> Self {
        Self {
            bytes: script.into_iter().collect(),
            clock: clock.clone(),
        }
    }
}

impl ByteSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn read_byte(&mut self) -> harmoniq_rawmidi::Result<Option<u8>> {
        Ok(self.bytes.pop_front().map(|(byte, at)| {
            self.clock.set(at);
            byte
        }))
    }

    fn poll_ready(&mut self, timeout: Duration) -> harmoniq_rawmidi::Result<bool> {
        if self.bytes.is_empty() {
            std::thread::sleep(timeout);
            return Ok(false);
        }
        Ok(true)
    }
}

fn decode_all<S: ByteSource, C: Clock>(source: &mut S, clock: &C) -> Vec<ShortMessage> {
    let mut decoder = MidiDecoder::default();
    let mut messages = Vec::new();
    while let ReadOutcome::Message(message) = decoder.decode_next(source, clock).unwrap() {
        messages.push(message);
    }
    messages
}

fn decode_bytewise(bytes: &[u8]) -> Vec<ShortMessage> {
    let clock = ManualClock::new();
    let mut decoder = MidiDecoder::default();
    let mut source = MemorySource::new("bytewise", []);
    let mut messages = Vec::new();
    for &byte in bytes {
        source.push(byte);
        loop {
            match decoder.decode_next(&mut source, &clock).unwrap() {
                ReadOutcome::Message(message) => messages.push(message),
                ReadOutcome::NoData => break,
                ReadOutcome::Closed => unreachable!("decoder was never closed"),
            }
        }
    }
    messages
}

fn decode_batch(bytes: &[u8]) -> Vec<ShortMessage> {
    let clock = ManualClock::new();
    decode_all(&mut MemorySource::new("batch", bytes.iter().copied()), &clock)
}

fn payload(messages: &[ShortMessage]) -> Vec<Vec<u8>> {
    messages.iter().map(|message| message.bytes().to_vec()).collect()
}

fn message_strategy() -> impl Strategy<Value = Vec<u8>> {
    let status = prop_oneof![0x80u8..=0xEF, Just(0xF1u8), Just(0xF2u8), Just(0xF3u8), Just(0xF6u8)];
    (status, 0u8..0x80, 0u8..0x80).prop_map(|(status, first, second)| {
        let mut bytes = vec![status];
        let len = ShortMessage::data_len(status).unwrap_or(0);
        bytes.extend([first, second].into_iter().take(len));
        bytes
    })
}

fn realtime_strategy() -> impl Strategy<Value = u8> {
    prop_oneof![Just(0xF8u8), Just(0xFAu8), Just(0xFBu8), Just(0xFCu8), Just(0xFEu8)]
}

proptest! {
    #[test]
    fn bytewise_and_batch_decoding_agree(messages in prop::collection::vec(message_strategy(), 1..32)) {
        let bytes: Vec<u8> = messages.iter().flatten().copied().collect();
        let bytewise = decode_bytewise(&bytes);
        let batch = decode_batch(&bytes);
        prop_assert_eq!(payload(&bytewise), payload(&batch));
        prop_assert_eq!(payload(&batch), messages);
    }

    #[test]
    fn realtime_bytes_interleave_without_corrupting_messages(
        status in prop_oneof![0x80u8..=0xBF, 0xE0u8..=0xEF],
        first in 0u8..0x80,
        second in 0u8..0x80,
        realtime in prop::collection::vec((realtime_strategy(), 0usize..3), 0..8),
    ) {
        let mut gaps: [Vec<u8>; 3] = Default::default();
        for (byte, gap) in &realtime {
            gaps[*gap].push(*byte);
        }
        let mut bytes = vec![status];
        bytes.extend(&gaps[0]);
        bytes.push(first);
        bytes.extend(&gaps[1]);
        bytes.push(second);
        bytes.extend(&gaps[2]);

        let decoded = payload(&decode_batch(&bytes));
        let mut expected: Vec<Vec<u8>> = gaps[0].iter().chain(&gaps[1]).map(|&b| vec![b]).collect();
        expected.push(vec![status, first, second]);
        expected.extend(gaps[2].iter().map(|&b| vec![b]));
        prop_assert_eq!(decoded, expected);
    }

    #[test]
    fn undefined_realtime_bytes_never_surface(
        messages in prop::collection::vec(message_strategy(), 1..16),
        positions in prop::collection::vec((any::<prop::sample::Index>(), prop::bool::ANY), 0..8),
    ) {
        let clean: Vec<u8> = messages.iter().flatten().copied().collect();
        let mut noisy = clean.clone();
        for (index, pick) in positions {
            let at = index.index(noisy.len() + 1);
            noisy.insert(at, if pick { 0xF9 } else { 0xFD });
        }
        prop_assert_eq!(payload(&decode_batch(&noisy)), payload(&decode_batch(&clean)));
    }
}

#[test]
fn running_status_reuses_last_channel_status() {
    let decoded = payload(&decode_batch(&[0x90, 0x40, 0x7F, 0x50, 0x60]));
    assert_eq!(decoded, vec![vec![0x90, 0x40, 0x7F], vec![0x90, 0x50, 0x60]]);
}

#[test]
fn stray_data_byte_resyncs() {
    let decoded = payload(&decode_batch(&[0x40, 0x90, 0x40, 0x7F]));
    assert_eq!(decoded, vec![vec![0x90, 0x40, 0x7F]]);
}

#[test]
fn timestamps_follow_defining_byte_arrival() {
    let clock = ManualClock::new();
    let script = [
        (0x90, 100),
        (0x3C, 200),
        (0x7F, 300),
        (0x3E, 400),
        (0x7F, 500),
        (0xF8, 600),
        (0xC0, 700),
        (0x05, 800),
    ];
    let mut source = ScriptedSource::new(&clock, script);
    let messages = decode_all(&mut source, &clock);
    let times: Vec<_> = messages.iter().map(|message| message.timestamp).collect();
    assert_eq!(
        times,
        [100, 400, 600, 700].map(|at| at + CONSTANT_DELAY_NANOS)
    );
    assert!(times.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn note_on_scenario() {
    let clock = ManualClock::new();
    let mut source = ScriptedSource::new(&clock, [(0x90, 0), (0x3C, 1_000), (0x7F, 2_000)]);
    let messages = decode_all(&mut source, &clock);
    assert_eq!(
        messages,
        vec![ShortMessage::new(0x90, Some(0x3C), Some(0x7F), 600_000)]
    );
}

#[test]
fn clock_between_note_off_data_bytes() {
    let clock = ManualClock::new();
    let mut source = ScriptedSource::new(&clock, [(0x80, 0), (0x3C, 10), (0xF8, 20), (0x00, 30)]);
    let messages = decode_all(&mut source, &clock);
    assert_eq!(
        messages,
        vec![
            ShortMessage::single(0xF8, 20 + CONSTANT_DELAY_NANOS),
            ShortMessage::new(0x80, Some(0x3C), Some(0x00), CONSTANT_DELAY_NANOS),
        ]
    );
}

#[test]
fn stream_reads_scripted_device() {
    let clock = ManualClock::new();
    let source = ScriptedSource::new(&clock, [(0xB0, 5), (0x07, 6), (0x64, 7), (0xFE, 8)]);
    let settings = MidiInSettings {
        delay_compensation_nanos: 0,
        ..MidiInSettings::default()
    };
    let mut stream = MidiInStream::open(source, clock, &settings);
    assert_eq!(
        stream.read_message().unwrap(),
        Some(ShortMessage::new(0xB0, Some(0x07), Some(0x64), 5))
    );
    assert_eq!(stream.read_message().unwrap(), Some(ShortMessage::single(0xFE, 8)));
    assert_eq!(stream.try_read().unwrap(), ReadOutcome::NoData);
    assert!(stream.decoder_state().is_idle());
}

#[test]
fn state_snapshot_survives_between_calls() {
    let mut state = DecoderState::new();
    assert_eq!(state.feed(0xE0, 0), None);
    assert_eq!(state.feed(0x00, 1), None);
    let snapshot = state.clone();
    assert_eq!(snapshot.running_status(), 0xE0);
    assert_eq!(
        state.feed(0x40, 2),
        Some(ShortMessage::new(0xE0, Some(0x00), Some(0x40), CONSTANT_DELAY_NANOS))
    );
}
