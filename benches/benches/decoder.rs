use std::time::Duration;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use harmoniq_rawmidi::{DecoderState, ManualClock, MemorySource, MidiDecoder, ReadOutcome};

/// A dense performance: notes under running status with a MIDI clock tick
/// between the data bytes of every fourth message.
fn performance(messages: usize) -> Vec<u8> {
    let mut bytes = vec![0x90];
    for index in 0..messages {
        let note = (index % 88) as u8 + 21;
        bytes.push(note);
        if index % 4 == 0 {
            bytes.push(0xF8);
        }
        bytes.push(if index % 2 == 0 { 0x64 } else { 0x00 });
    }
    bytes
}

fn decoder_throughput(c: &mut Criterion) {
    let bytes = performance(16_384);
    let mut group = c.benchmark_group("decoder");
    group.measurement_time(Duration::from_secs(10));
    group.throughput(Throughput::Bytes(bytes.len() as u64));

    group.bench_function("feed_running_status", |b| {
        b.iter(|| {
            let mut state = DecoderState::new();
            let mut decoded = 0usize;
            for (at, &byte) in bytes.iter().enumerate() {
                if state.feed(byte, at as u64 * 320_000).is_some() {
                    decoded += 1;
                }
            }
            decoded
        });
    });

    group.bench_function("decode_next_memory_source", |b| {
        let clock = ManualClock::new();
        b.iter_batched(
            || MemorySource::new("bench", bytes.iter().copied()),
            |mut source| {
                let mut decoder = MidiDecoder::default();
                let mut decoded = 0usize;
                while let Ok(ReadOutcome::Message(_)) = decoder.decode_next(&mut source, &clock) {
                    decoded += 1;
                }
                decoded
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, decoder_throughput);
criterion_main!(benches);
