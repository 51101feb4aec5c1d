#![no_main]

use harmoniq_rawmidi::{DecoderState, ShortMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut state = DecoderState::new();
    for (at, &byte) in data.iter().enumerate() {
        let now = at as u64 * 1_000;
        let decoded = state.feed(byte, now);
        assert!(matches!(state.bit_shift(), 0 | 8 | 15));
        let Some(message) = decoded else {
            continue;
        };
        assert!(message.status >= 0x80);
        assert!(!matches!(message.status, 0xF0 | 0xF4 | 0xF5 | 0xF7 | 0xF9 | 0xFD));
        assert!(message.timestamp <= now + state.delay_nanos());
        for data_byte in message.bytes().iter().skip(1) {
            assert!(*data_byte < 0x80);
        }
        let unpacked = ShortMessage::unpack(message.pack());
        assert_eq!(unpacked.bytes(), message.bytes());
    }
});
