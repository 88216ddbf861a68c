#![no_main]

use std::io::Cursor;

use arbitrary::Arbitrary;
use droptail_log_pipeline::TailState;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    first: Vec<u8>,
    second: Vec<u8>,
    max_lines: u8,
}

fuzz_target!(|input: Input| {
    let max_lines = usize::from(input.max_lines).max(1);
    let mut state = TailState::default();
    let _ = state.read_new_lines(&mut Cursor::new(input.first), max_lines);
    let _ = state.read_new_lines(&mut Cursor::new(input.second), max_lines);
});
