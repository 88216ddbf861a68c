#![no_main]

use droptail_log_pipeline::collector::journal::format_entry;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(entry) = std::str::from_utf8(data) {
        let _ = format_entry(entry, "%Y-%m-%dT%H:%M:%S%.6f%:z");
    }
});
