#![no_main]

use std::sync::{Arc, OnceLock};

use chrono::{TimeZone, Utc};
use droptail_core::config::ParserConfig;
use droptail_core::metrics::DropMetrics;
use droptail_log_pipeline::DropParser;
use libfuzzer_sys::fuzz_target;

fn parser() -> &'static DropParser {
    static PARSER: OnceLock<DropParser> = OnceLock::new();
    PARSER.get_or_init(|| {
        let config = ParserConfig {
            log_prefix: "marker".to_owned(),
            ..Default::default()
        };
        DropParser::from_core(&config, Arc::new(DropMetrics::new()))
            .expect("default time layout is valid")
    })
}

fuzz_target!(|data: &[u8]| {
    if let Ok(line) = std::str::from_utf8(data) {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        let _ = parser().parse_line(line, now);
    }
});
