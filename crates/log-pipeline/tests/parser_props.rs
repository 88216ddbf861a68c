//! 파서 속성 테스트 (proptest)

use std::sync::Arc;

use chrono::{TimeDelta, TimeZone, Utc};
use droptail_core::metrics::DropMetrics;
use droptail_log_pipeline::{DropParser, TimeLayout};
use proptest::prelude::*;

fn parser() -> DropParser {
    DropParser::new(
        "drop:",
        TimeLayout::new("%Y-%m-%dT%H:%M:%S%.6f%:z").unwrap(),
        TimeDelta::minutes(10),
        Arc::new(DropMetrics::new()),
    )
}

fn ipv4() -> impl Strategy<Value = String> {
    (any::<u8>(), any::<u8>(), any::<u8>(), any::<u8>())
        .prop_map(|(a, b, c, d)| format!("{a}.{b}.{c}.{d}"))
}

proptest! {
    #[test]
    fn arbitrary_input_never_panics(line in ".{0,256}") {
        let _ = parser().parse_line(&line, Utc::now());
    }

    #[test]
    fn lines_without_marker_never_emit(line in "[a-zA-Z0-9=:. ]{0,200}") {
        prop_assume!(!line.split_whitespace().any(|t| t == "drop:"));
        prop_assert!(parser().parse_line(&line, Utc::now()).unwrap().is_none());
    }

    #[test]
    fn fields_survive_parsing(
        src in ipv4(),
        dst in ipv4(),
        spt in any::<u16>(),
        dpt in any::<u16>(),
        ttl in any::<u8>(),
        proto in prop::sample::select(vec!["TCP", "UDP", "ICMP"]),
    ) {
        let line = format!(
            "2024-01-01T00:00:00.000000+00:00 node-1 drop: IN=eth0 OUT=cali1 SRC={src} DST={dst} \
             PROTO={proto} SPT={spt} DPT={dpt} TTL={ttl}"
        );
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        let drop = parser().parse_line(&line, now).unwrap().unwrap();
        prop_assert_eq!(drop.src_ip, src);
        prop_assert_eq!(drop.dst_ip, dst);
        prop_assert_eq!(drop.src_port, spt);
        prop_assert_eq!(drop.dst_port, dpt);
        prop_assert_eq!(drop.ttl, ttl);
        prop_assert_eq!(drop.proto, proto);
    }
}
