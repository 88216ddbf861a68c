//! 패킷 드롭 파서
//!
//! iptables `LOG` 타겟이 남긴 라인에서 [`PacketDrop`]을 추출합니다.
//!
//! # 라인 형식
//! ```text
//! <timestamp...> <host> ... <marker> ... SRC=1.1.1.1 SPT=1 DST=2.2.2.2 DPT=2 PROTO=TCP IN=eth0 OUT=eth1 TTL=64 [MAC=...]
//! ```
//!
//! - 마커 토큰이 없는 라인은 에러 없이 무시합니다.
//! - 타임스탬프는 레이아웃의 토큰 수만큼 앞쪽 토큰을 다시 합쳐 파싱합니다.
//! - 연도가 없는 레이아웃은 현재 연도를(연초에 읽은 연말 라인은 전년도를),
//!   오프셋이 없는 레이아웃은 로컬 시간대를 씁니다.
//! - 만료 기간보다 오래된 드롭은 에러 없이 버립니다.

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::format::{Fixed, Item, Numeric, Parsed, StrftimeItems};
use chrono::{DateTime, Datelike, FixedOffset, Local, TimeDelta, TimeZone, Utc};
use droptail_core::config::ParserConfig;
use droptail_core::metrics::DropMetrics;
use droptail_core::types::PacketDrop;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::LogPipelineError;

/// 타임스탬프(1개로 셈)를 포함한 최소 필드 수
pub const MIN_FIELD_COUNT: usize = 11;

/// 연도 없는 타임스탬프가 현재보다 이만큼(시간) 넘게 미래면 전년도로 봅니다.
pub const YEAR_ROLLOVER_SKEW_HOURS: i64 = 24;

/// 파싱된 타임스탬프 레이아웃
#[derive(Debug, Clone)]
pub struct TimeLayout {
    format: String,
    token_count: usize,
    has_year: bool,
    has_offset: bool,
}

impl TimeLayout {
    /// strftime 형식 문자열로 레이아웃을 만듭니다.
    pub fn new(format: &str) -> Result<Self, LogPipelineError> {
        let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
        if items.is_empty() || items.iter().any(|item| matches!(item, Item::Error)) {
            return Err(LogPipelineError::Layout {
                layout: format.to_owned(),
                reason: "unsupported strftime specifier".to_owned(),
            });
        }

        let has_year = items.iter().any(|item| {
            matches!(
                item,
                Item::Numeric(
                    Numeric::Year | Numeric::YearDiv100 | Numeric::YearMod100,
                    _
                ) | Item::Fixed(Fixed::RFC2822 | Fixed::RFC3339)
            )
        });
        let has_offset = items.iter().any(|item| {
            matches!(
                item,
                Item::Fixed(
                    Fixed::TimezoneOffset
                        | Fixed::TimezoneOffsetColon
                        | Fixed::TimezoneOffsetColonZ
                        | Fixed::TimezoneOffsetZ
                        | Fixed::RFC2822
                        | Fixed::RFC3339
                )
            )
        });

        // %e 같은 공백 패딩과 %c 같은 복합 지정자를 고려해 실제 렌더링 결과의 토큰 수를 셉니다.
        let sample = FixedOffset::east_opt(0)
            .and_then(|tz| tz.with_ymd_and_hms(2006, 1, 22, 15, 4, 5).single())
            .ok_or_else(|| LogPipelineError::Layout {
                layout: format.to_owned(),
                reason: "cannot build sample timestamp".to_owned(),
            })?;
        let mut rendered = String::new();
        write!(rendered, "{}", sample.format_with_items(items.iter())).map_err(|_| {
            LogPipelineError::Layout {
                layout: format.to_owned(),
                reason: "cannot render sample timestamp".to_owned(),
            }
        })?;
        let token_count = rendered.split_whitespace().count();
        if token_count == 0 {
            return Err(LogPipelineError::Layout {
                layout: format.to_owned(),
                reason: "layout renders to an empty string".to_owned(),
            });
        }

        Ok(Self {
            format: format.to_owned(),
            token_count,
            has_year,
            has_offset,
        })
    }

    /// 레이아웃이 차지하는 공백 구분 토큰 수
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// 레이아웃 문자열
    pub fn as_str(&self) -> &str {
        &self.format
    }

    /// `now` 기준으로 타임스탬프를 파싱합니다.
    ///
    /// 레이아웃에 연도가 없으면 `now`의 로컬 연도를 채웁니다. 그 결과가
    /// [`YEAR_ROLLOVER_SKEW_HOURS`]보다 더 미래라면 연말에 기록된 라인을 연초에 읽은
    /// 것이므로 전년도로 다시 해석합니다.
    pub fn parse_at(
        &self,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<FixedOffset>, LogPipelineError> {
        let year = now.with_timezone(&Local).year();
        let parsed = self.parse(text, year)?;
        let skew = TimeDelta::hours(YEAR_ROLLOVER_SKEW_HOURS);
        if self.has_year || parsed.with_timezone(&Utc) - now <= skew {
            return Ok(parsed);
        }
        self.parse(text, year - 1)
    }

    /// 타임스탬프를 파싱합니다.
    ///
    /// 레이아웃에 연도가 없으면 `default_year`를 사용하고,
    /// 오프셋이 없으면 로컬 시간대로 해석합니다.
    pub fn parse(
        &self,
        text: &str,
        default_year: i32,
    ) -> Result<DateTime<FixedOffset>, LogPipelineError> {
        let fail = |reason: String| LogPipelineError::Timestamp {
            value: text.to_owned(),
            layout: self.format.clone(),
            reason,
        };

        let mut parsed = Parsed::new();
        chrono::format::parse(&mut parsed, text, StrftimeItems::new(&self.format))
            .map_err(|e| fail(e.to_string()))?;
        if !self.has_year {
            parsed
                .set_year(i64::from(default_year))
                .map_err(|e| fail(e.to_string()))?;
        }

        if self.has_offset {
            return parsed.to_datetime().map_err(|e| fail(e.to_string()));
        }
        let naive = parsed
            .to_naive_datetime_with_offset(0)
            .map_err(|e| fail(e.to_string()))?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.fixed_offset())
            .ok_or_else(|| fail("time does not exist in the local time zone".to_owned()))
    }
}

/// 패킷 드롭 파서
pub struct DropParser {
    marker: String,
    layout: TimeLayout,
    expiration: TimeDelta,
    metrics: Arc<DropMetrics>,
}

impl DropParser {
    /// 새 파서를 생성합니다.
    pub fn new(
        marker: impl Into<String>,
        layout: TimeLayout,
        expiration: TimeDelta,
        metrics: Arc<DropMetrics>,
    ) -> Self {
        Self {
            marker: marker.into(),
            layout,
            expiration,
            metrics,
        }
    }

    /// core 설정에서 파서를 만듭니다.
    pub fn from_core(
        config: &ParserConfig,
        metrics: Arc<DropMetrics>,
    ) -> Result<Self, LogPipelineError> {
        Ok(Self::new(
            config.log_prefix.clone(),
            TimeLayout::new(&config.time_layout)?,
            config.expiration(),
            metrics,
        ))
    }

    /// 라인 하나를 파싱합니다.
    ///
    /// - 마커가 없거나 만료된 드롭이면 `Ok(None)`
    /// - 형식이 잘못된 드롭 라인이면 `Err`
    pub fn parse_line(
        &self,
        line: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<PacketDrop>, LogPipelineError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if !tokens.iter().any(|token| *token == self.marker) {
            return Ok(None);
        }

        let ts_tokens = self.layout.token_count();
        if tokens.len() < ts_tokens {
            return Err(LogPipelineError::TooFewFields {
                count: tokens.len(),
                min: MIN_FIELD_COUNT,
            });
        }
        let timestamp = tokens[..ts_tokens].join(" ");
        let fields = &tokens[ts_tokens..];
        let log_time = self.layout.parse_at(&timestamp, now)?;

        if fields.len() + 1 < MIN_FIELD_COUNT {
            return Err(LogPipelineError::TooFewFields {
                count: fields.len() + 1,
                min: MIN_FIELD_COUNT,
            });
        }

        let drop = PacketDrop {
            log_time,
            host_name: fields[0].to_owned(),
            src_ip: required(fields, "SRC")?.to_owned(),
            src_port: numeric(fields, "SPT")?,
            dst_ip: required(fields, "DST")?.to_owned(),
            dst_port: numeric(fields, "DPT")?,
            proto: required(fields, "PROTO")?.to_owned(),
            in_iface: required(fields, "IN")?.to_owned(),
            out_iface: required(fields, "OUT")?.to_owned(),
            mac: field_value(fields, "MAC")
                .filter(|value| !value.is_empty())
                .map(str::to_owned),
            ttl: numeric(fields, "TTL")?,
        };

        if drop.is_expired_at(now, self.expiration) {
            debug!(drop = %drop, "discarding expired packet drop");
            self.metrics.drop_ignored("expired");
            return Ok(None);
        }
        Ok(Some(drop))
    }

    /// 라인 채널을 소비하며 파싱된 드롭을 전달합니다.
    ///
    /// 라인별 실패는 로그만 남기고 계속 진행합니다.
    /// 입력 채널이 닫히면 종료하고, 출력 채널이 닫히면 에러를 반환합니다.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<String>,
        tx: mpsc::Sender<PacketDrop>,
    ) -> Result<(), LogPipelineError> {
        info!(marker = %self.marker, layout = %self.layout.as_str(), "drop parser started");
        while let Some(line) = rx.recv().await {
            match self.parse_line(&line, Utc::now()) {
                Ok(Some(drop)) => {
                    self.metrics.drop_parsed();
                    tx.send(drop).await.map_err(|_| {
                        LogPipelineError::Channel("packet drop receiver closed".to_owned())
                    })?;
                }
                Ok(None) => {}
                Err(e) => {
                    self.metrics.parse_error();
                    warn!(error = %e, line = %line, "failed to parse packet drop");
                }
            }
        }
        info!("line channel closed, drop parser stopping");
        Ok(())
    }
}

/// `NAME=VALUE` 토큰에서 값을 찾습니다.
fn field_value<'a>(fields: &[&'a str], name: &str) -> Option<&'a str> {
    fields.iter().find_map(|token| match token.split_once('=') {
        Some((key, value)) if key == name => Some(value),
        _ => None,
    })
}

fn required<'a>(fields: &[&'a str], name: &'static str) -> Result<&'a str, LogPipelineError> {
    match field_value(fields, name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(LogPipelineError::MissingField { field: name }),
    }
}

fn numeric<T: std::str::FromStr>(
    fields: &[&str],
    name: &'static str,
) -> Result<T, LogPipelineError> {
    let value = required(fields, name)?;
    value.parse().map_err(|_| LogPipelineError::MalformedField {
        field: name,
        value: value.to_owned(),
    })
}
