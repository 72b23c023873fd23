//! tracing 기반 로깅 초기화.
//!
//! 출력 형식은 `pretty`(개발), `json`(로그 수집), `compact` 중 하나이며
//! 필터는 `RUST_LOG`가 설정 파일의 `logging.level`보다 우선합니다.

use tracing::Subscriber;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::LoggingConfig;

/// `RUST_LOG`와 설정이 모두 없을 때의 필터.
pub const DEFAULT_LOG_FILTER: &str = "relay_api=info,relay_exchange=info,relay_data=info,tower_http=debug";

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            other => Err(format!("Unknown log format: {}", other)),
        }
    }
}

/// 로깅 초기화 옵션.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` 지시문 (예: "relay_api=debug,info")
    pub filter: String,
    pub format: LogFormat,
    /// 이벤트에 소스 파일과 줄 번호를 붙일지 여부
    pub with_location: bool,
}

impl LogConfig {
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            format: LogFormat::default(),
            with_location: false,
        }
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_location(mut self, enabled: bool) -> Self {
        self.with_location = enabled;
        self
    }

    /// 형식에 맞는 fmt 레이어. 형식마다 타입이 달라 박싱합니다.
    fn fmt_layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let base = fmt::layer()
            .with_file(self.with_location)
            .with_line_number(self.with_location);

        match self.format {
            LogFormat::Pretty => base.pretty().boxed(),
            LogFormat::Json => base.json().with_current_span(true).boxed(),
            LogFormat::Compact => base.compact().boxed(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_FILTER)
    }
}

impl From<&LoggingConfig> for LogConfig {
    /// 알 수 없는 형식은 `pretty`로 처리합니다.
    fn from(settings: &LoggingConfig) -> Self {
        LogConfig::new(settings.level.clone())
            .with_format(settings.format.parse().unwrap_or_default())
            .with_location(settings.with_location)
    }
}

/// 전역 subscriber를 설치합니다. 두 번째 호출은 에러를 반환합니다.
///
/// ```no_run
/// use relay_core::logging::{init_logging, LogConfig, LogFormat};
///
/// init_logging(LogConfig::new("debug").with_format(LogFormat::Json)).unwrap();
/// ```
pub fn init_logging(config: LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.filter))?;

    tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(filter)
        .try_init()?;

    tracing::info!(format = ?config.format, filter = %config.filter, "Logging initialized");
    Ok(())
}

/// 업스트림 피드 태스크용 span. `key`는 `Display`로 기록됩니다.
#[macro_export]
macro_rules! feed_span {
    ($name:expr, $key:expr, $generation:expr) => {
        tracing::info_span!($name, key = %$key, generation = $generation)
    };
}
