//! Binance kline WebSocket 스트림.
//!
//! 피드 키마다 raw 스트림(`<ws_base>/<symbol>@kline_<interval>`)에 하나씩 연결합니다.

use async_trait::async_trait;
use futures::StreamExt;
use relay_core::{Candle, FeedKey};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};

use crate::config::BinanceConfig;
use crate::error::{ExchangeError, ExchangeResult};
use crate::traits::{KlineEvent, KlineSource, KlineStream};

// ============================================================================
// WebSocket 메시지 타입
// ============================================================================

/// Binance 캔들(kline) 스트림 이벤트.
#[derive(Debug, Deserialize)]
struct WsKlineEvent {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "E")]
    #[allow(dead_code)]
    event_time: i64,
    #[serde(rename = "s")]
    #[allow(dead_code)]
    symbol: String,
    #[serde(rename = "k")]
    kline: WsKline,
}

#[derive(Debug, Deserialize)]
struct WsKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "s")]
    #[allow(dead_code)]
    symbol: String,
    #[serde(rename = "i")]
    #[allow(dead_code)]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

// ============================================================================
// Binance kline 소스
// ============================================================================

/// Binance WebSocket kline 스트림 소스.
#[derive(Debug, Clone)]
pub struct BinanceKlineSource {
    config: BinanceConfig,
}

impl BinanceKlineSource {
    /// 새 kline 소스를 생성합니다.
    pub fn new(config: BinanceConfig) -> Self {
        Self { config }
    }

    /// 캔들(kline) 스트림 이름을 반환합니다.
    pub fn stream_name(key: &FeedKey) -> String {
        format!(
            "{}@kline_{}",
            key.symbol().to_lowercase(),
            key.interval().to_binance_interval()
        )
    }

    /// 피드 키의 raw 스트림 URL.
    pub fn stream_url(&self, key: &FeedKey) -> String {
        format!("{}/{}", self.config.ws_base_url(), Self::stream_name(key))
    }

    /// 문자열에서 소수점 숫자를 파싱합니다.
    fn parse_decimal(field: &str, s: &str) -> ExchangeResult<Decimal> {
        s.parse()
            .map_err(|e| ExchangeError::ParseError(format!("{} '{}': {}", field, s, e)))
    }

    /// WebSocket 텍스트 메시지를 KlineEvent로 파싱합니다.
    ///
    /// kline 이벤트가 아니면 `Ok(None)`을 반환합니다.
    pub fn parse_message(key: &FeedKey, text: &str) -> ExchangeResult<Option<KlineEvent>> {
        let event: WsKlineEvent = match serde_json::from_str(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(key = %key, error = %e, "Ignoring non-kline message");
                return Ok(None);
            }
        };
        if event.event_type != "kline" {
            return Ok(None);
        }

        let k = event.kline;
        let candle = Candle::new(
            key,
            k.open_time,
            k.close_time,
            Self::parse_decimal("open", &k.open)?,
            Self::parse_decimal("high", &k.high)?,
            Self::parse_decimal("low", &k.low)?,
            Self::parse_decimal("close", &k.close)?,
            Self::parse_decimal("volume", &k.volume)?,
        );

        Ok(Some(KlineEvent {
            candle,
            is_closed: k.is_closed,
        }))
    }
}

#[async_trait]
impl KlineSource for BinanceKlineSource {
    async fn connect(&self, key: &FeedKey) -> ExchangeResult<KlineStream> {
        let url = self.stream_url(key);
        info!(key = %key, url = %url, "Connecting to Binance kline stream");

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        info!(key = %key, "Connected to Binance kline stream");

        let key = key.clone();
        let events = ws_stream.filter_map(move |msg| {
            let key = key.clone();
            async move {
                match msg {
                    Ok(Message::Text(text)) => match Self::parse_message(&key, text.as_str()) {
                        Ok(event) => event.map(Ok),
                        Err(e) => {
                            warn!(key = %key, error = %e, "Dropping malformed kline");
                            None
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        info!(key = %key, frame = ?frame, "Kline stream closed by server");
                        Some(Err(ExchangeError::Disconnected(format!(
                            "{} closed by server",
                            key
                        ))))
                    }
                    // Ping에 대한 Pong은 tungstenite가 자동으로 처리함
                    Ok(_) => None,
                    Err(e) => Some(Err(ExchangeError::from(e))),
                }
            }
        });

        Ok(events.boxed())
    }
}
