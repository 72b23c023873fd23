//! Binance REST 과거 캔들 조회.
//!
//! `GET /api/v3/klines`를 재시도와 함께 호출합니다.
//! 2xx가 아닌 응답은 전송 에러와 같이 재시도하고, 2xx 본문의 파싱 실패는 재시도하지 않습니다.

use std::time::Duration;

use async_trait::async_trait;
use relay_core::{Candle, FeedKey};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::BinanceConfig;
use crate::error::{ExchangeError, ExchangeResult};
use crate::retry::{with_retry_if, RetryConfig};
use crate::traits::HistoricalKlineProvider;

/// Binance가 허용하는 한 번의 요청당 최대 개수이자 기본값.
pub const DEFAULT_KLINE_LIMIT: u32 = 1000;

/// kline 행의 최소 필드 수 (open_time ~ close_time).
const MIN_ROW_FIELDS: usize = 7;

#[derive(Debug, Deserialize)]
struct BinanceError {
    code: i32,
    msg: String,
}

/// Binance REST 클라이언트 (공개 시장 데이터 전용).
#[derive(Debug, Clone)]
pub struct BinanceRestClient {
    config: BinanceConfig,
    client: Client,
    retry: RetryConfig,
}

impl BinanceRestClient {
    /// 새 REST 클라이언트 생성.
    ///
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `ExchangeError::NetworkError`를 반환합니다.
    pub fn new(config: BinanceConfig) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExchangeError::NetworkError(format!("HTTP 클라이언트 생성 실패: {}", e)))?;

        Ok(Self {
            config,
            client,
            retry: RetryConfig::default(),
        })
    }

    /// 재시도 정책을 설정합니다.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 구간 내 캔들을 조회합니다. 실패 시 설정된 횟수만큼 재시도합니다.
    pub async fn fetch_range(
        &self,
        key: &FeedKey,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> ExchangeResult<Vec<Candle>> {
        let mut params = vec![
            ("symbol", key.symbol().to_string()),
            ("interval", key.interval().to_binance_interval().to_string()),
        ];
        if let Some(start) = start_time {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = end_time {
            params.push(("endTime", end.to_string()));
        }
        params.push(("limit", limit.unwrap_or(DEFAULT_KLINE_LIMIT).to_string()));

        let rows = with_retry_if(
            &self.retry,
            "binance_klines",
            || self.get_klines_once(&params),
            ExchangeError::is_retryable,
        )
        .await?;

        Ok(Self::rows_to_candles(key, rows))
    }

    /// 한 번의 `/api/v3/klines` 요청.
    async fn get_klines_once(&self, params: &[(&str, String)]) -> ExchangeResult<Vec<Vec<Value>>> {
        let url = format!("{}/api/v3/klines", self.config.rest_base_url());
        debug!(url = %url, "GET klines");

        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| ExchangeError::NetworkError(e.to_string()))?;

        Self::handle_response(response).await
    }

    async fn handle_response<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> ExchangeResult<T> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::NetworkError(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                warn!(error = %e, body = %body, "Failed to parse klines response");
                ExchangeError::ParseError(e.to_string())
            });
        }

        if status.as_u16() == 429 {
            return Err(ExchangeError::RateLimited);
        }

        // 에러 응답 파싱 시도
        match serde_json::from_str::<BinanceError>(&body) {
            Ok(error) if error.code == -1003 => Err(ExchangeError::RateLimited),
            Ok(error) => Err(ExchangeError::ApiError {
                code: error.code,
                message: error.msg,
            }),
            Err(_) => Err(ExchangeError::ApiError {
                code: status.as_u16() as i32,
                message: body,
            }),
        }
    }

    /// `[open_time, open, high, low, close, volume, close_time, ...]` 행들을 캔들로 변환합니다.
    ///
    /// 형식이 맞지 않는 행은 경고 후 건너뜁니다.
    fn rows_to_candles(key: &FeedKey, rows: Vec<Vec<Value>>) -> Vec<Candle> {
        let total = rows.len();
        let candles: Vec<Candle> = rows
            .iter()
            .filter_map(|row| match Self::parse_row(key, row) {
                Some(candle) => Some(candle),
                None => {
                    warn!(key = %key, row = ?row, "Skipping malformed kline row");
                    None
                }
            })
            .collect();

        debug!(key = %key, total, parsed = candles.len(), "Fetched historical klines");
        candles
    }

    fn parse_row(key: &FeedKey, row: &[Value]) -> Option<Candle> {
        if row.len() < MIN_ROW_FIELDS {
            return None;
        }

        let decimal = |v: &Value| -> Option<Decimal> {
            match v {
                Value::String(s) => s.parse().ok(),
                Value::Number(n) => n.to_string().parse().ok(),
                _ => None,
            }
        };

        Some(Candle::new(
            key,
            row[0].as_i64()?,
            row[6].as_i64()?,
            decimal(&row[1])?,
            decimal(&row[2])?,
            decimal(&row[3])?,
            decimal(&row[4])?,
            decimal(&row[5])?,
        ))
    }
}

#[async_trait]
impl HistoricalKlineProvider for BinanceRestClient {
    async fn fetch_range(
        &self,
        key: &FeedKey,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> ExchangeResult<Vec<Candle>> {
        BinanceRestClient::fetch_range(self, key, start_time, end_time, limit).await
    }
}
