//! 과거 캔들 조회 endpoint.
//!
//! 저장소에서 최신순으로 조회하고, 비어 있으면 거래소에서 가져와 저장한 뒤 반환합니다.

use std::cmp::Reverse;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use relay_core::{Candle, FeedKey, Timeframe};
use relay_data::KlineQuery;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{api_error, bad_request, ApiResult, ApiResponse};
use crate::hub::KlineData;
use crate::state::AppState;

/// 쿼리 파라미터 원본. 검증은 순서대로 [`KlinesParams::validate`]에서 합니다.
#[derive(Debug, Default, Deserialize)]
pub struct KlinesParams {
    pub symbol: Option<String>,
    pub interval: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub limit: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl KlinesParams {
    /// 파라미터를 검증하고 저장소 조회 조건으로 변환합니다.
    pub fn validate(&self, default_limit: u32) -> Result<KlineQuery, String> {
        let symbol = non_empty(&self.symbol).ok_or("symbol parameter is required")?;
        let interval = non_empty(&self.interval).ok_or("interval parameter is required")?;

        let start_time = non_empty(&self.start_time)
            .map(|v| v.parse::<i64>())
            .transpose()
            .map_err(|_| "invalid start_time parameter")?;
        let end_time = non_empty(&self.end_time)
            .map(|v| v.parse::<i64>())
            .transpose()
            .map_err(|_| "invalid end_time parameter")?;

        let limit = match non_empty(&self.limit) {
            Some(v) => v
                .parse::<u32>()
                .ok()
                .filter(|limit| *limit > 0)
                .ok_or("invalid limit parameter")?,
            None => default_limit,
        };

        let interval = interval
            .parse::<Timeframe>()
            .map_err(|_| "invalid interval parameter")?;
        let key = FeedKey::from_parts(symbol, interval).map_err(|_| "invalid symbol parameter")?;

        Ok(KlineQuery::new(key)
            .with_range(start_time, end_time)
            .with_limit(limit))
    }
}

/// 캔들 조회.
///
/// GET /api/v1/klines?symbol=BTCUSDT&interval=1m&start_time=&end_time=&limit=
pub async fn get_klines(
    State(state): State<Arc<AppState>>,
    Query(params): Query<KlinesParams>,
) -> ApiResult<Json<ApiResponse<Vec<KlineData>>>> {
    let query = params
        .validate(state.history_settings.default_limit)
        .map_err(bad_request)?;

    let mut candles = state.store.retrieve(&query).await.map_err(|e| {
        api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to query klines: {}", e),
        )
    })?;

    if candles.is_empty() && state.history_settings.fallback_to_exchange {
        if let Some(provider) = &state.history {
            debug!(key = %query.key, "Store is empty, fetching from exchange");
            let fetched = provider
                .fetch_range(&query.key, query.start_time, query.end_time, query.limit)
                .await
                .map_err(|e| {
                    api_error(
                        StatusCode::BAD_GATEWAY,
                        format!("failed to fetch klines: {}", e),
                    )
                })?;
            candles = persist_fetched(&state, &query, fetched).await;
        }
    }

    let data = candles.iter().map(KlineData::from).collect();
    Ok(Json(ApiResponse::success(data)))
}

/// 거래소에서 가져온 캔들을 저장하고(실패 무시) 저장소와 같은 순서로 맞춥니다.
async fn persist_fetched(state: &AppState, query: &KlineQuery, mut candles: Vec<Candle>) -> Vec<Candle> {
    if !candles.is_empty() {
        if let Err(e) = state.store.store_batch(&candles).await {
            warn!(key = %query.key, error = %e, "Failed to persist fetched klines");
        }
    }

    candles.retain(|c| query.contains(c.open_time));
    candles.sort_by_key(|c| Reverse(c.open_time));
    if let Some(limit) = query.limit {
        candles.truncate(limit as usize);
    }
    candles
}

/// 캔들 라우터 생성.
pub fn klines_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_klines))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::create_test_state;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use relay_exchange::{ExchangeError, ExchangeResult, HistoricalKlineProvider};
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use tower::ServiceExt;

    fn params(query: &str) -> KlinesParams {
        let mut params = KlinesParams::default();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap();
            let value = Some(value.to_string());
            match name {
                "symbol" => params.symbol = value,
                "interval" => params.interval = value,
                "start_time" => params.start_time = value,
                "end_time" => params.end_time = value,
                "limit" => params.limit = value,
                _ => unreachable!(),
            }
        }
        params
    }

    fn candle(open_time: i64) -> Candle {
        let key = FeedKey::new("BTCUSDT", "1m").unwrap();
        Candle::new(
            &key,
            open_time,
            open_time + 59_999,
            dec!(50000),
            dec!(50100),
            dec!(49900),
            dec!(50050),
            dec!(2),
        )
    }

    struct FixedHistory(Vec<Candle>);

    #[async_trait]
    impl HistoricalKlineProvider for FixedHistory {
        async fn fetch_range(
            &self,
            _key: &FeedKey,
            _start_time: Option<i64>,
            _end_time: Option<i64>,
            _limit: Option<u32>,
        ) -> ExchangeResult<Vec<Candle>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenHistory;

    #[async_trait]
    impl HistoricalKlineProvider for BrokenHistory {
        async fn fetch_range(
            &self,
            _key: &FeedKey,
            _start_time: Option<i64>,
            _end_time: Option<i64>,
            _limit: Option<u32>,
        ) -> ExchangeResult<Vec<Candle>> {
            Err(ExchangeError::NetworkError("unreachable".to_string()))
        }
    }

    async fn call(state: AppState, uri: &str) -> (StatusCode, Value) {
        let app = Router::new()
            .nest("/api/v1/klines", klines_router())
            .with_state(Arc::new(state));
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn test_validation_order_and_messages() {
        let cases = [
            ("", "symbol parameter is required"),
            ("interval=1m", "symbol parameter is required"),
            ("symbol=BTCUSDT", "interval parameter is required"),
            ("symbol=BTCUSDT&interval=1m&start_time=abc", "invalid start_time parameter"),
            ("symbol=BTCUSDT&interval=1m&end_time=1.5", "invalid end_time parameter"),
            ("symbol=BTCUSDT&interval=1m&limit=0", "invalid limit parameter"),
            ("symbol=BTCUSDT&interval=1m&limit=-5", "invalid limit parameter"),
            ("symbol=BTCUSDT&interval=7m", "invalid interval parameter"),
            ("symbol=BTC-USDT&interval=1m", "invalid symbol parameter"),
        ];
        for (query, expected) in cases {
            assert_eq!(params(query).validate(1000).unwrap_err(), expected, "{query}");
        }
    }

    #[test]
    fn test_validation_defaults() {
        let query = params("symbol=btcusdt&interval=1h").validate(500).unwrap();
        assert_eq!(query.key.symbol(), "BTCUSDT");
        assert_eq!(query.limit, Some(500));
        assert_eq!(query.start_time, None);

        let query = params("symbol=BTCUSDT&interval=1m&start_time=10&end_time=20&limit=5")
            .validate(1000)
            .unwrap();
        assert_eq!((query.start_time, query.end_time, query.limit), (Some(10), Some(20), Some(5)));
    }

    #[tokio::test]
    async fn test_get_klines_returns_newest_first() {
        let state = create_test_state();
        state
            .store
            .store_batch(&[candle(0), candle(60_000), candle(120_000)])
            .await
            .unwrap();

        let (status, body) = call(state, "/api/v1/klines?symbol=BTCUSDT&interval=1m&limit=2").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 200);
        assert_eq!(body["message"], "success");
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["open_time"], 120_000);
        assert_eq!(data[1]["open_time"], 60_000);
        assert_eq!(data[0]["open"], "50000.00000000");
    }

    #[tokio::test]
    async fn test_get_klines_bad_request_envelope() {
        let (status, body) = call(create_test_state(), "/api/v1/klines?interval=1m").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], 400);
        assert_eq!(body["message"], "symbol parameter is required");
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn test_empty_store_falls_back_to_exchange() {
        let base = create_test_state();
        let store = base.store.clone();
        let state = base.with_history(
            Arc::new(FixedHistory(vec![candle(0), candle(60_000), candle(120_000)])),
            Default::default(),
        );

        let (status, body) = call(state, "/api/v1/klines?symbol=BTCUSDT&interval=1m&limit=2").await;

        assert_eq!(status, StatusCode::OK);
        let data = body["data"].as_array().unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data[0]["open_time"], 120_000);

        let stored = store
            .retrieve(&KlineQuery::new(FeedKey::new("BTCUSDT", "1m").unwrap()))
            .await
            .unwrap();
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn test_exchange_failure_is_bad_gateway() {
        let state = create_test_state().with_history(Arc::new(BrokenHistory), Default::default());

        let (status, body) = call(state, "/api/v1/klines?symbol=BTCUSDT&interval=1m").await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .starts_with("failed to fetch klines:"));
    }

    #[tokio::test]
    async fn test_empty_store_without_history_returns_empty_list() {
        let (status, body) =
            call(create_test_state(), "/api/v1/klines?symbol=ETHUSDT&interval=5m").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], serde_json::json!([]));
    }
}
