//! Prometheus 메트릭 설정 및 유틸리티.
//!
//! HTTP 요청 메트릭과 허브 메트릭을 수집하고 `/metrics` 엔드포인트로 노출합니다.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use relay_core::FeedKey;

/// Prometheus 메트릭 레코더를 설정하고 핸들을 반환합니다.
///
/// # 반환값
///
/// `/metrics` 엔드포인트에서 메트릭을 렌더링하기 위한 `PrometheusHandle`
///
/// # Errors
///
/// 레코더가 이미 설치되어 있으면 에러를 반환합니다.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        // HTTP 요청 지속 시간 히스토그램 버킷 설정
        .set_buckets_for_metric(
            Matcher::Full("http_request_duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )?
        .install_recorder()
}

// ============================================================================
// HTTP 메트릭 헬퍼 함수
// ============================================================================

/// HTTP 요청 카운터 증가.
pub fn record_http_request(method: &str, path: &str) {
    counter!("http_requests_total", "method" => method.to_string(), "path" => path.to_string())
        .increment(1);
}

/// HTTP 응답 카운터 증가.
pub fn record_http_response(method: &str, path: &str, status: u16) {
    counter!(
        "http_responses_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// HTTP 요청 지속 시간 기록.
pub fn record_http_duration(method: &str, path: &str, duration_secs: f64) {
    histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_secs);
}

// ============================================================================
// 허브 메트릭 헬퍼 함수
// ============================================================================

/// WebSocket 연결 수 설정.
pub fn set_ws_connections(count: usize) {
    gauge!("relay_ws_connections_active").set(count as f64);
}

/// 활성 업스트림 피드 수 설정.
pub fn set_feeds_active(count: usize) {
    gauge!("relay_feeds_active").set(count as f64);
}

/// 업스트림에서 받은 마감 캔들 카운터 증가.
pub fn record_candle_received(key: &FeedKey) {
    counter!("relay_candles_received_total", "key" => key.to_string()).increment(1);
}

/// 업스트림 재연결 카운터 증가.
pub fn record_feed_reconnect(key: &FeedKey) {
    counter!("relay_feed_reconnects_total", "key" => key.to_string()).increment(1);
}

/// 팬아웃 결과 기록.
pub fn record_fanout(delivered: u64, throttled: u64, dropped: u64) {
    if delivered > 0 {
        counter!("relay_fanout_delivered_total").increment(delivered);
    }
    if throttled > 0 {
        counter!("relay_fanout_throttled_total").increment(throttled);
    }
    if dropped > 0 {
        counter!("relay_fanout_dropped_total").increment(dropped);
    }
}

/// 브로드캐스트 중 큐가 가득 차 제거된 연결 카운터 증가.
pub fn record_broadcast_eviction() {
    counter!("relay_broadcast_evictions_total").increment(1);
}

/// 캔들 저장 실패 카운터 증가.
pub fn record_persist_failure() {
    counter!("relay_persist_failures_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn test_helpers_render_with_local_recorder() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let key = FeedKey::new("BTCUSDT", "1m").unwrap();
            set_ws_connections(3);
            set_feeds_active(1);
            record_candle_received(&key);
            record_fanout(2, 1, 0);
            record_http_request("GET", "/health");
        });

        let rendered = handle.render();
        assert!(rendered.contains("relay_ws_connections_active 3"));
        assert!(rendered.contains("relay_feeds_active 1"));
        assert!(rendered.contains("relay_candles_received_total{key=\"BTCUSDT:1m\"} 1"));
        assert!(rendered.contains("relay_fanout_delivered_total 2"));
        assert!(!rendered.contains("relay_fanout_dropped_total"));
        assert!(rendered.contains("http_requests_total"));
    }
}
