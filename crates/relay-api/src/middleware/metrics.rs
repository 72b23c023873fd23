//! HTTP 요청 metrics middleware.
//!
//! 모든 HTTP 요청에 대해 메트릭을 수집합니다.

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use crate::metrics::{record_http_duration, record_http_request, record_http_response};

/// 매칭되지 않은 경로의 라벨. 임의 경로로 라벨 수가 늘어나지 않도록 묶습니다.
const UNMATCHED_PATH: &str = "unmatched";

/// 메트릭 라벨로 쓸 경로. 라우트 패턴을 사용합니다.
fn route_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_PATH.to_string())
}

/// HTTP 메트릭을 수집하는 미들웨어 레이어.
///
/// 각 요청에 대해 다음 메트릭을 기록합니다:
/// - `http_requests_total`: 총 요청 수 (method, path 라벨)
/// - `http_responses_total`: 총 응답 수 (method, path, status 라벨)
/// - `http_request_duration_seconds`: 요청 처리 시간 히스토그램
pub async fn metrics_layer(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().to_string();
    let path = route_label(&request);

    record_http_request(&method, &path);

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration = start.elapsed().as_secs_f64();

    record_http_response(&method, &path, status);
    record_http_duration(&method, &path, duration);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        middleware,
        routing::get,
        Router,
    };
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    async fn test_handler() -> &'static str {
        "OK"
    }

    fn app() -> Router {
        Router::new()
            .route("/items/{id}", get(test_handler))
            .layer(middleware::from_fn(metrics_layer))
    }

    #[tokio::test]
    async fn test_metrics_middleware() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/items/42")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_route_pattern_is_used_as_label() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        metrics::with_local_recorder(&recorder, || {
            runtime.block_on(async {
                for uri in ["/items/1", "/items/2"] {
                    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
                    app().oneshot(request).await.unwrap();
                }
            })
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"path="/items/{id}""#));
        assert!(rendered.contains(r#"http_requests_total{method="GET",path="/items/{id}"} 2"#));
        assert!(!rendered.contains("/items/1"));
    }
}
