//! 실시간 캔들 릴레이 서버.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 구독 기반 WebSocket 팬아웃 허브 (키당 업스트림 하나)
//! - 과거 캔들 조회 REST API
//! - 헬스 체크 엔드포인트
//! - Prometheus 메트릭
//!
//! # 모듈 구성
//!
//! - [`hub`]: 연결 관리, 구독 레지스트리, 업스트림 멀티플렉서, 팬아웃
//! - [`routes`]: REST API 엔드포인트
//! - [`state`]: 애플리케이션 공유 상태 (AppState)
//! - [`server`]: 라우터 조립과 종료 시그널
//! - [`metrics`]: Prometheus 메트릭 수집
//! - [`middleware`]: HTTP 미들웨어

pub mod error;
pub mod hub;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ApiResponse, ApiResult};
pub use hub::{HubHandle, HubServices, SubscriptionRegistry, WsState};
pub use metrics::setup_metrics_recorder;
pub use middleware::metrics_layer;
pub use server::{create_router, shutdown_signal};
pub use state::AppState;
