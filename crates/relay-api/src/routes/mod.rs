//! API 라우트.
//!
//! 모든 REST 엔드포인트를 정의합니다.
//!
//! # 엔드포인트 목록
//!
//! ## 헬스 체크
//! - `GET /health` - 간단한 헬스 체크 (liveness)
//! - `GET /health/ready` - 상세 헬스 체크 (readiness)
//!
//! ## 시장 데이터
//! - `GET /api/v1/klines` - 과거 캔들 조회
//! - `GET /api/v1/symbols` - 지원 심볼 목록

pub mod health;
pub mod klines;
pub mod symbols;

pub use health::{health_router, ComponentHealth, ComponentStatus, HealthResponse};
pub use klines::{klines_router, KlinesParams};
pub use symbols::{supported_symbols, symbols_router, SymbolInfo};

use axum::Router;
use std::sync::Arc;

use crate::state::AppState;

/// 전체 API 라우터 생성.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/health", health_router())
        .nest("/api/v1/klines", klines_router())
        .nest("/api/v1/symbols", symbols_router())
}
