//! Binance 거래소 연결.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - KlineSource trait: 피드 키 하나에 대한 실시간 캔들 스트림
//! - Binance WebSocket kline 스트림 구현
//! - Binance REST 과거 캔들 조회 (재시도 포함)
//! - 거래소 에러 타입

pub mod config;
pub mod error;
pub mod historical;
pub mod retry;
pub mod stream;
pub mod traits;

pub use config::BinanceConfig;
pub use error::*;
pub use historical::BinanceRestClient;
pub use retry::{with_retry, with_retry_if, RetryConfig};
pub use stream::BinanceKlineSource;
pub use traits::*;
