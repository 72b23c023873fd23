//! 재시도 유틸리티.
//!
//! 실패한 비동기 작업을 지수 백오프로 다시 시도합니다.
//! 대기는 시도 사이에만 들어가므로, 기본 설정(3회, 1초 시작, 2배)에서는
//! 1초, 2초를 쉰 뒤 세 번째 시도가 실패하면 에러를 반환합니다.

use std::future::Future;
use std::time::Duration;

use relay_core::HistoryConfig;
use tracing::{debug, warn};

use crate::error::{ExchangeError, ExchangeResult};

/// 재시도 설정.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 최대 시도 횟수 (첫 시도 포함)
    pub max_attempts: u32,
    /// 첫 재시도 전 대기 시간
    pub initial_delay: Duration,
    /// 대기 시간 증가 배수
    pub multiplier: u32,
    /// 대기 시간 상한
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// 과거 데이터 조회 설정에서 생성.
    pub fn from_settings(settings: &HistoryConfig) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            ..Default::default()
        }
    }

    /// `attempt`번째 시도(1부터)가 실패한 뒤의 대기 시간.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// 모든 에러를 재시도합니다.
pub async fn with_retry<T, F, Fut>(config: &RetryConfig, operation: &str, op: F) -> ExchangeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExchangeResult<T>>,
{
    with_retry_if(config, operation, op, |_| true).await
}

/// `should_retry`가 참인 에러만 재시도합니다.
///
/// 마지막 시도의 에러를 그대로 반환합니다.
pub async fn with_retry_if<T, F, Fut, P>(
    config: &RetryConfig,
    operation: &str,
    mut op: F,
    should_retry: P,
) -> ExchangeResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExchangeResult<T>>,
    P: Fn(&ExchangeError) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Retry succeeded");
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                let delay = config.delay_after(attempt);
                warn!(
                    operation,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(operation, attempt, error = %e, "Giving up");
                return Err(e);
            }
        }
    }
}
