//! 거래소 기능 trait.
//!
//! 허브는 구체적인 거래소 구현 대신 이 trait들에 의존합니다.
//! 테스트에서는 합성 스트림으로 대체할 수 있습니다.

use async_trait::async_trait;
use futures::stream::BoxStream;
use relay_core::{Candle, FeedKey};

use crate::error::ExchangeResult;

/// 업스트림에서 받은 캔들 하나.
#[derive(Debug, Clone, PartialEq)]
pub struct KlineEvent {
    /// 캔들 값 (진행 중일 수 있음)
    pub candle: Candle,
    /// 캔들 마감 여부
    pub is_closed: bool,
}

/// 피드 키 하나에 대한 캔들 이벤트 스트림.
///
/// `Err` 항목이나 스트림 종료는 연결이 끊겼음을 뜻합니다.
pub type KlineStream = BoxStream<'static, ExchangeResult<KlineEvent>>;

/// 실시간 캔들 스트림 제공자.
#[async_trait]
pub trait KlineSource: Send + Sync {
    /// 피드 키에 대한 업스트림 연결을 엽니다.
    async fn connect(&self, key: &FeedKey) -> ExchangeResult<KlineStream>;
}

/// 과거 캔들 조회 제공자.
#[async_trait]
pub trait HistoricalKlineProvider: Send + Sync {
    /// 구간 내 캔들을 오래된 순서로 반환합니다.
    ///
    /// `limit`이 없으면 거래소 기본값(1000)을 사용합니다.
    async fn fetch_range(
        &self,
        key: &FeedKey,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> ExchangeResult<Vec<Candle>>;
}
