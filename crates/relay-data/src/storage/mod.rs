//! 캔들 저장소.
//!
//! 마감된 캔들은 `(symbol, interval, open_time)` 기준으로 upsert되며,
//! 조회는 항상 최신 캔들부터(`open_time` 내림차순) 반환합니다.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use relay_core::{Candle, FeedKey};

use crate::error::Result;

/// 배치 upsert의 청크 크기.
pub const BATCH_CHUNK_SIZE: usize = 1000;

/// 캔들 조회 조건.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineQuery {
    /// 대상 피드 키
    pub key: FeedKey,
    /// 시작 시간 (ms, 포함)
    pub start_time: Option<i64>,
    /// 종료 시간 (ms, 포함)
    pub end_time: Option<i64>,
    /// 최대 개수 (없으면 제한 없음)
    pub limit: Option<u32>,
}

impl KlineQuery {
    /// 키에 대한 전체 조회 조건을 생성합니다.
    pub fn new(key: FeedKey) -> Self {
        Self {
            key,
            start_time: None,
            end_time: None,
            limit: None,
        }
    }

    /// 시간 구간을 설정합니다.
    pub fn with_range(mut self, start_time: Option<i64>, end_time: Option<i64>) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    /// 최대 개수를 설정합니다.
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// `open_time`이 조회 구간에 포함되는지 확인합니다.
    pub fn contains(&self, open_time: i64) -> bool {
        self.start_time.map_or(true, |start| open_time >= start)
            && self.end_time.map_or(true, |end| open_time <= end)
    }
}

/// 캔들 영속화 인터페이스.
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// 캔들 하나를 upsert합니다.
    async fn store(&self, candle: &Candle) -> Result<()>;

    /// 여러 캔들을 upsert하고 반영된 행 수를 반환합니다.
    async fn store_batch(&self, candles: &[Candle]) -> Result<usize>;

    /// 조건에 맞는 캔들을 최신순으로 조회합니다.
    async fn retrieve(&self, query: &KlineQuery) -> Result<Vec<Candle>>;

    /// 저장소 상태 확인. 메모리 저장소는 항상 정상입니다.
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
