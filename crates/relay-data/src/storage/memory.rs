//! 메모리 캔들 저장소.
//!
//! 데이터베이스 URL이 설정되지 않았을 때와 테스트에서 사용합니다.
//! 프로세스가 종료되면 데이터는 사라집니다.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use relay_core::{Candle, FeedKey};
use tokio::sync::RwLock;
use tracing::debug;

use super::{CandleStore, KlineQuery};
use crate::error::Result;

/// 피드 키별 `open_time` 순서 맵으로 캔들을 보관하는 저장소.
#[derive(Debug, Default)]
pub struct InMemoryCandleStore {
    candles: RwLock<HashMap<FeedKey, BTreeMap<i64, Candle>>>,
}

impl InMemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 전체 캔들 수.
    pub async fn len(&self) -> usize {
        self.candles.read().await.values().map(BTreeMap::len).sum()
    }

    /// 비어 있는지 확인합니다.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CandleStore for InMemoryCandleStore {
    async fn store(&self, candle: &Candle) -> Result<()> {
        let mut candles = self.candles.write().await;
        candles
            .entry(candle.key())
            .or_default()
            .insert(candle.open_time, candle.clone());
        Ok(())
    }

    async fn store_batch(&self, batch: &[Candle]) -> Result<usize> {
        let mut candles = self.candles.write().await;
        for candle in batch {
            candles
                .entry(candle.key())
                .or_default()
                .insert(candle.open_time, candle.clone());
        }
        debug!(count = batch.len(), "Stored klines in memory");
        Ok(batch.len())
    }

    async fn retrieve(&self, query: &KlineQuery) -> Result<Vec<Candle>> {
        let candles = self.candles.read().await;
        let Some(series) = candles.get(&query.key) else {
            return Ok(Vec::new());
        };

        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        Ok(series
            .values()
            .rev()
            .filter(|c| query.contains(c.open_time))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn key() -> FeedKey {
        FeedKey::new("BTCUSDT", "1m").unwrap()
    }

    fn candle(open_time: i64, close: rust_decimal::Decimal) -> Candle {
        Candle::new(
            &key(),
            open_time,
            open_time + 59_999,
            dec!(100),
            dec!(110),
            dec!(90),
            close,
            dec!(1),
        )
    }

    #[tokio::test]
    async fn test_store_upserts_on_open_time() {
        let store = InMemoryCandleStore::new();
        store.store(&candle(0, dec!(100))).await.unwrap();
        store.store(&candle(0, dec!(105))).await.unwrap();

        assert_eq!(store.len().await, 1);
        let rows = store.retrieve(&KlineQuery::new(key())).await.unwrap();
        assert_eq!(rows[0].close, dec!(105));
    }

    #[tokio::test]
    async fn test_retrieve_newest_first_with_range_and_limit() {
        let store = InMemoryCandleStore::new();
        let batch: Vec<Candle> = (0..5).map(|i| candle(i * 60_000, dec!(100))).collect();
        assert_eq!(store.store_batch(&batch).await.unwrap(), 5);

        let query = KlineQuery::new(key())
            .with_range(Some(60_000), Some(240_000))
            .with_limit(3);
        let rows = store.retrieve(&query).await.unwrap();
        let times: Vec<i64> = rows.iter().map(|c| c.open_time).collect();

        assert_eq!(times, vec![240_000, 180_000, 120_000]);
    }

    #[tokio::test]
    async fn test_retrieve_unknown_key_is_empty() {
        let store = InMemoryCandleStore::new();
        let other = FeedKey::new("ETHUSDT", "1h").unwrap();
        assert!(store.retrieve(&KlineQuery::new(other)).await.unwrap().is_empty());
        assert!(store.is_empty().await);
    }
}
