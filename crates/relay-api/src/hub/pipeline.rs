//! 마감 캔들 처리 경로: 저장(비동기, 실패 무시) 후 팬아웃.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{Candle, FeedKey};
use relay_data::CandleStore;
use tracing::{error, warn};

use super::fanout::FanoutEngine;
use super::messages::ServerMessage;
use super::multiplexer::CandleHandler;
use super::registry::SharedSubscriptionTable;
use crate::metrics::record_persist_failure;

/// 멀티플렉서가 넘긴 캔들을 저장소와 팬아웃 엔진으로 보냅니다.
pub struct FeedPipeline {
    store: Arc<dyn CandleStore>,
    fanout: FanoutEngine,
    table: SharedSubscriptionTable,
}

impl FeedPipeline {
    pub fn new(
        store: Arc<dyn CandleStore>,
        fanout: FanoutEngine,
        table: SharedSubscriptionTable,
    ) -> Self {
        Self {
            store,
            fanout,
            table,
        }
    }
}

#[async_trait]
impl CandleHandler for FeedPipeline {
    async fn on_candle(&self, key: &FeedKey, candle: Candle) {
        let store = self.store.clone();
        let persisted = candle.clone();
        tokio::spawn(async move {
            if let Err(e) = store.store(&persisted).await {
                warn!(
                    key = %persisted.key(),
                    open_time = persisted.open_time,
                    error = %e,
                    "Failed to persist candle"
                );
                record_persist_failure();
            }
        });

        self.fanout.deliver(key, &candle).await;
    }

    async fn on_feed_terminated(&self, key: &FeedKey, generation: u64) {
        let message = ServerMessage::error(format!("Upstream feed for {} terminated", key));
        match message.to_frame() {
            Ok(frame) => {
                let notified = self.fanout.notify(key, frame).await;
                warn!(key = %key, generation, notified, "Upstream feed terminated");
            }
            Err(e) => error!(key = %key, error = %e, "Failed to serialize termination notice"),
        }

        self.table.lock().await.retire_feed(key, generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::connection::Connection;
    use crate::hub::multiplexer::testing::ScriptedSource;
    use crate::hub::multiplexer::{FeedMultiplexer, ReconnectPolicy};
    use crate::hub::registry::{SubscriptionRegistry, SubscriptionTable};
    use relay_data::{DataError, InMemoryCandleStore, KlineQuery};
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use std::time::Duration;

    struct FailingStore;

    #[async_trait]
    impl CandleStore for FailingStore {
        async fn store(&self, _candle: &Candle) -> relay_data::Result<()> {
            Err(DataError::ConnectionError("database unavailable".to_string()))
        }

        async fn store_batch(&self, _candles: &[Candle]) -> relay_data::Result<usize> {
            Err(DataError::ConnectionError("database unavailable".to_string()))
        }

        async fn retrieve(&self, _query: &KlineQuery) -> relay_data::Result<Vec<Candle>> {
            Ok(Vec::new())
        }
    }

    fn key() -> FeedKey {
        FeedKey::new("BTCUSDT", "1m").unwrap()
    }

    fn candle() -> Candle {
        Candle::new(
            &key(),
            0,
            59_999,
            dec!(50000),
            dec!(50000),
            dec!(50000),
            dec!(50000),
            dec!(1),
        )
    }

    struct Fixture {
        pipeline: FeedPipeline,
        registry: SubscriptionRegistry,
        _conn: Arc<Connection>,
        rx: tokio::sync::mpsc::Receiver<crate::hub::Frame>,
    }

    async fn subscribed_pipeline(store: Arc<dyn CandleStore>) -> Fixture {
        let table = SubscriptionTable::shared();
        let fanout = FanoutEngine::new(table.clone(), Duration::from_secs(1));
        let registry = SubscriptionRegistry::new(
            table.clone(),
            Arc::new(FeedMultiplexer::new(
                Arc::new(ScriptedSource::default()),
                ReconnectPolicy {
                    initial_delay: Duration::from_secs(3600),
                    ..Default::default()
                },
            )),
            Arc::new(FeedPipeline::new(store.clone(), fanout.clone(), table.clone())),
        );
        let (conn, mut rx) = Connection::new(8);
        registry.subscribe(&conn, key()).await.unwrap();
        rx.recv().await.unwrap();
        Fixture {
            pipeline: FeedPipeline::new(store, fanout, table),
            registry,
            _conn: conn,
            rx,
        }
    }

    #[tokio::test]
    async fn test_candle_is_persisted_and_delivered() {
        let store = Arc::new(InMemoryCandleStore::new());
        let mut fx = subscribed_pipeline(store.clone()).await;

        fx.pipeline.on_candle(&key(), candle()).await;

        let value: Value = serde_json::from_str(&fx.rx.recv().await.unwrap()).unwrap();
        assert_eq!(value["type"], "kline_update");

        for _ in 0..10 {
            if !store.is_empty().await {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_persist_failure_does_not_block_delivery() {
        let mut fx = subscribed_pipeline(Arc::new(FailingStore)).await;

        fx.pipeline.on_candle(&key(), candle()).await;

        let value: Value = serde_json::from_str(&fx.rx.recv().await.unwrap()).unwrap();
        assert_eq!(value["data"]["close"], "50000.00000000");
    }

    #[tokio::test]
    async fn test_termination_notice_reaches_subscribers() {
        let mut fx = subscribed_pipeline(Arc::new(InMemoryCandleStore::new())).await;
        let generation = fx.registry.feed_generation(&key()).await.unwrap();

        fx.pipeline.on_feed_terminated(&key(), generation).await;

        let value: Value = serde_json::from_str(&fx.rx.recv().await.unwrap()).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "Upstream feed for BTCUSDT:1m terminated");
    }

    #[tokio::test]
    async fn test_terminated_feed_is_no_longer_counted() {
        let fx = subscribed_pipeline(Arc::new(InMemoryCandleStore::new())).await;
        let generation = fx.registry.feed_generation(&key()).await.unwrap();
        assert_eq!(fx.registry.feed_count().await, 1);

        fx.pipeline.on_feed_terminated(&key(), generation).await;

        assert_eq!(fx.registry.feed_count().await, 0);
        assert!(!fx.registry.has_feed(&key()).await);
        assert_eq!(fx.registry.subscribers(&key()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_termination_keeps_newer_feed() {
        let fx = subscribed_pipeline(Arc::new(InMemoryCandleStore::new())).await;
        let generation = fx.registry.feed_generation(&key()).await.unwrap();

        fx.pipeline.on_feed_terminated(&key(), generation + 1).await;

        assert_eq!(fx.registry.feed_generation(&key()).await, Some(generation));
    }
}
