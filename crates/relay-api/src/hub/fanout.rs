//! 팬아웃 엔진.
//!
//! 마감된 캔들을 키의 모든 구독자 큐에 넣습니다. (연결, 키) 쌍마다 스로틀 창 안의
//! 업데이트는 버리고, 큐가 가득 찬 구독자는 그 메시지만 건너뜁니다.

use std::time::Duration;

use relay_core::{Candle, FeedKey};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, error};

use super::connection::Frame;
use super::messages::ServerMessage;
use super::registry::SharedSubscriptionTable;
use crate::metrics::record_fanout;

/// `deliver` 한 번의 결과.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    /// 큐에 들어간 수
    pub delivered: u64,
    /// 스로틀 창 안이라 버린 수
    pub throttled: u64,
    /// 큐가 가득 차 버린 수
    pub dropped: u64,
}

/// 팬아웃 엔진.
#[derive(Clone)]
pub struct FanoutEngine {
    table: SharedSubscriptionTable,
    throttle: Duration,
}

impl FanoutEngine {
    pub fn new(table: SharedSubscriptionTable, throttle: Duration) -> Self {
        Self { table, throttle }
    }

    /// 캔들을 키의 구독자에게 전달합니다.
    pub async fn deliver(&self, key: &FeedKey, candle: &Candle) -> DeliveryStats {
        let mut stats = DeliveryStats::default();

        let subscribers = self.table.lock().await.subscribers_of(key);
        if subscribers.is_empty() {
            return stats;
        }

        let frame = match ServerMessage::kline_update(candle).to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                error!(key = %key, error = %e, "Failed to serialize kline update");
                return stats;
            }
        };

        for conn in subscribers {
            let mut state = conn.lock().await;
            // 스냅샷 이후 구독 해제된 연결
            if !state.subscriptions.contains(key) {
                continue;
            }

            let now = Instant::now();
            if let Some(last) = state.last_sent.get(key) {
                if now.duration_since(*last) < self.throttle {
                    stats.throttled += 1;
                    continue;
                }
            }

            match conn.try_send(frame.clone()) {
                Ok(()) => {
                    state.last_sent.insert(key.clone(), now);
                    stats.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    debug!(connection = %conn.id(), key = %key, "Send queue full, update dropped");
                    stats.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }

        record_fanout(stats.delivered, stats.throttled, stats.dropped);
        stats
    }

    /// 스로틀 없이 키의 모든 구독자에게 프레임을 보냅니다.
    pub async fn notify(&self, key: &FeedKey, frame: Frame) -> usize {
        let subscribers = self.table.lock().await.subscribers_of(key);
        subscribers
            .iter()
            .filter(|conn| conn.try_send(frame.clone()).is_ok())
            .count()
    }
}
