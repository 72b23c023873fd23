//! 구독 레지스트리.
//!
//! 피드 키별 구독자 집합과 연결별 역인덱스를 하나의 잠금 아래에서 관리합니다.
//! 키의 첫 구독자가 생길 때 업스트림 피드를 시작하고, 마지막 구독자가 떠나면 중지합니다.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use relay_core::FeedKey;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionId, Frame};
use super::messages::{ServerMessage, WsError};
use super::multiplexer::{CandleHandler, FeedHandle, FeedMultiplexer};
use crate::metrics::set_feeds_active;

/// 구독 테이블.
///
/// 키 항목은 피드 핸들이 있을 때만 존재하며, 구독자 집합이 비는 순간 함께 제거됩니다.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    subscribers: HashMap<FeedKey, HashMap<ConnectionId, Arc<Connection>>>,
    by_connection: HashMap<ConnectionId, HashSet<FeedKey>>,
    feeds: HashMap<FeedKey, FeedHandle>,
}

/// 레지스트리와 팬아웃 엔진이 공유하는 테이블.
pub type SharedSubscriptionTable = Arc<Mutex<SubscriptionTable>>;

impl SubscriptionTable {
    /// 공유 테이블을 생성합니다.
    pub fn shared() -> SharedSubscriptionTable {
        Arc::new(Mutex::new(Self::default()))
    }

    /// 키의 구독자 스냅샷.
    pub fn subscribers_of(&self, key: &FeedKey) -> Vec<Arc<Connection>> {
        self.subscribers
            .get(key)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// 재연결 한도를 소진한 피드 핸들을 제거합니다.
    ///
    /// 같은 키에 이미 새 세대가 시작되었으면 아무것도 하지 않습니다. 구독자는 남으며
    /// 다음 구독 요청이 새 피드를 시작합니다.
    pub fn retire_feed(&mut self, key: &FeedKey, generation: u64) -> bool {
        let current = self.feeds.get(key).map(FeedHandle::generation);
        if current != Some(generation) {
            return false;
        }
        self.feeds.remove(key);
        set_feeds_active(self.feeds.len());
        true
    }

    /// 연결 하나를 키에서 제거하고, 구독자가 없으면 피드를 중지합니다.
    fn detach(&mut self, id: ConnectionId, key: &FeedKey) {
        if let Some(subs) = self.subscribers.get_mut(key) {
            subs.remove(&id);
            if subs.is_empty() {
                self.subscribers.remove(key);
                if let Some(handle) = self.feeds.remove(key) {
                    info!(key = %key, generation = handle.generation(), "Stopping upstream feed");
                    handle.stop();
                }
            }
        }
        set_feeds_active(self.feeds.len());
    }
}

/// 구독 레지스트리.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    table: SharedSubscriptionTable,
    multiplexer: Arc<FeedMultiplexer>,
    handler: Arc<dyn CandleHandler>,
}

impl SubscriptionRegistry {
    pub fn new(
        table: SharedSubscriptionTable,
        multiplexer: Arc<FeedMultiplexer>,
        handler: Arc<dyn CandleHandler>,
    ) -> Self {
        Self {
            table,
            multiplexer,
            handler,
        }
    }

    /// 연결을 키에 구독시킵니다.
    ///
    /// `subscribed` 확인 프레임은 구독자 집합에 추가되기 전에 큐에 들어가므로
    /// 첫 캔들 업데이트보다 항상 먼저 전달됩니다.
    pub async fn subscribe(&self, conn: &Arc<Connection>, key: FeedKey) -> Result<(), WsError> {
        if conn.is_closed() {
            debug!(connection = %conn.id(), key = %key, "Ignoring subscribe on closed connection");
            return Ok(());
        }

        let ack = ServerMessage::subscribed(&key).to_frame()?;
        {
            let mut state = conn.lock().await;
            state.subscriptions.insert(key.clone());
            enqueue(conn, ack);
        }

        let mut table = self.table.lock().await;
        // 해제 처리와 경합한 연결은 테이블에 남기지 않는다
        if conn.is_closed() {
            return Ok(());
        }

        table
            .by_connection
            .entry(conn.id())
            .or_default()
            .insert(key.clone());
        table
            .subscribers
            .entry(key.clone())
            .or_default()
            .insert(conn.id(), conn.clone());

        let needs_start = table
            .feeds
            .get(&key)
            .map_or(true, |handle| handle.is_finished());
        if needs_start {
            let handle = self.multiplexer.start(key.clone(), self.handler.clone());
            if let Some(previous) = table.feeds.insert(key.clone(), handle) {
                debug!(key = %key, generation = previous.generation(), "Replacing finished feed");
                previous.stop();
            }
            set_feeds_active(table.feeds.len());
        }

        debug!(connection = %conn.id(), key = %key, "Subscribed");
        Ok(())
    }

    /// 연결의 키 구독을 해제합니다.
    ///
    /// 구독하지 않은 키여도 `unsubscribed` 확인을 보냅니다.
    pub async fn unsubscribe(&self, conn: &Arc<Connection>, key: FeedKey) -> Result<(), WsError> {
        let ack = ServerMessage::unsubscribed(&key).to_frame()?;
        {
            let mut table = self.table.lock().await;
            if let Some(keys) = table.by_connection.get_mut(&conn.id()) {
                keys.remove(&key);
                if keys.is_empty() {
                    table.by_connection.remove(&conn.id());
                }
            }
            table.detach(conn.id(), &key);
        }

        let mut state = conn.lock().await;
        state.subscriptions.remove(&key);
        state.last_sent.remove(&key);
        enqueue(conn, ack);

        debug!(connection = %conn.id(), key = %key, "Unsubscribed");
        Ok(())
    }

    /// 연결의 모든 구독을 제거합니다. 반환값은 제거된 구독 수입니다.
    pub async fn remove_connection(&self, id: ConnectionId) -> usize {
        let mut table = self.table.lock().await;
        let keys = table.by_connection.remove(&id).unwrap_or_default();
        for key in &keys {
            table.detach(id, key);
        }
        keys.len()
    }

    /// 키의 구독자 스냅샷.
    pub async fn subscribers(&self, key: &FeedKey) -> Vec<Arc<Connection>> {
        self.table.lock().await.subscribers_of(key)
    }

    /// 활성 피드 수.
    pub async fn feed_count(&self) -> usize {
        self.table.lock().await.feeds.len()
    }

    /// 키에 대한 피드 핸들이 있는지 확인합니다.
    pub async fn has_feed(&self, key: &FeedKey) -> bool {
        self.table.lock().await.feeds.contains_key(key)
    }

    /// 키의 현재 피드 세대 번호.
    pub async fn feed_generation(&self, key: &FeedKey) -> Option<u64> {
        self.table
            .lock()
            .await
            .feeds
            .get(key)
            .map(FeedHandle::generation)
    }

    /// 모든 피드를 중지합니다. 종료 시 사용됩니다.
    pub async fn stop_all(&self) {
        let mut table = self.table.lock().await;
        for (key, handle) in table.feeds.drain() {
            debug!(key = %key, "Stopping upstream feed on shutdown");
            handle.stop();
        }
        table.subscribers.clear();
        table.by_connection.clear();
        set_feeds_active(0);
    }
}

fn enqueue(conn: &Connection, frame: Frame) {
    if let Err(e) = conn.try_send(frame) {
        warn!(connection = %conn.id(), error = %e, "Control frame dropped");
    }
}
