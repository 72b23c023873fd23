//! 클라이언트 연결 하나의 송신 큐와 구독 상태.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use relay_core::FeedKey;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// 연결 식별자.
pub type ConnectionId = Uuid;

/// 직렬화된 송신 프레임 하나. 여러 구독자가 같은 버퍼를 공유합니다.
pub type Frame = Arc<str>;

/// 연결별 잠금으로 보호되는 상태.
#[derive(Debug, Default)]
pub struct ConnectionState {
    /// 구독 중인 피드 키
    pub subscriptions: HashSet<FeedKey>,
    /// 피드 키별 마지막 전송 시각 (스로틀 기준)
    pub last_sent: HashMap<FeedKey, Instant>,
}

/// 허브에 등록된 WebSocket 연결.
///
/// 송신 큐는 `try_send`로만 채워지며, 큐를 비우는 쪽은 세션의 writer 태스크뿐입니다.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    closed: CancellationToken,
    state: Mutex<ConnectionState>,
}

impl Connection {
    /// 새 연결과 송신 큐의 수신 측을 생성합니다.
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            tx,
            closed: CancellationToken::new(),
            state: Mutex::new(ConnectionState::default()),
        });
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// 큐에 프레임을 넣습니다. 대기하지 않습니다.
    pub fn try_send(&self, frame: Frame) -> Result<(), TrySendError<Frame>> {
        self.tx.try_send(frame)
    }

    /// 종료 신호를 보냅니다. writer가 Close 프레임을 보내고 끝납니다.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// 종료 신호를 기다립니다.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// 연결별 상태 잠금.
    pub async fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().await
    }

    /// 현재 구독 목록.
    pub async fn subscriptions(&self) -> Vec<FeedKey> {
        let mut keys: Vec<FeedKey> = self.lock().await.subscriptions.iter().cloned().collect();
        keys.sort();
        keys
    }
}
