//! 구독 기반 캔들 팬아웃 허브.
//!
//! - `lifecycle`: 연결 등록/해제와 전체 브로드캐스트 (단일 소유자 태스크)
//! - `registry`: 피드 키별 구독자 관리, 피드 시작/중지
//! - `multiplexer`: 키당 하나의 업스트림 스트림과 재연결
//! - `fanout`: 스로틀과 비차단 큐 전송
//! - `session`: WebSocket reader/writer 태스크

pub mod connection;
pub mod fanout;
pub mod lifecycle;
pub mod messages;
pub mod multiplexer;
pub mod pipeline;
pub mod registry;
pub mod session;

use std::sync::Arc;

use relay_core::HubConfig;
use relay_data::CandleStore;
use relay_exchange::KlineSource;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub use connection::{Connection, ConnectionId, ConnectionState, Frame};
pub use fanout::{DeliveryStats, FanoutEngine};
pub use lifecycle::{Hub, HubHandle, SHUTDOWN_MESSAGE};
pub use messages::{ClientCommand, ClientMessage, KlineData, ServerMessage, WsError};
pub use multiplexer::{CandleHandler, FeedHandle, FeedMultiplexer, ReconnectPolicy};
pub use pipeline::FeedPipeline;
pub use registry::{SharedSubscriptionTable, SubscriptionRegistry, SubscriptionTable};
pub use session::{websocket_handler, websocket_router, SessionSettings, WsState};

/// 조립된 허브 구성 요소.
pub struct HubServices {
    /// 허브 핸들
    pub hub: HubHandle,
    /// 구독 레지스트리
    pub registry: SubscriptionRegistry,
    /// 팬아웃 엔진
    pub fanout: FanoutEngine,
    /// 허브 소유자 태스크
    pub task: JoinHandle<()>,
}

impl HubServices {
    /// 업스트림 소스와 저장소로 허브 전체를 조립하고 소유자 태스크를 시작합니다.
    pub fn start(
        settings: &HubConfig,
        source: Arc<dyn KlineSource>,
        store: Arc<dyn CandleStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let table = SubscriptionTable::shared();
        let fanout = FanoutEngine::new(table.clone(), settings.throttle());
        let pipeline = Arc::new(FeedPipeline::new(store, fanout.clone(), table.clone()));
        let multiplexer = Arc::new(FeedMultiplexer::new(
            source,
            ReconnectPolicy::from_settings(settings),
        ));
        let registry = SubscriptionRegistry::new(table, multiplexer, pipeline);
        let (hub, task) = Hub::spawn(registry.clone(), shutdown);

        Self {
            hub,
            registry,
            fanout,
            task,
        }
    }

    /// WebSocket 라우터 상태.
    pub fn ws_state(&self, settings: &HubConfig) -> WsState {
        WsState {
            hub: self.hub.clone(),
            registry: self.registry.clone(),
            settings: SessionSettings::from_settings(settings),
        }
    }
}
