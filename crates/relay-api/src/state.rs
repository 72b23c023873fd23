//! 모든 핸들러에서 공유되는 애플리케이션 상태.
//!
//! AppState는 Arc로 래핑되어 여러 요청 간에 공유됩니다.

use std::sync::Arc;

use relay_core::HistoryConfig;
use relay_data::CandleStore;
use relay_exchange::HistoricalKlineProvider;

use crate::hub::{HubHandle, SubscriptionRegistry};

/// 애플리케이션 공유 상태.
#[derive(Clone)]
pub struct AppState {
    /// 캔들 저장소 (PostgreSQL 또는 메모리)
    pub store: Arc<dyn CandleStore>,

    /// 저장소가 비었을 때 사용할 거래소 과거 데이터 제공자
    pub history: Option<Arc<dyn HistoricalKlineProvider>>,

    /// 과거 데이터 조회 설정
    pub history_settings: HistoryConfig,

    /// 데이터베이스가 설정되었는지 여부
    pub database_configured: bool,

    /// 허브 핸들 - 연결 수 조회
    pub hub: HubHandle,

    /// 구독 레지스트리 - 활성 피드 수 조회
    pub registry: SubscriptionRegistry,

    /// 서버 시작 시간
    pub started_at: chrono::DateTime<chrono::Utc>,

    /// API 버전
    pub version: String,
}

impl AppState {
    /// 새 애플리케이션 상태 생성.
    pub fn new(store: Arc<dyn CandleStore>, hub: HubHandle, registry: SubscriptionRegistry) -> Self {
        Self {
            store,
            history: None,
            history_settings: HistoryConfig::default(),
            database_configured: false,
            hub,
            registry,
            started_at: chrono::Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// 거래소 과거 데이터 제공자 설정.
    pub fn with_history(
        mut self,
        provider: Arc<dyn HistoricalKlineProvider>,
        settings: HistoryConfig,
    ) -> Self {
        self.history = Some(provider);
        self.history_settings = settings;
        self
    }

    /// 데이터베이스 사용 여부 설정.
    pub fn with_database(mut self, configured: bool) -> Self {
        self.database_configured = configured;
        self
    }

    /// 저장소 연결 상태 확인.
    pub async fn is_store_healthy(&self) -> bool {
        self.store.health_check().await.unwrap_or(false)
    }

    /// 서버 업타임(초).
    pub fn uptime_secs(&self) -> i64 {
        chrono::Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds()
    }
}

#[cfg(any(test, feature = "test-utils"))]
mod testing {
    use async_trait::async_trait;
    use futures::StreamExt;
    use relay_core::FeedKey;
    use relay_exchange::{ExchangeResult, KlineSource, KlineStream};

    /// 연결은 되지만 아무 이벤트도 보내지 않는 업스트림.
    pub struct PendingKlineSource;

    #[async_trait]
    impl KlineSource for PendingKlineSource {
        async fn connect(&self, _key: &FeedKey) -> ExchangeResult<KlineStream> {
            Ok(futures::stream::pending().boxed())
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use testing::PendingKlineSource;

/// 테스트용 AppState 생성.
///
/// 메모리 저장소와 이벤트가 없는 업스트림으로 허브를 띄웁니다. tokio 런타임 안에서 호출해야 합니다.
#[cfg(any(test, feature = "test-utils"))]
pub fn create_test_state() -> AppState {
    use relay_core::HubConfig;
    use relay_data::InMemoryCandleStore;
    use tokio_util::sync::CancellationToken;

    use crate::hub::HubServices;

    let store: Arc<dyn CandleStore> = Arc::new(InMemoryCandleStore::new());
    let services = HubServices::start(
        &HubConfig::default(),
        Arc::new(PendingKlineSource),
        store.clone(),
        CancellationToken::new(),
    );
    AppState::new(store, services.hub, services.registry)
}
