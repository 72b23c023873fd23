//! 캔들 릴레이 서버 진입점.
//!
//! 설정을 로드하고 저장소, 업스트림, 허브를 조립한 뒤 HTTP/WebSocket 서버를 시작합니다.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use relay_api::{create_router, setup_metrics_recorder, shutdown_signal, AppState, HubServices};
use relay_core::{init_logging, AppConfig, LogConfig};
use relay_data::{CandleStore, Database, InMemoryCandleStore, KlineRepository};
use relay_exchange::{BinanceConfig, BinanceKlineSource, BinanceRestClient, RetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env 파일 로드 (있는 경우)
    let _ = dotenvy::dotenv();

    // 설정 로드
    let config = AppConfig::load_default().context("failed to load configuration")?;
    config.validate()?;

    init_logging(LogConfig::from(&config.logging))
        .map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    info!("Starting kline relay server...");

    // Prometheus 메트릭 레코더 설정
    let metrics_handle = setup_metrics_recorder().context("failed to install metrics recorder")?;
    info!("Prometheus metrics recorder initialized");

    // 저장소: 데이터베이스 URL이 있으면 PostgreSQL, 없으면 메모리
    let database_configured = config.database.url.is_some();
    let store: Arc<dyn CandleStore> = match &config.database.url {
        Some(url) => {
            let db = Database::connect(url, &config.database)
                .await
                .context("failed to connect to database")?;
            if config.database.run_migrations {
                db.migrate().await.context("failed to run migrations")?;
            }
            Arc::new(KlineRepository::new(db))
        }
        None => {
            warn!("database.url not set, candles are kept in memory only");
            Arc::new(InMemoryCandleStore::new())
        }
    };

    // 거래소 연결
    let binance = BinanceConfig::from_settings(&config.exchange);
    info!(
        testnet = binance.testnet,
        rest = binance.rest_base_url(),
        ws = binance.ws_base_url(),
        "Binance endpoints configured"
    );
    let source = Arc::new(BinanceKlineSource::new(binance.clone()));
    let history = BinanceRestClient::new(binance)?
        .with_retry_config(RetryConfig::from_settings(&config.history));

    // 전역 종료 토큰 (허브와 피드 태스크에 전파)
    let shutdown_token = CancellationToken::new();

    let services = HubServices::start(&config.hub, source, store.clone(), shutdown_token.clone());
    let ws_state = services.ws_state(&config.hub);

    let state = Arc::new(
        AppState::new(store, services.hub.clone(), services.registry.clone())
            .with_history(Arc::new(history), config.history.clone())
            .with_database(database_configured),
    );
    info!(version = %state.version, has_db = database_configured, "Application state initialized");

    // 라우터 생성
    let app = create_router(
        state,
        ws_state,
        Some(metrics_handle),
        Duration::from_secs(config.server.request_timeout_secs),
    );

    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(%addr, "API server listening");
    info!("Metrics available at http://{}/metrics", addr);
    info!("WebSocket available at ws://{}/ws", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_token.clone()))
        .await?;

    info!("Server shutdown initiated, cleaning up...");
    shutdown_token.cancel();

    // 허브가 연결을 닫을 때까지 최대 10초 대기
    if tokio::time::timeout(Duration::from_secs(10), services.task)
        .await
        .is_err()
    {
        warn!("Cleanup timeout, forcing shutdown");
    }

    info!("Server stopped gracefully");
    Ok(())
}
