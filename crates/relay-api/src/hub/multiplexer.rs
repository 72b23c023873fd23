//! 업스트림 피드 멀티플렉서.
//!
//! 피드 키 하나당 태스크 하나가 업스트림 스트림을 읽고, 마감된 캔들만
//! [`CandleHandler`]로 넘깁니다. 연결이 끊기면 지수 백오프로 재연결합니다.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use relay_core::{Candle, FeedKey, HubConfig};
use relay_exchange::KlineSource;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::metrics::{record_candle_received, record_feed_reconnect};

/// 마감된 캔들을 받는 쪽.
#[async_trait]
pub trait CandleHandler: Send + Sync {
    /// 마감된 캔들 하나를 처리합니다.
    async fn on_candle(&self, key: &FeedKey, candle: Candle);

    /// 재연결 한도를 모두 써서 피드가 종료되었을 때 호출됩니다.
    ///
    /// `generation`은 종료된 [`FeedHandle`]의 세대 번호입니다.
    async fn on_feed_terminated(&self, key: &FeedKey, generation: u64);
}

/// 재연결 정책.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// 첫 재연결 전 대기 시간
    pub initial_delay: Duration,
    /// 대기 시간 상한
    pub max_delay: Duration,
    /// 연속 실패 허용 횟수 (없으면 무제한)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// 허브 설정에서 정책을 생성합니다.
    pub fn from_settings(settings: &HubConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(settings.reconnect_initial_delay_ms),
            max_delay: Duration::from_millis(settings.reconnect_max_delay_ms),
            max_attempts: settings.max_reconnect_attempts,
        }
    }

    /// `failures`번째 연속 실패 후의 대기 시간. 1초, 2초, 4초 ... 상한까지.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(2u32.pow(exponent))
            .min(self.max_delay)
    }

    /// 연속 실패 횟수가 한도를 넘었는지 확인합니다.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures > max)
    }
}

/// 실행 중인 피드 태스크 하나.
#[derive(Debug)]
pub struct FeedHandle {
    key: FeedKey,
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl FeedHandle {
    pub fn key(&self) -> &FeedKey {
        &self.key
    }

    /// 이 핸들의 세대 번호. 시작할 때마다 증가합니다.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 피드 태스크를 중지합니다.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// 태스크가 끝났는지 확인합니다 (중지 또는 재연결 한도 소진).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// 업스트림 피드 멀티플렉서.
pub struct FeedMultiplexer {
    source: Arc<dyn KlineSource>,
    policy: ReconnectPolicy,
    next_generation: AtomicU64,
}

impl FeedMultiplexer {
    pub fn new(source: Arc<dyn KlineSource>, policy: ReconnectPolicy) -> Self {
        Self {
            source,
            policy,
            next_generation: AtomicU64::new(0),
        }
    }

    /// 피드 키에 대한 업스트림 태스크를 시작합니다.
    ///
    /// 키당 한 번만 호출되도록 보장하는 것은 호출자(구독 레지스트리)의 책임입니다.
    pub fn start(&self, key: FeedKey, handler: Arc<dyn CandleHandler>) -> FeedHandle {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let span = relay_core::feed_span!("feed", key, generation);

        info!(key = %key, generation, "Starting upstream feed");
        let task = tokio::spawn(
            run_feed(
                self.source.clone(),
                key.clone(),
                generation,
                handler,
                self.policy.clone(),
                cancel.clone(),
            )
            .instrument(span),
        );

        FeedHandle {
            key,
            generation,
            cancel,
            task,
        }
    }
}

async fn run_feed(
    source: Arc<dyn KlineSource>,
    key: FeedKey,
    generation: u64,
    handler: Arc<dyn CandleHandler>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = source.connect(&key) => result,
        };

        match connected {
            Ok(mut stream) => {
                debug!("Upstream connected");
                failures = 0;

                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => {
                            debug!("Upstream feed stopped");
                            return;
                        }
                        next = stream.next() => next,
                    };

                    match next {
                        Some(Ok(event)) => {
                            if event.is_closed {
                                record_candle_received(&key);
                                handler.on_candle(&key, event.candle).await;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Upstream stream error");
                            break;
                        }
                        None => {
                            info!("Upstream stream ended");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Upstream connect failed");
            }
        }

        failures += 1;
        if policy.is_exhausted(failures) {
            error!(failures, "Upstream reconnect attempts exhausted");
            handler.on_feed_terminated(&key, generation).await;
            return;
        }

        let delay = policy.delay_for(failures);
        record_feed_reconnect(&key);
        info!(delay_ms = delay.as_millis() as u64, failures, "Reconnecting upstream");

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    debug!("Upstream feed stopped");
}

#[cfg(test)]
pub(crate) mod testing {
    //! 테스트용 합성 업스트림.

    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    use futures::channel::mpsc;
    use relay_exchange::{ExchangeError, ExchangeResult, KlineEvent, KlineStream};
    use tokio::sync::Mutex;

    use super::*;

    /// 연결할 때마다 미리 준비된 스트림을 하나씩 내주는 소스.
    ///
    /// 준비된 스트림이 없으면 연결 실패를 반환합니다.
    #[derive(Default)]
    pub struct ScriptedSource {
        streams: Mutex<VecDeque<KlineStream>>,
        pub connects: AtomicUsize,
    }

    impl ScriptedSource {
        /// 송신 측을 반환하는 스트림 하나를 추가합니다.
        pub async fn push_channel(&self) -> mpsc::UnboundedSender<ExchangeResult<KlineEvent>> {
            let (tx, rx) = mpsc::unbounded();
            self.streams.lock().await.push_back(rx.boxed());
            tx
        }

        pub fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KlineSource for ScriptedSource {
        async fn connect(&self, _key: &FeedKey) -> ExchangeResult<KlineStream> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.streams
                .lock()
                .await
                .pop_front()
                .ok_or_else(|| ExchangeError::NetworkError("connection refused".to_string()))
        }
    }

    /// 받은 캔들과 종료 알림을 기록하는 핸들러.
    #[derive(Default)]
    pub struct RecordingHandler {
        pub candles: Mutex<Vec<Candle>>,
        pub terminated: Mutex<Vec<(FeedKey, u64)>>,
    }

    #[async_trait]
    impl CandleHandler for RecordingHandler {
        async fn on_candle(&self, _key: &FeedKey, candle: Candle) {
            self.candles.lock().await.push(candle);
        }

        async fn on_feed_terminated(&self, key: &FeedKey, generation: u64) {
            self.terminated.lock().await.push((key.clone(), generation));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use relay_exchange::{ExchangeError, KlineEvent};
    use rust_decimal_macros::dec;

    fn key() -> FeedKey {
        FeedKey::new("BTCUSDT", "1m").unwrap()
    }

    fn event(open_time: i64, is_closed: bool) -> KlineEvent {
        KlineEvent {
            candle: Candle::new(
                &key(),
                open_time,
                open_time + 59_999,
                dec!(50000),
                dec!(50010),
                dec!(49990),
                dec!(50005),
                dec!(1),
            ),
            is_closed,
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(60), Duration::from_secs(30));
    }

    #[test]
    fn test_unlimited_policy_never_exhausts() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.is_exhausted(u32::MAX));

        let bounded = ReconnectPolicy {
            max_attempts: Some(2),
            ..Default::default()
        };
        assert!(!bounded.is_exhausted(2));
        assert!(bounded.is_exhausted(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_closed_candles_are_forwarded() {
        let source = Arc::new(ScriptedSource::default());
        let tx = source.push_channel().await;
        let handler = Arc::new(RecordingHandler::default());
        let mux = FeedMultiplexer::new(source.clone(), ReconnectPolicy::default());

        let handle = mux.start(key(), handler.clone());
        tx.unbounded_send(Ok(event(0, false))).unwrap();
        tx.unbounded_send(Ok(event(0, true))).unwrap();
        tx.unbounded_send(Ok(event(60_000, false))).unwrap();
        settle().await;

        let candles = handler.candles.lock().await;
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open_time, 0);
        drop(candles);

        handle.stop();
        settle().await;
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_stream_error() {
        let source = Arc::new(ScriptedSource::default());
        let first = source.push_channel().await;
        let second = source.push_channel().await;
        let handler = Arc::new(RecordingHandler::default());
        let mux = FeedMultiplexer::new(source.clone(), ReconnectPolicy::default());

        let handle = mux.start(key(), handler.clone());
        settle().await;
        assert_eq!(source.connect_count(), 1);

        first
            .unbounded_send(Err(ExchangeError::Disconnected("reset".to_string())))
            .unwrap();
        settle().await;
        assert_eq!(source.connect_count(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(source.connect_count(), 2);

        second.unbounded_send(Ok(event(60_000, true))).unwrap();
        settle().await;
        assert_eq!(handler.candles.lock().await.len(), 1);
        handle.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_feed_notifies_handler() {
        let source = Arc::new(ScriptedSource::default());
        let handler = Arc::new(RecordingHandler::default());
        let policy = ReconnectPolicy {
            max_attempts: Some(1),
            ..Default::default()
        };
        let mux = FeedMultiplexer::new(source.clone(), policy);

        let handle = mux.start(key(), handler.clone());
        settle().await;
        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;

        assert_eq!(source.connect_count(), 2);
        assert_eq!(
            handler.terminated.lock().await.as_slice(),
            &[(key(), handle.generation())]
        );
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generation_increases_per_start() {
        let source = Arc::new(ScriptedSource::default());
        let handler = Arc::new(RecordingHandler::default());
        let mux = FeedMultiplexer::new(source, ReconnectPolicy::default());

        let first = mux.start(key(), handler.clone());
        let second = mux.start(key(), handler);
        assert!(second.generation() > first.generation());
        first.stop();
        second.stop();
    }
}
