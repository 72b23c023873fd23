//! WebSocket 연결 handler.
//!
//! 연결마다 reader/writer 태스크 두 개를 띄웁니다. reader는 제어 메시지를 레지스트리로
//! 보내고, writer는 송신 큐를 비우면서 주기적으로 Ping을 보냅니다.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use relay_core::HubConfig;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tracing::{debug, info, warn};

use super::connection::{Connection, Frame};
use super::lifecycle::HubHandle;
use super::messages::{ClientCommand, ClientMessage, ServerMessage, WsError};
use super::registry::SubscriptionRegistry;

/// 연결별 타이밍과 큐 설정.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// 송신 큐 용량
    pub send_queue_capacity: usize,
    /// Ping 주기
    pub ping_interval: Duration,
    /// 수신 유휴 한도
    pub pong_wait: Duration,
    /// 쓰기 한도
    pub write_wait: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_settings(&HubConfig::default())
    }
}

impl SessionSettings {
    pub fn from_settings(settings: &HubConfig) -> Self {
        Self {
            send_queue_capacity: settings.send_queue_capacity,
            ping_interval: settings.ping_interval(),
            pong_wait: settings.pong_wait(),
            write_wait: settings.write_wait(),
        }
    }
}

/// WebSocket 상태.
#[derive(Clone)]
pub struct WsState {
    /// 허브 핸들
    pub hub: HubHandle,
    /// 구독 레지스트리
    pub registry: SubscriptionRegistry,
    /// 연결별 설정
    pub settings: SessionSettings,
}

/// WebSocket 라우터 생성.
pub fn websocket_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

/// WebSocket 업그레이드 핸들러.
///
/// # 엔드포인트
///
/// `GET /ws`
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// WebSocket 연결 처리.
async fn handle_socket(socket: WebSocket, state: WsState) {
    let (conn, queue) = Connection::new(state.settings.send_queue_capacity);
    let id = conn.id();
    info!(connection = %id, "WebSocket connected");

    state.hub.register(conn.clone()).await;

    let (sender, receiver) = socket.split();
    let settings = state.settings.clone();

    let mut reader = tokio::spawn(read_loop(
        receiver,
        conn.clone(),
        state.registry.clone(),
        settings.pong_wait,
    ));
    let mut writer = tokio::spawn(write_loop(sender, queue, conn.clone(), settings.clone()));

    // 하나의 태스크가 종료되면 다른 것도 종료
    tokio::select! {
        _ = &mut reader => {
            debug!(connection = %id, "Reader ended");
            conn.close();
            if timeout(settings.write_wait, &mut writer).await.is_err() {
                writer.abort();
            }
        }
        _ = &mut writer => {
            debug!(connection = %id, "Writer ended");
            reader.abort();
        }
    }

    state.hub.unregister(id).await;
    info!(connection = %id, "WebSocket disconnected");
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    conn: Arc<Connection>,
    registry: SubscriptionRegistry,
    pong_wait: Duration,
) {
    loop {
        let message = match timeout(pong_wait, receiver.next()).await {
            Err(_) => {
                info!(connection = %conn.id(), "Read deadline exceeded");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(connection = %conn.id(), error = %e, "WebSocket receive error");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                if let Err(e) = handle_text(&conn, &registry, text.as_str()).await {
                    send_error(&conn, &e);
                }
            }
            Message::Binary(_) => send_error(&conn, &WsError::BinaryNotSupported),
            // Ping 응답은 axum이 처리하고, Pong은 수신 한도만 갱신한다
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                debug!(connection = %conn.id(), "Close message received");
                break;
            }
        }
    }
}

async fn handle_text(
    conn: &Arc<Connection>,
    registry: &SubscriptionRegistry,
    text: &str,
) -> Result<(), WsError> {
    match ClientMessage::from_json(text)?.into_command()? {
        ClientCommand::Subscribe(key) => registry.subscribe(conn, key).await,
        ClientCommand::Unsubscribe(key) => registry.unsubscribe(conn, key).await,
    }
}

fn send_error(conn: &Connection, error: &WsError) {
    debug!(connection = %conn.id(), error = %error, "Rejecting client message");
    match ServerMessage::error(error.to_string()).to_frame() {
        Ok(frame) => {
            if conn.try_send(frame).is_err() {
                warn!(connection = %conn.id(), "Error frame dropped");
            }
        }
        Err(e) => warn!(error = %e, "Failed to serialize error frame"),
    }
}

async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<Frame>,
    conn: Arc<Connection>,
    settings: SessionSettings,
) {
    let mut ping = interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );

    loop {
        let message = tokio::select! {
            biased;
            _ = conn.closed() => {
                // 종료 전에 이미 큐에 들어간 프레임(종료 안내 등)은 보낸다
                while let Ok(frame) = queue.try_recv() {
                    let message = Message::Text(frame.to_string().into());
                    if !matches!(timeout(settings.write_wait, sender.send(message)).await, Ok(Ok(()))) {
                        return;
                    }
                }
                let _ = timeout(settings.write_wait, sender.send(Message::Close(None))).await;
                break;
            }
            frame = queue.recv() => match frame {
                Some(frame) => Message::Text(frame.to_string().into()),
                None => break,
            },
            _ = ping.tick() => Message::Ping(Default::default()),
        };

        match timeout(settings.write_wait, sender.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(connection = %conn.id(), error = %e, "WebSocket send error");
                break;
            }
            Err(_) => {
                warn!(connection = %conn.id(), "Write deadline exceeded");
                break;
            }
        }
    }
}
