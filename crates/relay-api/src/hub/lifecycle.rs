//! 연결 수명 관리자 (Hub).
//!
//! 살아 있는 연결 집합은 소유자 태스크 하나만 접근하며, 모든 변경은
//! [`HubHandle`]이 보내는 명령으로 들어옵니다.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::{Connection, ConnectionId, Frame};
use super::messages::ServerMessage;
use super::registry::SubscriptionRegistry;
use crate::metrics::{record_broadcast_eviction, set_ws_connections};

const COMMAND_BUFFER: usize = 1024;

/// 종료 시 모든 연결에 보내는 메시지.
pub const SHUTDOWN_MESSAGE: &str = "Server shutting down";

enum HubCommand {
    Register(Arc<Connection>),
    Unregister(ConnectionId),
    Broadcast(Frame),
    Count(oneshot::Sender<usize>),
}

/// 허브 소유자 태스크로 명령을 보내는 핸들.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// 연결을 등록합니다.
    pub async fn register(&self, conn: Arc<Connection>) {
        self.send(HubCommand::Register(conn)).await;
    }

    /// 연결을 해제합니다. 없는 연결이면 아무것도 하지 않습니다.
    pub async fn unregister(&self, id: ConnectionId) {
        self.send(HubCommand::Unregister(id)).await;
    }

    /// 모든 연결에 프레임을 보냅니다. 큐가 가득 찬 연결은 제거됩니다.
    pub async fn broadcast_all(&self, frame: Frame) {
        self.send(HubCommand::Broadcast(frame)).await;
    }

    /// 살아 있는 연결 수. 허브가 종료되었으면 0입니다.
    pub async fn connection_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Count(reply)).await;
        rx.await.unwrap_or(0)
    }

    async fn send(&self, command: HubCommand) {
        if self.tx.send(command).await.is_err() {
            debug!("Hub is stopped, command ignored");
        }
    }
}

/// 허브 소유자 태스크의 상태.
pub struct Hub {
    connections: HashMap<ConnectionId, Arc<Connection>>,
    registry: SubscriptionRegistry,
    rx: mpsc::Receiver<HubCommand>,
}

impl Hub {
    /// 허브 소유자 태스크를 시작합니다.
    ///
    /// `shutdown`이 취소되면 모든 연결에 종료 메시지를 보내고 닫은 뒤 끝납니다.
    pub fn spawn(
        registry: SubscriptionRegistry,
        shutdown: CancellationToken,
    ) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let hub = Hub {
            connections: HashMap::new(),
            registry,
            rx,
        };
        let task = tokio::spawn(hub.run(shutdown));
        (HubHandle { tx }, task)
    }

    async fn run(mut self, shutdown: CancellationToken) {
        loop {
            let command = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                command = self.rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                HubCommand::Register(conn) => {
                    debug!(connection = %conn.id(), "Connection registered");
                    self.connections.insert(conn.id(), conn);
                }
                HubCommand::Unregister(id) => {
                    if let Some(conn) = self.connections.remove(&id) {
                        conn.close();
                        let removed = self.registry.remove_connection(id).await;
                        debug!(connection = %id, subscriptions = removed, "Connection unregistered");
                    }
                }
                HubCommand::Broadcast(frame) => self.broadcast(frame).await,
                HubCommand::Count(reply) => {
                    let _ = reply.send(self.connections.len());
                }
            }
            set_ws_connections(self.connections.len());
        }

        self.shutdown().await;
    }

    async fn broadcast(&mut self, frame: Frame) {
        let mut evicted = Vec::new();
        for (id, conn) in &self.connections {
            if let Err(e) = conn.try_send(frame.clone()) {
                warn!(connection = %id, error = %e, "Broadcast failed, evicting connection");
                evicted.push(*id);
            }
        }

        for id in evicted {
            if let Some(conn) = self.connections.remove(&id) {
                conn.close();
                self.registry.remove_connection(id).await;
                record_broadcast_eviction();
            }
        }
    }

    async fn shutdown(&mut self) {
        info!(connections = self.connections.len(), "Hub shutting down");

        match ServerMessage::error(SHUTDOWN_MESSAGE).to_frame() {
            Ok(frame) => {
                for conn in self.connections.values() {
                    let _ = conn.try_send(frame.clone());
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize shutdown notice"),
        }

        for (_, conn) in self.connections.drain() {
            conn.close();
        }
        self.registry.stop_all().await;
        set_ws_connections(0);
    }
}
