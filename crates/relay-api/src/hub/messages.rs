//! WebSocket 메시지 타입.
//!
//! 클라이언트-서버 간 교환되는 제어 프레임과 캔들 업데이트 프레임 정의.

use relay_core::{format_price, Candle, FeedKey, RelayError};
use serde::{Deserialize, Serialize};

use super::connection::Frame;

/// WebSocket 에러.
///
/// `Display` 문자열이 그대로 클라이언트의 `error` 프레임 메시지가 됩니다.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("Invalid message format")]
    InvalidMessage,
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("{0}")]
    InvalidKey(String),
    #[error("Binary messages are not supported")]
    BinaryNotSupported,
    #[error("직렬화 실패: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RelayError> for WsError {
    fn from(err: RelayError) -> Self {
        WsError::InvalidKey(err.to_string())
    }
}

// ==================== 클라이언트 → 서버 메시지 ====================

/// 클라이언트에서 서버로 보내는 제어 메시지.
///
/// 빠진 필드는 빈 문자열로 채워지고 이후 검증에서 거부됩니다.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientMessage {
    /// `subscribe` 또는 `unsubscribe`
    #[serde(default)]
    pub action: String,
    /// 심볼 (예: `BTCUSDT`)
    #[serde(default)]
    pub symbol: String,
    /// 간격 (예: `1m`)
    #[serde(default)]
    pub interval: String,
}

/// 검증을 마친 클라이언트 명령.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Subscribe(FeedKey),
    Unsubscribe(FeedKey),
}

impl ClientMessage {
    /// JSON 문자열에서 파싱.
    pub fn from_json(json: &str) -> Result<Self, WsError> {
        serde_json::from_str(json).map_err(|_| WsError::InvalidMessage)
    }

    /// 액션을 확인하고 피드 키를 검증합니다.
    pub fn into_command(self) -> Result<ClientCommand, WsError> {
        match self.action.as_str() {
            "subscribe" => Ok(ClientCommand::Subscribe(FeedKey::new(
                &self.symbol,
                &self.interval,
            )?)),
            "unsubscribe" => Ok(ClientCommand::Unsubscribe(FeedKey::new(
                &self.symbol,
                &self.interval,
            )?)),
            _ => Err(WsError::UnknownAction(self.action)),
        }
    }
}

// ==================== 서버 → 클라이언트 메시지 ====================

/// 서버에서 클라이언트로 보내는 메시지.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// 구독 확인
    Subscribed { symbol: String, interval: String },
    /// 구독 해제 확인
    Unsubscribed { symbol: String, interval: String },
    /// 마감된 캔들
    KlineUpdate {
        symbol: String,
        interval: String,
        data: KlineData,
    },
    /// 에러
    Error { message: String },
}

/// `kline_update`와 REST 응답에 공통으로 쓰이는 캔들 표현.
///
/// 가격과 거래량은 소수점 8자리 문자열입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KlineData {
    pub open_time: i64,
    pub close_time: i64,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
}

impl From<&Candle> for KlineData {
    fn from(candle: &Candle) -> Self {
        Self {
            open_time: candle.open_time,
            close_time: candle.close_time,
            open: format_price(candle.open),
            high: format_price(candle.high),
            low: format_price(candle.low),
            close: format_price(candle.close),
            volume: format_price(candle.volume),
        }
    }
}

impl ServerMessage {
    /// 구독 확인 메시지.
    pub fn subscribed(key: &FeedKey) -> Self {
        ServerMessage::Subscribed {
            symbol: key.symbol().to_string(),
            interval: key.interval().to_string(),
        }
    }

    /// 구독 해제 확인 메시지.
    pub fn unsubscribed(key: &FeedKey) -> Self {
        ServerMessage::Unsubscribed {
            symbol: key.symbol().to_string(),
            interval: key.interval().to_string(),
        }
    }

    /// 캔들 업데이트 메시지.
    pub fn kline_update(candle: &Candle) -> Self {
        ServerMessage::KlineUpdate {
            symbol: candle.symbol.clone(),
            interval: candle.interval.to_string(),
            data: KlineData::from(candle),
        }
    }

    /// 에러 메시지 생성 헬퍼.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// JSON으로 직렬화.
    pub fn to_json(&self) -> Result<String, WsError> {
        serde_json::to_string(self).map_err(WsError::from)
    }

    /// 큐에 넣을 수 있는 프레임으로 직렬화.
    pub fn to_frame(&self) -> Result<Frame, WsError> {
        Ok(Frame::from(self.to_json()?))
    }
}
