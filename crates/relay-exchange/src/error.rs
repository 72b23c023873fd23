//! 거래소 에러 타입.

use thiserror::Error;

/// 거래소 관련 에러.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    NetworkError(String),

    /// 거래소 연결 끊김
    #[error("Disconnected: {0}")]
    Disconnected(String),

    /// 요청 한도 초과
    #[error("Rate limit exceeded")]
    RateLimited,

    /// API 에러 코드 (Binance 코드 또는 HTTP 상태)
    #[error("API error {code}: {message}")]
    ApiError { code: i32, message: String },

    /// 파싱/역직렬화 에러
    #[error("Parse error: {0}")]
    ParseError(String),

    /// WebSocket 에러
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 알 수 없는 에러
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// 거래소 작업을 위한 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

impl ExchangeError {
    /// 재시도 가능한 에러인지 확인. 파싱 실패와 알 수 없는 에러는 제외됩니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::NetworkError(_)
                | ExchangeError::Disconnected(_)
                | ExchangeError::RateLimited
                | ExchangeError::Timeout(_)
                | ExchangeError::WebSocket(_)
                | ExchangeError::ApiError { .. }
        )
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_connect() {
            ExchangeError::NetworkError(err.to_string())
        } else {
            ExchangeError::Unknown(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ExchangeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                ExchangeError::Disconnected(err.to_string())
            }
            WsError::Io(_) => ExchangeError::NetworkError(err.to_string()),
            _ => ExchangeError::WebSocket(err.to_string()),
        }
    }
}

impl From<ExchangeError> for relay_core::RelayError {
    fn from(err: ExchangeError) -> Self {
        match err {
            ExchangeError::NetworkError(msg) | ExchangeError::Timeout(msg) => {
                relay_core::RelayError::Network(msg)
            }
            other => relay_core::RelayError::Exchange(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_errors_are_retryable() {
        let err = ExchangeError::ApiError {
            code: 503,
            message: "Service Unavailable".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!ExchangeError::ParseError("bad json".to_string()).is_retryable());
    }

    #[test]
    fn test_unknown_errors_are_not_retried() {
        assert!(!ExchangeError::Unknown("decode".into()).is_retryable());
        assert!(ExchangeError::RateLimited.is_retryable());
    }

    #[test]
    fn test_into_relay_error() {
        let err: relay_core::RelayError = ExchangeError::NetworkError("reset".into()).into();
        assert!(matches!(err, relay_core::RelayError::Network(_)));
    }
}
