//! API 응답 봉투 타입.
//!
//! 모든 REST 엔드포인트는 성공과 실패 모두 같은 형식을 사용합니다.
//!
//! ```json
//! { "code": 400, "message": "symbol parameter is required", "data": null }
//! ```

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};

/// API 응답 봉투.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// HTTP 상태 코드와 같은 값
    pub code: u16,
    /// `success` 또는 에러 메시지
    pub message: String,
    /// 응답 데이터 (에러 시 `null`)
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// 성공 응답 생성.
    pub fn success(data: T) -> Self {
        Self {
            code: StatusCode::OK.as_u16(),
            message: "success".to_string(),
            data: Some(data),
        }
    }
}

impl ApiResponse<()> {
    /// 에러 응답 생성.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code: status.as_u16(),
            message: message.into(),
            data: None,
        }
    }
}

/// API 에러 타입.
pub type ApiError = (StatusCode, Json<ApiResponse<()>>);

/// API 핸들러 결과 타입.
///
/// # 사용 예시
///
/// ```rust,ignore
/// async fn handler() -> ApiResult<Json<ApiResponse<Vec<KlineData>>>> {
///     Err(api_error(StatusCode::BAD_REQUEST, "symbol parameter is required"))
/// }
/// ```
pub type ApiResult<T> = Result<T, ApiError>;

/// 상태 코드와 메시지로 에러 응답을 만듭니다.
pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ApiResponse::error(status, message)))
}

/// 400 Bad Request 헬퍼.
pub fn bad_request(message: impl Into<String>) -> ApiError {
    api_error(StatusCode::BAD_REQUEST, message)
}
