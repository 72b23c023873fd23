//! 지원 심볼 목록 endpoint.

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::ApiResponse;
use crate::state::AppState;

/// 심볼 정보.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
}

const SUPPORTED_SYMBOLS: [(&str, &str, &str); 3] = [
    ("BTCUSDT", "BTC", "USDT"),
    ("ETHUSDT", "ETH", "USDT"),
    ("BNBUSDT", "BNB", "USDT"),
];

/// 지원 심볼 목록.
pub fn supported_symbols() -> Vec<SymbolInfo> {
    SUPPORTED_SYMBOLS
        .iter()
        .map(|(symbol, base, quote)| SymbolInfo {
            symbol: symbol.to_string(),
            base_asset: base.to_string(),
            quote_asset: quote.to_string(),
        })
        .collect()
}

/// GET /api/v1/symbols
pub async fn get_symbols() -> Json<ApiResponse<Vec<SymbolInfo>>> {
    Json(ApiResponse::success(supported_symbols()))
}

/// 심볼 라우터 생성.
pub fn symbols_router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(get_symbols))
}
