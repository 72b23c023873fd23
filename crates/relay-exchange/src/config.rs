//! Binance 연결 설정.

use relay_core::ExchangeConfig;

const MAINNET_REST_URL: &str = "https://api.binance.com";
const MAINNET_WS_URL: &str = "wss://stream.binance.com:9443/ws";
const TESTNET_REST_URL: &str = "https://testnet.binance.vision";
const TESTNET_WS_URL: &str = "wss://stream.testnet.binance.vision/ws";

/// Binance 클라이언트 설정.
///
/// 시장 데이터만 다루므로 API 키가 필요 없습니다.
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    /// 테스트넷 사용
    pub testnet: bool,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    rest_base_url: Option<String>,
    ws_base_url: Option<String>,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            testnet: true,
            timeout_secs: 30,
            rest_base_url: None,
            ws_base_url: None,
        }
    }
}

impl BinanceConfig {
    /// 메인넷 설정 생성.
    pub fn mainnet() -> Self {
        Self {
            testnet: false,
            ..Default::default()
        }
    }

    /// 테스트넷 사용.
    pub fn with_testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    /// REST 기본 URL 재지정 (테스트 서버, 프록시 등).
    pub fn with_rest_base_url(mut self, url: impl Into<String>) -> Self {
        self.rest_base_url = Some(url.into());
        self
    }

    /// WebSocket 기본 URL 재지정.
    pub fn with_ws_base_url(mut self, url: impl Into<String>) -> Self {
        self.ws_base_url = Some(url.into());
        self
    }

    /// 애플리케이션 설정에서 생성.
    pub fn from_settings(settings: &ExchangeConfig) -> Self {
        Self {
            testnet: settings.testnet,
            timeout_secs: settings.timeout_secs,
            rest_base_url: settings.rest_base_url.clone(),
            ws_base_url: settings.ws_base_url.clone(),
        }
    }

    /// REST API 기본 URL 반환.
    pub fn rest_base_url(&self) -> &str {
        match &self.rest_base_url {
            Some(url) => url.trim_end_matches('/'),
            None if self.testnet => TESTNET_REST_URL,
            None => MAINNET_REST_URL,
        }
    }

    /// WebSocket 기본 URL 반환.
    pub fn ws_base_url(&self) -> &str {
        match &self.ws_base_url {
            Some(url) => url.trim_end_matches('/'),
            None if self.testnet => TESTNET_WS_URL,
            None => MAINNET_WS_URL,
        }
    }
}
