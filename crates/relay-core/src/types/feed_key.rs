//! 피드 키: (심볼, 간격) 쌍.
//!
//! 업스트림 구독 중복 제거와 팬아웃 주소 지정에 쓰이는 유일한 식별자입니다.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::timeframe::Timeframe;
use crate::error::{RelayError, RelayResult};

/// 심볼 또는 간격이 비어 있을 때의 메시지.
pub const MISSING_KEY_PARTS: &str = "Symbol and interval are required";

/// 하나의 시장 데이터 스트림 식별자.
///
/// 심볼은 공백을 제거하고 대문자로 정규화됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedKey {
    symbol: String,
    interval: Timeframe,
}

impl FeedKey {
    /// 원시 문자열에서 피드 키를 생성합니다.
    ///
    /// # Errors
    ///
    /// - 둘 중 하나라도 비어 있으면 `"Symbol and interval are required"`
    /// - 간격이 Binance 간격이 아니면 `"Invalid interval: <값>"`
    pub fn new(symbol: &str, interval: &str) -> RelayResult<Self> {
        let symbol = symbol.trim();
        let interval = interval.trim();

        if symbol.is_empty() || interval.is_empty() {
            return Err(RelayError::InvalidInput(MISSING_KEY_PARTS.to_string()));
        }
        if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(RelayError::InvalidInput(format!("Invalid symbol: {}", symbol)));
        }

        let interval = interval.parse::<Timeframe>().map_err(RelayError::InvalidInput)?;

        Ok(Self {
            symbol: symbol.to_ascii_uppercase(),
            interval,
        })
    }

    /// 이미 검증된 타임프레임으로 생성합니다.
    pub fn from_parts(symbol: &str, interval: Timeframe) -> RelayResult<Self> {
        Self::new(symbol, interval.to_binance_interval())
    }

    /// 검증 없이 심볼만 대문자로 맞춥니다. 이미 검증된 값에서 키를 복원할 때 사용합니다.
    pub(crate) fn normalized(symbol: &str, interval: Timeframe) -> Self {
        Self {
            symbol: symbol.trim().to_ascii_uppercase(),
            interval,
        }
    }

    /// 정규화된 심볼 (예: `BTCUSDT`).
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// 간격.
    pub fn interval(&self) -> Timeframe {
        self.interval
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_feed_key_normalizes_symbol() {
        let key = FeedKey::new(" btcusdt ", "1m").unwrap();
        assert_eq!(key.symbol(), "BTCUSDT");
        assert_eq!(key.interval(), Timeframe::M1);
        assert_eq!(key.to_string(), "BTCUSDT:1m");
    }

    #[test]
    fn test_feed_key_requires_both_parts() {
        let err = FeedKey::new("", "1m").unwrap_err();
        assert_eq!(err.to_string(), MISSING_KEY_PARTS);

        let err = FeedKey::new("BTCUSDT", "  ").unwrap_err();
        assert_eq!(err.to_string(), MISSING_KEY_PARTS);
    }

    #[test]
    fn test_feed_key_rejects_unknown_interval() {
        let err = FeedKey::new("BTCUSDT", "7m").unwrap_err();
        assert_eq!(err.to_string(), "Invalid interval: 7m");
    }

    #[test]
    fn test_feed_key_rejects_separator_in_symbol() {
        assert!(FeedKey::new("BTC:USDT", "1m").is_err());
        assert!(FeedKey::new("BTC/USDT", "1m").is_err());
    }

    proptest! {
        #[test]
        fn prop_case_variants_share_one_key(symbol in "[a-zA-Z0-9]{1,12}") {
            let lower = FeedKey::new(&symbol.to_lowercase(), "5m").unwrap();
            let upper = FeedKey::new(&symbol.to_uppercase(), "5m").unwrap();
            prop_assert_eq!(&lower, &upper);
            prop_assert_eq!(lower.to_string(), format!("{}:5m", symbol.to_uppercase()));
        }
    }
}
