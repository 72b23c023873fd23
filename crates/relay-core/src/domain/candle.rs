//! 캔들(kline) 데이터 구조체.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{FeedKey, Timeframe};

/// 가격/수량 문자열의 소수 자릿수.
pub const PRICE_SCALE: u32 = 8;

/// 마감된 OHLCV 캔들.
///
/// 시간 필드는 거래소 기준 밀리초 타임스탬프입니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// 정규화된 심볼
    pub symbol: String,
    /// 간격
    pub interval: Timeframe,
    /// 캔들 시작 시간 (ms)
    pub open_time: i64,
    /// 캔들 종료 시간 (ms)
    pub close_time: i64,
    /// 시가
    pub open: Decimal,
    /// 고가
    pub high: Decimal,
    /// 저가
    pub low: Decimal,
    /// 종가
    pub close: Decimal,
    /// 거래량 (기준 자산 단위)
    pub volume: Decimal,
}

impl Candle {
    /// 새 캔들을 생성합니다.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        key: &FeedKey,
        open_time: i64,
        close_time: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            symbol: key.symbol().to_string(),
            interval: key.interval(),
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// 이 캔들이 속한 피드 키.
    pub fn key(&self) -> FeedKey {
        FeedKey::normalized(&self.symbol, self.interval)
    }
}

/// 가격을 소수점 8자리 고정 문자열로 변환합니다.
///
/// 8자리를 넘는 값은 은행가 반올림(half-even)으로 자릅니다.
pub fn format_price(value: Decimal) -> String {
    let mut rounded = value.round_dp(PRICE_SCALE);
    rounded.rescale(PRICE_SCALE);
    rounded.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn sample_key() -> FeedKey {
        FeedKey::new("btcusdt", "1m").unwrap()
    }

    #[test]
    fn test_candle_key_matches_source_key() {
        let key = sample_key();
        let candle = Candle::new(
            &key,
            1_700_000_000_000,
            1_700_000_059_999,
            dec!(50000),
            dec!(50100),
            dec!(49900),
            dec!(50050),
            dec!(12.5),
        );

        assert_eq!(candle.symbol, "BTCUSDT");
        assert_eq!(candle.key(), key);
    }

    #[test]
    fn test_format_price_pads_to_eight_places() {
        assert_eq!(format_price(dec!(50000)), "50000.00000000");
        assert_eq!(format_price(dec!(0.1)), "0.10000000");
        assert_eq!(format_price(dec!(-1.5)), "-1.50000000");
        assert_eq!(format_price(Decimal::ZERO), "0.00000000");
    }

    #[test]
    fn test_format_price_rounds_half_even() {
        assert_eq!(format_price(dec!(1.000000005)), "1.00000000");
        assert_eq!(format_price(dec!(1.000000015)), "1.00000002");
        assert_eq!(format_price(dec!(1.123456789)), "1.12345679");
    }

    proptest! {
        #[test]
        fn prop_format_price_always_has_eight_decimals(units in -1_000_000_000i64..1_000_000_000i64, scale in 0u32..12) {
            let value = Decimal::new(units, scale);
            let text = format_price(value);
            let (_, frac) = text.split_once('.').unwrap();
            prop_assert_eq!(frac.len(), 8);
        }
    }
}
