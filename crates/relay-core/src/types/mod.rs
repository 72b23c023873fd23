//! 공통 타입 정의.

pub mod feed_key;
pub mod timeframe;

pub use feed_key::*;
pub use timeframe::*;
