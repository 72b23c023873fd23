//! 캔들 데이터 저장.
//!
//! 이 crate는 다음을 제공합니다:
//! - CandleStore trait: 저장/조회 인터페이스
//! - PostgreSQL 저장소 (`klines` 테이블, upsert)
//! - 메모리 저장소 (데이터베이스 없이 실행할 때)

pub mod error;
pub mod storage;

pub use error::{DataError, Result};

// 저장소 타입 재내보내기
pub use storage::memory::InMemoryCandleStore;
pub use storage::postgres::{Database, KlineRecord, KlineRepository};
pub use storage::{CandleStore, KlineQuery};
