//! PostgreSQL 스토리지 구현.
//!
//! `klines` 테이블에 마감된 캔들을 저장하고 조회하는 repository를 제공합니다.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_core::{Candle, DatabaseConfig, FeedKey};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder};
use tracing::{debug, info, instrument};

use super::{CandleStore, KlineQuery, BATCH_CHUNK_SIZE};
use crate::error::{DataError, Result};

/// 데이터베이스 연결 풀 래퍼.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 새로운 데이터베이스 연결 풀을 생성합니다.
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .connect(url)
            .await
            .map_err(|e| DataError::ConnectionError(e.to_string()))?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// 기존 연결 풀에서 Database 인스턴스를 생성합니다.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 내부 연결 풀을 반환합니다.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// 데이터베이스 마이그레이션을 실행합니다.
    pub async fn migrate(&self) -> Result<()> {
        info!("Running database migrations...");

        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DataError::MigrationError(e.to_string()))?;

        info!("Migrations completed successfully");
        Ok(())
    }

    /// 데이터베이스 상태를 확인합니다.
    pub async fn health_check(&self) -> Result<bool> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| DataError::QueryError(e.to_string()))?;
        Ok(true)
    }
}

// =============================================================================
// Kline Repository
// =============================================================================

/// kline 데이터베이스 레코드.
#[derive(Debug, Clone, FromRow)]
pub struct KlineRecord {
    pub symbol: String,
    pub interval: String,
    pub open_time: i64,
    pub close_time: i64,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub close_price: Decimal,
    pub volume: Decimal,
    pub created_at: Option<DateTime<Utc>>,
}

impl TryFrom<KlineRecord> for Candle {
    type Error = DataError;

    fn try_from(record: KlineRecord) -> Result<Self> {
        let key = FeedKey::new(&record.symbol, &record.interval)
            .map_err(|e| DataError::InvalidData(e.to_string()))?;

        Ok(Candle::new(
            &key,
            record.open_time,
            record.close_time,
            record.open_price,
            record.high_price,
            record.low_price,
            record.close_price,
            record.volume,
        ))
    }
}

const UPSERT_CONFLICT_CLAUSE: &str = r#"
    ON CONFLICT (symbol, "interval", open_time) DO UPDATE SET
        close_time = EXCLUDED.close_time,
        open_price = EXCLUDED.open_price,
        high_price = EXCLUDED.high_price,
        low_price = EXCLUDED.low_price,
        close_price = EXCLUDED.close_price,
        volume = EXCLUDED.volume,
        updated_at = CURRENT_TIMESTAMP
"#;

/// kline 데이터 repository.
#[derive(Clone)]
pub struct KlineRepository {
    db: Database,
}

impl KlineRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// 내부 Database 핸들.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// 단일 kline을 upsert합니다.
    #[instrument(skip(self, candle), fields(symbol = %candle.symbol, interval = %candle.interval, open_time = candle.open_time))]
    pub async fn upsert(&self, candle: &Candle) -> Result<()> {
        let mut builder = Self::insert_builder(std::slice::from_ref(candle));
        builder.build().execute(self.db.pool()).await?;
        Ok(())
    }

    /// 여러 kline을 청크 단위로 upsert합니다.
    #[instrument(skip(self, candles), fields(count = candles.len()))]
    pub async fn upsert_batch(&self, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut affected = 0;
        for chunk in candles.chunks(BATCH_CHUNK_SIZE) {
            let mut builder = Self::insert_builder(chunk);
            let result = builder.build().execute(self.db.pool()).await?;
            affected += result.rows_affected() as usize;
        }

        debug!(affected, "Upserted klines");
        Ok(affected)
    }

    /// 조건에 맞는 kline을 최신순으로 조회합니다.
    #[instrument(skip(self))]
    pub async fn query(&self, query: &KlineQuery) -> Result<Vec<KlineRecord>> {
        let mut builder = Self::select_builder(query);
        let records = builder
            .build_query_as::<KlineRecord>()
            .fetch_all(self.db.pool())
            .await?;
        Ok(records)
    }

    fn insert_builder(candles: &[Candle]) -> QueryBuilder<'_, Postgres> {
        let mut builder = QueryBuilder::new(
            r#"INSERT INTO klines (symbol, "interval", open_time, close_time, open_price, high_price, low_price, close_price, volume) "#,
        );
        builder.push_values(candles, |mut row, candle| {
            row.push_bind(&candle.symbol)
                .push_bind(candle.interval.to_binance_interval())
                .push_bind(candle.open_time)
                .push_bind(candle.close_time)
                .push_bind(candle.open)
                .push_bind(candle.high)
                .push_bind(candle.low)
                .push_bind(candle.close)
                .push_bind(candle.volume);
        });
        builder.push(UPSERT_CONFLICT_CLAUSE);
        builder
    }

    fn select_builder(query: &KlineQuery) -> QueryBuilder<'_, Postgres> {
        let mut builder = QueryBuilder::new(
            r#"SELECT symbol, "interval", open_time, close_time, open_price, high_price, low_price, close_price, volume, created_at FROM klines WHERE symbol = "#,
        );
        builder.push_bind(query.key.symbol());
        builder.push(r#" AND "interval" = "#);
        builder.push_bind(query.key.interval().to_binance_interval());

        if let Some(start) = query.start_time {
            builder.push(" AND open_time >= ");
            builder.push_bind(start);
        }
        if let Some(end) = query.end_time {
            builder.push(" AND open_time <= ");
            builder.push_bind(end);
        }

        builder.push(" ORDER BY open_time DESC");

        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(i64::from(limit));
        }
        builder
    }
}

#[async_trait]
impl CandleStore for KlineRepository {
    async fn store(&self, candle: &Candle) -> Result<()> {
        self.upsert(candle).await
    }

    async fn store_batch(&self, candles: &[Candle]) -> Result<usize> {
        self.upsert_batch(candles).await
    }

    async fn retrieve(&self, query: &KlineQuery) -> Result<Vec<Candle>> {
        self.query(query)
            .await?
            .into_iter()
            .map(Candle::try_from)
            .collect()
    }

    async fn health_check(&self) -> Result<bool> {
        self.db.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn key() -> FeedKey {
        FeedKey::new("BTCUSDT", "1m").unwrap()
    }

    fn candle(open_time: i64) -> Candle {
        Candle::new(
            &key(),
            open_time,
            open_time + 59_999,
            dec!(1),
            dec!(2),
            dec!(0.5),
            dec!(1.5),
            dec!(10),
        )
    }

    #[test]
    fn test_select_sql_with_all_filters() {
        let query = KlineQuery::new(key())
            .with_range(Some(1), Some(2))
            .with_limit(10);
        let builder = KlineRepository::select_builder(&query);
        let sql = builder.sql();

        assert!(sql.contains(r#"WHERE symbol = $1 AND "interval" = $2"#));
        assert!(sql.contains("open_time >= $3"));
        assert!(sql.contains("open_time <= $4"));
        assert!(sql.contains("ORDER BY open_time DESC LIMIT $5"));
    }

    #[test]
    fn test_select_sql_without_filters() {
        let query = KlineQuery::new(key());
        let builder = KlineRepository::select_builder(&query);
        let sql = builder.sql();

        assert!(!sql.contains("open_time >="));
        assert!(!sql.contains("LIMIT"));
        assert!(sql.ends_with("ORDER BY open_time DESC"));
    }

    #[test]
    fn test_insert_sql_has_one_tuple_per_candle() {
        let candles = vec![candle(0), candle(60_000)];
        let builder = KlineRepository::insert_builder(&candles);
        let sql = builder.sql();

        assert!(sql.contains("($1, $2, $3, $4, $5, $6, $7, $8, $9), ($10,"));
        assert!(sql.contains(r#"ON CONFLICT (symbol, "interval", open_time) DO UPDATE"#));
    }

    #[test]
    fn test_record_into_candle() {
        let record = KlineRecord {
            symbol: "ETHUSDT".to_string(),
            interval: "1h".to_string(),
            open_time: 1,
            close_time: 2,
            open_price: dec!(3000),
            high_price: dec!(3100),
            low_price: dec!(2900),
            close_price: dec!(3050),
            volume: dec!(42),
            created_at: None,
        };
        let candle = Candle::try_from(record).unwrap();

        assert_eq!(candle.key(), FeedKey::new("ETHUSDT", "1h").unwrap());
        assert_eq!(candle.close, dec!(3050));
    }

    #[test]
    fn test_record_with_unknown_interval_is_invalid() {
        let record = KlineRecord {
            symbol: "ETHUSDT".to_string(),
            interval: "9x".to_string(),
            open_time: 1,
            close_time: 2,
            open_price: dec!(1),
            high_price: dec!(1),
            low_price: dec!(1),
            close_price: dec!(1),
            volume: dec!(1),
            created_at: None,
        };
        assert!(matches!(Candle::try_from(record), Err(DataError::InvalidData(_))));
    }
}
