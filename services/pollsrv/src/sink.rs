//! Persistence sink
//!
//! Append-only storage of readings. [`SqliteSink`] writes one row per
//! reading into the `readings` table. `None` stands in for the sink when
//! storage is not opened (dry-run).

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::sqlite::SqliteClient;
use tracing::debug;

/// Value carried by a reading; exactly one column is populated per row
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReadingValue {
    /// Scaled measurement, stored in `valueFloat`
    Float(f64),
    /// Raw status word, stored in `valueInt`
    Int(u64),
}

/// One persisted (timestamp, device, sensor, value) record
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub device: String,
    pub sensor: String,
    pub value: ReadingValue,
}

/// Durable single-row append capability
#[async_trait]
pub trait ReadingSink: Send + Sync {
    async fn insert_reading(&self, reading: &Reading) -> anyhow::Result<()>;

    /// Human readable location, for logs
    fn describe(&self) -> String;
}

#[async_trait]
impl<K: ReadingSink> ReadingSink for Option<K> {
    async fn insert_reading(&self, reading: &Reading) -> anyhow::Result<()> {
        match self {
            Some(sink) => sink.insert_reading(reading).await,
            None => bail!("no storage opened; {} not written", reading.sensor),
        }
    }

    fn describe(&self) -> String {
        match self {
            Some(sink) => sink.describe(),
            None => "nothing (dry run)".to_string(),
        }
    }
}

const CREATE_READINGS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS readings (
        ts TIMESTAMP NOT NULL,
        device TEXT NOT NULL,
        sensor TEXT NOT NULL,
        valueInt INTEGER,
        valueFloat REAL
    )
"#;

/// SQLite-backed sink
#[derive(Clone)]
pub struct SqliteSink {
    client: SqliteClient,
}

impl SqliteSink {
    pub fn new(client: SqliteClient) -> Self {
        Self { client }
    }

    /// Open (or create) the database at `path` and make sure the table exists
    pub async fn open(path: &str) -> anyhow::Result<Self> {
        let client = SqliteClient::new(path).await?;
        client.ping().await?;
        let sink = Self::new(client);
        sink.ensure_schema().await?;
        Ok(sink)
    }

    /// Create the `readings` table if missing
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        debug!("Init readings table");
        sqlx::query(CREATE_READINGS_TABLE)
            .execute(self.client.pool())
            .await?;
        Ok(())
    }

    pub fn client(&self) -> &SqliteClient {
        &self.client
    }
}

#[async_trait]
impl ReadingSink for SqliteSink {
    async fn insert_reading(&self, reading: &Reading) -> anyhow::Result<()> {
        match reading.value {
            ReadingValue::Int(value) => {
                let Ok(value) = i64::try_from(value) else {
                    bail!("status value {value} does not fit a signed 64-bit column");
                };
                sqlx::query(
                    "INSERT INTO readings(ts, device, sensor, valueInt) VALUES (?, ?, ?, ?)",
                )
                .bind(reading.timestamp)
                .bind(&reading.device)
                .bind(&reading.sensor)
                .bind(value)
                .execute(self.client.pool())
                .await?;
            },
            ReadingValue::Float(value) => {
                sqlx::query(
                    "INSERT INTO readings(ts, device, sensor, valueFloat) VALUES (?, ?, ?, ?)",
                )
                .bind(reading.timestamp)
                .bind(&reading.device)
                .bind(&reading.sensor)
                .bind(value)
                .execute(self.client.pool())
                .await?;
            },
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.client.path().to_string()
    }
}
