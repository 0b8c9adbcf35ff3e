//! PostgreSQL result store

use crate::config::StoreConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::store::{FraudSummary, PutOutcome, ReportWindow, ResultStore};
use crate::types::scored::ScoredTransaction;
use crate::types::transaction::Transaction;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::info;

/// Scored transactions in a Postgres table keyed by `transaction_id`
#[derive(Debug, Clone)]
pub struct PgResultStore {
    pool: PgPool,
    table: String,
}

#[derive(Debug, FromRow)]
struct StoredRow {
    transaction_id: String,
    timestamp: NaiveDateTime,
    amount: f64,
    category: String,
    merchant: String,
    gender: String,
    city_pop: i64,
    lat: Option<f64>,
    long: Option<f64>,
    fraud_probability: f64,
    predicted_fraud: bool,
}

impl From<StoredRow> for ScoredTransaction {
    fn from(row: StoredRow) -> Self {
        Self {
            transaction: Transaction {
                transaction_id: row.transaction_id,
                timestamp: row.timestamp,
                amount: row.amount,
                category: row.category,
                merchant: row.merchant,
                gender: row.gender,
                city_pop: row.city_pop,
                lat: row.lat,
                long: row.long,
            },
            fraud_probability: row.fraud_probability,
            predicted_fraud: row.predicted_fraud,
        }
    }
}

impl PgResultStore {
    /// Open a connection pool. Fails when the database cannot be reached.
    pub async fn connect(config: &StoreConfig) -> PipelineResult<Self> {
        check_table_name(&config.table)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
            .connect(&config.database_url)
            .await
            .map_err(|e| PipelineError::StoreUnavailable(format!("cannot connect to database: {e}")))?;

        info!(table = %config.table, max_connections = config.max_connections, "Connected to PostgreSQL");

        Ok(Self {
            pool,
            table: config.table.clone(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl ResultStore for PgResultStore {
    async fn ensure_schema(&self) -> PipelineResult<()> {
        sqlx::query(&create_table_sql(&self.table))
            .execute(&self.pool)
            .await
            .map_err(read_error)?;

        info!(table = %self.table, "Result table is ready");
        Ok(())
    }

    async fn put(&self, scored: &ScoredTransaction) -> PipelineResult<PutOutcome> {
        let tx = &scored.transaction;

        let result = sqlx::query(&insert_sql(&self.table))
            .bind(&tx.transaction_id)
            .bind(tx.timestamp)
            .bind(tx.amount)
            .bind(&tx.category)
            .bind(&tx.merchant)
            .bind(&tx.gender)
            .bind(tx.city_pop)
            .bind(tx.lat)
            .bind(tx.long)
            .bind(scored.fraud_probability)
            .bind(scored.predicted_fraud)
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(e, &tx.transaction_id))?;

        Ok(if result.rows_affected() == 0 {
            PutOutcome::AlreadyPresent
        } else {
            PutOutcome::Inserted
        })
    }

    async fn get(&self, transaction_id: &str) -> PipelineResult<Option<ScoredTransaction>> {
        let sql = format!("{} WHERE transaction_id = $1", select_sql(&self.table));

        let row = sqlx::query_as::<_, StoredRow>(&sql)
            .bind(transaction_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(read_error)?;

        Ok(row.map(ScoredTransaction::from))
    }

    async fn summary(&self, window: ReportWindow) -> PipelineResult<FraudSummary> {
        let (total, frauds, avg_prob, max_prob, total_amount, avg_amount, fraud_amount) =
            sqlx::query_as::<_, (i64, i64, f64, f64, f64, f64, f64)>(&summary_sql(&self.table))
                .bind(window.start)
                .bind(window.end)
                .fetch_one(&self.pool)
                .await
                .map_err(read_error)?;

        Ok(FraudSummary {
            total_transactions: total as u64,
            fraud_count: frauds as u64,
            legitimate_count: (total - frauds) as u64,
            avg_fraud_probability: avg_prob,
            max_fraud_probability: max_prob,
            total_amount,
            avg_amount,
            fraud_amount,
        })
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

/// Table names are interpolated into SQL, so only plain identifiers are allowed.
fn check_table_name(table: &str) -> PipelineResult<()> {
    let valid = !table.is_empty()
        && table.len() <= 63
        && table.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(PipelineError::Config(format!("invalid table name `{table}`")))
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            transaction_id VARCHAR(255) PRIMARY KEY,
            timestamp TIMESTAMP NOT NULL,
            amount NUMERIC(12, 2) NOT NULL,
            category VARCHAR(100) NOT NULL,
            merchant VARCHAR(255) NOT NULL,
            gender VARCHAR(10) NOT NULL,
            city_pop BIGINT NOT NULL,
            lat DOUBLE PRECISION,
            long DOUBLE PRECISION,
            fraud_probability DOUBLE PRECISION NOT NULL,
            predicted_fraud BOOLEAN NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#
    )
}

fn insert_sql(table: &str) -> String {
    format!(
        r#"
        INSERT INTO {table}
            (transaction_id, timestamp, amount, category, merchant, gender,
             city_pop, lat, long, fraud_probability, predicted_fraud)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (transaction_id) DO NOTHING
        "#
    )
}

fn select_sql(table: &str) -> String {
    format!(
        "SELECT transaction_id, timestamp, amount::FLOAT8 AS amount, category, merchant, gender, \
         city_pop, lat, long, fraud_probability, predicted_fraud FROM {table}"
    )
}

fn summary_sql(table: &str) -> String {
    format!(
        r#"
        SELECT
            COUNT(*)::BIGINT,
            COUNT(*) FILTER (WHERE predicted_fraud)::BIGINT,
            COALESCE(AVG(fraud_probability), 0)::FLOAT8,
            COALESCE(MAX(fraud_probability), 0)::FLOAT8,
            COALESCE(SUM(amount), 0)::FLOAT8,
            COALESCE(AVG(amount), 0)::FLOAT8,
            COALESCE(SUM(amount) FILTER (WHERE predicted_fraud), 0)::FLOAT8
        FROM {table}
        WHERE timestamp >= $1 AND timestamp < $2
        "#
    )
}

/// Lost or unobtainable connections, as opposed to rejected statements
fn is_connectivity(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Protocol(_) => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_connection_sqlstate(&code)),
        _ => false,
    }
}

/// SQLSTATEs the server sends when the session is going away or cannot be opened:
/// class 08 (connection exception), 57P01-57P03 (shutdown) and 53300 (too many connections).
fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03" | "53300")
}

fn write_error(e: sqlx::Error, transaction_id: &str) -> PipelineError {
    if is_connectivity(&e) {
        PipelineError::StoreUnavailable(e.to_string())
    } else {
        PipelineError::StoreIntegrity {
            transaction_id: transaction_id.to_string(),
            reason: e.to_string(),
        }
    }
}

fn read_error(e: sqlx::Error) -> PipelineError {
    PipelineError::StoreUnavailable(e.to_string())
}
