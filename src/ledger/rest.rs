//! Supabase/PostgREST ledger
//!
//! Tables live under one schema (`execution`, `pairs`, `transaction`,
//! `positions`, `portfolio_value`) selected with the profile headers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::LedgerConfig;

use super::{
    Ledger, LedgerError, LedgerResult, PortfolioValueRecord, PositionRecord, TransactionRecord,
};

const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct IdRow {
    id: Uuid,
}

#[derive(Debug, Serialize)]
struct NewExecution<'a> {
    name: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Serialize)]
struct NewPair<'a> {
    symbol: &'a str,
}

/// One PostgREST session with its own HTTP client
pub struct RestLedger {
    base_url: String,
    client: reqwest::Client,
    closed: AtomicBool,
}

impl RestLedger {
    /// Open a session
    ///
    /// # Errors
    /// `LedgerError::InvalidData` if the key or schema cannot be used as a header value.
    pub fn new(config: &LedgerConfig) -> LedgerResult<Self> {
        let header = |value: &str| {
            HeaderValue::from_str(value)
                .map_err(|e| LedgerError::InvalidData(format!("invalid header value: {}", e)))
        };

        let mut headers = HeaderMap::new();
        headers.insert("apikey", header(&config.api_key)?);
        headers.insert(AUTHORIZATION, header(&format!("Bearer {}", config.api_key))?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("Accept-Profile", header(&config.schema)?);
        headers.insert("Content-Profile", header(&config.schema)?);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            base_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            client,
            closed: AtomicBool::new(false),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    fn ensure_open(&self) -> LedgerResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LedgerError::Closed);
        }
        Ok(())
    }

    /// `GET /{table}?select=id&{column}=eq.{value}`
    async fn find_id(&self, table: &str, column: &str, value: &str) -> LedgerResult<Option<Uuid>> {
        self.ensure_open()?;
        let response = self
            .client
            .get(self.table_url(table))
            .query(&[("select", "id".to_string()), (column, format!("eq.{}", value))])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(LedgerError::Database(format!(
                "lookup in {} failed {}: {}",
                table, status, body
            )));
        }

        let rows: Vec<IdRow> = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidData(format!("{} lookup: {}", table, e)))?;
        Ok(rows.first().map(|row| row.id))
    }

    /// Insert one row and return its id; a unique-key conflict re-reads the winner
    async fn insert_returning_id<T: Serialize + Sync>(
        &self,
        table: &str,
        row: &T,
        column: &str,
        value: &str,
    ) -> LedgerResult<Uuid> {
        self.ensure_open()?;
        let response = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let rows: Vec<IdRow> = response
                    .json()
                    .await
                    .map_err(|e| LedgerError::InvalidData(format!("{} insert: {}", table, e)))?;
                rows.first()
                    .map(|row| row.id)
                    .ok_or_else(|| LedgerError::InvalidData(format!("{} insert returned no row", table)))
            }
            StatusCode::CONFLICT => {
                tracing::debug!(table = %table, key = %value, "Row created concurrently, re-reading");
                self.find_id(table, column, value).await?.ok_or_else(|| {
                    LedgerError::Database(format!("{} '{}' conflicted but was not found", table, value))
                })
            }
            status => {
                let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
                Err(LedgerError::Database(format!(
                    "insert into {} failed {}: {}",
                    table, status, body
                )))
            }
        }
    }

    /// Append rows without reading them back
    async fn append<T: Serialize + ?Sized + Sync>(&self, table: &str, rows: &T) -> LedgerResult<()> {
        self.ensure_open()?;
        let response = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::UNAUTHORIZED => Err(LedgerError::Database(
                "Invalid ledger credentials".to_string(),
            )),
            status => {
                let body = response.text().await.unwrap_or_else(|_| "<no body>".to_string());
                tracing::error!(
                    table = %table,
                    status = %status,
                    response_body = %body,
                    "Failed to append to ledger"
                );
                Err(LedgerError::Database(format!("{} error {}: {}", table, status, body)))
            }
        }
    }
}

#[async_trait]
impl Ledger for RestLedger {
    async fn get_or_create_execution(
        &self,
        name: &str,
        parameters: &serde_json::Value,
    ) -> LedgerResult<Uuid> {
        if let Some(id) = self.find_id("execution", "name", name).await? {
            return Ok(id);
        }
        let id = self
            .insert_returning_id("execution", &NewExecution { name, parameters }, "name", name)
            .await?;
        tracing::info!(execution = %name, execution_id = %id, "Execution created");
        Ok(id)
    }

    async fn get_or_create_pair(&self, symbol: &str) -> LedgerResult<Uuid> {
        if let Some(id) = self.find_id("pairs", "symbol", symbol).await? {
            return Ok(id);
        }
        self.insert_returning_id("pairs", &NewPair { symbol }, "symbol", symbol)
            .await
    }

    async fn find_pair(&self, symbol: &str) -> LedgerResult<Option<Uuid>> {
        self.find_id("pairs", "symbol", symbol).await
    }

    async fn append_transaction(&self, record: &TransactionRecord) -> LedgerResult<()> {
        self.append("transaction", record).await
    }

    async fn append_positions(&self, records: &[PositionRecord]) -> LedgerResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.append("positions", records).await
    }

    async fn append_portfolio_value(&self, record: &PortfolioValueRecord) -> LedgerResult<()> {
        self.append("portfolio_value", record).await
    }

    async fn close(&self) -> LedgerResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
