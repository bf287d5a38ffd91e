//! In-memory ledger
//!
//! Used when no database is configured, and by tests to inspect what the
//! engine and feeds persisted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    Ledger, LedgerError, LedgerResult, PortfolioValueRecord, PositionRecord, TransactionRecord,
};

#[derive(Debug, Default)]
struct Tables {
    executions: HashMap<String, (Uuid, serde_json::Value)>,
    pairs: HashMap<String, Uuid>,
    transactions: Vec<TransactionRecord>,
    positions: Vec<PositionRecord>,
    portfolio_values: Vec<PortfolioValueRecord>,
}

/// Shared in-memory store
///
/// Cloning yields another session on the same tables, each with its own
/// closed flag.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    tables: Arc<Mutex<Tables>>,
    fail_writes: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// New session over the same tables
    pub fn session(&self) -> Self {
        Self {
            tables: Arc::clone(&self.tables),
            fail_writes: Arc::clone(&self.fail_writes),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every append fail until reset
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn transactions(&self) -> Vec<TransactionRecord> {
        self.tables.lock().transactions.clone()
    }

    pub fn positions(&self) -> Vec<PositionRecord> {
        self.tables.lock().positions.clone()
    }

    pub fn portfolio_values(&self) -> Vec<PortfolioValueRecord> {
        self.tables.lock().portfolio_values.clone()
    }

    pub fn execution_count(&self) -> usize {
        self.tables.lock().executions.len()
    }

    pub fn pair_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.tables.lock().pairs.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    fn check_writable(&self) -> LedgerResult<()> {
        if self.is_closed() {
            return Err(LedgerError::Closed);
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::Database("write failure injected".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get_or_create_execution(
        &self,
        name: &str,
        parameters: &serde_json::Value,
    ) -> LedgerResult<Uuid> {
        if self.is_closed() {
            return Err(LedgerError::Closed);
        }
        let mut tables = self.tables.lock();
        let (id, _) = tables
            .executions
            .entry(name.to_string())
            .or_insert_with(|| (Uuid::new_v4(), parameters.clone()));
        Ok(*id)
    }

    async fn get_or_create_pair(&self, symbol: &str) -> LedgerResult<Uuid> {
        if self.is_closed() {
            return Err(LedgerError::Closed);
        }
        let mut tables = self.tables.lock();
        Ok(*tables
            .pairs
            .entry(symbol.to_string())
            .or_insert_with(Uuid::new_v4))
    }

    async fn find_pair(&self, symbol: &str) -> LedgerResult<Option<Uuid>> {
        if self.is_closed() {
            return Err(LedgerError::Closed);
        }
        Ok(self.tables.lock().pairs.get(symbol).copied())
    }

    async fn append_transaction(&self, record: &TransactionRecord) -> LedgerResult<()> {
        self.check_writable()?;
        self.tables.lock().transactions.push(record.clone());
        Ok(())
    }

    async fn append_positions(&self, records: &[PositionRecord]) -> LedgerResult<()> {
        self.check_writable()?;
        self.tables.lock().positions.extend_from_slice(records);
        Ok(())
    }

    async fn append_portfolio_value(&self, record: &PortfolioValueRecord) -> LedgerResult<()> {
        self.check_writable()?;
        self.tables.lock().portfolio_values.push(record.clone());
        Ok(())
    }

    async fn close(&self) -> LedgerResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
