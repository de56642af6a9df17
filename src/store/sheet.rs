//! # store::sheet
//!
//! Spreadsheet ledger.
//!
//! One row per position:
//!
//! | A    | B      | C         | D     | E  | F   | G   | H   | I   | J      | K      |
//! |------|--------|-----------|-------|----|-----|-----|-----|-----|--------|--------|
//! | DATE | SYMBOL | DIRECTION | ENTRY | SL | TP1 | TP2 | TP3 | TP4 | RESULT | PROFIT |
//!
//! The row is appended on open, level columns get `HIT` as they are reached,
//! RESULT and PROFIT are written once at finalization.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::StoreError;
use crate::models::{CloseReason, Level, Position, TradeRecord};
use crate::store::TradeStore;

pub const HEADER: [&str; 11] = [
    "DATE", "SYMBOL", "DIRECTION", "ENTRY", "SL", "TP1", "TP2", "TP3", "TP4", "RESULT", "PROFIT",
];

// 1-based column indices
const COL_SYMBOL: usize = 2;
const COL_SL:     usize = 5;
const COL_RESULT: usize = 10;
const COL_PROFIT: usize = 11;

const HIT: &str = "HIT";

/// Row-oriented record keeping. Rows and columns are 1-based, row 1 is the header.
#[async_trait]
pub trait SheetBackend: Send + Sync {
    /// Append a row, returning its index.
    async fn append_row(&self, values: Vec<String>) -> Result<usize, StoreError>;

    /// Most recent row for `symbol` whose RESULT cell is still empty.
    async fn find_row(&self, symbol: &str) -> Result<Option<usize>, StoreError>;

    async fn update_cell(&self, row: usize, col: usize, value: &str) -> Result<(), StoreError>;
}

// ─── MemorySheet ──────────────────────────────────────────────────────────────

/// Data rows kept by [`MemorySheet::new`].
pub const SHEET_CAPACITY: usize = 2_000;

#[derive(Debug, Default)]
struct Rows {
    data:    VecDeque<Vec<String>>,
    /// Data rows dropped from the front so far.
    evicted: usize,
}

impl Rows {
    /// Sheet row number of `data[index]` (row 1 is the header).
    fn number(&self, index: usize) -> usize {
        self.evicted + index + 2
    }

    fn index(&self, row: usize) -> Option<usize> {
        row.checked_sub(self.evicted + 2)
    }
}

/// In-process sheet served by the monitor API. Keeps the most recent
/// `capacity` data rows; row numbers stay stable when old rows are evicted.
#[derive(Debug)]
pub struct MemorySheet {
    rows:     RwLock<Rows>,
    capacity: usize,
}

impl MemorySheet {
    pub fn new() -> Self {
        Self::with_capacity(SHEET_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows:     RwLock::new(Rows::default()),
            capacity: capacity.max(1),
        }
    }

    /// Header followed by every retained row.
    pub async fn rows(&self) -> Vec<Vec<String>> {
        let rows = self.rows.read().await;
        std::iter::once(HEADER.iter().map(|h| h.to_string()).collect())
            .chain(rows.data.iter().cloned())
            .collect()
    }
}

impl Default for MemorySheet {
    fn default() -> Self { Self::new() }
}

#[async_trait]
impl SheetBackend for MemorySheet {
    async fn append_row(&self, mut values: Vec<String>) -> Result<usize, StoreError> {
        values.resize(HEADER.len(), String::new());
        let mut rows = self.rows.write().await;
        if rows.data.len() == self.capacity {
            rows.data.pop_front();
            rows.evicted += 1;
        }
        rows.data.push_back(values);
        Ok(rows.number(rows.data.len() - 1))
    }

    async fn find_row(&self, symbol: &str) -> Result<Option<usize>, StoreError> {
        let rows = self.rows.read().await;
        let found = rows
            .data
            .iter()
            .enumerate()
            .rev()
            .find(|(_, row)| {
                row.get(COL_SYMBOL - 1).is_some_and(|s| s == symbol)
                    && row.get(COL_RESULT - 1).is_some_and(|r| r.is_empty())
            })
            .map(|(i, _)| rows.number(i));
        Ok(found)
    }

    async fn update_cell(&self, row: usize, col: usize, value: &str) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let index = rows.index(row);
        let cell = index
            .and_then(|i| rows.data.get_mut(i))
            .and_then(|r| col.checked_sub(1).and_then(|c| r.get_mut(c)))
            .ok_or_else(|| StoreError::Rejected(format!("cell ({row}, {col}) out of range")))?;
        *cell = value.to_string();
        Ok(())
    }
}

// ─── SheetTradeStore ──────────────────────────────────────────────────────────

pub struct SheetTradeStore<B> {
    backend: B,
}

impl<B: SheetBackend> SheetTradeStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn require_row(&self, symbol: &str) -> Result<usize, StoreError> {
        self.backend
            .find_row(symbol)
            .await?
            .ok_or_else(|| StoreError::RowNotFound(symbol.to_string()))
    }
}

/// Column holding the `HIT` marker for a level.
pub fn level_column(level: Level) -> Option<usize> {
    match level {
        Level::Stop => Some(COL_SL),
        other => other.rank().filter(|&r| r > 0).map(|r| COL_SL + r),
    }
}

fn opening_row(position: &Position) -> Vec<String> {
    vec![
        position.opened_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        position.symbol.clone(),
        position.direction.to_string(),
        position.entry_price.to_string(),
    ]
}

fn result_label(record: &TradeRecord) -> &'static str {
    match record.result {
        CloseReason::Cancelled | CloseReason::FeedLost | CloseReason::Manual => "MANUAL",
        _ => record.level.as_str(),
    }
}

#[async_trait]
impl<B: SheetBackend> TradeStore for SheetTradeStore<B> {
    fn name(&self) -> &'static str {
        "sheet"
    }

    async fn opened(&self, position: &Position) -> Result<(), StoreError> {
        let row = self.backend.append_row(opening_row(position)).await?;
        info!(symbol = %position.symbol, row, "📝 Sheet row added");
        Ok(())
    }

    async fn level_reached(&self, position: &Position, level: Level) -> Result<(), StoreError> {
        let Some(col) = level_column(level) else {
            return Ok(());
        };
        let row = self.require_row(&position.symbol).await?;
        self.backend.update_cell(row, col, HIT).await
    }

    async fn insert(&self, record: &TradeRecord) -> Result<(), StoreError> {
        let row = match self.backend.find_row(&record.symbol).await? {
            Some(row) => row,
            None => {
                let mut values = vec![
                    record.opened_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    record.symbol.clone(),
                    record.direction.to_string(),
                    record.entry_price.to_string(),
                ];
                values.resize(HEADER.len(), String::new());
                if let Some(col) = level_column(record.level) {
                    values[col - 1] = HIT.to_string();
                }
                self.backend.append_row(values).await?
            }
        };

        self.backend.update_cell(row, COL_RESULT, result_label(record)).await?;
        self.backend
            .update_cell(row, COL_PROFIT, &format!("{:.2}%", record.result_percent))
            .await?;
        info!(symbol = %record.symbol, row, result = result_label(record), "📝 Sheet row closed");
        Ok(())
    }
}
