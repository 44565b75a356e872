mod google;

pub use google::GoogleSheetsClient;

use crate::errors::PersistenceError;
use crate::models::RankedEntry;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

pub const HEADER: [&str; 7] = [
    "이름",                  // A
    "득표 수",               // B
    "조",                    // C
    "직전 랭킹",             // D
    "랭킹",                  // E
    "수집시간",              // F
    "변동(1시간 전과 비교)", // G
];

// Row 1 holds the header; entry i lands on row i + FIRST_DATA_ROW
const FIRST_DATA_ROW: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueRange {
    pub range: String,
    pub values: Vec<Vec<Value>>,
}

// Transport seam: just enough of a spreadsheet API for the store below
#[async_trait]
pub trait SpreadsheetClient: Send + Sync {
    /// Title of the sheet at `index` (document order).
    async fn sheet_title(&self, index: usize) -> Result<String, PersistenceError>;
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<Value>>, PersistenceError>;
    async fn set_document_title(&self, title: &str) -> Result<(), PersistenceError>;
    /// Commit all ranges in one request. Failure means no row may be assumed written.
    async fn batch_write(&self, ranges: Vec<ValueRange>) -> Result<(), PersistenceError>;
}

/// Rank history kept in one sheet of a spreadsheet document.
#[derive(Clone)]
pub struct SheetStore {
    client: Arc<dyn SpreadsheetClient>,
    sheet_index: usize,
    title_prefix: String,
}

impl SheetStore {
    pub fn new(client: Arc<dyn SpreadsheetClient>, sheet_index: usize, title_prefix: impl Into<String>) -> Self {
        Self {
            client,
            sheet_index,
            title_prefix: title_prefix.into(),
        }
    }

    // Name -> rank as written by the last successful run (columns A and E).
    // Every row of one run carries the same collected-at stamp (column F), so rows
    // stamped differently from row 2 are leftovers of an older, longer run and are
    // ignored. Blank or unparseable cells are skipped; for a repeated name the
    // topmost row wins.
    pub async fn read_previous_ranks(&self) -> Result<HashMap<String, u32>, PersistenceError> {
        let sheet = self.client.sheet_title(self.sheet_index).await?;
        let rows = self
            .client
            .read_range(&format!("{}!A{}:F", quote_sheet(&sheet), FIRST_DATA_ROW))
            .await?;

        let latest_stamp = rows.first().and_then(|row| row.get(5)).and_then(cell_text);
        let mut previous = HashMap::new();
        let mut stale = 0;
        for (offset, row) in rows.iter().enumerate() {
            if row.get(5).and_then(cell_text) != latest_stamp {
                stale += 1;
                continue;
            }
            let name = row.first().and_then(cell_text);
            let rank = row.get(4).and_then(cell_rank);
            match (name, rank) {
                (Some(name), Some(rank)) => {
                    previous.entry(name).or_insert(rank);
                }
                (Some(name), None) => {
                    warn!("No usable previous rank for {:?} on row {}", name, offset + FIRST_DATA_ROW);
                }
                _ => {}
            }
        }
        if stale > 0 {
            debug!("Ignored {} rows left over from older runs", stale);
        }
        info!("Read {} previous ranks from sheet {:?}", previous.len(), sheet);
        Ok(previous)
    }

    // Retitle the document, then write header + one row per entry in a single flush.
    // Rows past the last entry are left as they are.
    pub async fn persist(
        &self,
        rows: &[RankedEntry],
        collected_at: DateTime<FixedOffset>,
    ) -> Result<(), PersistenceError> {
        let sheet = quote_sheet(&self.client.sheet_title(self.sheet_index).await?);
        let stamp = format_timestamp(&collected_at);

        self.client
            .set_document_title(&format!("{} - {}", self.title_prefix, stamp))
            .await?;

        let mut ranges = Vec::with_capacity(1 + rows.len() * 2);
        ranges.push(ValueRange {
            range: format!("{}!A1:G1", sheet),
            values: vec![HEADER.iter().map(|h| json!(h)).collect()],
        });

        for (i, entry) in rows.iter().enumerate() {
            let row = i + FIRST_DATA_ROW;
            // column C (group) is maintained by hand in the sheet
            ranges.push(ValueRange {
                range: format!("{}!A{}:B{}", sheet, row, row),
                values: vec![vec![json!(entry.name), json!(entry.vote_count)]],
            });
            ranges.push(ValueRange {
                range: format!("{}!D{}:G{}", sheet, row, row),
                values: vec![vec![
                    optional(entry.previous_rank),
                    json!(entry.current_rank),
                    json!(stamp),
                    optional(entry.rank_delta),
                ]],
            });
        }

        self.client.batch_write(ranges).await?;
        info!("Persisted {} rows", rows.len());
        Ok(())
    }
}

pub fn format_timestamp(at: &DateTime<FixedOffset>) -> String {
    at.format("%Y-%m-%d %H:%M:%S %:z").to_string()
}

// Sheet names go in single quotes inside A1 ranges, with embedded quotes doubled
fn quote_sheet(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

fn optional<T: Serialize>(value: Option<T>) -> Value {
    value.map(|v| json!(v)).unwrap_or_else(|| json!(""))
}

fn cell_text(cell: &Value) -> Option<String> {
    let text = match cell {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn cell_rank(cell: &Value) -> Option<u32> {
    let rank = match cell {
        Value::Number(n) => match n.as_u64() {
            Some(v) => v,
            // whole numbers can come back as floats (e.g. 3.0)
            None => n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0)? as u64,
        },
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    u32::try_from(rank).ok().filter(|r| *r >= 1)
}
