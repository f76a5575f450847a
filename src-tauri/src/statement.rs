//! Statement import: verify recorded sales against an uploaded M-Pesa or
//! bank statement.
//!
//! The statement is read into rows of (code, amount, completion time). Each
//! row with a code and a positive amount is written as a money log, and an
//! unverified payment carrying the same code is marked verified. The whole
//! import is one SQLite transaction.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use rusqlite::params;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::data_helpers::{normalize_code, parse_amount};
use crate::db::{self, DbState};
use crate::mpesa::{self, LogUpsert};
use crate::payments::{self, Payment};
use crate::settings;

/// Most write operations (payment updates plus log upserts) one import may
/// perform.
pub const MAX_BATCH_WRITES: usize = 500;

const CODE_HEADERS: &[&str] = &[
    "Receipt No.",
    "Transaction ID",
    "Receipt No",
    "Receipt",
    "Transaction Code",
];
const AMOUNT_HEADERS: &[&str] = &["Paid In", "Amount"];
const TIME_HEADERS: &[&str] = &["Completion Time"];

const LOG_STATUS: &str = "verified_via_statement";
const VERIFIED_VIA: &str = "statement_upload";

#[derive(Debug, Error)]
pub enum StatementError {
    #[error("Unsupported statement file: {0}. Expected .xlsx, .xls, .ods or .csv")]
    UnsupportedFormat(String),

    #[error("Could not read spreadsheet: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("Could not read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Statement has no worksheet")]
    NoWorksheet,

    #[error("Statement has no transaction code column (expected one of: {0})")]
    MissingCodeColumn(String),

    #[error("Statement too large: {ops} writes exceed the limit of {limit}")]
    TooManyWrites { ops: usize, limit: usize },
}

/// One data row of a statement, as read.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementRow {
    pub code: String,
    /// Zero when the cell is empty or unparsable.
    pub amount: f64,
    pub completed_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

fn extension(file_name: &str) -> String {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default()
}

/// Read the first worksheet (or the CSV) into a grid of trimmed cell text.
fn read_grid(bytes: &[u8], file_name: &str) -> Result<Vec<Vec<String>>, StatementError> {
    match extension(file_name).as_str() {
        "csv" => read_csv_grid(bytes),
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => read_workbook_grid(bytes),
        _ => Err(StatementError::UnsupportedFormat(file_name.to_string())),
    }
}

fn read_csv_grid(bytes: &[u8]) -> Result<Vec<Vec<String>>, StatementError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut grid = Vec::new();
    for record in reader.records() {
        let record = record?;
        grid.push(
            record
                .iter()
                .map(|cell| cell.trim_start_matches('\u{feff}').trim().to_string())
                .collect(),
        );
    }
    Ok(grid)
}

fn read_workbook_grid(bytes: &[u8]) -> Result<Vec<Vec<String>>, StatementError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(StatementError::NoWorksheet)??;
    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::DateTime(_) => cell
            .as_datetime()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
        other => other.to_string().trim().to_string(),
    }
}

fn find_column(header: &[String], aliases: &[&str]) -> Vec<usize> {
    aliases
        .iter()
        .filter_map(|alias| {
            header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(alias))
        })
        .collect()
}

/// First non-empty cell among `columns`, in alias order.
fn first_cell<'a>(row: &'a [String], columns: &[usize]) -> Option<&'a str> {
    columns
        .iter()
        .filter_map(|i| row.get(*i))
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

/// Turn a grid into statement rows. The header is the first non-empty row
/// that names a transaction code column; portal exports put a title block
/// above it.
fn rows_from_grid(grid: &[Vec<String>]) -> Result<Vec<StatementRow>, StatementError> {
    let header_idx = grid
        .iter()
        .position(|row| !is_blank(row) && !find_column(row, CODE_HEADERS).is_empty())
        .ok_or_else(|| StatementError::MissingCodeColumn(CODE_HEADERS.join(", ")))?;
    let header = &grid[header_idx];

    let code_cols = find_column(header, CODE_HEADERS);
    let amount_cols = find_column(header, AMOUNT_HEADERS);
    let time_cols = find_column(header, TIME_HEADERS);

    Ok(grid[header_idx + 1..]
        .iter()
        .filter(|row| !is_blank(row))
        .map(|row| StatementRow {
            code: first_cell(row, &code_cols).unwrap_or_default().to_string(),
            amount: first_cell(row, &amount_cols)
                .and_then(parse_amount)
                .unwrap_or(0.0),
            completed_at: first_cell(row, &time_cols).map(String::from),
        })
        .collect())
}

/// Read a statement file into rows.
pub fn read_statement(bytes: &[u8], file_name: &str) -> Result<Vec<StatementRow>, StatementError> {
    let grid = read_grid(bytes, file_name)?;
    rows_from_grid(&grid)
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

struct PlannedRow {
    log: LogUpsert,
    payment_id: Option<String>,
}

/// Import a statement and verify the payments it confirms.
pub fn import_statement(
    db: &DbState,
    business_id: &str,
    file_name: &str,
    bytes: &[u8],
    imported_by: Option<&str>,
) -> Result<Value, String> {
    let rows = read_statement(bytes, file_name).map_err(|e| e.to_string())?;
    debug!(file = %file_name, rows = rows.len(), "Statement read");

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let offset = settings::utc_offset_minutes(&conn);

    // Unverified payments by code, oldest first wins.
    let mut lookup: HashMap<String, Payment> = HashMap::new();
    for payment in payments::unverified_payments(&conn, business_id)? {
        if let Some(code) = payment.transaction_code.as_deref().and_then(normalize_code) {
            lookup.entry(code).or_insert(payment);
        }
    }

    let mut plan = Vec::new();
    for row in &rows {
        let Some(code) = normalize_code(&row.code) else {
            continue;
        };
        if row.amount <= 0.0 {
            continue;
        }
        let received_at = row.completed_at.as_deref().and_then(|raw| {
            let ts = db::normalize_timestamp(raw, offset);
            if ts.is_none() {
                warn!(code = %code, raw = %raw, "Unparsable completion time, keeping existing");
            }
            ts
        });
        let payment_id = lookup.remove(&code).map(|p| p.id);
        plan.push(PlannedRow {
            log: LogUpsert {
                code,
                amount: row.amount,
                direction: Some("received".into()),
                status: LOG_STATUS.into(),
                received_at,
                ..Default::default()
            },
            payment_id,
        });
    }

    let matched = plan.iter().filter(|p| p.payment_id.is_some()).count();
    let ops = plan.len() + matched;
    if ops > MAX_BATCH_WRITES {
        warn!(file = %file_name, ops, "Statement rejected: too many writes");
        return Err(StatementError::TooManyWrites {
            ops,
            limit: MAX_BATCH_WRITES,
        }
        .to_string());
    }

    let import_id = Uuid::new_v4().to_string();
    let now = db::now_timestamp();

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;

    let result = (|| -> Result<(), String> {
        for planned in &plan {
            if let Some(ref payment_id) = planned.payment_id {
                conn.execute(
                    "UPDATE payments SET is_verified = 1, verified_via = ?1,
                        actual_amount = ?2, updated_at = ?3
                     WHERE id = ?4 AND business_id = ?5",
                    params![VERIFIED_VIA, planned.log.amount, now, payment_id, business_id],
                )
                .map_err(|e| format!("verify payment {payment_id}: {e}"))?;
            }
            mpesa::upsert_log(&conn, business_id, &planned.log)?;
        }

        conn.execute(
            "INSERT INTO statement_imports (
                id, business_id, file_name, rows_processed, rows_accepted,
                matched, logs_written, imported_by, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                import_id,
                business_id,
                file_name,
                rows.len() as i64,
                plan.len() as i64,
                matched as i64,
                plan.len() as i64,
                imported_by,
                now,
            ],
        )
        .map_err(|e| format!("insert statement import: {e}"))?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| format!("commit: {e}"))?;
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            warn!(file = %file_name, error = %e, "Statement import rolled back");
            return Err(e);
        }
    }

    info!(
        import_id = %import_id,
        file = %file_name,
        rows = rows.len(),
        accepted = plan.len(),
        matched,
        "Statement imported"
    );

    Ok(serde_json::json!({
        "matched": matched,
        "totalProcessed": rows.len(),
        "accepted": plan.len(),
        "logsWritten": plan.len(),
        "importId": import_id,
    }))
}

/// Past imports, newest first.
pub fn list_imports(db: &DbState, business_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT id, file_name, rows_processed, rows_accepted, matched,
                    logs_written, imported_by, created_at
             FROM statement_imports WHERE business_id = ?1
             ORDER BY created_at DESC",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![business_id], |row| {
            Ok(serde_json::json!({
                "id": row.get::<_, String>(0)?,
                "fileName": row.get::<_, String>(1)?,
                "totalProcessed": row.get::<_, i64>(2)?,
                "accepted": row.get::<_, i64>(3)?,
                "matched": row.get::<_, i64>(4)?,
                "logsWritten": row.get::<_, i64>(5)?,
                "importedBy": row.get::<_, Option<String>>(6)?,
                "createdAt": row.get::<_, String>(7)?,
            }))
        })
        .map_err(|e| e.to_string())?;
    let imports = rows
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read statement import row: {e}"))?;
    Ok(Value::Array(imports))
}
