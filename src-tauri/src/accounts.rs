//! Job / credit accounts.
//!
//! An account is work billed to a customer who may pay over time. Payments
//! linked to it raise `paid_amount`; the account is `cleared` exactly when
//! the paid amount covers the total, `open` otherwise.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::data_helpers::{round_money, value_f64, value_str};
use crate::db::{self, DbState};
use crate::payments;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub business_id: String,
    pub description: String,
    pub customer_phone: Option<String>,
    pub total_amount: f64,
    pub paid_amount: f64,
    pub balance: f64,
    pub status: String,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

const ACCOUNT_COLUMNS: &str = "id, business_id, description, customer_phone, total_amount,
     paid_amount, status, created_by, created_at, updated_at";

fn map_account_row(row: &rusqlite::Row) -> rusqlite::Result<Account> {
    let total_amount: f64 = row.get(4)?;
    let paid_amount: f64 = row.get(5)?;
    Ok(Account {
        id: row.get(0)?,
        business_id: row.get(1)?,
        description: row.get(2)?,
        customer_phone: row.get(3)?,
        total_amount,
        paid_amount,
        balance: round_money((total_amount - paid_amount).max(0.0)),
        status: row.get(6)?,
        created_by: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn status_for(total_amount: f64, paid_amount: f64) -> &'static str {
    if paid_amount + 0.005 >= total_amount {
        "cleared"
    } else {
        "open"
    }
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// Open a job / credit account. An optional `deposit` is recorded as a
/// linked payment in the same transaction.
pub fn create_account(
    db: &DbState,
    business_id: &str,
    created_by: Option<&str>,
    payload: &Value,
) -> Result<Value, String> {
    let description = value_str(payload, &["description", "customerName", "customer_name"])
        .ok_or("Missing description")?;
    let total_amount =
        value_f64(payload, &["totalAmount", "total_amount"]).ok_or("Missing totalAmount")?;
    if total_amount <= 0.0 {
        return Err("totalAmount must be positive".into());
    }
    let customer_phone = value_str(payload, &["customerPhone", "customer_phone", "phone"]);
    let deposit = value_f64(payload, &["deposit", "paidAmount", "paid_amount"]).unwrap_or(0.0);
    if deposit < 0.0 {
        return Err("deposit cannot be negative".into());
    }
    if deposit > total_amount + 0.005 {
        return Err("deposit cannot exceed totalAmount".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let account_id = Uuid::new_v4().to_string();
    let now = db::now_timestamp();

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;

    let result = (|| -> Result<(), String> {
        conn.execute(
            "INSERT INTO accounts (
                id, business_id, description, customer_phone, total_amount,
                paid_amount, status, created_by, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, 'open', ?6, ?7, ?7)",
            params![
                account_id,
                business_id,
                description,
                customer_phone,
                total_amount,
                created_by,
                now,
            ],
        )
        .map_err(|e| format!("insert account: {e}"))?;

        if deposit > 0.0 {
            let deposit_payload = serde_json::json!({
                "amount": deposit,
                "paymentMethod": value_str(payload, &["depositMethod", "paymentMethod"]),
                "transactionCode": value_str(payload, &["transactionCode", "transaction_code"]),
                "attendantName": created_by,
                "description": description,
                "accountId": account_id,
            });
            payments::insert_payment(&conn, business_id, &deposit_payload)?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| format!("commit: {e}"))?;
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    }

    info!(account_id = %account_id, total_amount = %total_amount, deposit = %deposit, "Account opened");

    let account = get_account_conn(&conn, business_id, &account_id)?
        .ok_or_else(|| format!("Account not found: {account_id}"))?;
    serde_json::to_value(account).map_err(|e| e.to_string())
}

/// Add `amount` to an account's paid total and recompute its status.
/// Runs inside the caller's transaction.
pub(crate) fn apply_payment(
    conn: &Connection,
    business_id: &str,
    account_id: &str,
    amount: f64,
    now: &str,
) -> Result<(), String> {
    let (total_amount, paid_amount): (f64, f64) = conn
        .query_row(
            "SELECT total_amount, paid_amount FROM accounts WHERE id = ?1 AND business_id = ?2",
            params![account_id, business_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .map_err(|_| format!("Account not found: {account_id}"))?;

    let new_paid = paid_amount + amount;
    conn.execute(
        "UPDATE accounts SET paid_amount = ?1, status = ?2, updated_at = ?3 WHERE id = ?4",
        params![new_paid, status_for(total_amount, new_paid), now, account_id],
    )
    .map_err(|e| format!("update account paid_amount: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub(crate) fn get_account_conn(
    conn: &Connection,
    business_id: &str,
    account_id: &str,
) -> Result<Option<Account>, String> {
    conn.query_row(
        &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1 AND business_id = ?2"),
        params![account_id, business_id],
        map_account_row,
    )
    .optional()
    .map_err(|e| format!("query account: {e}"))
}

pub fn get_account(db: &DbState, business_id: &str, account_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let account = get_account_conn(&conn, business_id, account_id)?
        .ok_or_else(|| format!("Account not found: {account_id}"))?;
    serde_json::to_value(account).map_err(|e| e.to_string())
}

fn query_accounts(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Account>, String> {
    let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params, map_account_row)
        .map_err(|e| e.to_string())?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read account row: {e}"))
}

/// Accounts created inside `[start, end)`.
pub(crate) fn accounts_created_between(
    conn: &Connection,
    business_id: &str,
    start: &str,
    end: &str,
) -> Result<Vec<Account>, String> {
    query_accounts(
        conn,
        &format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts
             WHERE business_id = ?1 AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at DESC"
        ),
        params![business_id, start, end],
    )
}

/// Debtors: every account still open, oldest first.
pub(crate) fn open_accounts(conn: &Connection, business_id: &str) -> Result<Vec<Account>, String> {
    query_accounts(
        conn,
        &format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts
             WHERE business_id = ?1 AND status = 'open'
             ORDER BY created_at ASC"
        ),
        params![business_id],
    )
}

pub fn list_open_accounts(db: &DbState, business_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    serde_json::to_value(open_accounts(&conn, business_id)?).map_err(|e| e.to_string())
}

/// Lifetime billed value: sum of every account total.
pub(crate) fn total_billed(conn: &Connection, business_id: &str) -> Result<f64, String> {
    conn.query_row(
        "SELECT COALESCE(SUM(total_amount), 0) FROM accounts WHERE business_id = ?1",
        params![business_id],
        |row| row.get(0),
    )
    .map_err(|e| format!("sum accounts: {e}"))
}
