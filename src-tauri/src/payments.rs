//! Payment (sale) records.
//!
//! Attendants record every sale as a payment: amount, method and, for
//! M-Pesa or bank, the transaction code from the customer's confirmation.
//! Payments start unverified; a statement upload or the owner flips
//! `is_verified` once the money is confirmed.

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::accounts;
use crate::data_helpers::{normalize_code, normalize_method, value_f64, value_str};
use crate::db::{self, DayWindow, DbState};
use crate::settings;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: String,
    pub business_id: String,
    pub amount: f64,
    pub transaction_code: Option<String>,
    pub payment_method: String,
    pub is_verified: bool,
    pub verified_via: Option<String>,
    pub actual_amount: Option<f64>,
    pub account_id: Option<String>,
    pub attendant_name: Option<String>,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Payment {
    pub fn is_mpesa(&self) -> bool {
        self.payment_method == "mpesa"
    }
}

const PAYMENT_COLUMNS: &str = "id, business_id, amount, transaction_code, payment_method,
     is_verified, verified_via, actual_amount, account_id, attendant_name,
     description, created_at, updated_at";

fn map_payment_row(row: &rusqlite::Row) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        business_id: row.get(1)?,
        amount: row.get(2)?,
        transaction_code: row.get(3)?,
        payment_method: row.get(4)?,
        is_verified: row.get::<_, i64>(5)? != 0,
        verified_via: row.get(6)?,
        actual_amount: row.get(7)?,
        account_id: row.get(8)?,
        attendant_name: row.get(9)?,
        description: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

// ---------------------------------------------------------------------------
// Record payment
// ---------------------------------------------------------------------------

/// Insert a payment (and apply it to its account, if linked) on `conn`.
///
/// Does not open a transaction; callers wrap it in one.
pub(crate) fn insert_payment(
    conn: &Connection,
    business_id: &str,
    payload: &Value,
) -> Result<Payment, String> {
    let amount = value_f64(payload, &["amount"]).ok_or("Missing amount")?;
    if amount <= 0.0 {
        return Err("Amount must be positive".into());
    }
    let transaction_code = value_str(
        payload,
        &["transactionCode", "transaction_code", "code", "mpesaCode"],
    )
    .and_then(|c| normalize_code(&c));
    let explicit_method = value_str(payload, &["paymentMethod", "payment_method", "method"]);
    // A code without a method is an M-Pesa sale in practice.
    let payment_method = match (&explicit_method, &transaction_code) {
        (None, Some(_)) => "mpesa".to_string(),
        _ => normalize_method(explicit_method.as_deref()),
    };
    let account_id = value_str(payload, &["accountId", "account_id"]);
    let attendant_name = value_str(
        payload,
        &["attendantName", "attendant_name", "userName", "staffName"],
    );
    let description = value_str(payload, &["description", "note"]);

    let now = db::now_timestamp();
    let created_at = match value_str(payload, &["createdAt", "created_at"]) {
        Some(raw) => db::normalize_timestamp(&raw, settings::utc_offset_minutes(conn))
            .ok_or_else(|| format!("Invalid createdAt: {raw}"))?,
        None => now.clone(),
    };

    if let Some(ref aid) = account_id {
        accounts::apply_payment(conn, business_id, aid, amount, &now)?;
    }

    let payment_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO payments (
            id, business_id, amount, transaction_code, payment_method,
            is_verified, account_id, attendant_name, description,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?9, ?10)",
        params![
            payment_id,
            business_id,
            amount,
            transaction_code,
            payment_method,
            account_id,
            attendant_name,
            description,
            created_at,
            now,
        ],
    )
    .map_err(|e| format!("insert payment: {e}"))?;

    Ok(Payment {
        id: payment_id,
        business_id: business_id.to_string(),
        amount,
        transaction_code,
        payment_method,
        is_verified: false,
        verified_via: None,
        actual_amount: None,
        account_id,
        attendant_name,
        description,
        created_at,
        updated_at: now,
    })
}

/// Record a sale.
///
/// When `accountId` is given the account's paid amount moves with it in the
/// same transaction.
pub fn record_payment(db: &DbState, business_id: &str, payload: &Value) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    conn.execute_batch("BEGIN IMMEDIATE")
        .map_err(|e| format!("begin transaction: {e}"))?;

    let payment = match insert_payment(&conn, business_id, payload) {
        Ok(p) => {
            conn.execute_batch("COMMIT")
                .map_err(|e| format!("commit: {e}"))?;
            p
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(e);
        }
    };

    info!(
        payment_id = %payment.id,
        method = %payment.payment_method,
        amount = %payment.amount,
        account_id = ?payment.account_id,
        "Payment recorded"
    );

    serde_json::to_value(payment).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// Owner confirms a payment by hand (e.g. after checking the phone).
pub fn verify_payment(db: &DbState, business_id: &str, payment_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let now = db::now_timestamp();
    let changed = conn
        .execute(
            "UPDATE payments SET is_verified = 1, verified_via = 'manual', updated_at = ?1
             WHERE id = ?2 AND business_id = ?3 AND is_verified = 0",
            params![now, payment_id, business_id],
        )
        .map_err(|e| format!("verify payment: {e}"))?;

    let payment = get_payment_conn(&conn, business_id, payment_id)?
        .ok_or_else(|| format!("Payment not found: {payment_id}"))?;
    if changed == 0 {
        warn!(payment_id = %payment_id, "Payment was already verified");
    } else {
        info!(payment_id = %payment_id, "Payment verified manually");
    }
    serde_json::to_value(payment).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn get_payment_conn(
    conn: &Connection,
    business_id: &str,
    payment_id: &str,
) -> Result<Option<Payment>, String> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1 AND business_id = ?2"),
        params![payment_id, business_id],
        map_payment_row,
    )
    .optional()
    .map_err(|e| format!("query payment: {e}"))
}

fn query_payments(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Payment>, String> {
    let mut stmt = conn.prepare(sql).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params, map_payment_row)
        .map_err(|e| e.to_string())?;

    let mut payments = Vec::new();
    for row in rows {
        match row {
            Ok(p) => payments.push(p),
            Err(e) => warn!("skipping malformed payment row: {e}"),
        }
    }
    Ok(payments)
}

/// Payments created inside the local day, newest first.
pub(crate) fn payments_for_day(
    conn: &Connection,
    business_id: &str,
    window: &DayWindow,
) -> Result<Vec<Payment>, String> {
    payments_created_between(conn, business_id, &window.start, &window.end)
}

pub(crate) fn payments_created_between(
    conn: &Connection,
    business_id: &str,
    start: &str,
    end: &str,
) -> Result<Vec<Payment>, String> {
    query_payments(
        conn,
        &format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE business_id = ?1 AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at DESC"
        ),
        params![business_id, start, end],
    )
}

/// Every unverified payment of the business, oldest first.
pub(crate) fn unverified_payments(
    conn: &Connection,
    business_id: &str,
) -> Result<Vec<Payment>, String> {
    query_payments(
        conn,
        &format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE business_id = ?1 AND is_verified = 0
             ORDER BY created_at ASC"
        ),
        params![business_id],
    )
}

/// Payment timeline of one account, oldest first.
pub(crate) fn account_payments(
    conn: &Connection,
    business_id: &str,
    account_id: &str,
) -> Result<Vec<Payment>, String> {
    query_payments(
        conn,
        &format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE business_id = ?1 AND account_id = ?2
             ORDER BY created_at ASC, rowid ASC"
        ),
        params![business_id, account_id],
    )
}

pub fn list_payments(db: &DbState, business_id: &str, date: Option<&str>) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let window = settings::resolve_day(&conn, date)?;
    let payments = payments_for_day(&conn, business_id, &window)?;
    serde_json::to_value(payments).map_err(|e| e.to_string())
}

pub fn list_unverified(db: &DbState, business_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    serde_json::to_value(unverified_payments(&conn, business_id)?).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIZ: &str = "BIZ-TEST1";

    #[test]
    fn record_payment_normalizes_code_and_infers_mpesa() {
        let state = db::test_db_state();
        let payment = record_payment(
            &state,
            BIZ,
            &serde_json::json!({
                "amount": 1500,
                "transactionCode": " qgh7xyz12 ",
                "attendantName": "Wanjiru",
            }),
        )
        .expect("record payment");

        assert_eq!(payment["transactionCode"], "QGH7XYZ12");
        assert_eq!(payment["paymentMethod"], "mpesa");
        assert_eq!(payment["isVerified"], false);
    }

    #[test]
    fn record_payment_defaults_to_cash_and_rejects_non_positive() {
        let state = db::test_db_state();
        let cash = record_payment(&state, BIZ, &serde_json::json!({ "amount": "250" })).unwrap();
        assert_eq!(cash["paymentMethod"], "cash");
        assert_eq!(cash["transactionCode"], Value::Null);

        let err = record_payment(&state, BIZ, &serde_json::json!({ "amount": -5 })).unwrap_err();
        assert_eq!(err, "Amount must be positive");
    }

    #[test]
    fn payment_against_unknown_account_rolls_back() {
        let state = db::test_db_state();
        let err = record_payment(
            &state,
            BIZ,
            &serde_json::json!({ "amount": 100, "accountId": "missing" }),
        )
        .unwrap_err();
        assert!(err.starts_with("Account not found"));

        let conn = state.conn.lock().unwrap();
        assert!(unverified_payments(&conn, BIZ).unwrap().is_empty());
    }

    #[test]
    fn payments_for_day_honours_local_midnight() {
        let state = db::test_db_state();
        // 23:30 EAT on the 11th and 00:30 EAT on the 12th.
        for ts in ["2024-03-11T20:30:00Z", "2024-03-11T21:30:00Z"] {
            record_payment(
                &state,
                BIZ,
                &serde_json::json!({ "amount": 100, "createdAt": ts }),
            )
            .unwrap();
        }

        let listed = list_payments(&state, BIZ, Some("2024-03-12")).unwrap();
        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["createdAt"], "2024-03-11T21:30:00.000Z");
    }

    #[test]
    fn manual_verification_is_idempotent() {
        let state = db::test_db_state();
        let payment = record_payment(
            &state,
            BIZ,
            &serde_json::json!({ "amount": 700, "paymentMethod": "mpesa", "transactionCode": "ABC123" }),
        )
        .unwrap();
        let id = payment["id"].as_str().unwrap();

        let first = verify_payment(&state, BIZ, id).unwrap();
        assert_eq!(first["isVerified"], true);
        assert_eq!(first["verifiedVia"], "manual");
        let second = verify_payment(&state, BIZ, id).unwrap();
        assert_eq!(second["isVerified"], true);

        assert!(verify_payment(&state, "BIZ-OTHER", id).is_err());
        assert_eq!(list_unverified(&state, BIZ).unwrap(), serde_json::json!([]));
    }
}
