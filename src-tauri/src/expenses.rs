//! Business expenses.
//!
//! Expenses paid in cash come out of the drawer; expenses paid by M-Pesa or
//! bank are "digital" and should show up as outgoing money logs.

use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::data_helpers::{normalize_code, normalize_method, value_f64, value_str};
use crate::db::{self, DayWindow, DbState};
use crate::settings;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Expense {
    pub id: String,
    pub business_id: String,
    pub amount: f64,
    pub category: String,
    pub payment_method: String,
    pub description: Option<String>,
    pub transaction_code: Option<String>,
    pub recorded_by: Option<String>,
    pub created_at: String,
}

impl Expense {
    /// Paid through M-Pesa or the bank rather than from the cash drawer.
    pub fn is_digital(&self) -> bool {
        matches!(self.payment_method.as_str(), "mpesa" | "bank")
    }
}

/// Expenses leave the business as cash, M-Pesa or a bank transfer.
fn expense_method(raw: Option<&str>) -> Result<String, String> {
    let method = normalize_method(raw);
    match method.as_str() {
        "cash" | "mpesa" | "bank" => Ok(method),
        other => Err(format!(
            "Invalid paymentMethod: {other}. Must be cash, mpesa or bank"
        )),
    }
}

pub fn record_expense(
    db: &DbState,
    business_id: &str,
    recorded_by: Option<&str>,
    payload: &Value,
) -> Result<Value, String> {
    let amount = value_f64(payload, &["amount"]).ok_or("Missing amount")?;
    if amount <= 0.0 {
        return Err("Amount must be positive".into());
    }
    let category = value_str(payload, &["category", "expenseType", "expense_type"])
        .map(|c| c.to_lowercase())
        .unwrap_or_else(|| "other".to_string());
    let payment_method = expense_method(
        value_str(payload, &["paymentMethod", "payment_method", "method"]).as_deref(),
    )?;
    let description = value_str(payload, &["description"]);
    let transaction_code = value_str(payload, &["transactionCode", "transaction_code"])
        .and_then(|c| normalize_code(&c));

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let created_at = match value_str(payload, &["createdAt", "created_at"]) {
        Some(raw) => db::normalize_timestamp(&raw, settings::utc_offset_minutes(&conn))
            .ok_or_else(|| format!("Invalid createdAt: {raw}"))?,
        None => db::now_timestamp(),
    };

    let expense = Expense {
        id: Uuid::new_v4().to_string(),
        business_id: business_id.to_string(),
        amount,
        category,
        payment_method,
        description,
        transaction_code,
        recorded_by: recorded_by.map(String::from),
        created_at,
    };

    conn.execute(
        "INSERT INTO expenses (
            id, business_id, amount, category, payment_method,
            description, transaction_code, recorded_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            expense.id,
            expense.business_id,
            expense.amount,
            expense.category,
            expense.payment_method,
            expense.description,
            expense.transaction_code,
            expense.recorded_by,
            expense.created_at,
        ],
    )
    .map_err(|e| format!("insert expense: {e}"))?;

    info!(
        expense_id = %expense.id,
        category = %expense.category,
        method = %expense.payment_method,
        amount = %expense.amount,
        "Expense recorded"
    );

    serde_json::to_value(expense).map_err(|e| e.to_string())
}

pub(crate) fn expenses_for_day(
    conn: &Connection,
    business_id: &str,
    window: &DayWindow,
) -> Result<Vec<Expense>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT id, business_id, amount, category, payment_method,
                    description, transaction_code, recorded_by, created_at
             FROM expenses
             WHERE business_id = ?1 AND created_at >= ?2 AND created_at < ?3
             ORDER BY created_at DESC",
        )
        .map_err(|e| e.to_string())?;

    let rows = stmt
        .query_map(params![business_id, window.start, window.end], |row| {
            Ok(Expense {
                id: row.get(0)?,
                business_id: row.get(1)?,
                amount: row.get(2)?,
                category: row.get(3)?,
                payment_method: row.get(4)?,
                description: row.get(5)?,
                transaction_code: row.get(6)?,
                recorded_by: row.get(7)?,
                created_at: row.get(8)?,
            })
        })
        .map_err(|e| e.to_string())?;

    let mut expenses = Vec::new();
    for row in rows {
        match row {
            Ok(expense) => expenses.push(expense),
            Err(e) => warn!("skipping malformed expense row: {e}"),
        }
    }
    Ok(expenses)
}

pub fn list_expenses(db: &DbState, business_id: &str, date: Option<&str>) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let window = settings::resolve_day(&conn, date)?;
    serde_json::to_value(expenses_for_day(&conn, business_id, &window)?)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIZ: &str = "BIZ-TEST1";

    #[test]
    fn record_expense_defaults_and_normalizes() {
        let state = db::test_db_state();
        let expense = record_expense(
            &state,
            BIZ,
            Some("Owner"),
            &serde_json::json!({ "amount": 300, "category": "Transport" }),
        )
        .unwrap();
        assert_eq!(expense["category"], "transport");
        assert_eq!(expense["paymentMethod"], "cash");
        assert_eq!(expense["recordedBy"], "Owner");
    }

    #[test]
    fn record_expense_requires_positive_amount() {
        let state = db::test_db_state();
        let err = record_expense(&state, BIZ, None, &serde_json::json!({ "amount": 0 }))
            .unwrap_err();
        assert_eq!(err, "Amount must be positive");
        let err = record_expense(&state, BIZ, None, &serde_json::json!({})).unwrap_err();
        assert_eq!(err, "Missing amount");
    }

    #[test]
    fn list_expenses_filters_by_day_and_business() {
        let state = db::test_db_state();
        record_expense(
            &state,
            BIZ,
            None,
            &serde_json::json!({
                "amount": 1200,
                "paymentMethod": "M-Pesa",
                "createdAt": "2024-03-12 09:00:00",
            }),
        )
        .unwrap();
        record_expense(
            &state,
            "BIZ-OTHER",
            None,
            &serde_json::json!({ "amount": 50, "createdAt": "2024-03-12 09:00:00" }),
        )
        .unwrap();

        let listed = list_expenses(&state, BIZ, Some("2024-03-12")).unwrap();
        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["paymentMethod"], "mpesa");

        let conn = state.conn.lock().unwrap();
        let window = settings::resolve_day(&conn, Some("2024-03-12")).unwrap();
        assert!(expenses_for_day(&conn, BIZ, &window).unwrap()[0].is_digital());
    }

    #[test]
    fn record_expense_rejects_unknown_methods() {
        let state = db::test_db_state();
        let err = record_expense(
            &state,
            BIZ,
            None,
            &serde_json::json!({ "amount": 500, "paymentMethod": "card" }),
        )
        .unwrap_err();
        assert_eq!(err, "Invalid paymentMethod: card. Must be cash, mpesa or bank");

        let count: i64 = state
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM expenses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let bank = record_expense(
            &state,
            BIZ,
            None,
            &serde_json::json!({ "amount": 500, "paymentMethod": "Bank" }),
        )
        .unwrap();
        assert_eq!(bank["paymentMethod"], "bank");
    }

    #[test]
    fn only_mpesa_and_bank_count_as_digital() {
        let expense = |method: &str| Expense {
            id: "e1".into(),
            business_id: BIZ.into(),
            amount: 100.0,
            category: "other".into(),
            payment_method: method.into(),
            description: None,
            transaction_code: None,
            recorded_by: None,
            created_at: "2024-03-12T06:00:00.000Z".into(),
        };
        assert!(expense("mpesa").is_digital());
        assert!(expense("bank").is_digital());
        assert!(!expense("cash").is_digital());
        assert!(!expense("card").is_digital());
    }
}
