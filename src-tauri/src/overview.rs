//! Dashboard figures for the owner's overview screen.

use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;

use crate::accounts;
use crate::data_helpers::round_money;
use crate::db::DbState;
use crate::settings;
use crate::staff;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub today_collection: f64,
    pub total_billed: f64,
    pub total_collected: f64,
    pub total_debt: f64,
    /// M-Pesa sales nobody has verified yet.
    pub leakage_count: i64,
    pub staff_count: i64,
}

fn sum_payments(conn: &Connection, business_id: &str, since: Option<&str>) -> Result<f64, String> {
    conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM payments
         WHERE business_id = ?1 AND (?2 IS NULL OR created_at >= ?2)",
        params![business_id, since],
        |row| row.get(0),
    )
    .map_err(|e| format!("sum payments: {e}"))
}

fn unverified_mpesa_count(conn: &Connection, business_id: &str) -> Result<i64, String> {
    conn.query_row(
        "SELECT COUNT(*) FROM payments
         WHERE business_id = ?1 AND payment_method = 'mpesa' AND is_verified = 0",
        params![business_id],
        |row| row.get(0),
    )
    .map_err(|e| format!("count unverified payments: {e}"))
}

pub(crate) fn compute(conn: &Connection, business_id: &str) -> Result<Overview, String> {
    let today = settings::resolve_day(conn, None)?;
    let total_billed = accounts::total_billed(conn, business_id)?;
    let total_collected = sum_payments(conn, business_id, None)?;
    Ok(Overview {
        today_collection: round_money(sum_payments(conn, business_id, Some(&today.start))?),
        total_billed: round_money(total_billed),
        total_collected: round_money(total_collected),
        total_debt: round_money(total_billed - total_collected),
        leakage_count: unverified_mpesa_count(conn, business_id)?,
        staff_count: staff::attendant_count(conn, business_id)?,
    })
}

pub fn get_overview(db: &DbState, business_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    serde_json::to_value(compute(&conn, business_id)?).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::payments;

    const BIZ: &str = "BIZ-TEST1";

    #[test]
    fn empty_business_is_all_zero() {
        let state = db::test_db_state();
        let overview = get_overview(&state, BIZ).unwrap();
        assert_eq!(overview["todayCollection"], 0.0);
        assert_eq!(overview["staffCount"], 0);
    }

    #[test]
    fn figures_follow_payments_and_accounts() {
        let state = db::test_db_state();
        accounts::create_account(
            &state,
            BIZ,
            None,
            &serde_json::json!({ "description": "Kilo", "totalAmount": 500, "deposit": 200 }),
        )
        .unwrap();
        payments::record_payment(
            &state,
            BIZ,
            &serde_json::json!({ "amount": 300, "transactionCode": "SBK1XY2Z3Q" }),
        )
        .unwrap();
        payments::record_payment(
            &state,
            BIZ,
            &serde_json::json!({ "amount": 100, "createdAt": "2024-03-12 09:00:00" }),
        )
        .unwrap();

        let overview = {
            let conn = state.conn.lock().unwrap();
            compute(&conn, BIZ).unwrap()
        };
        assert_eq!(overview.today_collection, 500.0);
        assert_eq!(overview.total_billed, 500.0);
        assert_eq!(overview.total_collected, 600.0);
        assert_eq!(overview.total_debt, -100.0);
        assert_eq!(overview.leakage_count, 1);
    }
}
