//! Business ledger: the owner's combined view of sales and job accounts.

use serde::Serialize;
use serde_json::Value;

use crate::accounts::{self, Account};
use crate::data_helpers::round_money;
use crate::db::DbState;
use crate::payments::{self, Payment};
use crate::settings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerView {
    /// Everything created on one local day.
    Daily,
    /// Accounts still owing money.
    Debtors,
}

impl LedgerView {
    pub fn parse(raw: Option<&str>) -> Result<Self, String> {
        match raw.map(|v| v.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("daily") => Ok(Self::Daily),
            Some("debtors") => Ok(Self::Debtors),
            Some(other) => Err(format!("Invalid ledger view: {other}. Must be daily or debtors")),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Debtors => "debtors",
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LedgerEntry {
    Payment(Payment),
    Account(Account),
}

impl LedgerEntry {
    fn created_at(&self) -> &str {
        match self {
            Self::Payment(p) => &p.created_at,
            Self::Account(a) => &a.created_at,
        }
    }

    fn matches(&self, needle: &str) -> bool {
        let hit = |s: Option<&str>| s.is_some_and(|s| s.to_lowercase().contains(needle));
        match self {
            Self::Payment(p) => {
                hit(p.description.as_deref()) || hit(p.transaction_code.as_deref())
            }
            Self::Account(a) => hit(Some(&a.description)),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTotals {
    pub sales: f64,
    pub collected: f64,
    pub debt: f64,
}

/// Sales, collections and debt over a set of entries.
///
/// An account's total is the sale; payments against it are collections
/// only, so a deposit is not counted as a second sale.
pub fn totals(entries: &[LedgerEntry]) -> LedgerTotals {
    let mut t = LedgerTotals::default();
    for entry in entries {
        match entry {
            LedgerEntry::Account(a) => {
                t.sales += a.total_amount;
                t.debt += a.total_amount - a.paid_amount;
            }
            LedgerEntry::Payment(p) if p.account_id.is_none() => {
                t.sales += p.amount;
                t.collected += p.amount;
            }
            LedgerEntry::Payment(p) => t.collected += p.amount,
        }
    }
    LedgerTotals {
        sales: round_money(t.sales),
        collected: round_money(t.collected),
        debt: round_money(t.debt),
    }
}

/// Keep entries whose description or code contains `search`, ignoring case.
pub fn filter_entries(entries: Vec<LedgerEntry>, search: Option<&str>) -> Vec<LedgerEntry> {
    match search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()) {
        Some(needle) => entries.into_iter().filter(|e| e.matches(&needle)).collect(),
        None => entries,
    }
}

pub fn ledger(
    db: &DbState,
    business_id: &str,
    view: LedgerView,
    date: Option<&str>,
    search: Option<&str>,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let (date, entries) = match view {
        LedgerView::Daily => {
            let window = settings::resolve_day(&conn, date)?;
            let mut entries: Vec<LedgerEntry> =
                payments::payments_for_day(&conn, business_id, &window)?
                    .into_iter()
                    .map(LedgerEntry::Payment)
                    .chain(
                        accounts::accounts_created_between(
                            &conn,
                            business_id,
                            &window.start,
                            &window.end,
                        )?
                        .into_iter()
                        .map(LedgerEntry::Account),
                    )
                    .collect();
            entries.sort_by(|a, b| b.created_at().cmp(a.created_at()));
            (Some(window.date.to_string()), entries)
        }
        LedgerView::Debtors => {
            let entries = accounts::open_accounts(&conn, business_id)?
                .into_iter()
                .map(LedgerEntry::Account)
                .collect();
            (None, entries)
        }
    };
    drop(conn);

    let entries = filter_entries(entries, search);
    let totals = totals(&entries);

    Ok(serde_json::json!({
        "view": view.as_str(),
        "date": date,
        "totals": totals,
        "entries": entries,
    }))
}

/// One account with its payment timeline, oldest first.
pub fn account_history(db: &DbState, business_id: &str, account_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let account = accounts::get_account_conn(&conn, business_id, account_id)?
        .ok_or_else(|| format!("Account not found: {account_id}"))?;
    let history = payments::account_payments(&conn, business_id, account_id)?;
    Ok(serde_json::json!({
        "account": account,
        "payments": history,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    const BIZ: &str = "BIZ-TEST1";

    fn seed_day(state: &DbState) -> String {
        payments::record_payment(
            state,
            BIZ,
            &serde_json::json!({
                "amount": 500, "paymentMethod": "cash",
                "description": "Photocopy", "createdAt": "2024-03-12 09:00:00",
            }),
        )
        .unwrap();
        payments::record_payment(
            state,
            BIZ,
            &serde_json::json!({
                "amount": 1200, "transactionCode": "SBK1XY2Z3Q",
                "description": "Printing", "createdAt": "2024-03-12 11:00:00",
            }),
        )
        .unwrap();
        let account = accounts::create_account(
            state,
            BIZ,
            Some("Owner"),
            &serde_json::json!({
                "description": "Gate welding - Otieno",
                "totalAmount": 10000,
                "deposit": 4000,
            }),
        )
        .unwrap();
        account["id"].as_str().unwrap().to_string()
    }

    #[test]
    fn view_parsing() {
        assert_eq!(LedgerView::parse(None).unwrap(), LedgerView::Daily);
        assert_eq!(LedgerView::parse(Some("Debtors")).unwrap(), LedgerView::Debtors);
        assert!(LedgerView::parse(Some("weekly")).is_err());
    }

    #[test]
    fn daily_view_combines_payments_and_accounts_newest_first() {
        let state = db::test_db_state();
        seed_day(&state);

        let result = ledger(&state, BIZ, LedgerView::Daily, Some("2024-03-12"), None).unwrap();
        let entries = result["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["description"], "Printing");
        assert_eq!(entries[0]["kind"], "payment");
        assert_eq!(entries[1]["description"], "Photocopy");
        assert_eq!(result["totals"]["sales"], 1700.0);
        assert_eq!(result["totals"]["collected"], 1700.0);
    }

    #[test]
    fn totals_do_not_double_count_account_deposits() {
        let state = db::test_db_state();
        seed_day(&state);

        // Today's view holds the account and its deposit.
        let result = ledger(&state, BIZ, LedgerView::Daily, None, None).unwrap();
        assert_eq!(result["entries"].as_array().unwrap().len(), 2);
        assert_eq!(result["totals"]["sales"], 10000.0);
        assert_eq!(result["totals"]["collected"], 4000.0);
        assert_eq!(result["totals"]["debt"], 6000.0);
    }

    #[test]
    fn search_matches_description_or_code() {
        let state = db::test_db_state();
        seed_day(&state);

        let by_code =
            ledger(&state, BIZ, LedgerView::Daily, Some("2024-03-12"), Some("sbk1")).unwrap();
        assert_eq!(by_code["entries"].as_array().unwrap().len(), 1);

        let by_desc =
            ledger(&state, BIZ, LedgerView::Daily, Some("2024-03-12"), Some("PHOTO")).unwrap();
        assert_eq!(by_desc["entries"][0]["description"], "Photocopy");
        assert_eq!(by_desc["totals"]["sales"], 500.0);
    }

    #[test]
    fn debtors_view_and_account_history() {
        let state = db::test_db_state();
        let account_id = seed_day(&state);

        let result = ledger(&state, BIZ, LedgerView::Debtors, None, Some("otieno")).unwrap();
        assert!(result["date"].is_null());
        assert_eq!(result["entries"][0]["kind"], "account");
        assert_eq!(result["totals"]["debt"], 6000.0);

        payments::record_payment(
            &state,
            BIZ,
            &serde_json::json!({ "amount": 6000, "accountId": account_id }),
        )
        .unwrap();
        let history = account_history(&state, BIZ, &account_id).unwrap();
        let timeline = history["payments"].as_array().unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline[0]["amount"], 4000.0);
        assert_eq!(history["account"]["status"], "cleared");

        let debtors = ledger(&state, BIZ, LedgerView::Debtors, None, None).unwrap();
        assert!(debtors["entries"].as_array().unwrap().is_empty());
    }
}
