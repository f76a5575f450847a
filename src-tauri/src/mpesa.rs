//! Money-movement logs (`mpesa_logs`).
//!
//! A log is the business's record of money that actually moved, as told by
//! the M-Pesa / bank confirmation SMS or by an uploaded statement. Logs are
//! keyed by transaction code: writing the same code twice merges into the
//! existing row instead of duplicating it.

use chrono::{NaiveDate, NaiveTime};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::data_helpers::{normalize_code, parse_amount, value_f64, value_str};
use crate::db::{self, DayWindow, DbState};
use crate::settings;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MoneyLog {
    pub id: String,
    pub business_id: String,
    pub transaction_code: String,
    pub amount: f64,
    pub direction: String,
    pub channel: String,
    pub counterparty: Option<String>,
    pub status: String,
    pub raw_message: Option<String>,
    pub received_at: String,
    pub updated_at: String,
}

impl MoneyLog {
    pub fn is_received(&self) -> bool {
        self.direction == "received"
    }
}

/// Fields written by an upsert. `None` keeps whatever the existing row has
/// (or the column default on insert).
#[derive(Debug, Clone, Default)]
pub(crate) struct LogUpsert {
    pub code: String,
    pub amount: f64,
    pub direction: Option<String>,
    pub channel: Option<String>,
    pub counterparty: Option<String>,
    pub status: String,
    pub raw_message: Option<String>,
    pub received_at: Option<String>,
}

const LOG_COLUMNS: &str = "id, business_id, transaction_code, amount, direction, channel,
     counterparty, status, raw_message, received_at, updated_at";

fn map_log_row(row: &rusqlite::Row) -> rusqlite::Result<MoneyLog> {
    Ok(MoneyLog {
        id: row.get(0)?,
        business_id: row.get(1)?,
        transaction_code: row.get(2)?,
        amount: row.get(3)?,
        direction: row.get(4)?,
        channel: row.get(5)?,
        counterparty: row.get(6)?,
        status: row.get(7)?,
        raw_message: row.get(8)?,
        received_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn normalize_direction(raw: &str) -> Result<String, String> {
    match raw.trim().to_lowercase().as_str() {
        "received" | "in" | "paid_in" | "paid in" | "credit" => Ok("received".into()),
        "sent" | "out" | "paid" | "paid_out" | "withdrawn" | "debit" => Ok("sent".into()),
        other => Err(format!("Invalid direction: {other}. Must be received or sent")),
    }
}

fn normalize_channel(raw: &str) -> Result<String, String> {
    match raw.trim().to_lowercase().as_str() {
        "mpesa" | "m-pesa" => Ok("mpesa".into()),
        "bank" => Ok("bank".into()),
        other => Err(format!("Invalid channel: {other}. Must be mpesa or bank")),
    }
}

// ---------------------------------------------------------------------------
// Upsert
// ---------------------------------------------------------------------------

/// Insert a log or merge into the existing row with the same code.
///
/// Does not open a transaction; the statement import batches many of these.
pub(crate) fn upsert_log(
    conn: &Connection,
    business_id: &str,
    entry: &LogUpsert,
) -> Result<(), String> {
    let now = db::now_timestamp();
    conn.execute(
        "INSERT INTO mpesa_logs (
            id, business_id, transaction_code, amount, direction, channel,
            counterparty, status, raw_message, received_at, updated_at
        ) VALUES (
            ?1, ?2, ?3, ?4, COALESCE(?5, 'received'), COALESCE(?6, 'mpesa'),
            ?7, ?8, ?9, COALESCE(?10, ?11), ?11
        )
        ON CONFLICT(business_id, transaction_code) DO UPDATE SET
            amount = ?4,
            direction = COALESCE(?5, mpesa_logs.direction),
            channel = COALESCE(?6, mpesa_logs.channel),
            counterparty = COALESCE(?7, mpesa_logs.counterparty),
            status = ?8,
            raw_message = COALESCE(?9, mpesa_logs.raw_message),
            received_at = COALESCE(?10, mpesa_logs.received_at),
            updated_at = ?11",
        params![
            Uuid::new_v4().to_string(),
            business_id,
            entry.code,
            entry.amount,
            entry.direction,
            entry.channel,
            entry.counterparty,
            entry.status,
            entry.raw_message,
            entry.received_at,
            now,
        ],
    )
    .map_err(|e| format!("upsert mpesa log {}: {e}", entry.code))?;
    Ok(())
}

pub(crate) fn get_log_conn(
    conn: &Connection,
    business_id: &str,
    code: &str,
) -> Result<Option<MoneyLog>, String> {
    conn.query_row(
        &format!(
            "SELECT {LOG_COLUMNS} FROM mpesa_logs WHERE business_id = ?1 AND transaction_code = ?2"
        ),
        params![business_id, code],
        map_log_row,
    )
    .optional()
    .map_err(|e| format!("query mpesa log: {e}"))
}

/// Record a log entered by hand or pushed by the SMS forwarder.
pub fn record_log(db: &DbState, business_id: &str, payload: &Value) -> Result<Value, String> {
    let code = value_str(payload, &["transactionCode", "transaction_code", "code"])
        .and_then(|c| normalize_code(&c))
        .ok_or("Missing transactionCode")?;
    let amount = value_f64(payload, &["amount"]).ok_or("Missing amount")?;
    if amount <= 0.0 {
        return Err("Amount must be positive".into());
    }
    let direction = value_str(payload, &["direction", "type", "category"])
        .map(|d| normalize_direction(&d))
        .transpose()?;
    let channel = value_str(payload, &["channel", "source"])
        .map(|c| normalize_channel(&c))
        .transpose()?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let received_at = match value_str(payload, &["receivedAt", "received_at", "timestamp"]) {
        Some(raw) => Some(
            db::normalize_timestamp(&raw, settings::utc_offset_minutes(&conn))
                .ok_or_else(|| format!("Invalid receivedAt: {raw}"))?,
        ),
        None => None,
    };

    let entry = LogUpsert {
        code: code.clone(),
        amount,
        direction,
        channel,
        counterparty: value_str(payload, &["counterparty", "name", "sender"]),
        status: value_str(payload, &["status"]).unwrap_or_else(|| "manual".into()),
        raw_message: value_str(payload, &["rawMessage", "raw_message", "message"]),
        received_at,
    };
    upsert_log(&conn, business_id, &entry)?;
    info!(code = %code, amount = %amount, "Money log recorded");

    let log = get_log_conn(&conn, business_id, &code)?
        .ok_or_else(|| format!("Log not found after write: {code}"))?;
    serde_json::to_value(log).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// SMS parsing
// ---------------------------------------------------------------------------

/// What a confirmation SMS says happened.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSms {
    pub code: String,
    pub amount: f64,
    pub direction: &'static str,
    pub counterparty: Option<String>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
}

fn trim_punct(token: &str) -> &str {
    token.trim_matches(|c: char| c == '.' || c == ',')
}

/// Parse an M-Pesa confirmation SMS.
///
/// Handles the till / paybill "received from" messages and the "sent to" /
/// "paid to" messages for outgoing money, e.g.
/// `SBK1XY2Z3Q Confirmed. Ksh1,500.00 received from JOHN DOE 0712345678 on 12/3/24 at 10:15 AM`.
pub fn parse_sms(message: &str) -> Result<ParsedSms, String> {
    let tokens: Vec<&str> = message.split_whitespace().collect();
    let first = tokens.first().ok_or("Empty message")?;
    let code = trim_punct(first);
    if !(8..=12).contains(&code.len()) || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!("Not an M-Pesa confirmation: bad code {code}"));
    }
    if !tokens
        .iter()
        .any(|t| t.to_lowercase().contains("confirmed"))
    {
        return Err("Not an M-Pesa confirmation: missing 'Confirmed'".into());
    }

    let lower: Vec<String> = tokens.iter().map(|t| trim_punct(t).to_lowercase()).collect();

    let amount = tokens
        .iter()
        .skip(1)
        .find(|t| t.to_lowercase().starts_with("ksh"))
        .and_then(|t| parse_amount(trim_punct(t)))
        .filter(|a| *a > 0.0)
        .ok_or("No amount in message")?;

    // Counterparty runs from after the marker word to the "on" before the date.
    let (direction, name_start) = if let Some(i) = lower.iter().position(|t| t == "from") {
        ("received", i + 1)
    } else if let Some(i) = lower
        .windows(2)
        .position(|w| (w[0] == "sent" || w[0] == "paid") && w[1] == "to")
    {
        ("sent", i + 2)
    } else if lower.iter().any(|t| t == "received") {
        ("received", tokens.len())
    } else {
        return Err("Cannot tell whether money was received or sent".into());
    };

    let on_idx = lower
        .windows(3)
        .position(|w| w[0] == "on" && w[2] == "at")
        .filter(|i| *i >= name_start);

    let name_end = on_idx.unwrap_or(tokens.len());
    let counterparty = if name_start < name_end {
        let name = tokens[name_start..name_end].join(" ");
        let name = trim_punct(name.trim()).to_string();
        (!name.is_empty()).then_some(name)
    } else {
        None
    };

    let (date, time) = match on_idx {
        Some(i) => {
            let date = tokens
                .get(i + 1)
                .and_then(|d| NaiveDate::parse_from_str(trim_punct(d), "%d/%m/%y").ok());
            let time = match (tokens.get(i + 3), tokens.get(i + 4)) {
                (Some(t), Some(ampm)) => NaiveTime::parse_from_str(
                    &format!("{} {}", trim_punct(t), trim_punct(ampm).to_uppercase()),
                    "%I:%M %p",
                )
                .ok(),
                _ => None,
            };
            (date, time)
        }
        None => (None, None),
    };

    Ok(ParsedSms {
        code: code.to_uppercase(),
        amount,
        direction,
        counterparty,
        date,
        time,
    })
}

/// Parse a forwarded SMS and store it as a log.
pub fn ingest_sms(db: &DbState, business_id: &str, message: &str) -> Result<Value, String> {
    let parsed = parse_sms(message)?;
    debug!(code = %parsed.code, direction = parsed.direction, "Parsed M-Pesa SMS");

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let received_at = match (parsed.date, parsed.time) {
        (Some(d), Some(t)) => db::normalize_timestamp(
            &d.and_time(t).format("%Y-%m-%d %H:%M:%S").to_string(),
            settings::utc_offset_minutes(&conn),
        ),
        _ => {
            warn!(code = %parsed.code, "SMS has no parsable date, using arrival time");
            None
        }
    };

    let entry = LogUpsert {
        code: parsed.code.clone(),
        amount: parsed.amount,
        direction: Some(parsed.direction.to_string()),
        channel: Some("mpesa".into()),
        counterparty: parsed.counterparty,
        status: "sms".into(),
        raw_message: Some(message.trim().to_string()),
        received_at,
    };
    upsert_log(&conn, business_id, &entry)?;
    info!(code = %parsed.code, amount = %parsed.amount, "M-Pesa SMS ingested");

    let log = get_log_conn(&conn, business_id, &parsed.code)?
        .ok_or_else(|| format!("Log not found after write: {}", parsed.code))?;
    serde_json::to_value(log).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Logs received inside the local day, oldest first.
pub(crate) fn logs_for_day(
    conn: &Connection,
    business_id: &str,
    window: &DayWindow,
) -> Result<Vec<MoneyLog>, String> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {LOG_COLUMNS} FROM mpesa_logs
             WHERE business_id = ?1 AND received_at >= ?2 AND received_at < ?3
             ORDER BY received_at ASC"
        ))
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![business_id, window.start, window.end], map_log_row)
        .map_err(|e| e.to_string())?;

    let mut logs = Vec::new();
    for row in rows {
        match row {
            Ok(log) => logs.push(log),
            Err(e) => warn!("skipping malformed mpesa log row: {e}"),
        }
    }
    Ok(logs)
}

pub fn list_logs(db: &DbState, business_id: &str, date: Option<&str>) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let window = settings::resolve_day(&conn, date)?;
    serde_json::to_value(logs_for_day(&conn, business_id, &window)?).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIZ: &str = "BIZ-TEST1";

    #[test]
    fn parse_till_received_sms() {
        let sms = "SBK1XY2Z3Q Confirmed. Ksh1,500.00 received from JOHN DOE 0712345678 on 12/3/24 at 10:15 AM. New Account balance is Ksh20,000.00.";
        let parsed = parse_sms(sms).unwrap();
        assert_eq!(parsed.code, "SBK1XY2Z3Q");
        assert_eq!(parsed.amount, 1500.0);
        assert_eq!(parsed.direction, "received");
        assert_eq!(parsed.counterparty.as_deref(), Some("JOHN DOE 0712345678"));
        assert_eq!(parsed.date, NaiveDate::from_ymd_opt(2024, 3, 12));
        assert_eq!(parsed.time, NaiveTime::from_hms_opt(10, 15, 0));
    }

    #[test]
    fn parse_personal_received_sms() {
        let sms = "SBK2AB3CD4 Confirmed.You have received Ksh250.00 from MARY W 0722000000 on 1/4/24 at 7:05 PM New M-PESA balance is Ksh1,000.00.";
        let parsed = parse_sms(sms).unwrap();
        assert_eq!(parsed.amount, 250.0);
        assert_eq!(parsed.direction, "received");
        assert_eq!(parsed.time, NaiveTime::from_hms_opt(19, 5, 0));
    }

    #[test]
    fn parse_paid_to_sms_is_outgoing() {
        let sms = "SBK9ZZ8YY7 Confirmed. Ksh3,200.00 paid to NAIVAS SUPERMARKET. on 12/3/24 at 1:05 PM.New M-PESA balance is Ksh500.00.";
        let parsed = parse_sms(sms).unwrap();
        assert_eq!(parsed.direction, "sent");
        assert_eq!(parsed.amount, 3200.0);
        assert_eq!(parsed.counterparty.as_deref(), Some("NAIVAS SUPERMARKET"));
    }

    #[test]
    fn parse_rejects_non_confirmations() {
        assert!(parse_sms("").is_err());
        assert!(parse_sms("Hello there, your order is ready").is_err());
        assert!(parse_sms("SBK1XY2Z3Q Failed. Insufficient funds").is_err());
    }

    #[test]
    fn ingest_sms_stores_local_time() {
        let state = db::test_db_state();
        let log = ingest_sms(
            &state,
            BIZ,
            "SBK1XY2Z3Q Confirmed. Ksh1,500.00 received from JOHN DOE 0712345678 on 12/3/24 at 10:15 AM.",
        )
        .unwrap();
        assert_eq!(log["receivedAt"], "2024-03-12T07:15:00.000Z");
        assert_eq!(log["status"], "sms");
        assert_eq!(log["channel"], "mpesa");
    }

    #[test]
    fn upsert_merges_on_code_and_keeps_unset_fields() {
        let state = db::test_db_state();
        record_log(
            &state,
            BIZ,
            &serde_json::json!({
                "transactionCode": "abc123xyz",
                "amount": 900,
                "direction": "sent",
                "counterparty": "KPLC",
                "receivedAt": "2024-03-12T08:00:00Z",
            }),
        )
        .unwrap();

        {
            let conn = state.conn.lock().unwrap();
            upsert_log(
                &conn,
                BIZ,
                &LogUpsert {
                    code: "ABC123XYZ".into(),
                    amount: 950.0,
                    status: "verified_via_statement".into(),
                    ..Default::default()
                },
            )
            .unwrap();
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM mpesa_logs", [], |row| row.get(0))
                .unwrap();
            assert_eq!(count, 1);
        }

        let conn = state.conn.lock().unwrap();
        let log = get_log_conn(&conn, BIZ, "ABC123XYZ").unwrap().unwrap();
        assert_eq!(log.amount, 950.0);
        assert_eq!(log.direction, "sent");
        assert_eq!(log.counterparty.as_deref(), Some("KPLC"));
        assert_eq!(log.status, "verified_via_statement");
        assert_eq!(log.received_at, "2024-03-12T08:00:00.000Z");
    }

    #[test]
    fn record_log_rejects_unknown_direction() {
        let state = db::test_db_state();
        let err = record_log(
            &state,
            BIZ,
            &serde_json::json!({ "code": "ABC123XYZ", "amount": 10, "direction": "sideways" }),
        )
        .unwrap_err();
        assert!(err.starts_with("Invalid direction"));
    }
}
