//! Business settings stored in `local_settings`.
//!
//! The only setting the reports depend on is the business UTC offset: every
//! "today" and every daily window is a local calendar day, and shops run on
//! East Africa Time unless told otherwise.

use chrono::{Duration, NaiveDate, Utc};
use rusqlite::Connection;
use serde_json::Value;
use tracing::info;

use crate::db::{self, DayWindow, DbState};

const CATEGORY: &str = "business";
const KEY_UTC_OFFSET: &str = "utc_offset_minutes";

/// East Africa Time (UTC+03:00).
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 180;

/// Offsets outside ±14h do not exist on any civil clock.
const MAX_OFFSET_MINUTES: i32 = 14 * 60;

pub fn utc_offset_minutes(conn: &Connection) -> i32 {
    db::get_setting(conn, CATEGORY, KEY_UTC_OFFSET)
        .and_then(|v| v.trim().parse::<i32>().ok())
        .filter(|v| v.abs() <= MAX_OFFSET_MINUTES)
        .unwrap_or(DEFAULT_UTC_OFFSET_MINUTES)
}

pub fn set_utc_offset_minutes(conn: &Connection, minutes: i32) -> Result<(), String> {
    if minutes.abs() > MAX_OFFSET_MINUTES {
        return Err(format!("UTC offset out of range: {minutes} minutes"));
    }
    db::set_setting(conn, CATEGORY, KEY_UTC_OFFSET, &minutes.to_string())?;
    info!(utc_offset_minutes = minutes, "Business timezone updated");
    Ok(())
}

/// Today's date on the business clock.
pub fn today(conn: &Connection) -> NaiveDate {
    let local = Utc::now().naive_utc() + Duration::minutes(i64::from(utc_offset_minutes(conn)));
    local.date()
}

/// Resolve an optional `YYYY-MM-DD` into a local-day window; `None` or an
/// empty string means today.
pub fn resolve_day(conn: &Connection, date: Option<&str>) -> Result<DayWindow, String> {
    let date = match date.map(str::trim).filter(|d| !d.is_empty()) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| format!("Invalid date: {raw}. Expected YYYY-MM-DD"))?,
        None => today(conn),
    };
    db::day_window(date, utc_offset_minutes(conn))
}

/// Settings as shown on the settings screen.
pub fn get_business_settings(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    Ok(serde_json::json!({
        "utcOffsetMinutes": utc_offset_minutes(&conn),
        "today": today(&conn).to_string(),
    }))
}

pub fn update_business_settings(db: &DbState, payload: &Value) -> Result<Value, String> {
    let minutes = payload
        .get("utcOffsetMinutes")
        .or_else(|| payload.get("utc_offset_minutes"))
        .and_then(Value::as_i64)
        .ok_or("Missing utcOffsetMinutes")?;
    let minutes = i32::try_from(minutes).map_err(|_| "utcOffsetMinutes out of range")?;
    {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        set_utc_offset_minutes(&conn, minutes)?;
    }
    get_business_settings(db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_defaults_to_east_africa_time() {
        let state = db::test_db_state();
        let conn = state.conn.lock().unwrap();
        assert_eq!(utc_offset_minutes(&conn), DEFAULT_UTC_OFFSET_MINUTES);
    }

    #[test]
    fn out_of_range_offset_is_rejected_and_garbage_ignored() {
        let state = db::test_db_state();
        let conn = state.conn.lock().unwrap();
        assert!(set_utc_offset_minutes(&conn, 15 * 60).is_err());

        db::set_setting(&conn, CATEGORY, KEY_UTC_OFFSET, "not-a-number").unwrap();
        assert_eq!(utc_offset_minutes(&conn), DEFAULT_UTC_OFFSET_MINUTES);
    }

    #[test]
    fn resolve_day_uses_configured_offset() {
        let state = db::test_db_state();
        let conn = state.conn.lock().unwrap();
        set_utc_offset_minutes(&conn, 0).unwrap();
        let window = resolve_day(&conn, Some("2024-03-12")).unwrap();
        assert_eq!(window.start, "2024-03-12T00:00:00.000Z");
        assert_eq!(window.end, "2024-03-13T00:00:00.000Z");

        assert!(resolve_day(&conn, Some("12/03/2024")).is_err());
        assert_eq!(resolve_day(&conn, Some("")).unwrap().date, today(&conn));
    }

    #[test]
    fn update_business_settings_reads_back() {
        let state = db::test_db_state();
        let result =
            update_business_settings(&state, &serde_json::json!({ "utcOffsetMinutes": 120 }))
                .unwrap();
        assert_eq!(result["utcOffsetMinutes"], 120);
    }
}
