//! Staff management: the attendants linked to a business.

use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::db::DbState;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attendant {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: String,
}

pub(crate) fn attendants(conn: &Connection, business_id: &str) -> Result<Vec<Attendant>, String> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, email, created_at FROM users
             WHERE business_id = ?1 AND role = 'attendant'
             ORDER BY name COLLATE NOCASE ASC",
        )
        .map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![business_id], |row| {
            Ok(Attendant {
                id: row.get(0)?,
                name: row.get(1)?,
                email: row.get(2)?,
                created_at: row.get(3)?,
            })
        })
        .map_err(|e| e.to_string())?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("read attendant row: {e}"))
}

pub(crate) fn attendant_count(conn: &Connection, business_id: &str) -> Result<i64, String> {
    conn.query_row(
        "SELECT COUNT(*) FROM users WHERE business_id = ?1 AND role = 'attendant'",
        params![business_id],
        |row| row.get(0),
    )
    .map_err(|e| format!("count attendants: {e}"))
}

pub fn list_staff(db: &DbState, business_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    serde_json::to_value(attendants(&conn, business_id)?).map_err(|e| e.to_string())
}

/// Attendants join by registering themselves with the business id, so an
/// invite only tells the owner what to pass on.
pub fn invite_staff(business_id: &str, email: Option<&str>) -> Value {
    info!(business_id = %business_id, email = ?email, "staff invite requested");
    serde_json::json!({
        "success": true,
        "businessId": business_id,
        "message": format!(
            "Ask the attendant to sign up in the app{} and enter Business ID {business_id}. \
             They will be linked to your shop automatically.",
            email.map(|e| format!(" using {e}")).unwrap_or_default()
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{self, AuthState};
    use crate::db;

    #[test]
    fn lists_only_this_business_attendants() {
        let state = db::test_db_state();
        let auth = AuthState::new();
        let signup = auth::signup_owner(
            &state,
            &auth,
            &serde_json::json!({
                "email": "owner@example.com", "password": "secret1",
                "businessName": "Duka",
            }),
        )
        .unwrap();
        let business_id = signup["businessId"].as_str().unwrap();

        for (name, email) in [("Wanjiru", "w@example.com"), ("achieng", "a@example.com")] {
            auth::register_attendant(
                &state,
                &auth,
                &serde_json::json!({
                    "email": email, "password": "pass123",
                    "name": name, "businessId": business_id,
                }),
            )
            .unwrap();
        }

        let staff = list_staff(&state, business_id).unwrap();
        let staff = staff.as_array().unwrap();
        assert_eq!(staff.len(), 2);
        assert_eq!(staff[0]["name"], "achieng");

        let conn = state.conn.lock().unwrap();
        assert_eq!(attendant_count(&conn, business_id).unwrap(), 2);
        assert_eq!(attendant_count(&conn, "BIZ-OTHER").unwrap(), 0);
    }

    #[test]
    fn invite_returns_instructions() {
        let result = invite_staff("BIZ-AB12C", Some("kamau@example.com"));
        let message = result["message"].as_str().unwrap();
        assert!(message.contains("BIZ-AB12C"));
        assert!(message.contains("kamau@example.com"));
    }
}
