use serde_json::Value;

use super::{payload_arg0_as_string, payload_object};
use crate::{auth, db, expenses};

#[tauri::command]
pub async fn expense_record(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_session(&auth_state)?;
    expenses::record_expense(&db, &user.business_id, Some(&user.name), &payload_object(arg0))
}

#[tauri::command]
pub async fn expense_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_session(&auth_state)?;
    let date = payload_arg0_as_string(arg0, &["date"]);
    expenses::list_expenses(&db, &user.business_id, date.as_deref())
}
