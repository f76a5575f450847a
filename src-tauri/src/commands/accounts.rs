use serde_json::Value;

use super::{payload_arg0_as_string, payload_object};
use crate::{accounts, auth, db};

#[tauri::command]
pub async fn account_create(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_session(&auth_state)?;
    accounts::create_account(&db, &user.business_id, Some(&user.name), &payload_object(arg0))
}

#[tauri::command]
pub async fn account_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_session(&auth_state)?;
    let account_id = payload_arg0_as_string(arg0, &["accountId", "account_id", "id"])
        .ok_or("Missing accountId")?;
    accounts::get_account(&db, &user.business_id, &account_id)
}

#[tauri::command]
pub async fn account_list_open(
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_session(&auth_state)?;
    accounts::list_open_accounts(&db, &user.business_id)
}
