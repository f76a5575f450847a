use serde_json::Value;

use super::{payload_arg0_as_string, payload_object};
use crate::{auth, db, mpesa};

#[tauri::command]
pub async fn mpesa_record_log(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    mpesa::record_log(&db, &user.business_id, &payload_object(arg0))
}

#[tauri::command]
pub async fn mpesa_ingest_sms(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    let message = payload_arg0_as_string(arg0, &["message", "sms", "body"])
        .ok_or("Missing message")?;
    mpesa::ingest_sms(&db, &user.business_id, &message)
}

#[tauri::command]
pub async fn mpesa_list_logs(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    let date = payload_arg0_as_string(arg0, &["date"]);
    mpesa::list_logs(&db, &user.business_id, date.as_deref())
}
