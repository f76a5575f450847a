use serde_json::Value;

use super::{payload_arg0_as_string, payload_object, with_default};
use crate::{auth, db, payments};

#[tauri::command]
pub async fn payment_record(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_session(&auth_state)?;
    let payload = with_default(payload_object(arg0), "attendantName", &user.name);
    payments::record_payment(&db, &user.business_id, &payload)
}

#[tauri::command]
pub async fn payment_verify(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    let payment_id = payload_arg0_as_string(arg0, &["paymentId", "payment_id", "id"])
        .ok_or("Missing paymentId")?;
    payments::verify_payment(&db, &user.business_id, &payment_id)
}

#[tauri::command]
pub async fn payment_list(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_session(&auth_state)?;
    let date = payload_arg0_as_string(arg0, &["date"]);
    payments::list_payments(&db, &user.business_id, date.as_deref())
}

#[tauri::command]
pub async fn payment_list_unverified(
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    payments::list_unverified(&db, &user.business_id)
}
