use serde_json::Value;

use super::payload_arg0_as_string;
use crate::{auth, db, staff};

#[tauri::command]
pub async fn staff_list(
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    staff::list_staff(&db, &user.business_id)
}

#[tauri::command]
pub async fn staff_invite(
    arg0: Option<Value>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    let email = payload_arg0_as_string(arg0, &["email"]);
    Ok(staff::invite_staff(&user.business_id, email.as_deref()))
}
