use serde_json::Value;

use super::payload_object;
use crate::{auth, db, settings};

#[tauri::command]
pub async fn settings_get_business(
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    auth::require_session(&auth_state)?;
    settings::get_business_settings(&db)
}

#[tauri::command]
pub async fn settings_update_business(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    auth::require_owner(&auth_state)?;
    settings::update_business_settings(&db, &payload_object(arg0))
}
