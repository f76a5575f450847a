use serde_json::Value;
use tauri::Manager;

use crate::{auth, db, diagnostics};

#[tauri::command]
pub async fn diagnostics_get_about() -> Result<Value, String> {
    Ok(diagnostics::get_about_info())
}

#[tauri::command]
pub async fn diagnostics_get_system_health(
    app: tauri::AppHandle,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    let log_dir = app.path().app_log_dir().map_err(|e| e.to_string())?;
    diagnostics::get_system_health(&db, &user.business_id, &log_dir)
}
