use serde_json::Value;

use crate::{auth, db, overview};

#[tauri::command]
pub async fn overview_get(
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    overview::get_overview(&db, &user.business_id)
}
