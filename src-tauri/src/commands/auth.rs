use serde_json::Value;
use tauri::Emitter;

use super::payload_object;
use crate::{auth, db};

#[tauri::command]
pub async fn auth_signup_owner(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    auth::signup_owner(&db, &auth_state, &payload_object(arg0))
}

#[tauri::command]
pub async fn auth_register_attendant(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    auth::register_attendant(&db, &auth_state, &payload_object(arg0))
}

#[tauri::command]
pub async fn auth_login(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    auth::login(&db, &auth_state, &payload_object(arg0))
}

#[tauri::command]
pub async fn auth_logout(
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<(), String> {
    auth::logout(&auth_state);
    let _ = app.emit("session_timeout", serde_json::json!({ "reason": "logout" }));
    Ok(())
}

#[tauri::command]
pub async fn auth_get_current_session(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    Ok(auth::get_session_json(&auth_state))
}

#[tauri::command]
pub async fn auth_validate_session(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    Ok(auth::validate_session(&auth_state))
}

#[tauri::command]
pub async fn auth_get_session_stats(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    Ok(auth::get_session_stats(&auth_state))
}

#[tauri::command]
pub async fn auth_track_activity(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<(), String> {
    auth::track_activity(&auth_state);
    Ok(())
}
