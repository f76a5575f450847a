use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use super::{payload_arg0_as_string, payload_object};
use crate::{auth, db, reconcile, statement};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementImportPayload {
    /// Path picked in the file dialog.
    #[serde(default, alias = "file_path", alias = "filePath")]
    path: Option<String>,
    #[serde(default, alias = "file_name")]
    file_name: Option<String>,
    /// Raw file contents when the frontend read the file itself.
    #[serde(default)]
    bytes: Option<Vec<u8>>,
}

/// Resolve the payload to `(file name, contents)`, reading the file off disk
/// when only a path was sent.
async fn load_statement(payload: StatementImportPayload) -> Result<(String, Vec<u8>), String> {
    match (payload.bytes, payload.path) {
        (Some(bytes), path) => {
            let name = payload
                .file_name
                .or_else(|| path.as_deref().and_then(file_name_of))
                .ok_or("Missing fileName")?;
            Ok((name, bytes))
        }
        (None, Some(path)) => {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| format!("Could not read {path}: {e}"))?;
            let name = payload
                .file_name
                .or_else(|| file_name_of(&path))
                .ok_or("Missing fileName")?;
            Ok((name, bytes))
        }
        (None, None) => Err("Missing statement file".into()),
    }
}

fn file_name_of(path: &str) -> Option<String> {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .map(String::from)
}

#[tauri::command]
pub async fn statement_import(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    let payload: StatementImportPayload = serde_json::from_value(payload_object(arg0))
        .map_err(|e| format!("Invalid statement payload: {e}"))?;
    let (file_name, bytes) = load_statement(payload).await?;
    info!(file = %file_name, size = bytes.len(), "Statement upload received");
    statement::import_statement(&db, &user.business_id, &file_name, &bytes, Some(&user.email))
}

#[tauri::command]
pub async fn statement_list_imports(
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    statement::list_imports(&db, &user.business_id)
}

#[tauri::command]
pub async fn reconcile_daily_audit(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    let date = payload_arg0_as_string(arg0, &["date"]);
    reconcile::daily_audit(&db, &user.business_id, date.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_statement_reads_path_and_derives_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("march.csv");
        std::fs::write(&path, "Receipt No.,Paid In\nA1B2C3D4,100\n").unwrap();

        let payload: StatementImportPayload = serde_json::from_value(serde_json::json!({
            "path": path.to_string_lossy(),
        }))
        .unwrap();
        let (name, bytes) = load_statement(payload).await.unwrap();
        assert_eq!(name, "march.csv");
        assert!(bytes.starts_with(b"Receipt No."));
    }

    #[tokio::test]
    async fn load_statement_needs_a_name_for_raw_bytes() {
        let payload: StatementImportPayload =
            serde_json::from_value(serde_json::json!({ "bytes": [65, 66] })).unwrap();
        assert_eq!(load_statement(payload).await.unwrap_err(), "Missing fileName");

        let payload: StatementImportPayload = serde_json::from_value(serde_json::json!({}))
            .unwrap();
        assert_eq!(load_statement(payload).await.unwrap_err(), "Missing statement file");
    }
}
