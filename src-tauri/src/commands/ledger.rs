use serde::Deserialize;
use serde_json::Value;

use super::{payload_arg0_as_string, payload_object};
use crate::ledger::{self, LedgerView};
use crate::{auth, db};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LedgerQuery {
    #[serde(default)]
    view: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default, alias = "searchTerm", alias = "search_term")]
    search: Option<String>,
}

#[tauri::command]
pub async fn ledger_get(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    let query: LedgerQuery = serde_json::from_value(payload_object(arg0))
        .map_err(|e| format!("Invalid ledger query: {e}"))?;
    let view = LedgerView::parse(query.view.as_deref())?;
    ledger::ledger(
        &db,
        &user.business_id,
        view,
        query.date.as_deref(),
        query.search.as_deref(),
    )
}

#[tauri::command]
pub async fn ledger_account_history(
    arg0: Option<Value>,
    db: tauri::State<'_, db::DbState>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    let user = auth::require_owner(&auth_state)?;
    let account_id = payload_arg0_as_string(arg0, &["accountId", "account_id", "id"])
        .ok_or("Missing accountId")?;
    ledger::account_history(&db, &user.business_id, &account_id)
}
