//! DukaRecon - Tauri v2 backend
//!
//! Registers the IPC command handlers the frontend calls via
//! `@tauri-apps/api/core::invoke()` and wires logging, the SQLite database
//! and the auth state into the app.

use std::path::Path;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod accounts;
mod auth;
mod commands;
mod data_helpers;
mod db;
mod diagnostics;
mod expenses;
mod ledger;
mod mpesa;
mod overview;
mod payments;
mod reconcile;
mod settings;
mod staff;
mod statement;

/// Structured logging to the console and a daily rolling file in `log_dir`.
fn init_logging(log_dir: &Path) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dukarecon_lib=debug"));

    std::fs::create_dir_all(log_dir).ok();
    diagnostics::prune_old_logs(log_dir);

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // The app runs until process exit; dropping the guard would stop the
    // file writer.
    std::mem::forget(_guard);
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .setup(|app| {
            use tauri::Manager;

            init_logging(&app.path().app_log_dir()?);
            info!("Starting DukaRecon v{}", env!("CARGO_PKG_VERSION"));

            let app_data_dir = app.path().app_data_dir()?;
            let db_state = db::init(&app_data_dir)?;
            app.manage(db_state);
            app.manage(auth::AuthState::new());

            info!(data_dir = %app_data_dir.display(), "DukaRecon ready");
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Auth
            commands::auth::auth_signup_owner,
            commands::auth::auth_register_attendant,
            commands::auth::auth_login,
            commands::auth::auth_logout,
            commands::auth::auth_get_current_session,
            commands::auth::auth_validate_session,
            commands::auth::auth_get_session_stats,
            commands::auth::auth_track_activity,
            // Sales
            commands::payments::payment_record,
            commands::payments::payment_verify,
            commands::payments::payment_list,
            commands::payments::payment_list_unverified,
            // Job / credit accounts
            commands::accounts::account_create,
            commands::accounts::account_get,
            commands::accounts::account_list_open,
            // Expenses
            commands::expenses::expense_record,
            commands::expenses::expense_list,
            // Money logs
            commands::mpesa::mpesa_record_log,
            commands::mpesa::mpesa_ingest_sms,
            commands::mpesa::mpesa_list_logs,
            // Reconciliation
            commands::reconciliation::statement_import,
            commands::reconciliation::statement_list_imports,
            commands::reconciliation::reconcile_daily_audit,
            // Ledger
            commands::ledger::ledger_get,
            commands::ledger::ledger_account_history,
            // Dashboard
            commands::overview::overview_get,
            // Staff
            commands::staff::staff_list,
            commands::staff::staff_invite,
            // Settings
            commands::settings::settings_get_business,
            commands::settings::settings_update_business,
            // Diagnostics
            commands::diagnostics::diagnostics_get_about,
            commands::diagnostics::diagnostics_get_system_health,
        ])
        .run(tauri::generate_context!())
        .expect("error while running DukaRecon");
}
