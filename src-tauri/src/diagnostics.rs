//! Diagnostics for DukaRecon.
//!
//! Provides:
//! - **About info**: version, build time, git SHA, platform
//! - **System health**: schema version, database size, record counts and the
//!   last statement import for the signed-in business
//! - **Log pruning**: keeps the rolling log directory `lib.rs` writes to
//!   from growing without bound.

use crate::db::DbState;
use chrono::{TimeZone, Utc};
use rusqlite::params;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// File name prefix of the daily rolling log.
pub const LOG_FILE_PREFIX: &str = "dukarecon";

/// Tables counted on the health screen.
const COUNTED_TABLES: &[&str] = &["payments", "accounts", "expenses", "mpesa_logs", "users"];

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

fn build_time() -> String {
    env!("BUILD_EPOCH")
        .parse::<i64>()
        .ok()
        .filter(|secs| *secs > 0)
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "unknown".into())
}

/// Returns version, build time, git SHA, and platform info.
pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": build_time(),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// System health
// ---------------------------------------------------------------------------

pub fn get_system_health(
    db: &DbState,
    business_id: &str,
    log_dir: &Path,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let schema_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let mut counts = serde_json::Map::new();
    for table in COUNTED_TABLES {
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE business_id = ?1"),
                params![business_id],
                |row| row.get(0),
            )
            .unwrap_or_else(|e| {
                warn!("count {table} failed: {e}");
                0
            });
        counts.insert((*table).to_string(), json!(count));
    }

    let last_import: Value = conn
        .query_row(
            "SELECT file_name, matched, rows_processed, created_at
             FROM statement_imports WHERE business_id = ?1
             ORDER BY created_at DESC LIMIT 1",
            params![business_id],
            |row| {
                Ok(json!({
                    "fileName": row.get::<_, String>(0)?,
                    "matched": row.get::<_, i64>(1)?,
                    "totalProcessed": row.get::<_, i64>(2)?,
                    "createdAt": row.get::<_, String>(3)?,
                }))
            },
        )
        .unwrap_or(Value::Null);

    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    Ok(json!({
        "schemaVersion": schema_version,
        "dbSizeBytes": db_size,
        "recordCounts": counts,
        "lastStatementImport": last_import,
        "logDir": log_dir.to_string_lossy(),
    }))
}

// ---------------------------------------------------------------------------
// Log pruning
// ---------------------------------------------------------------------------

/// Prune old log files in `log_dir`, keeping only the most recent
/// `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    if !log_dir.exists() {
        return;
    }

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    if let Ok(entries) = fs::read_dir(log_dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let is_log = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|name| name.starts_with(&format!("{LOG_FILE_PREFIX}.")));
            if is_log {
                let modified = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::UNIX_EPOCH);
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_about_info_has_required_fields() {
        let info = get_about_info();
        assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
        assert!(info.get("buildTimestamp").is_some());
        assert!(info.get("gitSha").is_some());
        assert!(info.get("platform").is_some());
    }

    #[test]
    fn test_system_health_with_on_disk_db() {
        let dir = tempfile::tempdir().unwrap();
        let db_state = crate::db::init(dir.path()).unwrap();
        crate::payments::record_payment(&db_state, "BIZ-TEST1", &json!({ "amount": 50 })).unwrap();

        let log_dir = dir.path().join("logs");
        let health = get_system_health(&db_state, "BIZ-TEST1", &log_dir).unwrap();
        assert_eq!(health["schemaVersion"], crate::db::CURRENT_SCHEMA_VERSION);
        assert_eq!(health["recordCounts"]["payments"], 1);
        assert_eq!(health["recordCounts"]["mpesa_logs"], 0);
        assert!(health["lastStatementImport"].is_null());
        assert!(health["dbSizeBytes"].as_u64().unwrap() > 0);
        assert_eq!(health["logDir"], log_dir.to_string_lossy().as_ref());
    }

    #[test]
    fn test_prune_keeps_newest_logs_only() {
        let dir = tempfile::tempdir().unwrap();
        for day in 1..=(MAX_LOG_FILES + 3) {
            let path = dir.path().join(format!("{LOG_FILE_PREFIX}.2024-03-{day:02}"));
            fs::write(&path, "line\n").unwrap();
            let mtime = std::time::UNIX_EPOCH + std::time::Duration::from_secs(day as u64 * 86_400);
            fs::File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(mtime)
                .unwrap();
        }
        fs::write(dir.path().join("unrelated.txt"), "keep").unwrap();

        prune_old_logs(dir.path());

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left.len(), MAX_LOG_FILES + 1);
        assert!(left.contains(&"unrelated.txt".to_string()));
        assert!(!left.contains(&format!("{LOG_FILE_PREFIX}.2024-03-01")));
    }
}
