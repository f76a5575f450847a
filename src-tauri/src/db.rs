//! Local SQLite database layer for DukaRecon.
//!
//! Uses rusqlite with WAL mode. Provides schema migrations, settings helpers,
//! timestamp normalization and the local-day windows every daily report
//! queries with. The tables mirror the collections the shop data has always
//! lived in: `users`, `payments`, `accounts`, `expenses` and `mpesa_logs`.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration as StdDuration;
use tracing::{error, info, warn};

/// Tauri managed state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
pub(crate) const CURRENT_SCHEMA_VERSION: i32 = 2;

const DB_FILE_NAME: &str = "dukarecon.db";

/// How long a connection waits on another process's lock.
const BUSY_TIMEOUT: StdDuration = StdDuration::from_secs(5);

/// Initialize the database at `{app_data_dir}/dukarecon.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. The file is the only copy of the shop's
/// records, so it is never deleted: a file SQLite reports as corrupt or not a
/// database is renamed to `dukarecon.db.corrupt-<stamp>` and a fresh one is
/// created; any other failure (a lock held elsewhere, permissions) is
/// returned as is.
pub fn init(app_data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(app_data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = app_data_dir.join(DB_FILE_NAME);
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) if is_corrupt(&first_err) => {
            error!("Database file is unreadable ({first_err}), moving it aside");
            set_aside_corrupt(&db_path)?;
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after moving corrupt file: {e}"))?
        }
        Err(e) => return Err(format!("Database open failed: {e}")),
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas. The busy timeout goes first so
/// the WAL switch waits on other connections instead of failing.
fn open_and_configure(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

fn is_corrupt(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseCorrupt) | Some(ErrorCode::NotADatabase)
    )
}

/// Rename the database and its WAL/SHM companions with a `.corrupt-<stamp>`
/// suffix.
fn set_aside_corrupt(db_path: &Path) -> Result<(), String> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    for suffix in ["", "-wal", "-shm"] {
        let mut from = db_path.as_os_str().to_owned();
        from.push(suffix);
        let from = PathBuf::from(from);
        if !from.exists() {
            continue;
        }
        let mut to = from.as_os_str().to_owned();
        to.push(format!(".corrupt-{stamp}"));
        let to = PathBuf::from(to);
        fs::rename(&from, &to).map_err(|e| {
            format!("Failed to move {} aside: {e}", from.display())
        })?;
        warn!("Moved unreadable database file to {}", to.display());
    }
    Ok(())
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: the shop collections.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- users (owners and attendants)
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            name TEXT NOT NULL,
            role TEXT NOT NULL CHECK (role IN ('owner', 'attendant')),
            business_id TEXT NOT NULL,
            business_name TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_users_business_role
            ON users(business_id, role);

        -- accounts (job / credit records)
        CREATE TABLE IF NOT EXISTS accounts (
            id TEXT PRIMARY KEY,
            business_id TEXT NOT NULL,
            description TEXT NOT NULL,
            customer_phone TEXT,
            total_amount REAL NOT NULL,
            paid_amount REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'open'
                CHECK (status IN ('open', 'cleared')),
            created_by TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_accounts_business_created
            ON accounts(business_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_accounts_business_status
            ON accounts(business_id, status);

        -- payments (sales recorded by attendants)
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            business_id TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount > 0),
            transaction_code TEXT,
            payment_method TEXT NOT NULL DEFAULT 'cash',
            is_verified INTEGER NOT NULL DEFAULT 0,
            account_id TEXT,
            attendant_name TEXT,
            description TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(account_id) REFERENCES accounts(id) ON DELETE SET NULL
        );
        CREATE INDEX IF NOT EXISTS idx_payments_business_created
            ON payments(business_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_payments_business_verified
            ON payments(business_id, is_verified);
        CREATE INDEX IF NOT EXISTS idx_payments_account
            ON payments(account_id);

        -- expenses
        CREATE TABLE IF NOT EXISTS expenses (
            id TEXT PRIMARY KEY,
            business_id TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount > 0),
            category TEXT NOT NULL DEFAULT 'other',
            payment_method TEXT NOT NULL DEFAULT 'cash',
            description TEXT,
            transaction_code TEXT,
            recorded_by TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_expenses_business_created
            ON expenses(business_id, created_at);

        -- mpesa_logs (SMS-derived money movement, one row per code)
        CREATE TABLE IF NOT EXISTS mpesa_logs (
            id TEXT PRIMARY KEY,
            business_id TEXT NOT NULL,
            transaction_code TEXT NOT NULL,
            amount REAL NOT NULL,
            direction TEXT NOT NULL DEFAULT 'received'
                CHECK (direction IN ('received', 'sent')),
            channel TEXT NOT NULL DEFAULT 'mpesa'
                CHECK (channel IN ('mpesa', 'bank')),
            counterparty TEXT,
            status TEXT NOT NULL DEFAULT 'sms',
            raw_message TEXT,
            received_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE(business_id, transaction_code)
        );
        CREATE INDEX IF NOT EXISTS idx_mpesa_logs_business_received
            ON mpesa_logs(business_id, received_at);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1 (shop collections)");
    Ok(())
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, String> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(|e| format!("table_info {table}: {e}"))?;
    let mut rows = stmt
        .query([])
        .map_err(|e| format!("table_info query: {e}"))?;
    while let Some(row) = rows.next().map_err(|e| format!("table_info next: {e}"))? {
        let name: String = row.get(1).map_err(|e| format!("table_info name: {e}"))?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Migration v2: statement verification.
///
/// Adds `verified_via` and `actual_amount` to `payments` so a statement
/// upload can record how and for how much a sale was confirmed, plus the
/// `statement_imports` audit table.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    if !column_exists(conn, "payments", "verified_via")? {
        conn.execute_batch("ALTER TABLE payments ADD COLUMN verified_via TEXT;")
            .map_err(|e| format!("migration v2 add verified_via: {e}"))?;
    }
    if !column_exists(conn, "payments", "actual_amount")? {
        conn.execute_batch("ALTER TABLE payments ADD COLUMN actual_amount REAL;")
            .map_err(|e| format!("migration v2 add actual_amount: {e}"))?;
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS statement_imports (
            id TEXT PRIMARY KEY,
            business_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            rows_processed INTEGER NOT NULL DEFAULT 0,
            rows_accepted INTEGER NOT NULL DEFAULT 0,
            matched INTEGER NOT NULL DEFAULT 0,
            logs_written INTEGER NOT NULL DEFAULT 0,
            imported_by TEXT,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_statement_imports_business
            ON statement_imports(business_id, created_at);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2 (statement verification)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Get a single setting value.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Insert or update a setting.
pub fn set_setting(
    conn: &Connection,
    category: &str,
    key: &str,
    value: &str,
) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET
            setting_value = excluded.setting_value,
            updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Canonical stored form: UTC, millisecond precision, `Z` suffix. Every
/// timestamp column uses it so string order equals time order.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// Parse a client-supplied timestamp into the canonical form.
///
/// Accepts RFC 3339 with any offset, or a naive `YYYY-MM-DD HH:MM[:SS]`
/// (also with `T`) interpreted in the business offset.
pub fn normalize_timestamp(raw: &str, offset_minutes: i32) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(format_timestamp(dt.with_timezone(&Utc)));
    }
    let offset = FixedOffset::east_opt(offset_minutes * 60)?;
    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
        "%d/%m/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M",
    ];
    NAIVE_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(trimmed, fmt)
            .ok()
            .and_then(|naive| naive.and_local_timezone(offset).single())
            .map(|local| format_timestamp(local.with_timezone(&Utc)))
    })
}

/// Half-open `[start, end)` window covering one local calendar day, in the
/// canonical stored timestamp form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
    pub start: String,
    pub end: String,
}

pub fn day_window(date: NaiveDate, offset_minutes: i32) -> Result<DayWindow, String> {
    let offset = FixedOffset::east_opt(offset_minutes * 60)
        .ok_or_else(|| format!("Invalid UTC offset: {offset_minutes} minutes"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| naive.and_local_timezone(offset).single())
        .ok_or_else(|| format!("Invalid date: {date}"))?;
    let start = midnight.with_timezone(&Utc);
    let end = start + Duration::days(1);
    Ok(DayWindow {
        date,
        start: format_timestamp(start),
        end: format_timestamp(end),
    })
}

/// Run all migrations on the given connection (test helper, not public API).
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("run_migrations should succeed in test");
}

/// In-memory database with every migration applied.
#[cfg(test)]
pub fn test_db_state() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .expect("pragma setup");
    run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
