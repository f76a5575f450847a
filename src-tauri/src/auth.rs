//! Email/password authentication with bcrypt.
//!
//! Owners sign up with a business name and get a generated business id
//! (`BIZ-XXXXX`); attendants register against that id. Sessions are kept
//! in memory. Failed-login lockout is persisted in `local_settings` so a
//! restart does not reset it.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::data_helpers::value_str;
use crate::db;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const SESSION_INACTIVITY_MINUTES: i64 = 30;
const SESSION_MAX_DURATION_HOURS: i64 = 12;
const MIN_PASSWORD_LEN: usize = 6;

const LOCKOUT_CATEGORY: &str = "auth";
const LOCKOUT_ATTEMPTS_KEY: &str = "lockout_attempts";
const LOCKOUT_LAST_ATTEMPT_KEY: &str = "lockout_last_attempt";

const BUSINESS_ID_PREFIX: &str = "BIZ-";
const BUSINESS_ID_LEN: usize = 5;
const BUSINESS_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[cfg(not(test))]
const HASH_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const HASH_COST: u32 = 4;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// The signed-in user, as the command layer sees it.
#[derive(Clone, Debug)]
pub struct SessionUser {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub business_id: String,
    pub business_name: Option<String>,
}

impl SessionUser {
    pub fn is_owner(&self) -> bool {
        self.role == "owner"
    }
}

#[derive(Clone)]
struct Session {
    session_id: String,
    user: SessionUser,
    login_time: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Expired by inactivity or by maximum duration.
    fn is_expired(&self) -> bool {
        let now = Utc::now();
        now >= self.expires_at
            || now - self.last_activity > Duration::minutes(SESSION_INACTIVITY_MINUTES)
    }

    fn to_user_json(&self) -> Value {
        serde_json::json!({
            "userId": self.user.user_id,
            "email": self.user.email,
            "name": self.user.name,
            "role": self.user.role,
            "businessId": self.user.business_id,
            "businessName": self.user.business_name,
            "sessionId": self.session_id,
        })
    }
}

struct LockoutEntry {
    attempts: u32,
    last_attempt: DateTime<Utc>,
}

/// Tauri managed state for authentication.
pub struct AuthState {
    sessions: Mutex<HashMap<String, Session>>,
    current_session_id: Mutex<Option<String>>,
    lockout: Mutex<LockoutEntry>,
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthState {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            current_session_id: Mutex::new(None),
            lockout: Mutex::new(LockoutEntry {
                attempts: 0,
                last_attempt: Utc::now(),
            }),
        }
    }
}

/// Auth state holds no invariants a panicking holder could break, so a
/// poisoned lock is recovered.
fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn normalize_email(raw: &str) -> Result<String, String> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(format!("Invalid email: {raw}")),
    }
}

fn extract_password(payload: &Value) -> Result<Zeroizing<String>, String> {
    payload
        .get("password")
        .and_then(Value::as_str)
        .map(|p| Zeroizing::new(p.to_string()))
        .ok_or_else(|| "Password is required".to_string())
}

fn hash_password(password: &str) -> Result<String, String> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        ));
    }
    bcrypt::hash(password, HASH_COST).map_err(|e| format!("Failed to hash password: {e}"))
}

fn random_business_id() -> String {
    let suffix: String = Uuid::new_v4().as_bytes()[..BUSINESS_ID_LEN]
        .iter()
        .map(|b| BUSINESS_ID_ALPHABET[*b as usize % BUSINESS_ID_ALPHABET.len()] as char)
        .collect();
    format!("{BUSINESS_ID_PREFIX}{suffix}")
}

fn business_exists(conn: &Connection, business_id: &str) -> Result<bool, String> {
    conn.query_row(
        "SELECT 1 FROM users WHERE business_id = ?1 AND role = 'owner' LIMIT 1",
        params![business_id],
        |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
    .map_err(|e| format!("query business: {e}"))
}

fn business_name_of(conn: &Connection, business_id: &str) -> Result<Option<String>, String> {
    conn.query_row(
        "SELECT business_name FROM users WHERE business_id = ?1 AND role = 'owner' LIMIT 1",
        params![business_id],
        |row| row.get::<_, Option<String>>(0),
    )
    .optional()
    .map(Option::flatten)
    .map_err(|e| format!("query business name: {e}"))
}

fn new_business_id(conn: &Connection) -> Result<String, String> {
    for _ in 0..10 {
        let id = random_business_id();
        if !business_exists(conn, &id)? {
            return Ok(id);
        }
    }
    Err("Could not allocate a business id".into())
}

fn insert_user(conn: &Connection, user: &SessionUser, password_hash: &str) -> Result<(), String> {
    conn.execute(
        "INSERT INTO users (
            id, email, password_hash, name, role, business_id, business_name, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            user.user_id,
            user.email,
            password_hash,
            user.name,
            user.role,
            user.business_id,
            user.business_name,
            db::now_timestamp(),
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            format!("An account with email {} already exists", user.email)
        }
        other => format!("insert user: {other}"),
    })?;
    Ok(())
}

fn check_lockout(lockout: &LockoutEntry) -> Result<(), String> {
    if lockout.attempts >= MAX_FAILED_ATTEMPTS {
        let elapsed = Utc::now() - lockout.last_attempt;
        if elapsed < Duration::minutes(LOCKOUT_MINUTES) {
            let remaining = LOCKOUT_MINUTES - elapsed.num_minutes();
            return Err(format!(
                "Too many failed attempts. Try again in {remaining} minute(s)."
            ));
        }
    }
    Ok(())
}

fn record_failure(lockout: &mut LockoutEntry) {
    // A lapsed lockout starts a fresh count.
    if lockout.attempts >= MAX_FAILED_ATTEMPTS {
        lockout.attempts = 0;
    }
    lockout.attempts += 1;
    lockout.last_attempt = Utc::now();
    warn!(attempts = lockout.attempts, "failed login attempt");
}

fn reset_lockout(lockout: &mut LockoutEntry) {
    lockout.attempts = 0;
    lockout.last_attempt = Utc::now();
}

fn load_lockout_from_db(conn: &Connection) -> LockoutEntry {
    let attempts = db::get_setting(conn, LOCKOUT_CATEGORY, LOCKOUT_ATTEMPTS_KEY)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    let last_attempt = db::get_setting(conn, LOCKOUT_CATEGORY, LOCKOUT_LAST_ATTEMPT_KEY)
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    LockoutEntry {
        attempts,
        last_attempt,
    }
}

fn persist_lockout_to_db(conn: &Connection, lockout: &LockoutEntry) {
    let attempts = db::set_setting(
        conn,
        LOCKOUT_CATEGORY,
        LOCKOUT_ATTEMPTS_KEY,
        &lockout.attempts.to_string(),
    );
    let last = db::set_setting(
        conn,
        LOCKOUT_CATEGORY,
        LOCKOUT_LAST_ATTEMPT_KEY,
        &lockout.last_attempt.to_rfc3339(),
    );
    if let Err(e) = attempts.and(last) {
        warn!("failed to persist lockout state: {e}");
    }
}

/// Create a session for `user` and make it current.
fn create_session(auth: &AuthState, user: SessionUser) -> Value {
    let now = Utc::now();
    let session = Session {
        session_id: Uuid::new_v4().to_string(),
        user,
        login_time: now,
        last_activity: now,
        expires_at: now + Duration::hours(SESSION_MAX_DURATION_HOURS),
    };

    let user_json = session.to_user_json();
    let sid = session.session_id.clone();
    guard(&auth.sessions).insert(sid.clone(), session);
    *guard(&auth.current_session_id) = Some(sid);

    serde_json::json!({
        "success": true,
        "user": user_json,
    })
}

fn get_current_session(auth: &AuthState) -> Option<Session> {
    let current_id = guard(&auth.current_session_id).clone()?;
    let session = guard(&auth.sessions).get(&current_id)?.clone();
    if session.is_expired() {
        return None;
    }
    Some(session)
}

fn drop_current_session(auth: &AuthState) -> Option<String> {
    let sid = guard(&auth.current_session_id).take()?;
    guard(&auth.sessions).remove(&sid);
    Some(sid)
}

// ---------------------------------------------------------------------------
// Public command implementations
// ---------------------------------------------------------------------------

/// Create an owner account and a new business.
pub fn signup_owner(db: &db::DbState, auth: &AuthState, payload: &Value) -> Result<Value, String> {
    let email = normalize_email(&value_str(payload, &["email"]).ok_or("Email is required")?)?;
    let password = extract_password(payload)?;
    let business_name = value_str(payload, &["businessName", "business_name"])
        .ok_or("Business name is required")?;
    let name = value_str(payload, &["name", "ownerName"]).unwrap_or_else(|| "Owner".into());

    let hash = hash_password(&password)?;
    drop(password);

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let user = SessionUser {
        user_id: Uuid::new_v4().to_string(),
        email,
        name,
        role: "owner".into(),
        business_id: new_business_id(&conn)?,
        business_name: Some(business_name),
    };
    insert_user(&conn, &user, &hash)?;
    drop(conn);

    info!(business_id = %user.business_id, email = %user.email, "owner signed up");
    let business_id = user.business_id.clone();
    let mut result = create_session(auth, user);
    result["businessId"] = Value::String(business_id);
    Ok(result)
}

/// Register an attendant under an existing business id.
pub fn register_attendant(
    db: &db::DbState,
    auth: &AuthState,
    payload: &Value,
) -> Result<Value, String> {
    let email = normalize_email(&value_str(payload, &["email"]).ok_or("Email is required")?)?;
    let password = extract_password(payload)?;
    let business_id = value_str(payload, &["businessId", "business_id"])
        .map(|b| b.to_uppercase())
        .ok_or("Business ID is required")?;
    let name = value_str(payload, &["name", "attendantName"]).ok_or("Name is required")?;

    let hash = hash_password(&password)?;
    drop(password);

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    if !business_exists(&conn, &business_id)? {
        return Err(format!("Business not found: {business_id}"));
    }
    let user = SessionUser {
        user_id: Uuid::new_v4().to_string(),
        email,
        name,
        role: "attendant".into(),
        business_name: business_name_of(&conn, &business_id)?,
        business_id,
    };
    insert_user(&conn, &user, &hash)?;
    drop(conn);

    info!(business_id = %user.business_id, email = %user.email, "attendant registered");
    Ok(create_session(auth, user))
}

/// Verify email and password, then create a session.
pub fn login(db: &db::DbState, auth: &AuthState, payload: &Value) -> Result<Value, String> {
    let email = value_str(payload, &["email"])
        .ok_or("Email is required")?
        .to_lowercase();
    let password = extract_password(payload)?;

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let persisted_lockout = load_lockout_from_db(&conn);
    {
        let mut lockout = guard(&auth.lockout);
        *lockout = persisted_lockout;
        check_lockout(&lockout)?;
    }

    let row = conn
        .query_row(
            "SELECT id, email, password_hash, name, role, business_id, business_name
             FROM users WHERE email = ?1",
            params![email],
            |row| {
                Ok((
                    SessionUser {
                        user_id: row.get(0)?,
                        email: row.get(1)?,
                        name: row.get(3)?,
                        role: row.get(4)?,
                        business_id: row.get(5)?,
                        business_name: row.get(6)?,
                    },
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
        .map_err(|e| format!("query user: {e}"))?;

    if let Some((user, hash)) = row {
        if bcrypt::verify(password.as_str(), &hash).unwrap_or(false) {
            let mut lockout = guard(&auth.lockout);
            reset_lockout(&mut lockout);
            persist_lockout_to_db(&conn, &lockout);
            info!(user_id = %user.user_id, role = %user.role, "login successful");
            return Ok(create_session(auth, user));
        }
    }

    let mut lockout = guard(&auth.lockout);
    record_failure(&mut lockout);
    persist_lockout_to_db(&conn, &lockout);
    Err("Invalid email or password".into())
}

pub fn logout(auth: &AuthState) {
    if let Some(sid) = drop_current_session(auth) {
        info!(session_id = %sid, "session logged out");
    }
}

/// The current session's user, or null.
pub fn get_session_json(auth: &AuthState) -> Value {
    match get_current_session(auth) {
        Some(s) => s.to_user_json(),
        None => Value::Null,
    }
}

pub fn validate_session(auth: &AuthState) -> Value {
    match get_current_session(auth) {
        Some(_) => serde_json::json!({ "valid": true }),
        None => {
            drop_current_session(auth);
            serde_json::json!({ "valid": false, "reason": "Session expired or not found" })
        }
    }
}

pub fn get_session_stats(auth: &AuthState) -> Value {
    match get_current_session(auth) {
        Some(s) => serde_json::json!({
            "sessionId": s.session_id,
            "role": s.user.role,
            "loginTime": s.login_time.to_rfc3339(),
            "lastActivity": s.last_activity.to_rfc3339(),
            "expiresAt": s.expires_at.to_rfc3339(),
        }),
        None => serde_json::json!({}),
    }
}

/// Refresh the inactivity timer of the current session.
pub fn track_activity(auth: &AuthState) {
    let current_id = guard(&auth.current_session_id).clone();
    if let Some(sid) = current_id {
        if let Some(session) = guard(&auth.sessions).get_mut(&sid) {
            session.last_activity = Utc::now();
        }
    }
}

/// The signed-in user; counts as activity.
pub fn require_session(auth: &AuthState) -> Result<SessionUser, String> {
    let session = get_current_session(auth).ok_or("Not signed in")?;
    track_activity(auth);
    Ok(session.user)
}

/// The signed-in user, who must be the business owner.
pub fn require_owner(auth: &AuthState) -> Result<SessionUser, String> {
    let user = require_session(auth)?;
    if !user.is_owner() {
        return Err("Only the business owner can do this".into());
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lockout_attempts(db_state: &db::DbState) -> u32 {
        let conn = db_state.conn.lock().expect("db lock");
        db::get_setting(&conn, LOCKOUT_CATEGORY, LOCKOUT_ATTEMPTS_KEY)
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0)
    }

    fn signup(db_state: &db::DbState, auth: &AuthState) -> String {
        let result = signup_owner(
            db_state,
            auth,
            &serde_json::json!({
                "email": "Mama.Njeri@example.com",
                "password": "secret1",
                "businessName": "Njeri Cyber",
            }),
        )
        .expect("signup");
        result["businessId"].as_str().unwrap().to_string()
    }

    fn bad_login(db_state: &db::DbState, auth: &AuthState) -> String {
        login(
            db_state,
            auth,
            &serde_json::json!({ "email": "mama.njeri@example.com", "password": "wrong!" }),
        )
        .expect_err("invalid login should fail")
    }

    #[test]
    fn business_id_shape() {
        for _ in 0..50 {
            let id = random_business_id();
            assert_eq!(id.len(), BUSINESS_ID_PREFIX.len() + BUSINESS_ID_LEN);
            assert!(id.starts_with("BIZ-"));
            assert!(id[4..]
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn signup_creates_owner_session_and_business() {
        let db_state = db::test_db_state();
        let auth = AuthState::new();
        let business_id = signup(&db_state, &auth);

        let user = require_owner(&auth).expect("owner session");
        assert_eq!(user.business_id, business_id);
        assert_eq!(user.email, "mama.njeri@example.com");
        assert_eq!(user.business_name.as_deref(), Some("Njeri Cyber"));
    }

    #[test]
    fn signup_validation() {
        let db_state = db::test_db_state();
        let auth = AuthState::new();
        let short = signup_owner(
            &db_state,
            &auth,
            &serde_json::json!({ "email": "a@b.co", "password": "12345", "businessName": "X" }),
        );
        assert_eq!(short.unwrap_err(), "Password must be at least 6 characters");

        let no_biz = signup_owner(
            &db_state,
            &auth,
            &serde_json::json!({ "email": "a@b.co", "password": "123456" }),
        );
        assert_eq!(no_biz.unwrap_err(), "Business name is required");

        signup(&db_state, &auth);
        let dup = signup_owner(
            &db_state,
            &auth,
            &serde_json::json!({
                "email": "mama.njeri@example.com",
                "password": "secret1",
                "businessName": "Again",
            }),
        );
        assert!(dup.unwrap_err().contains("already exists"));
    }

    #[test]
    fn attendant_registers_against_existing_business() {
        let db_state = db::test_db_state();
        let auth = AuthState::new();
        let business_id = signup(&db_state, &auth);

        let missing = register_attendant(
            &db_state,
            &auth,
            &serde_json::json!({
                "email": "kamau@example.com", "password": "pass123",
                "name": "Kamau", "businessId": "BIZ-NOPE0",
            }),
        );
        assert_eq!(missing.unwrap_err(), "Business not found: BIZ-NOPE0");

        register_attendant(
            &db_state,
            &auth,
            &serde_json::json!({
                "email": "kamau@example.com", "password": "pass123",
                "name": "Kamau", "businessId": business_id.to_lowercase(),
            }),
        )
        .expect("register attendant");

        let user = require_session(&auth).unwrap();
        assert_eq!(user.role, "attendant");
        assert_eq!(user.business_id, business_id);
        assert_eq!(user.business_name.as_deref(), Some("Njeri Cyber"));
        assert_eq!(
            require_owner(&auth).unwrap_err(),
            "Only the business owner can do this"
        );
    }

    #[test]
    fn login_logout_round() {
        let db_state = db::test_db_state();
        let auth = AuthState::new();
        signup(&db_state, &auth);
        logout(&auth);
        assert!(get_session_json(&auth).is_null());
        assert_eq!(require_session(&auth).unwrap_err(), "Not signed in");

        let result = login(
            &db_state,
            &auth,
            &serde_json::json!({ "email": " MAMA.NJERI@example.com ", "password": "secret1" }),
        )
        .expect("login");
        assert_eq!(result["success"], true);
        assert_eq!(result["user"]["role"], "owner");
        assert_eq!(validate_session(&auth)["valid"], true);
    }

    #[test]
    fn expired_session_is_rejected() {
        let db_state = db::test_db_state();
        let auth = AuthState::new();
        signup(&db_state, &auth);
        {
            let mut sessions = auth.sessions.lock().unwrap();
            for session in sessions.values_mut() {
                session.last_activity = Utc::now() - Duration::minutes(31);
            }
        }
        assert!(get_session_json(&auth).is_null());
        assert_eq!(validate_session(&auth)["valid"], false);
    }

    #[test]
    fn lockout_persists_across_auth_state_restart() {
        let db_state = db::test_db_state();
        signup(&db_state, &AuthState::new());
        let auth_before_restart = AuthState::new();

        for _ in 0..MAX_FAILED_ATTEMPTS {
            assert_eq!(bad_login(&db_state, &auth_before_restart), "Invalid email or password");
        }
        assert_eq!(lockout_attempts(&db_state), MAX_FAILED_ATTEMPTS);

        let auth_after_restart = AuthState::new();
        let err = login(
            &db_state,
            &auth_after_restart,
            &serde_json::json!({ "email": "mama.njeri@example.com", "password": "secret1" }),
        )
        .expect_err("lockout should remain active after restart");
        assert!(
            err.contains("Too many failed attempts"),
            "unexpected lockout error message: {err}"
        );
        assert_eq!(lockout_attempts(&db_state), MAX_FAILED_ATTEMPTS);
    }

    #[test]
    fn successful_login_resets_persisted_lockout() {
        let db_state = db::test_db_state();
        signup(&db_state, &AuthState::new());

        let auth = AuthState::new();
        bad_login(&db_state, &auth);
        bad_login(&db_state, &auth);
        assert_eq!(lockout_attempts(&db_state), 2);

        login(
            &db_state,
            &AuthState::new(),
            &serde_json::json!({ "email": "mama.njeri@example.com", "password": "secret1" }),
        )
        .expect("valid login should succeed");
        assert_eq!(lockout_attempts(&db_state), 0);

        bad_login(&db_state, &AuthState::new());
        assert_eq!(lockout_attempts(&db_state), 1);
    }

    #[test]
    fn unknown_email_counts_as_failure() {
        let db_state = db::test_db_state();
        let auth = AuthState::new();
        let err = login(
            &db_state,
            &auth,
            &serde_json::json!({ "email": "nobody@example.com", "password": "whatever" }),
        )
        .unwrap_err();
        assert_eq!(err, "Invalid email or password");
        assert_eq!(lockout_attempts(&db_state), 1);
    }
}
