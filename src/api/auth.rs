//! Authentication: salted-hash passwords, bearer-token sessions, role checks.
//!
//! Passwords are stored as `"<salt>:<sha256(password + salt)>"`. Login issues
//! a random 32-byte token; only its SHA-256 is stored, so a leaked sessions
//! table cannot be replayed. Session lifetime depends on the role (admins
//! keep a session longest, students shortest), and an expired session is
//! deleted the moment a lookup touches it.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::config::AuthConfig;
use crate::db::{
    DbPool, LoginRequest, LoginResponse, RegisterInstructorRequest, RegisterStudentRequest, Role,
    Session, UpdateProfileRequest, User, UserResponse,
};
use crate::AppState;

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email, validate_password, validate_username};

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let salt_bytes: [u8; 16] = rand::rng().random();
    let salt = hex::encode(salt_bytes);
    let digest = Sha256::digest(format!("{}{}", password, salt).as_bytes());
    format!("{}:{}", salt, hex::encode(digest))
}

/// Verify a password against a stored `salt:hash` pair in constant time.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Some((salt, expected)) = stored.split_once(':') else {
        return false;
    };
    let digest = hex::encode(Sha256::digest(format!("{}{}", password, salt).as_bytes()));
    digest.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Generate a random session token
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn session_ttl_hours(auth: &AuthConfig, role: Role) -> i64 {
    match role {
        Role::Admin => auth.admin_session_hours,
        Role::Instructor => auth.instructor_session_hours,
        Role::Student => auth.student_session_hours,
    }
}

/// Look up a session by raw token. An expired row is deleted on the spot
/// and reported as absent.
pub async fn lookup_session(db: &DbPool, token: &str) -> Result<Option<Session>, sqlx::Error> {
    let token_hash = hash_token(token);
    let session: Option<Session> = sqlx::query_as("SELECT * FROM sessions WHERE token_hash = ?")
        .bind(&token_hash)
        .fetch_optional(db)
        .await?;

    let Some(session) = session else {
        return Ok(None);
    };

    let expired = DateTime::parse_from_rfc3339(&session.expires_at)
        .map(|t| t.with_timezone(&Utc) <= Utc::now())
        .unwrap_or(true);

    if expired {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(&session.id)
            .execute(db)
            .await?;
        return Ok(None);
    }

    Ok(Some(session))
}

/// Resolve a token to its user, or fail with 401.
pub async fn get_current_user(db: &DbPool, token: &str) -> Result<User, ApiError> {
    let session = lookup_session(db, token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))?;

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&session.user_id)
        .fetch_optional(db)
        .await?;

    user.ok_or_else(|| ApiError::unauthorized("Invalid or expired session"))
}

/// Extract the token from headers (`Authorization: Bearer` or `X-API-Key`)
/// or from a `token` query parameter.
fn extract_token(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(auth_header) = headers.get("Authorization").and_then(|h| h.to_str().ok()) {
        if let Some(token) = auth_header.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
        return Some(auth_header.to_string());
    }

    if let Some(api_key) = headers.get("X-API-Key").and_then(|h| h.to_str().ok()) {
        return Some(api_key.to_string());
    }

    query.and_then(|q| {
        q.split('&').find_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            match (parts.next(), parts.next()) {
                (Some("token"), Some(value)) => Some(value.to_string()),
                _ => None,
            }
        })
    })
}

fn token_from_request(request: &Request<Body>) -> Option<String> {
    extract_token(request.headers(), request.uri().query())
}

/// Middleware protecting the authenticated API surface.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = token_from_request(&request)
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if lookup_session(&state.db, &token).await?.is_none() {
        return Err(ApiError::unauthorized("Invalid or expired session"));
    }

    Ok(next.run(request).await)
}

/// Middleware for admin-only route groups.
pub async fn require_admin_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = token_from_request(&request)
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    let user = get_current_user(&state.db, &token).await?;
    if user.role() != Role::Admin {
        return Err(ApiError::forbidden("Admin role required"));
    }

    Ok(next.run(request).await)
}

/// Handler-side guard for instructor endpoints. Admins pass too.
pub fn require_instructor(user: &User) -> Result<(), ApiError> {
    match user.role() {
        Role::Instructor | Role::Admin => Ok(()),
        Role::Student => Err(ApiError::forbidden("Instructor role required")),
    }
}

/// Create the configured admin account when no users exist yet.
pub async fn ensure_admin_user(db: &DbPool, auth: &AuthConfig) -> anyhow::Result<()> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(db)
        .await?;
    if count.0 > 0 {
        return Ok(());
    }

    sqlx::query(
        r#"
        INSERT INTO users (id, username, email, password_hash, role, first_name, last_name)
        VALUES (?, ?, ?, ?, 'admin', 'System', 'Admin')
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&auth.admin_username)
    .bind(&auth.admin_email)
    .bind(hash_password(&auth.admin_password))
    .execute(db)
    .await?;

    tracing::info!(username = %auth.admin_username, "Created default admin user");
    tracing::info!("Admin password: {}", auth.admin_password);
    Ok(())
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE username = ?")
        .bind(&request.username)
        .fetch_optional(&state.db)
        .await?;

    let user = user.ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

    if !verify_password(&request.password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let role = user.role();
    let token = generate_token();
    let token_hash = hash_token(&token);
    let expires_at =
        (Utc::now() + Duration::hours(session_ttl_hours(&state.config.auth, role))).to_rfc3339();

    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, role, expires_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&user.id)
    .bind(&token_hash)
    .bind(role.to_string())
    .bind(&expires_at)
    .execute(&state.db)
    .await?;

    sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    tracing::info!(username = %user.username, role = %role, "User logged in");

    Ok(Json(LoginResponse {
        token,
        user: UserResponse::from(user),
    }))
}

/// Logout endpoint: deletes the presented session.
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = extract_token(&headers, None)
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
        .bind(hash_token(&token))
        .execute(&state.db)
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Student self-registration
pub async fn register_student(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterStudentRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_username(&request.username) {
        errors.add("username", e);
    }
    if let Err(e) = validate_email(&request.email) {
        errors.add("email", e);
    }
    if let Err(e) = validate_password(&request.password) {
        errors.add("password", e);
    }
    if request.student_id.trim().is_empty() {
        errors.add("student_id", "Student ID is required");
    }
    errors.finish()?;

    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO users (id, username, email, password_hash, role, first_name, last_name, student_id, major, year)
        VALUES (?, ?, ?, ?, 'student', ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&request.username)
    .bind(&request.email)
    .bind(hash_password(&request.password))
    .bind(&request.first_name)
    .bind(&request.last_name)
    .bind(&request.student_id)
    .bind(&request.major)
    .bind(&request.year)
    .execute(&state.db)
    .await?;

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(username = %user.username, "Student registered");

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// Admin-driven instructor creation
pub async fn register_instructor(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterInstructorRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Err(e) = validate_username(&request.username) {
        errors.add("username", e);
    }
    if let Err(e) = validate_email(&request.email) {
        errors.add("email", e);
    }
    if let Err(e) = validate_password(&request.password) {
        errors.add("password", e);
    }
    errors.finish()?;

    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO users (id, username, email, password_hash, role, first_name, last_name, department)
        VALUES (?, ?, ?, ?, 'instructor', ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&request.username)
    .bind(&request.email)
    .bind(hash_password(&request.password))
    .bind(&request.first_name)
    .bind(&request.last_name)
    .bind(&request.department)
    .execute(&state.db)
    .await?;

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(username = %user.username, "Instructor created");

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

/// Current-user endpoint
pub async fn me(user: User) -> Json<UserResponse> {
    Json(UserResponse::from(user))
}

/// Profile update for the current user
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    sqlx::query(
        r#"
        UPDATE users SET
            first_name = COALESCE(?, first_name),
            last_name = COALESCE(?, last_name),
            phone = COALESCE(?, phone),
            major = COALESCE(?, major),
            year = COALESCE(?, year),
            department = COALESCE(?, department),
            notifications_enabled = COALESCE(?, notifications_enabled),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&request.first_name)
    .bind(&request.last_name)
    .bind(&request.phone)
    .bind(&request.major)
    .bind(&request.year)
    .bind(&request.department)
    .bind(request.notifications_enabled.map(|v| if v { 1i64 } else { 0 }))
    .bind(Utc::now().to_rfc3339())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&user.id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(UserResponse::from(user)))
}

/// Extractor for the current authenticated user
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers, parts.uri.query())
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        get_current_user(&state.db, &token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_password_round_trip() {
        let hash = hash_password("correct horse battery staple");
        assert!(verify_password("correct horse battery staple", &hash));
        assert!(!verify_password("wrong password", &hash));
    }

    #[test]
    fn test_password_hashes_are_salted() {
        let a = hash_password("same password");
        let b = hash_password("same password");
        assert_ne!(a, b);
        assert!(verify_password("same password", &a));
        assert!(verify_password("same password", &b));
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(!verify_password("anything", "no-separator-here"));
        assert!(!verify_password("anything", ""));
    }

    async fn test_state() -> Arc<AppState> {
        let db = crate::db::init_in_memory().await.unwrap();
        Arc::new(AppState::new(Config::default(), db))
    }

    #[tokio::test]
    async fn test_expired_session_lookup_removes_row() {
        let state = test_state().await;
        ensure_admin_user(&state.db, &state.config.auth).await.unwrap();

        let user: User = sqlx::query_as("SELECT * FROM users WHERE role = 'admin'")
            .fetch_one(&state.db)
            .await
            .unwrap();

        let token = generate_token();
        let expired = (Utc::now() - Duration::hours(1)).to_rfc3339();
        sqlx::query(
            "INSERT INTO sessions (id, user_id, token_hash, role, expires_at) VALUES (?, ?, ?, 'admin', ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(&user.id)
        .bind(hash_token(&token))
        .bind(&expired)
        .execute(&state.db)
        .await
        .unwrap();

        assert!(lookup_session(&state.db, &token).await.unwrap().is_none());

        let remaining: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(remaining.0, 0);
    }

    #[tokio::test]
    async fn test_login_issues_usable_token() {
        let state = test_state().await;
        ensure_admin_user(&state.db, &state.config.auth).await.unwrap();

        let response = login(
            State(state.clone()),
            Json(LoginRequest {
                username: state.config.auth.admin_username.clone(),
                password: state.config.auth.admin_password.clone(),
            }),
        )
        .await
        .unwrap();

        let session = lookup_session(&state.db, &response.0.token)
            .await
            .unwrap()
            .expect("session should exist");
        assert_eq!(session.role, "admin");

        let user = get_current_user(&state.db, &response.0.token).await.unwrap();
        assert_eq!(user.username, state.config.auth.admin_username);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_password() {
        let state = test_state().await;
        ensure_admin_user(&state.db, &state.config.auth).await.unwrap();

        let result = login(
            State(state.clone()),
            Json(LoginRequest {
                username: state.config.auth.admin_username.clone(),
                password: "definitely wrong".to_string(),
            }),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_ensure_admin_user_is_idempotent() {
        let state = test_state().await;
        ensure_admin_user(&state.db, &state.config.auth).await.unwrap();
        ensure_admin_user(&state.db, &state.config.auth).await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&state.db)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }

    #[test]
    fn test_extract_token_sources() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(extract_token(&headers, None), Some("abc123".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert("X-API-Key", "key456".parse().unwrap());
        assert_eq!(extract_token(&headers, None), Some("key456".to_string()));

        let headers = HeaderMap::new();
        assert_eq!(
            extract_token(&headers, Some("foo=1&token=qwe")),
            Some("qwe".to_string())
        );
        assert_eq!(extract_token(&headers, Some("foo=1")), None);
    }
}
