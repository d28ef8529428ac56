//! QR check-in session endpoints.
//!
//! An instructor opens a session for a class, which issues a signed QR
//! payload and records a matching row. Students submit the scanned payload;
//! validation runs signature, type, expiry, class, enrollment, then a
//! duplicate check, in that order.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::attendance::qr::QrPayload;
use crate::db::{
    AttendanceMethod, AttendanceSession, CheckInRequest, CheckInResponse, Class,
    CreateNotificationRequest, OpenSessionRequest, Role, User,
};
use crate::AppState;

use super::auth::require_instructor;
use super::error::ApiError;
use super::validation::validate_class_code;

#[derive(Debug, Serialize)]
pub struct OpenSessionResponse {
    pub session: AttendanceSession,
    pub payload: QrPayload,
    /// The exact JSON string to encode into the QR image.
    pub encoded: String,
}

/// Open a check-in window for a class and issue its signed payload.
pub async fn open_session(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(request): Json<OpenSessionRequest>,
) -> Result<(StatusCode, Json<OpenSessionResponse>), ApiError> {
    require_instructor(&user)?;
    if let Err(e) = validate_class_code(&request.class_code) {
        return Err(ApiError::validation_field("class_code", e));
    }

    let class: Option<Class> = sqlx::query_as("SELECT * FROM classes WHERE code = ?")
        .bind(&request.class_code)
        .fetch_optional(&state.db)
        .await?;
    let class = class.ok_or_else(|| ApiError::not_found("Class not found"))?;

    if user.role() != Role::Admin && class.instructor != user.username {
        return Err(ApiError::forbidden("You do not manage this class"));
    }

    let valid_minutes = request
        .valid_minutes
        .unwrap_or(state.config.attendance.qr_valid_minutes);
    if !(1..=24 * 60).contains(&valid_minutes) {
        return Err(ApiError::validation_field(
            "valid_minutes",
            "valid_minutes must be 1-1440",
        ));
    }

    let payload = state
        .qr
        .issue(&class.code, &user.username, valid_minutes, Utc::now());

    sqlx::query(
        r#"
        INSERT INTO attendance_sessions (id, class_code, instructor, issued_at, expires_at, valid_minutes)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&payload.session_id)
    .bind(&payload.class_code)
    .bind(&payload.instructor)
    .bind(&payload.issued_at)
    .bind(&payload.expiry)
    .bind(payload.valid_minutes)
    .execute(&state.db)
    .await?;

    let session: AttendanceSession =
        sqlx::query_as("SELECT * FROM attendance_sessions WHERE id = ?")
            .bind(&payload.session_id)
            .fetch_one(&state.db)
            .await?;

    tracing::info!(
        class = %session.class_code,
        session_id = %session.id,
        valid_minutes,
        "Check-in session opened"
    );

    let encoded = payload.to_json();
    Ok((
        StatusCode::CREATED,
        Json(OpenSessionResponse {
            session,
            payload,
            encoded,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsParams {
    pub class_code: Option<String>,
}

/// List check-in sessions: admins see all, instructors their own.
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(params): Query<ListSessionsParams>,
) -> Result<Json<Vec<AttendanceSession>>, ApiError> {
    require_instructor(&user)?;

    let sessions: Vec<AttendanceSession> = match (&params.class_code, user.role()) {
        (Some(code), Role::Admin) => {
            sqlx::query_as(
                "SELECT * FROM attendance_sessions WHERE class_code = ? ORDER BY issued_at DESC",
            )
            .bind(code)
            .fetch_all(&state.db)
            .await?
        }
        (None, Role::Admin) => {
            sqlx::query_as("SELECT * FROM attendance_sessions ORDER BY issued_at DESC")
                .fetch_all(&state.db)
                .await?
        }
        (Some(code), _) => {
            sqlx::query_as(
                "SELECT * FROM attendance_sessions WHERE class_code = ? AND instructor = ? ORDER BY issued_at DESC",
            )
            .bind(code)
            .bind(&user.username)
            .fetch_all(&state.db)
            .await?
        }
        (None, _) => {
            sqlx::query_as(
                "SELECT * FROM attendance_sessions WHERE instructor = ? ORDER BY issued_at DESC",
            )
            .bind(&user.username)
            .fetch_all(&state.db)
            .await?
        }
    };

    Ok(Json(sessions))
}

/// Close a check-in session early. Scans against it are rejected afterwards
/// even if the payload has not yet expired.
pub async fn close_session(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<AttendanceSession>, ApiError> {
    require_instructor(&user)?;

    let session: Option<AttendanceSession> =
        sqlx::query_as("SELECT * FROM attendance_sessions WHERE id = ?")
            .bind(&id)
            .fetch_optional(&state.db)
            .await?;
    let session = session.ok_or_else(|| ApiError::not_found("Check-in session not found"))?;

    if user.role() != Role::Admin && session.instructor != user.username {
        return Err(ApiError::forbidden("You do not manage this session"));
    }

    sqlx::query("UPDATE attendance_sessions SET closed = 1 WHERE id = ?")
        .bind(&session.id)
        .execute(&state.db)
        .await?;

    let session: AttendanceSession =
        sqlx::query_as("SELECT * FROM attendance_sessions WHERE id = ?")
            .bind(&id)
            .fetch_one(&state.db)
            .await?;

    tracing::info!(session_id = %session.id, "Check-in session closed");

    Ok(Json(session))
}

/// Student check-in with a scanned QR payload.
pub async fn check_in(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(request): Json<CheckInRequest>,
) -> Result<Json<CheckInResponse>, ApiError> {
    // Signature, type, and expiry. An expired payload fails here no matter
    // how valid the rest of it is.
    let payload = state.qr.verify(&request.payload, Utc::now())?;

    let session: Option<AttendanceSession> =
        sqlx::query_as("SELECT * FROM attendance_sessions WHERE id = ?")
            .bind(&payload.session_id)
            .fetch_optional(&state.db)
            .await?;
    let session = session.ok_or_else(|| ApiError::not_found("Check-in session not found"))?;
    if session.is_closed() {
        return Err(ApiError::gone("Check-in session is closed"));
    }

    let class: Option<Class> = sqlx::query_as("SELECT * FROM classes WHERE code = ?")
        .bind(&payload.class_code)
        .fetch_optional(&state.db)
        .await?;
    let class = class.ok_or_else(|| ApiError::not_found("Class not found"))?;

    let enrolled: Option<(String,)> = sqlx::query_as(
        "SELECT student_username FROM enrollments WHERE class_id = ? AND student_username = ?",
    )
    .bind(&class.id)
    .bind(&user.username)
    .fetch_optional(&state.db)
    .await?;
    if enrolled.is_none() {
        return Err(ApiError::forbidden("You are not enrolled in this class"));
    }

    if state
        .attendance
        .already_marked(&session.id, &user.username)
        .await?
    {
        return Err(ApiError::conflict(
            "Attendance already recorded for this session",
        ));
    }

    let record = state
        .attendance
        .add_record(
            &user.username,
            None,
            AttendanceMethod::Qr,
            Some(&class.code),
            Some(&session.id),
            None,
        )
        .await?;

    tracing::info!(
        student = %user.username,
        class = %class.code,
        session_id = %session.id,
        "QR check-in recorded"
    );

    // Best effort: a failed instructor notification never undoes a check-in.
    let notify = state
        .notifications
        .create(CreateNotificationRequest {
            title: "QR Check-in".to_string(),
            message: format!(
                "{} checked in to {} at {}",
                user.username, class.code, record.timestamp
            ),
            notification_type: "attendance".to_string(),
            priority: 2,
            scheduled_for: None,
            ai_enhanced: false,
            target_student: Some(session.instructor.clone()),
        })
        .await;
    if let Err(e) = notify {
        tracing::warn!(error = %e, "Failed to notify instructor of check-in");
    }

    Ok(Json(CheckInResponse {
        class_code: class.code,
        session_id: session.id,
        marked_at: record.timestamp,
    }))
}
