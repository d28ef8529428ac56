//! Notification endpoints: creation, delivery, queue processing, analytics,
//! and per-person preferences.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::{
    CreateNotificationRequest, DeliveryReport, Notification, NotificationAnalytics,
    NotificationChannel, NotificationPreferences, NotificationStatus, UpdatePreferencesRequest,
    User,
};
use crate::AppState;

use super::auth::require_instructor;
use super::error::ApiError;
use super::validation::{validate_username, validate_uuid};

#[derive(Debug, Serialize)]
pub struct CreateNotificationResponse {
    pub notification: Notification,
    /// Present when the notification was due immediately and dispatched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery: Option<DeliveryReport>,
}

/// Create a notification. Staff only.
pub async fn create_notification(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(request): Json<CreateNotificationRequest>,
) -> Result<(StatusCode, Json<CreateNotificationResponse>), ApiError> {
    require_instructor(&user)?;

    if request.title.trim().is_empty() && !request.ai_enhanced {
        return Err(ApiError::validation_field("title", "Title is required"));
    }
    if request.message.trim().is_empty() {
        return Err(ApiError::validation_field("message", "Message is required"));
    }
    if !(1..=5).contains(&request.priority) {
        return Err(ApiError::validation_field("priority", "Priority must be 1-5"));
    }
    if let Some(ts) = &request.scheduled_for {
        if chrono::DateTime::parse_from_rfc3339(ts).is_err() {
            return Err(ApiError::validation_field(
                "scheduled_for",
                "scheduled_for must be an RFC 3339 timestamp",
            ));
        }
    }
    if let Some(target) = &request.target_student {
        if let Err(e) = validate_username(target) {
            return Err(ApiError::validation_field("target_student", e));
        }
    }

    let (notification, delivery) = state
        .notifications
        .create(request)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create notification: {}", e)))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateNotificationResponse {
            notification,
            delivery,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct MeetingReminderRequest {
    pub meeting_title: String,
    /// RFC 3339 meeting start; the reminder is scheduled 15 minutes earlier.
    pub meeting_time: String,
    #[serde(default)]
    pub attendees: Vec<String>,
}

/// Schedule a reminder ahead of a meeting.
pub async fn meeting_reminder(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(request): Json<MeetingReminderRequest>,
) -> Result<(StatusCode, Json<CreateNotificationResponse>), ApiError> {
    require_instructor(&user)?;

    if request.meeting_title.trim().is_empty() {
        return Err(ApiError::validation_field(
            "meeting_title",
            "Meeting title is required",
        ));
    }
    let meeting_time = chrono::DateTime::parse_from_rfc3339(&request.meeting_time)
        .map_err(|_| {
            ApiError::validation_field(
                "meeting_time",
                "meeting_time must be an RFC 3339 timestamp",
            )
        })?
        .with_timezone(&chrono::Utc);

    let (notification, delivery) = state
        .notifications
        .create_meeting_reminder(&request.meeting_title, meeting_time, &request.attendees)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create reminder: {}", e)))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateNotificationResponse {
            notification,
            delivery,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ListNotificationsParams {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

/// Recent notifications, newest first, optionally filtered by status.
pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(params): Query<ListNotificationsParams>,
) -> Result<Json<Vec<Notification>>, ApiError> {
    require_instructor(&user)?;

    let limit = params.limit.unwrap_or(50).clamp(1, 500);

    let notifications: Vec<Notification> = match &params.status {
        Some(status) => {
            let status: NotificationStatus = status
                .parse()
                .map_err(|e: String| ApiError::validation_field("status", e))?;
            sqlx::query_as(
                "SELECT * FROM notifications WHERE status = ? ORDER BY created_at DESC LIMIT ?",
            )
            .bind(status.to_string())
            .bind(limit)
            .fetch_all(&state.db)
            .await?
        }
        None => {
            sqlx::query_as("SELECT * FROM notifications ORDER BY created_at DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&state.db)
                .await?
        }
    };

    Ok(Json(notifications))
}

/// Fetch one notification.
pub async fn get_notification(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<Json<Notification>, ApiError> {
    require_instructor(&user)?;
    if let Err(e) = validate_uuid(&id, "notification_id") {
        return Err(ApiError::validation_field("notification_id", e));
    }

    let notification: Option<Notification> =
        sqlx::query_as("SELECT * FROM notifications WHERE id = ?")
            .bind(&id)
            .fetch_optional(&state.db)
            .await?;

    notification
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Notification not found"))
}

#[derive(Debug, Default, Deserialize)]
pub struct SendParams {
    /// Restrict the attempt to one channel; all configured channels otherwise.
    pub channel: Option<NotificationChannel>,
}

/// Dispatch (or re-dispatch) a notification now.
pub async fn send_notification(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    Query(params): Query<SendParams>,
) -> Result<Json<DeliveryReport>, ApiError> {
    require_instructor(&user)?;
    if let Err(e) = validate_uuid(&id, "notification_id") {
        return Err(ApiError::validation_field("notification_id", e));
    }

    let notification: Option<Notification> =
        sqlx::query_as("SELECT * FROM notifications WHERE id = ?")
            .bind(&id)
            .fetch_optional(&state.db)
            .await?;
    let notification =
        notification.ok_or_else(|| ApiError::not_found("Notification not found"))?;

    let report = state
        .notifications
        .send(&notification, params.channel)
        .await
        .map_err(|e| ApiError::internal(format!("Dispatch failed: {}", e)))?;

    Ok(Json(report))
}

#[derive(Debug, Serialize)]
pub struct ProcessQueueResponse {
    pub sent: usize,
}

/// One pass over due pending notifications.
pub async fn process_queue(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<ProcessQueueResponse>, ApiError> {
    require_instructor(&user)?;

    let sent = state
        .notifications
        .process_queue()
        .await
        .map_err(|e| ApiError::internal(format!("Queue pass failed: {}", e)))?;

    Ok(Json(ProcessQueueResponse { sent }))
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsParams {
    pub days: Option<i64>,
}

/// Delivery and pattern summary over a trailing window (default 30 days).
pub async fn analytics(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(params): Query<AnalyticsParams>,
) -> Result<Json<NotificationAnalytics>, ApiError> {
    require_instructor(&user)?;

    let days = params.days.unwrap_or(30);
    if !(1..=365).contains(&days) {
        return Err(ApiError::validation_field("days", "days must be 1-365"));
    }

    let analytics = state
        .notifications
        .analytics(days)
        .await
        .map_err(|e| ApiError::internal(format!("Analytics failed: {}", e)))?;

    Ok(Json(analytics))
}

/// A person may read their own preferences; staff may read anyone's.
fn check_preferences_access(user: &User, person: &str) -> Result<(), ApiError> {
    if user.username == person {
        return Ok(());
    }
    require_instructor(user)
}

/// Notification preferences for a person, defaults when never set.
pub async fn get_preferences(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(person): Path<String>,
) -> Result<Json<NotificationPreferences>, ApiError> {
    check_preferences_access(&user, &person)?;

    let preferences: Option<NotificationPreferences> =
        sqlx::query_as("SELECT * FROM notification_preferences WHERE person_name = ?")
            .bind(&person)
            .fetch_optional(&state.db)
            .await?;

    let preferences = preferences.unwrap_or(NotificationPreferences {
        person_name: person,
        email_notifications: 1,
        push_notifications: 1,
        notification_times: "09:00,13:00,17:00".to_string(),
        priority_threshold: 2,
        created_at: String::new(),
    });

    Ok(Json(preferences))
}

/// Upsert notification preferences for a person.
pub async fn update_preferences(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(person): Path<String>,
    Json(request): Json<UpdatePreferencesRequest>,
) -> Result<Json<NotificationPreferences>, ApiError> {
    check_preferences_access(&user, &person)?;
    if let Err(e) = validate_username(&person) {
        return Err(ApiError::validation_field("person", e));
    }
    if let Some(threshold) = request.priority_threshold {
        if !(1..=5).contains(&threshold) {
            return Err(ApiError::validation_field(
                "priority_threshold",
                "priority_threshold must be 1-5",
            ));
        }
    }
    if let Some(times) = &request.notification_times {
        let all_valid = times.split(',').all(|t| {
            let mut parts = t.trim().split(':');
            matches!(
                (
                    parts.next().and_then(|h| h.parse::<u32>().ok()),
                    parts.next().and_then(|m| m.parse::<u32>().ok()),
                ),
                (Some(h), Some(m)) if h < 24 && m < 60
            )
        });
        if !all_valid {
            return Err(ApiError::validation_field(
                "notification_times",
                "notification_times must be comma-separated HH:MM values",
            ));
        }
    }

    // Read-merge-write: unset fields keep their stored (or default) value.
    let existing: Option<NotificationPreferences> =
        sqlx::query_as("SELECT * FROM notification_preferences WHERE person_name = ?")
            .bind(&person)
            .fetch_optional(&state.db)
            .await?;

    let mut preferences = existing.unwrap_or(NotificationPreferences {
        person_name: person.clone(),
        email_notifications: 1,
        push_notifications: 1,
        notification_times: "09:00,13:00,17:00".to_string(),
        priority_threshold: 2,
        created_at: chrono::Utc::now().to_rfc3339(),
    });

    if let Some(v) = request.email_notifications {
        preferences.email_notifications = if v { 1 } else { 0 };
    }
    if let Some(v) = request.push_notifications {
        preferences.push_notifications = if v { 1 } else { 0 };
    }
    if let Some(times) = request.notification_times {
        preferences.notification_times = times;
    }
    if let Some(threshold) = request.priority_threshold {
        preferences.priority_threshold = threshold;
    }

    sqlx::query(
        r#"
        INSERT INTO notification_preferences
            (person_name, email_notifications, push_notifications, notification_times, priority_threshold, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(person_name) DO UPDATE SET
            email_notifications = excluded.email_notifications,
            push_notifications = excluded.push_notifications,
            notification_times = excluded.notification_times,
            priority_threshold = excluded.priority_threshold
        "#,
    )
    .bind(&preferences.person_name)
    .bind(preferences.email_notifications)
    .bind(preferences.push_notifications)
    .bind(&preferences.notification_times)
    .bind(preferences.priority_threshold)
    .bind(&preferences.created_at)
    .execute(&state.db)
    .await?;

    Ok(Json(preferences))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn test_state() -> Arc<AppState> {
        let db = crate::db::init_in_memory().await.unwrap();
        Arc::new(AppState::new(Config::default(), db))
    }

    async fn insert_user(state: &AppState, username: &str, role: &str) -> User {
        sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, role) VALUES (?, ?, ?, 'x:y', ?)",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(username)
        .bind(format!("{}@example.edu", username))
        .bind(role)
        .execute(&state.db)
        .await
        .unwrap();

        sqlx::query_as("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_one(&state.db)
            .await
            .unwrap()
    }

    fn request() -> CreateNotificationRequest {
        CreateNotificationRequest {
            title: "Quiz".to_string(),
            message: "quiz tomorrow".to_string(),
            notification_type: "reminder".to_string(),
            priority: 2,
            scheduled_for: None,
            ai_enhanced: false,
            target_student: None,
        }
    }

    #[tokio::test]
    async fn test_students_cannot_create_notifications() {
        let state = test_state().await;
        let student = insert_user(&state, "jdoe", "student").await;

        let err = create_notification(State(state), student, Json(request()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("forbidden"));
    }

    #[tokio::test]
    async fn test_create_and_list_by_status() {
        let state = test_state().await;
        let instructor = insert_user(&state, "prof.smith", "instructor").await;

        create_notification(State(state.clone()), instructor.clone(), Json(request()))
            .await
            .unwrap();

        // No channels configured, so the immediate dispatch fails the row.
        let failed = list_notifications(
            State(state.clone()),
            instructor.clone(),
            Query(ListNotificationsParams {
                status: Some("failed".to_string()),
                limit: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(failed.0.len(), 1);

        let err = list_notifications(
            State(state),
            instructor,
            Query(ListNotificationsParams {
                status: Some("bogus".to_string()),
                limit: None,
            }),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("validation_error"));
    }

    #[tokio::test]
    async fn test_preferences_upsert_and_defaults() {
        let state = test_state().await;
        let student = insert_user(&state, "jdoe", "student").await;

        // Defaults before anything is stored.
        let prefs = get_preferences(
            State(state.clone()),
            student.clone(),
            Path("jdoe".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(prefs.0.priority_threshold, 2);

        let updated = update_preferences(
            State(state.clone()),
            student.clone(),
            Path("jdoe".to_string()),
            Json(UpdatePreferencesRequest {
                email_notifications: Some(false),
                push_notifications: None,
                notification_times: Some("08:00,18:30".to_string()),
                priority_threshold: Some(4),
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.0.email_notifications, 0);
        assert_eq!(updated.0.push_notifications, 1);
        assert_eq!(updated.0.priority_threshold, 4);

        // Partial update leaves the rest untouched.
        let updated = update_preferences(
            State(state),
            student,
            Path("jdoe".to_string()),
            Json(UpdatePreferencesRequest {
                email_notifications: None,
                push_notifications: Some(false),
                notification_times: None,
                priority_threshold: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(updated.0.email_notifications, 0);
        assert_eq!(updated.0.push_notifications, 0);
        assert_eq!(updated.0.notification_times, "08:00,18:30");
    }

    #[tokio::test]
    async fn test_students_cannot_read_foreign_preferences() {
        let state = test_state().await;
        let student = insert_user(&state, "jdoe", "student").await;

        let err = get_preferences(State(state), student, Path("other".to_string()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("forbidden"));
    }
}
