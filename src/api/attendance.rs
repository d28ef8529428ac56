//! Face-recognition attendance endpoints.
//!
//! Images arrive as multipart uploads; the engine turns them into embeddings
//! and matches against the registered gallery.

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::attendance::{AttendanceOutcome, RecognizedFace};
use crate::db::{AttendanceRecord, AttendanceStats, User};
use crate::AppState;

use super::auth::require_instructor;
use super::error::ApiError;
use super::validation::validate_username;

/// Collected fields of a face-image upload.
struct FaceUpload {
    name: Option<String>,
    image: Option<Vec<u8>>,
}

async fn read_upload(mut multipart: Multipart) -> Result<FaceUpload, ApiError> {
    let mut upload = FaceUpload {
        name: None,
        image: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::bad_request("Malformed multipart body"))?
    {
        match field.name() {
            Some("name") => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| ApiError::validation_field("name", "Name must be text"))?;
                upload.name = Some(text.trim().to_string());
            }
            Some("image") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| ApiError::validation_field("image", "Could not read image"))?;
                upload.image = Some(bytes.to_vec());
            }
            _ => {}
        }
    }

    Ok(upload)
}

fn require_image(upload: &FaceUpload) -> Result<&[u8], ApiError> {
    match &upload.image {
        Some(image) if !image.is_empty() => Ok(image),
        _ => Err(ApiError::validation_field("image", "Image is required")),
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub person_name: String,
    pub registered_people: usize,
}

/// Register (or re-register) a person's face. Instructor only.
pub async fn register_person(
    State(state): State<Arc<AppState>>,
    user: User,
    multipart: Multipart,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    require_instructor(&user)?;

    let upload = read_upload(multipart).await?;
    let name = upload
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::validation_field("name", "Name is required"))?;
    if let Err(e) = validate_username(&name) {
        return Err(ApiError::validation_field("name", e));
    }
    let image = require_image(&upload)?;

    state.attendance.register_person(&name, image).await?;

    // Best effort: registration stands even if the notification fails.
    if let Err(e) = state
        .notifications
        .create_system_notification(
            "Person Registered",
            &format!("{} has been registered for attendance tracking", name),
        )
        .await
    {
        tracing::warn!(error = %e, "Failed to raise registration notification");
    }

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            person_name: name,
            registered_people: state.attendance.registered_people().len(),
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct RecognizeResponse {
    pub faces: Vec<RecognizedFace>,
    pub total_faces: usize,
}

/// Recognize faces in an image without recording attendance.
pub async fn recognize(
    State(state): State<Arc<AppState>>,
    _user: User,
    multipart: Multipart,
) -> Result<Json<RecognizeResponse>, ApiError> {
    let upload = read_upload(multipart).await?;
    let image = require_image(&upload)?;

    let faces = state.attendance.recognize(image)?;
    let total_faces = faces.len();

    Ok(Json(RecognizeResponse { faces, total_faces }))
}

#[derive(Debug, Serialize)]
pub struct MarkResponse {
    #[serde(flatten)]
    pub outcome: AttendanceOutcome,
    pub notification_id: Option<String>,
}

/// Recognize faces and record attendance for confident matches, then raise
/// an attendance notification describing the outcome.
pub async fn mark_attendance(
    State(state): State<Arc<AppState>>,
    user: User,
    multipart: Multipart,
) -> Result<Json<MarkResponse>, ApiError> {
    require_instructor(&user)?;

    let upload = read_upload(multipart).await?;
    let image = require_image(&upload)?;

    let outcome = state.attendance.mark_attendance(image, None).await?;

    let recognized: Vec<String> = outcome
        .recognized_faces
        .iter()
        .map(|f| f.name.clone())
        .collect();

    let notification_id = match state
        .notifications
        .create_attendance_notification(&recognized, outcome.unknown_faces)
        .await
    {
        Ok((notification, _)) => Some(notification.id),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to raise attendance notification");
            None
        }
    };

    Ok(Json(MarkResponse {
        outcome,
        notification_id,
    }))
}

/// Today's attendance records, newest first.
pub async fn today_records(
    State(state): State<Arc<AppState>>,
    _user: User,
) -> Result<Json<Vec<AttendanceRecord>>, ApiError> {
    Ok(Json(state.attendance.today_records().await?))
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub days: Option<i64>,
}

/// Aggregate attendance counts over a trailing window (default 30 days).
pub async fn stats(
    State(state): State<Arc<AppState>>,
    _user: User,
    Query(params): Query<StatsParams>,
) -> Result<Json<AttendanceStats>, ApiError> {
    let days = params.days.unwrap_or(30);
    if !(1..=365).contains(&days) {
        return Err(ApiError::validation_field("days", "days must be 1-365"));
    }
    Ok(Json(state.attendance.stats(days).await?))
}

#[derive(Debug, Serialize)]
pub struct PeopleResponse {
    pub people: Vec<String>,
    pub total: usize,
}

/// Names with a registered face encoding.
pub async fn registered_people(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<Json<PeopleResponse>, ApiError> {
    require_instructor(&user)?;

    let mut people = state.attendance.registered_people();
    people.sort();
    let total = people.len();

    Ok(Json(PeopleResponse { people, total }))
}
