//! Class management and enrollment endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::db::{Class, ClassResponse, CreateClassRequest, EnrollRequest, Role, User};
use crate::AppState;

use super::auth::require_instructor;
use super::error::ApiError;
use super::validation::{validate_class_code, validate_username};

async fn fetch_class(state: &AppState, code: &str) -> Result<Class, ApiError> {
    let class: Option<Class> = sqlx::query_as("SELECT * FROM classes WHERE code = ?")
        .bind(code)
        .fetch_optional(&state.db)
        .await?;
    class.ok_or_else(|| ApiError::not_found("Class not found"))
}

async fn roster(state: &AppState, class_id: &str) -> Result<Vec<String>, ApiError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT student_username FROM enrollments WHERE class_id = ? ORDER BY student_username",
    )
    .bind(class_id)
    .fetch_all(&state.db)
    .await?;
    Ok(rows.into_iter().map(|(username,)| username).collect())
}

/// Instructors may only touch their own classes; admins may touch any.
fn check_class_owner(user: &User, class: &Class) -> Result<(), ApiError> {
    if user.role() == Role::Admin || class.instructor == user.username {
        Ok(())
    } else {
        Err(ApiError::forbidden("You do not manage this class"))
    }
}

#[derive(Debug, Deserialize)]
pub struct ListClassesParams {
    /// Admins may filter by instructor username.
    pub instructor: Option<String>,
}

/// List classes visible to the caller: admins see all (optionally filtered),
/// instructors their own, students the classes they are enrolled in.
pub async fn list_classes(
    State(state): State<Arc<AppState>>,
    user: User,
    Query(params): Query<ListClassesParams>,
) -> Result<Json<Vec<ClassResponse>>, ApiError> {
    let classes: Vec<Class> = match user.role() {
        Role::Admin => match &params.instructor {
            Some(instructor) => {
                sqlx::query_as("SELECT * FROM classes WHERE instructor = ? ORDER BY code")
                    .bind(instructor)
                    .fetch_all(&state.db)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM classes ORDER BY code")
                    .fetch_all(&state.db)
                    .await?
            }
        },
        Role::Instructor => {
            sqlx::query_as("SELECT * FROM classes WHERE instructor = ? ORDER BY code")
                .bind(&user.username)
                .fetch_all(&state.db)
                .await?
        }
        Role::Student => {
            sqlx::query_as(
                r#"
                SELECT c.* FROM classes c
                JOIN enrollments e ON e.class_id = c.id
                WHERE e.student_username = ?
                ORDER BY c.code
                "#,
            )
            .bind(&user.username)
            .fetch_all(&state.db)
            .await?
        }
    };

    let mut responses = Vec::with_capacity(classes.len());
    for class in classes {
        let students = roster(&state, &class.id).await?;
        responses.push(ClassResponse::from_class(class, students));
    }

    Ok(Json(responses))
}

/// Create a class owned by the calling instructor.
pub async fn create_class(
    State(state): State<Arc<AppState>>,
    user: User,
    Json(request): Json<CreateClassRequest>,
) -> Result<(StatusCode, Json<ClassResponse>), ApiError> {
    require_instructor(&user)?;

    if let Err(e) = validate_class_code(&request.code) {
        return Err(ApiError::validation_field("code", e));
    }
    if request.name.trim().is_empty() {
        return Err(ApiError::validation_field("name", "Class name is required"));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO classes (id, code, name, instructor, schedule, room, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&request.code)
    .bind(&request.name)
    .bind(&user.username)
    .bind(&request.schedule)
    .bind(&request.room)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    let class: Class = sqlx::query_as("SELECT * FROM classes WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(code = %class.code, instructor = %user.username, "Class created");

    Ok((
        StatusCode::CREATED,
        Json(ClassResponse::from_class(class, Vec::new())),
    ))
}

/// Class detail with roster.
pub async fn get_class(
    State(state): State<Arc<AppState>>,
    _user: User,
    Path(code): Path<String>,
) -> Result<Json<ClassResponse>, ApiError> {
    let class = fetch_class(&state, &code).await?;
    let students = roster(&state, &class.id).await?;
    Ok(Json(ClassResponse::from_class(class, students)))
}

/// Delete a class and its enrollments.
pub async fn delete_class(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(code): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_instructor(&user)?;
    let class = fetch_class(&state, &code).await?;
    check_class_owner(&user, &class)?;

    sqlx::query("DELETE FROM classes WHERE id = ?")
        .bind(&class.id)
        .execute(&state.db)
        .await?;

    tracing::info!(code = %class.code, "Class deleted");

    Ok(StatusCode::NO_CONTENT)
}

/// Enroll a student into a class roster.
pub async fn enroll_student(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(code): Path<String>,
    Json(request): Json<EnrollRequest>,
) -> Result<(StatusCode, Json<ClassResponse>), ApiError> {
    require_instructor(&user)?;
    if let Err(e) = validate_username(&request.student_username) {
        return Err(ApiError::validation_field("student_username", e));
    }

    let class = fetch_class(&state, &code).await?;
    check_class_owner(&user, &class)?;

    let student: Option<User> =
        sqlx::query_as("SELECT * FROM users WHERE username = ? AND role = 'student'")
            .bind(&request.student_username)
            .fetch_optional(&state.db)
            .await?;
    if student.is_none() {
        return Err(ApiError::not_found("Student not found"));
    }

    let already: Option<(String,)> = sqlx::query_as(
        "SELECT student_username FROM enrollments WHERE class_id = ? AND student_username = ?",
    )
    .bind(&class.id)
    .bind(&request.student_username)
    .fetch_optional(&state.db)
    .await?;
    if already.is_some() {
        return Err(ApiError::conflict("Student is already enrolled"));
    }

    sqlx::query(
        "INSERT INTO enrollments (class_id, student_username, enrolled_at) VALUES (?, ?, ?)",
    )
    .bind(&class.id)
    .bind(&request.student_username)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    tracing::info!(
        class = %class.code,
        student = %request.student_username,
        "Student enrolled"
    );

    let students = roster(&state, &class.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ClassResponse::from_class(class, students)),
    ))
}

/// Remove a student from a class roster.
pub async fn unenroll_student(
    State(state): State<Arc<AppState>>,
    user: User,
    Path((code, username)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    require_instructor(&user)?;
    let class = fetch_class(&state, &code).await?;
    check_class_owner(&user, &class)?;

    let result = sqlx::query(
        "DELETE FROM enrollments WHERE class_id = ? AND student_username = ?",
    )
    .bind(&class.id)
    .bind(&username)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Student is not enrolled in this class"));
    }

    tracing::info!(class = %class.code, student = %username, "Student unenrolled");

    Ok(StatusCode::NO_CONTENT)
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

    fn create_request(code: &str) -> CreateClassRequest {
        CreateClassRequest {
            code: code.to_string(),
            name: "Intro to Testing".to_string(),
            schedule: "MWF 10:00".to_string(),
            room: "B12".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_enroll_and_roster() {
        let state = test_state().await;
        let instructor = insert_user(&state, "prof.smith", "instructor").await;
        insert_user(&state, "jdoe", "student").await;

        let (status, class) = create_class(
            State(state.clone()),
            instructor.clone(),
            Json(create_request("CS101")),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(class.0.instructor, "prof.smith");

        let (_, class) = enroll_student(
            State(state.clone()),
            instructor.clone(),
            Path("CS101".to_string()),
            Json(EnrollRequest {
                student_username: "jdoe".to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(class.0.enrolled_students, vec!["jdoe".to_string()]);

        // A second enrollment of the same student conflicts.
        let err = enroll_student(
            State(state.clone()),
            instructor,
            Path("CS101".to_string()),
            Json(EnrollRequest {
                student_username: "jdoe".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("conflict"));
    }

    #[tokio::test]
    async fn test_students_cannot_create_classes() {
        let state = test_state().await;
        let student = insert_user(&state, "jdoe", "student").await;

        let err = create_class(State(state), student, Json(create_request("CS101")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("forbidden"));
    }

    #[tokio::test]
    async fn test_instructor_cannot_touch_foreign_class() {
        let state = test_state().await;
        let owner = insert_user(&state, "prof.smith", "instructor").await;
        let other = insert_user(&state, "prof.jones", "instructor").await;

        create_class(State(state.clone()), owner, Json(create_request("CS101")))
            .await
            .unwrap();

        let err = delete_class(State(state), other, Path("CS101".to_string()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("forbidden"));
    }

    #[tokio::test]
    async fn test_student_list_shows_only_enrolled() {
        let state = test_state().await;
        let instructor = insert_user(&state, "prof.smith", "instructor").await;
        let student = insert_user(&state, "jdoe", "student").await;

        create_class(
            State(state.clone()),
            instructor.clone(),
            Json(create_request("CS101")),
        )
        .await
        .unwrap();
        create_class(
            State(state.clone()),
            instructor.clone(),
            Json(create_request("CS202")),
        )
        .await
        .unwrap();
        enroll_student(
            State(state.clone()),
            instructor,
            Path("CS202".to_string()),
            Json(EnrollRequest {
                student_username: "jdoe".to_string(),
            }),
        )
        .await
        .unwrap();

        let classes = list_classes(
            State(state),
            student,
            Query(ListClassesParams { instructor: None }),
        )
        .await
        .unwrap();
        assert_eq!(classes.0.len(), 1);
        assert_eq!(classes.0[0].code, "CS202");
    }
}
