//! Class and enrollment models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Class {
    pub id: String,
    pub code: String,
    pub name: String,
    pub instructor: String,
    pub schedule: String,
    pub room: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Enrollment {
    pub class_id: String,
    pub student_username: String,
    pub enrolled_at: String,
}

/// Response DTO for Class with roster
#[derive(Debug, Clone, Serialize)]
pub struct ClassResponse {
    pub id: String,
    pub code: String,
    pub name: String,
    pub instructor: String,
    pub schedule: String,
    pub room: String,
    pub enrolled_students: Vec<String>,
}

impl ClassResponse {
    pub fn from_class(class: Class, enrolled_students: Vec<String>) -> Self {
        Self {
            id: class.id,
            code: class.code,
            name: class.name,
            instructor: class.instructor,
            schedule: class.schedule,
            room: class.room,
            enrolled_students,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateClassRequest {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub room: String,
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub student_username: String,
}
