//! Attendance record and QR check-in session models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// How an attendance record was produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceMethod {
    Face,
    Qr,
    Manual,
}

impl std::fmt::Display for AttendanceMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Face => write!(f, "face"),
            Self::Qr => write!(f, "qr"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for AttendanceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "face" => Ok(Self::Face),
            "qr" | "qr_code" => Ok(Self::Qr),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown attendance method: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttendanceRecord {
    pub id: String,
    pub person_name: String,
    pub timestamp: String,
    pub date: String,
    pub status: String,
    pub confidence: Option<f64>,
    pub method: String,
    pub class_code: Option<String>,
    pub session_id: Option<String>,
    pub image_path: Option<String>,
}

/// Aggregate counts over a trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceStats {
    pub total_attendance: i64,
    pub unique_people: i64,
    pub today_attendance: i64,
    pub period_days: i64,
}

/// One QR check-in window for a class.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AttendanceSession {
    pub id: String,
    pub class_code: String,
    pub instructor: String,
    pub issued_at: String,
    pub expires_at: String,
    pub valid_minutes: i64,
    pub closed: i64,
}

impl AttendanceSession {
    pub fn is_closed(&self) -> bool {
        self.closed != 0
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    pub class_code: String,
    /// Defaults to the configured QR validity window.
    pub valid_minutes: Option<i64>,
}

/// Student-side scan submission: the decoded QR payload as JSON text.
#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub payload: String,
}

#[derive(Debug, Serialize)]
pub struct CheckInResponse {
    pub class_code: String,
    pub session_id: String,
    pub marked_at: String,
}
