//! Notification and notification-preference models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Delivery state of a notification row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Sent => write!(f, "sent"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Unknown notification status: {}", s)),
        }
    }
}

/// Delivery channels, each an independent best-effort attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationChannel {
    Email,
    Push,
    Webhook,
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Email => write!(f, "email"),
            Self::Push => write!(f, "push"),
            Self::Webhook => write!(f, "webhook"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub notification_type: String,
    pub priority: i64,
    pub created_at: String,
    pub scheduled_for: Option<String>,
    pub sent_at: Option<String>,
    pub status: String,
    pub sentiment_score: Option<f64>,
    pub ai_generated: i64,
    pub target_student: Option<String>,
}

impl Notification {
    pub fn status(&self) -> NotificationStatus {
        self.status.parse().unwrap_or(NotificationStatus::Pending)
    }

    pub fn is_ai_generated(&self) -> bool {
        self.ai_generated != 0
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateNotificationRequest {
    pub title: String,
    pub message: String,
    #[serde(default = "default_notification_type")]
    pub notification_type: String,
    #[serde(default = "default_priority")]
    pub priority: i64,
    /// RFC 3339; due immediately when absent or in the past.
    pub scheduled_for: Option<String>,
    #[serde(default)]
    pub ai_enhanced: bool,
    pub target_student: Option<String>,
}

fn default_notification_type() -> String {
    "info".to_string()
}

fn default_priority() -> i64 {
    1
}

/// Outcome of one dispatch attempt across the channels.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub notification_id: String,
    pub email: Option<bool>,
    pub push: Option<bool>,
    pub webhook: Option<bool>,
    pub sent: bool,
}

impl DeliveryReport {
    pub fn new(notification_id: String) -> Self {
        Self {
            notification_id,
            email: None,
            push: None,
            webhook: None,
            sent: false,
        }
    }

    /// A notification counts as sent when any channel succeeded.
    pub fn any_success(&self) -> bool {
        [self.email, self.push, self.webhook]
            .iter()
            .any(|r| *r == Some(true))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationPreferences {
    pub person_name: String,
    pub email_notifications: i64,
    pub push_notifications: i64,
    pub notification_times: String,
    pub priority_threshold: i64,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePreferencesRequest {
    pub email_notifications: Option<bool>,
    pub push_notifications: Option<bool>,
    pub notification_times: Option<String>,
    pub priority_threshold: Option<i64>,
}

/// Delivery/analytics summary over a trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationAnalytics {
    pub total_notifications: usize,
    pub sent_notifications: usize,
    pub delivery_rate: f64,
    pub priority_distribution: std::collections::HashMap<i64, usize>,
    pub patterns: crate::assistant::PatternSummary,
    pub period_days: i64,
}
