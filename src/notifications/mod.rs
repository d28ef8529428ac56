//! Notification creation and delivery.
//!
//! Delivery is synchronous and best-effort: each configured channel (email,
//! push, webhook) is attempted independently, one success marks the row
//! sent, and failures are logged but never retried. Scheduled rows stay
//! pending until an explicit queue pass picks them up.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde_json::json;
use std::sync::Arc;

use crate::assistant::Assistant;
use crate::config::{DeliveryConfig, EmailDeliveryConfig, PushDeliveryConfig, WebhookDeliveryConfig};
use crate::db::{
    CreateNotificationRequest, DbPool, DeliveryReport, Notification, NotificationAnalytics,
    NotificationChannel, NotificationPreferences, NotificationStatus,
};

pub struct NotificationService {
    db: DbPool,
    config: DeliveryConfig,
    assistant: Arc<Assistant>,
    http_client: reqwest::Client,
}

impl NotificationService {
    pub fn new(db: DbPool, config: DeliveryConfig, assistant: Arc<Assistant>) -> Self {
        Self {
            db,
            config,
            assistant,
            http_client: reqwest::Client::new(),
        }
    }

    /// Create a notification; dispatch immediately when it is already due.
    pub async fn create(
        &self,
        req: CreateNotificationRequest,
    ) -> Result<(Notification, Option<DeliveryReport>)> {
        let now = Utc::now();

        let (title, message, priority, sentiment_score, ai_generated) = if req.ai_enhanced {
            let smart = self
                .assistant
                .generate_smart_notification(&req.message, &req.notification_type, now);
            (
                smart.title,
                smart.message,
                smart.priority,
                smart.sentiment_confidence,
                true,
            )
        } else {
            let sentiment = self.assistant.analyze_sentiment(&req.message);
            (
                req.title,
                req.message,
                req.priority.clamp(1, 5),
                sentiment.confidence,
                false,
            )
        };

        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO notifications
            (id, title, message, notification_type, priority, created_at, scheduled_for, status, sentiment_score, ai_generated, target_student)
            VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&title)
        .bind(&message)
        .bind(&req.notification_type)
        .bind(priority)
        .bind(now.to_rfc3339())
        .bind(&req.scheduled_for)
        .bind(sentiment_score)
        .bind(if ai_generated { 1 } else { 0 })
        .bind(&req.target_student)
        .execute(&self.db)
        .await?;

        let notification = self.get(&id).await?;

        let due = match &req.scheduled_for {
            None => true,
            Some(ts) => DateTime::parse_from_rfc3339(ts)
                .map(|t| t.with_timezone(&Utc) <= now)
                .unwrap_or(true),
        };

        if due {
            let report = self.send(&notification, None).await?;
            let notification = self.get(&id).await?;
            return Ok((notification, Some(report)));
        }

        Ok((notification, None))
    }

    pub async fn get(&self, id: &str) -> Result<Notification> {
        sqlx::query_as("SELECT * FROM notifications WHERE id = ?")
            .bind(id)
            .fetch_one(&self.db)
            .await
            .context("notification not found")
    }

    /// Dispatch a notification across the channels, then record the outcome.
    /// `only` restricts the attempt to a single channel.
    pub async fn send(
        &self,
        notification: &Notification,
        only: Option<NotificationChannel>,
    ) -> Result<DeliveryReport> {
        let mut report = DeliveryReport::new(notification.id.clone());
        let prefs = self.preferences_for(notification.target_student.as_deref()).await;

        let wants = |channel: NotificationChannel| only.is_none() || only == Some(channel);

        // Targeted notifications below the person's threshold skip the
        // person-facing channels; webhooks are system integrations and
        // always fire.
        let below_threshold = prefs
            .as_ref()
            .map(|p| notification.priority < p.priority_threshold)
            .unwrap_or(false);

        if wants(NotificationChannel::Email) && !below_threshold {
            let allowed = prefs.as_ref().map(|p| p.email_notifications != 0).unwrap_or(true);
            if allowed {
                if let Some(email) = &self.config.email {
                    report.email = Some(self.log_attempt(
                        NotificationChannel::Email,
                        notification,
                        self.send_email(email, notification).await,
                    ));
                }
            }
        }

        if wants(NotificationChannel::Push) && !below_threshold {
            let allowed = prefs.as_ref().map(|p| p.push_notifications != 0).unwrap_or(true);
            if allowed {
                if let Some(push) = &self.config.push {
                    report.push = Some(self.log_attempt(
                        NotificationChannel::Push,
                        notification,
                        self.send_push(push, notification).await,
                    ));
                }
            }
        }

        if wants(NotificationChannel::Webhook) {
            if let Some(webhook) = &self.config.webhook {
                report.webhook = Some(self.log_attempt(
                    NotificationChannel::Webhook,
                    notification,
                    self.send_webhook(webhook, notification).await,
                ));
            }
        }

        report.sent = report.any_success();

        let status = if report.sent {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };
        self.update_status(&notification.id, status).await?;

        Ok(report)
    }

    fn log_attempt(
        &self,
        channel: NotificationChannel,
        notification: &Notification,
        result: Result<()>,
    ) -> bool {
        match result {
            Ok(()) => {
                tracing::info!(
                    notification_id = %notification.id,
                    channel = %channel,
                    "Notification delivered"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    notification_id = %notification.id,
                    channel = %channel,
                    error = %e,
                    "Notification delivery failed"
                );
                false
            }
        }
    }

    async fn preferences_for(&self, person: Option<&str>) -> Option<NotificationPreferences> {
        let person = person?;
        sqlx::query_as("SELECT * FROM notification_preferences WHERE person_name = ?")
            .bind(person)
            .fetch_optional(&self.db)
            .await
            .ok()
            .flatten()
    }

    async fn update_status(&self, id: &str, status: NotificationStatus) -> Result<()> {
        let sent_at = match status {
            NotificationStatus::Sent => Some(Utc::now().to_rfc3339()),
            _ => None,
        };

        sqlx::query("UPDATE notifications SET status = ?, sent_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(sent_at)
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn send_email(
        &self,
        config: &EmailDeliveryConfig,
        notification: &Notification,
    ) -> Result<()> {
        let from: Mailbox = config.from_address.parse()?;

        let body = format!(
            "{}\n\nPriority: {}\nType: {}\nSent at: {}\n\n---\nChat Ping",
            notification.message,
            notification.priority,
            notification.notification_type,
            Utc::now().to_rfc3339(),
        );

        for to_address in &config.to_addresses {
            let to: Mailbox = to_address.parse()?;

            let email = Message::builder()
                .from(from.clone())
                .to(to)
                .subject(&notification.title)
                .header(ContentType::TEXT_PLAIN)
                .body(body.clone())?;

            let mailer = if config.smtp_tls {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
            }
            .port(config.smtp_port);

            let mailer = if let (Some(username), Some(password)) =
                (&config.smtp_username, &config.smtp_password)
            {
                mailer.credentials(Credentials::new(username.clone(), password.clone()))
            } else {
                mailer
            };

            mailer.build().send(email).await?;
        }

        Ok(())
    }

    async fn send_push(
        &self,
        config: &PushDeliveryConfig,
        notification: &Notification,
    ) -> Result<()> {
        let payload = json!({
            "notification": {
                "title": notification.title,
                "body": notification.message,
            },
            "priority": notification.priority,
            "type": notification.notification_type,
            "timestamp": Utc::now().to_rfc3339(),
        });

        self.http_client
            .post(&config.endpoint)
            .header("Authorization", format!("key={}", config.api_key))
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    async fn send_webhook(
        &self,
        config: &WebhookDeliveryConfig,
        notification: &Notification,
    ) -> Result<()> {
        let payload = json!({
            "title": notification.title,
            "message": notification.message,
            "type": notification.notification_type,
            "priority": notification.priority,
            "timestamp": Utc::now().to_rfc3339(),
            "sentiment_score": notification.sentiment_score,
            "ai_generated": notification.is_ai_generated(),
        });

        self.http_client
            .post(&config.url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    /// One pass over due pending notifications. Returns the count sent.
    pub async fn process_queue(&self) -> Result<usize> {
        let pending: Vec<Notification> = sqlx::query_as(
            "SELECT * FROM notifications WHERE status = 'pending' ORDER BY created_at ASC LIMIT 100",
        )
        .fetch_all(&self.db)
        .await?;

        let now = Utc::now();
        let mut sent_count = 0;

        for notification in pending {
            if let Some(ts) = &notification.scheduled_for {
                match DateTime::parse_from_rfc3339(ts) {
                    Ok(scheduled) if scheduled.with_timezone(&Utc) > now => continue,
                    _ => {}
                }
            }

            match self.send(&notification, None).await {
                Ok(report) if report.sent => sent_count += 1,
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(
                        notification_id = %notification.id,
                        error = %e,
                        "Queue pass failed to send notification"
                    );
                }
            }
        }

        Ok(sent_count)
    }

    /// Notification for a face-attendance outcome.
    pub async fn create_attendance_notification(
        &self,
        recognized: &[String],
        unknown_count: usize,
    ) -> Result<(Notification, Option<DeliveryReport>)> {
        let (title, message, notification_type, priority) = if recognized.is_empty() {
            (
                "Attendance Alert".to_string(),
                format!(
                    "No recognized faces found. {} unknown faces detected.",
                    unknown_count
                ),
                "alert".to_string(),
                3,
            )
        } else {
            (
                "Attendance Recorded".to_string(),
                format!(
                    "Attendance successfully recorded for: {}",
                    recognized.join(", ")
                ),
                "attendance".to_string(),
                2,
            )
        };

        self.create(CreateNotificationRequest {
            title,
            message,
            notification_type,
            priority,
            scheduled_for: None,
            ai_enhanced: false,
            target_student: None,
        })
        .await
    }

    /// Notification for an internal system event.
    pub async fn create_system_notification(
        &self,
        event: &str,
        details: &str,
    ) -> Result<(Notification, Option<DeliveryReport>)> {
        self.create(CreateNotificationRequest {
            title: format!("System Event: {}", event),
            message: format!("System event occurred: {}. {}", event, details),
            notification_type: "system".to_string(),
            priority: 4,
            scheduled_for: None,
            ai_enhanced: false,
            target_student: None,
        })
        .await
    }

    /// Meeting reminder, scheduled 15 minutes before the meeting starts.
    pub async fn create_meeting_reminder(
        &self,
        meeting_title: &str,
        meeting_time: DateTime<Utc>,
        attendees: &[String],
    ) -> Result<(Notification, Option<DeliveryReport>)> {
        let attendees_text = if attendees.is_empty() {
            String::new()
        } else {
            format!(" Attendees: {}", attendees.join(", "))
        };

        let message = format!(
            "Meeting '{}' is scheduled for {}.{}",
            meeting_title,
            meeting_time.format("%Y-%m-%d %H:%M"),
            attendees_text
        );

        let reminder_time = meeting_time - Duration::minutes(15);

        self.create(CreateNotificationRequest {
            title: format!("Meeting Reminder: {}", meeting_title),
            message,
            notification_type: "meeting".to_string(),
            priority: 3,
            scheduled_for: Some(reminder_time.to_rfc3339()),
            ai_enhanced: false,
            target_student: None,
        })
        .await
    }

    /// Delivery and pattern summary over the last `days` days.
    pub async fn analytics(&self, days: i64) -> Result<NotificationAnalytics> {
        let notifications: Vec<Notification> =
            sqlx::query_as("SELECT * FROM notifications ORDER BY created_at DESC LIMIT 1000")
                .fetch_all(&self.db)
                .await?;

        let cutoff = Utc::now() - Duration::days(days);
        let recent: Vec<Notification> = notifications
            .into_iter()
            .filter(|n| {
                DateTime::parse_from_rfc3339(&n.created_at)
                    .map(|t| t.with_timezone(&Utc) >= cutoff)
                    .unwrap_or(false)
            })
            .collect();

        let sent_count = recent
            .iter()
            .filter(|n| n.status() == NotificationStatus::Sent)
            .count();
        let total_count = recent.len();
        let delivery_rate = if total_count > 0 {
            (sent_count as f64 / total_count as f64 * 10000.0).round() / 100.0
        } else {
            0.0
        };

        let mut priority_distribution = std::collections::HashMap::new();
        for n in &recent {
            *priority_distribution.entry(n.priority).or_default() += 1;
        }

        Ok(NotificationAnalytics {
            total_notifications: total_count,
            sent_notifications: sent_count,
            delivery_rate,
            priority_distribution,
            patterns: self.assistant.analyze_patterns(&recent),
            period_days: days,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssistantConfig;

    fn service(db: DbPool) -> NotificationService {
        // No channels configured: every dispatch is a no-op failure, which
        // exercises the pending/failed bookkeeping without network access.
        NotificationService::new(
            db,
            DeliveryConfig::default(),
            Arc::new(Assistant::new(AssistantConfig::default())),
        )
    }

    fn request(title: &str, scheduled_for: Option<String>) -> CreateNotificationRequest {
        CreateNotificationRequest {
            title: title.to_string(),
            message: "quiz tomorrow, don't forget".to_string(),
            notification_type: "reminder".to_string(),
            priority: 2,
            scheduled_for,
            ai_enhanced: false,
            target_student: None,
        }
    }

    #[tokio::test]
    async fn test_create_immediate_dispatches_without_channels() {
        let db = crate::db::init_in_memory().await.unwrap();
        let svc = service(db);

        let (notification, report) = svc.create(request("Quiz", None)).await.unwrap();

        // Dispatch ran (report present) but no channel is configured, so the
        // row ends up failed rather than silently sent.
        let report = report.unwrap();
        assert!(!report.sent);
        assert_eq!(report.email, None);
        assert_eq!(notification.status(), NotificationStatus::Failed);
        assert!(notification.sentiment_score.is_some());
    }

    #[tokio::test]
    async fn test_scheduled_notification_stays_pending() {
        let db = crate::db::init_in_memory().await.unwrap();
        let svc = service(db);

        let future = (Utc::now() + Duration::hours(2)).to_rfc3339();
        let (notification, report) = svc.create(request("Later", Some(future))).await.unwrap();

        assert!(report.is_none());
        assert_eq!(notification.status(), NotificationStatus::Pending);
        assert!(notification.sent_at.is_none());
    }

    #[tokio::test]
    async fn test_process_queue_skips_future_rows() {
        let db = crate::db::init_in_memory().await.unwrap();
        let svc = service(db);

        let future = (Utc::now() + Duration::hours(2)).to_rfc3339();
        svc.create(request("Later", Some(future))).await.unwrap();
        let past = (Utc::now() - Duration::minutes(5)).to_rfc3339();
        svc.create(request("Due", Some(past))).await.unwrap();

        // Nothing can actually send (no channels), so the count is zero, but
        // the due row must have been attempted and marked failed while the
        // future row stays pending.
        let sent = svc.process_queue().await.unwrap();
        assert_eq!(sent, 0);

        let rows: Vec<Notification> =
            sqlx::query_as("SELECT * FROM notifications ORDER BY created_at ASC")
                .fetch_all(&svc.db)
                .await
                .unwrap();
        let statuses: Vec<(String, NotificationStatus)> = rows
            .iter()
            .map(|n| (n.title.clone(), n.status()))
            .collect();
        assert!(statuses.contains(&("Later".to_string(), NotificationStatus::Pending)));
        assert!(statuses.contains(&("Due".to_string(), NotificationStatus::Failed)));
    }

    #[tokio::test]
    async fn test_ai_enhanced_create_rewrites_content() {
        let db = crate::db::init_in_memory().await.unwrap();
        let svc = service(db);

        let (notification, _) = svc
            .create(CreateNotificationRequest {
                title: "ignored".to_string(),
                message: "critical maintenance window tonight".to_string(),
                notification_type: "system".to_string(),
                priority: 1,
                scheduled_for: None,
                ai_enhanced: true,
                target_student: None,
            })
            .await
            .unwrap();

        assert!(notification.is_ai_generated());
        assert_eq!(notification.title, "System Notification");
        assert!(notification.priority >= 4);
    }

    #[tokio::test]
    async fn test_system_notification_presets() {
        let db = crate::db::init_in_memory().await.unwrap();
        let svc = service(db);

        let (notification, _) = svc
            .create_system_notification("backup", "Nightly backup completed.")
            .await
            .unwrap();

        assert_eq!(notification.notification_type, "system");
        assert_eq!(notification.priority, 4);
        assert!(notification.title.contains("backup"));
    }

    #[tokio::test]
    async fn test_meeting_reminder_is_scheduled_before_meeting() {
        let db = crate::db::init_in_memory().await.unwrap();
        let svc = service(db);

        let meeting_time = Utc::now() + Duration::hours(3);
        let (notification, report) = svc
            .create_meeting_reminder("Staff sync", meeting_time, &["prof.smith".to_string()])
            .await
            .unwrap();

        assert!(report.is_none());
        assert_eq!(notification.status(), NotificationStatus::Pending);
        let scheduled = DateTime::parse_from_rfc3339(notification.scheduled_for.as_ref().unwrap())
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(scheduled, meeting_time - Duration::minutes(15));
    }

    #[tokio::test]
    async fn test_analytics_counts_and_distribution() {
        let db = crate::db::init_in_memory().await.unwrap();
        let svc = service(db);

        svc.create(request("A", None)).await.unwrap();
        svc.create(request("B", None)).await.unwrap();

        let analytics = svc.analytics(30).await.unwrap();
        assert_eq!(analytics.total_notifications, 2);
        assert_eq!(analytics.sent_notifications, 0);
        assert_eq!(analytics.delivery_rate, 0.0);
        assert_eq!(analytics.priority_distribution.get(&2), Some(&2));
        assert_eq!(analytics.patterns.total_notifications, 2);
    }
}
