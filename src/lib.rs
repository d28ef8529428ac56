pub mod api;
pub mod assistant;
pub mod attendance;
pub mod config;
pub mod db;
pub mod notifications;

pub use db::DbPool;

use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::assistant::Assistant;
use crate::attendance::qr::QrSigner;
use crate::attendance::{AttendanceEngine, HashEmbedder};
use crate::config::Config;
use crate::notifications::NotificationService;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub assistant: Arc<Assistant>,
    pub attendance: Arc<AttendanceEngine>,
    pub qr: QrSigner,
    pub notifications: Arc<NotificationService>,
    pub rate_limiter: Arc<RateLimiter>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let assistant = Arc::new(Assistant::new(config.assistant.clone()));
        let attendance = Arc::new(AttendanceEngine::new(
            db.clone(),
            Arc::new(HashEmbedder),
            config.attendance.tolerance,
        ));
        let qr = QrSigner::new(&config.attendance.qr_secret);
        let notifications = Arc::new(NotificationService::new(
            db.clone(),
            config.delivery.clone(),
            assistant.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));

        Self {
            config,
            db,
            assistant,
            attendance,
            qr,
            notifications,
            rate_limiter,
            started_at: chrono::Utc::now(),
        }
    }
}
