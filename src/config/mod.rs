use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub attendance: AttendanceConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            api_port: default_api_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    #[serde(default = "default_admin_email")]
    pub admin_email: String,
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    /// Session lifetime in hours, per role.
    #[serde(default = "default_admin_session_hours")]
    pub admin_session_hours: i64,
    #[serde(default = "default_instructor_session_hours")]
    pub instructor_session_hours: i64,
    #[serde(default = "default_student_session_hours")]
    pub student_session_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_username: default_admin_username(),
            admin_email: default_admin_email(),
            admin_password: default_admin_password(),
            admin_session_hours: default_admin_session_hours(),
            instructor_session_hours: default_instructor_session_hours(),
            student_session_hours: default_student_session_hours(),
        }
    }
}

fn default_admin_username() -> String {
    "admin".to_string()
}

fn default_admin_email() -> String {
    "admin@chat-ping.local".to_string()
}

fn default_admin_password() -> String {
    // Generate a random password if not provided
    uuid::Uuid::new_v4().to_string()
}

fn default_admin_session_hours() -> i64 {
    24
}

fn default_instructor_session_hours() -> i64 {
    12
}

fn default_student_session_hours() -> i64 {
    8
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceConfig {
    /// Maximum embedding distance accepted as a match.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    /// Secret for signing QR check-in payloads (HMAC-SHA256).
    /// Generated at startup when unset.
    #[serde(default = "default_qr_secret")]
    pub qr_secret: String,
    /// How long an issued QR payload stays valid.
    #[serde(default = "default_qr_valid_minutes")]
    pub qr_valid_minutes: i64,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            qr_secret: default_qr_secret(),
            qr_valid_minutes: default_qr_valid_minutes(),
        }
    }
}

fn default_tolerance() -> f32 {
    0.6
}

fn default_qr_secret() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_qr_valid_minutes() -> i64 {
    30
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub email: Option<EmailDeliveryConfig>,
    #[serde(default)]
    pub push: Option<PushDeliveryConfig>,
    #[serde(default)]
    pub webhook: Option<WebhookDeliveryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailDeliveryConfig {
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_smtp_tls")]
    pub smtp_tls: bool,
    pub from_address: String,
    pub to_addresses: Vec<String>,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_tls() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct PushDeliveryConfig {
    pub api_key: String,
    #[serde(default = "default_push_endpoint")]
    pub endpoint: String,
}

fn default_push_endpoint() -> String {
    "https://fcm.googleapis.com/fcm/send".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookDeliveryConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    /// Remote chat-completion endpoint. Rule-based replies when unset.
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            api_key: None,
            model: default_model(),
            max_message_length: default_max_message_length(),
        }
    }
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_max_message_length() -> usize {
    512
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_chat_requests")]
    pub chat_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
            chat_requests_per_window: default_chat_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_api_requests() -> u32 {
    100
}

fn default_auth_requests() -> u32 {
    20
}

fn default_chat_requests() -> u32 {
    60
}

fn default_window_seconds() -> u64 {
    60
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            attendance: AttendanceConfig::default(),
            delivery: DeliveryConfig::default(),
            assistant: AssistantConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
