pub mod auth;
pub mod error;
pub mod rate_limit;
pub mod validation;

mod attendance;
mod chat;
mod classes;
mod notifications;
mod sessions;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Public auth routes, tight rate limit (password guessing)
    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/register", post(auth::register_student))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Unauthenticated sidecar surface, chat tier
    let chat_routes = Router::new()
        .route("/chat", post(chat::chat))
        .route("/status", get(chat::status))
        .route("/config", get(chat::config))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_chat,
        ));

    // Admin-only routes
    let admin_routes = Router::new()
        .route("/auth/instructors", post(auth::register_instructor))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin_middleware,
        ));

    // Protected API routes
    let api_routes = Router::new()
        // Auth
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me).put(auth::update_profile))
        // Classes
        .route(
            "/classes",
            get(classes::list_classes).post(classes::create_class),
        )
        .route(
            "/classes/:code",
            get(classes::get_class).delete(classes::delete_class),
        )
        .route("/classes/:code/enroll", post(classes::enroll_student))
        .route(
            "/classes/:code/enroll/:username",
            delete(classes::unenroll_student),
        )
        // Face attendance
        .route("/attendance/register", post(attendance::register_person))
        .route("/attendance/recognize", post(attendance::recognize))
        .route("/attendance/mark", post(attendance::mark_attendance))
        .route("/attendance/today", get(attendance::today_records))
        .route("/attendance/stats", get(attendance::stats))
        .route("/attendance/people", get(attendance::registered_people))
        // QR check-in sessions
        .route(
            "/attendance/sessions",
            get(sessions::list_sessions).post(sessions::open_session),
        )
        .route(
            "/attendance/sessions/:id/close",
            post(sessions::close_session),
        )
        .route("/attendance/checkin", post(sessions::check_in))
        // Notifications
        .route(
            "/notifications",
            get(notifications::list_notifications).post(notifications::create_notification),
        )
        .route(
            "/notifications/meeting-reminder",
            post(notifications::meeting_reminder),
        )
        .route(
            "/notifications/process-queue",
            post(notifications::process_queue),
        )
        .route("/notifications/analytics", get(notifications::analytics))
        .route(
            "/notifications/preferences/:person",
            get(notifications::get_preferences).put(notifications::update_preferences),
        )
        .route("/notifications/:id", get(notifications::get_notification))
        .route(
            "/notifications/:id/send",
            post(notifications::send_notification),
        )
        .merge(admin_routes)
        // Protected by auth
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    Router::new()
        .route("/health", get(chat::health))
        .nest("/api/auth", auth_routes)
        .nest("/api", chat_routes)
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
