//! csops-server library - Customer Success operations HTTP service
//!
//! Exposes the JSON API over axum. Handlers live in `api`, per-table queries
//! in `db`, integration clients and background work in `services`.

use axum::Router;
use chrono::Duration;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use csops_common::auth::TokenSigner;
use csops_common::config::Config;
use csops_common::events::EventBus;

pub mod api;
pub mod db;
pub mod error;
pub mod pagination;
pub mod services;

use services::calcom_client::CalComClient;
use services::calendly_client::CalendlyClient;
use services::fathom_client::FathomClient;
use services::openai_client::OpenAiClient;
use services::storage::DocumentStore;

/// Event bus capacity; slow SSE clients lose older events beyond this
const EVENT_BUS_CAPACITY: usize = 256;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub config: Arc<Config>,
    /// Session token issuer/verifier
    pub tokens: TokenSigner,
    pub event_bus: EventBus,
    pub storage: DocumentStore,
    /// Integration clients, None when not configured
    pub calcom: Option<CalComClient>,
    pub calendly: Option<CalendlyClient>,
    pub fathom: Option<FathomClient>,
    pub openai: Option<OpenAiClient>,
    pub startup_time: Instant,
}

impl AppState {
    /// Create application state, building integration clients from config
    pub fn new(db: SqlitePool, config: Config) -> anyhow::Result<Self> {
        let tokens = TokenSigner::new(&config.jwt_secret, Duration::hours(config.token_ttl_hours))?;
        let storage = DocumentStore::from_config(config.storage.as_ref())?;

        let calcom = config.calcom.as_ref().map(CalComClient::new).transpose()?;
        let calendly = config.calendly.as_ref().map(CalendlyClient::new).transpose()?;
        let fathom = config.fathom.as_ref().map(FathomClient::new).transpose()?;
        let openai = config.openai.as_ref().map(OpenAiClient::new).transpose()?;

        Ok(Self {
            db,
            config: Arc::new(config),
            tokens,
            event_bus: EventBus::new(EVENT_BUS_CAPACITY),
            storage,
            calcom,
            calendly,
            fathom,
            openai,
            startup_time: Instant::now(),
        })
    }
}

/// Build application router
///
/// Authentication is enforced per handler by the `AuthUser` extractor, so
/// public routes (health, login, invite acceptance, webhooks) merge in like
/// any other.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::auth_routes())
        .merge(api::company_routes())
        .merge(api::cs_owner_routes())
        .merge(api::user_routes())
        .merge(api::invite_routes())
        .merge(api::delivery_routes())
        .merge(api::document_routes())
        .merge(api::survey_routes())
        .merge(api::diagnostic_routes())
        .merge(api::insight_routes())
        .merge(api::booking_routes())
        .merge(api::webhook_routes())
        .merge(api::notification_routes())
        .merge(api::dashboard_routes())
        .merge(api::sse_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
