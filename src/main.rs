//! MedBot - Conversational Medical Intake API
//!
//! Walks each user through a short intake script (name, age, medical history)
//! and then answers free-form health questions through a configured AI
//! provider. User identity comes from the authenticating proxy in front of
//! the service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod conversation;
mod core;
mod providers;
mod routes;

use config::{Config, PromptTemplate};
use crate::core::{db, IntakeEngine, MessageStore, PromptComposer, SessionStore};
use providers::{Provider, ProviderError, Responder};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub intake: Arc<IntakeEngine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medbot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let pool = db::open(&config.database_path()).await?;
    let messages = MessageStore::new(pool.clone()).await?;
    let sessions = SessionStore::new(pool).await?;

    let template = match &config.prompt_file {
        Some(path) => PromptTemplate::load_from_file(path).await?,
        None => PromptTemplate::builtin(),
    };
    let composer = PromptComposer::new(template);
    tracing::info!("🩺 Using persona {}", composer.persona());

    let responder: Option<Arc<dyn Responder>> = match Provider::from_config(&config) {
        Ok(provider) => {
            tracing::info!("🤖 AI provider: {}", provider.name());
            Some(Arc::new(provider))
        }
        Err(ProviderError::NotConfigured(reason)) => {
            tracing::warn!("AI provider not configured ({}); free-form answers are disabled", reason);
            None
        }
        Err(e) => return Err(e.into()),
    };

    let intake = Arc::new(IntakeEngine::new(messages, sessions, responder, composer));

    let state = AppState { config, intake };

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("🔥 MedBot API running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
