//! Main Entrypoint for the Lingua API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Loading prompts, curriculum and roster, and opening the profile store.
//! 4. Initializing the Gemini client and the tutor service.
//! 5. Constructing the Axum router and applying middleware.
//! 6. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use lingua_api::{
    config::Config, router::create_router, sessions::SessionRegistry, state::AppState,
    store::FileProfileStore,
};
use lingua_core::{
    client::GeminiClient,
    curriculum::Curriculum,
    invoker::{FallbackInvoker, InvokerSettings},
    models::ModelCatalog,
    prompts::PromptLibrary,
    roster::Roster,
    tutor::TutorService,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C, shutting down");
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load Static Data and Open the Profile Store ---
    let prompts = match &config.prompts_path {
        Some(dir) => PromptLibrary::with_overrides(dir)
            .with_context(|| format!("Failed to load prompts from {}", dir.display()))?,
        None => PromptLibrary::builtin(),
    };
    let curriculum = match &config.curriculum_path {
        Some(path) => Curriculum::load(path)
            .with_context(|| format!("Failed to load curriculum from {}", path.display()))?,
        None => Curriculum::builtin().context("Built-in curriculum is invalid")?,
    };
    let roster = Roster::default();
    let profiles = FileProfileStore::open(&config.profile_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to open profile directory {}",
                config.profile_dir.display()
            )
        })?;
    info!(
        speaking_units = curriculum.speaking.len(),
        writing_units = curriculum.writing.len(),
        students = roster.names().len(),
        profile_dir = %config.profile_dir.display(),
        "Static data loaded."
    );

    // --- 4. Initialize Shared Services ---
    let client = Arc::new(GeminiClient::new(config.gemini_base_url.clone()));
    let invoker = FallbackInvoker::new(client, ModelCatalog::default());
    let tutor = TutorService::new(invoker, Arc::new(prompts));

    let mut settings = InvokerSettings::new(
        config.gemini_api_key.clone(),
        config.selected_model.clone(),
    );
    settings.attempt_timeout = config.attempt_timeout;
    if !settings.has_api_key() {
        warn!("No GEMINI_API_KEY set. Grading stays unavailable until a key is provided.");
    }

    let app_state = Arc::new(AppState {
        tutor,
        settings: Arc::new(RwLock::new(settings)),
        curriculum: Arc::new(curriculum),
        roster: Arc::new(roster),
        profiles: Arc::new(profiles),
        sessions: Arc::new(SessionRegistry::default()),
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.selected_model,
        attempt_timeout_secs = config.attempt_timeout.as_secs(),
        turn_budget = config.turn_budget,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
