//! # Adalah Backend - Main Application Entry Point
//!
//! Real-time voice legal assistant for Saudi laws. Clients stream speech over a
//! WebSocket, the server transcribes it and answers questions from a corpus of
//! legal passages with retrieval-augmented generation.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: the server and every outbound call are asynchronous
//! - **modules**: code is organized into separate modules (mod statements)
//! - **Result<T, E> and `?`**: startup fails fast with a readable error
//! - **Arc**: the knowledge base is loaded once and shared read-only
//!
//! ## Application Architecture:
//! - **config**: application configuration (TOML file + environment variables)
//! - **rag**: passage store, embedder, retriever, prompt builder, generation, composer
//! - **speech**: speech recognizers
//! - **audio**: PCM handling, segmentation and voice sessions
//! - **websocket**: the `/ws/audio` voice session actor
//! - **handlers / health / middleware / error / state**: the HTTP surface

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod middleware;
mod rag;
mod speech;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use rag::{AnswerComposer, BertEmbedder, GenerationMode, GenerationParams, KnowledgeBase, PassageStore};
use state::AppState;
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Loads the knowledge base**: index, metadata and embedding model; any
///    failure here aborts before the listener binds
/// 3. **Builds the answer composer and speech recognizer**
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** on SIGINT / SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting adalah-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let knowledge = load_knowledge_base(&config).await?;

    let mode = GenerationMode::from_config(&config.generation)?;
    info!(backend = mode.tag(), model = %config.generation.model_id, "Generation backend ready");
    let composer = Arc::new(AnswerComposer::new(
        knowledge,
        mode,
        GenerationParams::from(&config.generation),
    ));

    let recognizer = speech::from_config(&config.speech)?;
    info!(provider = recognizer.name(), language = %config.speech.language, "Speech recognizer ready");

    let app_state = AppState::new(config.clone(), composer, recognizer);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware executes in reverse order for responses
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/ask", web::post().to(handlers::ask)),
            )
            .route("/health", web::get().to(health::health_check))
            .route("/ws/audio", web::get().to(websocket::voice_websocket))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Load the passage store and the embedding model and pair them.
async fn load_knowledge_base(config: &AppConfig) -> Result<Arc<KnowledgeBase>> {
    let store = PassageStore::load(&config.rag.index_path, &config.rag.metadata_path)?;

    let device = device::create_device_from_string(&config.rag.device);
    let embedder = BertEmbedder::load(&config.rag.embed_model_id, device, config.rag.normalize_embeddings).await?;

    let knowledge = KnowledgeBase::new(store, Arc::new(embedder))?;
    info!(
        passages = knowledge.store().len(),
        dimension = knowledge.store().index().dimension(),
        embed_model = %config.rag.embed_model_id,
        "Knowledge base ready"
    );
    Ok(Arc::new(knowledge))
}

/// Initialize tracing.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "adalah_backend=trace")
/// - If not set, defaults to "adalah_backend=debug,actix_web=info"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adalah_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
