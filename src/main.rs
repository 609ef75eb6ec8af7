use anyhow::Context;
use clap::Parser;
use dotenvy::dotenv;
use radicado_backend::config::{AppConfig, MailTransport, StorageBackend};
use radicado_backend::services::credentials::CredentialBroker;
use radicado_backend::services::ids::UuidPrefixGenerator;
use radicado_backend::services::notifier::{LogNotifier, Notifier, SmtpNotifier};
use radicado_backend::services::orchestrator::{OrchestratorSettings, SubmissionOrchestrator};
use radicado_backend::services::storage::{
    DropboxStorageService, InMemoryStorage, StorageService,
};
use radicado_backend::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the API server (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & logging
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "radicado_backend=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting form submission backend...");

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let port = args.port.unwrap_or(config.port);
    info!(
        "⚙️  Config: Storage={:?}, Mail={:?}, Root={}, Chunk={}MB, Concurrency={}, Timeout={}s",
        config.storage_backend,
        config.mail_transport,
        config.container_root,
        config.chunk_size / 1024 / 1024,
        config.max_concurrent_uploads,
        config.submission_timeout_secs
    );

    // 2. Storage backend
    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("Failed to build HTTP client")?;

    let (storage, broker): (Arc<dyn StorageService>, Option<Arc<CredentialBroker>>) =
        match config.storage_backend {
            StorageBackend::Dropbox => {
                let broker = Arc::new(CredentialBroker::from_config(http.clone(), &config.storage));
                let storage: Arc<dyn StorageService> = Arc::new(
                    DropboxStorageService::from_config(http, &config.storage, broker.clone()),
                );
                (storage, Some(broker))
            }
            StorageBackend::Memory => {
                warn!("⚠️  Using in-memory storage; uploaded files are lost on exit");
                let storage: Arc<dyn StorageService> = Arc::new(InMemoryStorage::new());
                (storage, None)
            }
        };

    // 3. Notifications
    let notifier: Arc<dyn Notifier> = match config.mail_transport {
        MailTransport::Smtp => Arc::new(
            SmtpNotifier::from_config(&config.mail).context("Failed to set up mail transport")?,
        ),
        MailTransport::Log => {
            warn!("⚠️  Notifications are only logged (MAIL_TRANSPORT=log)");
            Arc::new(LogNotifier::new())
        }
    };

    // 4. Nothing is served until the storage credential is in hand
    let orchestrator = SubmissionOrchestrator::initialize(
        OrchestratorSettings::from_config(&config),
        storage,
        notifier,
        Arc::new(UuidPrefixGenerator),
    )
    .await
    .context("Storage authorization failed at startup")?;
    info!("🔑 Storage backend authorized");

    let state = AppState {
        orchestrator: Arc::new(orchestrator),
        broker,
        config,
    };

    // 5. HTTP server
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            info!("📥 {} {}", request.method(), request.uri());
        })
        .on_response(
            |response: &axum::http::Response<_>,
             latency: std::time::Duration,
             _span: &tracing::Span| {
                info!(
                    "📤 Finished in {:?} with status {}",
                    latency,
                    response.status()
                );
            },
        );

    let app = create_app(state).layer(trace_layer);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ API Server listening on: http://0.0.0.0:{}", port);
    info!("📖 Swagger UI documentation: http://localhost:{}/swagger-ui", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Backend exited cleanly.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("❌ Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("❌ Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
