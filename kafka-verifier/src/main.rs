use anyhow::{bail, Context, Result};
use axum::{routing::get, Router};
use envconfig::Envconfig;
use futures::future::ready;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::task::JoinHandle;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use kafka_verifier::{config::Config, service::VerifierService};

fn setup_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install metrics recorder")
}

async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

fn start_server(config: &Config) -> JoinHandle<()> {
    let recorder_handle = setup_metrics();
    let router = Router::new()
        .route("/", get(|| async { "kafka verifier" }))
        .route("/_readiness", get(|| async { "ok" }))
        .route("/_liveness", get(|| async { "ok" }))
        .route("/metrics", get(move || ready(recorder_handle.render())));

    let bind = config.bind();

    tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to start serving metrics on {}: {}", bind, e);
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for ctrl+c signal");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env()
        .context("Failed to load configuration from environment variables")?;

    // Initialize tracing
    let log_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .with_filter(EnvFilter::from_default_env())
        .boxed();

    tracing_subscriber::registry().with(log_layer).init();

    info!("Starting Kafka verifier");
    info!("Configuration loaded: {:?}", config);

    let server_handle = if config.export_prometheus {
        info!("Started metrics server on {}", config.bind());
        Some(start_server(&config))
    } else {
        None
    };

    let service = VerifierService::new(config).context("Failed to create verifier service")?;
    let report = service.run_with_shutdown(shutdown_signal()).await?;

    info!("\n{}", report);

    if let Some(handle) = server_handle {
        handle.abort();
    }

    if !report.passed() {
        bail!(
            "verification did not pass: {} findings, {} unexpected errors, outcome {:?}",
            report.findings.len(),
            report.unexpected_errors.len(),
            report.outcome
        );
    }

    Ok(())
}
