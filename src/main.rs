use anyhow::{Context, Result, bail};
use clap::Parser;
use model::config::{self, Config};
use poller::fetch::{BackoffPolicy, HttpAgent};
use poller::metrics::PrometheusExporter;
use prometheus::Registry;
use sql_exporter::cli::{Args, QuerySource};
use sql_exporter::supervisor::Supervisor;
use sql_exporter::{server, telemetry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init(&args.log_level)?;
    info!("Starting sql-exporter {}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    let queries = match args.query_source()? {
        QuerySource::File(path) => config::load_query_file(&path, &config)?,
        QuerySource::Dir(dir) => config::load_query_dir(&dir, &config, args.lax)?,
    };
    if queries.is_empty() {
        bail!("No queries loaded");
    }

    let registry = Registry::new();
    let exporter = Arc::new(PrometheusExporter::new(registry.clone()));
    let agent = HttpAgent::new(args.service.clone())?;

    let mut supervisor = Supervisor::new();
    for query in queries {
        let name = query.name.clone();
        supervisor
            .spawn(Arc::new(query), agent.clone(), exporter.clone(), BackoffPolicy::default())
            .with_context(|| format!("failed to start worker for query [{name}]"))?;
    }
    info!("Started {} workers against {}", supervisor.len(), agent.url());

    let addr = args.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let workers = supervisor.cancel_token();
    let shutdown = async move {
        server::shutdown_signal().await;
        workers.cancel();
    };
    server::serve(listener, registry, shutdown, args.shutdown_grace()).await?;

    info!("Server stopped, waiting for workers");
    supervisor.shutdown(args.shutdown_grace()).await;
    info!("Exiting");
    Ok(())
}
