// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use kai_change::TemplateIntentGenerator;
use kai_server::{
    AppState, EnrichmentJobs, RepoRegistry, ServerConfig, build_router, now_millis, spawn_worker,
};
use kai_snapshot::SimpleFunctionExtractor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kai-server", version, about = "Multi-tenant kailab server")]
struct Args {
    /// Bind address.
    #[arg(long)]
    bind: Option<String>,

    /// Root directory for tenant/repo stores.
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Optional TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Maximum accepted pack size in MiB.
    #[arg(long)]
    max_pack_mib: Option<u64>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("kai=debug,kai_server=debug")
    } else {
        EnvFilter::new("kai=info,kai_server=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("load config {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(data_root) = args.data_root {
        config.data_root = data_root;
    }
    if let Some(max_pack_mib) = args.max_pack_mib {
        config.max_pack_mib = max_pack_mib;
    }
    config.validate().context("validate config")?;

    let registry = Arc::new(RepoRegistry::new(&config).context("open data root")?);
    let config = Arc::new(config);

    let jobs = Arc::new(EnrichmentJobs {
        extractor: Arc::new(SimpleFunctionExtractor),
        intent: Arc::new(TemplateIntentGenerator),
    });
    spawn_worker(
        Arc::clone(&registry),
        jobs,
        Duration::from_millis(config.worker_poll_ms),
        now_millis,
    );

    let app = build_router(AppState {
        registry,
        config: Arc::clone(&config),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    info!(
        bind = %config.bind,
        data_root = %config.data_root.display(),
        "kai-server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("serve")
}
