//! IronSmith
//!
//! A simple continuous-integration supervisor. It watches a directory
//! of project definitions and, for each enabled project, repeatedly
//! fetches, builds, tests, and releases the latest version, keeping
//! per-stage logs and release artifacts in a per-project embedded
//! datastore. A small HTTP/JSON API exposes projects, versions, logs,
//! and releases, and lets a build be triggered out of cycle.

mod api;
mod config;
mod project;
mod registry;
mod runner;
mod store;

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::Config;
use crate::project::ENABLED_PROJECT_DIR;
use crate::registry::Registry;

#[derive(Debug, Parser)]
#[command(name = "ironsmith", about = "A simple continuous-integration supervisor")]
struct Args {
    /// Print every command and stage as it processes
    #[arg(short, long)]
    verbose: bool,

    /// Settings file to use instead of the standard locations
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose {
        "ironsmith=debug,tower_http=debug"
    } else {
        "ironsmith=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let (config, settings_path) = Config::load_or_create(args.config.as_deref())?;
    info!("using settings file {}", settings_path.display());
    info!("project definition directory: {}", config.project_dir.display());
    info!("project data directory: {}", config.data_dir.display());

    fs::create_dir_all(config.project_dir.join(ENABLED_PROJECT_DIR)).with_context(|| {
        format!("creating project directory {}", config.project_dir.display())
    })?;
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data directory {}", config.data_dir.display()))?;

    project::prep_template(&config.project_dir)?;

    let config = Arc::new(config);
    let registry = Registry::new(Arc::clone(&config));
    registry.load().context("loading projects")?;

    // close every datastore cleanly before exiting; in-flight build
    // scripts are not interrupted
    {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
                registry.stop_all();
                std::process::exit(0);
            }
        });
    }

    let app = api::create_router(Arc::clone(&registry));
    let addr: SocketAddr = config
        .address
        .parse()
        .with_context(|| format!("invalid listen address {:?}", config.address))?;
    info!("listening on {}", addr);

    if config.tls_enabled() {
        let tls = RustlsConfig::from_pem_file(&config.cert_file, &config.key_file)
            .await
            .context("loading the TLS certificate and key")?;
        axum_server::bind_rustls(addr, tls)
            .serve(app.into_make_service())
            .await
            .context("serving HTTPS")?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {}", addr))?;
        axum::serve(listener, app).await.context("serving HTTP")?;
    }

    Ok(())
}
