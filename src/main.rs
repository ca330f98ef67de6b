use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cascade::cli::{format_scenarios, Args};
use cascade::cluster::KubeGatewayFactory;
use cascade::config::{load_scenario_file, plan_scenario, RuntimeDefaults, ScenarioDocument};
use cascade::server::{create_router, AppState};
use cascade::session::{InMemorySessionStore, NewScenario, SessionStore};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file before runtime defaults are read
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    let defaults = RuntimeDefaults::from_env();

    let documents = match args.scenarios {
        Some(ref path) => match load_scenario_file(path) {
            Ok(docs) => docs,
            Err(e) => {
                error!("Failed to load scenarios {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => Vec::new(),
    };

    // Dry-run mode: print what each scenario would do and exit
    if args.dry_run {
        println!("{}", format_scenarios(&documents, &defaults));
        return;
    }

    let store = Arc::new(InMemorySessionStore::new());
    match register_scenarios(store.as_ref(), documents, &defaults).await {
        Ok(count) => info!("Registered {} scenarios", count),
        Err(e) => {
            error!("{:#}", e);
            process::exit(1);
        }
    }

    let shutdown = CancellationToken::new();
    let state = AppState::new(Arc::new(KubeGatewayFactory), store, defaults)
        .with_log_buffer(args.log_buffer)
        .with_shutdown(shutdown.clone());

    let addr = args.listen_addr();
    info!("Starting cascade on {}", addr);

    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            process::exit(1);
        }
    };

    info!("Server listening on {}", addr);
    info!("Endpoints:");
    info!("  GET    /health                   - Health check");
    info!("  GET    /status                   - Live session count");
    info!("  POST   /quickstart               - Ad-hoc session (SSE log stream)");
    info!("  POST   /session/{{id}}/{{version}}   - Run a stored scenario (SSE log stream)");
    info!("  DELETE /session/{{id}}             - Stop a running session");
    info!("  POST   /scenario                 - Register a scenario version");
    info!("  GET    /scenario                 - List stored scenario versions");
    info!("  GET    /scenario/{{id}}            - Latest scenario version");
    info!("  GET    /scenario/{{id}}/versions   - Versions of a scenario");
    info!("  GET    /scenario/{{id}}/sessions   - Sessions of a scenario");
    info!("  GET    /metric?scenario={{id}}     - Session counts per version");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
    {
        error!("Server error: {}", e);
        process::exit(1);
    }
}

/// Validate and store scenarios loaded at startup.
async fn register_scenarios(
    store: &dyn SessionStore,
    documents: Vec<ScenarioDocument>,
    defaults: &RuntimeDefaults,
) -> anyhow::Result<usize> {
    let count = documents.len();
    for doc in documents {
        let id = doc.scenario.id.clone();
        if let Err(e) = plan_scenario(&doc.target, &doc.runtime, &doc.cluster, defaults) {
            bail!("scenario '{}' is invalid: {}", id, e);
        }
        store
            .put_scenario(NewScenario {
                id: doc.scenario.id,
                description: doc.scenario.description,
                target: doc.target,
                runtime: doc.runtime,
            })
            .await
            .with_context(|| format!("failed to register scenario '{}'", id))?;
    }
    Ok(count)
}

/// Resolve on Ctrl-C or SIGTERM, cancelling every live session first.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutting down, stopping live sessions");
    shutdown.cancel();
}
