//! AgentQueue daemon
//!
//! `aq run` starts the queue store, one scheduler loop for the resolved
//! namespace, and the HTTP control plane, and runs until SIGINT/SIGTERM.
//!
//! Exit codes: 0 clean stop, 1 startup configuration error, 2 fatal
//! subsystem failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use eyre::Context as _;
use tokio::sync::watch;
use tracing::{error, info};

use agentqueue::api::{router, AppState};
use agentqueue::chunking::ChunkingExecutor;
use agentqueue::cli::{Cli, Commands};
use agentqueue::config::Config;
use agentqueue::executor::{ExecutorAdapter, TimeoutProfiles};
use agentqueue::locks::LockManager;
use agentqueue::namespace;
use agentqueue::review::ReviewLoop;
use agentqueue::scheduler::{RunnerRegistry, Scheduler, SchedulerSettings};
use agentqueue::trace::TraceWriter;
use queuestore::QueueStore;

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

fn main() -> ExitCode {
    setup_logging();
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let Commands::Run {
        namespace: ns_override,
        state_dir,
        port,
    } = cli.command;

    if let Some(state_dir) = state_dir {
        config.queue.state_dir = Some(state_dir);
    }
    if let Some(port) = port {
        config.http.port = port;
    }
    if let Some(ns) = ns_override {
        config.queue.namespace = Some(ns);
    }

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let namespace = match namespace::resolve(config.queue.namespace.as_deref(), &cwd) {
        Ok(namespace) => namespace,
        Err(e) => {
            error!("Namespace error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(serve(config, namespace)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn serve(config: Config, namespace: String) -> eyre::Result<()> {
    let state_dir = config.state_dir();
    let store = Arc::new(QueueStore::open(&state_dir).context("failed to open queue store")?);
    let locks = Arc::new(LockManager::new(config.executor.max_concurrent));
    let trace = Arc::new(TraceWriter::new(&state_dir));
    let runners = Arc::new(RunnerRegistry::new(config.queue.runner_alive_window_ms));

    // The executor stack: chunking wraps review wraps the adapter
    let profiles = TimeoutProfiles::from_config(&config.timeouts);
    let adapter = Arc::new(ExecutorAdapter::new(config.executor.clone(), profiles));
    let review = Arc::new(ReviewLoop::new(adapter, config.review.clone(), Some(trace.clone())));
    let stack = Arc::new(ChunkingExecutor::new(review, locks.clone(), config.chunking.clone()));

    let scheduler = Arc::new(Scheduler::new(
        SchedulerSettings::from_config(&config, namespace.clone()),
        store.clone(),
        locks,
        stack,
        runners.clone(),
    ));
    let (stop_tx, stop_rx) = watch::channel(false);
    let scheduler_handle = tokio::spawn(scheduler.clone().run(stop_rx));

    let state = AppState {
        store,
        runners,
        trace,
        namespace: namespace.clone(),
        web_pid: std::process::id(),
        build_sha: std::env::var("BUILD_SHA").ok(),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind((config.http.bind.as_str(), config.http.port))
        .await
        .context("failed to bind control plane")?;
    info!(
        addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default(),
        %namespace,
        state_dir = %state_dir.display(),
        "AgentQueue listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("control plane failed")?;

    info!("Shutdown requested; draining scheduler");
    let _ = stop_tx.send(true);
    scheduler_handle.await.context("scheduler panicked")?;
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
