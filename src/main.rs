use legislative_sync_lib::{
    cli::{parse_args, Command},
    config::Config,
    db::build_db_pool,
    endpoints::{self, ENDPOINTS},
    logging::{format_error_report, init_logging},
    record::Record,
    server::setup_server_with_addr,
    state::{AppState, SharedStore},
    store::{MemoryStore, PgRecordStore},
    sync_service::{
        types::{SyncOptions, SyncProgress},
        SyncEngine,
    },
};
use std::error::Error;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use dotenv::dotenv;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type BoxError = Box<dyn Error + Send + Sync>;

const DB_POOL_MAX_SIZE: usize = 16;

/// Cancels `token` when a SIGTERM or SIGINT signal is received.
async fn handle_shutdown_signals(token: CancellationToken) {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(err), _) | (_, Err(err)) => {
                error!(
                    event = "signal_handler_failed",
                    error = %err,
                    "failed to register shutdown signal handlers"
                );
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            info!(event = "shutdown_signal", signal = "SIGTERM", "SIGTERM received, shutting down");
        }
        _ = sigint.recv() => {
            info!(event = "shutdown_signal", signal = "SIGINT", "SIGINT received, shutting down");
        }
    }

    token.cancel();
}

async fn connect_store(config: &Config) -> Result<SharedStore, BoxError> {
    let pool = build_db_pool(config.require_db_url()?, DB_POOL_MAX_SIZE).await?;
    Ok(Arc::new(PgRecordStore::new(pool)))
}

async fn serve(config: &Config) -> Result<ExitCode, BoxError> {
    let store = connect_store(config).await?;
    let state = Arc::new(AppState::new(
        store,
        config.engine_config(),
        CancellationToken::new(),
    ));
    let shutdown_handle = tokio::spawn(handle_shutdown_signals(state.shutdown_token.clone()));

    let server_handle = setup_server_with_addr(state.clone(), config.bind_addr).await?;
    server_handle.await??;
    shutdown_handle.abort();

    info!(event = "admin_server_stopped", "admin server stopped");
    Ok(ExitCode::SUCCESS)
}

async fn load_records(path: &Path) -> Result<Vec<Record>, BoxError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    let records = serde_json::from_str(&raw)
        .map_err(|err| format!("{} is not a JSON array of records: {err}", path.display()))?;
    Ok(records)
}

async fn sync(
    config: &Config,
    endpoint: &str,
    input: &Path,
    batch_size: Option<usize>,
    ignore_duplicates: bool,
    dry_run: bool,
) -> Result<ExitCode, BoxError> {
    let descriptor = endpoints::lookup(endpoint).ok_or_else(|| {
        let known: Vec<&str> = ENDPOINTS.iter().map(|e| e.name).collect();
        format!("unknown endpoint {endpoint}; known endpoints: {}", known.join(", "))
    })?;
    let records = load_records(input).await?;

    let store: SharedStore = if dry_run {
        warn!(event = "dry_run", "dry run: records are written to an in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        connect_store(config).await?
    };
    let engine = SyncEngine::new(store, config.engine_config());

    let cancel = CancellationToken::new();
    let shutdown_handle = tokio::spawn(handle_shutdown_signals(cancel.clone()));
    let options = SyncOptions {
        batch_size,
        update_on_conflict: ignore_duplicates.then_some(false),
        on_progress: Some(Arc::new(|progress: SyncProgress| {
            info!(
                event = "sync_progress",
                processed = progress.processed,
                total = progress.total,
                duplicates = progress.duplicates,
                "sync progress"
            );
        })),
        cancel: Some(cancel),
    };

    let result = engine
        .sync_endpoint_data(descriptor, records, options)
        .await;
    shutdown_handle.abort();

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn health(config: &Config) -> Result<ExitCode, BoxError> {
    let store = connect_store(config).await?;
    let engine = SyncEngine::new(store, config.engine_config());
    let health = engine.perform_health_check().await;

    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(if health.db_connection {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn list_endpoints() -> ExitCode {
    for endpoint in ENDPOINTS.iter() {
        println!(
            "{}\t{}\t{}",
            endpoint.name,
            endpoint.table,
            endpoint.unique_field.unwrap_or("-")
        );
    }
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    let args = parse_args();
    let logging_context = init_logging("legislative_sync", args.command.mode(), &args.log_level);
    let run_span = tracing::info_span!(
        "sync_run",
        service = %logging_context.service,
        environment = %logging_context.environment,
        mode = %logging_context.mode,
        run_id = %logging_context.run_id
    );
    let _run_guard = run_span.enter();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", format_error_report(&err));
            return ExitCode::from(2);
        }
    };

    let outcome = match &args.command {
        Command::Serve => serve(&config).await,
        Command::Sync {
            endpoint,
            input,
            batch_size,
            ignore_duplicates,
            dry_run,
        } => {
            sync(
                &config,
                endpoint,
                input,
                *batch_size,
                *ignore_duplicates,
                *dry_run,
            )
            .await
        }
        Command::Health => health(&config).await,
        Command::Endpoints => Ok(list_endpoints()),
    };

    match outcome {
        Ok(code) => code,
        Err(err) => {
            error!(
                event = "command_failed",
                mode = args.command.mode(),
                error = %err,
                "command failed"
            );
            eprintln!("{}", format_error_report(err.as_ref()));
            ExitCode::FAILURE
        }
    }
}
