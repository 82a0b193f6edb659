use std::{process, sync::Arc};

use bharatmart::{
    adapters::{Adapters, workers::WorkerBackend},
    application::{
        error::AppError,
        jobs::{JobDispatcher, JobQueue, WorkerContext},
    },
    config::{self, Command, Settings, WorkerArgs},
    infra::{
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::signal;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

const SOURCE: &str = "bharatmart::main";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(infra_error)?;
    settings.deployment.log_summary();

    match cli_args.command {
        Some(Command::Worker(args)) => run_worker(settings, args).await,
        Some(Command::Serve(_)) | None => run_serve(settings).await,
    }
}

async fn run_serve(settings: Settings) -> Result<(), AppError> {
    let adapters = Adapters::from_config(&settings).await;

    // Inline mode has no separate consumer, so the API process handles its own jobs.
    if adapters.workers.backend() == WorkerBackend::InProcess {
        let dispatcher = JobDispatcher::all(Arc::new(worker_context(&adapters)));
        adapters
            .workers
            .process_jobs(Arc::new(dispatcher))
            .await
            .map_err(AppError::from)?;
    }

    let router = http::build_router(HttpState::new(adapters.clone()));
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| infra_error(InfraError::from(err)))?;
    info!(target = SOURCE, addr = %settings.server.addr, "http server listening");

    let served = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    adapters.close(settings.server.graceful_shutdown).await;
    served
}

async fn run_worker(settings: Settings, args: WorkerArgs) -> Result<(), AppError> {
    if !settings.deployment.should_use_workers() {
        info!(
            target = SOURCE,
            worker_mode = %settings.deployment.worker_mode,
            "worker mode does not use a queue, workers are disabled"
        );
        return Ok(());
    }

    let job_types = args.worker_type.job_types();
    let adapters = Adapters::for_workers(&settings, job_types.clone()).await;
    let queues: Vec<&str> = job_types.iter().map(|job_type| job_type.queue_name()).collect();

    let dispatcher = JobDispatcher::new(Arc::new(worker_context(&adapters)), job_types);
    adapters
        .workers
        .process_jobs(Arc::new(dispatcher))
        .await
        .map_err(AppError::from)?;
    info!(
        target = SOURCE,
        queues = ?queues,
        concurrency = settings.queue.concurrency.get(),
        "workers started"
    );

    shutdown_signal().await;
    info!(target = SOURCE, "draining workers");
    adapters.close(settings.server.graceful_shutdown).await;
    Ok(())
}

fn worker_context(adapters: &Adapters) -> WorkerContext {
    WorkerContext::new(
        adapters.database.clone(),
        adapters.cache.clone(),
        JobQueue::new(adapters.workers.clone()),
    )
}

fn infra_error(err: InfraError) -> AppError {
    AppError::unexpected(err.to_string())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(target = SOURCE, error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(target = SOURCE, error = %err, "failed to listen for SIGTERM");
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
    info!(target = SOURCE, "shutdown signal received");
}
