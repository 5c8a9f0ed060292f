//! Media pipeline worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mediaflow_db::{DatabaseConfig, PgStore};
use mediaflow_models::PipelineObserver;
use mediaflow_queue::{MetricsObserver, RedisTransport, TaskDispatcher};
use mediaflow_storage::S3ObjectStore;
use mediaflow_worker::{
    builtin_registry, Pipeline, PipelineAdvancer, ProcessorSettings, TaskExecutor, TaskProcessor,
    WorkerConfig,
};

fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mediaflow=info,info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

fn exit_on_error<T, E: std::fmt::Display>(result: Result<T, E>, what: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => {
            error!("Failed to {}: {}", what, e);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting mediaflow-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    exit_on_error(
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install(),
        "install metrics exporter",
    );
    info!("Metrics exporter listening on {}", metrics_addr);

    let store = exit_on_error(
        PgStore::connect(&DatabaseConfig::from_env()).await,
        "connect to task store",
    );
    exit_on_error(store.migrate().await, "run migrations");
    let store = Arc::new(store);

    let objects = exit_on_error(S3ObjectStore::from_env().await, "create object store client");
    if let Err(e) = objects.ensure_bucket().await {
        warn!("Could not verify bucket {}: {}", objects.bucket(), e);
    }
    let objects = Arc::new(objects);

    let transport = exit_on_error(RedisTransport::from_env(), "create transport");
    exit_on_error(transport.init().await, "initialise transport");
    let transport = Arc::new(transport);

    let observer: Arc<dyn PipelineObserver> = Arc::new(MetricsObserver::new());
    let registry = builtin_registry(objects.clone());
    let pipeline = Pipeline::new(config.steps.clone());
    for step in pipeline.steps() {
        if !registry.contains(step) {
            warn!(step = %step, "Pipeline step has no registered work unit; its tasks will fail");
        }
    }

    let dispatcher = TaskDispatcher::new(store.clone(), transport.clone(), observer.clone());
    let advancer = PipelineAdvancer::new(pipeline, dispatcher, store.clone());
    let processor = TaskProcessor::new(
        store,
        objects,
        registry,
        advancer,
        ProcessorSettings::from(&config),
    )
    .with_observer(observer);

    let executor = Arc::new(TaskExecutor::new(config, Arc::new(processor), transport));

    // Setup signal handler
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
