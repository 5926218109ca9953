use crate::cli::ServeArgs;
use crate::infra::{AppState, KeywordEvaluator, TitleIntentResolver};
use crate::routes::with_allocation_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use talent_ai::config::AppConfig;
use talent_ai::error::AppError;
use talent_ai::telemetry;
use talent_ai::workflows::allocation::{AllocationService, InMemoryAllocationStore};
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let allocation_service = Arc::new(AllocationService::new(
        Arc::new(InMemoryAllocationStore::default()),
        Arc::new(KeywordEvaluator),
        Arc::new(TitleIntentResolver::default()),
        config.allocation.clone(),
    ));

    let app = with_allocation_routes(allocation_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        evaluation_fanout = config.allocation.evaluation_fanout,
        reallocation_concurrency = config.allocation.reallocation_concurrency,
        "allocation service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
