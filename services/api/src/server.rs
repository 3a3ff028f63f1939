use crate::cli::ServeArgs;
use crate::infra::{seeded_ledger, AppState, SAMPLE_POSTING_ID};
use crate::routes::with_assessment_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use candidate_assessment::assessment::{FlowError, SystemClock};
use candidate_assessment::config::AppConfig;
use candidate_assessment::error::AppError;
use candidate_assessment::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
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

    let ledger = seeded_ledger(Arc::new(SystemClock)).map_err(FlowError::from)?;

    let app = with_assessment_routes(ledger)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        posting_id = SAMPLE_POSTING_ID,
        "candidate assessment service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
