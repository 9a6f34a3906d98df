use crate::cli::ServeArgs;
use crate::infra::{AdmissionStore, AppState};
use crate::routes::with_admission_routes;
use admission_intake::config::AppConfig;
use admission_intake::error::AppError;
use admission_intake::telemetry;
use admission_intake::workflows::admission::{
    AccountDirectory, DraftRepository, DraftService, WaveRepository,
};
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

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

    let store = Arc::new(AdmissionStore::from_config(&config.admission)?);
    let waves: Arc<dyn WaveRepository> = store.clone();
    let prune_interval = config.admission.prune_interval;
    let draft_service = Arc::new(DraftService::new(
        store.clone(),
        store,
        waves,
        config.admission.clone(),
    ));

    let _reaper = spawn_reaper(draft_service.clone(), prune_interval);

    let app = with_admission_routes(draft_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "admission intake service ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Sweep expired drafts on a fixed interval for the lifetime of the server.
///
/// A zero interval disables the sweep; `prune` can still be run from cron.
/// Each sweep runs on the blocking pool because the store may touch disk.
pub(crate) fn spawn_reaper<R, A>(
    service: Arc<DraftService<R, A>>,
    every: Duration,
) -> Option<JoinHandle<()>>
where
    R: DraftRepository + 'static,
    A: AccountDirectory + 'static,
{
    if every.is_zero() {
        info!("periodic draft pruning disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let sweep = service.clone();
            match tokio::task::spawn_blocking(move || sweep.prune_expired()).await {
                Ok(Ok(removed)) => debug!(removed, "periodic draft prune finished"),
                Ok(Err(err)) => warn!(error = %err, "periodic draft prune failed"),
                Err(err) => warn!(error = %err, "periodic draft prune task aborted"),
            }
        }
    }))
}
