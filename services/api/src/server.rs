use crate::cli::ServeArgs;
use crate::infra::{seed_campus, AppState};
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use hostel_allocation::clock::SystemClock;
use hostel_allocation::config::AppConfig;
use hostel_allocation::engine::AllocationEngine;
use hostel_allocation::error::AppError;
use hostel_allocation::events::{BroadcastPublisher, IdempotentConsumer, OccupancyProjection};
use hostel_allocation::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 1024;

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
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let events = BroadcastPublisher::new(EVENT_BUFFER);
    let engine = AllocationEngine::in_memory(
        Arc::new(events.clone()),
        Arc::new(SystemClock),
        config.allocation.clone(),
    );
    if args.seed_demo {
        let seeded = seed_campus(&engine)?;
        info!(
            hostels = seeded.hostels,
            rooms = seeded.rooms,
            beds = seeded.beds,
            "demo campus seeded"
        );
    }

    let shutdown = CancellationToken::new();
    let sweeper = engine.spawn_sweeper(shutdown.clone());
    let projector = spawn_occupancy_projector(&events, shutdown.clone());

    let app = with_operational_routes(engine.router())
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        sweep_interval_secs = config.allocation.sweep_interval_secs,
        "hostel allocation engine ready"
    );

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "failed to listen for shutdown signal");
            }
            info!("shutdown requested");
            signal.cancel();
        })
        .await?;

    readiness_flag.store(false, Ordering::Release);
    shutdown.cancel();
    for (name, task) in [("hold sweeper", sweeper), ("occupancy projector", projector)] {
        if let Err(err) = task.await {
            warn!(task = name, error = %err, "background task ended abnormally");
        }
    }
    Ok(())
}

/// Keeps an in-process occupancy view in step with bed events, logging any
/// double binding it observes.
fn spawn_occupancy_projector(
    events: &BroadcastPublisher,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut receiver = events.subscribe();
    tokio::spawn(async move {
        let consumer =
            IdempotentConsumer::with_window(OccupancyProjection::default(), EVENT_BUFFER);
        loop {
            tokio::select! {
                received = receiver.recv() => match received {
                    Ok(envelope) => match consumer.deliver(&envelope) {
                        Ok(true) => debug!(
                            event = envelope.kind.label(),
                            occupied = consumer.handler().occupied_count(),
                            "occupancy projection updated"
                        ),
                        Ok(false) => debug!(event_id = %envelope.id, "duplicate event skipped"),
                        Err(err) => warn!(event_id = %envelope.id, error = %err, "occupancy projection rejected event"),
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "occupancy projector lagged behind the event stream");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = cancel.cancelled() => break,
            }
        }
    })
}
