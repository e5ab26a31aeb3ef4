mod api;
mod auth;
mod catalog;
mod config;
mod db;
mod errors;
mod ledger;
mod lifecycle;
mod metrics;
mod notifications;
mod openapi;
mod scheduler;
mod storage;
mod types;

#[cfg(test)]
mod test_utils;

use crate::{
    catalog::Catalog,
    config::{DatabaseConfig, StorageConfig},
    db::{memory::MemoryStore, postgres::PgStore, store::Store},
    lifecycle::TransactionLifecycle,
    metrics::LifecycleMetrics,
    notifications::{mailer::LettreMailer, Notifier},
    openapi::ApiDoc,
    scheduler::Scheduler,
};
use axum::{
    http::{HeaderValue, Request, Response, StatusCode},
    routing::{get, patch, post},
    Router,
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use clap::Parser;
use config::{Args, Config};
use prometheus::Registry;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::{net::TcpListener, sync::Mutex};
use tokio_util::sync::{CancellationToken, DropGuard};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{debug, error, info, instrument, warn, Span};
use utoipa::OpenApi;
use utoipa_rapidoc::RapiDoc;

#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub lifecycle: TransactionLifecycle,
    pub catalog: Catalog,
}

/// Background task for leader election.
///
/// Only one replica should run the scheduler sweeps, so replicas race for a postgres advisory
/// lock on an interval. Advisory locks are session-based: the winner keeps the connection that
/// took the lock for as long as it wants to stay leader.
#[instrument(skip(pool, is_leader, shutdown, on_gain_leadership, on_lose_leadership))]
async fn leader_election_task<F1, F2, Fut1, Fut2>(
    pool: PgPool,
    is_leader: Arc<AtomicBool>,
    lock_id: i64,
    shutdown: CancellationToken,
    on_gain_leadership: F1,
    on_lose_leadership: F2,
) where
    F1: Fn() -> Fut1 + Send + 'static,
    F2: Fn() -> Fut2 + Send + 'static,
    Fut1: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    Fut2: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    let mut leader_conn: Option<sqlx::pool::PoolConnection<sqlx::Postgres>> = None;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        if !is_leader.load(Ordering::Relaxed) {
            let mut conn = match pool.acquire().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("Failed to acquire connection for leader election: {}", e);
                    continue;
                }
            };
            match sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)")
                .bind(lock_id)
                .fetch_one(&mut *conn)
                .await
            {
                Ok(true) => {
                    info!("Gained leadership");
                    is_leader.store(true, Ordering::Relaxed);
                    leader_conn = Some(conn);
                    if let Err(e) = on_gain_leadership().await {
                        error!("Failed to execute on_gain_leadership callback: {}", e);
                    }
                }
                Ok(false) => debug!("Following - will retry"),
                Err(e) => error!("Failed to check leader lock: {}", e),
            }
        } else if let Some(conn) = leader_conn.as_mut() {
            // A dead connection has already dropped the advisory lock
            if let Err(e) = sqlx::query("SELECT 1").execute(&mut **conn).await {
                warn!("Lost leadership (connection died): {}", e);
                is_leader.store(false, Ordering::Relaxed);
                leader_conn = None;
                if let Err(e) = on_lose_leadership().await {
                    error!("Failed to execute on_lose_leadership callback: {}", e);
                }
            } else {
                debug!("Leadership renewed");
            }
        } else {
            error!("Inconsistent state: is_leader=true but no connection");
            is_leader.store(false, Ordering::Relaxed);
        }
    }

    if is_leader.swap(false, Ordering::Relaxed) {
        if let Err(e) = on_lose_leadership().await {
            error!("Failed to execute on_lose_leadership callback: {}", e);
        }
    }
}

/// Open the configured store, running migrations against postgres
pub async fn connect_store(config: &DatabaseConfig) -> anyhow::Result<(Arc<dyn Store>, Option<PgPool>)> {
    match config {
        DatabaseConfig::Memory => {
            warn!("Using in-memory store: all data is lost on shutdown");
            Ok((Arc::new(MemoryStore::new()), None))
        }
        DatabaseConfig::External { url, max_connections } => {
            info!("Using external database");
            let pool = PgPoolOptions::new().max_connections(*max_connections).connect(url).await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            Ok((Arc::new(PgStore::new(pool.clone())), Some(pool)))
        }
    }
}

/// Wire the lifecycle service to its collaborators
pub fn build_lifecycle(config: &Config, store: Arc<dyn Store>, registry: Option<&Registry>) -> anyhow::Result<TransactionLifecycle> {
    let mailer = LettreMailer::from_config(&config.notifications)?;
    let notifier = Notifier::new(
        store.clone(),
        Arc::new(mailer),
        config.lifecycle.budgets.read,
        config.notifications.max_attempts,
        config.notifications.batch_size,
    );
    let metrics = registry.map(LifecycleMetrics::new).transpose()?;

    Ok(TransactionLifecycle::builder()
        .store(store)
        .config(config.lifecycle.clone())
        .notifier(notifier)
        .proofs(storage::from_config(&config.storage))
        .maybe_metrics(metrics)
        .build())
}

/// Start the scheduler on this replica, or behind leader election when a shared database is in use.
/// Dropping the returned guard stops it.
fn start_scheduler(config: &Config, lifecycle: TransactionLifecycle, pool: Option<PgPool>, is_leader: Arc<AtomicBool>) -> DropGuard {
    // "EVNTSWEP"
    const LEADER_LOCK_ID: i64 = 0x4556_4E54_5357_4550_i64;

    let shutdown = CancellationToken::new();
    if !config.scheduler.enabled {
        info!("Scheduler disabled");
        return shutdown.drop_guard();
    }

    let scheduler = Scheduler::new(lifecycle, config.scheduler.clone());
    match pool {
        Some(pool) if config.scheduler.leader_election => {
            info!("Starting leader election - will attempt to acquire leadership");
            let running: Arc<Mutex<Option<CancellationToken>>> = Arc::default();
            let gain_running = running.clone();
            let lose_running = running;
            tokio::spawn(leader_election_task(
                pool,
                is_leader,
                LEADER_LOCK_ID,
                shutdown.clone(),
                move || {
                    let running = gain_running.clone();
                    let scheduler = scheduler.clone();
                    async move {
                        let mut running = running.lock().await;
                        if running.is_none() {
                            *running = Some(scheduler.spawn());
                        }
                        Ok(())
                    }
                },
                move || {
                    let running = lose_running.clone();
                    async move {
                        if let Some(token) = running.lock().await.take() {
                            token.cancel();
                        }
                        Ok(())
                    }
                },
            ));
        }
        _ => {
            info!("Skipping leader election - running scheduler on this replica");
            is_leader.store(true, Ordering::Relaxed);
            let token = scheduler.spawn();
            let stop = shutdown.clone();
            tokio::spawn(async move {
                stop.cancelled().await;
                token.cancel();
            });
        }
    }
    shutdown.drop_guard()
}

/// Build the store, lifecycle, router and background tasks from configuration
pub async fn setup_app(config: Config) -> anyhow::Result<(Router, DropGuard)> {
    debug!("Setting up application");
    let (store, pool) = connect_store(&config.database).await?;

    let registry = config.enable_metrics.then(Registry::new);
    let catalog = Catalog::new(store.clone(), config.lifecycle.budgets.catalog);
    let lifecycle = build_lifecycle(&config, store, registry.as_ref())?;

    let scheduler_guard = start_scheduler(&config, lifecycle.clone(), pool, Arc::default());

    let state = AppState::builder()
        .config(config)
        .lifecycle(lifecycle)
        .catalog(catalog)
        .build();
    let router = build_router(state, registry)?;
    Ok((router, scheduler_guard))
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut cors = if config.cors.allowed_origins.iter().any(|origin| origin == "*") {
        anyhow::ensure!(
            !config.cors.allow_credentials,
            "cors: a wildcard origin cannot be combined with allow_credentials"
        );
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins = config
            .cors
            .allowed_origins
            .iter()
            .map(|origin| origin.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()?;
        CorsLayer::new()
            .allow_origin(origins)
            .allow_credentials(config.cors.allow_credentials)
    };
    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(Duration::from_secs(max_age));
    }
    Ok(cors)
}

#[instrument(skip_all)]
pub fn build_router(state: AppState, metrics_registry: Option<Registry>) -> anyhow::Result<Router> {
    use api::handlers::{events, points, transactions};

    let api_routes = Router::new()
        .route("/transactions", post(transactions::create_transaction))
        .route("/transactions/check-availability", post(transactions::check_availability))
        .route("/transactions/my", get(transactions::list_my_transactions))
        .route("/transactions/organizer", get(transactions::list_organizer_transactions))
        .route("/transactions/{transaction_id}", get(transactions::get_transaction))
        .route(
            "/transactions/{transaction_id}/payment-proof",
            post(transactions::upload_payment_proof),
        )
        .route("/transactions/{transaction_id}/accept", patch(transactions::accept_transaction))
        .route("/transactions/{transaction_id}/reject", patch(transactions::reject_transaction))
        .route("/transactions/{transaction_id}/cancel", patch(transactions::cancel_transaction))
        .route("/events", post(events::create_event))
        .route("/events/{event_id}", patch(events::update_event).delete(events::delete_event))
        .route("/events/{event_id}/publish", post(events::publish_event))
        .route("/events/{event_id}/ticket-types", post(events::create_ticket_type))
        .route(
            "/ticket-types/{ticket_type_id}",
            patch(events::update_ticket_type).delete(events::delete_ticket_type),
        )
        .route("/events/{event_id}/vouchers", post(events::create_voucher))
        .route("/vouchers/{voucher_id}", patch(events::update_voucher))
        .route("/events/{event_id}/attendees", get(events::list_attendees))
        .route("/events/{event_id}/vouchers/validate", get(events::validate_voucher))
        .route("/points/balance", get(points::get_balance))
        .route("/points/entries", get(points::list_entries))
        .route("/points/adjustments", post(points::create_adjustment))
        .with_state(state.clone());

    let mut router = Router::new()
        .route("/healthz", get(|| async { "OK" }))
        .nest("/api/v1", api_routes)
        .merge(RapiDoc::with_openapi("/api-docs/openapi.json", ApiDoc::openapi()).path("/docs"));

    if let StorageConfig::Local {
        directory,
        public_base_url,
    } = &state.config.storage
    {
        if public_base_url.starts_with('/') {
            router = router.nest_service(public_base_url, ServeDir::new(directory));
        }
    }

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
            )
        })
        .on_response(|response: &Response<_>, latency: Duration, _span: &Span| {
            tracing::info!(
                status = %response.status(),
                latency = ?latency,
                "request completed"
            );
        });
    router = router.layer(ServiceBuilder::new().layer(trace_layer).layer(create_cors_layer(&state.config)?));

    if let Some(registry) = metrics_registry {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route(
                "/internal/metrics",
                get(|| async move {
                    use prometheus::{Encoder, TextEncoder};

                    let mut body = metric_handle.render();
                    let mut buffer = vec![];
                    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
                        error!("Failed to encode lifecycle metrics: {}", e);
                        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
                    }
                    body.push_str(&String::from_utf8_lossy(&buffer));
                    (StatusCode::OK, body)
                }),
            )
            .layer(prometheus_layer);
    }

    Ok(router)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    debug!("{:?}", args);

    let config = Config::load(&args)?;
    if args.validate {
        println!("Configuration is valid:\n{config:#?}");
        return Ok(());
    }
    debug!("Starting eventhub with configuration: {:#?}", config);

    let bind_addr = config.bind_address();
    let (router, scheduler_guard) = setup_app(config).await?;

    let listener = TcpListener::bind(&bind_addr).await?;
    info!("EventHub listening on http://{}", bind_addr);

    axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

    drop(scheduler_guard);
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}
