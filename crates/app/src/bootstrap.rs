//! Assembly of the dependency bundle against PostgreSQL and the HTTP gateway.

use std::sync::Arc;

use domain::{
    Catalog, ChargesPolicy, CommerceConfig, Dependencies, NotificationQueue, NotificationWorker,
    Notifier, PaymentGateway, Services, SystemClock,
};
use gateway::HttpPaymentGateway;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use store::{PostgresCartStore, PostgresOrderStore, SessionCartStore};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::AppConfig;
use crate::error::AppError;

/// Upper bound on live guest carts held in memory.
pub const SESSION_CART_CAPACITY: u64 = 100_000;

/// Collaborators owned by the host application.
#[derive(Clone)]
pub struct Ports {
    pub catalog: Arc<dyn Catalog>,
    pub charges: Arc<dyn ChargesPolicy>,
    pub notifier: Arc<dyn Notifier>,
}

/// A running transaction core.
pub struct App {
    pub deps: Dependencies,
    pub services: Services,
    pub pool: PgPool,
    worker: JoinHandle<u64>,
}

impl App {
    /// Drops the services, waits for queued notifications to drain and
    /// closes the pool.
    ///
    /// Clones of the services held elsewhere keep the queue open; drop them
    /// first. Returns the number of notifications delivered.
    pub async fn shutdown(self) -> u64 {
        let App {
            deps,
            services,
            pool,
            worker,
        } = self;
        drop(services);
        drop(deps);

        let delivered = match worker.await {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::error!(error = %e, "Notification worker stopped abnormally");
                0
            }
        };
        pool.close().await;
        info!(delivered, "Commerce core shut down");
        delivered
    }
}

/// Opens the connection pool.
pub async fn connect(config: &AppConfig) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(config.database_url.expose_secret())
        .await?;
    Ok(pool)
}

/// Connects, migrates and assembles the core. Must run inside a Tokio runtime.
#[tracing::instrument(skip_all)]
pub async fn bootstrap(config: &AppConfig, ports: Ports) -> Result<App, AppError> {
    let pool = connect(config).await?;
    store::postgres::run_migrations(&pool).await?;
    info!("Database migrations applied");

    let gateway = HttpPaymentGateway::new(config.gateway.clone())?;
    Ok(assemble(
        pool,
        Arc::new(gateway),
        config.commerce.clone(),
        ports,
    ))
}

/// Wires the stores, gateway and ports into services and spawns the
/// notification worker.
pub fn assemble(
    pool: PgPool,
    gateway: Arc<dyn PaymentGateway>,
    config: CommerceConfig,
    ports: Ports,
) -> App {
    let (notifications, receiver) = NotificationQueue::bounded(config.notification_queue_capacity);
    let worker = NotificationWorker::new(receiver, ports.notifier).spawn();

    let deps = Dependencies {
        carts: Arc::new(PostgresCartStore::new(pool.clone())),
        session_carts: Arc::new(SessionCartStore::new(
            config.session_cart_ttl,
            SESSION_CART_CAPACITY,
        )),
        orders: Arc::new(PostgresOrderStore::new(pool.clone())),
        catalog: ports.catalog,
        charges: ports.charges,
        gateway,
        clock: Arc::new(SystemClock),
        notifications,
        config,
    };
    let services = Services::new(&deps);

    info!(
        currency = %deps.config.currency,
        payment_timeout_secs = deps.config.payment_timeout.as_secs(),
        "Commerce core assembled"
    );
    App {
        deps,
        services,
        pool,
        worker,
    }
}
