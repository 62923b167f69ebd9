//! Dependency bundle handed to every service at construction.

use std::sync::Arc;

use store::{CartStore, InMemoryCartStore, InMemoryOrderStore, OrderStore, SessionCartStore};

use crate::catalog::{Catalog, InMemoryCatalog};
use crate::charges::{ChargesPolicy, NoCharges};
use crate::clock::{Clock, ManualClock};
use crate::config::CommerceConfig;
use crate::gateway::{InMemoryGateway, PaymentGateway};
use crate::notify::{Notification, NotificationQueue};

/// Everything the services reach out to.
///
/// There are no ambient globals; a composition root builds one bundle and
/// clones it into each service.
#[derive(Clone)]
pub struct Dependencies {
    /// Durable carts of signed-in users.
    pub carts: Arc<dyn CartStore>,
    /// Expiring carts of guest sessions.
    pub session_carts: Arc<dyn CartStore>,
    pub orders: Arc<dyn OrderStore>,
    pub catalog: Arc<dyn Catalog>,
    pub charges: Arc<dyn ChargesPolicy>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub clock: Arc<dyn Clock>,
    pub notifications: NotificationQueue,
    pub config: CommerceConfig,
}

/// An all-in-memory bundle plus handles to its concrete parts.
///
/// The receiver of the notification queue is returned so tests can inspect
/// or drain what was enqueued.
pub struct InMemoryDependencies {
    pub deps: Dependencies,
    pub carts: InMemoryCartStore,
    pub session_carts: SessionCartStore,
    pub orders: InMemoryOrderStore,
    pub catalog: InMemoryCatalog,
    pub gateway: InMemoryGateway,
    pub clock: ManualClock,
    pub notifications: tokio::sync::mpsc::Receiver<Notification>,
}

impl InMemoryDependencies {
    /// Builds an in-memory bundle with the given configuration.
    pub fn new(config: CommerceConfig) -> Self {
        let carts = InMemoryCartStore::new();
        let session_carts = SessionCartStore::new(config.session_cart_ttl, 10_000);
        let orders = InMemoryOrderStore::new();
        let catalog = InMemoryCatalog::new();
        let gateway = InMemoryGateway::default();
        let clock = ManualClock::default();
        let (queue, notifications) = NotificationQueue::bounded(config.notification_queue_capacity);

        let deps = Dependencies {
            carts: Arc::new(carts.clone()),
            session_carts: Arc::new(session_carts.clone()),
            orders: Arc::new(orders.clone()),
            catalog: Arc::new(catalog.clone()),
            charges: Arc::new(NoCharges),
            gateway: Arc::new(gateway.clone()),
            clock: Arc::new(clock.clone()),
            notifications: queue,
            config,
        };

        Self {
            deps,
            carts,
            session_carts,
            orders,
            catalog,
            gateway,
            clock,
            notifications,
        }
    }
}

impl Default for InMemoryDependencies {
    fn default() -> Self {
        Self::new(CommerceConfig::default())
    }
}
