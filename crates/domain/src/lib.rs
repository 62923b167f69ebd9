//! Domain layer for the commerce transaction core.
//!
//! This crate provides:
//! - `CartService` for durable user carts and expiring guest carts
//! - `OrderService` for checkout, order reads and lifecycle changes
//! - `PaymentService` for gateway intents, verification, failures and refunds
//! - The order/payment state machine and the `CommandHandler` that commits
//!   its decisions
//! - Ports for the catalog, charges, payment gateway and notifications

pub mod cart;
pub mod catalog;
pub mod charges;
pub mod clock;
pub mod command;
pub mod config;
pub mod deps;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod machine;
pub mod notify;
pub mod order;
pub mod payment;

pub use cart::{CartService, CartSnapshot, MergeOutcome};
pub use catalog::{Catalog, InMemoryCatalog, LineQuote, Product, Variant};
pub use charges::{Charges, ChargesPolicy, FixedCharges, NoCharges};
pub use clock::{Clock, ManualClock, SystemClock};
pub use command::{CommandHandler, CommandResult, MAX_COMMIT_ATTEMPTS};
pub use config::CommerceConfig;
pub use deps::{Dependencies, InMemoryDependencies};
pub use error::DomainError;
pub use gateway::{
    GatewayError, GatewayEvent, GatewayIntent, GatewayPayment, GatewayPaymentStatus,
    GatewayRefund, InMemoryGateway, IntentRequest, PaymentGateway,
};
pub use ledger::Ledger;
pub use notify::{
    LogNotifier, Notification, NotificationQueue, NotificationWorker, Notifier, NotifyError,
};
pub use order::{
    AdvanceFulfillment, CancelOrder, CheckoutRequest, OrderService, OrderUpdate, order_number,
};
pub use payment::{PaymentIntent, PaymentService};

/// The three services sharing one dependency bundle.
#[derive(Clone)]
pub struct Services {
    pub carts: CartService,
    pub orders: OrderService,
    pub payments: PaymentService,
}

impl Services {
    pub fn new(deps: &Dependencies) -> Self {
        Self {
            carts: CartService::new(deps),
            orders: OrderService::new(deps),
            payments: PaymentService::new(deps),
        }
    }
}
