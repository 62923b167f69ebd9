use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Order, OrderStatus, PaymentStatus};

/// Who caused a status change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Actor {
    System,
    Customer,
    Gateway,
    Operator(String),
}

impl Actor {
    /// Returns the stored representation, e.g. `operator:alice`.
    pub fn as_str(&self) -> String {
        match self {
            Actor::System => "system".to_string(),
            Actor::Customer => "customer".to_string(),
            Actor::Gateway => "gateway".to_string(),
            Actor::Operator(name) => format!("operator:{name}"),
        }
    }

    /// Parses the stored representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system" => Some(Actor::System),
            "customer" => Some(Actor::Customer),
            "gateway" => Some(Actor::Gateway),
            other => other
                .strip_prefix("operator:")
                .map(|name| Actor::Operator(name.to_string())),
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str())
    }
}

/// An append-only record of one status change on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub id: Uuid,
    pub order_id: OrderId,
    /// Order status after the change.
    pub status: OrderStatus,
    /// Order payment status after the change.
    pub payment_status: PaymentStatus,
    pub comment: String,
    pub actor: Actor,
    /// External reference that caused the change, such as a gateway payment id.
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StatusEntry {
    /// Creates an entry for `order_id` landing in the given statuses.
    pub fn new(
        order_id: OrderId,
        status: OrderStatus,
        payment_status: PaymentStatus,
        comment: impl Into<String>,
        actor: Actor,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            status,
            payment_status,
            comment: comment.into(),
            actor,
            reference: None,
            created_at: at,
        }
    }

    /// Records the entry written when an order is created.
    pub fn created(order: &Order, actor: Actor) -> Self {
        Self::new(
            order.id(),
            order.status(),
            order.payment_status(),
            "Order created",
            actor,
            order.created_at(),
        )
    }

    /// Attaches an external reference.
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_round_trips_through_storage_form() {
        for actor in [
            Actor::System,
            Actor::Customer,
            Actor::Gateway,
            Actor::Operator("alice".to_string()),
        ] {
            assert_eq!(Actor::parse(&actor.as_str()), Some(actor));
        }
        assert_eq!(Actor::parse("robot"), None);
    }
}
