//! Record builders shared by unit tests.

use chrono::Utc;
use common::{Money, OrderId, ProductId, UserId};

use crate::{Address, NewOrder, Order, OrderItem};

pub(crate) fn sample_address() -> Address {
    Address {
        name: "Asha Rao".to_string(),
        line1: "12 MG Road".to_string(),
        line2: None,
        city: "Bengaluru".to_string(),
        state: "KA".to_string(),
        postal_code: "560001".to_string(),
        country: "IN".to_string(),
        phone: None,
    }
}

/// Two lines (2 x 10.00, 1 x 5.00) plus 2.50 tax, 1.00 shipping and 0.50 off: 28.00 due.
pub(crate) fn sample_new_order() -> NewOrder {
    NewOrder {
        id: OrderId::new(),
        order_number: format!("ORD-20260101-{}", &OrderId::new().to_string()[..8]),
        user_id: Some(UserId::new()),
        currency: "INR".to_string(),
        shipping_method: "standard".to_string(),
        shipping_address: sample_address(),
        billing_address: sample_address(),
        notes: None,
        items: vec![
            OrderItem::new(ProductId::new("P-1"), None, "SKU-1", "Widget", 2, Money::from_minor(1000))
                .unwrap(),
            OrderItem::new(ProductId::new("P-2"), None, "SKU-2", "Gadget", 1, Money::from_minor(500))
                .unwrap(),
        ],
        tax: Money::from_minor(250),
        shipping: Money::from_minor(100),
        discount: Money::from_minor(50),
        created_at: Utc::now(),
    }
}

pub(crate) fn sample_order() -> Order {
    Order::create(sample_new_order()).unwrap()
}
