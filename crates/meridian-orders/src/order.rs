//! Order domain model.
//!
//! Monetary amounts are exact decimals end to end; totals are the exact sum
//! of `quantity * unit_price` with no rounding anywhere. Status changes are
//! data: the transition table is the single authority on what may follow
//! what.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use meridian_common::error::CoreError;

/// Customer-visible order state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Created, saga not yet finished.
    Pending,
    /// Saga completed; order is live.
    Confirmed,
    /// Being prepared.
    Processing,
    /// Handed to the carrier.
    Shipped,
    /// Terminal: delivered.
    Delivered,
    /// Terminal: cancelled (by compensation or by request).
    Cancelled,
    /// Processing failed; may be retried into processing.
    Failed,
}

impl OrderStatus {
    /// Wire/storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Processing => "PROCESSING",
            Self::Shipped => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        }
    }

    /// Parse a wire name.
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "CONFIRMED" => Ok(Self::Confirmed),
            "PROCESSING" => Ok(Self::Processing),
            "SHIPPED" => Ok(Self::Shipped),
            "DELIVERED" => Ok(Self::Delivered),
            "CANCELLED" => Ok(Self::Cancelled),
            "FAILED" => Ok(Self::Failed),
            other => Err(CoreError::invalid_input(format!(
                "unknown order status: {other}"
            ))),
        }
    }

    /// Terminal states accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }

    /// The transition table. Setting the current status again is a
    /// permitted no-op.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Confirmed, Self::Processing)
                | (Self::Confirmed, Self::Cancelled)
                | (Self::Processing, Self::Shipped)
                | (Self::Processing, Self::Cancelled)
                | (Self::Processing, Self::Failed)
                | (Self::Shipped, Self::Delivered)
                | (Self::Failed, Self::Processing)
        )
    }
}

/// Saga progress, persisted with the order so a crash leaves a recoverable
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaState {
    /// Order persisted, saga not yet begun.
    NotStarted,
    /// Saga running.
    InProgress,
    /// Buyer validated against the identity service.
    UserValidated,
    /// Saga finished; order confirmed.
    Completed,
    /// Rolling forward into cancellation.
    Compensating,
    /// Compensation finished; order cancelled.
    Failed,
}

impl SagaState {
    /// Wire/storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::UserValidated => "USER_VALIDATED",
            Self::Completed => "COMPLETED",
            Self::Compensating => "COMPENSATING",
            Self::Failed => "FAILED",
        }
    }
}

/// One order line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItem {
    /// Product identifier.
    pub product_id: String,
    /// Display name.
    pub name: String,
    /// Units ordered; at least one.
    pub quantity: u32,
    /// Exact unit price; non-negative.
    pub unit_price: Decimal,
}

impl OrderItem {
    /// Exact line total.
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// A stored order.
#[derive(Debug, Clone)]
pub struct Order {
    /// Server-assigned unique id.
    pub order_id: String,
    /// Buyer's directory id.
    pub user_id: String,
    /// Non-empty line items.
    pub items: Vec<OrderItem>,
    /// Exact sum of line totals.
    pub total_amount: Decimal,
    /// Customer-visible state.
    pub status: OrderStatus,
    /// Saga progress.
    pub saga_state: SagaState,
    /// Optimistic-concurrency version.
    pub version: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
    /// Delivery address.
    pub shipping_address: Option<String>,
    /// Payment method label.
    pub payment_method: Option<String>,
}

/// Validated input for order creation.
#[derive(Debug, Clone)]
pub struct NewOrder {
    /// Buyer's directory id.
    pub user_id: String,
    /// Line items.
    pub items: Vec<OrderItem>,
    /// Delivery address.
    pub shipping_address: Option<String>,
    /// Payment method label.
    pub payment_method: Option<String>,
}

impl NewOrder {
    /// Validate the input invariants. Runs before anything is persisted.
    pub fn validate(&self) -> Result<(), CoreError> {
        if Uuid::parse_str(&self.user_id).is_err() {
            return Err(CoreError::invalid_input("user id is not well-formed"));
        }
        if self.items.is_empty() {
            return Err(CoreError::invalid_input(
                "order must contain at least one item",
            ));
        }
        for item in &self.items {
            if item.quantity < 1 {
                return Err(CoreError::invalid_input(format!(
                    "item {} has zero quantity",
                    item.product_id
                )));
            }
            if item.unit_price < Decimal::ZERO {
                return Err(CoreError::invalid_input(format!(
                    "item {} has a negative price",
                    item.product_id
                )));
            }
        }
        Ok(())
    }

    /// Exact order total.
    pub fn total(&self) -> Decimal {
        self.items.iter().map(OrderItem::line_total).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn laptop_and_mice() -> Vec<OrderItem> {
        vec![
            OrderItem {
                product_id: "P-001".into(),
                name: "Laptop".into(),
                quantity: 1,
                unit_price: Decimal::from_str("999.99").unwrap(),
            },
            OrderItem {
                product_id: "P-002".into(),
                name: "Mouse".into(),
                quantity: 2,
                unit_price: Decimal::from_str("29.99").unwrap(),
            },
        ]
    }

    fn new_order(items: Vec<OrderItem>) -> NewOrder {
        NewOrder {
            user_id: Uuid::new_v4().to_string(),
            items,
            shipping_address: Some("1 Main St".into()),
            payment_method: Some("CREDIT_CARD".into()),
        }
    }

    #[test]
    fn total_is_exact() {
        let order = new_order(laptop_and_mice());
        assert_eq!(order.total(), Decimal::from_str("1059.97").unwrap());
    }

    #[test]
    fn empty_items_are_rejected() {
        let order = new_order(vec![]);
        assert!(matches!(
            order.validate(),
            Err(CoreError::InvalidInput { .. })
        ));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut items = laptop_and_mice();
        items[0].quantity = 0;
        assert!(new_order(items).validate().is_err());
    }

    #[test]
    fn negative_price_is_rejected() {
        let mut items = laptop_and_mice();
        items[1].unit_price = Decimal::from_str("-0.01").unwrap();
        assert!(new_order(items).validate().is_err());
    }

    #[test]
    fn zero_price_is_allowed() {
        let mut items = laptop_and_mice();
        items[1].unit_price = Decimal::ZERO;
        assert!(new_order(items).validate().is_ok());
    }

    #[test]
    fn malformed_user_id_is_rejected() {
        let mut order = new_order(laptop_and_mice());
        order.user_id = "not-a-uuid".into();
        assert!(order.validate().is_err());
    }

    #[test]
    fn status_round_trips_through_names() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::Failed,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(OrderStatus::parse("SIDEWAYS").is_err());
    }

    #[test]
    fn transition_table_matches_the_contract() {
        use OrderStatus::*;

        let allowed = [
            (Pending, Confirmed),
            (Pending, Cancelled),
            (Confirmed, Processing),
            (Confirmed, Cancelled),
            (Processing, Shipped),
            (Processing, Cancelled),
            (Processing, Failed),
            (Shipped, Delivered),
            (Failed, Processing),
        ];
        for (from, to) in allowed {
            assert!(from.can_transition_to(to), "{from:?} -> {to:?}");
        }

        // Terminal states are sinks (apart from the same-status no-op).
        for next in [Pending, Confirmed, Processing, Shipped, Cancelled, Failed] {
            assert!(!Delivered.can_transition_to(next));
        }
        for next in [Pending, Confirmed, Processing, Shipped, Delivered, Failed] {
            assert!(!Cancelled.can_transition_to(next));
        }

        // A few disallowed forward jumps.
        assert!(!Pending.can_transition_to(Shipped));
        assert!(!Confirmed.can_transition_to(Delivered));
        assert!(!Shipped.can_transition_to(Cancelled));

        // Same-status updates are permitted everywhere.
        for status in [Pending, Confirmed, Processing, Shipped, Delivered, Cancelled, Failed] {
            assert!(status.can_transition_to(status));
        }
    }

    proptest! {
        // Random walks over the transition table: terminal states are
        // sinks, and the only re-enterable states are the
        // PROCESSING <-> FAILED retry pair.
        #[test]
        fn random_walks_respect_the_table(choices in proptest::collection::vec(0usize..4, 1..20)) {
            use OrderStatus::*;

            let mut visited = vec![Pending];
            let mut current = Pending;

            for choice in choices {
                let nexts: Vec<OrderStatus> = [Confirmed, Processing, Shipped, Delivered, Cancelled, Failed]
                    .into_iter()
                    .filter(|n| *n != current && current.can_transition_to(*n))
                    .collect();
                if nexts.is_empty() {
                    prop_assert!(current.is_terminal(), "stuck in non-terminal {current:?}");
                    break;
                }
                prop_assert!(!current.is_terminal(), "left terminal {current:?}");

                current = nexts[choice % nexts.len()];
                if !matches!(current, Processing | Failed) {
                    prop_assert!(!visited.contains(&current), "revisited {current:?}");
                }
                visited.push(current);
            }
        }

        // Totals are exact sums for arbitrary carts.
        #[test]
        fn totals_are_exact_sums(
            quantities in proptest::collection::vec(1u32..50, 1..8),
            cents in proptest::collection::vec(0i64..1_000_000, 1..8),
        ) {
            let n = quantities.len().min(cents.len());
            let items: Vec<OrderItem> = (0..n)
                .map(|i| OrderItem {
                    product_id: format!("P-{i}"),
                    name: format!("Item {i}"),
                    quantity: quantities[i],
                    unit_price: Decimal::new(cents[i], 2),
                })
                .collect();

            let expected: Decimal = (0..n)
                .map(|i| Decimal::new(cents[i], 2) * Decimal::from(quantities[i]))
                .sum();
            let order = new_order(items);
            prop_assert_eq!(order.total(), expected);
        }
    }
}
