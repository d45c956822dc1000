//! In-process order store.
//!
//! Orders are values owned by the store; callers get clones and write back
//! through optimistic versioning. Listing is newest-first with offset
//! pagination.

use dashmap::DashMap;
use uuid::Uuid;

use meridian_common::clock::SharedClock;
use meridian_common::error::CoreError;

use crate::order::{NewOrder, Order, OrderStatus, SagaState};

/// A page of orders.
#[derive(Debug)]
pub struct OrderPage {
    /// Orders on this page, newest first.
    pub orders: Vec<Order>,
    /// Total orders for the user.
    pub total_items: u64,
}

/// Concurrent in-process order store.
pub struct OrderStore {
    orders: DashMap<String, Order>,
    clock: SharedClock,
}

impl OrderStore {
    /// Build an empty store.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            orders: DashMap::new(),
            clock,
        }
    }

    /// Persist a new order in its initial state (`PENDING`, saga
    /// `NOT_STARTED`) and assign its id.
    pub fn insert(&self, new_order: NewOrder) -> Order {
        let now = self.clock.now_utc();
        let order = Order {
            order_id: Uuid::new_v4().to_string(),
            user_id: new_order.user_id,
            total_amount: new_order.items.iter().map(|i| i.line_total()).sum(),
            items: new_order.items,
            status: OrderStatus::Pending,
            saga_state: SagaState::NotStarted,
            version: 0,
            created_at: now,
            updated_at: now,
            shipping_address: new_order.shipping_address,
            payment_method: new_order.payment_method,
        };
        self.orders.insert(order.order_id.clone(), order.clone());
        order
    }

    /// Fetch by id.
    pub fn get(&self, order_id: &str) -> Option<Order> {
        self.orders.get(order_id).map(|o| o.clone())
    }

    /// Persist a modified order.
    ///
    /// Succeeds only when `order.version` matches the stored version; the
    /// version is then bumped and `updated_at` set.
    pub fn update(&self, mut order: Order) -> Result<Order, CoreError> {
        let mut current = self
            .orders
            .get_mut(&order.order_id)
            .ok_or(CoreError::NotFound { entity: "order" })?;

        if current.version != order.version {
            return Err(CoreError::VersionConflict {
                entity: "order",
                expected: order.version,
                found: current.version,
            });
        }

        order.version += 1;
        order.updated_at = self.clock.now_utc();
        *current = order.clone();
        Ok(order)
    }

    /// Page through a user's orders, newest first. `page_number` is
    /// zero-based.
    pub fn list_by_user(&self, user_id: &str, page_size: usize, page_number: usize) -> OrderPage {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .map(|o| o.clone())
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.order_id.cmp(&a.order_id)));

        let total_items = orders.len() as u64;
        let start = page_size.saturating_mul(page_number);
        let page = orders.into_iter().skip(start).take(page_size).collect();
        OrderPage {
            orders: page,
            total_items,
        }
    }
}
