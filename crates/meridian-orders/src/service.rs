//! Order RPC surface.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use tonic::{Request, Response, Status};
use tracing::info;

use meridian_common::auth::principal::roles;
use meridian_common::auth::server::MethodGate;
use meridian_common::error::CoreError;
use meridian_proto::methods;
use meridian_proto::orders::v1::order_service_server;
use meridian_proto::orders::v1::{
    CreateOrderRequest, GetOrderRequest, HealthCheckRequest, HealthCheckResponse,
    ListUserOrdersRequest, ListUserOrdersResponse, OrderResponse, UpdateOrderStatusRequest,
};

use crate::order::{NewOrder, Order, OrderItem, OrderStatus};
use crate::saga::CreateOrderSaga;
use crate::store::OrderStore;

/// Page size used when the request leaves it unset.
const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page a caller may request.
const MAX_PAGE_SIZE: u32 = 100;

/// The order service implementation.
pub struct OrderService {
    store: Arc<OrderStore>,
    gate: Arc<MethodGate>,
    saga: CreateOrderSaga,
}

impl OrderService {
    /// Assemble the service.
    pub fn new(store: Arc<OrderStore>, gate: Arc<MethodGate>, saga: CreateOrderSaga) -> Self {
        Self { store, gate, saga }
    }

    fn parse_items(
        items: &[meridian_proto::orders::v1::OrderItem],
    ) -> Result<Vec<OrderItem>, CoreError> {
        items
            .iter()
            .map(|item| {
                let unit_price = Decimal::from_str(&item.unit_price).map_err(|_| {
                    CoreError::invalid_input(format!(
                        "item {} has an unparseable price",
                        item.product_id
                    ))
                })?;
                Ok(OrderItem {
                    product_id: item.product_id.clone(),
                    name: item.name.clone(),
                    quantity: item.quantity,
                    unit_price,
                })
            })
            .collect()
    }

    fn response_of(order: &Order) -> OrderResponse {
        OrderResponse {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            status: order.status.as_str().to_string(),
            saga_state: order.saga_state.as_str().to_string(),
            total_amount: order.total_amount.to_string(),
            items: order
                .items
                .iter()
                .map(|item| meridian_proto::orders::v1::OrderItem {
                    product_id: item.product_id.clone(),
                    name: item.name.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price.to_string(),
                })
                .collect(),
            shipping_address: order.shipping_address.clone().unwrap_or_default(),
            payment_method: order.payment_method.clone().unwrap_or_default(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

#[tonic::async_trait]
impl order_service_server::OrderService for OrderService {
    async fn create_order(
        &self,
        request: Request<CreateOrderRequest>,
    ) -> Result<Response<OrderResponse>, Status> {
        let context = self.gate.authorize(methods::CREATE_ORDER, &request).await?;
        let request = request.into_inner();

        info!(
            correlation_id = %context.correlation_id,
            user_id = %request.user_id,
            items = request.items.len(),
            "create order requested"
        );

        let items = Self::parse_items(&request.items).map_err(|e| context.fail(e))?;
        let input = NewOrder {
            user_id: request.user_id,
            items,
            shipping_address: (!request.shipping_address.is_empty())
                .then_some(request.shipping_address),
            payment_method: (!request.payment_method.is_empty()).then_some(request.payment_method),
        };

        let order = self
            .saga
            .run(input, &context)
            .await
            .map_err(|e| context.fail(e))?;
        Ok(context.reply(Self::response_of(&order)))
    }

    async fn get_order(
        &self,
        request: Request<GetOrderRequest>,
    ) -> Result<Response<OrderResponse>, Status> {
        let context = self.gate.authorize(methods::GET_ORDER, &request).await?;
        let request = request.into_inner();

        let order = self
            .store
            .get(&request.order_id)
            .ok_or_else(|| context.fail(CoreError::NotFound { entity: "order" }))?;

        // Orders that exist but belong to someone else are indistinguishable
        // from absent ones.
        if let Some(principal) = &context.principal {
            if order.user_id != principal.user_id && !principal.has_authority(roles::ADMIN) {
                return Err(context.fail(CoreError::NotFound { entity: "order" }));
            }
        }

        Ok(context.reply(Self::response_of(&order)))
    }

    async fn list_user_orders(
        &self,
        request: Request<ListUserOrdersRequest>,
    ) -> Result<Response<ListUserOrdersResponse>, Status> {
        let context = self
            .gate
            .authorize(methods::LIST_USER_ORDERS, &request)
            .await?;
        let request = request.into_inner();

        let page_size = match request.page_size {
            0 => DEFAULT_PAGE_SIZE,
            n => n.min(MAX_PAGE_SIZE),
        };
        let page = self.store.list_by_user(
            &request.user_id,
            page_size as usize,
            request.page_number as usize,
        );

        let total_pages = (page.total_items as u32).div_ceil(page_size);
        Ok(context.reply(ListUserOrdersResponse {
            orders: page.orders.iter().map(Self::response_of).collect(),
            total_pages,
            total_items: page.total_items,
            current_page: request.page_number,
        }))
    }

    async fn update_order_status(
        &self,
        request: Request<UpdateOrderStatusRequest>,
    ) -> Result<Response<OrderResponse>, Status> {
        let context = self
            .gate
            .authorize(methods::UPDATE_ORDER_STATUS, &request)
            .await?;
        let request = request.into_inner();

        let next = OrderStatus::parse(&request.status).map_err(|e| context.fail(e))?;
        let mut order = self
            .store
            .get(&request.order_id)
            .ok_or_else(|| context.fail(CoreError::NotFound { entity: "order" }))?;

        if !order.status.can_transition_to(next) {
            return Err(context.fail(CoreError::InvalidTransition {
                from: order.status.as_str().to_string(),
                to: next.as_str().to_string(),
            }));
        }

        order.status = next;
        let order = self.store.update(order).map_err(|e| context.fail(e))?;

        info!(
            correlation_id = %context.correlation_id,
            order_id = %order.order_id,
            status = order.status.as_str(),
            "order status updated"
        );
        Ok(context.reply(Self::response_of(&order)))
    }

    async fn health_check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let context = self
            .gate
            .authorize(methods::ORDERS_HEALTH_CHECK, &request)
            .await?;
        Ok(context.reply(HealthCheckResponse {
            status: "SERVING".to_string(),
            message: "order service is healthy".to_string(),
        }))
    }
}
