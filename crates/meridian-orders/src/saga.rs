//! Order-creation saga.
//!
//! A short, in-process state machine run once per create request:
//!
//! ```text
//! NOT_STARTED ──begin──▶ IN_PROGRESS ──validate_ok──▶ USER_VALIDATED ──confirm──▶ COMPLETED
//!                             │
//!                             └──validate_fail──▶ COMPENSATING ──cancel_ok──▶ FAILED
//! ```
//!
//! Transitions are data on the persisted order, and every transition is
//! saved before the next step runs, so a crash mid-saga leaves a record a
//! recovery pass can classify. Compensation is a forward path of the same
//! machine, not exception unwinding. Version conflicts on any save
//! propagate; the saga never retries them.

use std::sync::Arc;

use tracing::{error, info, warn};

use meridian_common::auth::server::CallContext;
use meridian_common::error::CoreError;

use crate::order::{NewOrder, Order, OrderStatus, SagaState};
use crate::store::OrderStore;

/// The identity-service question the saga asks.
#[tonic::async_trait]
pub trait UserValidator: Send + Sync {
    /// Whether the user may place orders right now.
    async fn validate(&self, user_id: &str, context: &CallContext) -> Result<bool, CoreError>;
}

/// Saga executor for order creation.
pub struct CreateOrderSaga {
    store: Arc<OrderStore>,
    validator: Arc<dyn UserValidator>,
}

impl CreateOrderSaga {
    /// Build the executor.
    pub fn new(store: Arc<OrderStore>, validator: Arc<dyn UserValidator>) -> Self {
        Self { store, validator }
    }

    /// Run the saga for one create request.
    ///
    /// Input validation happens before anything is persisted. On a negative
    /// validation or an unreachable identity service the order is
    /// compensated into `CANCELLED`/`FAILED` and the causing error is
    /// returned for status classification.
    pub async fn run(&self, input: NewOrder, context: &CallContext) -> Result<Order, CoreError> {
        input.validate()?;

        let order = self.store.insert(input);
        info!(
            correlation_id = %context.correlation_id,
            order_id = %order.order_id,
            user_id = %order.user_id,
            total = %order.total_amount,
            "order persisted, starting saga"
        );

        let order = self.transition(order, None, SagaState::InProgress)?;

        match self.validator.validate(&order.user_id, context).await {
            Ok(true) => {
                let order = self.transition(order, None, SagaState::UserValidated)?;
                let order =
                    self.transition(order, Some(OrderStatus::Confirmed), SagaState::Completed)?;
                info!(
                    correlation_id = %context.correlation_id,
                    order_id = %order.order_id,
                    "order confirmed"
                );
                Ok(order)
            }
            Ok(false) => {
                warn!(
                    correlation_id = %context.correlation_id,
                    order_id = %order.order_id,
                    user_id = %order.user_id,
                    "user not eligible, compensating"
                );
                let user_id = order.user_id.clone();
                self.compensate(order)?;
                Err(CoreError::UserNotEligible { user_id })
            }
            Err(cause) => {
                warn!(
                    correlation_id = %context.correlation_id,
                    order_id = %order.order_id,
                    error = %cause,
                    "user validation unavailable, compensating"
                );
                self.compensate(order)?;
                Err(cause)
            }
        }
    }

    /// Persist one transition before the next step may run.
    fn transition(
        &self,
        mut order: Order,
        status: Option<OrderStatus>,
        saga_state: SagaState,
    ) -> Result<Order, CoreError> {
        if let Some(status) = status {
            order.status = status;
        }
        order.saga_state = saga_state;
        self.store.update(order)
    }

    /// Forward path into the failed terminal: COMPENSATING, then
    /// CANCELLED/FAILED.
    fn compensate(&self, order: Order) -> Result<Order, CoreError> {
        let order_id = order.order_id.clone();
        let order = self
            .transition(order, None, SagaState::Compensating)
            .inspect_err(|e| {
                error!(order_id = %order_id, error = %e, "compensation could not be persisted");
            })?;
        let order = self
            .transition(order, Some(OrderStatus::Cancelled), SagaState::Failed)
            .inspect_err(|e| {
                error!(order_id = %order_id, error = %e, "compensation could not be persisted");
            })?;
        info!(order_id = %order_id, "order compensated");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderItem;
    use meridian_common::clock::ManualClock;
    use rust_decimal::Decimal;
    use std::str::FromStr;
    use uuid::Uuid;

    enum Answer {
        Eligible,
        Ineligible,
        Unavailable,
        CircuitOpen,
        TimedOut,
    }

    struct StubValidator(Answer);

    #[tonic::async_trait]
    impl UserValidator for StubValidator {
        async fn validate(&self, _user_id: &str, _context: &CallContext) -> Result<bool, CoreError> {
            match self.0 {
                Answer::Eligible => Ok(true),
                Answer::Ineligible => Ok(false),
                Answer::Unavailable => Err(CoreError::RemoteUnavailable {
                    peer: "identity".into(),
                    message: "connect refused".into(),
                }),
                Answer::CircuitOpen => Err(CoreError::CircuitOpen {
                    peer: "identity".into(),
                }),
                Answer::TimedOut => Err(CoreError::RemoteDeadline {
                    peer: "identity".into(),
                }),
            }
        }
    }

    fn saga_with(answer: Answer) -> (Arc<OrderStore>, CreateOrderSaga) {
        let store = Arc::new(OrderStore::new(ManualClock::at(0)));
        let saga = CreateOrderSaga::new(store.clone(), Arc::new(StubValidator(answer)));
        (store, saga)
    }

    fn order_input() -> NewOrder {
        NewOrder {
            user_id: Uuid::new_v4().to_string(),
            items: vec![OrderItem {
                product_id: "P-001".into(),
                name: "Laptop".into(),
                quantity: 1,
                unit_price: Decimal::from_str("999.99").unwrap(),
            }],
            shipping_address: Some("1 Main St".into()),
            payment_method: Some("CREDIT_CARD".into()),
        }
    }

    #[tokio::test]
    async fn happy_path_confirms_the_order() {
        let (store, saga) = saga_with(Answer::Eligible);
        let order = saga
            .run(order_input(), &CallContext::background())
            .await
            .unwrap();

        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.saga_state, SagaState::Completed);

        // Three persisted transitions after the insert.
        let stored = store.get(&order.order_id).unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(stored.status, OrderStatus::Confirmed);
        assert_eq!(stored.saga_state, SagaState::Completed);
    }

    #[tokio::test]
    async fn invalid_input_persists_nothing() {
        let (store, saga) = saga_with(Answer::Eligible);
        let mut input = order_input();
        input.items.clear();

        let err = saga
            .run(input, &CallContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput { .. }));
        assert_eq!(store.list_by_user("any", 10, 0).total_items, 0);
    }

    #[tokio::test]
    async fn ineligible_user_compensates_into_a_cancelled_order() {
        let (store, saga) = saga_with(Answer::Ineligible);
        let input = order_input();
        let user_id = input.user_id.clone();

        let err = saga
            .run(input, &CallContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UserNotEligible { .. }));

        let page = store.list_by_user(&user_id, 10, 0);
        assert_eq!(page.total_items, 1);
        let stored = &page.orders[0];
        assert_eq!(stored.status, OrderStatus::Cancelled);
        assert_eq!(stored.saga_state, SagaState::Failed);
    }

    #[tokio::test]
    async fn unreachable_identity_service_compensates_and_reports_the_cause() {
        for (answer, check) in [
            (
                Answer::Unavailable,
                (|e: &CoreError| matches!(e, CoreError::RemoteUnavailable { .. }))
                    as fn(&CoreError) -> bool,
            ),
            (Answer::CircuitOpen, |e| {
                matches!(e, CoreError::CircuitOpen { .. })
            }),
            (Answer::TimedOut, |e| {
                matches!(e, CoreError::RemoteDeadline { .. })
            }),
        ] {
            let (store, saga) = saga_with(answer);
            let input = order_input();
            let user_id = input.user_id.clone();

            let err = saga
                .run(input, &CallContext::background())
                .await
                .unwrap_err();
            assert!(check(&err), "unexpected cause: {err}");

            let page = store.list_by_user(&user_id, 10, 0);
            assert_eq!(page.orders[0].status, OrderStatus::Cancelled);
            assert_eq!(page.orders[0].saga_state, SagaState::Failed);
        }
    }

    #[tokio::test]
    async fn every_step_is_persisted_before_the_next() {
        // The validator observes the persisted state mid-saga: the begin
        // transition must already be durable when validation runs.
        struct Observing {
            store: Arc<OrderStore>,
            user_id: String,
        }

        #[tonic::async_trait]
        impl UserValidator for Observing {
            async fn validate(
                &self,
                _user_id: &str,
                _context: &CallContext,
            ) -> Result<bool, CoreError> {
                let page = self.store.list_by_user(&self.user_id, 10, 0);
                assert_eq!(page.orders[0].saga_state, SagaState::InProgress);
                assert_eq!(page.orders[0].status, OrderStatus::Pending);
                Ok(true)
            }
        }

        let store = Arc::new(OrderStore::new(ManualClock::at(0)));
        let input = order_input();
        let saga = CreateOrderSaga::new(
            store.clone(),
            Arc::new(Observing {
                store: store.clone(),
                user_id: input.user_id.clone(),
            }),
        );

        let order = saga
            .run(input, &CallContext::background())
            .await
            .unwrap();
        assert_eq!(order.saga_state, SagaState::Completed);
    }
}
