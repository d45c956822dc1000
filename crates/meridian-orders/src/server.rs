//! Order server assembly.
//!
//! Wires the order store, the identity gateway (shared channel + resilience
//! stack), the saga, and the interceptor chain into a servable tonic router.
//! The gateway doubles as the remote user directory behind principal
//! resolution.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;

use meridian_common::auth::server::{AuthStage, CorrelationStage, MethodGate, MethodPolicy};
use meridian_common::auth::{PrincipalResolver, RequestAuth, TokenCodec};
use meridian_common::clock::SharedClock;
use meridian_common::config::{JwtConfig, SecurityConfig};
use meridian_common::error::CoreError;
use meridian_proto::methods;
use meridian_proto::orders::v1::order_service_server::OrderServiceServer;

use crate::identity::{IdentityGateway, IdentityGatewayConfig};
use crate::saga::CreateOrderSaga;
use crate::service::OrderService;
use crate::store::OrderStore;

/// Everything the order server needs at startup.
#[derive(Debug, Clone)]
pub struct OrdersServerConfig {
    /// Token settings; must agree with the identity service.
    pub jwt: JwtConfig,
    /// Server/client security posture.
    pub security: SecurityConfig,
    /// Identity-peer transport and resilience settings.
    pub identity: IdentityGatewayConfig,
}

/// A fully wired order server, ready to serve.
pub struct OrdersServer {
    store: Arc<OrderStore>,
    gateway: Arc<IdentityGateway>,
    auth_stage: AuthStage,
    service: OrderService,
}

impl OrdersServer {
    /// Wire the server.
    pub fn new(config: OrdersServerConfig, clock: SharedClock) -> Result<Self, CoreError> {
        let codec = Arc::new(
            TokenCodec::new(&config.jwt, clock.clone())
                .map_err(|e| CoreError::unexpected("orders-config", e.to_string()))?,
        );
        let request_auth = Arc::new(RequestAuth::new(
            config.security.client_mode,
            codec.clone(),
            config.jwt.expiration,
            clock.clone(),
        ));
        let gateway = Arc::new(IdentityGateway::connect(
            config.identity.clone(),
            request_auth,
            clock.clone(),
        )?);

        let store = Arc::new(OrderStore::new(clock.clone()));
        let resolver = Arc::new(PrincipalResolver::new(gateway.clone(), clock));
        let gate = Arc::new(
            MethodGate::new(
                config.security.server_mode,
                config.security.excluded_methods.clone(),
                resolver,
            )
            .with_policy(methods::ORDERS_HEALTH_CHECK, MethodPolicy::Public),
        );

        let saga = CreateOrderSaga::new(store.clone(), gateway.clone());
        let auth_stage = AuthStage::new(config.security.server_mode, codec);
        let service = OrderService::new(store.clone(), gate, saga);

        Ok(Self {
            store,
            gateway,
            auth_stage,
            service,
        })
    }

    /// The order store, for tests and recovery tooling.
    pub fn store(&self) -> Arc<OrderStore> {
        self.store.clone()
    }

    /// The identity gateway, for observing or tripping its breaker.
    pub fn gateway(&self) -> Arc<IdentityGateway> {
        self.gateway.clone()
    }

    /// Bind and serve until the process ends.
    pub async fn serve(self, addr: SocketAddr) -> Result<(), CoreError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CoreError::unexpected("orders-bind", e.to_string()))?;
        self.serve_on(listener).await
    }

    /// Serve on an already-bound listener; tests use this to get an
    /// ephemeral port.
    pub async fn serve_on(self, listener: TcpListener) -> Result<(), CoreError> {
        info!(addr = ?listener.local_addr().ok(), "order service listening");
        Server::builder()
            .layer(tonic::service::interceptor(CorrelationStage))
            .layer(tonic::service::interceptor(self.auth_stage))
            .add_service(OrderServiceServer::new(self.service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .map_err(|e| CoreError::unexpected("orders-serve", e.to_string()))
    }
}
