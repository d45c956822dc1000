//! Identity server assembly.
//!
//! Wires the store, the token codec, the principal resolver, the validation
//! cache, and the interceptor chain into a servable tonic router.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;

use meridian_common::auth::server::{AuthStage, CorrelationStage, MethodGate, MethodPolicy};
use meridian_common::auth::{PrincipalResolver, TokenCodec};
use meridian_common::cache::{MemoryCacheStore, ValidationCache};
use meridian_common::clock::SharedClock;
use meridian_common::config::{CacheTtlConfig, ConfigError, JwtConfig, SecurityConfig};
use meridian_common::error::CoreError;
use meridian_proto::identity::v1::identity_service_server::IdentityServiceServer;
use meridian_proto::methods;

use crate::directory::{LocalDirectory, UserStore};
use crate::service::IdentityService;

/// Everything the identity server needs at startup.
#[derive(Debug, Clone)]
pub struct IdentityServerConfig {
    /// Token settings.
    pub jwt: JwtConfig,
    /// Server/client security posture.
    pub security: SecurityConfig,
    /// Validation-cache TTLs.
    pub cache: CacheTtlConfig,
}

/// A fully wired identity server, ready to serve.
pub struct IdentityServer {
    store: Arc<UserStore>,
    codec: Arc<TokenCodec>,
    auth_stage: AuthStage,
    service: IdentityService,
}

impl IdentityServer {
    /// Wire the server.
    pub fn new(config: IdentityServerConfig, clock: SharedClock) -> Result<Self, ConfigError> {
        let codec = Arc::new(TokenCodec::new(&config.jwt, clock.clone())?);
        let store = Arc::new(UserStore::new(clock.clone()));
        let resolver = Arc::new(PrincipalResolver::new(
            Arc::new(LocalDirectory::new(store.clone())),
            clock.clone(),
        ));
        let cache = Arc::new(ValidationCache::new(
            Arc::new(MemoryCacheStore::new(clock)),
            config.cache,
        ));

        let gate = Arc::new(
            MethodGate::new(
                config.security.server_mode,
                config.security.excluded_methods.clone(),
                resolver,
            )
            .with_policy(methods::CREATE_USER, MethodPolicy::Public)
            .with_policy(methods::IDENTITY_HEALTH_CHECK, MethodPolicy::Public),
        );

        let auth_stage = AuthStage::new(config.security.server_mode, codec.clone());
        let service = IdentityService::new(store.clone(), gate, cache);

        Ok(Self {
            store,
            codec,
            auth_stage,
            service,
        })
    }

    /// The user store, for seeding and tests.
    pub fn store(&self) -> Arc<UserStore> {
        self.store.clone()
    }

    /// The token codec, for issuing tokens at the trust boundary (login
    /// flows, peer services, tests).
    pub fn codec(&self) -> Arc<TokenCodec> {
        self.codec.clone()
    }

    /// Bind and serve until the process ends.
    pub async fn serve(self, addr: SocketAddr) -> Result<(), CoreError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| CoreError::unexpected("identity-bind", e.to_string()))?;
        self.serve_on(listener).await
    }

    /// Serve on an already-bound listener; tests use this to get an
    /// ephemeral port.
    pub async fn serve_on(self, listener: TcpListener) -> Result<(), CoreError> {
        info!(addr = ?listener.local_addr().ok(), "identity service listening");
        Server::builder()
            .layer(tonic::service::interceptor(CorrelationStage))
            .layer(tonic::service::interceptor(self.auth_stage))
            .add_service(IdentityServiceServer::new(self.service))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .map_err(|e| CoreError::unexpected("identity-serve", e.to_string()))
    }
}
