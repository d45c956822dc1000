//! Typed gateway to the identity service.
//!
//! Owns the long-lived channel and the resilience stack for the identity
//! peer, decorates every outgoing request (correlation id, credentials), and
//! exposes the two questions the order service asks: "may this user order?"
//! (the saga's 2-second validation call) and "who is this username?" (the
//! remote user directory behind principal resolution). Both run through the
//! same breaker and bulkhead because they hit the same callee.

use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Channel;
use tonic::{Code, Request};
use tracing::debug;

use meridian_common::auth::server::CallContext;
use meridian_common::auth::{DirectoryUser, RequestAuth, UserDirectory};
use meridian_common::clock::SharedClock;
use meridian_common::error::CoreError;
use meridian_common::fabric::{
    CallSpec, ChannelSettings, CircuitBreaker, PeerSettings, ResilientPeer,
};
use meridian_proto::identity::v1::identity_service_client::IdentityServiceClient;
use meridian_proto::identity::v1::{GetUserByUsernameRequest, ValidateUserRequest};

use crate::saga::UserValidator;

/// Peer name used in logs and failure classifications.
const PEER: &str = "identity";

/// Deadline for the saga's user-validation call.
pub const VALIDATE_DEADLINE: Duration = Duration::from_secs(2);

/// Gateway settings.
#[derive(Debug, Clone)]
pub struct IdentityGatewayConfig {
    /// Transport settings for the identity peer.
    pub channel: ChannelSettings,
    /// Resilience settings for the identity peer.
    pub peer: PeerSettings,
}

impl IdentityGatewayConfig {
    /// Settings for the given address with default resilience.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            channel: ChannelSettings::new(address),
            peer: PeerSettings::default(),
        }
    }
}

/// Client-side fabric for the identity service.
pub struct IdentityGateway {
    client: IdentityServiceClient<Channel>,
    peer: ResilientPeer,
    auth: Arc<RequestAuth>,
}

impl IdentityGateway {
    /// Build the gateway. The channel connects lazily and reconnects on its
    /// own.
    pub fn connect(
        config: IdentityGatewayConfig,
        auth: Arc<RequestAuth>,
        clock: SharedClock,
    ) -> Result<Self, CoreError> {
        let channel = config.channel.build()?;
        let client = IdentityServiceClient::new(channel)
            .max_decoding_message_size(config.channel.message_limit());
        let peer = ResilientPeer::new(PEER, config.peer, clock);
        Ok(Self { client, peer, auth })
    }

    /// The identity peer's circuit breaker, for observation and tests.
    pub fn breaker(&self) -> &CircuitBreaker {
        self.peer.breaker()
    }
}

#[tonic::async_trait]
impl UserValidator for IdentityGateway {
    async fn validate(&self, user_id: &str, context: &CallContext) -> Result<bool, CoreError> {
        let spec = CallSpec::idempotent("identity.ValidateUser").with_deadline(VALIDATE_DEADLINE);

        self.peer
            .call(spec, || {
                let mut client = self.client.clone();
                let auth = self.auth.clone();
                let message = ValidateUserRequest {
                    user_id: user_id.to_string(),
                };
                async move {
                    let mut request = Request::new(message);
                    // Propagate the deadline so the callee can stop work
                    // the moment it becomes useless.
                    request.set_timeout(VALIDATE_DEADLINE);
                    auth.decorate(&mut request, context).await?;
                    match client.validate_user(request).await {
                        Ok(response) => {
                            let response = response.into_inner();
                            debug!(user_id = %response.user_id, valid = response.valid, "validation answer");
                            Ok(response.valid)
                        }
                        Err(status) => Err(CoreError::from_remote_status(PEER, &status)),
                    }
                }
            })
            .await
    }
}

#[tonic::async_trait]
impl UserDirectory for IdentityGateway {
    async fn lookup(
        &self,
        username: &str,
        context: &CallContext,
    ) -> Result<Option<DirectoryUser>, CoreError> {
        let spec = CallSpec::idempotent("identity.GetUserByUsername");

        self.peer
            .call(spec, || {
                let mut client = self.client.clone();
                let auth = self.auth.clone();
                let message = GetUserByUsernameRequest {
                    username: username.to_string(),
                };
                async move {
                    let mut request = Request::new(message);
                    auth.decorate(&mut request, context).await?;
                    match client.get_user_by_username(request).await {
                        Ok(response) => {
                            let profile = response.into_inner();
                            Ok(Some(DirectoryUser {
                                user_id: profile.user_id,
                                username: profile.username,
                                authorities: profile.authorities,
                                is_active: profile.is_active,
                                is_email_verified: profile.is_email_verified,
                                // Lockout bookkeeping stays inside the
                                // identity service; the profile projection
                                // does not carry it.
                                failed_login_attempts: 0,
                                locked_until: None,
                            }))
                        }
                        Err(status) if status.code() == Code::NotFound => Ok(None),
                        Err(status) => Err(CoreError::from_remote_status(PEER, &status)),
                    }
                }
            })
            .await
    }
}
