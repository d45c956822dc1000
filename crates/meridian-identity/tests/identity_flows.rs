//! End-to-end flows against a real identity server on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::net::TcpListener;
use tonic::transport::Endpoint;
use tonic::{Code, Request};

use meridian_common::auth::principal::{roles, AccountStatus};
use meridian_common::auth::{Principal, TokenCodec};
use meridian_common::clock::ManualClock;
use meridian_common::config::{CacheTtlConfig, JwtConfig, SecurityConfig};
use meridian_identity::{IdentityServer, IdentityServerConfig, UserStore};
use meridian_proto::identity::v1::identity_service_client::IdentityServiceClient;
use meridian_proto::identity::v1::{
    CreateUserRequest, GetUserRequest, UpdateUserProfileRequest, ValidateUserRequest,
};
use meridian_proto::metadata;

struct Harness {
    addr: SocketAddr,
    store: Arc<UserStore>,
    codec: Arc<TokenCodec>,
    clock: Arc<ManualClock>,
}

impl Harness {
    async fn start() -> Self {
        let clock = ManualClock::at(1_700_000_000_000);
        let config = IdentityServerConfig {
            jwt: JwtConfig::new(BASE64.encode([11u8; 64])),
            security: SecurityConfig::default(),
            cache: CacheTtlConfig::default(),
        };
        let server = IdentityServer::new(config, clock.clone()).expect("server wiring");
        let store = server.store();
        let codec = server.codec();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(server.serve_on(listener));

        Self {
            addr,
            store,
            codec,
            clock,
        }
    }

    fn client(&self) -> IdentityServiceClient<tonic::transport::Channel> {
        let channel = Endpoint::from_shared(format!("http://{}", self.addr))
            .expect("endpoint")
            .connect_lazy();
        IdentityServiceClient::new(channel)
    }

    fn token_for(&self, user_id: &str, username: &str, ttl: Duration) -> String {
        let principal = Principal {
            user_id: user_id.to_string(),
            username: username.to_string(),
            authorities: vec![roles::USER.to_string()],
            account_status: AccountStatus::Active,
        };
        self.codec.issue(&principal, ttl).expect("issue token")
    }

    async fn create_alice(&self) -> String {
        let response = self
            .client()
            .create_user(alice_request())
            .await
            .expect("create alice")
            .into_inner();
        response.user_id
    }
}

fn alice_request() -> CreateUserRequest {
    CreateUserRequest {
        username: "alice".into(),
        email: "alice@example.com".into(),
        password: "Alice@123".into(),
        first_name: "Alice".into(),
        last_name: "Johnson".into(),
        phone: String::new(),
    }
}

fn with_token<T>(message: T, token: &str) -> Request<T> {
    let mut request = Request::new(message);
    request.metadata_mut().insert(
        metadata::AUTHORIZATION,
        format!("Bearer {token}").parse().unwrap(),
    );
    request
}

#[tokio::test]
async fn create_user_happy_path_then_duplicate() {
    let harness = Harness::start().await;
    let mut client = harness.client();

    let response = client
        .create_user(alice_request())
        .await
        .expect("first create succeeds")
        .into_inner();

    assert!(!response.user_id.is_empty());
    let profile = response.profile.expect("profile returned");
    assert_eq!(profile.username, "alice");
    assert!(profile.is_active);
    assert!(!profile.is_email_verified);

    let err = client
        .create_user(alice_request())
        .await
        .expect_err("duplicate rejected");
    assert_eq!(err.code(), Code::AlreadyExists);
}

#[tokio::test]
async fn create_user_validation_boundaries() {
    let harness = Harness::start().await;
    let mut client = harness.client();

    // Password of exactly 8 characters is accepted.
    let mut ok = alice_request();
    ok.username = "bob".into();
    ok.email = "bob@example.com".into();
    ok.password = "12345678".into();
    assert!(client.create_user(ok).await.is_ok());

    // Seven characters is not.
    let mut short = alice_request();
    short.username = "carol".into();
    short.email = "carol@example.com".into();
    short.password = "1234567".into();
    let err = client.create_user(short).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    // Email must contain an @.
    let mut bad_email = alice_request();
    bad_email.username = "dave".into();
    bad_email.email = "dave.example.com".into();
    let err = client.create_user(bad_email).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    // Username must be non-empty.
    let mut no_name = alice_request();
    no_name.username = "   ".into();
    no_name.email = "nobody@example.com".into();
    let err = client.create_user(no_name).await.unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn authenticated_get_user_until_the_token_expires() {
    let harness = Harness::start().await;
    let mut client = harness.client();
    let alice_id = harness.create_alice().await;

    let token = harness.token_for(&alice_id, "alice", Duration::from_secs(60));

    let profile = client
        .get_user(with_token(
            GetUserRequest {
                user_id: alice_id.clone(),
            },
            &token,
        ))
        .await
        .expect("valid token accepted")
        .into_inner();
    assert_eq!(profile.username, "alice");

    // 61 simulated seconds later the same token is expired.
    harness.clock.advance(Duration::from_secs(61));
    let err = client
        .get_user(with_token(GetUserRequest { user_id: alice_id }, &token))
        .await
        .expect_err("expired token rejected");
    assert_eq!(err.code(), Code::Unauthenticated);
    assert!(err.message().contains("expired"));
    // The failing response still names the request in its trailers.
    assert!(err.metadata().get(metadata::CORRELATION_ID).is_some());
}

#[tokio::test]
async fn missing_token_is_rejected_and_correlation_id_is_echoed() {
    let harness = Harness::start().await;
    let mut client = harness.client();
    let alice_id = harness.create_alice().await;

    let mut request = Request::new(GetUserRequest {
        user_id: alice_id.clone(),
    });
    request
        .metadata_mut()
        .insert(metadata::CORRELATION_ID, "trace-me-42".parse().unwrap());

    let err = client.get_user(request).await.unwrap_err();
    assert_eq!(err.code(), Code::Unauthenticated);
    assert_eq!(err.message(), "missing token");
    assert_eq!(
        err.metadata()
            .get(metadata::CORRELATION_ID)
            .and_then(|v| v.to_str().ok()),
        Some("trace-me-42")
    );
}

#[tokio::test]
async fn correlation_id_is_echoed_on_success() {
    let harness = Harness::start().await;
    let mut client = harness.client();

    let mut request = Request::new(alice_request());
    request
        .metadata_mut()
        .insert(metadata::CORRELATION_ID, "cid-success".parse().unwrap());

    let response = client.create_user(request).await.expect("created");
    assert_eq!(
        response
            .metadata()
            .get(metadata::CORRELATION_ID)
            .and_then(|v| v.to_str().ok()),
        Some("cid-success")
    );
}

#[tokio::test]
async fn profile_updates_require_ownership_or_admin() {
    let harness = Harness::start().await;
    let mut client = harness.client();
    let alice_id = harness.create_alice().await;

    let mut mallory = alice_request();
    mallory.username = "mallory".into();
    mallory.email = "mallory@example.com".into();
    let mallory_id = client
        .create_user(mallory)
        .await
        .unwrap()
        .into_inner()
        .user_id;

    let update = UpdateUserProfileRequest {
        user_id: alice_id.clone(),
        first_name: Some("Eve".into()),
        last_name: None,
        phone: None,
    };

    // Another ordinary user may not touch alice's profile.
    let token = harness.token_for(&mallory_id, "mallory", Duration::from_secs(60));
    let err = client
        .update_user_profile(with_token(update.clone(), &token))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::PermissionDenied);

    // Alice may.
    let token = harness.token_for(&alice_id, "alice", Duration::from_secs(60));
    let profile = client
        .update_user_profile(with_token(update, &token))
        .await
        .expect("self-update allowed")
        .into_inner();
    assert_eq!(profile.first_name, "Eve");
    // Untouched fields stay as they were.
    assert_eq!(profile.last_name, "Johnson");
}

#[tokio::test]
async fn validate_user_reflects_verification_state() {
    let harness = Harness::start().await;
    let mut client = harness.client();
    let alice_id = harness.create_alice().await;
    let token = harness.token_for(&alice_id, "alice", Duration::from_secs(60));

    // Freshly created accounts are not email-verified: not eligible. The
    // creation path primed the cache with that answer.
    let response = client
        .validate_user(with_token(
            ValidateUserRequest {
                user_id: alice_id.clone(),
            },
            &token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(!response.valid);

    // Verify the email behind the cache's back; the warm entry keeps
    // answering until it expires.
    let mut record = harness.store.get(&alice_id).unwrap();
    record.is_email_verified = true;
    harness.store.update(record).unwrap();

    let response = client
        .validate_user(with_token(
            ValidateUserRequest {
                user_id: alice_id.clone(),
            },
            &token,
        ))
        .await
        .unwrap()
        .into_inner();
    assert!(!response.valid, "stale cached answer is expected within ttl");

    // Past the post-create TTL the authoritative lookup runs again. The
    // token would have expired long ago, so mint a fresh one.
    harness.clock.advance(Duration::from_secs(24 * 60 * 60 + 1));
    let fresh = harness.token_for(&alice_id, "alice", Duration::from_secs(60));
    let response = client
        .validate_user(with_token(ValidateUserRequest { user_id: alice_id }, &fresh))
        .await
        .unwrap()
        .into_inner();
    assert!(response.valid);
}

#[tokio::test]
async fn get_user_for_unknown_id_is_not_found() {
    let harness = Harness::start().await;
    let mut client = harness.client();
    let alice_id = harness.create_alice().await;
    let token = harness.token_for(&alice_id, "alice", Duration::from_secs(60));

    let err = client
        .get_user(with_token(
            GetUserRequest {
                user_id: "no-such-user".into(),
            },
            &token,
        ))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test]
async fn health_check_is_public() {
    let harness = Harness::start().await;
    let mut client = harness.client();

    let response = client
        .health_check(meridian_proto::identity::v1::HealthCheckRequest {})
        .await
        .expect("no token required")
        .into_inner();
    assert_eq!(response.status, "SERVING");
}
