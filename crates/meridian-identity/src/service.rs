//! Identity RPC surface.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{info, warn};

use meridian_common::auth::server::{ensure_owner_or_authority, MethodGate};
use meridian_common::auth::principal::roles;
use meridian_common::cache::ValidationCache;
use meridian_common::error::CoreError;
use meridian_proto::identity::v1::identity_service_server;
use meridian_proto::identity::v1::{
    CreateUserRequest, CreateUserResponse, GetUserByUsernameRequest, GetUserRequest,
    HealthCheckRequest, HealthCheckResponse, UpdateUserProfileRequest, UserProfile,
    ValidateUserRequest, ValidateUserResponse,
};
use meridian_proto::methods;

use crate::directory::{NewUser, UserRecord, UserStore};

/// bcrypt cost factor.
const BCRYPT_COST: u32 = 10;

/// The identity service implementation.
pub struct IdentityService {
    store: Arc<UserStore>,
    gate: Arc<MethodGate>,
    cache: Arc<ValidationCache>,
}

impl IdentityService {
    /// Assemble the service.
    pub fn new(store: Arc<UserStore>, gate: Arc<MethodGate>, cache: Arc<ValidationCache>) -> Self {
        Self { store, gate, cache }
    }

    fn validate_create(request: &CreateUserRequest) -> Result<(), CoreError> {
        if request.username.trim().is_empty() {
            return Err(CoreError::invalid_input("username is required"));
        }
        if !request.email.contains('@') {
            return Err(CoreError::invalid_input("a valid email is required"));
        }
        if request.password.len() < 8 {
            return Err(CoreError::invalid_input(
                "password must be at least 8 characters",
            ));
        }
        Ok(())
    }

    fn profile_of(record: &UserRecord) -> UserProfile {
        UserProfile {
            user_id: record.user_id.clone(),
            username: record.username.clone(),
            email: record.email.clone(),
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            phone: record.phone.clone().unwrap_or_default(),
            is_active: record.is_active,
            is_email_verified: record.is_email_verified,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
            authorities: record.authorities.clone(),
        }
    }
}

#[tonic::async_trait]
impl identity_service_server::IdentityService for IdentityService {
    async fn create_user(
        &self,
        request: Request<CreateUserRequest>,
    ) -> Result<Response<CreateUserResponse>, Status> {
        let context = self.gate.authorize(methods::CREATE_USER, &request).await?;
        let request = request.into_inner();

        info!(
            correlation_id = %context.correlation_id,
            username = %request.username,
            "creating user"
        );

        Self::validate_create(&request).map_err(|e| context.fail(e))?;

        let password_hash = bcrypt::hash(&request.password, BCRYPT_COST)
            .map_err(|e| context.fail(CoreError::unexpected("password-hash", e.to_string())))?;

        let record = self
            .store
            .insert(NewUser {
                username: request.username.trim().to_string(),
                email: request.email,
                password_hash,
                first_name: request.first_name,
                last_name: request.last_name,
                phone: (!request.phone.is_empty()).then_some(request.phone),
            })
            .map_err(|e| {
                warn!(correlation_id = %context.correlation_id, error = %e, "user creation rejected");
                context.fail(e)
            })?;

        // Warm the eligibility cache on the success path.
        self.cache
            .prime(&record.user_id, record.is_valid_for_order())
            .await;

        info!(
            correlation_id = %context.correlation_id,
            user_id = %record.user_id,
            username = %record.username,
            "user created"
        );

        Ok(context.reply(CreateUserResponse {
            user_id: record.user_id.clone(),
            created_at: record.created_at.to_rfc3339(),
            profile: Some(Self::profile_of(&record)),
            message: "user created".to_string(),
        }))
    }

    async fn get_user(
        &self,
        request: Request<GetUserRequest>,
    ) -> Result<Response<UserProfile>, Status> {
        let context = self.gate.authorize(methods::GET_USER, &request).await?;
        let request = request.into_inner();

        let record = self
            .store
            .get(&request.user_id)
            .ok_or_else(|| context.fail(CoreError::NotFound { entity: "user" }))?;

        Ok(context.reply(Self::profile_of(&record)))
    }

    async fn get_user_by_username(
        &self,
        request: Request<GetUserByUsernameRequest>,
    ) -> Result<Response<UserProfile>, Status> {
        let context = self
            .gate
            .authorize(methods::GET_USER_BY_USERNAME, &request)
            .await?;
        let request = request.into_inner();

        let record = self
            .store
            .get_by_username(&request.username)
            .ok_or_else(|| context.fail(CoreError::NotFound { entity: "user" }))?;

        Ok(context.reply(Self::profile_of(&record)))
    }

    async fn update_user_profile(
        &self,
        request: Request<UpdateUserProfileRequest>,
    ) -> Result<Response<UserProfile>, Status> {
        let context = self
            .gate
            .authorize(methods::UPDATE_USER_PROFILE, &request)
            .await?;
        let request = request.into_inner();

        if let Some(principal) = &context.principal {
            ensure_owner_or_authority(
                principal,
                &request.user_id,
                roles::ADMIN,
                methods::UPDATE_USER_PROFILE,
            )
            .map_err(|e| context.fail(e))?;
        }

        let mut record = self
            .store
            .get(&request.user_id)
            .ok_or_else(|| context.fail(CoreError::NotFound { entity: "user" }))?;

        // Only fields present in the request are touched.
        if let Some(first_name) = request.first_name {
            record.first_name = first_name;
        }
        if let Some(last_name) = request.last_name {
            record.last_name = last_name;
        }
        if let Some(phone) = request.phone {
            record.phone = (!phone.is_empty()).then_some(phone);
        }

        let updated = self.store.update(record).map_err(|e| context.fail(e))?;

        info!(
            correlation_id = %context.correlation_id,
            user_id = %updated.user_id,
            "profile updated"
        );
        Ok(context.reply(Self::profile_of(&updated)))
    }

    async fn validate_user(
        &self,
        request: Request<ValidateUserRequest>,
    ) -> Result<Response<ValidateUserResponse>, Status> {
        let context = self.gate.authorize(methods::VALIDATE_USER, &request).await?;
        let request = request.into_inner();

        let store = self.store.clone();
        let user_id = request.user_id.clone();
        let valid = self
            .cache
            .is_valid_for_order(&request.user_id, || async move {
                Ok(store
                    .get(&user_id)
                    .map(|u| u.is_valid_for_order())
                    .unwrap_or(false))
            })
            .await
            .map_err(|e| context.fail(e))?;

        let message = if valid {
            "user is eligible for orders"
        } else {
            "user is not eligible for orders"
        };
        Ok(context.reply(ValidateUserResponse {
            valid,
            user_id: request.user_id,
            message: message.to_string(),
        }))
    }

    async fn health_check(
        &self,
        request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let context = self
            .gate
            .authorize(methods::IDENTITY_HEALTH_CHECK, &request)
            .await?;
        Ok(context.reply(HealthCheckResponse {
            status: "SERVING".to_string(),
            message: "identity service is healthy".to_string(),
        }))
    }
}
