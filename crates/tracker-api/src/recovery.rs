//! Password recovery through a per-user security code.
//!
//! A signed-in user stores a code; later, knowing only their email and that
//! code, they trade it for a short-lived reset token and pick a new password.

use axum::{Extension, Json, extract::State};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{error, info, warn};

use tracker_types::api::{
    ResetClaims, SecurityCodeStatus, SetNewPasswordRequest, SetSecurityCodeRequest,
    VerifyCodeRequest, VerifyCodeResponse,
};

use crate::access::Actor;
use crate::auth::{hash_password, validate_password, verify_password};
use crate::error::ApiError;
use crate::state::{AppState, blocking};

const RESET_PURPOSE: &str = "password_reset";

pub const RESET_TOKEN_MINUTES: i64 = 15;

fn validate_code(code: &str) -> Result<(), ApiError> {
    if code.trim().chars().count() < 4 {
        return Err(ApiError::bad_request("security code must be at least 4 characters"));
    }
    Ok(())
}

pub fn issue_reset_token(secret: &str, user_id: i64) -> Result<String, ApiError> {
    let claims = ResetClaims {
        sub: user_id,
        purpose: RESET_PURPOSE.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::minutes(RESET_TOKEN_MINUTES)).timestamp()
            as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!("Reset token encoding failed: {}", e);
        ApiError::Internal
    })
}

/// Session tokens lack `purpose` and fail to decode here.
pub fn reset_token_subject(secret: &str, token: &str) -> Result<i64, ApiError> {
    let data = decode::<ResetClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized("invalid or expired reset token".into()))?;

    if data.claims.purpose != RESET_PURPOSE {
        return Err(ApiError::Unauthorized("invalid or expired reset token".into()));
    }
    Ok(data.claims.sub)
}

async fn verify_off_thread(code: String, hash: String) -> Result<bool, ApiError> {
    tokio::task::spawn_blocking(move || verify_password(&code, &hash))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })
}

// -- Services --

pub async fn set_code(
    state: &AppState,
    actor: &Actor,
    req: SetSecurityCodeRequest,
) -> Result<SecurityCodeStatus, ApiError> {
    let code = req.code.trim().to_string();
    validate_code(&code)?;
    let code_hash = hash_password(&code)?;

    let user_id = actor.id();
    let stored = blocking(state, move |s| {
        s.db.set_security_code(user_id, &code_hash)?;
        s.db.get_security_code(user_id)?.ok_or(ApiError::Internal)
    })
    .await?;

    info!("Security code set for user {}", user_id);
    Ok(SecurityCodeStatus {
        is_set: true,
        updated_at: stored.updated_at,
    })
}

pub async fn code_status(state: &AppState, actor: &Actor) -> Result<SecurityCodeStatus, ApiError> {
    let user_id = actor.id();
    let stored = blocking(state, move |s| {
        s.db.get_security_code(user_id)?
            .ok_or_else(|| ApiError::not_found("security code"))
    })
    .await?;

    Ok(SecurityCodeStatus {
        is_set: true,
        updated_at: stored.updated_at,
    })
}

pub async fn verify_code(
    state: &AppState,
    req: VerifyCodeRequest,
) -> Result<VerifyCodeResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let code = req.code.trim().to_string();
    if email.is_empty() || code.is_empty() {
        return Err(ApiError::bad_request("email and code are required"));
    }

    let (user, stored) = blocking(state, move |s| {
        let credentials = s
            .db
            .get_credentials_by_email(&email)?
            .ok_or_else(|| ApiError::not_found("user"))?;
        let stored = s.db.get_security_code(credentials.user.id)?;
        Ok((credentials.user, stored))
    })
    .await?;

    if !user.is_active {
        warn!("Password reset refused for inactive user {}", user.id);
        return Err(ApiError::forbidden("account is inactive"));
    }
    let stored = stored.ok_or_else(|| ApiError::bad_request("no security code is set"))?;
    if !verify_off_thread(code, stored.code_hash).await? {
        warn!("Wrong security code for user {}", user.id);
        return Err(ApiError::bad_request("security code does not match"));
    }

    let reset_token = issue_reset_token(&state.jwt_secret, user.id)?;
    info!("Security code verified for user {}", user.id);
    Ok(VerifyCodeResponse {
        user_id: user.id,
        reset_token,
    })
}

pub async fn set_new_password(state: &AppState, req: SetNewPasswordRequest) -> Result<(), ApiError> {
    let user_id = reset_token_subject(&state.jwt_secret, &req.reset_token)?;
    validate_password(&req.new_password)?;
    let password_hash = hash_password(&req.new_password)?;

    blocking(state, move |s| {
        if !s.db.set_password_hash(user_id, &password_hash)? {
            return Err(ApiError::not_found("user"));
        }
        Ok(())
    })
    .await?;

    info!("Password reset for user {}", user_id);
    Ok(())
}

// -- Handlers --

pub async fn put_code(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<SetSecurityCodeRequest>,
) -> Result<Json<SecurityCodeStatus>, ApiError> {
    set_code(&state, &actor, req).await.map(Json)
}

pub async fn get_code(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<SecurityCodeStatus>, ApiError> {
    code_status(&state, &actor).await.map(Json)
}

pub async fn verify(
    State(state): State<AppState>,
    Json(req): Json<VerifyCodeRequest>,
) -> Result<Json<VerifyCodeResponse>, ApiError> {
    verify_code(&state, req).await.map(Json)
}

pub async fn reset(
    State(state): State<AppState>,
    Json(req): Json<SetNewPasswordRequest>,
) -> Result<axum::http::StatusCode, ApiError> {
    set_new_password(&state, req).await?;
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::issue_token;
    use tracker_types::models::{Role, UserView};

    #[test]
    fn reset_token_round_trip() {
        let token = issue_reset_token("secret", 12).unwrap();
        assert_eq!(reset_token_subject("secret", &token).unwrap(), 12);
        assert!(matches!(
            reset_token_subject("other", &token),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn session_tokens_are_not_reset_tokens() {
        let now = chrono::Utc::now();
        let user = UserView {
            id: 3,
            username: "selin".into(),
            fullname: "Selin".into(),
            email: "selin@example.com".into(),
            role: Role::Developer,
            is_active: true,
            is_main_admin: false,
            created_at: now,
            updated_at: now,
        };
        let session = issue_token("secret", chrono::Duration::hours(1), &user).unwrap();
        assert!(matches!(
            reset_token_subject("secret", &session),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn short_codes_are_rejected() {
        assert!(validate_code("123").is_err());
        assert!(validate_code("  12 ").is_err());
        assert!(validate_code("1234").is_ok());
    }
}
