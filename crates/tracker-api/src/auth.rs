use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{error, info, warn};

use tracker_db::Database;
use tracker_db::models::NewUser;
use tracker_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest};
use tracker_types::models::{Role, UserView};

use crate::access::Actor;
use crate::error::{ApiError, ConflictExt};
use crate::state::{AppState, blocking};

// -- Input checks shared with the admin panel --

pub(crate) fn validate_username(username: &str) -> Result<(), ApiError> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) || username.chars().any(char::is_whitespace) {
        return Err(ApiError::bad_request(
            "username must be 3-32 characters without spaces",
        ));
    }
    Ok(())
}

pub(crate) fn validate_email(email: &str) -> Result<(), ApiError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ApiError::bad_request("invalid email address"))
    }
}

pub(crate) fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < 8 {
        return Err(ApiError::bad_request("password must be at least 8 characters"));
    }
    Ok(())
}

pub(crate) fn validate_fullname(fullname: &str) -> Result<(), ApiError> {
    if fullname.trim().is_empty() {
        return Err(ApiError::bad_request("fullname is required"));
    }
    Ok(())
}

// -- Passwords and tokens --

/// Argon2id with a fresh salt.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            ApiError::Internal
        })
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn issue_token(
    secret: &str,
    ttl: chrono::Duration,
    user: &UserView,
) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        role: user.role,
        exp: (chrono::Utc::now() + ttl).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!("Token encoding failed: {}", e);
        ApiError::Internal
    })
}

/// Verifies a bearer token and reloads its account. A deleted account is
/// `Unauthorized`; a deactivated one is `Forbidden` even while the token
/// is still valid.
pub fn authenticate_token(db: &Database, secret: &str, token: &str) -> Result<Actor, ApiError> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized("invalid or expired token".into()))?;

    let user = db
        .get_user(token_data.claims.sub)?
        .ok_or_else(|| ApiError::Unauthorized("account no longer exists".into()))?;

    if !user.is_active {
        return Err(ApiError::forbidden("account is inactive"));
    }

    Ok(Actor { user })
}

// -- Services --

pub async fn register_user(state: &AppState, req: RegisterRequest) -> Result<UserView, ApiError> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_lowercase();
    validate_username(&username)?;
    validate_email(&email)?;
    validate_fullname(&req.fullname)?;
    validate_password(&req.password)?;

    let password_hash = hash_password(&req.password)?;

    let user = blocking(state, move |s| {
        if let Some(field) = s.db.find_identity_clash(&username, &email, None)? {
            return Err(ApiError::Conflict(format!("{} already in use", field)));
        }
        let id = s
            .db
            .create_user(&NewUser {
                username: &username,
                fullname: req.fullname.trim(),
                email: &email,
                password_hash: &password_hash,
                role: Role::User,
                is_active: true,
                is_main_admin: false,
            })
            .on_conflict("username or email already in use")?;
        s.db.get_user(id)?.ok_or(ApiError::Internal)
    })
    .await?;

    info!("Registered user {} ({})", user.username, user.id);
    Ok(user)
}

/// `identity` is treated as an email when it contains `@`.
pub async fn login_user(state: &AppState, req: LoginRequest) -> Result<LoginResponse, ApiError> {
    let identity = req.identity.trim().to_string();
    let credentials = blocking(state, move |s| {
        let found = if identity.contains('@') {
            s.db.get_credentials_by_email(&identity.to_lowercase())?
        } else {
            s.db.get_credentials_by_username(&identity)?
        };
        found.ok_or_else(|| ApiError::not_found("user"))
    })
    .await?;

    if !credentials.user.is_active {
        warn!("Login refused for inactive user {}", credentials.user.id);
        return Err(ApiError::forbidden("account is inactive"));
    }

    let password = req.password;
    let hash = credentials.password_hash;
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?;
    if !verified {
        return Err(ApiError::Unauthorized("wrong password".into()));
    }

    let token = issue_token(&state.jwt_secret, state.token_ttl, &credentials.user)?;
    info!("User {} logged in", credentials.user.id);
    Ok(LoginResponse {
        token,
        user: credentials.user,
    })
}

// -- Handlers --

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = register_user(&state, req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    login_user(&state, req).await.map(Json)
}

pub async fn me(Extension(actor): Extension<Actor>) -> Json<UserView> {
    Json(actor.user)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user(id: i64) -> UserView {
        let now = chrono::Utc::now();
        UserView {
            id,
            username: "selin".into(),
            fullname: "Selin".into(),
            email: "selin@example.com".into(),
            role: Role::Developer,
            is_active: true,
            is_main_admin: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn email_validation() {
        assert!(validate_email("a@b.co").is_ok());
        for bad in ["", "ab.co", "a@", "@b.co", "a@b", "a@@b.co", "a b@c.de", "a@b.co."] {
            assert!(validate_email(bad).is_err(), "{} accepted", bad);
        }
    }

    #[test]
    fn username_validation() {
        assert!(validate_username("ayse").is_ok());
        assert!(validate_username("ay").is_err());
        assert!(validate_username("two words").is_err());
    }

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[test]
    fn token_for_deleted_user_is_unauthorized() {
        let db = Database::open_in_memory().unwrap();
        let token = issue_token("secret", chrono::Duration::hours(1), &sample_user(42)).unwrap();

        let err = authenticate_token(&db, "secret", &token).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn wrong_secret_and_expired_tokens_are_unauthorized() {
        let db = Database::open_in_memory().unwrap();
        let user = sample_user(1);

        let token = issue_token("other", chrono::Duration::hours(1), &user).unwrap();
        assert!(matches!(
            authenticate_token(&db, "secret", &token),
            Err(ApiError::Unauthorized(_))
        ));

        let expired = issue_token("secret", chrono::Duration::hours(-2), &user).unwrap();
        assert!(matches!(
            authenticate_token(&db, "secret", &expired),
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[test]
    fn deactivated_user_is_forbidden() {
        let db = Database::open_in_memory().unwrap();
        let id = db
            .create_user(&NewUser {
                username: "selin",
                fullname: "Selin",
                email: "selin@example.com",
                password_hash: "x",
                role: Role::Developer,
                is_active: true,
                is_main_admin: false,
            })
            .unwrap();
        let user = db.get_user(id).unwrap().unwrap();
        let token = issue_token("secret", chrono::Duration::hours(1), &user).unwrap();
        assert!(authenticate_token(&db, "secret", &token).is_ok());

        db.set_user_active(id, false).unwrap();
        let err = authenticate_token(&db, "secret", &token).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }
}
