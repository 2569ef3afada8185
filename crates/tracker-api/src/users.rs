use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use tracker_db::models::NewUser;
use tracker_gateway::Notice;
use tracker_types::api::{
    CreateUserRequest, Listing, UpdateActiveRequest, UpdateRoleRequest, UpdateUserRequest,
    UserSearchQuery,
};
use tracker_types::events::{UserActivePayload, UserDeletedPayload, UserPayload, UserRolePayload};
use tracker_types::models::{Role, UserSummary, UserView};

use crate::access::{self, Actor};
use crate::auth::{hash_password, validate_email, validate_fullname, validate_password, validate_username};
use crate::error::{ApiError, ConflictExt};
use crate::middleware::prune_rooms;
use crate::state::{AppState, AppStateInner, blocking};

/// Loads the target of an admin action; the main admin is never a valid one.
fn mutable_target(s: &AppStateInner, user_id: i64) -> Result<UserView, ApiError> {
    let user = s
        .db
        .get_user(user_id)?
        .ok_or_else(|| ApiError::not_found("user"))?;
    if user.is_main_admin {
        return Err(ApiError::forbidden("the main admin cannot be modified"));
    }
    Ok(user)
}

// -- Services --

/// Admin panel listing of active accounts.
pub async fn list_active_users(state: &AppState, actor: &Actor) -> Result<Vec<UserView>, ApiError> {
    access::require_user_admin(actor)?;
    blocking(state, |s| Ok(s.db.list_users(true)?)).await
}

/// Everyone, for membership pickers.
pub async fn directory(state: &AppState) -> Result<Vec<UserSummary>, ApiError> {
    blocking(state, |s| Ok(s.db.list_user_summaries()?)).await
}

pub async fn search(state: &AppState, query: String) -> Result<Vec<UserSummary>, ApiError> {
    let query = query.trim().to_string();
    if query.is_empty() {
        return Ok(Vec::new());
    }
    blocking(state, move |s| Ok(s.db.search_users(&query)?)).await
}

pub async fn get_user(state: &AppState, actor: &Actor, user_id: i64) -> Result<UserView, ApiError> {
    access::require_admin(actor)?;
    blocking(state, move |s| {
        s.db.get_user(user_id)?
            .ok_or_else(|| ApiError::not_found("user"))
    })
    .await
}

pub async fn create_user(
    state: &AppState,
    actor: &Actor,
    req: CreateUserRequest,
) -> Result<UserView, ApiError> {
    access::require_user_admin(actor)?;
    if req.role == Role::Admin {
        return Err(ApiError::bad_request("the admin role cannot be assigned"));
    }
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
                role: req.role,
                is_active: req.is_active.unwrap_or(true),
                is_main_admin: false,
            })
            .on_conflict("username or email already in use")?;
        s.db.get_user(id)?.ok_or(ApiError::Internal)
    })
    .await?;

    info!("User {} created by {}", user.id, actor.id());
    state
        .router
        .notify(Notice::UserCreated(UserPayload { user: user.clone() }))
        .await;
    Ok(user)
}

pub async fn update_user(
    state: &AppState,
    actor: &Actor,
    user_id: i64,
    req: UpdateUserRequest,
) -> Result<UserView, ApiError> {
    access::require_user_admin(actor)?;
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_lowercase();
    validate_username(&username)?;
    validate_email(&email)?;
    validate_fullname(&req.fullname)?;

    let user = blocking(state, move |s| {
        mutable_target(s, user_id)?;
        if let Some(field) = s.db.find_identity_clash(&username, &email, Some(user_id))? {
            return Err(ApiError::Conflict(format!("{} already in use", field)));
        }
        s.db.update_user_profile(user_id, req.fullname.trim(), &username, &email)
            .on_conflict("username or email already in use")?;
        s.db.get_user(user_id)?
            .ok_or_else(|| ApiError::not_found("user"))
    })
    .await?;

    info!("User {} updated by {}", user_id, actor.id());
    state
        .router
        .notify(Notice::UserUpdated(UserPayload { user: user.clone() }))
        .await;
    Ok(user)
}

/// Cascades to the user's projects, comments and memberships.
pub async fn delete_user(
    state: &AppState,
    actor: &Actor,
    user_id: i64,
) -> Result<UserDeletedPayload, ApiError> {
    access::require_user_admin(actor)?;
    blocking(state, move |s| {
        mutable_target(s, user_id)?;
        if !s.db.delete_user(user_id)? {
            return Err(ApiError::not_found("user"));
        }
        Ok(())
    })
    .await?;

    info!("User {} deleted by {}", user_id, actor.id());
    let payload = UserDeletedPayload { user_id };
    state.router.notify(Notice::UserDeleted(payload.clone())).await;
    state.router.registry().disconnect_user(user_id).await;
    Ok(payload)
}

/// Only an admin may hand out the admin role.
pub async fn change_role(
    state: &AppState,
    actor: &Actor,
    user_id: i64,
    req: UpdateRoleRequest,
) -> Result<UserRolePayload, ApiError> {
    access::require_user_admin(actor)?;
    if req.role == Role::Admin {
        access::require_admin(actor)?;
    }

    let role = req.role;
    let user = blocking(state, move |s| {
        mutable_target(s, user_id)?;
        s.db.set_user_role(user_id, role)?;
        s.db.get_user(user_id)?
            .ok_or_else(|| ApiError::not_found("user"))
    })
    .await?;

    info!("User {} role set to {} by {}", user_id, role, actor.id());
    let payload = UserRolePayload { user_id, role: user.role, user };
    state.router.notify(Notice::UserRoleChanged(payload.clone())).await;
    prune_rooms(state, user_id).await;
    Ok(payload)
}

pub async fn set_active(
    state: &AppState,
    actor: &Actor,
    user_id: i64,
    req: UpdateActiveRequest,
) -> Result<UserActivePayload, ApiError> {
    access::require_admin(actor)?;

    let is_active = req.is_active;
    blocking(state, move |s| {
        mutable_target(s, user_id)?;
        s.db.set_user_active(user_id, is_active)?;
        Ok(())
    })
    .await?;

    info!("User {} active={} (by {})", user_id, is_active, actor.id());
    let payload = UserActivePayload { user_id, is_active };
    state
        .router
        .notify(Notice::UserActiveChanged(payload.clone()))
        .await;
    if !is_active {
        state.router.registry().disconnect_user(user_id).await;
    }
    Ok(payload)
}

// -- Handlers --

pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Listing<UserView>>, ApiError> {
    Ok(Json(list_active_users(&state, &actor).await?.into()))
}

pub async fn list_directory(
    State(state): State<AppState>,
) -> Result<Json<Listing<UserSummary>>, ApiError> {
    Ok(Json(directory(&state).await?.into()))
}

pub async fn search_directory(
    State(state): State<AppState>,
    Query(q): Query<UserSearchQuery>,
) -> Result<Json<Listing<UserSummary>>, ApiError> {
    Ok(Json(search(&state, q.query).await?.into()))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(user_id): Path<i64>,
) -> Result<Json<UserView>, ApiError> {
    get_user(&state, &actor, user_id).await.map(Json)
}

pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = create_user(&state, &actor, req).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(user_id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserView>, ApiError> {
    update_user(&state, &actor, user_id, req).await.map(Json)
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(user_id): Path<i64>,
) -> Result<Json<UserDeletedPayload>, ApiError> {
    delete_user(&state, &actor, user_id).await.map(Json)
}

pub async fn update_role(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(user_id): Path<i64>,
    Json(req): Json<UpdateRoleRequest>,
) -> Result<Json<UserRolePayload>, ApiError> {
    change_role(&state, &actor, user_id, req).await.map(Json)
}

pub async fn update_active(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(user_id): Path<i64>,
    Json(req): Json<UpdateActiveRequest>,
) -> Result<Json<UserActivePayload>, ApiError> {
    set_active(&state, &actor, user_id, req).await.map(Json)
}
