use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use tracker_gateway::Notice;
use tracker_types::api::{AddMemberRequest, Listing, UpdateMemberRoleRequest};
use tracker_types::events::ProjectPayload;
use tracker_types::models::MemberView;

use crate::access::{self, Action, Actor, ResourceRef};
use crate::error::{ApiError, ConflictExt};
use crate::middleware::prune_rooms;
use crate::state::{AppState, blocking};

/// Every membership change answers with the re-read project.
fn reread(s: &crate::state::AppStateInner, project_id: i64) -> Result<ProjectPayload, ApiError> {
    let project = s
        .db
        .get_project(project_id)?
        .ok_or_else(|| ApiError::not_found("project"))?;
    Ok(ProjectPayload { project })
}

// -- Services --

pub async fn add_member(
    state: &AppState,
    actor: &Actor,
    project_id: i64,
    req: AddMemberRequest,
) -> Result<ProjectPayload, ApiError> {
    let actor = actor.clone();
    let user_id = req.user_id;
    let payload = blocking(state, move |s| {
        access::check(&s.db, &actor, Action::ManageProject, ResourceRef::project(project_id))?;
        if s.db.get_user(user_id)?.is_none() {
            return Err(ApiError::not_found("user"));
        }
        s.db.add_member(project_id, user_id, req.role)
            .on_conflict("user is already a member of this project")?;
        reread(s, project_id)
    })
    .await?;

    info!("User {} added to project {}", user_id, project_id);
    state
        .router
        .notify(Notice::MemberAdded {
            project: payload.clone(),
            user_id,
        })
        .await;
    Ok(payload)
}

pub async fn list_members(
    state: &AppState,
    actor: &Actor,
    project_id: i64,
) -> Result<Vec<MemberView>, ApiError> {
    let actor = actor.clone();
    blocking(state, move |s| {
        access::check(&s.db, &actor, Action::ViewBoard, ResourceRef::project(project_id))?;
        Ok(s.db.list_members(project_id)?)
    })
    .await
}

pub async fn remove_member(
    state: &AppState,
    actor: &Actor,
    project_id: i64,
    user_id: i64,
) -> Result<ProjectPayload, ApiError> {
    let actor = actor.clone();
    let payload = blocking(state, move |s| {
        access::check(&s.db, &actor, Action::ManageProject, ResourceRef::project(project_id))?;
        if !s.db.remove_member(project_id, user_id)? {
            return Err(ApiError::not_found("membership"));
        }
        reread(s, project_id)
    })
    .await?;

    info!("User {} removed from project {}", user_id, project_id);
    state
        .router
        .notify(Notice::MemberRemoved {
            project: payload.clone(),
            user_id,
        })
        .await;
    prune_rooms(state, user_id).await;
    Ok(payload)
}

pub async fn change_member_role(
    state: &AppState,
    actor: &Actor,
    project_id: i64,
    user_id: i64,
    req: UpdateMemberRoleRequest,
) -> Result<ProjectPayload, ApiError> {
    let actor = actor.clone();
    let role = req.role;
    let payload = blocking(state, move |s| {
        access::check(&s.db, &actor, Action::ManageProject, ResourceRef::project(project_id))?;
        if !s.db.set_member_role(project_id, user_id, role)? {
            return Err(ApiError::not_found("membership"));
        }
        reread(s, project_id)
    })
    .await?;

    info!("User {} is now {} in project {}", user_id, role, project_id);
    state
        .router
        .notify(Notice::MemberRoleChanged {
            project: payload.clone(),
            user_id,
            role,
        })
        .await;
    Ok(payload)
}

// -- Handlers --

pub async fn add(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(project_id): Path<i64>,
    Json(req): Json<AddMemberRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = add_member(&state, &actor, project_id, req).await?;
    Ok((StatusCode::CREATED, Json(payload)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(project_id): Path<i64>,
) -> Result<Json<Listing<MemberView>>, ApiError> {
    Ok(Json(list_members(&state, &actor, project_id).await?.into()))
}

pub async fn remove(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((project_id, user_id)): Path<(i64, i64)>,
) -> Result<Json<ProjectPayload>, ApiError> {
    remove_member(&state, &actor, project_id, user_id).await.map(Json)
}

pub async fn change_role(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((project_id, user_id)): Path<(i64, i64)>,
    Json(req): Json<UpdateMemberRoleRequest>,
) -> Result<Json<ProjectPayload>, ApiError> {
    change_member_role(&state, &actor, project_id, user_id, req)
        .await
        .map(Json)
}
