use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use tracker_db::models::{NewProject, ProjectChanges};
use tracker_gateway::Notice;
use tracker_types::api::{CreateProjectRequest, Listing, UpdateProjectRequest};
use tracker_types::events::{ProjectDeletedPayload, ProjectPayload};
use tracker_types::models::ProjectView;

use crate::access::{self, Action, Actor, ResourceRef};
use crate::error::{ApiError, ConflictExt};
use crate::state::{AppState, blocking};

fn clean_name(name: &str) -> Result<String, ApiError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("project name is required"));
    }
    Ok(name.to_string())
}

fn check_dates(changes: &ProjectChanges) -> Result<(), ApiError> {
    if let (Some(start), Some(end)) = (changes.start_date, changes.end_date) {
        if end < start {
            return Err(ApiError::bad_request("end date is before start date"));
        }
    }
    Ok(())
}

// -- Services --

pub async fn create_project(
    state: &AppState,
    actor: &Actor,
    req: CreateProjectRequest,
) -> Result<ProjectPayload, ApiError> {
    access::require_project_manager(actor)?;
    let name = clean_name(&req.name)?;
    check_dates(&ProjectChanges {
        start_date: req.start_date,
        end_date: req.end_date,
        ..Default::default()
    })?;

    let actor_id = actor.id();
    let project = blocking(state, move |s| {
        let id = s
            .db
            .insert_project_with_owner(&NewProject {
                name: &name,
                description: req.description.as_deref(),
                start_date: req.start_date,
                end_date: req.end_date,
                created_by: actor_id,
            })
            .on_conflict("a project with this name already exists")?;
        s.db.get_project(id)?.ok_or(ApiError::Internal)
    })
    .await?;

    info!("User {} created project {} ({})", actor_id, project.name, project.id);
    let payload = ProjectPayload { project };
    state.router.notify(Notice::ProjectCreated(payload.clone())).await;
    Ok(payload)
}

/// Managing roles see every project; everyone else sees what they created
/// or belong to.
pub async fn list_projects(state: &AppState, actor: &Actor) -> Result<Vec<ProjectView>, ApiError> {
    let actor = actor.clone();
    blocking(state, move |s| {
        if actor.role().manages_projects() {
            Ok(s.db.list_projects()?)
        } else {
            Ok(s.db.list_projects_for_user(actor.id())?)
        }
    })
    .await
}

pub async fn get_project(
    state: &AppState,
    actor: &Actor,
    project_id: i64,
) -> Result<ProjectView, ApiError> {
    let actor = actor.clone();
    blocking(state, move |s| {
        access::check(&s.db, &actor, Action::ViewBoard, ResourceRef::project(project_id))?;
        s.db.get_project(project_id)?
            .ok_or_else(|| ApiError::not_found("project"))
    })
    .await
}

pub async fn update_project(
    state: &AppState,
    actor: &Actor,
    project_id: i64,
    req: UpdateProjectRequest,
) -> Result<ProjectPayload, ApiError> {
    let changes = ProjectChanges {
        name: req.name.as_deref().map(clean_name).transpose()?,
        description: req.description,
        start_date: req.start_date,
        end_date: req.end_date,
    };

    let actor = actor.clone();
    let project = blocking(state, move |s| {
        let target = access::check(&s.db, &actor, Action::EditProject, ResourceRef::project(project_id))?;
        let current = s
            .db
            .get_project(target.project.id)?
            .ok_or_else(|| ApiError::not_found("project"))?;
        check_dates(&ProjectChanges {
            start_date: changes.start_date.or(current.start_date),
            end_date: changes.end_date.or(current.end_date),
            ..Default::default()
        })?;

        s.db.update_project(project_id, &changes)
            .on_conflict("a project with this name already exists")?;
        s.db.get_project(project_id)?
            .ok_or_else(|| ApiError::not_found("project"))
    })
    .await?;

    info!("Project {} updated", project.id);
    let payload = ProjectPayload { project };
    state.router.notify(Notice::ProjectUpdated(payload.clone())).await;
    Ok(payload)
}

/// Hard delete. Members are read before the cascade removes them so their
/// personal rooms can be told.
pub async fn delete_project(
    state: &AppState,
    actor: &Actor,
    project_id: i64,
) -> Result<ProjectDeletedPayload, ApiError> {
    let actor = actor.clone();
    let former_members = blocking(state, move |s| {
        access::check(&s.db, &actor, Action::ManageProject, ResourceRef::project(project_id))?;
        let members = s.db.project_member_ids(project_id)?;
        if !s.db.delete_project(project_id)? {
            return Err(ApiError::not_found("project"));
        }
        Ok(members)
    })
    .await?;

    info!("Project {} deleted ({} members notified)", project_id, former_members.len());
    state
        .router
        .notify(Notice::ProjectDeleted {
            project_id,
            former_members,
        })
        .await;
    Ok(ProjectDeletedPayload { project_id })
}

// -- Handlers --

pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = create_project(&state, &actor, req).await?;
    Ok((StatusCode::CREATED, Json(payload)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Listing<ProjectView>>, ApiError> {
    Ok(Json(list_projects(&state, &actor).await?.into()))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(project_id): Path<i64>,
) -> Result<Json<ProjectView>, ApiError> {
    get_project(&state, &actor, project_id).await.map(Json)
}

pub async fn update(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(project_id): Path<i64>,
    Json(req): Json<UpdateProjectRequest>,
) -> Result<Json<ProjectPayload>, ApiError> {
    update_project(&state, &actor, project_id, req).await.map(Json)
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(project_id): Path<i64>,
) -> Result<Json<ProjectDeletedPayload>, ApiError> {
    delete_project(&state, &actor, project_id).await.map(Json)
}
