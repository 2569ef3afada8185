use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use tracker_db::models::{IssueChanges, NewIssue};
use tracker_gateway::Notice;
use tracker_types::api::{CreateIssueRequest, IssueFilter, Listing, MoveIssueRequest, UpdateIssueRequest};
use tracker_types::events::{IssueDeletedPayload, IssueMovedPayload, IssuePayload};
use tracker_types::models::{HistoryEntry, IssueView};

use crate::access::{self, Action, Actor, ResourceRef};
use crate::error::{ApiError, ConflictExt};
use crate::state::{AppState, AppStateInner, blocking};

const DUPLICATE_TITLE: &str = "an issue with this title already exists in the project";

fn clean_title(title: &str) -> Result<String, ApiError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ApiError::bad_request("issue title is required"));
    }
    Ok(title.to_string())
}

fn check_assignee(s: &AppStateInner, assignee_id: Option<i64>) -> Result<(), ApiError> {
    if let Some(id) = assignee_id {
        if s.db.get_user(id)?.is_none() {
            return Err(ApiError::bad_request(format!("assignee {} does not exist", id)));
        }
    }
    Ok(())
}

fn reread(s: &AppStateInner, issue_id: i64) -> Result<IssueView, ApiError> {
    s.db.get_issue(issue_id)?
        .ok_or_else(|| ApiError::not_found("issue"))
}

// -- Services --

pub async fn create_issue(
    state: &AppState,
    actor: &Actor,
    project_id: i64,
    req: CreateIssueRequest,
) -> Result<IssuePayload, ApiError> {
    let title = clean_title(&req.title)?;
    let actor = actor.clone();
    let issue = blocking(state, move |s| {
        access::check(&s.db, &actor, Action::ViewBoard, ResourceRef::project(project_id))?;
        check_assignee(s, req.assignee_id)?;
        let id = s
            .db
            .insert_issue(&NewIssue {
                project_id,
                title: &title,
                description: req.description.as_deref(),
                status: req.status.unwrap_or_default(),
                priority: req.priority.unwrap_or_default(),
                due_date: req.due_date,
                assignee_id: req.assignee_id,
                created_by: actor.id(),
            })
            .on_conflict(DUPLICATE_TITLE)?;
        reread(s, id)
    })
    .await?;

    info!("Issue {} created in project {}", issue.id, project_id);
    let payload = IssuePayload { project_id, issue };
    state.router.notify(Notice::IssueCreated(payload.clone())).await;
    Ok(payload)
}

/// Newest first.
pub async fn list_issues(
    state: &AppState,
    actor: &Actor,
    project_id: i64,
    filter: IssueFilter,
) -> Result<Vec<IssueView>, ApiError> {
    let actor = actor.clone();
    blocking(state, move |s| {
        access::check(&s.db, &actor, Action::ViewBoard, ResourceRef::project(project_id))?;
        Ok(s.db.list_issues(project_id, &filter)?)
    })
    .await
}

pub async fn get_issue(
    state: &AppState,
    actor: &Actor,
    project_id: i64,
    issue_id: i64,
) -> Result<IssueView, ApiError> {
    let actor = actor.clone();
    blocking(state, move |s| {
        access::check(
            &s.db,
            &actor,
            Action::ViewBoard,
            ResourceRef::project_issue(project_id, issue_id),
        )?;
        reread(s, issue_id)
    })
    .await
}

pub async fn update_issue(
    state: &AppState,
    actor: &Actor,
    project_id: i64,
    issue_id: i64,
    req: UpdateIssueRequest,
) -> Result<IssuePayload, ApiError> {
    let changes = IssueChanges {
        title: req.title.as_deref().map(clean_title).transpose()?,
        description: req.description,
        status: req.status,
        priority: req.priority,
        due_date: req.due_date,
        assignee_id: req.assignee_id,
    };

    let actor = actor.clone();
    let (issue, description_changed) = blocking(state, move |s| {
        access::check(
            &s.db,
            &actor,
            Action::ViewBoard,
            ResourceRef::project_issue(project_id, issue_id),
        )?;
        check_assignee(s, changes.assignee_id.flatten())?;
        let changed = s
            .db
            .update_issue(issue_id, &changes, actor.id())
            .on_conflict(DUPLICATE_TITLE)?
            .ok_or_else(|| ApiError::not_found("issue"))?;
        let description_changed = changed.iter().any(|c| c.field == "description");
        Ok((reread(s, issue_id)?, description_changed))
    })
    .await?;

    info!("Issue {} updated", issue_id);
    let payload = IssuePayload { project_id, issue };
    state
        .router
        .notify(Notice::IssueUpdated {
            payload: payload.clone(),
            description_changed,
        })
        .await;
    Ok(payload)
}

/// Status-only change from the board. Any status may follow any other.
pub async fn move_issue(
    state: &AppState,
    actor: &Actor,
    project_id: i64,
    issue_id: i64,
    req: MoveIssueRequest,
) -> Result<IssueMovedPayload, ApiError> {
    let actor = actor.clone();
    let new_status = req.status;
    let issue = blocking(state, move |s| {
        access::check(
            &s.db,
            &actor,
            Action::ViewBoard,
            ResourceRef::project_issue(project_id, issue_id),
        )?;
        let changes = IssueChanges {
            status: Some(new_status),
            ..Default::default()
        };
        s.db.update_issue(issue_id, &changes, actor.id())?
            .ok_or_else(|| ApiError::not_found("issue"))?;
        reread(s, issue_id)
    })
    .await?;

    info!("Issue {} moved to {}", issue_id, new_status);
    let payload = IssueMovedPayload {
        project_id,
        issue_id,
        new_status,
        issue,
    };
    state.router.notify(Notice::IssueMoved(payload.clone())).await;
    Ok(payload)
}

pub async fn delete_issue(
    state: &AppState,
    actor: &Actor,
    project_id: i64,
    issue_id: i64,
) -> Result<IssueDeletedPayload, ApiError> {
    let actor = actor.clone();
    blocking(state, move |s| {
        access::check(
            &s.db,
            &actor,
            Action::ViewBoard,
            ResourceRef::project_issue(project_id, issue_id),
        )?;
        if !s.db.delete_issue(project_id, issue_id)? {
            return Err(ApiError::not_found("issue"));
        }
        Ok(())
    })
    .await?;

    info!("Issue {} deleted from project {}", issue_id, project_id);
    let payload = IssueDeletedPayload {
        project_id,
        issue_id,
    };
    state.router.notify(Notice::IssueDeleted(payload.clone())).await;
    Ok(payload)
}

/// Newest first.
pub async fn issue_history(
    state: &AppState,
    actor: &Actor,
    issue_id: i64,
) -> Result<Vec<HistoryEntry>, ApiError> {
    let actor = actor.clone();
    blocking(state, move |s| {
        access::check(&s.db, &actor, Action::ViewBoard, ResourceRef::issue(issue_id))?;
        Ok(s.db.list_history(issue_id)?)
    })
    .await
}

// -- Handlers --

pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(project_id): Path<i64>,
    Json(req): Json<CreateIssueRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = create_issue(&state, &actor, project_id, req).await?;
    Ok((StatusCode::CREATED, Json(payload)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(project_id): Path<i64>,
    Query(filter): Query<IssueFilter>,
) -> Result<Json<Listing<IssueView>>, ApiError> {
    Ok(Json(list_issues(&state, &actor, project_id, filter).await?.into()))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((project_id, issue_id)): Path<(i64, i64)>,
) -> Result<Json<IssueView>, ApiError> {
    get_issue(&state, &actor, project_id, issue_id).await.map(Json)
}

pub async fn update(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((project_id, issue_id)): Path<(i64, i64)>,
    Json(req): Json<UpdateIssueRequest>,
) -> Result<Json<IssuePayload>, ApiError> {
    update_issue(&state, &actor, project_id, issue_id, req)
        .await
        .map(Json)
}

pub async fn move_status(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((project_id, issue_id)): Path<(i64, i64)>,
    Json(req): Json<MoveIssueRequest>,
) -> Result<Json<IssueMovedPayload>, ApiError> {
    move_issue(&state, &actor, project_id, issue_id, req)
        .await
        .map(Json)
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((project_id, issue_id)): Path<(i64, i64)>,
) -> Result<Json<IssueDeletedPayload>, ApiError> {
    delete_issue(&state, &actor, project_id, issue_id)
        .await
        .map(Json)
}

pub async fn history(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(issue_id): Path<i64>,
) -> Result<Json<Listing<HistoryEntry>>, ApiError> {
    Ok(Json(issue_history(&state, &actor, issue_id).await?.into()))
}
