use axum::{
    Extension, Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tracing::info;

use tracker_db::models::{AttachmentChange, NewAttachment, NewComment};
use tracker_gateway::Notice;
use tracker_types::api::{AttachmentUpload, CreateCommentRequest, Listing, UpdateCommentRequest};
use tracker_types::events::CommentDeletedPayload;
use tracker_types::models::CommentView;

use crate::access::{self, Action, Actor, ResourceRef};
use crate::error::ApiError;
use crate::state::{AppState, AppStateInner, blocking};

/// Decoded attachment size limit.
pub const MAX_ATTACHMENT_BYTES: usize = 5 * 1024 * 1024;

fn decode_attachment(upload: AttachmentUpload) -> Result<NewAttachment, ApiError> {
    let filename = upload.filename.trim();
    if filename.is_empty() || filename.contains(['/', '\\']) {
        return Err(ApiError::bad_request("invalid attachment filename"));
    }
    let data = B64
        .decode(upload.data_base64.as_bytes())
        .map_err(|_| ApiError::bad_request("attachment is not valid base64"))?;
    if data.is_empty() {
        return Err(ApiError::bad_request("attachment is empty"));
    }
    if data.len() > MAX_ATTACHMENT_BYTES {
        return Err(ApiError::bad_request("attachment too large"));
    }

    let mimetype = match upload.mimetype.trim() {
        "" => "application/octet-stream".to_string(),
        m => m.to_string(),
    };
    Ok(NewAttachment {
        filename: filename.to_string(),
        mimetype,
        data,
    })
}

fn reread(s: &AppStateInner, comment_id: i64) -> Result<CommentView, ApiError> {
    s.db.get_comment(comment_id)?
        .ok_or_else(|| ApiError::not_found("comment"))
}

// -- Services --

/// Needs text, an attachment, or both.
pub async fn create_comment(
    state: &AppState,
    actor: &Actor,
    issue_id: i64,
    req: CreateCommentRequest,
) -> Result<CommentView, ApiError> {
    let content = req.content.as_deref().map(str::trim).unwrap_or_default().to_string();
    let attachment = req.attachment.map(decode_attachment).transpose()?;
    if content.is_empty() && attachment.is_none() {
        return Err(ApiError::bad_request("comment needs content or an attachment"));
    }

    let actor = actor.clone();
    let metadata = req.metadata;
    let comment = blocking(state, move |s| {
        access::check(&s.db, &actor, Action::ViewBoard, ResourceRef::issue(issue_id))?;
        let id = s.db.insert_comment(
            &NewComment {
                issue_id,
                user_id: actor.id(),
                content: &content,
                metadata: metadata.as_ref(),
            },
            attachment.as_ref(),
        )?;
        reread(s, id)
    })
    .await?;

    info!("Comment {} added to issue {}", comment.id, issue_id);
    state.router.notify(Notice::CommentCreated(comment.clone())).await;
    Ok(comment)
}

/// Thread order, oldest first.
pub async fn list_comments(
    state: &AppState,
    actor: &Actor,
    issue_id: i64,
) -> Result<Vec<CommentView>, ApiError> {
    let actor = actor.clone();
    blocking(state, move |s| {
        access::check(&s.db, &actor, Action::ViewBoard, ResourceRef::issue(issue_id))?;
        Ok(s.db.list_comments(issue_id)?)
    })
    .await
}

pub async fn get_comment(
    state: &AppState,
    actor: &Actor,
    comment_id: i64,
) -> Result<CommentView, ApiError> {
    let actor = actor.clone();
    blocking(state, move |s| {
        access::check(&s.db, &actor, Action::ViewBoard, ResourceRef::comment(comment_id))?;
        reread(s, comment_id)
    })
    .await
}

/// The caller's own comments, newest first.
pub async fn my_comments(state: &AppState, actor: &Actor) -> Result<Vec<CommentView>, ApiError> {
    let actor_id = actor.id();
    blocking(state, move |s| Ok(s.db.list_comments_by_author(actor_id)?)).await
}

pub async fn update_comment(
    state: &AppState,
    actor: &Actor,
    comment_id: i64,
    req: UpdateCommentRequest,
) -> Result<CommentView, ApiError> {
    let change = match (req.remove_attachment, req.attachment) {
        (true, Some(_)) => {
            return Err(ApiError::bad_request(
                "cannot replace and remove the attachment at once",
            ));
        }
        (true, None) => AttachmentChange::Remove,
        (false, Some(upload)) => AttachmentChange::Replace(decode_attachment(upload)?),
        (false, None) => AttachmentChange::Keep,
    };

    let actor = actor.clone();
    let content = req.content.map(|c| c.trim().to_string());
    let metadata = req.metadata;
    let comment = blocking(state, move |s| {
        access::check(&s.db, &actor, Action::EditComment, ResourceRef::comment(comment_id))?;
        let current = reread(s, comment_id)?;

        let content = content.unwrap_or(current.content);
        let keeps_attachment = match &change {
            AttachmentChange::Keep => current.attachment.is_some(),
            AttachmentChange::Replace(_) => true,
            AttachmentChange::Remove => false,
        };
        if content.is_empty() && !keeps_attachment {
            return Err(ApiError::bad_request("comment needs content or an attachment"));
        }

        if !s.db.update_comment(comment_id, &content, metadata.as_ref(), &change)? {
            return Err(ApiError::not_found("comment"));
        }
        reread(s, comment_id)
    })
    .await?;

    info!("Comment {} edited", comment_id);
    state.router.notify(Notice::CommentUpdated(comment.clone())).await;
    Ok(comment)
}

pub async fn delete_comment(
    state: &AppState,
    actor: &Actor,
    comment_id: i64,
) -> Result<CommentDeletedPayload, ApiError> {
    let actor = actor.clone();
    let payload = blocking(state, move |s| {
        let target = access::check(
            &s.db,
            &actor,
            Action::DeleteComment,
            ResourceRef::comment(comment_id),
        )?;
        if !s.db.delete_comment(comment_id)? {
            return Err(ApiError::not_found("comment"));
        }
        Ok(CommentDeletedPayload {
            comment_id,
            issue_id: target.issue_id.unwrap_or_default(),
            project_id: Some(target.project.id),
        })
    })
    .await?;

    info!("Comment {} deleted from issue {}", comment_id, payload.issue_id);
    state.router.notify(Notice::CommentDeleted(payload.clone())).await;
    Ok(payload)
}

// -- Handlers --

pub async fn create(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(issue_id): Path<i64>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = create_comment(&state, &actor, issue_id, req).await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(issue_id): Path<i64>,
) -> Result<Json<Listing<CommentView>>, ApiError> {
    Ok(Json(list_comments(&state, &actor, issue_id).await?.into()))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(comment_id): Path<i64>,
) -> Result<Json<CommentView>, ApiError> {
    get_comment(&state, &actor, comment_id).await.map(Json)
}

pub async fn mine(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Listing<CommentView>>, ApiError> {
    Ok(Json(my_comments(&state, &actor).await?.into()))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(comment_id): Path<i64>,
    Json(req): Json<UpdateCommentRequest>,
) -> Result<Json<CommentView>, ApiError> {
    update_comment(&state, &actor, comment_id, req).await.map(Json)
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(comment_id): Path<i64>,
) -> Result<Json<CommentDeletedPayload>, ApiError> {
    delete_comment(&state, &actor, comment_id).await.map(Json)
}

/// Streams the stored blob back with its original name and type.
pub async fn download_attachment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(attachment_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let blob = blocking(&state, move |s| {
        let blob = s
            .db
            .get_attachment(attachment_id)?
            .ok_or_else(|| ApiError::not_found("attachment"))?;
        access::check(&s.db, &actor, Action::ViewBoard, ResourceRef::comment(blob.comment_id))?;
        Ok(blob)
    })
    .await?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        blob.filename.replace(['"', '\r', '\n'], "_")
    );
    Ok((
        [
            (header::CONTENT_TYPE, blob.mimetype),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        blob.data,
    ))
}
