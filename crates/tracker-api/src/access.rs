//! Access control: resolving a request's target to a project, then
//! deciding whether the caller may act on it.

use tracker_db::Database;
use tracker_db::models::{CommentRef, ProjectRef};
use tracker_types::models::{MemberRole, Role, UserView};

use crate::error::ApiError;

/// The authenticated caller, reloaded from the store on every request.
#[derive(Debug, Clone)]
pub struct Actor {
    pub user: UserView,
}

impl Actor {
    pub fn id(&self) -> i64 {
        self.user.id
    }

    pub fn role(&self) -> Role {
        self.user.role
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Read the project and work on its board: issues and comments.
    ViewBoard,
    /// Rename or re-date the project.
    EditProject,
    /// Delete the project, add/remove/re-role members.
    ManageProject,
    EditComment,
    DeleteComment,
}

/// Ids a request names directly. Any subset may be present.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceRef {
    pub project_id: Option<i64>,
    pub issue_id: Option<i64>,
    pub comment_id: Option<i64>,
}

impl ResourceRef {
    pub fn project(project_id: i64) -> Self {
        Self {
            project_id: Some(project_id),
            ..Default::default()
        }
    }

    pub fn issue(issue_id: i64) -> Self {
        Self {
            issue_id: Some(issue_id),
            ..Default::default()
        }
    }

    /// An issue addressed through its project's route.
    pub fn project_issue(project_id: i64, issue_id: i64) -> Self {
        Self {
            project_id: Some(project_id),
            issue_id: Some(issue_id),
            comment_id: None,
        }
    }

    pub fn comment(comment_id: i64) -> Self {
        Self {
            comment_id: Some(comment_id),
            ..Default::default()
        }
    }
}

/// A reference walked down to its owning project.
#[derive(Debug, Clone, Copy)]
pub struct Resolved {
    pub project: ProjectRef,
    pub issue_id: Option<i64>,
    pub comment: Option<CommentRef>,
}

/// Walks comment → issue → project.
///
/// Fallback order for the project id: the id named directly, else the
/// issue's project, else the project of the comment's issue. Ids named
/// together must agree; a child that is not under the named parent is
/// `NotFound`. A reference that names nothing, or a comment whose issue
/// row is gone, is `BadRequest`.
pub fn resolve(db: &Database, r: ResourceRef) -> Result<Resolved, ApiError> {
    let comment = match r.comment_id {
        Some(id) => Some(db.comment_ref(id)?.ok_or_else(|| ApiError::not_found("comment"))?),
        None => None,
    };

    if let (Some(c), Some(issue_id)) = (comment, r.issue_id) {
        if c.issue_id != issue_id {
            return Err(ApiError::not_found("comment"));
        }
    }

    let issue_id = r.issue_id.or(comment.map(|c| c.issue_id));
    let issue_project = match (issue_id, comment) {
        (Some(id), _) if r.issue_id.is_some() => Some(
            db.issue_project_id(id)?
                .ok_or_else(|| ApiError::not_found("issue"))?,
        ),
        (Some(_), Some(c)) => Some(c.project_id.ok_or_else(|| {
            ApiError::bad_request("comment does not belong to a resolvable issue")
        })?),
        _ => None,
    };

    let project_id = match (r.project_id, issue_project) {
        (Some(named), Some(derived)) if named != derived => {
            return Err(ApiError::not_found("issue"));
        }
        (Some(named), _) => named,
        (None, Some(derived)) => derived,
        (None, None) => {
            return Err(ApiError::bad_request("request does not identify a project"));
        }
    };

    let project = db
        .project_ref(project_id)?
        .ok_or_else(|| ApiError::not_found("project"))?;

    Ok(Resolved {
        project,
        issue_id,
        comment,
    })
}

/// Evaluates role rules against a resolved target.
pub fn authorize(
    db: &Database,
    actor: &Actor,
    action: Action,
    target: &Resolved,
) -> Result<(), ApiError> {
    let role = actor.role();
    if role == Role::Admin {
        return Ok(());
    }

    let allowed = match action {
        Action::ViewBoard => can_view(db, actor, &target.project)?,

        Action::EditProject => {
            role.manages_projects() || target.project.created_by == actor.id()
        }

        Action::ManageProject => role.manages_projects(),

        Action::EditComment => {
            role.administers_users() || target.comment.is_some_and(|c| c.user_id == actor.id())
        }

        Action::DeleteComment => {
            role.manages_projects()
                || target.comment.is_some_and(|c| c.user_id == actor.id())
                || db.member_role(target.project.id, actor.id())? == Some(MemberRole::TeamLead)
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(ApiError::forbidden(format!(
            "not allowed to {} in project {}",
            describe(action),
            target.project.id
        )))
    }
}

/// Resolve and authorize in one step.
pub fn check(
    db: &Database,
    actor: &Actor,
    action: Action,
    r: ResourceRef,
) -> Result<Resolved, ApiError> {
    let target = resolve(db, r)?;
    authorize(db, actor, action, &target)?;
    Ok(target)
}

/// Board access: a managing role, the creator, or any membership row.
pub fn can_view(db: &Database, actor: &Actor, project: &ProjectRef) -> Result<bool, ApiError> {
    if actor.role().manages_projects() || project.created_by == actor.id() {
        return Ok(true);
    }
    Ok(db.member_role(project.id, actor.id())?.is_some())
}

/// Roles allowed to create projects.
pub fn require_project_manager(actor: &Actor) -> Result<(), ApiError> {
    if actor.role().manages_projects() {
        Ok(())
    } else {
        Err(ApiError::forbidden("project management role required"))
    }
}

pub fn require_user_admin(actor: &Actor) -> Result<(), ApiError> {
    if actor.role().administers_users() {
        Ok(())
    } else {
        Err(ApiError::forbidden("user administration role required"))
    }
}

pub fn require_admin(actor: &Actor) -> Result<(), ApiError> {
    if actor.role() == Role::Admin {
        Ok(())
    } else {
        Err(ApiError::forbidden("admin role required"))
    }
}

fn describe(action: Action) -> &'static str {
    match action {
        Action::ViewBoard => "view the board",
        Action::EditProject => "edit the project",
        Action::ManageProject => "manage the project",
        Action::EditComment => "edit this comment",
        Action::DeleteComment => "delete this comment",
    }
}
