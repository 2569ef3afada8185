//! Write-side row types and narrow lookups used for authorization.
//! Resolved read models come from `tracker_types::models`.

use chrono::{DateTime, Utc};
use tracker_types::models::{IssuePriority, IssueStatus, Role, UserView};

pub struct NewUser<'a> {
    pub username: &'a str,
    pub fullname: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
    pub is_active: bool,
    pub is_main_admin: bool,
}

/// A user together with the stored password hash. Never serialized.
pub struct Credentials {
    pub user: UserView,
    pub password_hash: String,
}

pub struct NewProject<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_by: i64,
}

#[derive(Debug, Default)]
pub struct ProjectChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Just enough of a project to evaluate access rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectRef {
    pub id: i64,
    pub created_by: i64,
}

pub struct NewIssue<'a> {
    pub project_id: i64,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub status: IssueStatus,
    pub priority: IssuePriority,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee_id: Option<i64>,
    pub created_by: i64,
}

#[derive(Debug, Default, Clone)]
pub struct IssueChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<IssueStatus>,
    pub priority: Option<IssuePriority>,
    pub due_date: Option<DateTime<Utc>>,
    pub assignee_id: Option<Option<i64>>,
}

/// One field changed by an issue update, as written to the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field: &'static str,
    pub old_value: Option<String>,
    pub new_value: String,
}

pub struct NewComment<'a> {
    pub issue_id: i64,
    pub user_id: i64,
    pub content: &'a str,
    pub metadata: Option<&'a serde_json::Value>,
}

pub struct NewAttachment {
    pub filename: String,
    pub mimetype: String,
    pub data: Vec<u8>,
}

pub enum AttachmentChange {
    Keep,
    Replace(NewAttachment),
    Remove,
}

/// Location of a comment in the project → issue → comment chain.
/// `project_id` is `None` when the parent issue row is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentRef {
    pub id: i64,
    pub issue_id: i64,
    pub user_id: i64,
    pub project_id: Option<i64>,
}

pub struct AttachmentBlob {
    pub id: i64,
    pub comment_id: i64,
    pub filename: String,
    pub mimetype: String,
    pub data: Vec<u8>,
}

/// A user's recovery code. Only the hash is kept.
pub struct SecurityCode {
    pub user_id: i64,
    pub code_hash: String,
    pub updated_at: DateTime<Utc>,
}
