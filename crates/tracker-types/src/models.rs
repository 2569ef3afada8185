use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Returned when a stored or submitted enum value is outside its domain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Generates `as_str`, `Display` and `FromStr` for a snake_case wire enum.
macro_rules! wire_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

/// Global account role. The set is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    AdminHelper,
    ProjectManager,
    TeamLead,
    Developer,
    Tester,
    User,
}

wire_enum!(Role, "role", {
    Admin => "admin",
    AdminHelper => "admin_helper",
    ProjectManager => "project_manager",
    TeamLead => "team_lead",
    Developer => "developer",
    Tester => "tester",
    User => "user",
});

impl Role {
    /// admin, admin_helper and project_manager: may manage projects and see every board.
    pub fn manages_projects(&self) -> bool {
        matches!(self, Role::Admin | Role::AdminHelper | Role::ProjectManager)
    }

    /// admin and admin_helper: the user administration panel.
    pub fn administers_users(&self) -> bool {
        matches!(self, Role::Admin | Role::AdminHelper)
    }
}

/// Role a user holds inside one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    #[default]
    Developer,
    Tester,
    ProjectManager,
    TeamLead,
}

wire_enum!(MemberRole, "member role", {
    Developer => "developer",
    Tester => "tester",
    ProjectManager => "project_manager",
    TeamLead => "team_lead",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Blocked,
}

wire_enum!(IssueStatus, "status", {
    Todo => "todo",
    InProgress => "in_progress",
    Done => "done",
    Blocked => "blocked",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssuePriority {
    Low,
    #[default]
    Medium,
    High,
}

wire_enum!(IssuePriority, "priority", {
    Low => "low",
    Medium => "medium",
    High => "high",
});

// -- Resolved entities --
//
// Every view below is self-sufficient: associations a client needs to render
// (assignee, author, creator, member users) are already joined in.

/// Minimal user reference embedded in other entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub fullname: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserView {
    pub id: i64,
    pub username: String,
    pub fullname: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub is_main_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub id: i64,
    pub project_id: i64,
    pub user_id: i64,
    pub role: MemberRole,
    pub user: UserSummary,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectView {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_by: i64,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub creator: UserSummary,
    pub members: Vec<MemberView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueView {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: IssueStatus,
    pub priority: IssuePriority,
    pub due_date: Option<DateTime<Utc>>,
    pub created_by: i64,
    pub assignee: Option<UserSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Attachment metadata. The blob itself is only served by the download route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentMeta {
    pub id: i64,
    pub filename: String,
    pub mimetype: String,
    pub size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: i64,
    pub issue_id: i64,
    /// Owning project, when the issue link resolved.
    pub project_id: Option<i64>,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub is_edited: bool,
    pub author: UserSummary,
    /// Author's role inside the owning project, if they are a member.
    pub project_role: Option<MemberRole>,
    pub attachment: Option<AttachmentMeta>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i64,
    pub issue_id: i64,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: String,
    pub changed_by: UserSummary,
    pub changed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_round_trip_through_text() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), *role);
        }
        for status in IssueStatus::ALL {
            assert_eq!(status.as_str().parse::<IssueStatus>().unwrap(), *status);
        }
        assert!("archived".parse::<IssueStatus>().is_err());
    }

    #[test]
    fn defaults_match_new_issue_defaults() {
        assert_eq!(IssueStatus::default(), IssueStatus::Todo);
        assert_eq!(IssuePriority::default(), IssuePriority::Medium);
        assert_eq!(MemberRole::default(), MemberRole::Developer);
    }

    #[test]
    fn serde_uses_snake_case_values() {
        let json = serde_json::to_string(&IssueStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let role: Role = serde_json::from_str("\"admin_helper\"").unwrap();
        assert_eq!(role, Role::AdminHelper);
    }

    #[test]
    fn role_groups() {
        assert!(Role::ProjectManager.manages_projects());
        assert!(!Role::TeamLead.manages_projects());
        assert!(Role::AdminHelper.administers_users());
        assert!(!Role::ProjectManager.administers_users());
    }
}
