use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{CommentView, IssueStatus, IssueView, MemberRole, ProjectView, Role, UserView};
use crate::rooms::RoomKey;

// -- Payloads --
//
// Each payload is also the body of the synchronous response for the mutation
// that produced it, so polling and push merge identically on the client.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuePayload {
    pub project_id: i64,
    pub issue: IssueView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueDescriptionPayload {
    pub project_id: i64,
    pub issue_id: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueMovedPayload {
    pub project_id: i64,
    pub issue_id: i64,
    pub new_status: IssueStatus,
    pub issue: IssueView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueDeletedPayload {
    pub project_id: i64,
    pub issue_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDeletedPayload {
    pub comment_id: i64,
    pub issue_id: i64,
    pub project_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPayload {
    pub project: ProjectView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDeletedPayload {
    pub project_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KickedPayload {
    pub project_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberRoleChangedPayload {
    pub project_id: i64,
    pub user_id: i64,
    pub new_role: MemberRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRolePayload {
    pub user_id: i64,
    pub role: Role,
    /// The account as re-read after the change.
    pub user: UserView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserActivePayload {
    pub user_id: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPayload {
    pub user: UserView,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDeletedPayload {
    pub user_id: i64,
}

/// Domain events pushed to connected clients. The serialized `type` tag is
/// the event name the client reconciliation layer listens for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeEvent {
    #[serde(rename = "newIssue")]
    IssueCreated(IssuePayload),

    #[serde(rename = "issueUpdated")]
    IssueUpdated(IssuePayload),

    #[serde(rename = "issueDescriptionUpdated")]
    IssueDescriptionUpdated(IssueDescriptionPayload),

    #[serde(rename = "issueMoved")]
    IssueMoved(IssueMovedPayload),

    #[serde(rename = "issueDeleted")]
    IssueDeleted(IssueDeletedPayload),

    #[serde(rename = "receiveComment")]
    CommentCreated(CommentView),

    #[serde(rename = "updateComment")]
    CommentUpdated(CommentView),

    #[serde(rename = "commentDeleted")]
    CommentDeleted(CommentDeletedPayload),

    #[serde(rename = "projectCreated")]
    ProjectCreated(ProjectPayload),

    #[serde(rename = "projectUpdated")]
    ProjectUpdated(ProjectPayload),

    #[serde(rename = "projectDeleted")]
    ProjectDeleted(ProjectDeletedPayload),

    /// Membership of a project changed; sent to the project room.
    #[serde(rename = "projectMemberUpdated")]
    ProjectMemberUpdated(ProjectPayload),

    #[serde(rename = "projectAddedForUser")]
    ProjectAddedForUser(ProjectPayload),

    #[serde(rename = "kickedFromProject")]
    KickedFromProject(KickedPayload),

    #[serde(rename = "projectMemberRoleChanged")]
    ProjectMemberRoleChanged(MemberRoleChangedPayload),

    /// Admin listeners: someone's global role changed.
    #[serde(rename = "admin:roleUpdated")]
    AdminRoleUpdated(UserRolePayload),

    /// Personal: the receiving user's own global role changed.
    #[serde(rename = "roleUpdated")]
    RoleUpdated(UserRolePayload),

    #[serde(rename = "admin:activeUpdated")]
    AdminActiveUpdated(UserActivePayload),

    #[serde(rename = "activeUpdated")]
    ActiveUpdated(UserActivePayload),

    #[serde(rename = "admin:userCreated")]
    AdminUserCreated(UserPayload),

    #[serde(rename = "admin:userUpdated")]
    AdminUserUpdated(UserPayload),

    #[serde(rename = "admin:userDeleted")]
    AdminUserDeleted(UserDeletedPayload),
}

impl RealtimeEvent {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::IssueCreated(_) => "newIssue",
            Self::IssueUpdated(_) => "issueUpdated",
            Self::IssueDescriptionUpdated(_) => "issueDescriptionUpdated",
            Self::IssueMoved(_) => "issueMoved",
            Self::IssueDeleted(_) => "issueDeleted",
            Self::CommentCreated(_) => "receiveComment",
            Self::CommentUpdated(_) => "updateComment",
            Self::CommentDeleted(_) => "commentDeleted",
            Self::ProjectCreated(_) => "projectCreated",
            Self::ProjectUpdated(_) => "projectUpdated",
            Self::ProjectDeleted(_) => "projectDeleted",
            Self::ProjectMemberUpdated(_) => "projectMemberUpdated",
            Self::ProjectAddedForUser(_) => "projectAddedForUser",
            Self::KickedFromProject(_) => "kickedFromProject",
            Self::ProjectMemberRoleChanged(_) => "projectMemberRoleChanged",
            Self::AdminRoleUpdated(_) => "admin:roleUpdated",
            Self::RoleUpdated(_) => "roleUpdated",
            Self::AdminActiveUpdated(_) => "admin:activeUpdated",
            Self::ActiveUpdated(_) => "activeUpdated",
            Self::AdminUserCreated(_) => "admin:userCreated",
            Self::AdminUserUpdated(_) => "admin:userUpdated",
            Self::AdminUserDeleted(_) => "admin:userDeleted",
        }
    }
}

/// Gateway bookkeeping frames sent from server to a single connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ControlFrame {
    /// Sent once after the transport handshake.
    Ready { connection_id: Uuid },

    /// The connection is now owned by this user.
    Identified { user_id: i64 },

    Joined { room: RoomKey },

    Left { room: RoomKey },

    /// A command was refused; the connection stays open.
    Rejected { reason: String },
}

/// Commands sent FROM client TO server over the websocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Bind the connection to an account using a bearer token.
    Identify { token: String },

    /// Personal notifications; once per authenticated session.
    JoinUser { user_id: i64 },

    /// Sent when the client opens a project's board.
    JoinProject { project_id: i64 },

    /// Sent when the client opens an issue's comment thread.
    JoinIssue { issue_id: i64 },

    /// Optional; rooms are left implicitly on disconnect.
    Leave { room: RoomKey },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_tag_is_wire_name() {
        let event = RealtimeEvent::IssueDeleted(IssueDeletedPayload {
            project_id: 7,
            issue_id: 31,
        });
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "issueDeleted");
        assert_eq!(json["data"]["projectId"], 7);
        assert_eq!(json["data"]["issueId"], 31);
        assert_eq!(event.name(), "issueDeleted");
    }

    #[test]
    fn admin_events_keep_namespaced_names() {
        let event = RealtimeEvent::AdminActiveUpdated(UserActivePayload {
            user_id: 4,
            is_active: false,
        });
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "admin:activeUpdated");
        assert_eq!(json["data"]["isActive"], false);
    }

    #[test]
    fn parses_client_commands() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"joinProject","data":{"projectId":7}}"#).unwrap();
        assert_eq!(cmd, ClientCommand::JoinProject { project_id: 7 });

        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"leave","data":{"room":"issue:9"}}"#).unwrap();
        assert_eq!(cmd, ClientCommand::Leave { room: RoomKey::Issue(9) });

        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"joinTeam","data":{}}"#).is_err());
    }

    #[test]
    fn control_frames_are_camel_case() {
        let frame = ControlFrame::Identified { user_id: 2 };
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "identified");
        assert_eq!(json["data"]["userId"], 2);
    }
}
