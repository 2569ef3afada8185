//! Which events a mutation produces and which rooms receive them.

use std::str::FromStr;

use tracker_types::events::{
    CommentDeletedPayload, IssueDeletedPayload, IssueDescriptionPayload, IssueMovedPayload,
    IssuePayload, KickedPayload, MemberRoleChangedPayload, ProjectDeletedPayload, ProjectPayload,
    RealtimeEvent, UserActivePayload, UserDeletedPayload, UserPayload, UserRolePayload,
};
use tracker_types::models::{CommentView, MemberRole};
use tracker_types::rooms::RoomKey;

/// Audience for `commentDeleted`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommentDeleteScope {
    /// The comment's issue room and, when known, its project room.
    #[default]
    Scoped,
    /// Every live connection.
    Global,
}

impl FromStr for CommentDeleteScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scoped" => Ok(Self::Scoped),
            "global" => Ok(Self::Global),
            other => Err(format!("unknown comment delete scope: {}", other)),
        }
    }
}

/// A committed mutation, carrying the resolved payloads its events need.
#[derive(Debug, Clone)]
pub enum Notice {
    IssueCreated(IssuePayload),
    IssueUpdated {
        payload: IssuePayload,
        description_changed: bool,
    },
    IssueMoved(IssueMovedPayload),
    IssueDeleted(IssueDeletedPayload),

    CommentCreated(CommentView),
    CommentUpdated(CommentView),
    CommentDeleted(CommentDeletedPayload),

    ProjectCreated(ProjectPayload),
    ProjectUpdated(ProjectPayload),
    ProjectDeleted {
        project_id: i64,
        former_members: Vec<i64>,
    },

    MemberAdded {
        project: ProjectPayload,
        user_id: i64,
    },
    MemberRemoved {
        project: ProjectPayload,
        user_id: i64,
    },
    MemberRoleChanged {
        project: ProjectPayload,
        user_id: i64,
        role: MemberRole,
    },

    UserRoleChanged(UserRolePayload),
    UserActiveChanged(UserActivePayload),
    UserCreated(UserPayload),
    UserUpdated(UserPayload),
    UserDeleted(UserDeletedPayload),
}

/// One event and its target rooms.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub event: RealtimeEvent,
    pub rooms: Vec<RoomKey>,
}

impl Dispatch {
    fn new(event: RealtimeEvent, rooms: Vec<RoomKey>) -> Self {
        Self { event, rooms }
    }
}

fn comment_rooms(comment: &CommentView) -> Vec<RoomKey> {
    let mut rooms = vec![RoomKey::Issue(comment.issue_id)];
    rooms.extend(comment.project_id.map(RoomKey::Project));
    rooms
}

pub fn route(notice: Notice, scope: CommentDeleteScope) -> Vec<Dispatch> {
    match notice {
        Notice::IssueCreated(payload) => {
            let room = RoomKey::Project(payload.project_id);
            vec![Dispatch::new(RealtimeEvent::IssueCreated(payload), vec![room])]
        }

        Notice::IssueUpdated {
            payload,
            description_changed,
        } => {
            let project = RoomKey::Project(payload.project_id);
            let mut out = Vec::with_capacity(2);
            if description_changed {
                let description = IssueDescriptionPayload {
                    project_id: payload.project_id,
                    issue_id: payload.issue.id,
                    description: payload.issue.description.clone().unwrap_or_default(),
                };
                out.push(Dispatch::new(
                    RealtimeEvent::IssueDescriptionUpdated(description),
                    vec![project, RoomKey::Issue(payload.issue.id)],
                ));
            }
            out.insert(0, Dispatch::new(RealtimeEvent::IssueUpdated(payload), vec![project]));
            out
        }

        Notice::IssueMoved(payload) => {
            let room = RoomKey::Project(payload.project_id);
            vec![Dispatch::new(RealtimeEvent::IssueMoved(payload), vec![room])]
        }

        Notice::IssueDeleted(payload) => {
            let room = RoomKey::Project(payload.project_id);
            vec![Dispatch::new(RealtimeEvent::IssueDeleted(payload), vec![room])]
        }

        Notice::CommentCreated(comment) => {
            let rooms = comment_rooms(&comment);
            vec![Dispatch::new(RealtimeEvent::CommentCreated(comment), rooms)]
        }

        Notice::CommentUpdated(comment) => {
            let rooms = comment_rooms(&comment);
            vec![Dispatch::new(RealtimeEvent::CommentUpdated(comment), rooms)]
        }

        Notice::CommentDeleted(payload) => {
            let rooms = match scope {
                CommentDeleteScope::Global => vec![RoomKey::Global],
                CommentDeleteScope::Scoped => {
                    let mut rooms = vec![RoomKey::Issue(payload.issue_id)];
                    rooms.extend(payload.project_id.map(RoomKey::Project));
                    rooms
                }
            };
            vec![Dispatch::new(RealtimeEvent::CommentDeleted(payload), rooms)]
        }

        Notice::ProjectCreated(payload) => {
            vec![Dispatch::new(RealtimeEvent::ProjectCreated(payload), vec![RoomKey::Global])]
        }

        Notice::ProjectUpdated(payload) => {
            let room = RoomKey::Project(payload.project.id);
            vec![Dispatch::new(RealtimeEvent::ProjectUpdated(payload), vec![room])]
        }

        Notice::ProjectDeleted {
            project_id,
            former_members,
        } => {
            let mut rooms = vec![RoomKey::Global, RoomKey::Project(project_id)];
            rooms.extend(former_members.into_iter().map(RoomKey::User));
            vec![Dispatch::new(
                RealtimeEvent::ProjectDeleted(ProjectDeletedPayload { project_id }),
                rooms,
            )]
        }

        Notice::MemberAdded { project, user_id } => {
            let room = RoomKey::Project(project.project.id);
            vec![
                Dispatch::new(RealtimeEvent::ProjectMemberUpdated(project.clone()), vec![room]),
                Dispatch::new(
                    RealtimeEvent::ProjectAddedForUser(project),
                    vec![RoomKey::User(user_id)],
                ),
            ]
        }

        Notice::MemberRemoved { project, user_id } => {
            let project_id = project.project.id;
            vec![
                Dispatch::new(
                    RealtimeEvent::ProjectMemberUpdated(project),
                    vec![RoomKey::Project(project_id)],
                ),
                Dispatch::new(
                    RealtimeEvent::KickedFromProject(KickedPayload {
                        project_id,
                        user_id,
                    }),
                    vec![RoomKey::User(user_id)],
                ),
            ]
        }

        Notice::MemberRoleChanged {
            project,
            user_id,
            role,
        } => {
            let project_id = project.project.id;
            vec![
                Dispatch::new(
                    RealtimeEvent::ProjectMemberUpdated(project),
                    vec![RoomKey::Project(project_id)],
                ),
                Dispatch::new(
                    RealtimeEvent::ProjectMemberRoleChanged(MemberRoleChangedPayload {
                        project_id,
                        user_id,
                        new_role: role,
                    }),
                    vec![RoomKey::User(user_id)],
                ),
            ]
        }

        Notice::UserRoleChanged(payload) => {
            let user = RoomKey::User(payload.user_id);
            vec![
                Dispatch::new(RealtimeEvent::AdminRoleUpdated(payload.clone()), vec![RoomKey::Global]),
                Dispatch::new(RealtimeEvent::RoleUpdated(payload), vec![user]),
            ]
        }

        Notice::UserActiveChanged(payload) => {
            let user = RoomKey::User(payload.user_id);
            vec![
                Dispatch::new(RealtimeEvent::AdminActiveUpdated(payload.clone()), vec![RoomKey::Global]),
                Dispatch::new(RealtimeEvent::ActiveUpdated(payload), vec![user]),
            ]
        }

        Notice::UserCreated(payload) => {
            vec![Dispatch::new(RealtimeEvent::AdminUserCreated(payload), vec![RoomKey::Global])]
        }

        Notice::UserUpdated(payload) => {
            vec![Dispatch::new(RealtimeEvent::AdminUserUpdated(payload), vec![RoomKey::Global])]
        }

        Notice::UserDeleted(payload) => {
            vec![Dispatch::new(RealtimeEvent::AdminUserDeleted(payload), vec![RoomKey::Global])]
        }
    }
}
