//! Client-side merge of realtime events into local view state.
//!
//! Every event is applied as an upsert or removal keyed by primary key, so
//! applying the same payload again (or applying the synchronous response and
//! then its broadcast twin) leaves the view unchanged. Nothing here is
//! load-bearing for consistency: a client that missed events converges by
//! replacing its view with a fresh read.

use std::collections::BTreeMap;

use crate::events::RealtimeEvent;
use crate::models::{CommentView, IssueView, ProjectView, Role, UserView};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalView {
    /// The signed-in user; personal events for other users are ignored.
    pub viewer: Option<i64>,
    pub viewer_role: Option<Role>,
    pub viewer_active: Option<bool>,
    pub projects: BTreeMap<i64, ProjectView>,
    pub issues: BTreeMap<i64, IssueView>,
    pub comments: BTreeMap<i64, CommentView>,
    /// Admin panel listing.
    pub users: BTreeMap<i64, UserView>,
}

impl LocalView {
    pub fn for_viewer(user_id: i64) -> Self {
        Self {
            viewer: Some(user_id),
            ..Self::default()
        }
    }

    pub fn upsert_project(&mut self, project: ProjectView) {
        self.projects.insert(project.id, project);
    }

    pub fn upsert_issue(&mut self, issue: IssueView) {
        self.issues.insert(issue.id, issue);
    }

    pub fn upsert_comment(&mut self, comment: CommentView) {
        self.comments.insert(comment.id, comment);
    }

    pub fn apply(&mut self, event: &RealtimeEvent) {
        match event {
            RealtimeEvent::IssueCreated(p) | RealtimeEvent::IssueUpdated(p) => {
                self.upsert_issue(p.issue.clone());
            }
            RealtimeEvent::IssueDescriptionUpdated(p) => {
                if let Some(issue) = self.issues.get_mut(&p.issue_id) {
                    issue.description = Some(p.description.clone());
                }
            }
            RealtimeEvent::IssueMoved(p) => self.upsert_issue(p.issue.clone()),
            RealtimeEvent::IssueDeleted(p) => self.remove_issue(p.issue_id),

            RealtimeEvent::CommentCreated(c) | RealtimeEvent::CommentUpdated(c) => {
                self.upsert_comment(c.clone());
            }
            RealtimeEvent::CommentDeleted(p) => {
                self.comments.remove(&p.comment_id);
            }

            RealtimeEvent::ProjectCreated(p)
            | RealtimeEvent::ProjectUpdated(p)
            | RealtimeEvent::ProjectMemberUpdated(p)
            | RealtimeEvent::ProjectAddedForUser(p) => self.upsert_project(p.project.clone()),
            RealtimeEvent::ProjectDeleted(p) => self.remove_project(p.project_id),
            RealtimeEvent::KickedFromProject(p) => {
                if self.viewer == Some(p.user_id) {
                    self.remove_project(p.project_id);
                }
            }
            RealtimeEvent::ProjectMemberRoleChanged(p) => {
                if let Some(project) = self.projects.get_mut(&p.project_id) {
                    for member in project.members.iter_mut().filter(|m| m.user_id == p.user_id) {
                        member.role = p.new_role;
                    }
                }
            }

            RealtimeEvent::AdminRoleUpdated(p) => {
                self.users.insert(p.user.id, p.user.clone());
            }
            RealtimeEvent::RoleUpdated(p) => {
                if self.viewer == Some(p.user_id) {
                    self.viewer_role = Some(p.role);
                }
            }
            RealtimeEvent::AdminActiveUpdated(p) => {
                if let Some(user) = self.users.get_mut(&p.user_id) {
                    user.is_active = p.is_active;
                }
            }
            RealtimeEvent::ActiveUpdated(p) => {
                if self.viewer == Some(p.user_id) {
                    self.viewer_active = Some(p.is_active);
                }
            }
            RealtimeEvent::AdminUserCreated(p) | RealtimeEvent::AdminUserUpdated(p) => {
                self.users.insert(p.user.id, p.user.clone());
            }
            RealtimeEvent::AdminUserDeleted(p) => {
                self.users.remove(&p.user_id);
            }
        }
    }

    fn remove_issue(&mut self, issue_id: i64) {
        self.issues.remove(&issue_id);
        self.comments.retain(|_, c| c.issue_id != issue_id);
    }

    fn remove_project(&mut self, project_id: i64) {
        self.projects.remove(&project_id);
        let gone: Vec<i64> = self
            .issues
            .values()
            .filter(|i| i.project_id == project_id)
            .map(|i| i.id)
            .collect();
        for issue_id in gone {
            self.remove_issue(issue_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::events::{IssueDeletedPayload, IssuePayload, KickedPayload, UserRolePayload};
    use crate::models::{IssuePriority, IssueStatus, UserSummary};

    fn issue(id: i64, project_id: i64, title: &str) -> IssueView {
        let at = Utc.with_ymd_and_hms(2025, 8, 1, 9, 0, 0).unwrap();
        IssueView {
            id,
            project_id,
            title: title.to_string(),
            description: None,
            status: IssueStatus::Todo,
            priority: IssuePriority::Medium,
            due_date: None,
            created_by: 1,
            assignee: Some(UserSummary {
                id: 2,
                username: "deniz".into(),
                fullname: "Deniz K".into(),
                role: Role::Developer,
            }),
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn response_and_broadcast_merge_to_same_state() {
        let payload = IssuePayload {
            project_id: 7,
            issue: issue(1, 7, "Fix login bug"),
        };

        let mut from_response = LocalView::default();
        from_response.upsert_issue(payload.issue.clone());

        let mut from_both = LocalView::default();
        from_both.upsert_issue(payload.issue.clone());
        let event = RealtimeEvent::IssueCreated(payload);
        for _ in 0..3 {
            from_both.apply(&event);
        }

        let mut from_broadcast = LocalView::default();
        from_broadcast.apply(&event);

        assert_eq!(from_response, from_both);
        assert_eq!(from_response, from_broadcast);
    }

    #[test]
    fn delete_is_idempotent() {
        let mut view = LocalView::default();
        view.upsert_issue(issue(1, 7, "a"));
        view.upsert_issue(issue(2, 7, "b"));

        let event = RealtimeEvent::IssueDeleted(IssueDeletedPayload {
            project_id: 7,
            issue_id: 1,
        });
        view.apply(&event);
        let once = view.clone();
        view.apply(&event);

        assert_eq!(view, once);
        assert_eq!(view.issues.keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn kick_only_applies_to_viewer() {
        let mut view = LocalView::for_viewer(9);
        view.upsert_issue(issue(1, 3, "a"));

        view.apply(&RealtimeEvent::KickedFromProject(KickedPayload {
            project_id: 3,
            user_id: 4,
        }));
        assert_eq!(view.issues.len(), 1);

        view.apply(&RealtimeEvent::KickedFromProject(KickedPayload {
            project_id: 3,
            user_id: 9,
        }));
        assert!(view.issues.is_empty());
    }

    #[test]
    fn role_change_replaces_the_listed_account() {
        let at = Utc.with_ymd_and_hms(2025, 8, 1, 9, 0, 0).unwrap();
        let mut user = UserView {
            id: 6,
            username: "ilkin".into(),
            fullname: "Ilkin A".into(),
            email: "ilkin@example.com".into(),
            role: Role::Developer,
            is_active: true,
            is_main_admin: false,
            created_at: at,
            updated_at: at,
        };
        let mut view = LocalView::for_viewer(6);
        view.users.insert(6, user.clone());

        user.role = Role::TeamLead;
        user.updated_at = at + chrono::Duration::minutes(5);
        let payload = UserRolePayload {
            user_id: 6,
            role: Role::TeamLead,
            user: user.clone(),
        };
        view.apply(&RealtimeEvent::AdminRoleUpdated(payload.clone()));
        view.apply(&RealtimeEvent::RoleUpdated(payload));

        assert_eq!(view.users[&6], user);
        assert_eq!(view.viewer_role, Some(Role::TeamLead));
    }
}
