use rusqlite::{Connection, Row, params};
use tracker_types::api::IssueFilter;
use tracker_types::models::{HistoryEntry, IssuePriority, IssueStatus, IssueView, UserSummary};

use super::{OptionalExt, now, parse_col, summary_at};
use crate::models::{FieldChange, IssueChanges, NewIssue};
use crate::{Database, Result};

const ISSUE_SELECT: &str = "SELECT i.id, i.project_id, i.title, i.description, i.status, i.priority,
            i.due_date, i.created_by, i.created_at, i.updated_at,
            a.id, a.username, a.fullname, a.role
     FROM issues i
     LEFT JOIN users a ON a.id = i.assignee_id";

fn map_issue(row: &Row<'_>) -> rusqlite::Result<IssueView> {
    let assignee_id: Option<i64> = row.get(10)?;
    let assignee = match assignee_id {
        Some(id) => Some(UserSummary {
            id,
            username: row.get(11)?,
            fullname: row.get(12)?,
            role: parse_col(row, 13)?,
        }),
        None => None,
    };
    Ok(IssueView {
        id: row.get(0)?,
        project_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: parse_col(row, 4)?,
        priority: parse_col(row, 5)?,
        due_date: row.get(6)?,
        created_by: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        assignee,
    })
}

fn query_issue(conn: &Connection, id: i64) -> Result<Option<IssueView>> {
    let sql = format!("{} WHERE i.id = ?1", ISSUE_SELECT);
    conn.query_row(&sql, [id], map_issue).optional()
}

/// Raw column values used to diff an update.
struct Current {
    title: String,
    description: Option<String>,
    status: IssueStatus,
    priority: IssuePriority,
    due_date: Option<chrono::DateTime<chrono::Utc>>,
    assignee_id: Option<i64>,
}

fn diff(current: &Current, changes: &IssueChanges) -> Vec<FieldChange> {
    let mut out = Vec::new();
    let mut push = |field: &'static str, old: Option<String>, new: Option<String>| {
        if old != new {
            out.push(FieldChange {
                field,
                old_value: old,
                new_value: new.unwrap_or_default(),
            });
        }
    };

    if let Some(title) = &changes.title {
        push("title", Some(current.title.clone()), Some(title.clone()));
    }
    if let Some(description) = &changes.description {
        push("description", current.description.clone(), Some(description.clone()));
    }
    if let Some(status) = changes.status {
        push(
            "status",
            Some(current.status.to_string()),
            Some(status.to_string()),
        );
    }
    if let Some(priority) = changes.priority {
        push(
            "priority",
            Some(current.priority.to_string()),
            Some(priority.to_string()),
        );
    }
    if let Some(due) = changes.due_date {
        push(
            "due_date",
            current.due_date.map(|d| d.to_rfc3339()),
            Some(due.to_rfc3339()),
        );
    }
    if let Some(assignee) = changes.assignee_id {
        push(
            "assignee_id",
            current.assignee_id.map(|id| id.to_string()),
            assignee.map(|id| id.to_string()),
        );
    }
    out
}

impl Database {
    // -- Issues --

    pub fn insert_issue(&self, new: &NewIssue<'_>) -> Result<i64> {
        self.with_conn(|conn| {
            let at = now();
            conn.execute(
                "INSERT INTO issues (project_id, title, description, status, priority, assignee_id,
                                     created_by, due_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    new.project_id,
                    new.title,
                    new.description,
                    new.status.as_str(),
                    new.priority.as_str(),
                    new.assignee_id,
                    new.created_by,
                    new.due_date,
                    at
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_issue(&self, id: i64) -> Result<Option<IssueView>> {
        self.with_conn(|conn| query_issue(conn, id))
    }

    pub fn issue_project_id(&self, id: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row("SELECT project_id FROM issues WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
        })
    }

    pub fn list_issues(&self, project_id: i64, filter: &IssueFilter) -> Result<Vec<IssueView>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE i.project_id = ?1
                   AND (?2 IS NULL OR i.status = ?2)
                   AND (?3 IS NULL OR i.priority = ?3)
                   AND (?4 IS NULL OR i.assignee_id = ?4)
                 ORDER BY i.created_at DESC, i.id DESC",
                ISSUE_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params![
                        project_id,
                        filter.status.map(|s| s.as_str()),
                        filter.priority.map(|p| p.as_str()),
                        filter.assignee_id
                    ],
                    map_issue,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Applies the changes and records one history row per field whose
    /// value actually changed. Returns `None` when the issue is missing.
    pub fn update_issue(
        &self,
        id: i64,
        changes: &IssueChanges,
        changed_by: i64,
    ) -> Result<Option<Vec<FieldChange>>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let current = tx
                .query_row(
                    "SELECT title, description, status, priority, due_date, assignee_id
                     FROM issues WHERE id = ?1",
                    [id],
                    |row| {
                        Ok(Current {
                            title: row.get(0)?,
                            description: row.get(1)?,
                            status: parse_col(row, 2)?,
                            priority: parse_col(row, 3)?,
                            due_date: row.get(4)?,
                            assignee_id: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            let Some(current) = current else {
                return Ok(None);
            };

            let assignee_id = match changes.assignee_id {
                Some(next) => next,
                None => current.assignee_id,
            };
            let at = now();
            tx.execute(
                "UPDATE issues SET
                    title = COALESCE(?2, title),
                    description = COALESCE(?3, description),
                    status = COALESCE(?4, status),
                    priority = COALESCE(?5, priority),
                    due_date = COALESCE(?6, due_date),
                    assignee_id = ?7,
                    updated_at = ?8
                 WHERE id = ?1",
                params![
                    id,
                    changes.title,
                    changes.description,
                    changes.status.map(|s| s.as_str()),
                    changes.priority.map(|p| p.as_str()),
                    changes.due_date,
                    assignee_id,
                    at
                ],
            )?;

            let changed = diff(&current, changes);
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO issue_history (issue_id, changed_by, field, old_value, new_value, changed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for change in &changed {
                    stmt.execute(params![
                        id,
                        changed_by,
                        change.field,
                        change.old_value,
                        change.new_value,
                        at
                    ])?;
                }
            }

            tx.commit()?;
            Ok(Some(changed))
        })
    }

    /// Deletes only when the issue belongs to `project_id`.
    pub fn delete_issue(&self, project_id: i64, issue_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM issues WHERE id = ?1 AND project_id = ?2",
                [issue_id, project_id],
            )?;
            Ok(n > 0)
        })
    }

    /// Newest change first.
    pub fn list_history(&self, issue_id: i64) -> Result<Vec<HistoryEntry>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT h.id, h.issue_id, h.field, h.old_value, h.new_value, h.changed_at,
                        u.id, u.username, u.fullname, u.role
                 FROM issue_history h
                 JOIN users u ON u.id = h.changed_by
                 WHERE h.issue_id = ?1
                 ORDER BY h.changed_at DESC, h.id DESC",
            )?;
            let rows = stmt
                .query_map([issue_id], |row| {
                    Ok(HistoryEntry {
                        id: row.get(0)?,
                        issue_id: row.get(1)?,
                        field: row.get(2)?,
                        old_value: row.get(3)?,
                        new_value: row.get(4)?,
                        changed_at: row.get(5)?,
                        changed_by: summary_at(row, 6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbError;
    use crate::models::NewProject;
    use crate::queries::test_support::user;
    use tracker_types::models::Role;

    fn setup() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "pm", Role::ProjectManager);
        let project = db
            .insert_project_with_owner(&NewProject {
                name: "Apollo",
                description: None,
                start_date: None,
                end_date: None,
                created_by: owner,
            })
            .unwrap();
        (db, owner, project)
    }

    fn issue(db: &Database, project_id: i64, title: &str, owner: i64) -> i64 {
        db.insert_issue(&NewIssue {
            project_id,
            title,
            description: None,
            status: IssueStatus::default(),
            priority: IssuePriority::default(),
            due_date: None,
            assignee_id: None,
            created_by: owner,
        })
        .unwrap()
    }

    #[test]
    fn new_issue_gets_defaults() {
        let (db, owner, project) = setup();
        let id = issue(&db, project, "Login bug", owner);

        let view = db.get_issue(id).unwrap().unwrap();
        assert_eq!(view.status, IssueStatus::Todo);
        assert_eq!(view.priority, IssuePriority::Medium);
        assert!(view.assignee.is_none());
        assert_eq!(db.issue_project_id(id).unwrap(), Some(project));
    }

    #[test]
    fn title_unique_within_project() {
        let (db, owner, project) = setup();
        issue(&db, project, "Login bug", owner);

        let err = db
            .insert_issue(&NewIssue {
                project_id: project,
                title: "Login bug",
                description: None,
                status: IssueStatus::Todo,
                priority: IssuePriority::Low,
                due_date: None,
                assignee_id: None,
                created_by: owner,
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[test]
    fn update_records_only_changed_fields() {
        let (db, owner, project) = setup();
        let id = issue(&db, project, "Login bug", owner);

        let changed = db
            .update_issue(
                id,
                &IssueChanges {
                    title: Some("Login bug".into()),
                    status: Some(IssueStatus::InProgress),
                    assignee_id: Some(Some(owner)),
                    ..Default::default()
                },
                owner,
            )
            .unwrap()
            .unwrap();

        let fields: Vec<_> = changed.iter().map(|c| c.field).collect();
        assert_eq!(fields, vec!["status", "assignee_id"]);

        let history = db.list_history(id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].field, "status");
        assert_eq!(history[1].old_value.as_deref(), Some("todo"));
        assert_eq!(history[1].new_value, "in_progress");
        assert_eq!(history[0].field, "assignee_id");
        assert_eq!(history[0].changed_by.id, owner);

        let view = db.get_issue(id).unwrap().unwrap();
        assert_eq!(view.assignee.unwrap().id, owner);
    }

    #[test]
    fn clearing_assignee_is_recorded_as_empty() {
        let (db, owner, project) = setup();
        let id = issue(&db, project, "Login bug", owner);
        db.update_issue(id, &IssueChanges { assignee_id: Some(Some(owner)), ..Default::default() }, owner)
            .unwrap();

        let changed = db
            .update_issue(id, &IssueChanges { assignee_id: Some(None), ..Default::default() }, owner)
            .unwrap()
            .unwrap();
        assert_eq!(changed[0].new_value, "");
        assert!(db.get_issue(id).unwrap().unwrap().assignee.is_none());
    }

    #[test]
    fn update_missing_issue_is_none() {
        let (db, owner, _) = setup();
        assert!(db.update_issue(42, &IssueChanges::default(), owner).unwrap().is_none());
    }

    #[test]
    fn filter_by_status() {
        let (db, owner, project) = setup();
        let a = issue(&db, project, "A", owner);
        issue(&db, project, "B", owner);
        db.update_issue(a, &IssueChanges { status: Some(IssueStatus::Done), ..Default::default() }, owner)
            .unwrap();

        let done = db
            .list_issues(project, &IssueFilter { status: Some(IssueStatus::Done), ..Default::default() })
            .unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, a);
        assert_eq!(db.list_issues(project, &IssueFilter::default()).unwrap().len(), 2);
    }

    #[test]
    fn delete_checks_project() {
        let (db, owner, project) = setup();
        let id = issue(&db, project, "A", owner);

        assert!(!db.delete_issue(project + 1, id).unwrap());
        assert!(db.delete_issue(project, id).unwrap());
        assert!(db.get_issue(id).unwrap().is_none());
    }

    #[test]
    fn project_delete_cascades_to_issues() {
        let (db, owner, project) = setup();
        let id = issue(&db, project, "A", owner);

        assert!(db.delete_project(project).unwrap());
        assert!(db.get_issue(id).unwrap().is_none());
    }

    #[test]
    fn deleting_assignee_clears_assignment() {
        let (db, owner, project) = setup();
        let dev = user(&db, "dev", Role::Developer);
        let id = issue(&db, project, "A", owner);
        db.update_issue(id, &IssueChanges { assignee_id: Some(Some(dev)), ..Default::default() }, owner)
            .unwrap();

        db.delete_user(dev).unwrap();
        let view = db.get_issue(id).unwrap().unwrap();
        assert!(view.assignee.is_none());
    }
}
