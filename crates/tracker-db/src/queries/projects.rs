use rusqlite::{Connection, Row, params};
use tracker_types::models::{MemberRole, MemberView, ProjectView};

use super::{OptionalExt, now, parse_col, summary_at};
use crate::models::{NewProject, ProjectChanges, ProjectRef};
use crate::{Database, Result};

const PROJECT_SELECT: &str = "SELECT p.id, p.name, p.description, p.created_by, p.start_date, p.end_date,
            p.created_at, p.updated_at, u.id, u.username, u.fullname, u.role
     FROM projects p
     JOIN users u ON u.id = p.created_by";

const MEMBER_SELECT: &str = "SELECT m.id, m.project_id, m.user_id, m.role, m.created_at,
            u.id, u.username, u.fullname, u.role
     FROM project_members m
     JOIN users u ON u.id = m.user_id";

fn map_project(row: &Row<'_>) -> rusqlite::Result<ProjectView> {
    Ok(ProjectView {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_by: row.get(3)?,
        start_date: row.get(4)?,
        end_date: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        creator: summary_at(row, 8)?,
        members: Vec::new(),
    })
}

fn map_member(row: &Row<'_>) -> rusqlite::Result<MemberView> {
    Ok(MemberView {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        role: parse_col(row, 3)?,
        created_at: row.get(4)?,
        user: summary_at(row, 5)?,
    })
}

fn query_members(conn: &Connection, project_id: i64) -> Result<Vec<MemberView>> {
    let sql = format!("{} WHERE m.project_id = ?1 ORDER BY m.created_at, m.id", MEMBER_SELECT);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([project_id], map_member)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn with_members(conn: &Connection, mut projects: Vec<ProjectView>) -> Result<Vec<ProjectView>> {
    for project in &mut projects {
        project.members = query_members(conn, project.id)?;
    }
    Ok(projects)
}

impl Database {
    // -- Projects --

    /// Inserts the project and records the creator as its project manager.
    pub fn insert_project_with_owner(&self, new: &NewProject<'_>) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let at = now();
            tx.execute(
                "INSERT INTO projects (name, description, created_by, start_date, end_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    new.name,
                    new.description,
                    new.created_by,
                    new.start_date,
                    new.end_date,
                    at
                ],
            )?;
            let project_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO project_members (project_id, user_id, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![
                    project_id,
                    new.created_by,
                    MemberRole::ProjectManager.as_str(),
                    at
                ],
            )?;
            tx.commit()?;
            Ok(project_id)
        })
    }

    pub fn get_project(&self, id: i64) -> Result<Option<ProjectView>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE p.id = ?1 AND p.deleted_at IS NULL", PROJECT_SELECT);
            let project = conn.query_row(&sql, [id], map_project).optional()?;
            match project {
                Some(mut project) => {
                    project.members = query_members(conn, project.id)?;
                    Ok(Some(project))
                }
                None => Ok(None),
            }
        })
    }

    pub fn project_ref(&self, id: i64) -> Result<Option<ProjectRef>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, created_by FROM projects WHERE id = ?1 AND deleted_at IS NULL",
                [id],
                |row| {
                    Ok(ProjectRef {
                        id: row.get(0)?,
                        created_by: row.get(1)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectView>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE p.deleted_at IS NULL ORDER BY p.created_at DESC, p.id DESC",
                PROJECT_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let projects = stmt
                .query_map([], map_project)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            with_members(conn, projects)
        })
    }

    /// Projects the user created or holds a membership in.
    pub fn list_projects_for_user(&self, user_id: i64) -> Result<Vec<ProjectView>> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE p.deleted_at IS NULL
                   AND (p.created_by = ?1
                        OR EXISTS (SELECT 1 FROM project_members pm
                                   WHERE pm.project_id = p.id AND pm.user_id = ?1))
                 ORDER BY p.created_at DESC, p.id DESC",
                PROJECT_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let projects = stmt
                .query_map([user_id], map_project)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            with_members(conn, projects)
        })
    }

    pub fn update_project(&self, id: i64, changes: &ProjectChanges) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE projects SET
                    name = COALESCE(?2, name),
                    description = COALESCE(?3, description),
                    start_date = COALESCE(?4, start_date),
                    end_date = COALESCE(?5, end_date),
                    updated_at = ?6
                 WHERE id = ?1 AND deleted_at IS NULL",
                params![
                    id,
                    changes.name,
                    changes.description,
                    changes.start_date,
                    changes.end_date,
                    now()
                ],
            )?;
            Ok(n > 0)
        })
    }

    /// Hard delete; issues, comments and memberships follow by cascade.
    pub fn delete_project(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM projects WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    pub fn project_member_ids(&self, project_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id FROM project_members WHERE project_id = ?1 ORDER BY user_id",
            )?;
            let ids = stmt
                .query_map([project_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<i64>, _>>()?;
            Ok(ids)
        })
    }

    // -- Members --

    pub fn add_member(&self, project_id: i64, user_id: i64, role: MemberRole) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO project_members (project_id, user_id, role, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![project_id, user_id, role.as_str(), now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn member_role(&self, project_id: i64, user_id: i64) -> Result<Option<MemberRole>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT role FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                [project_id, user_id],
                |row| parse_col(row, 0),
            )
            .optional()
        })
    }

    pub fn list_members(&self, project_id: i64) -> Result<Vec<MemberView>> {
        self.with_conn(|conn| query_members(conn, project_id))
    }

    pub fn remove_member(&self, project_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                [project_id, user_id],
            )?;
            Ok(n > 0)
        })
    }

    pub fn set_member_role(&self, project_id: i64, user_id: i64, role: MemberRole) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE project_members SET role = ?3, updated_at = ?4
                 WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id, role.as_str(), now()],
            )?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DbError;
    use crate::queries::test_support::user;
    use tracker_types::models::Role;

    fn project(db: &Database, name: &str, owner: i64) -> i64 {
        db.insert_project_with_owner(&NewProject {
            name,
            description: None,
            start_date: None,
            end_date: None,
            created_by: owner,
        })
        .unwrap()
    }

    #[test]
    fn creator_becomes_project_manager() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "pm", Role::ProjectManager);
        let id = project(&db, "Apollo", owner);

        let view = db.get_project(id).unwrap().unwrap();
        assert_eq!(view.creator.id, owner);
        assert_eq!(view.members.len(), 1);
        assert_eq!(view.members[0].role, MemberRole::ProjectManager);
    }

    #[test]
    fn duplicate_name_is_conflict() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "pm", Role::ProjectManager);
        project(&db, "Apollo", owner);

        let err = db
            .insert_project_with_owner(&NewProject {
                name: "Apollo",
                description: None,
                start_date: None,
                end_date: None,
                created_by: owner,
            })
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
    }

    #[test]
    fn duplicate_member_is_conflict() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "pm", Role::ProjectManager);
        let dev = user(&db, "dev", Role::Developer);
        let id = project(&db, "Apollo", owner);

        db.add_member(id, dev, MemberRole::Developer).unwrap();
        let err = db.add_member(id, dev, MemberRole::Tester).unwrap_err();
        assert!(matches!(err, DbError::Conflict(_)));
        assert_eq!(db.member_role(id, dev).unwrap(), Some(MemberRole::Developer));
    }

    #[test]
    fn member_of_missing_project_is_invalid_reference() {
        let db = Database::open_in_memory().unwrap();
        let dev = user(&db, "dev", Role::Developer);

        let err = db.add_member(999, dev, MemberRole::Developer).unwrap_err();
        assert!(matches!(err, DbError::InvalidReference(_)));
    }

    #[test]
    fn listing_for_user_covers_creator_and_members() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "pm", Role::ProjectManager);
        let dev = user(&db, "dev", Role::Developer);
        let a = project(&db, "A", owner);
        project(&db, "B", owner);
        db.add_member(a, dev, MemberRole::Developer).unwrap();

        assert_eq!(db.list_projects_for_user(owner).unwrap().len(), 2);
        let mine = db.list_projects_for_user(dev).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, a);
    }

    #[test]
    fn update_keeps_unset_fields() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "pm", Role::ProjectManager);
        let id = db
            .insert_project_with_owner(&NewProject {
                name: "Apollo",
                description: Some("moon"),
                start_date: None,
                end_date: None,
                created_by: owner,
            })
            .unwrap();

        let changed = db
            .update_project(
                id,
                &ProjectChanges {
                    name: Some("Artemis".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(changed);

        let view = db.get_project(id).unwrap().unwrap();
        assert_eq!(view.name, "Artemis");
        assert_eq!(view.description.as_deref(), Some("moon"));
    }

    #[test]
    fn deleting_creator_cascades_projects() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "pm", Role::ProjectManager);
        let id = project(&db, "Apollo", owner);

        assert!(db.delete_user(owner).unwrap());
        assert!(db.get_project(id).unwrap().is_none());
        assert!(db.list_members(id).unwrap().is_empty());
    }
}
