use rusqlite::{Connection, Row, Transaction, params};
use tracker_types::models::{AttachmentMeta, CommentView};

use super::{OptionalExt, now, parse_opt_col, summary_at};
use crate::models::{AttachmentBlob, AttachmentChange, CommentRef, NewAttachment, NewComment};
use crate::{Database, Result};

const COMMENT_SELECT: &str = "SELECT c.id, c.issue_id, i.project_id, c.content, c.metadata, c.is_edited,
            c.created_at, c.updated_at,
            u.id, u.username, u.fullname, u.role,
            pm.role,
            a.id, a.filename, a.mimetype, a.size
     FROM comments c
     JOIN users u ON u.id = c.user_id
     LEFT JOIN issues i ON i.id = c.issue_id
     LEFT JOIN project_members pm ON pm.project_id = i.project_id AND pm.user_id = c.user_id
     LEFT JOIN comment_attachments a ON a.comment_id = c.id";

fn map_comment(row: &Row<'_>) -> rusqlite::Result<CommentView> {
    let metadata: Option<serde_json::Value> = row.get(4)?;
    let attachment_id: Option<i64> = row.get(13)?;
    let attachment = match attachment_id {
        Some(id) => Some(AttachmentMeta {
            id,
            filename: row.get(14)?,
            mimetype: row.get(15)?,
            size: row.get(16)?,
        }),
        None => None,
    };

    Ok(CommentView {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        project_id: row.get(2)?,
        content: row.get(3)?,
        metadata,
        is_edited: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        author: summary_at(row, 8)?,
        project_role: parse_opt_col(row, 12)?,
        attachment,
    })
}

fn query_comments(conn: &Connection, filter: &str, order: &str, id: i64) -> Result<Vec<CommentView>> {
    let sql = format!("{} WHERE {} ORDER BY {}", COMMENT_SELECT, filter, order);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([id], map_comment)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn insert_attachment(tx: &Transaction<'_>, comment_id: i64, att: &NewAttachment) -> Result<()> {
    tx.execute(
        "INSERT INTO comment_attachments (comment_id, filename, mimetype, size, data, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            comment_id,
            att.filename,
            att.mimetype,
            att.data.len() as i64,
            att.data,
            now()
        ],
    )?;
    Ok(())
}

impl Database {
    // -- Comments --

    pub fn insert_comment(
        &self,
        new: &NewComment<'_>,
        attachment: Option<&NewAttachment>,
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let at = now();
            tx.execute(
                "INSERT INTO comments (issue_id, user_id, content, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![new.issue_id, new.user_id, new.content, new.metadata, at],
            )?;
            let id = tx.last_insert_rowid();
            if let Some(att) = attachment {
                insert_attachment(&tx, id, att)?;
            }
            tx.commit()?;
            Ok(id)
        })
    }

    pub fn get_comment(&self, id: i64) -> Result<Option<CommentView>> {
        self.with_conn(|conn| {
            let sql = format!("{} WHERE c.id = ?1", COMMENT_SELECT);
            conn.query_row(&sql, [id], map_comment).optional()
        })
    }

    pub fn comment_ref(&self, id: i64) -> Result<Option<CommentRef>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT c.id, c.issue_id, c.user_id, i.project_id
                 FROM comments c
                 LEFT JOIN issues i ON i.id = c.issue_id
                 WHERE c.id = ?1",
                [id],
                |row| {
                    Ok(CommentRef {
                        id: row.get(0)?,
                        issue_id: row.get(1)?,
                        user_id: row.get(2)?,
                        project_id: row.get(3)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Thread order: oldest first.
    pub fn list_comments(&self, issue_id: i64) -> Result<Vec<CommentView>> {
        self.with_conn(|conn| query_comments(conn, "c.issue_id = ?1", "c.created_at, c.id", issue_id))
    }

    /// Newest first.
    pub fn list_comments_by_author(&self, user_id: i64) -> Result<Vec<CommentView>> {
        self.with_conn(|conn| {
            query_comments(conn, "c.user_id = ?1", "c.created_at DESC, c.id DESC", user_id)
        })
    }

    /// Rewrites content and metadata, applies the attachment change and
    /// marks the comment edited.
    pub fn update_comment(
        &self,
        id: i64,
        content: &str,
        metadata: Option<&serde_json::Value>,
        attachment: &AttachmentChange,
    ) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let n = tx.execute(
                "UPDATE comments SET content = ?2, metadata = COALESCE(?3, metadata),
                    is_edited = 1, updated_at = ?4
                 WHERE id = ?1",
                params![id, content, metadata, now()],
            )?;
            if n == 0 {
                return Ok(false);
            }

            match attachment {
                AttachmentChange::Keep => {}
                AttachmentChange::Remove => {
                    tx.execute("DELETE FROM comment_attachments WHERE comment_id = ?1", [id])?;
                }
                AttachmentChange::Replace(att) => {
                    tx.execute("DELETE FROM comment_attachments WHERE comment_id = ?1", [id])?;
                    insert_attachment(&tx, id, att)?;
                }
            }

            tx.commit()?;
            Ok(true)
        })
    }

    pub fn delete_comment(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM comments WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    pub fn get_attachment(&self, id: i64) -> Result<Option<AttachmentBlob>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT id, comment_id, filename, mimetype, data
                 FROM comment_attachments WHERE id = ?1",
                [id],
                |row| {
                    Ok(AttachmentBlob {
                        id: row.get(0)?,
                        comment_id: row.get(1)?,
                        filename: row.get(2)?,
                        mimetype: row.get(3)?,
                        data: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewIssue, NewProject};
    use crate::queries::test_support::user;
    use tracker_types::models::{IssuePriority, IssueStatus, MemberRole, Role};

    struct Fixture {
        db: Database,
        owner: i64,
        project: i64,
        issue: i64,
    }

    fn setup() -> Fixture {
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
        let issue = db
            .insert_issue(&NewIssue {
                project_id: project,
                title: "Login bug",
                description: None,
                status: IssueStatus::Todo,
                priority: IssuePriority::High,
                due_date: None,
                assignee_id: None,
                created_by: owner,
            })
            .unwrap();
        Fixture { db, owner, project, issue }
    }

    fn comment(f: &Fixture, content: &str, attachment: Option<&NewAttachment>) -> i64 {
        f.db.insert_comment(
            &NewComment {
                issue_id: f.issue,
                user_id: f.owner,
                content,
                metadata: None,
            },
            attachment,
        )
        .unwrap()
    }

    #[test]
    fn comment_carries_project_and_role() {
        let f = setup();
        let id = comment(&f, "first", None);

        let view = f.db.get_comment(id).unwrap().unwrap();
        assert_eq!(view.project_id, Some(f.project));
        assert_eq!(view.project_role, Some(MemberRole::ProjectManager));
        assert!(!view.is_edited);
        assert!(view.attachment.is_none());

        let r = f.db.comment_ref(id).unwrap().unwrap();
        assert_eq!(r.issue_id, f.issue);
        assert_eq!(r.project_id, Some(f.project));
    }

    #[test]
    fn attachment_is_stored_and_replaced() {
        let f = setup();
        let first = NewAttachment {
            filename: "a.txt".into(),
            mimetype: "text/plain".into(),
            data: b"hello".to_vec(),
        };
        let id = comment(&f, "with file", Some(&first));

        let meta = f.db.get_comment(id).unwrap().unwrap().attachment.unwrap();
        assert_eq!(meta.size, 5);
        let blob = f.db.get_attachment(meta.id).unwrap().unwrap();
        assert_eq!(blob.data, b"hello");
        assert_eq!(blob.comment_id, id);

        let second = NewAttachment {
            filename: "b.png".into(),
            mimetype: "image/png".into(),
            data: vec![1, 2, 3],
        };
        assert!(
            f.db.update_comment(id, "edited", None, &AttachmentChange::Replace(second))
                .unwrap()
        );
        let view = f.db.get_comment(id).unwrap().unwrap();
        assert!(view.is_edited);
        assert_eq!(view.content, "edited");
        assert_eq!(view.attachment.unwrap().filename, "b.png");
        assert!(f.db.get_attachment(meta.id).unwrap().is_none());

        f.db.update_comment(id, "edited", None, &AttachmentChange::Remove)
            .unwrap();
        assert!(f.db.get_comment(id).unwrap().unwrap().attachment.is_none());
    }

    #[test]
    fn metadata_round_trips_as_json() {
        let f = setup();
        let meta = serde_json::json!({"mentions": [1, 2]});
        let id = f
            .db
            .insert_comment(
                &NewComment {
                    issue_id: f.issue,
                    user_id: f.owner,
                    content: "hi",
                    metadata: Some(&meta),
                },
                None,
            )
            .unwrap();
        assert_eq!(f.db.get_comment(id).unwrap().unwrap().metadata, Some(meta));
    }

    #[test]
    fn thread_is_oldest_first() {
        let f = setup();
        let a = comment(&f, "a", None);
        let b = comment(&f, "b", None);

        let ids: Vec<_> = f.db.list_comments(f.issue).unwrap().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![a, b]);
        let mine: Vec<_> = f
            .db
            .list_comments_by_author(f.owner)
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(mine, vec![b, a]);
    }

    #[test]
    fn comment_on_missing_issue_is_invalid_reference() {
        let f = setup();
        let err = f
            .db
            .insert_comment(
                &NewComment {
                    issue_id: 999,
                    user_id: f.owner,
                    content: "x",
                    metadata: None,
                },
                None,
            )
            .unwrap_err();
        assert!(matches!(err, crate::DbError::InvalidReference(_)));
    }

    #[test]
    fn issue_delete_cascades_to_comments() {
        let f = setup();
        let id = comment(&f, "a", None);

        f.db.delete_issue(f.project, f.issue).unwrap();
        assert!(f.db.get_comment(id).unwrap().is_none());
        assert!(!f.db.delete_comment(id).unwrap());
    }
}
