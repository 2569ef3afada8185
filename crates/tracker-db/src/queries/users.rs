use rusqlite::{Connection, Row, params};
use tracker_types::models::{Role, UserSummary, UserView};

use super::{OptionalExt, like_pattern, now, parse_col, summary_at};
use crate::models::{Credentials, NewUser};
use crate::{Database, Result};

const USER_COLUMNS: &str =
    "id, username, fullname, email, role, is_active, is_main_admin, created_at, updated_at";

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserView> {
    Ok(UserView {
        id: row.get(0)?,
        username: row.get(1)?,
        fullname: row.get(2)?,
        email: row.get(3)?,
        role: parse_col(row, 4)?,
        is_active: row.get(5)?,
        is_main_admin: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

impl Database {
    // -- Users --

    pub fn create_user(&self, new: &NewUser<'_>) -> Result<i64> {
        self.with_conn(|conn| {
            let at = now();
            conn.execute(
                "INSERT INTO users (username, fullname, email, password, role, is_active, is_main_admin, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    new.username,
                    new.fullname,
                    new.email,
                    new.password_hash,
                    new.role.as_str(),
                    new.is_active,
                    new.is_main_admin,
                    at,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserView>> {
        self.with_conn(|conn| query_user(conn, id))
    }

    pub fn get_credentials_by_username(&self, username: &str) -> Result<Option<Credentials>> {
        self.with_conn(|conn| query_credentials(conn, "username", username))
    }

    pub fn get_credentials_by_email(&self, email: &str) -> Result<Option<Credentials>> {
        self.with_conn(|conn| query_credentials(conn, "email", email))
    }

    /// Admin panel listing, newest first.
    pub fn list_users(&self, only_active: bool) -> Result<Vec<UserView>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users WHERE (?1 = 0 OR is_active = 1) ORDER BY created_at DESC, id DESC",
                USER_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([only_active], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_user_summaries(&self) -> Result<Vec<UserSummary>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, username, fullname, role FROM users ORDER BY username")?;
            let rows = stmt
                .query_map([], |row| summary_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Case-insensitive substring match on fullname or username.
    pub fn search_users(&self, query: &str) -> Result<Vec<UserSummary>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, fullname, role FROM users
                 WHERE fullname LIKE ?1 ESCAPE '\\' OR username LIKE ?1 ESCAPE '\\'
                 ORDER BY username",
            )?;
            let rows = stmt
                .query_map([like_pattern(query)], |row| summary_at(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Which identity field another account already uses, if any.
    /// Email is reported first.
    pub fn find_identity_clash(
        &self,
        username: &str,
        email: &str,
        excluding: Option<i64>,
    ) -> Result<Option<&'static str>> {
        self.with_conn(|conn| {
            let found: Option<(String, String)> = conn
                .query_row(
                    "SELECT username, email FROM users
                     WHERE (email = ?1 OR username = ?2) AND id IS NOT ?3
                     ORDER BY email = ?1 DESC LIMIT 1",
                    params![email, username, excluding],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            Ok(found.map(|(_, found_email)| {
                if found_email == email {
                    "email"
                } else {
                    "username"
                }
            }))
        })
    }

    pub fn update_user_profile(
        &self,
        id: i64,
        fullname: &str,
        username: &str,
        email: &str,
    ) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE users SET fullname = ?2, username = ?3, email = ?4, updated_at = ?5 WHERE id = ?1",
                params![id, fullname, username, email, now()],
            )?;
            Ok(n > 0)
        })
    }

    pub fn set_user_role(&self, id: i64, role: Role) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE users SET role = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, role.as_str(), now()],
            )?;
            Ok(n > 0)
        })
    }

    pub fn set_user_active(&self, id: i64, active: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE users SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, active, now()],
            )?;
            Ok(n > 0)
        })
    }

    /// Cascades to created projects, comments and memberships; clears
    /// issue assignments.
    pub fn delete_user(&self, id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    pub fn main_admin_exists(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE is_main_admin = 1)",
                [],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }
}

fn query_user(conn: &Connection, id: i64) -> Result<Option<UserView>> {
    let sql = format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS);
    conn.query_row(&sql, [id], map_user).optional()
}

fn query_credentials(conn: &Connection, column: &str, value: &str) -> Result<Option<Credentials>> {
    let sql = format!(
        "SELECT {}, password FROM users WHERE {} = ?1",
        USER_COLUMNS, column
    );
    conn.query_row(&sql, [value], |row| {
        Ok(Credentials {
            user: map_user(row)?,
            password_hash: row.get(9)?,
        })
    })
    .optional()
}
