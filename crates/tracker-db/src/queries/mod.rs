mod comments;
mod issues;
mod projects;
mod security_codes;
mod users;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use tracker_types::models::UserSummary;

use crate::Result;

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Reads a TEXT column into one of the wire enums.
pub(crate) fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Like `parse_col` for nullable columns.
pub(crate) fn parse_opt_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

/// Maps `id, username, fullname, role` starting at `offset`.
pub(crate) fn summary_at(row: &Row<'_>, offset: usize) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: row.get(offset)?,
        username: row.get(offset + 1)?,
        fullname: row.get(offset + 2)?,
        role: parse_col(row, offset + 3)?,
    })
}

/// Escapes LIKE wildcards so user input matches literally.
pub(crate) fn like_pattern(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 2);
    out.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use tracker_types::models::Role;

    use crate::Database;
    use crate::models::NewUser;

    pub fn user(db: &Database, username: &str, role: Role) -> i64 {
        db.create_user(&NewUser {
            username,
            fullname: username,
            email: &format!("{}@example.com", username),
            password_hash: "x",
            role,
            is_active: true,
            is_main_admin: false,
        })
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::like_pattern;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("ay"), "%ay%");
        assert_eq!(like_pattern("50%_"), "%50\\%\\_%");
    }
}
