use rusqlite::params;

use super::{OptionalExt, now};
use crate::models::SecurityCode;
use crate::{Database, Result};

impl Database {
    // -- Security codes --

    /// Creates or replaces the user's code.
    pub fn set_security_code(&self, user_id: i64, code_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO security_codes (user_id, code_hash, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(user_id) DO UPDATE
                     SET code_hash = excluded.code_hash, updated_at = excluded.updated_at",
                params![user_id, code_hash, now()],
            )?;
            Ok(())
        })
    }

    pub fn get_security_code(&self, user_id: i64) -> Result<Option<SecurityCode>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT user_id, code_hash, updated_at FROM security_codes WHERE user_id = ?1",
                [user_id],
                |row| {
                    Ok(SecurityCode {
                        user_id: row.get(0)?,
                        code_hash: row.get(1)?,
                        updated_at: row.get(2)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn set_password_hash(&self, user_id: i64, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE users SET password = ?2, updated_at = ?3 WHERE id = ?1",
                params![user_id, password_hash, now()],
            )?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use tracker_types::models::Role;

    use crate::queries::test_support::user;
    use crate::{Database, DbError};

    #[test]
    fn code_is_replaced_not_duplicated() {
        let db = Database::open_in_memory().unwrap();
        let id = user(&db, "selin", Role::Developer);
        assert!(db.get_security_code(id).unwrap().is_none());

        db.set_security_code(id, "hash-1").unwrap();
        db.set_security_code(id, "hash-2").unwrap();
        let code = db.get_security_code(id).unwrap().unwrap();
        assert_eq!(code.user_id, id);
        assert_eq!(code.code_hash, "hash-2");

        let rows: i64 = db
            .with_conn(|c| Ok(c.query_row("SELECT COUNT(*) FROM security_codes", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn code_goes_with_its_user() {
        let db = Database::open_in_memory().unwrap();
        let id = user(&db, "selin", Role::Developer);
        db.set_security_code(id, "hash").unwrap();
        db.delete_user(id).unwrap();
        assert!(db.get_security_code(id).unwrap().is_none());

        assert!(matches!(
            db.set_security_code(9999, "hash"),
            Err(DbError::InvalidReference(_))
        ));
    }

    #[test]
    fn password_hash_is_replaced() {
        let db = Database::open_in_memory().unwrap();
        let id = user(&db, "selin", Role::Developer);
        assert!(db.set_password_hash(id, "new-hash").unwrap());
        let creds = db.get_credentials_by_username("selin").unwrap().unwrap();
        assert_eq!(creds.password_hash, "new-hash");
        assert!(!db.set_password_hash(9999, "x").unwrap());
    }
}
