use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            username        TEXT NOT NULL UNIQUE,
            fullname        TEXT NOT NULL,
            email           TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            role            TEXT NOT NULL DEFAULT 'user'
                CHECK (role IN ('admin', 'admin_helper', 'project_manager',
                                'team_lead', 'developer', 'tester', 'user')),
            is_active       INTEGER NOT NULL DEFAULT 1,
            is_main_admin   INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        -- At most one main admin
        CREATE UNIQUE INDEX IF NOT EXISTS idx_users_main_admin
            ON users(is_main_admin) WHERE is_main_admin = 1;

        CREATE TABLE IF NOT EXISTS projects (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE,
            description TEXT,
            created_by  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            start_date  TEXT,
            end_date    TEXT,
            deleted_at  TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS project_members (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id  INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            role        TEXT NOT NULL DEFAULT 'developer'
                CHECK (role IN ('developer', 'tester', 'project_manager', 'team_lead')),
            is_active   INTEGER NOT NULL DEFAULT 1,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(project_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_project_members_user
            ON project_members(user_id);

        CREATE TABLE IF NOT EXISTS issues (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id  INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
            title       TEXT NOT NULL,
            description TEXT,
            status      TEXT NOT NULL DEFAULT 'todo'
                CHECK (status IN ('todo', 'in_progress', 'done', 'blocked')),
            priority    TEXT NOT NULL DEFAULT 'medium'
                CHECK (priority IN ('low', 'medium', 'high')),
            assignee_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created_by  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            due_date    TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(project_id, title)
        );

        CREATE TRIGGER IF NOT EXISTS trg_issues_project_immutable
            BEFORE UPDATE OF project_id ON issues
            WHEN NEW.project_id IS NOT OLD.project_id
        BEGIN
            SELECT RAISE(ABORT, 'issue project_id is immutable');
        END;

        CREATE TABLE IF NOT EXISTS comments (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            issue_id    INTEGER NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
            user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content     TEXT NOT NULL,
            metadata    TEXT,
            is_edited   INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_comments_issue
            ON comments(issue_id, created_at);

        CREATE TRIGGER IF NOT EXISTS trg_comments_issue_immutable
            BEFORE UPDATE OF issue_id ON comments
            WHEN NEW.issue_id IS NOT OLD.issue_id
        BEGIN
            SELECT RAISE(ABORT, 'comment issue_id is immutable');
        END;

        CREATE TABLE IF NOT EXISTS comment_attachments (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            comment_id  INTEGER NOT NULL UNIQUE REFERENCES comments(id) ON DELETE CASCADE,
            filename    TEXT NOT NULL,
            mimetype    TEXT NOT NULL,
            size        INTEGER NOT NULL,
            data        BLOB NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS issue_history (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            issue_id    INTEGER NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
            changed_by  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            field       TEXT NOT NULL,
            old_value   TEXT,
            new_value   TEXT NOT NULL,
            changed_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_issue_history_issue
            ON issue_history(issue_id, changed_at);

        -- One recovery code per user, stored as an argon2 hash
        CREATE TABLE IF NOT EXISTS security_codes (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     INTEGER NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
            code_hash   TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
