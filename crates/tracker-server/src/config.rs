use std::path::PathBuf;

use anyhow::{Context, bail};

use tracker_gateway::CommentDeleteScope;

/// Secrets that ship in sample `.env` files and must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["", "secret", "changeme", "change-me", "dev-secret-change-me"];

/// Credentials for seeding the single main admin on first start.
#[derive(Debug, Clone)]
pub struct AdminBootstrap {
    pub username: String,
    pub email: String,
    pub password: String,
    pub fullname: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
    pub comment_delete_scope: CommentDeleteScope,
    pub admin: Option<AdminBootstrap>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = var("TRACKER_JWT_SECRET").context("TRACKER_JWT_SECRET must be set")?;
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("TRACKER_JWT_SECRET is a placeholder value; set a real secret");
        }

        let port = match var("TRACKER_PORT") {
            Some(p) => p.parse().context("TRACKER_PORT must be a port number")?,
            None => 3000,
        };

        let ttl_hours: i64 = match var("TRACKER_TOKEN_TTL_HOURS") {
            Some(h) => h.parse().context("TRACKER_TOKEN_TTL_HOURS must be an integer")?,
            None => 24,
        };
        if ttl_hours <= 0 {
            bail!("TRACKER_TOKEN_TTL_HOURS must be positive");
        }

        let comment_delete_scope = match var("TRACKER_COMMENT_DELETE_SCOPE") {
            Some(s) => s.parse().map_err(|e| anyhow::anyhow!("{}", e))?,
            None => CommentDeleteScope::default(),
        };

        let admin = match (
            var("TRACKER_ADMIN_USERNAME"),
            var("TRACKER_ADMIN_EMAIL"),
            var("TRACKER_ADMIN_PASSWORD"),
        ) {
            (Some(username), Some(email), Some(password)) => Some(AdminBootstrap {
                fullname: var("TRACKER_ADMIN_FULLNAME").unwrap_or_else(|| username.clone()),
                username,
                email,
                password,
            }),
            (None, None, None) => None,
            _ => bail!(
                "TRACKER_ADMIN_USERNAME, TRACKER_ADMIN_EMAIL and TRACKER_ADMIN_PASSWORD go together"
            ),
        };

        Ok(Self {
            host: var("TRACKER_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: PathBuf::from(var("TRACKER_DB_PATH").unwrap_or_else(|| "tracker.db".into())),
            jwt_secret,
            token_ttl: chrono::Duration::hours(ttl_hours),
            comment_delete_scope,
            admin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&[("TRACKER_JWT_SECRET", "s3cr3t-value")]).unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.db_path, PathBuf::from("tracker.db"));
        assert_eq!(cfg.token_ttl, chrono::Duration::hours(24));
        assert_eq!(cfg.comment_delete_scope, CommentDeleteScope::Scoped);
        assert!(cfg.admin.is_none());
    }

    #[test]
    fn secret_is_required_and_not_a_placeholder() {
        assert!(load(&[]).is_err());
        assert!(load(&[("TRACKER_JWT_SECRET", "dev-secret-change-me")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = load(&[
            ("TRACKER_JWT_SECRET", "s3cr3t-value"),
            ("TRACKER_PORT", "8080"),
            ("TRACKER_TOKEN_TTL_HOURS", "2"),
            ("TRACKER_COMMENT_DELETE_SCOPE", "global"),
        ])
        .unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.token_ttl, chrono::Duration::hours(2));
        assert_eq!(cfg.comment_delete_scope, CommentDeleteScope::Global);

        assert!(load(&[("TRACKER_JWT_SECRET", "s3cr3t-value"), ("TRACKER_PORT", "http")]).is_err());
        assert!(load(&[("TRACKER_JWT_SECRET", "s3cr3t-value"), ("TRACKER_TOKEN_TTL_HOURS", "0")]).is_err());
    }

    #[test]
    fn admin_bootstrap_needs_all_credentials() {
        let cfg = load(&[
            ("TRACKER_JWT_SECRET", "s3cr3t-value"),
            ("TRACKER_ADMIN_USERNAME", "root"),
            ("TRACKER_ADMIN_EMAIL", "root@example.com"),
            ("TRACKER_ADMIN_PASSWORD", "hunter2hunter2"),
        ])
        .unwrap();
        let admin = cfg.admin.unwrap();
        assert_eq!(admin.fullname, "root");

        assert!(load(&[("TRACKER_JWT_SECRET", "s3cr3t-value"), ("TRACKER_ADMIN_USERNAME", "root")]).is_err());
    }
}
