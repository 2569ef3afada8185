mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tracker_api::auth::hash_password;
use tracker_api::{AppState, AppStateInner, build_router};
use tracker_db::Database;
use tracker_db::models::NewUser;
use tracker_gateway::{ConnectionRegistry, RoomRouter};
use tracker_types::models::Role;

use crate::config::{AdminBootstrap, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tracker=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Database::open(&config.db_path)
        .with_context(|| format!("opening database at {}", config.db_path.display()))?;
    match &config.admin {
        Some(admin) => seed_main_admin(&db, admin)?,
        None => {
            if !db.main_admin_exists()? {
                warn!("No main admin exists and TRACKER_ADMIN_* is not set");
            }
        }
    }

    // Shared state
    let registry = ConnectionRegistry::new();
    let router = RoomRouter::new(registry, config.comment_delete_scope);
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        token_ttl: config.token_ttl,
        router,
    });

    let app = build_router(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(
        "Tracker server listening on {} (comment deletes: {:?})",
        addr, config.comment_delete_scope
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Creates the main admin once; later starts leave the account alone.
fn seed_main_admin(db: &Database, admin: &AdminBootstrap) -> anyhow::Result<()> {
    if db.main_admin_exists()? {
        return Ok(());
    }

    let password_hash = hash_password(&admin.password)?;
    let email = admin.email.trim().to_lowercase();
    let id = db
        .create_user(&NewUser {
            username: admin.username.trim(),
            fullname: admin.fullname.trim(),
            email: &email,
            password_hash: &password_hash,
            role: Role::Admin,
            is_active: true,
            is_main_admin: true,
        })
        .context("creating the main admin")?;

    info!("Main admin {} created (id {})", admin.username, id);
    Ok(())
}
