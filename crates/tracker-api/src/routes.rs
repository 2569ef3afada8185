use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
};

use tracker_gateway::{GatewayState, handle_connection};

use crate::middleware::{TokenAuthority, require_auth};
use crate::state::AppState;
use crate::{auth, comments, issues, members, projects, recovery, users};

/// Base64 inflates attachments by a third; leave headroom for the JSON.
const BODY_LIMIT: usize = comments::MAX_ATTACHMENT_BYTES * 3 / 2;

/// REST routes plus the `/gateway` websocket.
pub fn build_router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/reset/verify-code", post(recovery::verify))
        .route("/auth/reset/set-new-password", post(recovery::reset))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/security-code", get(recovery::get_code).post(recovery::put_code))
        // Projects and membership
        .route("/projects", get(projects::list).post(projects::create))
        .route(
            "/projects/{project_id}",
            get(projects::get).patch(projects::update).delete(projects::delete),
        )
        .route(
            "/projects/{project_id}/members",
            get(members::list).post(members::add),
        )
        .route("/projects/{project_id}/members/{user_id}", axum::routing::delete(members::remove))
        .route("/projects/{project_id}/members/{user_id}/role", patch(members::change_role))
        // Issues
        .route(
            "/projects/{project_id}/issues",
            get(issues::list).post(issues::create),
        )
        .route(
            "/projects/{project_id}/issues/{issue_id}",
            get(issues::get).patch(issues::update).delete(issues::delete),
        )
        .route("/projects/{project_id}/issues/{issue_id}/move", patch(issues::move_status))
        .route("/issues/{issue_id}/history", get(issues::history))
        // Comments
        .route(
            "/issues/{issue_id}/comments",
            get(comments::list).post(comments::create),
        )
        .route("/comments/mine", get(comments::mine))
        .route(
            "/comments/{comment_id}",
            get(comments::get).patch(comments::update).delete(comments::delete),
        )
        .route("/attachments/{attachment_id}", get(comments::download_attachment))
        // Users
        .route("/users/directory", get(users::list_directory))
        .route("/users/search", get(users::search_directory))
        .route("/admin/users", get(users::list).post(users::create))
        .route(
            "/admin/users/{user_id}",
            get(users::get).patch(users::update).delete(users::delete),
        )
        .route("/admin/users/{user_id}/role", patch(users::update_role))
        .route("/admin/users/{user_id}/active", patch(users::update_active))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let gateway = GatewayState {
        router: state.router.clone(),
        authority: Arc::new(TokenAuthority::new(state)),
    };
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}
