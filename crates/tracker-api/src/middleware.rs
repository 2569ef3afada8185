use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use tracing::{error, info};

use tracker_gateway::GatewayAuthority;
use tracker_types::rooms::RoomKey;

use crate::access::{self, Action, ResourceRef};
use crate::auth::authenticate_token;
use crate::error::ApiError;
use crate::state::{AppState, blocking};

/// Extract and validate the bearer token, then load the caller as an
/// [`access::Actor`] request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?
        .to_string();

    let actor = blocking(&state, move |s| authenticate_token(&s.db, &s.jwt_secret, &token)).await?;

    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

/// Lets the websocket gateway use the same token and board rules as HTTP.
pub struct TokenAuthority {
    state: AppState,
}

impl TokenAuthority {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl GatewayAuthority for TokenAuthority {
    fn identify(&self, token: &str) -> Result<i64, String> {
        authenticate_token(&self.state.db, &self.state.jwt_secret, token)
            .map(|actor| actor.id())
            .map_err(|e| e.to_string())
    }

    fn can_join(&self, user_id: i64, room: RoomKey) -> bool {
        let r = match room {
            RoomKey::Project(id) => ResourceRef::project(id),
            RoomKey::Issue(id) => ResourceRef::issue(id),
            RoomKey::User(_) | RoomKey::Global => return false,
        };

        let actor = match self.state.db.get_user(user_id) {
            Ok(Some(user)) if user.is_active => access::Actor { user },
            _ => return false,
        };
        access::check(&self.state.db, &actor, Action::ViewBoard, r).is_ok()
    }
}

/// Re-checks the board rooms `user_id` is listening on and evicts the
/// user's connections from any they may no longer view.
pub async fn prune_rooms(state: &AppState, user_id: i64) {
    let registry = state.router.registry();
    let boards: Vec<RoomKey> = registry
        .rooms_of_user(user_id)
        .await
        .into_iter()
        .filter(|room| matches!(room, RoomKey::Project(_) | RoomKey::Issue(_)))
        .collect();
    if boards.is_empty() {
        return;
    }

    let authority = TokenAuthority::new(state.clone());
    let denied = tokio::task::spawn_blocking(move || {
        boards
            .into_iter()
            .filter(|room| !authority.can_join(user_id, *room))
            .collect::<Vec<_>>()
    })
    .await;

    match denied {
        Ok(rooms) => {
            for room in rooms {
                let evicted = registry.evict_user(user_id, room).await;
                info!("User {} lost access to {} ({} connections)", user_id, room, evicted);
            }
        }
        Err(e) => error!("spawn_blocking join error: {}", e),
    }
}
