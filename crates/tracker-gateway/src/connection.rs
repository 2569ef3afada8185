use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tracker_types::events::{ClientCommand, ControlFrame};
use tracker_types::rooms::RoomKey;

use crate::registry::Outbox;
use crate::router::RoomRouter;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Identity and room-access decisions the gateway delegates to the
/// application. Both calls may hit the store, so they run on the
/// blocking pool.
pub trait GatewayAuthority: Send + Sync + 'static {
    /// Resolves a bearer token to an active user, or a refusal reason.
    fn identify(&self, token: &str) -> Result<i64, String>;

    /// Whether `user_id` may listen on a project or issue room.
    fn can_join(&self, user_id: i64, room: RoomKey) -> bool;
}

#[derive(Clone)]
pub struct GatewayState {
    pub router: RoomRouter,
    pub authority: Arc<dyn GatewayAuthority>,
}

/// Drives one websocket from handshake to disconnect. Every room the
/// connection joined is released when this returns.
pub async fn handle_connection(socket: WebSocket, state: GatewayState) {
    let registry = state.router.registry().clone();
    let handle = registry.register().await;
    let conn_id = handle.id;
    let outbox = handle.tx;
    let mut room_rx = handle.rx;
    let closed = handle.closed;

    let (mut sender, mut receiver) = socket.split();

    info!("Connection {} opened", conn_id);

    if send_frame(&outbox, &ControlFrame::Ready { connection_id: conn_id }).is_err() {
        registry.deregister(conn_id).await;
        return;
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Room deliveries and our own control frames -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            // Queued frames go out before a server-side close takes effect
            tokio::select! {
                biased;
                frame = room_rx.recv() => {
                    let Some(frame) = frame else { break };
                    if sender.send(Message::Text(frame.as_ref().into())).await.is_err() {
                        break;
                    }
                }
                _ = closed.notified() => {
                    info!("Connection {} closed by the server", conn_id);
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let frame = match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(cmd) => apply_command(&recv_state, conn_id, cmd).await,
                        Err(e) => {
                            warn!(
                                "Connection {} bad command: {} -- raw: {}",
                                conn_id,
                                e,
                                text.chars().take(200).collect::<String>()
                            );
                            ControlFrame::Rejected {
                                reason: "malformed command".into(),
                            }
                        }
                    };
                    if send_frame(&outbox, &frame).is_err() {
                        break;
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.deregister(conn_id).await;
    info!(
        "Connection {} closed ({} live)",
        conn_id,
        registry.connection_count().await
    );
}

fn send_frame(outbox: &Outbox, frame: &ControlFrame) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|e| {
        warn!("Failed to serialize control frame: {}", e);
    })?;
    outbox.send(json.into()).map_err(|_| ())
}

fn rejected(reason: impl Into<String>) -> ControlFrame {
    ControlFrame::Rejected {
        reason: reason.into(),
    }
}

/// Applies one client command and returns the frame to answer with.
pub async fn apply_command(state: &GatewayState, conn_id: Uuid, cmd: ClientCommand) -> ControlFrame {
    let registry = state.router.registry();

    match cmd {
        ClientCommand::Identify { token } => {
            let authority = state.authority.clone();
            let verdict = tokio::task::spawn_blocking(move || authority.identify(&token)).await;
            let user_id = match verdict {
                Ok(Ok(user_id)) => user_id,
                Ok(Err(reason)) => {
                    warn!("Connection {} failed to identify: {}", conn_id, reason);
                    return rejected(reason);
                }
                Err(e) => {
                    warn!("Identify task failed: {}", e);
                    return rejected("identify failed");
                }
            };

            match registry.user_of(conn_id).await {
                Some(current) if current != user_id => {
                    return rejected("connection already identified as another user");
                }
                _ => {}
            }
            registry.authenticate(conn_id, user_id).await;
            info!("Connection {} identified as user {}", conn_id, user_id);
            ControlFrame::Identified { user_id }
        }

        ClientCommand::JoinUser { user_id } => {
            match registry.user_of(conn_id).await {
                Some(current) if current == user_id => {}
                Some(_) => return rejected("cannot join another user's room"),
                None => return rejected("identify first"),
            }
            join(state, conn_id, RoomKey::User(user_id)).await
        }

        ClientCommand::JoinProject { project_id } => {
            guarded_join(state, conn_id, RoomKey::Project(project_id)).await
        }

        ClientCommand::JoinIssue { issue_id } => {
            guarded_join(state, conn_id, RoomKey::Issue(issue_id)).await
        }

        ClientCommand::Leave { room } => {
            if registry.leave(conn_id, room).await {
                debug!("Connection {} left {}", conn_id, room);
                ControlFrame::Left { room }
            } else {
                rejected(format!("not in room {}", room))
            }
        }
    }
}

async fn guarded_join(state: &GatewayState, conn_id: Uuid, room: RoomKey) -> ControlFrame {
    let Some(user_id) = state.router.registry().user_of(conn_id).await else {
        return rejected("identify first");
    };

    let authority = state.authority.clone();
    let allowed = tokio::task::spawn_blocking(move || authority.can_join(user_id, room))
        .await
        .unwrap_or(false);
    if !allowed {
        warn!("User {} denied access to {}", user_id, room);
        return rejected(format!("no access to {}", room));
    }

    join(state, conn_id, room).await
}

async fn join(state: &GatewayState, conn_id: Uuid, room: RoomKey) -> ControlFrame {
    if state.router.registry().join(conn_id, room).await {
        debug!("Connection {} joined {}", conn_id, room);
        ControlFrame::Joined { room }
    } else {
        rejected("connection closed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionRegistry;
    use crate::routing::CommentDeleteScope;

    /// Token "u{id}" identifies user `id`; user 1 may only open project 7
    /// and issue 70.
    struct FakeAuthority;

    impl GatewayAuthority for FakeAuthority {
        fn identify(&self, token: &str) -> Result<i64, String> {
            token
                .strip_prefix('u')
                .and_then(|id| id.parse().ok())
                .ok_or_else(|| "invalid token".to_string())
        }

        fn can_join(&self, user_id: i64, room: RoomKey) -> bool {
            user_id == 1 && matches!(room, RoomKey::Project(7) | RoomKey::Issue(70))
        }
    }

    fn state() -> GatewayState {
        GatewayState {
            router: RoomRouter::new(ConnectionRegistry::new(), CommentDeleteScope::Scoped),
            authority: Arc::new(FakeAuthority),
        }
    }

    fn identify(token: &str) -> ClientCommand {
        ClientCommand::Identify {
            token: token.into(),
        }
    }

    #[tokio::test]
    async fn joins_require_identity() {
        let state = state();
        let conn = state.router.registry().register().await;

        let frame = apply_command(&state, conn.id, ClientCommand::JoinProject { project_id: 7 }).await;
        assert!(matches!(frame, ControlFrame::Rejected { .. }));

        let frame = apply_command(&state, conn.id, identify("u1")).await;
        assert_eq!(frame, ControlFrame::Identified { user_id: 1 });

        let frame = apply_command(&state, conn.id, ClientCommand::JoinProject { project_id: 7 }).await;
        assert_eq!(frame, ControlFrame::Joined { room: RoomKey::Project(7) });
    }

    #[tokio::test]
    async fn board_access_is_checked() {
        let state = state();
        let conn = state.router.registry().register().await;
        apply_command(&state, conn.id, identify("u1")).await;

        let frame = apply_command(&state, conn.id, ClientCommand::JoinProject { project_id: 8 }).await;
        assert!(matches!(frame, ControlFrame::Rejected { .. }));
        let frame = apply_command(&state, conn.id, ClientCommand::JoinIssue { issue_id: 70 }).await;
        assert_eq!(frame, ControlFrame::Joined { room: RoomKey::Issue(70) });
        assert!(state.router.registry().members_of(RoomKey::Project(8)).await.is_empty());
    }

    #[tokio::test]
    async fn personal_room_only_for_self() {
        let state = state();
        let conn = state.router.registry().register().await;
        apply_command(&state, conn.id, identify("u2")).await;

        let frame = apply_command(&state, conn.id, ClientCommand::JoinUser { user_id: 3 }).await;
        assert!(matches!(frame, ControlFrame::Rejected { .. }));
        let frame = apply_command(&state, conn.id, ClientCommand::JoinUser { user_id: 2 }).await;
        assert_eq!(frame, ControlFrame::Joined { room: RoomKey::User(2) });
    }

    #[tokio::test]
    async fn bad_token_and_reidentify_are_rejected() {
        let state = state();
        let conn = state.router.registry().register().await;

        let frame = apply_command(&state, conn.id, identify("garbage")).await;
        assert_eq!(frame, ControlFrame::Rejected { reason: "invalid token".into() });

        apply_command(&state, conn.id, identify("u1")).await;
        let frame = apply_command(&state, conn.id, identify("u2")).await;
        assert!(matches!(frame, ControlFrame::Rejected { .. }));
        assert_eq!(state.router.registry().user_of(conn.id).await, Some(1));
    }

    #[tokio::test]
    async fn leave_reports_membership() {
        let state = state();
        let conn = state.router.registry().register().await;
        apply_command(&state, conn.id, identify("u1")).await;
        apply_command(&state, conn.id, ClientCommand::JoinProject { project_id: 7 }).await;

        let leave = ClientCommand::Leave { room: RoomKey::Project(7) };
        assert_eq!(
            apply_command(&state, conn.id, leave.clone()).await,
            ControlFrame::Left { room: RoomKey::Project(7) }
        );
        assert!(matches!(
            apply_command(&state, conn.id, leave).await,
            ControlFrame::Rejected { .. }
        ));
    }
}
