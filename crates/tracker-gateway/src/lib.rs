pub mod connection;
pub mod registry;
pub mod router;
pub mod routing;

pub use connection::{GatewayAuthority, GatewayState, handle_connection};
pub use registry::{ConnectionHandle, ConnectionRegistry, Delivery};
pub use router::RoomRouter;
pub use routing::{CommentDeleteScope, Dispatch, Notice};
