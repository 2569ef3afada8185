pub mod access;
pub mod auth;
pub mod comments;
pub mod error;
pub mod issues;
pub mod members;
pub mod middleware;
pub mod projects;
pub mod recovery;
pub mod routes;
pub mod state;
pub mod users;

pub use error::ApiError;
pub use routes::build_router;
pub use state::{AppState, AppStateInner};
