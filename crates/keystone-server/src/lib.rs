// HTTP surface of the Keystone account service: axum routes, the JSON error
// envelope, bearer authentication and the generated API documentation.

pub mod cli;
pub mod error;
pub mod extract;
pub mod logging;
pub mod routes;
pub mod schemas;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::{build_router, serve};
pub use state::AppState;
