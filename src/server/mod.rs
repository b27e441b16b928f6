//! Server lifecycle: start/stop handling and the user-facing start state

pub mod error;
pub mod handler;
pub mod model;

pub use error::StartError;
pub use handler::ServerHandler;
pub use model::ServerModel;
