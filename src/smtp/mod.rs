//! Bundled SMTP session driver and listener

pub mod commands;
pub mod error;
pub mod handler;
pub mod response;
pub mod server;
pub mod session;

pub use error::{ListenError, SmtpError, SmtpLimits};
pub use handler::{HandlerError, MessageHandler, MessageHandlerFactory, Rejection};
pub use response::SmtpResponse;
pub use server::SmtpServer;
pub use commands::Command;
pub use session::{SmtpSession, SmtpState};
