//! Error types for the SMTP server

use thiserror::Error;

use crate::smtp::handler::HandlerError;
use crate::smtp::response::SmtpResponse;

#[derive(Error, Debug)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid command")]
    InvalidCommand,

    #[error("Invalid state for command")]
    InvalidState(String),

    #[error("Invalid syntax")]
    InvalidSyntax(String),

    #[error("Line too long (max {max} characters)")]
    LineTooLong { max: usize },

    #[error("Path too long (max {max} characters)")]
    PathTooLong { max: usize },

    #[error("Too many recipients (max {max})")]
    TooManyRecipients { max: usize },

    #[error("Too much mail data (max {max} bytes)")]
    TooMuchData { max: usize },

    #[error("Domain name too long (max {max} characters)")]
    DomainTooLong { max: usize },

    #[error("User name too long (max {max} characters)")]
    UserTooLong { max: usize },

    #[error("Message handler failed: {0}")]
    Handler(#[from] HandlerError),
}

/// Failure to open the listening socket, as reported by [`SmtpServer::bind`].
///
/// [`SmtpServer::bind`]: crate::smtp::SmtpServer::bind
#[derive(Error, Debug)]
pub enum ListenError {
    #[error("Port {port} is out of range")]
    PortOutOfRange { port: i32 },

    #[error("Cannot bind socket: {0}")]
    Bind(#[source] std::io::Error),

    #[error("Cannot start listener: {0}")]
    Other(#[source] std::io::Error),
}

impl ListenError {
    /// Sort an I/O failure from `bind` into bind-related and other errors
    pub fn from_bind_error(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::AddrInUse | ErrorKind::AddrNotAvailable | ErrorKind::PermissionDenied => {
                ListenError::Bind(error)
            }
            _ => ListenError::Other(error),
        }
    }
}

/// SMTP size limits as defined in RFC 821
pub struct SmtpLimits;

impl SmtpLimits {
    /// Maximum length of a user name
    pub const USER_MAX_LENGTH: usize = 64;

    /// Maximum length of a domain name
    pub const DOMAIN_MAX_LENGTH: usize = 64;

    /// Maximum length of a path (reverse-path or forward-path)
    pub const PATH_MAX_LENGTH: usize = 256;

    /// Maximum length of a command line including CRLF
    pub const COMMAND_LINE_MAX_LENGTH: usize = 512;

    /// Maximum length of a reply line including CRLF
    pub const REPLY_LINE_MAX_LENGTH: usize = 512;

    /// Maximum length of a text line including CRLF
    pub const TEXT_LINE_MAX_LENGTH: usize = 1000;

    /// Maximum number of recipients per message
    pub const MAX_RECIPIENTS: usize = 100;

    /// Maximum total size of email data
    pub const MAX_DATA_SIZE: usize = 10 * 1024 * 1024; // 10MB
}

impl SmtpError {
    /// Reply code sent to the client for this error
    pub fn code(&self) -> &'static str {
        match self {
            SmtpError::Io(_) => "421",
            SmtpError::InvalidCommand | SmtpError::LineTooLong { .. } => "500",
            SmtpError::InvalidSyntax(_)
            | SmtpError::PathTooLong { .. }
            | SmtpError::DomainTooLong { .. }
            | SmtpError::UserTooLong { .. } => "501",
            SmtpError::InvalidState(_) => "503",
            SmtpError::TooManyRecipients { .. } | SmtpError::TooMuchData { .. } => "552",
            SmtpError::Handler(_) => "451",
        }
    }

    /// Reply text sent to the client for this error
    pub fn reply_text(&self) -> String {
        match self {
            SmtpError::Io(_) => "Service not available".to_string(),
            SmtpError::InvalidCommand => "Syntax error, command unrecognized".to_string(),
            SmtpError::InvalidState(msg) => format!("Bad sequence of commands: {msg}"),
            SmtpError::InvalidSyntax(msg) => format!("Syntax error: {msg}"),
            SmtpError::Handler(_) => "Requested action aborted: local error".to_string(),
            // limit errors reuse their display text
            _ => self.to_string(),
        }
    }

    pub fn to_response(&self) -> SmtpResponse {
        SmtpResponse::new(self.code(), self.reply_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_bind_errors_are_classified() {
        let in_use = ListenError::from_bind_error(Error::from(ErrorKind::AddrInUse));
        assert!(matches!(in_use, ListenError::Bind(_)));

        let denied = ListenError::from_bind_error(Error::from(ErrorKind::PermissionDenied));
        assert!(matches!(denied, ListenError::Bind(_)));

        let other = ListenError::from_bind_error(Error::from(ErrorKind::Unsupported));
        assert!(matches!(other, ListenError::Other(_)));
    }

    #[test]
    fn test_limit_errors_reply_with_their_text() {
        let error = SmtpError::TooManyRecipients { max: 100 };
        assert_eq!(error.code(), "552");
        assert_eq!(error.reply_text(), "Too many recipients (max 100)");

        let error = SmtpError::LineTooLong { max: 512 };
        assert_eq!(error.code(), "500");
        assert_eq!(error.reply_text(), "Line too long (max 512 characters)");
    }

    #[test]
    fn test_handler_error_response() {
        let error = SmtpError::from(HandlerError::InvalidState("body twice"));
        let response = error.to_response();
        assert_eq!(response.code, "451");
        assert_eq!(response.message, "Requested action aborted: local error");
    }
}
