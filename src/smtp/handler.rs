//! Callback contract between the SMTP session driver and message consumers

use std::io::Read;

use thiserror::Error;

/// Reason given back to the client when a handler refuses a message body
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// SMTP reply code, e.g. "554"
    pub code: String,
    /// Human-readable reply text
    pub message: String,
}

impl Rejection {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_owned(),
            message: message.to_owned(),
        }
    }
}

/// Contract violations reported by a handler to the session driver
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid handler state: {0}")]
    InvalidState(&'static str),
}

/// Receives the pieces of one mail transaction, in order.
///
/// The driver calls `set_sender` once, `add_recipient` once per accepted
/// recipient, `receive_body` once with the message content, and finally
/// `complete`, which consumes the handler.
pub trait MessageHandler: Send {
    fn set_sender(&mut self, address: String) -> Result<(), HandlerError>;

    fn add_recipient(&mut self, address: String) -> Result<(), HandlerError>;

    /// Read the full message body. `Some(rejection)` refuses the message.
    fn receive_body(&mut self, body: &mut dyn Read) -> Result<Option<Rejection>, HandlerError>;

    fn complete(self: Box<Self>);
}

/// Creates a fresh [`MessageHandler`] for every mail transaction
pub trait MessageHandlerFactory: Send + Sync {
    fn create(&self) -> Box<dyn MessageHandler>;
}

impl<F> MessageHandlerFactory for F
where
    F: Fn() -> Box<dyn MessageHandler> + Send + Sync,
{
    fn create(&self) -> Box<dyn MessageHandler> {
        self()
    }
}
