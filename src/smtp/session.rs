//! Per-connection SMTP state

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::handler::{MessageHandler, MessageHandlerFactory};
use crate::smtp::response::SmtpResponse;

/// Where the client stands in the command sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpState {
    /// Waiting for HELO
    Initial,
    /// HELO accepted, ready for MAIL
    Greeted,
    /// MAIL accepted, waiting for the first RCPT
    MailFrom,
    /// At least one RCPT accepted
    RcptTo,
    /// Between DATA and the terminating dot
    Data,
}

/// The mail transaction opened by `MAIL FROM`
struct Transaction {
    handler: Box<dyn MessageHandler>,
    sender: String,
    recipients: Vec<String>,
    body: Vec<u8>,
    /// First limit exceeded while reading DATA; reported at the final dot
    failure: Option<SmtpError>,
}

/// State of one SMTP connection.
///
/// Each transaction gets a fresh [`MessageHandler`] from the factory when
/// `MAIL FROM` is accepted. Resetting drops it without completing it.
pub struct SmtpSession {
    state: SmtpState,
    client_domain: Option<String>,
    transaction: Option<Transaction>,
    factory: Arc<dyn MessageHandlerFactory>,
}

impl fmt::Debug for SmtpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSession")
            .field("state", &self.state)
            .field("client_domain", &self.client_domain)
            .field("sender", &self.sender())
            .field("recipients", &self.recipients())
            .field("data_size", &self.data_size())
            .finish_non_exhaustive()
    }
}

impl SmtpSession {
    pub fn new(factory: Arc<dyn MessageHandlerFactory>) -> Self {
        Self {
            state: SmtpState::Initial,
            client_domain: None,
            transaction: None,
            factory,
        }
    }

    pub fn state(&self) -> SmtpState {
        self.state
    }

    pub fn client_domain(&self) -> Option<&str> {
        self.client_domain.as_deref()
    }

    pub fn sender(&self) -> Option<&str> {
        self.transaction.as_ref().map(|t| t.sender.as_str())
    }

    pub fn recipients(&self) -> &[String] {
        self.transaction
            .as_ref()
            .map_or(&[], |t| t.recipients.as_slice())
    }

    pub fn in_data_mode(&self) -> bool {
        self.state == SmtpState::Data
    }

    /// Bytes of message data collected so far, line endings included
    pub fn data_size(&self) -> usize {
        self.transaction.as_ref().map_or(0, |t| t.body.len())
    }

    /// Record the HELO domain. Any open transaction is abandoned.
    pub fn greet(&mut self, domain: &str) -> Result<(), SmtpError> {
        if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
            return Err(SmtpError::DomainTooLong {
                max: SmtpLimits::DOMAIN_MAX_LENGTH,
            });
        }

        self.client_domain = Some(domain.to_owned());
        self.reset();
        Ok(())
    }

    /// Drop the current transaction, keeping the HELO domain
    pub fn reset(&mut self) {
        self.transaction = None;
        self.state = if self.client_domain.is_some() {
            SmtpState::Greeted
        } else {
            SmtpState::Initial
        };
    }

    /// Open a transaction for `sender`
    pub fn begin_mail(&mut self, sender: String) -> Result<(), SmtpError> {
        if self.state != SmtpState::Greeted {
            return Err(SmtpError::InvalidState(
                "MAIL command requires HELO first".to_string(),
            ));
        }

        let mut handler = self.factory.create();
        handler.set_sender(sender.clone())?;

        self.transaction = Some(Transaction {
            handler,
            sender,
            recipients: Vec::new(),
            body: Vec::new(),
            failure: None,
        });
        self.state = SmtpState::MailFrom;
        Ok(())
    }

    pub fn add_recipient(&mut self, recipient: String) -> Result<(), SmtpError> {
        let transaction = match (self.state, self.transaction.as_mut()) {
            (SmtpState::MailFrom | SmtpState::RcptTo, Some(transaction)) => transaction,
            _ => {
                return Err(SmtpError::InvalidState(
                    "RCPT command requires MAIL first".to_string(),
                ));
            }
        };

        if transaction.recipients.len() >= SmtpLimits::MAX_RECIPIENTS {
            return Err(SmtpError::TooManyRecipients {
                max: SmtpLimits::MAX_RECIPIENTS,
            });
        }

        transaction.handler.add_recipient(recipient.clone())?;
        transaction.recipients.push(recipient);
        self.state = SmtpState::RcptTo;
        Ok(())
    }

    pub fn begin_data(&mut self) -> Result<(), SmtpError> {
        if self.state != SmtpState::RcptTo {
            return Err(SmtpError::InvalidState(
                "DATA command requires RCPT first".to_string(),
            ));
        }

        self.state = SmtpState::Data;
        Ok(())
    }

    /// Append one unstuffed data line.
    ///
    /// A line over a limit does not end the DATA phase: the rest of the
    /// message is read and discarded, and the error is returned by
    /// [`end_data`](Self::end_data).
    pub fn push_data_line(&mut self, line: &str) {
        let Some(transaction) = self.transaction.as_mut() else {
            return;
        };
        if transaction.failure.is_some() {
            return;
        }

        let line_size = line.len() + 2;
        if line_size > SmtpLimits::TEXT_LINE_MAX_LENGTH {
            transaction.failure = Some(SmtpError::LineTooLong {
                max: SmtpLimits::TEXT_LINE_MAX_LENGTH,
            });
        } else if transaction.body.len() + line_size > SmtpLimits::MAX_DATA_SIZE {
            transaction.failure = Some(SmtpError::TooMuchData {
                max: SmtpLimits::MAX_DATA_SIZE,
            });
        } else {
            transaction.body.extend_from_slice(line.as_bytes());
            transaction.body.extend_from_slice(b"\r\n");
        }
    }

    /// Close the DATA phase: hand the body to the handler and complete it.
    ///
    /// The session is back in the greeted state whatever the outcome.
    pub fn end_data(&mut self) -> Result<SmtpResponse, SmtpError> {
        if self.state != SmtpState::Data {
            return Err(SmtpError::InvalidState(
                "Not in data collection mode".to_string(),
            ));
        }

        let transaction = self.transaction.take();
        self.reset();
        let Some(mut transaction) = transaction else {
            return Err(SmtpError::InvalidState("No sender specified".to_string()));
        };

        if let Some(failure) = transaction.failure.take() {
            return Err(failure);
        }

        let body = std::mem::take(&mut transaction.body);
        match transaction.handler.receive_body(&mut Cursor::new(body))? {
            Some(rejection) => {
                tracing::debug!(code = %rejection.code, "Message rejected by handler.");
                Ok(SmtpResponse::new(rejection.code, rejection.message))
            }
            None => {
                transaction.handler.complete();
                Ok(SmtpResponse::ok())
            }
        }
    }
}
