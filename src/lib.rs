//! # fakesmtp
//!
//! fakesmtp is a disposable SMTP server for testing.
//!
//! It accepts every message sent to it, writes each one to a file and
//! notifies subscribers in memory.
//! Nothing is ever relayed to a real recipient.
//!
//! ## Quick Start
//!
//! ```rust
//! use fakesmtp::{MailSaver, SaverConfig, ServerHandler, ServerModel};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let saver = Arc::new(MailSaver::new(SaverConfig {
//!     memory_mode: true,
//!     ..SaverConfig::default()
//! }));
//! let emails = saver.subscribe();
//!
//! let handler = Arc::new(ServerHandler::new("test.local", Arc::clone(&saver)));
//! let model = ServerModel::new(Arc::clone(&handler));
//! model.set_port("0");
//! model.set_host("127.0.0.1");
//! model.toggle().unwrap();
//!
//! // Application sends email to handler.local_addr()
//! // ...
//!
//! if let Ok(email) = emails.recv_timeout(Duration::from_millis(100)) {
//!     println!("Received email from: {}", email.from);
//! }
//! handler.stop();
//! ```
//!
//! ## Supported SMTP commands
//!
//! - `HELO` - Identify the sender
//! - `MAIL FROM` - Specify the sender's address
//! - `RCPT TO` - Specify the destination (multiple destinations are supported)
//! - `DATA` - Send the email body
//! - `RSET` - Reset the current transaction
//! - `NOOP` - Do nothing
//! - `QUIT` - Close connection
//!
//! Enabling the `ehlo` feature also allows you to use the `EHLO` command.
//!
//! ## Storage
//!
//! Each accepted email is written to
//! `{output_dir}/{yyyyMMdd.HHmmss.nnnnnnnnn}.{suffix}`, with `_2`, `_3`, ...
//! appended before the suffix when two emails arrive within the same
//! instant. The memory mode skips every disk write.
//!
//! ## Relay domains
//!
//! When relay domains are configured, an email is kept only if every
//! recipient address ends with one of them. Other emails are dropped
//! silently; the SMTP client still sees a success.
//!
//! ## Notes
//!
//! - SMTP authentication is not supported.
//! - SSL/TLS connection is not supported.
//! - Mail relay is not supported.

pub mod config;
pub mod mail;
pub mod server;
pub mod smtp;

pub use config::{Config, ConfigError};
pub use mail::{
    AccumulatorFactory, Email, MailSaver, RecipientsAccumulator, RelayDomains, SaverConfig,
    Subscription,
};
pub use server::{ServerHandler, ServerModel, StartError};
pub use smtp::{
    HandlerError, MessageHandler, MessageHandlerFactory, Rejection, SmtpError, SmtpLimits,
    SmtpServer,
};
