//! Parsing and execution of SMTP commands

use crate::smtp::error::{SmtpError, SmtpLimits};
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::{SmtpSession, SmtpState};

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    Helo(&'a str),
    #[cfg(feature = "ehlo")]
    Ehlo(&'a str),
    MailFrom(String),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Quit,
}

impl<'a> Command<'a> {
    /// Parse one command line, without its line ending.
    ///
    /// Verbs are case-insensitive. Anything after the closing `>` of a
    /// path is accepted and ignored.
    pub fn parse(line: &'a str) -> Result<Self, SmtpError> {
        if line.len() > SmtpLimits::COMMAND_LINE_MAX_LENGTH {
            return Err(SmtpError::LineTooLong {
                max: SmtpLimits::COMMAND_LINE_MAX_LENGTH,
            });
        }

        let line = line.trim();
        let (verb, argument) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(verb, rest)| (verb, rest.trim()));

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => domain_argument("HELO", argument).map(Command::Helo),
            #[cfg(feature = "ehlo")]
            "EHLO" => domain_argument("EHLO", argument).map(Command::Ehlo),
            "MAIL" => path_argument("MAIL", "FROM:", argument, true).map(Command::MailFrom),
            "RCPT" => path_argument("RCPT", "TO:", argument, false).map(Command::RcptTo),
            "DATA" if argument.is_empty() => Ok(Command::Data),
            "DATA" => Err(SmtpError::InvalidSyntax(
                "DATA command takes no arguments".to_string(),
            )),
            "RSET" => Ok(Command::Rset),
            "NOOP" => Ok(Command::Noop),
            "QUIT" => Ok(Command::Quit),
            _ => Err(SmtpError::InvalidCommand),
        }
    }
}

fn domain_argument<'a>(verb: &str, argument: &'a str) -> Result<&'a str, SmtpError> {
    argument
        .split_whitespace()
        .next()
        .ok_or_else(|| SmtpError::InvalidSyntax(format!("{verb} requires domain argument")))
}

/// Address of `FROM:<address>` or `TO:<address>`.
///
/// `null_allowed` accepts the empty path `<>` used by bounces.
fn path_argument(
    verb: &str,
    keyword: &str,
    argument: &str,
    null_allowed: bool,
) -> Result<String, SmtpError> {
    let usage = || {
        SmtpError::InvalidSyntax(format!(
            "{verb} command must be '{verb} {keyword}<address>'"
        ))
    };

    let head = argument.get(..keyword.len()).ok_or_else(usage)?;
    if !head.eq_ignore_ascii_case(keyword) {
        return Err(usage());
    }

    let path = argument[keyword.len()..].trim_start();
    let (address, _parameters) = path
        .strip_prefix('<')
        .and_then(|rest| rest.split_once('>'))
        .ok_or_else(|| {
            SmtpError::InvalidSyntax("Address must be enclosed in angle brackets".to_string())
        })?;

    if !(null_allowed && address.is_empty()) {
        check_address(address)?;
    }
    Ok(address.to_owned())
}

/// Enforce the RFC 821 size limits on `user@domain`
fn check_address(address: &str) -> Result<(), SmtpError> {
    if address.is_empty() {
        return Err(SmtpError::InvalidSyntax(
            "Address cannot be empty".to_string(),
        ));
    }
    if address.len() + 2 > SmtpLimits::PATH_MAX_LENGTH {
        return Err(SmtpError::PathTooLong {
            max: SmtpLimits::PATH_MAX_LENGTH,
        });
    }

    let Some((user, domain)) = address.rsplit_once('@') else {
        return Err(SmtpError::InvalidSyntax(
            "Address must contain @ symbol".to_string(),
        ));
    };
    if user.len() > SmtpLimits::USER_MAX_LENGTH {
        return Err(SmtpError::UserTooLong {
            max: SmtpLimits::USER_MAX_LENGTH,
        });
    }
    if domain.len() > SmtpLimits::DOMAIN_MAX_LENGTH {
        return Err(SmtpError::DomainTooLong {
            max: SmtpLimits::DOMAIN_MAX_LENGTH,
        });
    }
    if user.is_empty() || domain.is_empty() {
        return Err(SmtpError::InvalidSyntax(
            "Invalid email address format".to_string(),
        ));
    }

    Ok(())
}

/// Applies commands to a session and builds the replies
#[derive(Debug)]
pub struct SmtpCommandHandler<'a> {
    hostname: &'a str,
}

impl<'a> SmtpCommandHandler<'a> {
    pub fn new(hostname: &'a str) -> Self {
        Self { hostname }
    }

    pub fn process_command(
        &self,
        line: &str,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        let command = Command::parse(line)?;
        self.execute(command, session)
    }

    fn execute(
        &self,
        command: Command<'_>,
        session: &mut SmtpSession,
    ) -> Result<SmtpResponse, SmtpError> {
        match command {
            Command::Helo(domain) => {
                session.greet(domain)?;
                Ok(SmtpResponse::helo(self.hostname, domain))
            }
            #[cfg(feature = "ehlo")]
            Command::Ehlo(domain) => {
                session.greet(domain)?;
                Ok(SmtpResponse::ehlo(self.hostname, domain))
            }
            Command::MailFrom(sender) => {
                session.begin_mail(sender)?;
                Ok(SmtpResponse::ok())
            }
            Command::RcptTo(recipient) => {
                session.add_recipient(recipient)?;
                Ok(SmtpResponse::ok())
            }
            Command::Data => {
                session.begin_data()?;
                Ok(SmtpResponse::data_start())
            }
            Command::Rset => {
                if session.state() == SmtpState::Initial {
                    return Err(SmtpError::InvalidState(
                        "RSET command requires HELO first".to_string(),
                    ));
                }
                session.reset();
                Ok(SmtpResponse::ok())
            }
            Command::Noop => Ok(SmtpResponse::ok()),
            Command::Quit => Ok(SmtpResponse::quit()),
        }
    }
}
