//! SMTP replies

use std::fmt;

/// One SMTP reply, possibly spanning several lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpResponse {
    /// Three-digit reply code, e.g. "250"
    pub code: String,
    /// Text of the first line
    pub message: String,
    /// Further lines of a multiline reply
    pub extra_lines: Vec<String>,
}

impl SmtpResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            extra_lines: Vec::new(),
        }
    }

    pub fn with_lines(mut self, lines: Vec<String>) -> Self {
        self.extra_lines = lines;
        self
    }

    pub fn ok() -> Self {
        Self::new("250", "OK")
    }

    pub fn greeting(hostname: &str) -> Self {
        Self::new("220", format!("{hostname} ESMTP fakesmtp"))
    }

    /// Sent to clients still connected when the server stops
    pub fn closing(hostname: &str) -> Self {
        Self::new(
            "421",
            format!("{hostname} Service not available, closing transmission channel"),
        )
    }

    pub fn helo(hostname: &str, client_domain: &str) -> Self {
        Self::new("250", format!("{hostname} Hello {client_domain}"))
    }

    #[cfg(feature = "ehlo")]
    pub fn ehlo(hostname: &str, client_domain: &str) -> Self {
        Self::helo(hostname, client_domain).with_lines(vec![
            "PIPELINING".to_owned(),
            format!("SIZE {}", crate::smtp::SmtpLimits::MAX_DATA_SIZE),
        ])
    }

    pub fn data_start() -> Self {
        Self::new("354", "End data with <CR><LF>.<CR><LF>")
    }

    pub fn quit() -> Self {
        Self::new("221", "Bye")
    }

    /// Whether the connection ends after this reply
    pub fn closes_session(&self) -> bool {
        self.code == "221"
    }

    /// 2xx and 3xx replies
    pub fn is_positive(&self) -> bool {
        self.code.starts_with('2') || self.code.starts_with('3')
    }

    /// Length of the longest line on the wire, CRLF included
    pub fn longest_line(&self) -> usize {
        std::iter::once(&self.message)
            .chain(&self.extra_lines)
            .map(|line| self.code.len() + 1 + line.len() + 2)
            .max()
            .unwrap_or_default()
    }
}

/// Wire format: every line but the last uses `-` after the code
impl fmt::Display for SmtpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines = std::iter::once(&self.message)
            .chain(&self.extra_lines)
            .peekable();
        while let Some(line) = lines.next() {
            let separator = if lines.peek().is_some() { '-' } else { ' ' };
            write!(f, "{}{separator}{line}\r\n", self.code)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_line() {
        assert_eq!(SmtpResponse::ok().to_string(), "250 OK\r\n");
        assert_eq!(
            SmtpResponse::greeting("server.local").to_string(),
            "220 server.local ESMTP fakesmtp\r\n"
        );
    }

    #[test]
    fn test_multiline() {
        let response = SmtpResponse::new("250", "Hello")
            .with_lines(vec!["PIPELINING".to_owned(), "SIZE 1000".to_owned()]);
        assert_eq!(
            response.to_string(),
            "250-Hello\r\n250-PIPELINING\r\n250 SIZE 1000\r\n"
        );
        assert_eq!(response.longest_line(), "250 PIPELINING\r\n".len());
    }

    #[cfg(feature = "ehlo")]
    #[test]
    fn test_ehlo_lists_capabilities() {
        let formatted = SmtpResponse::ehlo("server.local", "client.local").to_string();
        assert!(formatted.starts_with("250-server.local Hello client.local\r\n"));
        assert!(formatted.contains("250-PIPELINING\r\n"));
        assert!(formatted.ends_with("250 SIZE 10485760\r\n"));
    }

    #[test]
    fn test_closing_notice() {
        let response = SmtpResponse::closing("server.local");
        assert!(!response.is_positive());
        assert!(response.to_string().starts_with("421 server.local"));
    }

    #[test]
    fn test_reply_kinds() {
        assert!(SmtpResponse::data_start().is_positive());
        assert!(SmtpResponse::quit().closes_session());
        assert!(!SmtpResponse::ok().closes_session());
        assert!(!SmtpResponse::new("552", "Too much").is_positive());
    }
}
