//! Captured email record

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

/// An email captured by the server.
///
/// Built once by the [`MailSaver`](crate::mail::MailSaver) and shared with
/// subscribers behind an `Arc`; never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Email {
    /// When the saver accepted the message
    pub received_at: DateTime<Local>,

    /// Reverse-path given in `MAIL FROM`
    pub from: String,

    /// Recipient addresses, in the order they were given
    pub to: Vec<String>,

    /// Text of the first `Subject:` line, or empty
    pub subject: String,

    /// Headers and body, lines ended with the host line separator
    pub data: String,

    /// Where the message was written, absent in memory mode or on write failure
    pub path: Option<PathBuf>,
}

impl Email {
    /// Exact match against one of the recipient addresses
    pub fn has_recipient(&self, recipient: &str) -> bool {
        self.to.iter().any(|addr| addr == recipient)
    }

    pub fn is_from_sender(&self, sender: &str) -> bool {
        self.from == sender
    }

    /// Size of the stored content in bytes
    pub fn data_size(&self) -> usize {
        self.data.len()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Content after the first blank line, if any
    pub fn get_body(&self) -> Option<&str> {
        let mut offset = 0;
        for line in self.data.split_inclusive('\n') {
            offset += line.len();
            if line.trim_end_matches(['\r', '\n']).is_empty() {
                let body = &self.data[offset..];
                return (!body.is_empty()).then_some(body);
            }
        }
        None
    }

    pub fn contains_text(&self, text: &str) -> bool {
        self.data.contains(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(data: &str) -> Email {
        Email {
            received_at: Local::now(),
            from: "sender@example.com".to_string(),
            to: vec![
                "user1@example.com".to_string(),
                "user2@example.com".to_string(),
            ],
            subject: String::new(),
            data: data.to_string(),
            path: None,
        }
    }

    #[test]
    fn test_has_recipient() {
        let email = sample("Test email");

        assert!(email.has_recipient("user1@example.com"));
        assert!(email.has_recipient("user2@example.com"));
        assert!(!email.has_recipient("user3@example.com"));
    }

    #[test]
    fn test_is_from_sender() {
        let email = sample("Test email");

        assert!(email.is_from_sender("sender@example.com"));
        assert!(!email.is_from_sender("other@example.com"));
    }

    #[test]
    fn test_get_body() {
        let email = sample("Subject: Test\nFrom: sender@example.com\n\nHello World\nSecond line\n");
        assert_eq!(email.get_body(), Some("Hello World\nSecond line\n"));

        let crlf = sample("Subject: Test\r\n\r\nHello\r\n");
        assert_eq!(crlf.get_body(), Some("Hello\r\n"));

        let no_body = sample("Subject: Test\nFrom: sender@example.com");
        assert_eq!(no_body.get_body(), None);
    }

    #[test]
    fn test_contains_text_and_size() {
        let email = sample("Subject: Important Message\n\nThis is a test email");

        assert!(email.contains_text("Important"));
        assert!(email.contains_text("test email"));
        assert!(!email.contains_text("not found"));
        assert_eq!(email.data_size(), 48);
        assert!(email.path().is_none());
    }
}
