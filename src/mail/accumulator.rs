//! Collects one mail transaction and hands it to the [`MailSaver`]

use std::io::Read;
use std::sync::Arc;

use crate::mail::saver::MailSaver;
use crate::smtp::handler::{HandlerError, MessageHandler, MessageHandlerFactory, Rejection};

#[cfg(windows)]
const LINE_SEPARATOR: &str = "\r\n";
#[cfg(not(windows))]
const LINE_SEPARATOR: &str = "\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    New,
    SenderSet,
    RecipientAdded,
    BodyReceived,
}

/// Message handler accepting any number of recipients
#[derive(Debug)]
pub struct RecipientsAccumulator {
    saver: Arc<MailSaver>,
    stage: Stage,
    from: String,
    recipients: Vec<String>,
    content: String,
}

impl RecipientsAccumulator {
    pub fn new(saver: Arc<MailSaver>) -> Self {
        Self {
            saver,
            stage: Stage::New,
            from: String::new(),
            recipients: Vec::new(),
            content: String::new(),
        }
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }
}

impl MessageHandler for RecipientsAccumulator {
    fn set_sender(&mut self, address: String) -> Result<(), HandlerError> {
        if self.stage != Stage::New {
            return Err(HandlerError::InvalidState("sender already set"));
        }
        self.from = address;
        self.stage = Stage::SenderSet;
        Ok(())
    }

    fn add_recipient(&mut self, address: String) -> Result<(), HandlerError> {
        match self.stage {
            Stage::SenderSet | Stage::RecipientAdded => {
                self.recipients.push(address);
                self.stage = Stage::RecipientAdded;
                Ok(())
            }
            Stage::New => Err(HandlerError::InvalidState("recipient before sender")),
            Stage::BodyReceived => Err(HandlerError::InvalidState("recipient after body")),
        }
    }

    fn receive_body(&mut self, body: &mut dyn Read) -> Result<Option<Rejection>, HandlerError> {
        if self.stage != Stage::RecipientAdded {
            return Err(HandlerError::InvalidState(
                "body requires a sender and at least one recipient",
            ));
        }

        self.content = read_lines(body);
        self.stage = Stage::BodyReceived;
        Ok(None)
    }

    fn complete(self: Box<Self>) {
        if self.stage != Stage::BodyReceived {
            tracing::warn!(from = %self.from, "Transaction completed without a body, ignoring.");
            return;
        }

        let this = *self;
        this.saver
            .save_email_and_notify(this.from, this.recipients, this.content);
    }
}

/// Drain `body` as UTF-8 text, ending every line with the host separator.
///
/// A read error keeps what was read before it.
fn read_lines(body: &mut dyn Read) -> String {
    let mut raw = Vec::new();
    if let Err(error) = body.read_to_end(&mut raw) {
        tracing::error!(%error, "Error reading message body.");
    }

    let text = String::from_utf8_lossy(&raw);
    let mut content = String::with_capacity(text.len());
    for line in body_lines(&text) {
        content.push_str(line);
        content.push_str(LINE_SEPARATOR);
    }
    content
}

/// Lines ended by `\r\n`, `\n` or a lone `\r`; no empty line after the last ending
fn body_lines(mut rest: &str) -> impl Iterator<Item = &str> {
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let (line, tail) = match rest.find(['\r', '\n']) {
            Some(end) => {
                let ending = if rest[end..].starts_with("\r\n") { 2 } else { 1 };
                (&rest[..end], &rest[end + ending..])
            }
            None => (rest, ""),
        };
        rest = tail;
        Some(line)
    })
}

/// Creates a [`RecipientsAccumulator`] per transaction
#[derive(Debug, Clone)]
pub struct AccumulatorFactory {
    saver: Arc<MailSaver>,
}

impl AccumulatorFactory {
    pub fn new(saver: Arc<MailSaver>) -> Self {
        Self { saver }
    }
}

impl MessageHandlerFactory for AccumulatorFactory {
    fn create(&self) -> Box<dyn MessageHandler> {
        Box::new(RecipientsAccumulator::new(Arc::clone(&self.saver)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::saver::SaverConfig;
    use std::io::{self, Cursor};

    fn memory_saver() -> Arc<MailSaver> {
        Arc::new(MailSaver::new(SaverConfig {
            memory_mode: true,
            ..SaverConfig::default()
        }))
    }

    struct FailingReader {
        sent: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::other("connection reset"));
            }
            self.sent = true;
            let data = b"partial\r\n";
            buf[..data.len()].copy_from_slice(data);
            Ok(data.len())
        }
    }

    #[test]
    fn forwards_transaction_to_saver() {
        let saver = memory_saver();
        let subscription = saver.subscribe();
        let mut handler = Box::new(RecipientsAccumulator::new(Arc::clone(&saver)));

        handler.set_sender("user@x.com".to_string()).unwrap();
        handler.add_recipient("to@y.com".to_string()).unwrap();
        handler.add_recipient("to@y.com".to_string()).unwrap();
        handler.add_recipient("other@z.com".to_string()).unwrap();
        let rejection = handler
            .receive_body(&mut Cursor::new("Subject: Hello\r\n\r\nBody text\r\n"))
            .unwrap();
        assert!(rejection.is_none());
        handler.complete();

        let email = subscription.try_recv().unwrap();
        assert_eq!(email.from, "user@x.com");
        assert_eq!(email.to, vec!["to@y.com", "to@y.com", "other@z.com"]);
        assert_eq!(email.subject, "Hello");
        assert_eq!(
            email.data,
            format!("Subject: Hello{LINE_SEPARATOR}{LINE_SEPARATOR}Body text{LINE_SEPARATOR}")
        );
    }

    #[test]
    fn rejects_out_of_order_calls() {
        let mut handler = RecipientsAccumulator::new(memory_saver());

        assert!(handler.add_recipient("a@b".to_string()).is_err());
        assert!(handler.receive_body(&mut Cursor::new("x")).is_err());

        handler.set_sender("s@b".to_string()).unwrap();
        assert!(handler.set_sender("again@b".to_string()).is_err());
        assert!(handler.receive_body(&mut Cursor::new("x")).is_err());

        handler.add_recipient("a@b".to_string()).unwrap();
        handler.receive_body(&mut Cursor::new("x")).unwrap();
        assert!(handler.add_recipient("late@b".to_string()).is_err());
        assert!(handler.receive_body(&mut Cursor::new("y")).is_err());
        assert_eq!(handler.recipients(), ["a@b".to_string()]);
    }

    #[test]
    fn complete_without_body_saves_nothing() {
        let saver = memory_saver();
        let subscription = saver.subscribe();
        let mut handler = Box::new(RecipientsAccumulator::new(Arc::clone(&saver)));
        handler.set_sender("s@b".to_string()).unwrap();
        handler.add_recipient("a@b".to_string()).unwrap();

        handler.complete();

        assert!(subscription.try_recv().is_err());
    }

    #[test]
    fn read_error_keeps_partial_body() {
        let content = read_lines(&mut FailingReader { sent: false });
        assert_eq!(content, format!("partial{LINE_SEPARATOR}"));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let content = read_lines(&mut Cursor::new(b"caf\xff\n".to_vec()));
        assert_eq!(content, format!("caf\u{fffd}{LINE_SEPARATOR}"));
    }

    #[test]
    fn every_line_ending_is_normalized() {
        let content = read_lines(&mut Cursor::new("Subject: Lone\rBody\r\nNext\n\rLast"));
        let sep = LINE_SEPARATOR;
        assert_eq!(content, format!("Subject: Lone{sep}Body{sep}Next{sep}{sep}Last{sep}"));

        assert_eq!(body_lines("").count(), 0);
        assert_eq!(body_lines("\r\r\n").collect::<Vec<_>>(), ["", ""]);
    }

    #[test]
    fn lone_carriage_return_ends_subject() {
        let saver = memory_saver();
        let subscription = saver.subscribe();
        let mut handler = Box::new(RecipientsAccumulator::new(Arc::clone(&saver)));
        handler.set_sender("s@b".to_string()).unwrap();
        handler.add_recipient("a@b".to_string()).unwrap();
        handler
            .receive_body(&mut Cursor::new("Subject: Short\rX-Trailer: yes\r\n"))
            .unwrap();
        handler.complete();

        assert_eq!(subscription.try_recv().unwrap().subject, "Short");
    }

    #[test]
    fn factory_creates_independent_handlers() {
        let factory = AccumulatorFactory::new(memory_saver());
        let mut first = factory.create();
        let mut second = factory.create();

        first.set_sender("one@b".to_string()).unwrap();
        second.set_sender("two@b".to_string()).unwrap();
        assert!(first.add_recipient("a@b".to_string()).is_ok());
    }
}
