//! Starts and stops the SMTP listener

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::mail::{AccumulatorFactory, MailSaver};
use crate::server::error::StartError;
use crate::smtp::{ListenError, MessageHandlerFactory, SmtpServer};

/// Owns the listening server and feeds every session into the [`MailSaver`].
///
/// Dropping the handler stops a running server.
#[derive(Debug)]
pub struct ServerHandler {
    hostname: String,
    saver: Arc<MailSaver>,
    server: Mutex<Option<SmtpServer>>,
}

impl ServerHandler {
    pub fn new(hostname: &str, saver: Arc<MailSaver>) -> Self {
        Self {
            hostname: hostname.to_owned(),
            saver,
            server: Mutex::new(None),
        }
    }

    pub fn mail_saver(&self) -> &Arc<MailSaver> {
        &self.saver
    }

    fn server(&self) -> MutexGuard<'_, Option<SmtpServer>> {
        self.server.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start listening on `port`. `None` binds every local address.
    pub fn start(&self, port: i32, bind_address: Option<IpAddr>) -> Result<(), StartError> {
        tracing::debug!(port, "Starting server.");

        let address = bind_address.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let factory: Arc<dyn MessageHandlerFactory> =
            Arc::new(AccumulatorFactory::new(Arc::clone(&self.saver)));

        let mut server = SmtpServer::bind(&self.hostname, factory, port, address)
            .map_err(|error| classify(error, port))?;
        server.start().map_err(|error| classify(error, port))?;

        if let Some(mut previous) = self.server().replace(server) {
            previous.stop();
        }
        Ok(())
    }

    /// Stop the server if it is running; otherwise do nothing
    pub fn stop(&self) {
        if let Some(server) = self.server().as_mut() {
            if server.is_running() {
                tracing::debug!("Stopping server.");
                server.stop();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.server().as_ref().is_some_and(SmtpServer::is_running)
    }

    /// Address of the last started server
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server().as_ref().map(SmtpServer::local_addr)
    }
}

impl Drop for ServerHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn classify(error: ListenError, port: i32) -> StartError {
    match error {
        ListenError::Bind(source) => {
            tracing::error!(%source, port, "Cannot bind port.");
            StartError::BindPort { port, source }
        }
        ListenError::PortOutOfRange { .. } => {
            tracing::error!(port, "Port out of range.");
            StartError::OutOfRangePort { port }
        }
        ListenError::Other(source) => {
            tracing::error!(%source, port, "Cannot start server.");
            StartError::Other(source)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::SaverConfig;
    use std::net::TcpStream;

    fn handler() -> ServerHandler {
        let saver = MailSaver::new(SaverConfig {
            memory_mode: true,
            ..SaverConfig::default()
        });
        ServerHandler::new("test.local", Arc::new(saver))
    }

    fn localhost() -> Option<IpAddr> {
        Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    #[test]
    fn out_of_range_port() {
        let handler = handler();
        let error = handler.start(9_999_999, None).unwrap_err();
        assert!(matches!(error, StartError::OutOfRangePort { port: 9_999_999 }));
        assert!(!handler.is_running());

        let negative = handler.start(-1, None).unwrap_err();
        assert_eq!(negative.port(), Some(-1));
    }

    #[test]
    fn port_in_use() {
        let first = handler();
        first.start(0, localhost()).unwrap();
        let port = i32::from(first.local_addr().unwrap().port());

        let second = handler();
        let error = second.start(port, localhost()).unwrap_err();
        assert!(matches!(error, StartError::BindPort { port: p, .. } if p == port));
    }

    #[test]
    fn start_then_stop() {
        let handler = handler();
        handler.start(0, localhost()).unwrap();
        assert!(handler.is_running());
        let addr = handler.local_addr().unwrap();
        assert!(TcpStream::connect(addr).is_ok());

        handler.stop();
        assert!(!handler.is_running());
        assert!(TcpStream::connect(addr).is_err());
    }

    #[test]
    fn stop_does_nothing_when_not_running() {
        let handler = handler();
        handler.stop();
        handler.stop();
        handler.stop();
        assert!(!handler.is_running());
        assert!(handler.local_addr().is_none());
    }

    #[test]
    fn restart_replaces_previous_server() {
        let handler = handler();
        handler.start(0, localhost()).unwrap();
        let first = handler.local_addr().unwrap();

        handler.start(0, localhost()).unwrap();
        let second = handler.local_addr().unwrap();

        assert_ne!(first, second);
        assert!(handler.is_running());
        assert!(TcpStream::connect(first).is_err());
    }

    #[test]
    fn drop_stops_server() {
        let handler = handler();
        handler.start(0, localhost()).unwrap();
        let addr = handler.local_addr().unwrap();

        drop(handler);
        assert!(TcpStream::connect(addr).is_err());
    }
}
