//! Start/stop state of the server as requested by the user

use std::net::{IpAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::server::error::StartError;
use crate::server::handler::ServerHandler;

#[derive(Debug, Default)]
struct ModelState {
    requested: bool,
    port: String,
    host: String,
}

/// Holds the port and host typed by the user and whether the server was
/// requested.
///
/// The listener cannot be restarted once opened, so toggling a requested
/// server back off only clears the flag: the socket stays open until the
/// process exits or [`ServerHandler::stop`] is called.
#[derive(Debug)]
pub struct ServerModel {
    handler: Arc<ServerHandler>,
    state: Mutex<ModelState>,
}

impl ServerModel {
    pub fn new(handler: Arc<ServerHandler>) -> Self {
        Self {
            handler,
            state: Mutex::new(ModelState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ModelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handler(&self) -> &Arc<ServerHandler> {
        &self.handler
    }

    pub fn set_port(&self, port: impl Into<String>) {
        self.state().port = port.into();
    }

    pub fn port(&self) -> String {
        self.state().port.clone()
    }

    /// Empty means every local address
    pub fn set_host(&self, host: impl Into<String>) {
        self.state().host = host.into();
    }

    pub fn host(&self) -> String {
        self.state().host.clone()
    }

    pub fn is_requested(&self) -> bool {
        self.state().requested
    }

    /// Flip the requested flag, starting the server when going from off to on.
    ///
    /// On error the flag keeps its previous value.
    pub fn toggle(&self) -> Result<(), StartError> {
        let mut state = self.state();

        if !state.requested {
            let port = state.port.parse::<i32>().map_err(StartError::InvalidPort)?;
            let host = if state.host.is_empty() {
                None
            } else {
                Some(resolve(&state.host)?)
            };

            self.handler.start(port, host)?;
        }
        // else: the running server cannot be stopped, only the flag changes

        state.requested = !state.requested;
        Ok(())
    }
}

fn resolve(host: &str) -> Result<IpAddr, StartError> {
    let invalid = |source| StartError::InvalidHost {
        host: host.to_owned(),
        source,
    };

    let mut addresses = (host, 0).to_socket_addrs().map_err(invalid)?;
    addresses
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| invalid(std::io::Error::other("no address found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::{MailSaver, SaverConfig};
    use std::net::TcpStream;

    fn model() -> ServerModel {
        let saver = MailSaver::new(SaverConfig {
            memory_mode: true,
            ..SaverConfig::default()
        });
        let handler = ServerHandler::new("test.local", Arc::new(saver));
        ServerModel::new(Arc::new(handler))
    }

    #[test]
    fn invalid_port() {
        let model = model();
        model.set_port("INVALID");

        let error = model.toggle().unwrap_err();
        assert!(matches!(error, StartError::InvalidPort(_)));
        assert!(!model.is_requested());
    }

    #[test]
    fn invalid_host() {
        let model = model();
        model.set_port("0");
        model.set_host("not a valid host.invalid");

        match model.toggle() {
            Err(StartError::InvalidHost { host, .. }) => {
                assert_eq!(host, "not a valid host.invalid");
            }
            other => panic!("expected InvalidHost, got {other:?}"),
        }
        assert!(!model.is_requested());
        assert!(!model.handler().is_running());
    }

    #[test]
    fn out_of_range_port_propagates() {
        let model = model();
        model.set_port("9999999");

        let error = model.toggle().unwrap_err();
        assert!(matches!(error, StartError::OutOfRangePort { port: 9_999_999 }));
        assert!(!model.is_requested());
    }

    #[test]
    fn toggle_twice_keeps_socket_open() {
        let model = model();
        model.set_port("0");
        model.set_host("127.0.0.1");
        assert!(!model.is_requested());

        model.toggle().unwrap();
        assert!(model.is_requested());
        let addr = model.handler().local_addr().unwrap();

        model.toggle().unwrap();
        assert!(!model.is_requested());

        assert!(model.handler().is_running());
        assert_eq!(model.handler().local_addr(), Some(addr));
        assert!(TcpStream::connect(addr).is_ok());
    }

    #[test]
    fn settings_are_stored() {
        let model = model();
        model.set_port("2525");
        model.set_host("localhost");
        assert_eq!(model.port(), "2525");
        assert_eq!(model.host(), "localhost");
    }
}
