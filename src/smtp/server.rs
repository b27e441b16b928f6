//! SMTP listener: one thread per connection, each driving an [`SmtpSession`]

use crate::smtp::commands::SmtpCommandHandler;
use crate::smtp::error::{ListenError, SmtpError, SmtpLimits};
use crate::smtp::handler::MessageHandlerFactory;
use crate::smtp::response::SmtpResponse;
use crate::smtp::session::SmtpSession;

use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Delay between two accept attempts on the non-blocking listener
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

type Connections = Arc<Mutex<HashMap<u64, TcpStream>>>;

/// SMTP server bound to a local address.
///
/// `bind` opens the socket, `start` begins accepting connections on a
/// background thread, and `stop` closes the socket and disconnects clients.
pub struct SmtpServer {
    hostname: Arc<str>,
    factory: Arc<dyn MessageHandlerFactory>,
    local_addr: SocketAddr,
    listener: Option<TcpListener>,
    running: Arc<AtomicBool>,
    connections: Connections,
    accept_thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for SmtpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpServer")
            .field("hostname", &self.hostname)
            .field("local_addr", &self.local_addr)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl SmtpServer {
    /// Bind a listening socket without accepting connections yet
    pub fn bind(
        hostname: &str,
        factory: Arc<dyn MessageHandlerFactory>,
        port: i32,
        address: IpAddr,
    ) -> Result<Self, ListenError> {
        let port_number = u16::try_from(port).map_err(|_| ListenError::PortOutOfRange { port })?;

        let listener =
            TcpListener::bind((address, port_number)).map_err(ListenError::from_bind_error)?;
        let local_addr = listener.local_addr().map_err(ListenError::Other)?;
        listener
            .set_nonblocking(true)
            .map_err(ListenError::Other)?;

        Ok(Self {
            hostname: Arc::from(hostname),
            factory,
            local_addr,
            listener: Some(listener),
            running: Arc::new(AtomicBool::new(false)),
            connections: Arc::new(Mutex::new(HashMap::new())),
            accept_thread: None,
        })
    }

    /// Start accepting connections on a background thread
    pub fn start(&mut self) -> Result<(), ListenError> {
        let Some(listener) = self.listener.take() else {
            return Err(ListenError::Other(io::Error::other(
                "server has already been started",
            )));
        };

        self.running.store(true, Ordering::SeqCst);

        let worker = AcceptLoop {
            hostname: Arc::clone(&self.hostname),
            factory: Arc::clone(&self.factory),
            running: Arc::clone(&self.running),
            connections: Arc::clone(&self.connections),
        };

        let handle = thread::Builder::new()
            .name(format!("smtp-accept-{}", self.local_addr.port()))
            .spawn(move || worker.run(listener));

        match handle {
            Ok(handle) => {
                tracing::info!(addr = %self.local_addr, "SMTP server listening.");
                self.accept_thread = Some(handle);
                Ok(())
            }
            Err(error) => {
                self.running.store(false, Ordering::SeqCst);
                Err(ListenError::Other(error))
            }
        }
    }

    /// Close the listening socket and disconnect every client.
    ///
    /// Does nothing if the server is not running.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.accept_thread.take() {
            if handle.join().is_err() {
                tracing::error!(addr = %self.local_addr, "Accept thread panicked.");
            }
        }

        let closing = SmtpResponse::closing(&self.hostname);
        let mut connections = match self.connections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for (_, mut stream) in connections.drain() {
            let _ = write!(stream, "{closing}");
            let _ = stream.shutdown(Shutdown::Both);
        }

        tracing::info!(addr = %self.local_addr, "SMTP server stopped.");
    }

    /// Whether the server is accepting connections
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the socket is bound to (useful when binding port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for SmtpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

struct AcceptLoop {
    hostname: Arc<str>,
    factory: Arc<dyn MessageHandlerFactory>,
    running: Arc<AtomicBool>,
    connections: Connections,
}

impl AcceptLoop {
    fn run(self, listener: TcpListener) {
        let mut next_id = 0u64;

        while self.running.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    let id = next_id;
                    next_id += 1;
                    if let Err(error) = self.spawn_client(id, stream, peer) {
                        tracing::error!(%error, %peer, "Cannot handle connection.");
                    }
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(error) => {
                    tracing::error!(%error, "Error accepting connection.");
                }
            }
        }
        // listener dropped here, which closes the socket
    }

    fn spawn_client(&self, id: u64, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        stream.set_nonblocking(false)?;

        let client = ClientConnection {
            hostname: Arc::clone(&self.hostname),
            factory: Arc::clone(&self.factory),
        };
        let builder = thread::Builder::new().name(format!("smtp-session-{id}"));

        spawn_registered(&self.connections, id, stream, builder, move |stream| {
            tracing::debug!(%peer, "Connection accepted.");
            if let Err(error) = client.handle(stream) {
                tracing::warn!(%error, %peer, "Error handling client.");
            }
            tracing::debug!(%peer, "Connection closed.");
        })
    }
}

/// Run `session` on its own thread while `stream` is listed in
/// `connections`. The entry is removed when the session ends, or right away
/// with the socket closed if the thread cannot be spawned.
fn spawn_registered<F>(
    connections: &Connections,
    id: u64,
    stream: TcpStream,
    builder: thread::Builder,
    session: F,
) -> io::Result<()>
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    if let Ok(mut registry) = connections.lock() {
        registry.insert(id, stream.try_clone()?);
    }

    let registry = Arc::clone(connections);
    let spawned = builder.spawn(move || {
        session(stream);
        if let Ok(mut registry) = registry.lock() {
            registry.remove(&id);
        }
    });

    if let Err(error) = spawned {
        if let Some(orphan) = connections.lock().ok().and_then(|mut r| r.remove(&id)) {
            let _ = orphan.shutdown(Shutdown::Both);
        }
        return Err(error);
    }
    Ok(())
}

/// Drives a single client connection
struct ClientConnection {
    hostname: Arc<str>,
    factory: Arc<dyn MessageHandlerFactory>,
}

impl ClientConnection {
    fn handle(&self, mut stream: TcpStream) -> Result<(), SmtpError> {
        let command_handler = SmtpCommandHandler::new(&self.hostname);
        let mut session = SmtpSession::new(Arc::clone(&self.factory));
        let mut reader = BufReader::new(stream.try_clone()?);

        self.send_response(&mut stream, &SmtpResponse::greeting(&self.hostname))?;

        let mut line_buffer = Vec::new();
        loop {
            line_buffer.clear();

            if reader.read_until(b'\n', &mut line_buffer)? == 0 {
                break; // Connection closed
            }

            // Replace invalid UTF-8 sequences rather than dropping the line
            let line = String::from_utf8_lossy(&line_buffer);

            if session.in_data_mode() {
                if let Some(response) = Self::handle_data_line(&line, &mut session) {
                    self.send_response(&mut stream, &response)?;
                }
                continue;
            }

            let command = line.trim();
            if command.is_empty() {
                continue;
            }

            let response = command_handler
                .process_command(command, &mut session)
                .unwrap_or_else(|e| e.to_response());
            self.send_response(&mut stream, &response)?;
            if response.closes_session() {
                break;
            }
        }

        Ok(())
    }

    /// Feed one DATA line to the session, returning the final reply once
    /// the terminating dot is seen
    fn handle_data_line(raw: &str, session: &mut SmtpSession) -> Option<SmtpResponse> {
        let line = raw.strip_suffix('\n').unwrap_or(raw);
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line == "." {
            return Some(session.end_data().unwrap_or_else(|e| e.to_response()));
        }

        // Transparency: the client doubles any leading dot
        session.push_data_line(line.strip_prefix('.').unwrap_or(line));
        None
    }

    fn send_response(
        &self,
        stream: &mut TcpStream,
        response: &SmtpResponse,
    ) -> Result<(), SmtpError> {
        if response.longest_line() > SmtpLimits::REPLY_LINE_MAX_LENGTH {
            let truncated =
                SmtpResponse::new(response.code.as_str(), "Response too long (truncated)");
            write!(stream, "{truncated}")?;
        } else {
            write!(stream, "{response}")?;
        }
        stream.flush()?;
        Ok(())
    }
}
