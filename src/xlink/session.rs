//! XLink Kai session: one UDP socket, a connect/keepalive state machine and a
//! background receiver thread.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, error, info, trace, warn, Span};

use super::protocol::{
    encode_ethernet_data, is_control_message, ProtocolCommand, CONNECT_MESSAGE,
    DISCONNECT_MESSAGE, KEEPALIVE_MESSAGE,
};
use crate::error::SessionError;
use crate::utils::{lock, read, write};

/// How long to wait for the engine to acknowledge a connect.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Receive timeout of the socket, bounding each receiver loop iteration.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Largest datagram accepted from the engine.
pub const MAX_DATAGRAM_LENGTH: usize = 4096;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    ConnectPending,
    Connected,
}

/// Callback receiving ethernet frames from the engine.
pub type DataHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct Handshake {
    state: SessionState,
    started: Option<Instant>,
}

/// State shared with the receiver thread.
struct Shared {
    remote: SocketAddr,
    socket: RwLock<Option<Arc<UdpSocket>>>,
    handshake: Mutex<Handshake>,
    running: AtomicBool,
    data_handler: RwLock<Option<DataHandler>>,
    span: Span,
}

/// A session with the XLink Kai engine.
///
/// Payload messages are only sent once the engine acknowledged the connect;
/// connect and disconnect may be sent at any time. `close` is idempotent and
/// also runs on drop.
pub struct XLinkSession {
    shared: Arc<Shared>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    handshake_timeout: Duration,
}

impl XLinkSession {
    /// Create a disconnected session towards `remote`. No socket is opened yet.
    pub fn new(remote: SocketAddr) -> Self {
        let span = tracing::info_span!("xlink", remote = %remote);

        Self {
            shared: Arc::new(Shared {
                remote,
                socket: RwLock::new(None),
                handshake: Mutex::new(Handshake {
                    state: SessionState::Disconnected,
                    started: None,
                }),
                running: AtomicBool::new(false),
                data_handler: RwLock::new(None),
                span,
            }),
            receiver: Mutex::new(None),
            handshake_timeout: CONNECTION_TIMEOUT,
        }
    }

    /// Override the handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Log session events under `span` instead of the default one.
    pub fn with_span(mut self, span: Span) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.span = span;
        }
        self
    }

    /// Set the callback that receives ethernet frames while connected.
    ///
    /// The handler may replace itself; a frame already being delivered still
    /// reaches the previous handler.
    pub fn set_data_handler<F>(&self, handler: F)
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        *write(&self.shared.data_handler) = Some(Arc::new(handler));
    }

    /// Address of the engine.
    pub fn remote(&self) -> SocketAddr {
        self.shared.remote
    }

    /// Open the UDP socket.
    pub fn open(&self) -> Result<(), SessionError> {
        let _entered = self.shared.span.enter();
        let mut socket = write(&self.shared.socket);
        if socket.is_some() {
            return Err(SessionError::AlreadyOpen);
        }

        let created = create_socket(self.shared.remote).map_err(|e| {
            error!("Failed to open socket: {}", e);
            SessionError::Io(e)
        })?;

        *socket = Some(Arc::new(created));
        debug!("Socket opened");
        Ok(())
    }

    /// Whether the socket is open.
    pub fn is_open(&self) -> bool {
        read(&self.shared.socket).is_some()
    }

    /// Local address of the socket, if open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        read(&self.shared.socket)
            .as_ref()
            .and_then(|socket| socket.local_addr().ok())
    }

    /// Current connection state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Neither connected nor waiting for the engine.
    pub fn is_disconnected(&self) -> bool {
        self.state() == SessionState::Disconnected
    }

    /// Send the connect message and start waiting for the acknowledgement.
    ///
    /// Starts the receiver thread if it is not running yet. On a send failure
    /// the session stays disconnected.
    pub fn connect(&self) -> Result<(), SessionError> {
        {
            let mut handshake = lock(&self.shared.handshake);
            if handshake.state != SessionState::Disconnected {
                return Ok(());
            }
            handshake.state = SessionState::ConnectPending;
            handshake.started = Some(Instant::now());
        }

        if let Err(e) = self.shared.send(CONNECT_MESSAGE) {
            self.shared.reset();
            return Err(e);
        }

        if let Err(e) = self.start_receiver() {
            self.shared.reset();
            return Err(e);
        }

        Ok(())
    }

    /// Send one message as a single datagram.
    pub fn send(&self, message: &[u8]) -> Result<(), SessionError> {
        self.shared.send(message)
    }

    /// Send an ethernet frame wrapped in the data command.
    pub fn send_ethernet_data(&self, frame: &[u8]) -> Result<(), SessionError> {
        self.shared.send(&encode_ethernet_data(frame))
    }

    /// Start the background receiver if it is not already running.
    pub fn start_receiver(&self) -> Result<(), SessionError> {
        let socket = read(&self.shared.socket)
            .clone()
            .ok_or_else(|| {
                let _entered = self.shared.span.enter();
                error!("Can't start receiving without an opened socket!");
                SessionError::SocketClosed
            })?;

        let mut receiver = lock(&self.receiver);
        if let Some(handle) = receiver.as_ref() {
            if self.shared.running.load(Ordering::SeqCst) && !handle.is_finished() {
                return Ok(());
            }
        }
        // A receiver that gave up on a handshake is stopping or stopped.
        if let Some(stopped) = receiver.take() {
            if stopped.thread().id() != thread::current().id() {
                let _ = stopped.join();
            }
        }

        self.shared.running.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let timeout = self.handshake_timeout;
        let handle = thread::Builder::new()
            .name("xlink-receiver".to_string())
            .spawn(move || shared.receive_loop(&socket, timeout))?;

        *receiver = Some(handle);
        Ok(())
    }

    /// Disconnect and release the socket.
    ///
    /// Sends the disconnect message if a handshake was started, stops and
    /// joins the receiver, then closes the socket. Safe to call repeatedly.
    pub fn close(&self) {
        let _entered = self.shared.span.enter();

        if self.state() != SessionState::Disconnected {
            if let Err(e) = self.shared.send(DISCONNECT_MESSAGE) {
                warn!("Failed to send disconnect: {}", e);
            }
        }

        self.shared.running.store(false, Ordering::SeqCst);

        if let Some(handle) = lock(&self.receiver).take() {
            // Closing from inside a data handler must not join itself.
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("XLink Kai receiver thread panicked");
            }
        }

        if write(&self.shared.socket).take().is_some() {
            debug!("Socket closed");
        }
        self.shared.reset();
    }
}

impl Drop for XLinkSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn state(&self) -> SessionState {
        lock(&self.handshake).state
    }

    fn reset(&self) {
        let mut handshake = lock(&self.handshake);
        handshake.state = SessionState::Disconnected;
        handshake.started = None;
    }

    fn send(&self, message: &[u8]) -> Result<(), SessionError> {
        let socket = read(&self.socket).clone().ok_or_else(|| {
            debug!("Could not send message on closed socket.");
            SessionError::SocketClosed
        })?;

        if self.state() != SessionState::Connected && !is_control_message(message) {
            debug!("No other messages before XLink Kai has connected!");
            return Err(SessionError::NotConnected);
        }

        trace!("Sent: {}", String::from_utf8_lossy(message));
        socket.send_to(message, self.remote).map_err(|e| {
            error!(
                "Could not send message! {}: {}",
                String::from_utf8_lossy(message),
                e
            );
            SessionError::Io(e)
        })?;

        Ok(())
    }

    fn handshake_expired(&self, timeout: Duration) -> bool {
        let handshake = lock(&self.handshake);
        handshake.state == SessionState::ConnectPending
            && handshake
                .started
                .is_some_and(|started| started.elapsed() > timeout)
    }

    fn receive_loop(&self, socket: &UdpSocket, timeout: Duration) {
        let _entered = self.span.enter();
        let mut buffer = vec![0u8; MAX_DATAGRAM_LENGTH];

        while self.running.load(Ordering::SeqCst) {
            if self.handshake_expired(timeout) {
                error!("Timeout waiting for XLink Kai to connect");
                self.running.store(false, Ordering::SeqCst);
                write(&self.socket).take();
                self.reset();
                break;
            }

            match socket.recv_from(&mut buffer) {
                Ok((length, from)) => {
                    if from != self.remote {
                        debug!("Ignoring datagram from {}", from);
                        continue;
                    }
                    self.handle_datagram(&buffer[..length]);
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    debug!("Receive error: {}", e);
                }
            }
        }

        debug!("Receiver stopped");
    }

    fn handle_datagram(&self, datagram: &[u8]) {
        let command = ProtocolCommand::parse(datagram);

        match command {
            ProtocolCommand::Connected { payload } => {
                let mut handshake = lock(&self.handshake);
                if handshake.state == SessionState::ConnectPending {
                    handshake.state = SessionState::Connected;
                    handshake.started = None;
                    info!(
                        "XLink Kai successfully connected: {}",
                        String::from_utf8_lossy(payload)
                    );
                } else {
                    debug!("Ignoring connect acknowledgement while {:?}", handshake.state);
                }
            }
            ProtocolCommand::KeepAlive => {
                if self.state() == SessionState::Connected {
                    if let Err(e) = self.send(KEEPALIVE_MESSAGE) {
                        warn!("Failed to answer keepalive: {}", e);
                    }
                } else {
                    debug!("Ignoring keepalive before XLink Kai has connected");
                }
            }
            ProtocolCommand::EthernetData { frame } => {
                if self.state() != SessionState::Connected {
                    debug!("Dropping data received before XLink Kai has connected");
                    return;
                }
                trace!("Data: {} bytes", frame.len());
                let handler = read(&self.data_handler).clone();
                if let Some(handler) = handler {
                    handler(frame);
                }
            }
            ProtocolCommand::Unknown { .. } => {
                debug!("Unknown command received: {}", command.tag());
            }
        }
    }
}

/// Create an unbound-peer UDP socket whose reads time out after [`POLL_INTERVAL`].
fn create_socket(remote: SocketAddr) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(remote), Type::DGRAM, Some(Protocol::UDP))?;

    let local: SocketAddr = match remote {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    socket.bind(&local.into())?;
    socket.set_read_timeout(Some(POLL_INTERVAL))?;

    Ok(socket.into())
}
