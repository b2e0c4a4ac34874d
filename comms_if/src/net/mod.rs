//! # Network Module
//!
//! This module provides networking abstractions over websockets, the transport used by the driving
//! simulator. The simulator is the client, so the software listens for it to connect and then
//! exchanges text frames with it.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    time::Duration
};
use log::debug;
use serde::Deserialize;
use tungstenite::{Message, WebSocket, error::ProtocolError};

// Export tungstenite
pub use tungstenite;

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

macro_rules! set_sockopts {
    ($stream:expr, $(($opt:ident, $val:expr)),+) => {
        $(
            $stream.$opt($val)
                .map_err(|e| NetError::SocketOptionError(stringify!($opt).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Network parameters, loaded from `net.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct NetParams {
    /// Address the simulator server listens on, for example `"0.0.0.0:4567"`.
    pub sim_endpoint: String,

    /// Receive timeout in milliseconds, zero blocks forever.
    #[serde(default)]
    pub recv_timeout_ms: u64,

    /// Send timeout in milliseconds, zero blocks forever.
    #[serde(default)]
    pub send_timeout_ms: u64
}

/// Listens for websocket connections.
pub struct SimListener {
    listener: TcpListener,

    socket_options: SocketOptions
}

/// A websocket connection with a single peer.
pub struct SimSocket {
    ws: WebSocket<TcpStream>,

    peer: SocketAddr,

    connected: bool
}

/// Represents options which can be set on an accepted socket.
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    /// Maximum time before a receive returns with no data. `None` blocks forever.
    ///
    /// The default value is `None`.
    pub recv_timeout: Option<Duration>,

    /// Maximum time before a send fails. `None` blocks forever.
    ///
    /// The default value is `None`.
    pub send_timeout: Option<Duration>,

    /// Disable Nagle's algorithm, commands are tiny and must go out straight away.
    ///
    /// The default value is `true`.
    pub nodelay: bool
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum NetError {
    #[error("Could not bind to {0}: {1}")]
    BindError(String, io::Error),

    #[error("Could not accept a connection: {0}")]
    AcceptError(io::Error),

    #[error("Websocket handshake failed: {0}")]
    HandshakeError(String),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(String, io::Error),

    #[error("The peer has disconnected")]
    Disconnected,

    #[error("Could not receive a message: {0}")]
    RecvError(tungstenite::Error),

    #[error("Could not send a message: {0}")]
    SendError(tungstenite::Error)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NetParams {
    /// Build the socket options described by these parameters.
    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            recv_timeout: millis_to_timeout(self.recv_timeout_ms),
            send_timeout: millis_to_timeout(self.send_timeout_ms),
            ..Default::default()
        }
    }
}

impl SimListener {
    /// Bind a new listener to the given endpoint.
    ///
    /// Sockets accepted by this listener will have the given options set on them.
    pub fn bind(endpoint: &str, socket_options: SocketOptions) -> Result<Self, NetError> {
        let listener = TcpListener::bind(endpoint)
            .map_err(|e| NetError::BindError(endpoint.into(), e))?;

        Ok(Self {
            listener,
            socket_options
        })
    }

    /// The address the listener is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, NetError> {
        self.listener.local_addr().map_err(NetError::AcceptError)
    }

    /// Block until a client connects and completes the websocket handshake.
    ///
    /// Any request path is accepted, the simulator asks for `/socket.io/...`.
    pub fn accept(&self) -> Result<SimSocket, NetError> {
        let (stream, peer) = self.listener.accept()
            .map_err(NetError::AcceptError)?;

        debug!("TCP connection from {}, starting handshake", peer);

        let ws = tungstenite::accept(stream)
            .map_err(|e| NetError::HandshakeError(e.to_string()))?;

        // Timeouts are only set after the handshake, which must not be interrupted
        self.socket_options.set(ws.get_ref())?;

        Ok(SimSocket {
            ws,
            peer,
            connected: true
        })
    }
}

impl SimSocket {
    /// Return if the socket is connected or not.
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Address of the connected peer.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Receive the next text frame.
    ///
    /// Returns `Ok(None)` if no text arrived, which happens on control and binary frames and when
    /// the receive timeout elapses. Pings are answered automatically.
    pub fn recv_text(&mut self) -> Result<Option<String>, NetError> {
        match self.ws.read() {
            Ok(Message::Text(s)) => Ok(Some(s)),
            Ok(Message::Close(_)) => {
                // Flushing completes the closing handshake, failure just means the peer is gone
                self.ws.flush().ok();
                self.connected = false;
                Err(NetError::Disconnected)
            },
            Ok(_) => Ok(None),
            Err(tungstenite::Error::Io(ref e)) if is_timeout(e) => Ok(None),
            Err(e) => Err(self.map_error(e, NetError::RecvError))
        }
    }

    /// Send a text frame to the peer.
    pub fn send_text(&mut self, text: String) -> Result<(), NetError> {
        if !self.connected {
            return Err(NetError::Disconnected)
        }

        self.ws.send(Message::Text(text))
            .map_err(|e| self.map_error(e, NetError::SendError))
    }

    /// Turn a websocket error into a `NetError`, noting if it means the peer is gone.
    fn map_error<F>(&mut self, err: tungstenite::Error, other: F) -> NetError
    where
        F: FnOnce(tungstenite::Error) -> NetError
    {
        if is_disconnect(&err) {
            self.connected = false;
            NetError::Disconnected
        }
        else {
            other(err)
        }
    }
}

impl SocketOptions {
    /// Set these options on the given stream.
    pub fn set(&self, stream: &TcpStream) -> Result<(), NetError> {
        set_sockopts!(
            stream,
            (set_read_timeout, self.recv_timeout),
            (set_write_timeout, self.send_timeout),
            (set_nodelay, self.nodelay)
        );

        Ok(())
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            recv_timeout: None,
            send_timeout: None,
            nodelay: true
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn millis_to_timeout(ms: u64) -> Option<Duration> {
    match ms {
        0 => None,
        ms => Some(Duration::from_millis(ms))
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

fn is_disconnect(err: &tungstenite::Error) -> bool {
    match err {
        tungstenite::Error::ConnectionClosed
        | tungstenite::Error::AlreadyClosed
        | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        tungstenite::Error::Io(e) => matches!(
            e.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
        ),
        _ => false
    }
}
