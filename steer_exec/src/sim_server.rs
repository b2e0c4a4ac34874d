//! # Simulator Server Module
//!
//! This module abstracts over the networking side of the steering executable. The driving
//! simulator connects to the server, sends telemetry events and expects a command in response to
//! each one.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::net::SocketAddr;
use comms_if::{
    net::{NetError, NetParams, SimListener, SimSocket},
    sim::{FrameError, SimCmd, SimEvent}
};
use log::{info, trace, warn};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An abstraction over the networking part of the steering executable.
///
/// Only one simulator may be connected at a time.
pub struct SimServer {
    listener: SimListener,

    /// The connected simulator, if any
    socket: Option<SimSocket>
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors which can occur in the [`SimServer`]
#[derive(thiserror::Error, Debug)]
pub enum SimServerError {
    #[error("Socket error: {0}")]
    SocketError(#[from] NetError),

    #[error("Not connected to the simulator")]
    NotConnected,

    #[error("Could not encode the command: {0}")]
    EncodeError(FrameError)
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimServer {

    /// Create a new instance of the simulator server.
    ///
    /// This function will not wait for a connection from the simulator before returning.
    pub fn new(params: &NetParams) -> Result<Self, SimServerError> {
        let listener = SimListener::bind(&params.sim_endpoint, params.socket_options())?;

        Ok(Self {
            listener,
            socket: None
        })
    }

    /// The address the server listens on.
    pub fn local_addr(&self) -> Result<SocketAddr, SimServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns true if a simulator is connected.
    pub fn connected(&self) -> bool {
        self.socket.as_ref().map(SimSocket::connected).unwrap_or(false)
    }

    /// Block until a simulator connects, replacing any previous connection.
    pub fn accept(&mut self) -> Result<SocketAddr, SimServerError> {
        let socket = self.listener.accept()?;
        let peer = socket.peer();

        info!("Simulator connected from {}", peer);

        self.socket = Some(socket);

        Ok(peer)
    }

    /// Receive the next event from the simulator.
    ///
    /// `None` is returned if no event arrived. Frames which cannot be decoded are logged and
    /// skipped.
    pub fn recv_event(&mut self) -> Result<Option<SimEvent>, SimServerError> {
        let socket = self.socket.as_mut().ok_or(SimServerError::NotConnected)?;

        let frame = match socket.recv_text() {
            Ok(Some(f)) => f,
            Ok(None) => return Ok(None),
            Err(e) => {
                if !socket.connected() {
                    self.socket = None;
                }
                return Err(e.into())
            }
        };

        trace!("Recieved frame: {}", frame);

        match SimEvent::from_frame(&frame) {
            Ok(e) => Ok(e),
            Err(e) => {
                warn!("Could not decode frame {:?}: {}", frame, e);
                Ok(None)
            }
        }
    }

    /// Send a command to the simulator.
    pub fn send_cmd(&mut self, cmd: &SimCmd) -> Result<(), SimServerError> {
        let socket = self.socket.as_mut().ok_or(SimServerError::NotConnected)?;

        let frame = cmd.to_frame().map_err(SimServerError::EncodeError)?;

        trace!("Sending frame: {}", frame);

        match socket.send_text(frame) {
            Ok(()) => Ok(()),
            Err(e) => {
                if !socket.connected() {
                    self.socket = None;
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;
    use comms_if::net::tungstenite::{self, Message};

    fn params() -> NetParams {
        NetParams {
            sim_endpoint: "127.0.0.1:0".into(),
            recv_timeout_ms: 0,
            send_timeout_ms: 0
        }
    }

    #[test]
    fn test_not_connected() {
        let mut server = SimServer::new(&params()).unwrap();

        assert!(!server.connected());
        assert!(matches!(server.recv_event(), Err(SimServerError::NotConnected)));
        assert!(matches!(
            server.send_cmd(&SimCmd::Manual),
            Err(SimServerError::NotConnected)
        ));
    }

    #[test]
    fn test_telemetry_exchange() {
        let mut server = SimServer::new(&params()).unwrap();
        let addr = server.local_addr().unwrap();

        let client = thread::spawn(move || {
            let url = format!("ws://{}/socket.io/?EIO=4&transport=websocket", addr);
            let (mut ws, _) = tungstenite::connect(url.as_str()).unwrap();

            // Not an event, then a broken event, then telemetry
            ws.send(Message::Text("2".into())).unwrap();
            ws.send(Message::Text("42[\"telemetry\",{\"cte\":}]".into())).unwrap();
            ws.send(Message::Text(
                "42[\"telemetry\",{\"cte\":\"0.5\",\"speed\":\"12.0\",\"steering_angle\":\"0\"}]"
                    .into()
            )).unwrap();

            let reply = loop {
                match ws.read().unwrap() {
                    Message::Text(s) => break s,
                    _ => continue
                }
            };

            ws.close(None).unwrap();
            while ws.read().is_ok() {}

            reply
        });

        server.accept().unwrap();
        assert!(server.connected());

        let event = loop {
            if let Some(e) = server.recv_event().unwrap() {
                break e
            }
        };

        match event {
            SimEvent::Telemetry(t) => {
                assert_eq!(t.cte, 0.5);
                assert_eq!(t.speed, 12.0);
            },
            e => panic!("Expected telemetry, got {:?}", e)
        }

        server.send_cmd(&SimCmd::Reset).unwrap();

        loop {
            match server.recv_event() {
                Ok(_) => continue,
                Err(SimServerError::SocketError(NetError::Disconnected)) => break,
                Err(e) => panic!("Unexpected error: {}", e)
            }
        }
        assert!(!server.connected());

        assert_eq!(client.join().unwrap(), "42[\"reset\",{}]");
    }
}
