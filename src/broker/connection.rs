//! Per-connection pump.
//!
//! Each accepted socket gets one thread that alternates between draining
//! the connection's outbound queue and polling the socket for client
//! messages. The socket is non-blocking after the handshake.

use std::{
    net::TcpStream,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use crossbeam::channel::{Receiver, TryRecvError};
use tungstenite::{Message, WebSocket};

use super::{Broker, ConnectionId};
use crate::{
    debug,
    protocol::{ClientMessage, ServerMessage},
};

/// Sleep between polls when nothing moved.
const IDLE_POLL: Duration = Duration::from_millis(10);

pub(super) struct Connection {
    id: ConnectionId,
    ws: WebSocket<TcpStream>,
    outbound: Receiver<ServerMessage>,
    broker: Arc<Broker>,
}

enum Step {
    Idle,
    Busy,
    Closed,
}

impl Connection {
    /// Handshake and register with the broker.
    pub fn accept(stream: TcpStream, broker: Arc<Broker>) -> Result<Self, tungstenite::Error> {
        // Blocking during the handshake, polled afterwards
        stream.set_nonblocking(false)?;
        let ws = tungstenite::accept(stream).map_err(|e| match e {
            tungstenite::HandshakeError::Failure(e) => e,
            tungstenite::HandshakeError::Interrupted(_) => {
                tungstenite::Error::Io(std::io::ErrorKind::WouldBlock.into())
            }
        })?;
        ws.get_ref().set_nonblocking(true)?;

        let (id, outbound) = broker.connect();
        Ok(Self {
            id,
            ws,
            outbound,
            broker,
        })
    }

    pub fn run(mut self, running: &AtomicBool) {
        if self.write(ServerMessage::connected()).is_err() {
            self.broker.remove_connection(self.id);
            return;
        }

        while running.load(Ordering::Relaxed) {
            let outbound = self.drain_outbound();
            let inbound = self.poll_inbound();
            match (outbound, inbound) {
                (Step::Closed, _) | (_, Step::Closed) => break,
                (Step::Idle, Step::Idle) => std::thread::sleep(IDLE_POLL),
                _ => {}
            }
        }

        let _ = self.ws.close(None);
        let _ = self.ws.flush();
        self.broker.remove_connection(self.id);
    }

    fn drain_outbound(&mut self) -> Step {
        let mut step = Step::Idle;
        loop {
            match self.outbound.try_recv() {
                Ok(message) => {
                    if self.write(message).is_err() {
                        return Step::Closed;
                    }
                    step = Step::Busy;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return Step::Closed,
            }
        }
        match self.ws.flush() {
            Ok(()) => step,
            Err(e) if would_block(&e) => step,
            Err(_) => Step::Closed,
        }
    }

    fn poll_inbound(&mut self) -> Step {
        match self.ws.read() {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => self.broker.handle(self.id, message),
                    Err(e) => debug!("broker"; "connection {}: bad message: {e}", self.id),
                }
                Step::Busy
            }
            Ok(Message::Close(_)) => Step::Closed,
            Ok(_) => Step::Busy,
            Err(e) if would_block(&e) => Step::Idle,
            Err(e) => {
                debug!("broker"; "connection {} dropped: {e}", self.id);
                Step::Closed
            }
        }
    }

    fn write(&mut self, message: ServerMessage) -> Result<(), tungstenite::Error> {
        match self.ws.write(Message::Text(message.to_json().into())) {
            Ok(()) => Ok(()),
            Err(e) if would_block(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn would_block(e: &tungstenite::Error) -> bool {
    matches!(e, tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::WouldBlock)
}
