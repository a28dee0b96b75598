//! WebSocket server for the group broker.
//!
//! One acceptor thread hands every socket to its own connection pump.

use std::{
    net::{IpAddr, TcpListener},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Result;

use super::{Broker, connection::Connection};
use crate::{debug, log};

/// Maximum port retry attempts
const MAX_PORT_RETRIES: u16 = 10;

/// Running broker server.
pub struct BrokerServer {
    port: u16,
    running: Arc<AtomicBool>,
}

impl BrokerServer {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting and close every connection on its next poll.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Drop for BrokerServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bind (retrying on the next ports if busy) and start accepting.
pub fn start_broker_server(broker: Arc<Broker>, interface: IpAddr, base_port: u16) -> Result<BrokerServer> {
    let (listener, port) = try_bind_port(interface, base_port, MAX_PORT_RETRIES)?;
    listener.set_nonblocking(true)?;

    let running = Arc::new(AtomicBool::new(true));
    let accept_running = Arc::clone(&running);

    std::thread::Builder::new()
        .name("broker-accept".into())
        .spawn(move || {
            while accept_running.load(Ordering::Relaxed) {
                match listener.accept() {
                    Ok((stream, addr)) => {
                        debug!("broker"; "client connected: {addr}");
                        let broker = Arc::clone(&broker);
                        let running = Arc::clone(&accept_running);
                        std::thread::spawn(move || match Connection::accept(stream, broker) {
                            Ok(connection) => connection.run(&running),
                            Err(e) => log!("broker"; "handshake failed: {e}"),
                        });
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    Err(e) => {
                        log!("broker"; "accept error: {e}");
                        std::thread::sleep(Duration::from_millis(100));
                    }
                }
            }
            debug!("broker"; "acceptor stopped");
        })?;

    Ok(BrokerServer { port, running })
}

/// Try binding to port, retry with incremented port if in use
fn try_bind_port(interface: IpAddr, base_port: u16, max_retries: u16) -> Result<(TcpListener, u16)> {
    let mut last_error = None;

    for offset in 0..max_retries {
        let port = base_port.saturating_add(offset);
        match TcpListener::bind((interface, port)) {
            Ok(listener) => {
                let actual_port = listener.local_addr()?.port();
                return Ok((listener, actual_port));
            }
            Err(e) => last_error = Some(e),
        }
    }

    Err(anyhow::anyhow!(
        "failed to bind broker on {interface} after {max_retries} attempts: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}
