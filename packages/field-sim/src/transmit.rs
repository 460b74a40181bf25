//! UDP transmitter for simulated `$PANDA` sentences.
//!
//! Sends to a unicast target (always) and, optionally, to a broadcast
//! address on the same subnet — mirroring the real GPS-to-guidance path,
//! where a serial-to-UDP bridge or the receiver's own broadcast fans the
//! sentence out to every listener on the implement network. Send errors
//! are logged, never fatal: one dropped datagram is just a dropped fix,
//! handled the same way a real radio glitch would be.

use std::net::UdpSocket;
use tracing::{debug, warn};

pub struct NmeaTransmitter {
    socket: UdpSocket,
    target_addr: String,
    broadcast_addr: Option<String>,
}

impl NmeaTransmitter {
    pub fn new(target_addr: &str, broadcast_addr: Option<&str>) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(false)?;
        if broadcast_addr.is_some() {
            socket.set_broadcast(true)?;
        }
        Ok(Self {
            socket,
            target_addr: target_addr.to_string(),
            broadcast_addr: broadcast_addr.map(|s| s.to_string()),
        })
    }

    pub fn send(&self, sentence: &str) {
        if let Err(e) = self.socket.send_to(sentence.as_bytes(), &self.target_addr) {
            warn!("field-sim: udp send to {} failed: {e}", self.target_addr);
        } else {
            debug!("field-sim: sent {} bytes to {}", sentence.len(), self.target_addr);
        }
        if let Some(addr) = &self.broadcast_addr {
            if let Err(e) = self.socket.send_to(sentence.as_bytes(), addr) {
                warn!("field-sim: udp broadcast to {addr} failed: {e}");
            }
        }
    }
}
