//! Hardware-module transport (spec §6): outbound section bitmask +
//! steering command framed as a PGN datagram, broadcast on UDP 8888;
//! inbound module telemetry received on 9999.
//!
//! Runs as its own Tokio task, outside the synchronous control loop: the
//! pipeline coordinator pushes frames in over an `mpsc` channel and this
//! task owns the socket. UDP send errors never crash the loop — they are
//! counted and logged, same as the teacher's UWB hub never lets a
//! malformed packet take the listener down.

use std::net::SocketAddr;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::TransportError;

pub const BROADCAST_PORT: u16 = 8888;
pub const RECEIVE_PORT: u16 = 9999;

const PGN_STEER_AND_SECTIONS: u16 = 0x7F00;

/// Outbound frame: section bitmask (16 sections) + steering command in
/// signed centidegrees. `#[repr(C)]` so the byte layout is the wire layout.
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct SteerAndSectionsFrame {
    pub pgn: u16,
    pub section_bitmask: u16,
    pub steer_centidegrees: i16,
    pub _pad: u16,
}

impl SteerAndSectionsFrame {
    pub fn new(section_bitmask: u16, steer_angle_rad: f64) -> Self {
        let centideg = (steer_angle_rad.to_degrees() * 100.0).round().clamp(i16::MIN as f64, i16::MAX as f64);
        Self {
            pgn: PGN_STEER_AND_SECTIONS,
            section_bitmask,
            steer_centidegrees: centideg as i16,
            _pad: 0,
        }
    }

    pub fn steer_degrees(&self) -> f64 {
        self.steer_centidegrees as f64 / 100.0
    }
}

pub struct TransportConfig {
    pub broadcast_addr: SocketAddr,
    pub bind_addr: SocketAddr,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            broadcast_addr: format!("255.255.255.255:{BROADCAST_PORT}").parse().unwrap(),
            bind_addr: format!("0.0.0.0:{RECEIVE_PORT}").parse().unwrap(),
        }
    }
}

/// Spawns the outbound broadcast task. Takes frames off `rx` and sends
/// each as a single UDP datagram; never returns on send failure, it just
/// counts and logs.
pub async fn run_outbound(
    config: TransportConfig,
    mut rx: mpsc::Receiver<SteerAndSectionsFrame>,
    error_tx: mpsc::Sender<TransportError>,
) {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(s) => s,
        Err(e) => {
            warn!("transport: could not bind outbound socket: {e}");
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        warn!("transport: could not enable broadcast: {e}");
        return;
    }

    while let Some(frame) = rx.recv().await {
        let bytes = bytemuck::bytes_of(&frame);
        if let Err(e) = socket.send_to(bytes, config.broadcast_addr).await {
            let _ = error_tx.try_send(TransportError::Send(e));
            warn!("transport: UDP send failed: {e}");
        } else {
            debug!(
                "transport: sent bitmask={:#06x} steer={:.2}deg",
                frame.section_bitmask,
                frame.steer_degrees()
            );
        }
    }
}

/// Listens for inbound module frames (e.g. acknowledgements, button
/// state from the physical switch box). Never crashes on a malformed
/// datagram — logs and keeps listening.
pub async fn run_inbound(config: TransportConfig, tx: mpsc::Sender<Vec<u8>>) {
    let socket = match UdpSocket::bind(config.bind_addr).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            warn!("transport: could not bind inbound socket {}: {e}", config.bind_addr);
            return;
        }
    };
    let mut buf = vec![0u8; 1500];
    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, src)) => {
                debug!("transport: received {len} bytes from {src}");
                let _ = tx.try_send(buf[..len].to_vec());
            }
            Err(e) => {
                warn!("transport: UDP recv error: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_steering_angle() {
        let frame = SteerAndSectionsFrame::new(0b0000_0000_0000_0101, 10.0_f64.to_radians());
        assert_eq!(frame.section_bitmask, 0b101);
        assert!((frame.steer_degrees() - 10.0).abs() < 0.01);
    }

    #[test]
    fn negative_steer_angle_encodes_as_negative_centidegrees() {
        let frame = SteerAndSectionsFrame::new(0, (-5.0_f64).to_radians());
        assert!(frame.steer_centidegrees < 0);
        assert!((frame.steer_degrees() + 5.0).abs() < 0.01);
    }

    #[test]
    fn frame_byte_layout_is_eight_bytes() {
        assert_eq!(std::mem::size_of::<SteerAndSectionsFrame>(), 8);
    }

    #[test]
    fn extreme_steer_angle_clamps_to_i16_range() {
        let frame = SteerAndSectionsFrame::new(0, 720.0_f64.to_radians());
        assert_eq!(frame.steer_centidegrees, i16::MAX);
    }
}
