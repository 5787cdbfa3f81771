use chrono::Utc;
use log::{debug, error, info, warn};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::config::SwarmConfig;
use crate::coordinator::Shared;
use crate::message::Message;
use crate::packet::{self, Packet};
use crate::tracker::{self, ObservationOutcome};

/// Bind the swarm port and, for a multicast group, join it.
pub async fn bind(cfg: &SwarmConfig) -> io::Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddrV4::new(cfg.bind_addr, cfg.port)).await?;
    if cfg.group.is_multicast() {
        socket.join_multicast_v4(cfg.group, cfg.bind_addr)?;
    }
    Ok(socket)
}

/// Broadcast one ResetSwarm packet to the group.
pub async fn send_reset_packet(cfg: &SwarmConfig) -> io::Result<()> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_multicast_ttl_v4(1)?;
    let bytes = packet::encode(&Packet::reset_swarm());
    socket.send_to(&bytes, SocketAddrV4::new(cfg.group, cfg.port)).await?;
    Ok(())
}

/// Receive loop. Waits at most `recv_timeout` per datagram so a stop
/// request is noticed promptly.
pub async fn run_listener(socket: UdpSocket, shared: Shared, mut stop: watch::Receiver<bool>) {
    info!("Listening for swarm packets on {:?}", socket.local_addr());
    let recv_timeout = shared.recv_timeout;
    let mut buf = [0u8; 1024];

    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
            res = tokio::time::timeout(recv_timeout, socket.recv_from(&mut buf)) => {
                match res {
                    // nothing this interval
                    Err(_) => {}
                    Ok(Ok((len, peer))) => {
                        ingest(&buf[..len], peer, &shared).await;
                    }
                    Ok(Err(e)) => {
                        error!("UDP receive error: {}", e);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }
    }
    info!("Listener stopped");
}

/// Decode one datagram and feed it to the tracker. Malformed datagrams never
/// touch the state lock. Logging and event fan-out happen after the lock
/// is released.
pub async fn ingest(data: &[u8], peer: SocketAddr, shared: &Shared) -> Option<ObservationOutcome> {
    // wrong length: not a swarm packet, dropped without a trace
    let framed = packet::frame(data).ok()?;

    let pkt = match packet::decode(framed) {
        Ok(p) => p,
        Err(e) => {
            warn!("invalid packet from {}: {}", peer, e);
            shared.log.log("Received invalid packet");
            return None;
        }
    };
    debug!("packet from {}: {:?}", peer, pkt);

    let outcome = {
        let mut state = shared.state.lock().await;
        tracker::observe(&mut state, &pkt, peer.ip(), Utc::now())
    };

    record(&outcome, shared);
    Some(outcome)
}

fn record(outcome: &ObservationOutcome, shared: &Shared) {
    match outcome {
        ObservationOutcome::CreditedReading { device_id, ip, reading } => {
            shared.log.log(&master_data_line(*device_id, &ip.to_string(), *reading));
        }
        ObservationOutcome::MasterInstalled { device_id, ip, reading, retired, credited } => {
            if let Some(old) = retired {
                let secs = old.duration.num_milliseconds() as f64 / 1000.0;
                shared.log.log(&format!(
                    "Device ID: 0x{:02X} was master for {:.2} seconds.",
                    old.device_id, secs
                ));
                shared.ctx.publish(Message::MasterRetired { device_id: old.device_id, seconds: secs });
            }
            info!("Device 0x{:02X} ({}) is now the master", device_id, ip);
            shared.log.log(&format!("Device ID: 0x{:02X} is now the master.", device_id));
            if *credited {
                shared.log.log(&master_data_line(*device_id, &ip.to_string(), *reading));
            }
            shared.ctx.publish(Message::MasterInstalled {
                device_id: *device_id,
                ip: ip.to_string(),
                reading: *reading,
            });
        }
        ObservationOutcome::SwarmResetRequested { device_id, ip } => {
            warn!("RESET_SWARM_PACKET from 0x{:02X} ({})", device_id, ip);
            shared.log.log("Received RESET_SWARM_PACKET");
        }
    }
}

fn master_data_line(device_id: u8, ip: &str, reading: u16) -> String {
    format!("Master Data: Device ID: 0x{:02X}, IP: {}, Reading: {}", device_id, ip, reading)
}
