use chrono::{DateTime, Utc};
use std::net::IpAddr;

use crate::packet::{Packet, PacketType};
use crate::state::SwarmState;

/// What one observed packet did to the swarm state.
#[derive(Clone, Debug, PartialEq)]
pub enum ObservationOutcome {
    /// A reading from the current master joined the open interval.
    CreditedReading { device_id: u8, ip: IpAddr, reading: u16 },
    /// A new master took over. `retired` is the previous master and how
    /// long it held the role; `credited` is set when the first reading
    /// was positive and joined the interval.
    MasterInstalled {
        device_id: u8,
        ip: IpAddr,
        reading: u16,
        retired: Option<MasterRetired>,
        credited: bool,
    },
    /// Another node asked the swarm to reset. Nothing is mutated here.
    SwarmResetRequested { device_id: u8, ip: IpAddr },
}

#[derive(Clone, Debug, PartialEq)]
pub struct MasterRetired {
    pub device_id: u8,
    pub duration: chrono::Duration,
}

/// Feed one valid packet into the master state machine.
///
/// The most recent LightUpdate sender is always the master. The first
/// packet of a new master is credited only when its reading is positive.
pub fn observe(
    state: &mut SwarmState,
    packet: &Packet,
    source: IpAddr,
    now: DateTime<Utc>,
) -> ObservationOutcome {
    state.device_ips.insert(packet.device_id, source);

    match packet.packet_type {
        PacketType::ResetSwarm => ObservationOutcome::SwarmResetRequested {
            device_id: packet.device_id,
            ip: source,
        },
        PacketType::LightUpdate if state.current_master == Some(packet.device_id) => {
            state.interval_readings.push(packet.reading);
            if packet.reading > 0 {
                state.have_first_creditable_reading = true;
            }
            ObservationOutcome::CreditedReading {
                device_id: packet.device_id,
                ip: source,
                reading: packet.reading,
            }
        }
        PacketType::LightUpdate => {
            let retired = state.current_master.map(|old| MasterRetired {
                device_id: old,
                duration: state
                    .master_since
                    .map(|since| now - since)
                    .unwrap_or_else(chrono::Duration::zero),
            });

            state.current_master = Some(packet.device_id);
            state.current_master_ip = Some(source);
            state.master_since = Some(now);

            let credited = packet.reading > 0;
            if credited {
                state.have_first_creditable_reading = true;
                state.interval_readings.push(packet.reading);
            }

            ObservationOutcome::MasterInstalled {
                device_id: packet.device_id,
                ip: source,
                reading: packet.reading,
                retired,
                credited,
            }
        }
    }
}
