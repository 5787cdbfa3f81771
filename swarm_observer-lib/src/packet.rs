use thiserror::Error;

/// Every swarm datagram is exactly this long.
pub const PACKET_LEN: usize = 14;

pub const START_SENTINEL: u8 = 0xF0;
pub const END_SENTINEL: u8 = 0x0F;

const TYPE_OFFSET: usize = 1;
const DEVICE_OFFSET: usize = 2;
const READING_OFFSET: usize = 5;

const LIGHT_UPDATE: u8 = 0;
const RESET_SWARM: u8 = 1;

/// Datagram had the wrong length; dropped at the transport boundary.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("expected a 14-byte datagram, got {len} bytes")]
pub struct FramingError {
    pub len: usize,
}

/// A correctly framed datagram whose contents are not a swarm packet.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPacket {
    #[error("bad start sentinel 0x{0:02X}")]
    BadStartSentinel(u8),

    #[error("bad end sentinel 0x{0:02X}")]
    BadEndSentinel(u8),

    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    LightUpdate,
    ResetSwarm,
}

impl PacketType {
    fn from_byte(b: u8) -> Result<Self, InvalidPacket> {
        match b {
            LIGHT_UPDATE => Ok(Self::LightUpdate),
            RESET_SWARM => Ok(Self::ResetSwarm),
            other => Err(InvalidPacket::UnknownPacketType(other)),
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            Self::LightUpdate => LIGHT_UPDATE,
            Self::ResetSwarm => RESET_SWARM,
        }
    }
}

/// A decoded swarm packet. Reserved bytes are not kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub device_id: u8,
    pub reading: u16,
}

impl Packet {
    pub fn light_update(device_id: u8, reading: u16) -> Self {
        Self { packet_type: PacketType::LightUpdate, device_id, reading }
    }

    /// The control packet this observer broadcasts on an explicit reset.
    pub fn reset_swarm() -> Self {
        Self { packet_type: PacketType::ResetSwarm, device_id: 0, reading: 0 }
    }
}

/// Checks the datagram length before any decoding is attempted.
pub fn frame(data: &[u8]) -> Result<&[u8; PACKET_LEN], FramingError> {
    data.try_into().map_err(|_| FramingError { len: data.len() })
}

/// Validates both sentinels and pulls out type, device id and the
/// big-endian reading at bytes 5..7.
pub fn decode(bytes: &[u8; PACKET_LEN]) -> Result<Packet, InvalidPacket> {
    if bytes[0] != START_SENTINEL {
        return Err(InvalidPacket::BadStartSentinel(bytes[0]));
    }
    if bytes[PACKET_LEN - 1] != END_SENTINEL {
        return Err(InvalidPacket::BadEndSentinel(bytes[PACKET_LEN - 1]));
    }
    let packet_type = PacketType::from_byte(bytes[TYPE_OFFSET])?;
    let reading = u16::from_be_bytes([bytes[READING_OFFSET], bytes[READING_OFFSET + 1]]);

    Ok(Packet {
        packet_type,
        device_id: bytes[DEVICE_OFFSET],
        reading,
    })
}

pub fn encode(packet: &Packet) -> [u8; PACKET_LEN] {
    let mut buf = [0u8; PACKET_LEN];
    buf[0] = START_SENTINEL;
    buf[TYPE_OFFSET] = packet.packet_type.as_byte();
    buf[DEVICE_OFFSET] = packet.device_id;
    buf[READING_OFFSET..READING_OFFSET + 2].copy_from_slice(&packet.reading.to_be_bytes());
    buf[PACKET_LEN - 1] = END_SENTINEL;
    buf
}
