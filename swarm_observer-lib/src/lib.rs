//! swarm_observer-lib: passive master tracking and interval aggregation for a sensor swarm

pub mod packet;
pub mod state;
pub mod tracker;
pub mod aggregator;
pub mod report;

pub mod config;
pub mod coordinator;
pub mod listener;
pub mod ticker;
pub mod sink;

// broadcast fan-out to live consumers:
pub mod context;
pub mod message;

// re-exports for ergonomic imports:
pub use config::SwarmConfig;
pub use context::Context;
pub use coordinator::{CoordinatorError, CoordinatorService, Status};
pub use message::Message;
pub use packet::{Packet, PacketType};
pub use state::SwarmState;
