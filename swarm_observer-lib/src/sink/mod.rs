//! Outbound adapters: display, telemetry and the per-session text log.

pub mod display;
pub mod influx;
pub mod session_log;
pub mod telemetry;

use influxdb2::BuildError;
use influxdb2::models::data_point::DataPointError;
use thiserror::Error;

/// Delivery to an external collaborator failed. Always logged and swallowed
/// by the caller; never affects swarm state.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("HTTP delivery failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telemetry endpoint answered {0}")]
    Status(u16),

    #[error("InfluxDB write error: {0}")]
    Influx(#[from] influxdb2::RequestError),

    #[error("Point build error: {0}")]
    BuildPoint(#[from] DataPointError),

    #[error("InfluxDB client build error: {0}")]
    ClientBuild(#[from] BuildError),

    #[error("Timestamp precision overflow converting to nanoseconds")]
    TimestampOverflow,
}

pub use display::{DisplaySink, FrameLogDisplay};
pub use influx::InfluxSink;
pub use session_log::SessionLogger;
pub use telemetry::{NodeRedSink, Telemetry, TelemetrySink};
