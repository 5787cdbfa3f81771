use serde::{Deserialize, Serialize};

use crate::report::Report;

/// Events that can be broadcast to live consumers:
/// - master changes and per-tick summaries as they happen
/// - `Report` whenever both telemetry payloads are produced
/// - session lifecycle and outbound reset packets
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Message {
    MasterInstalled { device_id: u8, ip: String, reading: u16 },
    MasterRetired   { device_id: u8, seconds: f64 },
    Tick            { average: Option<f64>, level: u8, trace: Vec<u8> },
    Report          (Report),
    ResetBroadcast,
    SessionStarted  { log_file: Option<String> },
    SessionStopped,
}
