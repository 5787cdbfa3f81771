use serde::{Deserialize, Serialize};

use crate::aggregator::TickResult;
use crate::state::SwarmState;

/// One point on the scalar time series. `value: None` tells the sink to reset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LineSeriesPoint {
    pub value: Option<f64>,
    pub label: String,
}

impl LineSeriesPoint {
    pub fn reset() -> Self {
        Self { value: None, label: "reset".into() }
    }
}

/// Cumulative seconds-as-master per device, current master first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BarChartSnapshot {
    pub series: Vec<String>,
    pub values: Vec<Vec<u64>>,
    pub window_label: String,
}

impl BarChartSnapshot {
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub line: LineSeriesPoint,
    pub bar: BarChartSnapshot,
}

#[derive(Clone, Debug)]
pub struct ReportSettings {
    pub baseline: f64,
    pub window_label: String,
}

pub fn device_label(device_id: u8) -> String {
    format!("Dev0x{:02X}", device_id)
}

/// Credit the sitting master with one second and build both payloads.
///
/// Returns `None` until some master has produced a positive reading, in
/// which case nothing is credited either.
pub fn generate(
    state: &mut SwarmState,
    tick: &TickResult,
    settings: &ReportSettings,
) -> Option<Report> {
    let master = state.current_master?;
    if !state.have_first_creditable_reading {
        return None;
    }

    state.credit_second(master);

    let mut devices = Vec::with_capacity(state.credit_order.len());
    devices.push(master);
    devices.extend(state.credit_order.iter().copied().filter(|&d| d != master));

    let bar = BarChartSnapshot {
        series: devices.iter().map(|&d| device_label(d)).collect(),
        values: devices
            .iter()
            .map(|d| vec![state.cumulative_master_secs.get(d).copied().unwrap_or(0)])
            .collect(),
        window_label: settings.window_label.clone(),
    };

    let label = state
        .current_master_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "no_master".into());

    Some(Report {
        line: LineSeriesPoint { value: Some(tick.line_value(settings.baseline)), label },
        bar,
    })
}
