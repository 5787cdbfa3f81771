use crate::state::SwarmState;

/// Maps a sensor average onto display rows.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scale {
    pub full_scale: f64,
    pub height: u8,
}

impl Scale {
    pub fn level(&self, average: f64) -> u8 {
        let raw = (average / self.full_scale * f64::from(self.height)).round();
        raw.clamp(0.0, f64::from(self.height)) as u8
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TickResult {
    Data { average: f64, scaled_level: u8, samples: usize },
    Empty,
}

impl TickResult {
    /// The value sent on the telemetry line; empty ticks fall back to `baseline`.
    pub fn line_value(&self, baseline: f64) -> f64 {
        match self {
            Self::Data { average, .. } => *average,
            Self::Empty => baseline,
        }
    }
}

/// Close the current window: drain the interval readings, push one level
/// onto the trace and report what the window held.
pub fn tick(state: &mut SwarmState, scale: Scale) -> TickResult {
    let readings = std::mem::take(&mut state.interval_readings);

    if readings.is_empty() {
        state.trace.push(0);
        return TickResult::Empty;
    }

    let sum: f64 = readings.iter().map(|&r| f64::from(r)).sum();
    let average = sum / readings.len() as f64;
    let scaled_level = scale.level(average);
    state.trace.push(scaled_level);

    TickResult::Data { average, scaled_level, samples: readings.len() }
}
