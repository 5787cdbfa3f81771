use log::{debug, info};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};

use crate::aggregator::{self, Scale, TickResult};
use crate::coordinator::Shared;
use crate::message::Message;
use crate::report::{self, Report, ReportSettings};
use crate::state::SwarmState;

/// Everything one tick produced, captured under the state lock.
#[derive(Clone, Debug, PartialEq)]
pub struct TickOutcome {
    pub result: TickResult,
    pub trace: Vec<u8>,
    pub report: Option<Report>,
}

/// Close the window and build the report in one step, so no packet can slip
/// in between the snapshot and the credit.
pub fn close_window(state: &mut SwarmState, scale: Scale, settings: &ReportSettings) -> TickOutcome {
    let result = aggregator::tick(state, scale);
    let report = report::generate(state, &result, settings);
    TickOutcome { result, trace: state.trace.levels(), report }
}

/// Fixed-period aggregation loop.
pub async fn run_ticker(shared: Shared, mut stop: watch::Receiver<bool>) {
    let period = shared.tick_period;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let outcome = {
            let mut state = shared.state.lock().await;
            close_window(&mut state, shared.scale, &shared.report_settings)
        };
        publish(&outcome, &shared).await;
    }
    info!("Interval processing stopped");
}

/// Sink I/O for one tick. Runs with the state lock released.
pub async fn publish(outcome: &TickOutcome, shared: &Shared) {
    shared.render(&outcome.trace);

    match outcome.result {
        TickResult::Data { average, scaled_level, samples } => {
            debug!("interval: {} readings, avg={:.2}, level={}", samples, average, scaled_level);
            shared.log.log(&format!(
                "Interval average reading: {:.2}, Scaled: {}",
                average, scaled_level
            ));
        }
        TickResult::Empty => {
            debug!("interval: no readings");
            shared.log.log("No readings received in this interval.");
        }
    }

    let (average, level) = match outcome.result {
        TickResult::Data { average, scaled_level, .. } => (Some(average), scaled_level),
        TickResult::Empty => (None, 0),
    };
    shared.ctx.publish(Message::Tick { average, level, trace: outcome.trace.clone() });

    if let Some(report) = &outcome.report {
        shared.ctx.publish(Message::Report(report.clone()));
        shared.telemetry.deliver(report).await;
    }
}
