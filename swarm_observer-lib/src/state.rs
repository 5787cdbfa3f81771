use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

/// Fixed-capacity FIFO of scaled levels. Starts zero-filled, so it always
/// holds exactly `capacity` entries and a push drops the oldest.
#[derive(Clone, Debug, PartialEq)]
pub struct Trace {
    levels: VecDeque<u8>,
}

impl Trace {
    pub fn new(capacity: usize) -> Self {
        Self { levels: VecDeque::from(vec![0; capacity]) }
    }

    pub fn push(&mut self, level: u8) {
        if self.levels.is_empty() {
            return;
        }
        self.levels.pop_front();
        self.levels.push_back(level);
    }

    pub fn clear(&mut self) {
        self.levels.iter_mut().for_each(|l| *l = 0);
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Oldest first.
    pub fn levels(&self) -> Vec<u8> {
        self.levels.iter().copied().collect()
    }
}

/// Everything the observer knows about the swarm during one session.
/// Guarded by a single lock in the coordinator.
#[derive(Clone, Debug)]
pub struct SwarmState {
    pub device_ips: HashMap<u8, IpAddr>,
    pub current_master: Option<u8>,
    pub current_master_ip: Option<IpAddr>,
    pub master_since: Option<DateTime<Utc>>,
    pub have_first_creditable_reading: bool,
    pub interval_readings: Vec<u16>,
    /// Whole seconds credited per device, one per tick.
    pub cumulative_master_secs: HashMap<u8, u64>,
    /// Device ids in the order they first earned credit.
    pub credit_order: Vec<u8>,
    pub trace: Trace,
}

impl SwarmState {
    pub fn new(trace_len: usize) -> Self {
        Self {
            device_ips: HashMap::new(),
            current_master: None,
            current_master_ip: None,
            master_since: None,
            have_first_creditable_reading: false,
            interval_readings: Vec::new(),
            cumulative_master_secs: HashMap::new(),
            credit_order: Vec::new(),
            trace: Trace::new(trace_len),
        }
    }

    /// Adds one second of credit to `device`, remembering first-credit order.
    pub fn credit_second(&mut self, device: u8) -> u64 {
        let secs = self.cumulative_master_secs.entry(device).or_insert(0);
        if *secs == 0 && !self.credit_order.contains(&device) {
            self.credit_order.push(device);
        }
        *secs += 1;
        *secs
    }

    /// Explicit reset: forget report gating and credited time. Master identity
    /// and the open interval survive so the next packet re-establishes a
    /// master under the normal rules.
    pub fn reset_reporting(&mut self) {
        self.have_first_creditable_reading = false;
        self.cumulative_master_secs.clear();
        self.credit_order.clear();
    }
}
