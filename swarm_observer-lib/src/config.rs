use std::{env, net::Ipv4Addr, path::PathBuf, str::FromStr, time::Duration};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },

    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}

/// Optional InfluxDB telemetry target.
#[derive(Clone, Debug, PartialEq)]
pub struct InfluxConfig {
    pub url: String,
    pub org: String,
    pub bucket: String,
    pub token: String,
}

/// Runtime settings for one observer process.
#[derive(Clone, Debug)]
pub struct SwarmConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    pub bind_addr: Ipv4Addr,
    pub tick_period: Duration,
    pub recv_timeout: Duration,
    pub debounce: Duration,
    /// Sensor reading that maps to a full display column.
    pub full_scale: f64,
    /// Display rows, which is also the highest scaled level.
    pub display_height: u8,
    pub trace_len: usize,
    /// Line value sent for ticks without readings.
    pub baseline: f64,
    pub window_label: String,
    pub log_dir: PathBuf,
    pub line_url: Option<String>,
    pub bar_url: Option<String>,
    pub influx: Option<InfluxConfig>,
    pub http_port: u16,
    /// Start a session without waiting for a control command.
    pub autostart: bool,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(224, 1, 1, 1),
            port: 2910,
            bind_addr: Ipv4Addr::UNSPECIFIED,
            tick_period: Duration::from_secs(1),
            recv_timeout: Duration::from_secs(1),
            debounce: Duration::from_millis(500),
            full_scale: 1100.0,
            display_height: 8,
            trace_len: 8,
            baseline: 100.0,
            window_label: "Seconds as master".into(),
            log_dir: PathBuf::from("."),
            line_url: Some("http://localhost:1880/data-line".into()),
            bar_url: Some("http://localhost:1880/data-bar".into()),
            influx: None,
            http_port: 3030,
            autostart: false,
        }
    }
}

impl SwarmConfig {
    /// Read `SWARM_*` variables from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = parsed(&lookup, "SWARM_MCAST_GROUP")? {
            cfg.group = v;
        }
        if let Some(v) = parsed(&lookup, "SWARM_PORT")? {
            cfg.port = v;
        }
        if let Some(v) = parsed(&lookup, "SWARM_BIND_ADDR")? {
            cfg.bind_addr = v;
        }
        if let Some(ms) = positive::<u64, _>(&lookup, "SWARM_TICK_MS")? {
            cfg.tick_period = Duration::from_millis(ms);
        }
        if let Some(ms) = positive::<u64, _>(&lookup, "SWARM_RECV_TIMEOUT_MS")? {
            cfg.recv_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed::<u64, _>(&lookup, "SWARM_DEBOUNCE_MS")? {
            cfg.debounce = Duration::from_millis(ms);
        }
        if let Some(v) = parsed::<f64, _>(&lookup, "SWARM_FULL_SCALE")? {
            if v <= 0.0 {
                return Err(ConfigError::Zero { key: "SWARM_FULL_SCALE" });
            }
            cfg.full_scale = v;
        }
        if let Some(v) = positive(&lookup, "SWARM_DISPLAY_HEIGHT")? {
            cfg.display_height = v;
        }
        if let Some(v) = positive(&lookup, "SWARM_TRACE_LEN")? {
            cfg.trace_len = v;
        }
        if let Some(v) = parsed(&lookup, "SWARM_BASELINE")? {
            cfg.baseline = v;
        }
        if let Some(v) = lookup("SWARM_WINDOW_LABEL") {
            cfg.window_label = v;
        }
        if let Some(v) = lookup("SWARM_LOG_DIR") {
            cfg.log_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SWARM_LINE_URL") {
            cfg.line_url = non_empty(v);
        }
        if let Some(v) = lookup("SWARM_BAR_URL") {
            cfg.bar_url = non_empty(v);
        }
        if let Some(url) = lookup("SWARM_INFLUX_URL").and_then(non_empty) {
            cfg.influx = Some(InfluxConfig {
                url,
                org: lookup("SWARM_INFLUX_ORG").unwrap_or_default(),
                bucket: lookup("SWARM_INFLUX_BUCKET").unwrap_or_else(|| "swarm".into()),
                token: lookup("SWARM_INFLUX_TOKEN").unwrap_or_default(),
            });
        }
        if let Some(v) = parsed(&lookup, "SWARM_HTTP_PORT")? {
            cfg.http_port = v;
        }
        if let Some(v) = parsed(&lookup, "SWARM_AUTOSTART")? {
            cfg.autostart = v;
        }

        Ok(cfg)
    }
}

fn parsed<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn positive<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr + PartialEq + Default,
    F: Fn(&str) -> Option<String>,
{
    match parsed::<T, F>(lookup, key)? {
        Some(v) if v == T::default() => Err(ConfigError::Zero { key }),
        other => Ok(other),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() { None } else { Some(s) }
}
