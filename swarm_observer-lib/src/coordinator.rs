use log::{error, info, warn};
use serde::Serialize;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::aggregator::Scale;
use crate::config::SwarmConfig;
use crate::context::Context;
use crate::listener;
use crate::message::Message;
use crate::report::{ReportSettings, device_label};
use crate::sink::{DisplaySink, SessionLogger, SinkError, Telemetry};
use crate::state::SwarmState;
use crate::ticker;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("failed to bind swarm socket on {addr}: {source}")]
    Bind { addr: SocketAddrV4, source: io::Error },

    #[error("command ignored: previous one was {0:?} ago")]
    Debounced(Duration),

    #[error("session already running")]
    AlreadyRunning,

    #[error("session not running")]
    NotRunning,

    #[error("cannot open session log: {0}")]
    SessionLog(#[source] io::Error),
}

/// Handles shared by the receive and tick workers.
#[derive(Clone)]
pub struct Shared {
    pub state: Arc<Mutex<SwarmState>>,
    pub ctx: Context,
    pub log: SessionLogger,
    pub telemetry: Telemetry,
    pub display: Arc<StdMutex<Box<dyn DisplaySink>>>,
    pub scale: Scale,
    pub report_settings: ReportSettings,
    pub tick_period: Duration,
    pub recv_timeout: Duration,
}

impl Shared {
    fn new(cfg: &SwarmConfig, ctx: Context, display: Box<dyn DisplaySink>, telemetry: Telemetry) -> Self {
        Self {
            state: Arc::new(Mutex::new(SwarmState::new(cfg.trace_len))),
            ctx,
            log: SessionLogger::new(),
            telemetry,
            display: Arc::new(StdMutex::new(display)),
            scale: Scale { full_scale: cfg.full_scale, height: cfg.display_height },
            report_settings: ReportSettings {
                baseline: cfg.baseline,
                window_label: cfg.window_label.clone(),
            },
            tick_period: cfg.tick_period,
            recv_timeout: cfg.recv_timeout,
        }
    }

    #[cfg(test)]
    pub(crate) fn for_tests(ctx: Context) -> Self {
        Self::new(
            &SwarmConfig::default(),
            ctx,
            Box::new(crate::sink::FrameLogDisplay::new()),
            Telemetry::default(),
        )
    }

    fn with_display<F>(&self, f: F)
    where
        F: FnOnce(&mut Box<dyn DisplaySink>) -> Result<(), SinkError>,
    {
        let mut display = match self.display.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = f(&mut *display) {
            warn!("display update failed: {}", e);
        }
    }

    pub fn render(&self, levels: &[u8]) {
        self.with_display(|d| d.render(levels));
    }

    pub fn clear_display(&self) {
        self.with_display(|d| d.clear());
    }
}

struct Workers {
    stop_tx: watch::Sender<bool>,
    listener: JoinHandle<()>,
    ticker: JoinHandle<()>,
    local_addr: SocketAddr,
}

enum Lifecycle {
    Stopped,
    Running(Workers),
}

#[derive(Clone, Debug, Serialize)]
pub struct DeviceSeconds {
    pub device: String,
    pub seconds: u64,
}

/// Snapshot for the control surface.
#[derive(Clone, Debug, Serialize)]
pub struct Status {
    pub running: bool,
    pub local_addr: Option<String>,
    pub current_master: Option<String>,
    pub current_master_ip: Option<String>,
    pub trace: Vec<u8>,
    pub master_seconds: Vec<DeviceSeconds>,
}

/// Owns the session lifecycle: Stopped <-> Running, plus explicit reset.
pub struct CoordinatorService {
    config: SwarmConfig,
    shared: Shared,
    lifecycle: Mutex<Lifecycle>,
    last_command: StdMutex<Option<Instant>>,
}

impl CoordinatorService {
    pub fn new(
        config: SwarmConfig,
        ctx: Context,
        display: Box<dyn DisplaySink>,
        telemetry: Telemetry,
    ) -> Self {
        let shared = Shared::new(&config, ctx, display, telemetry);
        // the display must be blank even before the first session
        shared.clear_display();
        Self {
            config,
            shared,
            lifecycle: Mutex::new(Lifecycle::Stopped),
            last_command: StdMutex::new(None),
        }
    }

    pub fn context(&self) -> &Context {
        &self.shared.ctx
    }

    /// Rejects a command arriving within the debounce interval of the last one.
    fn debounce(&self) -> Result<(), CoordinatorError> {
        let mut last = match self.last_command.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        if let Some(prev) = *last {
            let since = now.duration_since(prev);
            if since < self.config.debounce {
                return Err(CoordinatorError::Debounced(since));
            }
        }
        *last = Some(now);
        Ok(())
    }

    /// The physical control: reset, then toggle the session.
    /// Returns whether a session is running afterwards.
    pub async fn press(&self) -> Result<bool, CoordinatorError> {
        self.debounce()?;
        info!("Control pressed");
        self.reset_inner().await;

        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*lifecycle, Lifecycle::Running(_)) {
            self.stop_locked(&mut lifecycle).await?;
            Ok(false)
        } else {
            self.start_locked(&mut lifecycle).await?;
            Ok(true)
        }
    }

    pub async fn start(&self) -> Result<SocketAddr, CoordinatorError> {
        self.debounce()?;
        let mut lifecycle = self.lifecycle.lock().await;
        self.start_locked(&mut lifecycle).await
    }

    pub async fn stop(&self) -> Result<(), CoordinatorError> {
        self.debounce()?;
        let mut lifecycle = self.lifecycle.lock().await;
        self.stop_locked(&mut lifecycle).await
    }

    /// Broadcast one reset packet, clear the dashboards and forget credited
    /// time. Master identity and the open interval are kept.
    pub async fn reset(&self) -> Result<(), CoordinatorError> {
        self.debounce()?;
        self.reset_inner().await;
        Ok(())
    }

    async fn reset_inner(&self) {
        match listener::send_reset_packet(&self.config).await {
            Ok(()) => {
                info!("RESET_SWARM_PACKET sent to {}:{}", self.config.group, self.config.port);
                self.shared.log.log("Sent RESET_SWARM_PACKET to multicast group.");
                self.shared.ctx.publish(Message::ResetBroadcast);
            }
            Err(e) => warn!("failed to send RESET_SWARM_PACKET: {}", e),
        }

        // credit goes first: a tick between the two must not repost old totals
        self.shared.state.lock().await.reset_reporting();
        self.shared.telemetry.reset().await;
    }

    async fn start_locked(&self, lifecycle: &mut Lifecycle) -> Result<SocketAddr, CoordinatorError> {
        if let Lifecycle::Running(_) = lifecycle {
            return Err(CoordinatorError::AlreadyRunning);
        }

        let addr = SocketAddrV4::new(self.config.bind_addr, self.config.port);
        let socket = listener::bind(&self.config).await.map_err(|source| {
            error!("Failed to bind socket {}: {}", addr, source);
            CoordinatorError::Bind { addr, source }
        })?;
        let local_addr = socket.local_addr().map_err(|source| CoordinatorError::Bind { addr, source })?;

        let log_file = self
            .shared
            .log
            .open(&self.config.log_dir)
            .map_err(CoordinatorError::SessionLog)?;

        *self.shared.state.lock().await = SwarmState::new(self.config.trace_len);

        let (stop_tx, stop_rx) = watch::channel(false);
        let listener = tokio::spawn(listener::run_listener(socket, self.shared.clone(), stop_rx.clone()));
        let ticker = tokio::spawn(ticker::run_ticker(self.shared.clone(), stop_rx));

        *lifecycle = Lifecycle::Running(Workers { stop_tx, listener, ticker, local_addr });

        info!("Session started, listening on {}", local_addr);
        self.shared.ctx.publish(Message::SessionStarted {
            log_file: Some(log_file.display().to_string()),
        });
        Ok(local_addr)
    }

    async fn stop_locked(&self, lifecycle: &mut Lifecycle) -> Result<(), CoordinatorError> {
        let workers = match std::mem::replace(lifecycle, Lifecycle::Stopped) {
            Lifecycle::Running(w) => w,
            Lifecycle::Stopped => return Err(CoordinatorError::NotRunning),
        };

        let _ = workers.stop_tx.send(true);
        for (name, handle) in [("listener", workers.listener), ("ticker", workers.ticker)] {
            if let Err(e) = handle.await {
                error!("{} worker ended abnormally: {}", name, e);
            }
        }

        self.shared.state.lock().await.trace.clear();
        self.shared.clear_display();
        self.shared.telemetry.reset().await;
        self.shared.log.close();

        info!("Session stopped");
        self.shared.ctx.publish(Message::SessionStopped);
        Ok(())
    }

    /// Process exit: stop any session without the debounce and leave the
    /// display blank.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if matches!(*lifecycle, Lifecycle::Running(_)) {
            if let Err(e) = self.stop_locked(&mut lifecycle).await {
                warn!("shutdown stop failed: {}", e);
            }
        } else {
            self.shared.clear_display();
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock().await, Lifecycle::Running(_))
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.lifecycle.lock().await {
            Lifecycle::Running(w) => Some(w.local_addr),
            Lifecycle::Stopped => None,
        }
    }

    pub async fn status(&self) -> Status {
        let local_addr = self.local_addr().await;
        let state = self.shared.state.lock().await;
        let mut master_seconds: Vec<DeviceSeconds> = state
            .credit_order
            .iter()
            .map(|d| DeviceSeconds {
                device: device_label(*d),
                seconds: state.cumulative_master_secs.get(d).copied().unwrap_or(0),
            })
            .collect();
        if let Some(master) = state.current_master {
            let label = device_label(master);
            if let Some(pos) = master_seconds.iter().position(|d| d.device == label) {
                let entry = master_seconds.remove(pos);
                master_seconds.insert(0, entry);
            }
        }

        Status {
            running: local_addr.is_some(),
            local_addr: local_addr.map(|a| a.to_string()),
            current_master: state.current_master.map(device_label),
            current_master_ip: state.current_master_ip.map(|ip| ip.to_string()),
            trace: state.trace.levels(),
            master_seconds,
        }
    }

    /// Read-only access to the swarm state, for inspection.
    pub async fn snapshot(&self) -> SwarmState {
        self.shared.state.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{BarChartSnapshot, LineSeriesPoint};
    use crate::sink::{FrameLogDisplay, TelemetrySink};
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn loopback_config(log_dir: &tempfile::TempDir) -> SwarmConfig {
        SwarmConfig {
            group: Ipv4Addr::LOCALHOST,
            bind_addr: Ipv4Addr::LOCALHOST,
            port: 0,
            tick_period: Duration::from_millis(50),
            recv_timeout: Duration::from_millis(50),
            debounce: Duration::ZERO,
            line_url: None,
            bar_url: None,
            log_dir: log_dir.path().to_path_buf(),
            ..SwarmConfig::default()
        }
    }

    fn coordinator(cfg: SwarmConfig) -> CoordinatorService {
        CoordinatorService::new(cfg, Context::new(64), Box::new(FrameLogDisplay::new()), Telemetry::default())
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(loopback_config(&dir));
        assert!(!coord.is_running().await);

        let addr = coord.start().await.unwrap();
        assert!(addr.port() > 0);
        assert!(coord.is_running().await);
        assert!(matches!(coord.start().await, Err(CoordinatorError::AlreadyRunning)));

        coord.stop().await.unwrap();
        assert!(!coord.is_running().await);
        assert!(matches!(coord.stop().await, Err(CoordinatorError::NotRunning)));

        coord.start().await.unwrap();
        coord.shutdown().await;
        assert!(!coord.is_running().await);
        coord.shutdown().await;
    }

    #[tokio::test]
    async fn test_debounce_rejects_fast_commands() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = SwarmConfig { debounce: Duration::from_secs(60), ..loopback_config(&dir) };
        let coord = coordinator(cfg);

        coord.reset().await.unwrap();
        assert!(matches!(coord.reset().await, Err(CoordinatorError::Debounced(_))));
        assert!(matches!(coord.press().await, Err(CoordinatorError::Debounced(_))));
        assert!(!coord.is_running().await);
    }

    #[tokio::test]
    async fn test_bind_failure_leaves_stopped() {
        let blocker = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(SwarmConfig { port, ..loopback_config(&dir) });

        assert!(matches!(coord.start().await, Err(CoordinatorError::Bind { .. })));
        assert!(!coord.is_running().await);
        assert!(coord.status().await.local_addr.is_none());
    }

    #[tokio::test]
    async fn test_reset_keeps_master_identity() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(loopback_config(&dir));
        {
            let mut state = coord.shared.state.lock().await;
            state.current_master = Some(4);
            state.interval_readings.push(800);
            state.have_first_creditable_reading = true;
            state.credit_second(4);
        }

        coord.reset().await.unwrap();

        let state = coord.snapshot().await;
        assert_eq!(state.current_master, Some(4));
        assert_eq!(state.interval_readings, vec![800]);
        assert!(!state.have_first_creditable_reading);
        assert!(state.cumulative_master_secs.is_empty());
    }

    /// Records what the credit table looked like when the charts were reset.
    #[derive(Default)]
    struct ResetWitness {
        state: OnceLock<Arc<Mutex<SwarmState>>>,
        resets: AtomicUsize,
        stale_totals: AtomicBool,
    }

    #[async_trait]
    impl TelemetrySink for ResetWitness {
        async fn send_line(&self, _: &LineSeriesPoint) -> Result<(), SinkError> {
            Ok(())
        }

        async fn send_bar(&self, _: &BarChartSnapshot) -> Result<(), SinkError> {
            Ok(())
        }

        async fn reset(&self) -> Result<(), SinkError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            if let Some(state) = self.state.get() {
                if !state.lock().await.cumulative_master_secs.is_empty() {
                    self.stale_totals.store(true, Ordering::SeqCst);
                }
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "witness"
        }
    }

    #[tokio::test]
    async fn test_reset_clears_credit_before_dashboards() {
        let dir = tempfile::tempdir().unwrap();
        let witness = Arc::new(ResetWitness::default());
        let sinks: Vec<Arc<dyn TelemetrySink>> = vec![witness.clone()];
        let coord = CoordinatorService::new(
            loopback_config(&dir),
            Context::new(64),
            Box::new(FrameLogDisplay::new()),
            Telemetry::new(sinks),
        );
        let _ = witness.state.set(coord.shared.state.clone());
        {
            let mut state = coord.shared.state.lock().await;
            state.current_master = Some(2);
            state.have_first_creditable_reading = true;
            state.credit_second(2);
        }

        coord.reset().await.unwrap();

        assert_eq!(witness.resets.load(Ordering::SeqCst), 1);
        assert!(!witness.stale_totals.load(Ordering::SeqCst));
    }
}
