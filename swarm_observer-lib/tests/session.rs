use async_trait::async_trait;
use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use tokio::time::timeout;

use swarm_observer_lib::packet::encode;
use swarm_observer_lib::report::{BarChartSnapshot, LineSeriesPoint};
use swarm_observer_lib::sink::display::DisplaySink;
use swarm_observer_lib::sink::telemetry::{Telemetry, TelemetrySink};
use swarm_observer_lib::sink::SinkError;
use swarm_observer_lib::{Context, CoordinatorService, Message, Packet, SwarmConfig};

#[derive(Default)]
struct Recorded {
    lines: Mutex<Vec<LineSeriesPoint>>,
    bars: Mutex<Vec<BarChartSnapshot>>,
    resets: AtomicUsize,
    frames: Mutex<Vec<Vec<u8>>>,
    clears: AtomicUsize,
}

struct RecordingTelemetry(Arc<Recorded>);

#[async_trait]
impl TelemetrySink for RecordingTelemetry {
    async fn send_line(&self, point: &LineSeriesPoint) -> Result<(), SinkError> {
        self.0.lines.lock().unwrap().push(point.clone());
        Ok(())
    }

    async fn send_bar(&self, bar: &BarChartSnapshot) -> Result<(), SinkError> {
        self.0.bars.lock().unwrap().push(bar.clone());
        Ok(())
    }

    async fn reset(&self) -> Result<(), SinkError> {
        self.0.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

struct RecordingDisplay(Arc<Recorded>);

impl DisplaySink for RecordingDisplay {
    fn render(&mut self, levels: &[u8]) -> Result<(), SinkError> {
        self.0.frames.lock().unwrap().push(levels.to_vec());
        Ok(())
    }

    fn clear(&mut self) -> Result<(), SinkError> {
        self.0.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    coord: CoordinatorService,
    recorded: Arc<Recorded>,
    events: Receiver<Message>,
    port: u16,
    dir: tempfile::TempDir,
}

fn free_port() -> u16 {
    let probe = UdpSocket::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap().port()
}

fn harness(tick_ms: u64) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let port = free_port();
    let cfg = SwarmConfig {
        group: Ipv4Addr::LOCALHOST,
        bind_addr: Ipv4Addr::LOCALHOST,
        port,
        tick_period: Duration::from_millis(tick_ms),
        recv_timeout: Duration::from_millis(50),
        debounce: Duration::ZERO,
        line_url: None,
        bar_url: None,
        log_dir: dir.path().to_path_buf(),
        ..SwarmConfig::default()
    };

    let recorded = Arc::new(Recorded::default());
    let ctx = Context::new(256);
    let events = ctx.subscribe();
    let sinks: Vec<Arc<dyn TelemetrySink>> = vec![Arc::new(RecordingTelemetry(recorded.clone()))];
    let telemetry = Telemetry::new(sinks);
    let coord = CoordinatorService::new(
        cfg,
        ctx,
        Box::new(RecordingDisplay(recorded.clone())),
        telemetry,
    );

    Harness { coord, recorded, events, port, dir }
}

fn send(port: u16, pkt: &Packet) {
    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.send_to(&encode(pkt), ("127.0.0.1", port)).unwrap();
}

/// Wait for the first event matching `pred`.
async fn next_matching<F>(events: &mut Receiver<Message>, mut pred: F) -> Message
where
    F: FnMut(&Message) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let msg = events.recv().await.unwrap();
            if pred(&msg) {
                return msg;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

#[tokio::test]
async fn test_readings_become_one_report() {
    let mut h = harness(400);
    h.coord.start().await.unwrap();

    // align with a tick boundary so all three packets land in one window
    next_matching(&mut h.events, |m| matches!(m, Message::Tick { .. })).await;
    for reading in [500, 600, 700] {
        send(h.port, &Packet::light_update(0x01, reading));
    }

    let tick = next_matching(&mut h.events, |m| {
        matches!(m, Message::Tick { average: Some(_), .. })
    })
    .await;
    match tick {
        Message::Tick { average, level, trace } => {
            assert_eq!(average, Some(600.0));
            assert_eq!(level, 4);
            assert_eq!(trace.len(), 8);
            assert_eq!(trace.last(), Some(&4));
        }
        other => panic!("unexpected {:?}", other),
    }

    let report = next_matching(&mut h.events, |m| matches!(m, Message::Report(_))).await;
    match report {
        Message::Report(r) => {
            assert_eq!(r.line.value, Some(600.0));
            assert_eq!(r.line.label, "127.0.0.1");
            assert_eq!(r.bar.series, vec!["Dev0x01".to_string()]);
            assert_eq!(r.bar.values, vec![vec![1]]);
        }
        other => panic!("unexpected {:?}", other),
    }

    let status = h.coord.status().await;
    assert!(status.running);
    assert_eq!(status.current_master.as_deref(), Some("Dev0x01"));

    h.coord.stop().await.unwrap();
    assert!(!h.recorded.lines.lock().unwrap().is_empty());
    assert!(!h.recorded.bars.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_datagrams_are_ignored() {
    let mut h = harness(100);
    h.coord.start().await.unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").unwrap();
    client.send_to(&[0xF0; 10], ("127.0.0.1", h.port)).unwrap();
    let mut bad = encode(&Packet::light_update(0x09, 900));
    bad[13] = 0xEE;
    client.send_to(&bad, ("127.0.0.1", h.port)).unwrap();

    next_matching(&mut h.events, |m| matches!(m, Message::Tick { .. })).await;
    next_matching(&mut h.events, |m| matches!(m, Message::Tick { .. })).await;

    let state = h.coord.snapshot().await;
    assert!(state.current_master.is_none());
    assert!(state.device_ips.is_empty());

    h.coord.stop().await.unwrap();
}

#[tokio::test]
async fn test_reset_broadcast_once_and_not_amplified() {
    let mut h = harness(100);
    h.coord.start().await.unwrap();

    send(h.port, &Packet::light_update(0x02, 800));
    next_matching(&mut h.events, |m| matches!(m, Message::MasterInstalled { .. })).await;

    h.coord.reset().await.unwrap();
    // other nodes resetting must not make us rebroadcast
    send(h.port, &Packet::reset_swarm());
    send(h.port, &Packet::reset_swarm());

    let mut broadcasts = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while let Ok(Ok(msg)) = tokio::time::timeout_at(deadline, h.events.recv()).await {
        if matches!(msg, Message::ResetBroadcast) {
            broadcasts += 1;
        }
    }
    assert_eq!(broadcasts, 1);

    let state = h.coord.snapshot().await;
    assert_eq!(state.current_master, Some(0x02));

    h.coord.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_clears_trace_and_closes_log() {
    let mut h = harness(100);
    let log_dir = h.dir.path().to_path_buf();

    assert!(h.coord.press().await.unwrap());
    send(h.port, &Packet::light_update(0x03, 1100));
    next_matching(&mut h.events, |m| matches!(m, Message::Report(_))).await;

    assert!(!h.coord.press().await.unwrap());
    next_matching(&mut h.events, |m| matches!(m, Message::SessionStopped)).await;

    let state = h.coord.snapshot().await;
    assert_eq!(state.trace.levels(), vec![0; 8]);
    assert!(h.recorded.clears.load(Ordering::SeqCst) >= 2);
    // press resets charts each time and stop resets them again
    assert!(h.recorded.resets.load(Ordering::SeqCst) >= 3);
    assert!(h.recorded.frames.lock().unwrap().iter().any(|f| f.last() == Some(&8)));

    let logs: Vec<_> = std::fs::read_dir(&log_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    assert_eq!(logs.len(), 1);
    let text = std::fs::read_to_string(&logs[0]).unwrap();
    assert!(text.contains("Device ID: 0x03 is now the master."));
    assert!(text.contains("Master Data: Device ID: 0x03, IP: 127.0.0.1, Reading: 1100"));
    assert!(text.contains("Interval average reading: 1100.00, Scaled: 8"));
}

#[tokio::test]
async fn test_restart_starts_from_fresh_state() {
    let mut h = harness(100);
    h.coord.start().await.unwrap();
    send(h.port, &Packet::light_update(0x04, 700));
    next_matching(&mut h.events, |m| matches!(m, Message::Report(_))).await;
    h.coord.stop().await.unwrap();

    h.coord.start().await.unwrap();
    let state = h.coord.snapshot().await;
    assert!(state.current_master.is_none());
    assert!(state.cumulative_master_secs.is_empty());
    assert!(!state.have_first_creditable_reading);
    h.coord.stop().await.unwrap();
}

#[tokio::test]
async fn test_session_log_records_handover_and_quiet_ticks() {
    let mut h = harness(100);
    let log_dir = h.dir.path().to_path_buf();
    h.coord.start().await.unwrap();

    send(h.port, &Packet::light_update(0x05, 900));
    next_matching(&mut h.events, |m| matches!(m, Message::Report(_))).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    send(h.port, &Packet::light_update(0x06, 300));
    let retired = next_matching(&mut h.events, |m| matches!(m, Message::MasterRetired { .. })).await;
    match retired {
        Message::MasterRetired { device_id, seconds } => {
            assert_eq!(device_id, 0x05);
            assert!(seconds > 0.0);
        }
        other => panic!("unexpected {:?}", other),
    }
    next_matching(&mut h.events, |m| matches!(m, Message::Tick { average: None, .. })).await;
    h.coord.stop().await.unwrap();

    let logs: Vec<_> = std::fs::read_dir(&log_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();
    assert_eq!(logs.len(), 1);
    let text = std::fs::read_to_string(&logs[0]).unwrap();

    let handover = text
        .lines()
        .find_map(|l| l.split(" - ").nth(1).filter(|m| m.starts_with("Device ID: 0x05 was master for ")))
        .expect("no retire line");
    let secs = handover
        .trim_start_matches("Device ID: 0x05 was master for ")
        .trim_end_matches(" seconds.");
    // two decimals
    assert_eq!(secs.split('.').nth(1).map(str::len), Some(2));
    assert!(secs.parse::<f64>().unwrap() > 0.0);

    assert!(text.contains("Device ID: 0x06 is now the master."));
    assert!(text.contains("No readings received in this interval."));
}
