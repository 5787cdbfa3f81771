use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, warn};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

use super::SinkError;
use crate::report::{BarChartSnapshot, LineSeriesPoint, Report};

/// A dashboard endpoint pair: a scalar time series and a categorical chart.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn send_line(&self, point: &LineSeriesPoint) -> Result<(), SinkError>;
    async fn send_bar(&self, bar: &BarChartSnapshot) -> Result<(), SinkError>;
    /// Clear both charts.
    async fn reset(&self) -> Result<(), SinkError>;
    fn name(&self) -> &str;
}

/// Posts JSON to Node-RED style HTTP-in nodes.
pub struct NodeRedSink {
    client: reqwest::Client,
    line_url: Option<String>,
    bar_url: Option<String>,
}

impl NodeRedSink {
    pub fn new(
        line_url: Option<String>,
        bar_url: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, line_url, bar_url })
    }

    pub fn line_body(point: &LineSeriesPoint) -> Value {
        json!({ "value": point.value, "topic": point.label })
    }

    pub fn bar_body(bar: &BarChartSnapshot) -> Value {
        if bar.is_empty() {
            return json!([{ "series": [], "data": [], "labels": [] }]);
        }
        json!([{
            "series": bar.series,
            "data":   bar.values,
            "labels": [bar.window_label],
        }])
    }

    async fn post(&self, url: Option<&str>, body: &Value) -> Result<(), SinkError> {
        let Some(url) = url else {
            return Ok(());
        };
        let resp = self.client.post(url).json(body).send().await?;
        let status = resp.status();
        debug!("POST {} -> {}", url, status);
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for NodeRedSink {
    async fn send_line(&self, point: &LineSeriesPoint) -> Result<(), SinkError> {
        self.post(self.line_url.as_deref(), &Self::line_body(point)).await
    }

    async fn send_bar(&self, bar: &BarChartSnapshot) -> Result<(), SinkError> {
        self.post(self.bar_url.as_deref(), &Self::bar_body(bar)).await
    }

    async fn reset(&self) -> Result<(), SinkError> {
        let line_body = Self::line_body(&LineSeriesPoint::reset());
        let bar_body = json!({ "series": [], "data": [], "labels": [] });
        let (line, bar) = futures::join!(
            self.post(self.line_url.as_deref(), &line_body),
            self.post(self.bar_url.as_deref(), &bar_body),
        );
        line.and(bar)
    }

    fn name(&self) -> &str {
        "node-red"
    }
}

/// Fans payloads out to every configured sink. One attempt each; failures
/// are logged and dropped. All requests of one delivery run concurrently, so
/// a delivery takes at most one request timeout.
#[derive(Clone, Default)]
pub struct Telemetry {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl Telemetry {
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    pub async fn deliver(&self, report: &Report) {
        join_all(self.sinks.iter().map(|sink| async move {
            let (line, bar) = futures::join!(sink.send_line(&report.line), sink.send_bar(&report.bar));
            if let Err(e) = line {
                warn!("{}: line delivery failed: {}", sink.name(), e);
            }
            if let Err(e) = bar {
                warn!("{}: bar delivery failed: {}", sink.name(), e);
            }
        }))
        .await;
    }

    pub async fn reset(&self) {
        join_all(self.sinks.iter().map(|sink| async move {
            if let Err(e) = sink.reset().await {
                warn!("{}: reset failed: {}", sink.name(), e);
            }
        }))
        .await;
    }
}
