use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use influxdb2::ClientBuilder;
use influxdb2::models::data_point::DataPoint;

use super::SinkError;
use super::telemetry::TelemetrySink;
use crate::config::InfluxConfig;
use crate::report::{BarChartSnapshot, LineSeriesPoint};

/// Writes report payloads as InfluxDB points.
#[derive(Clone)]
pub struct InfluxSink {
    client: influxdb2::Client,
    bucket: String,
}

impl InfluxSink {
    /// Initialize with gzip-enabled client.
    pub fn new(cfg: &InfluxConfig) -> Result<Self, SinkError> {
        let client = ClientBuilder::new(cfg.url.clone(), cfg.org.clone(), cfg.token.clone())
            .gzip(true)
            .build()?;
        Ok(Self { client, bucket: cfg.bucket.clone() })
    }

    fn now_nanos() -> Result<i64, SinkError> {
        Utc::now().timestamp_nanos_opt().ok_or(SinkError::TimestampOverflow)
    }

    /// `master_reading,master_ip=<label> value=<v>`; reset points carry no value
    /// and produce nothing.
    pub fn line_points(point: &LineSeriesPoint, nanos: i64) -> Result<Vec<DataPoint>, SinkError> {
        let Some(value) = point.value else {
            return Ok(Vec::new());
        };
        let dp = DataPoint::builder("master_reading")
            .tag("master_ip", point.label.as_str())
            .field("value", value)
            .timestamp(nanos)
            .build()?;
        Ok(vec![dp])
    }

    /// One `master_seconds,device=<label> seconds=<n>` point per device.
    pub fn bar_points(bar: &BarChartSnapshot, nanos: i64) -> Result<Vec<DataPoint>, SinkError> {
        bar.series
            .iter()
            .zip(&bar.values)
            .map(|(device, values)| {
                let secs = values.first().copied().unwrap_or(0);
                DataPoint::builder("master_seconds")
                    .tag("device", device.as_str())
                    .field("seconds", secs as i64)
                    .timestamp(nanos)
                    .build()
                    .map_err(SinkError::BuildPoint)
            })
            .collect()
    }

    /// Asynchronously write a batch of points via HTTP.
    async fn write_batch(&self, points: Vec<DataPoint>) -> Result<(), SinkError> {
        if points.is_empty() {
            return Ok(());
        }
        self.client.write(&self.bucket, stream::iter(points)).await?;
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for InfluxSink {
    async fn send_line(&self, point: &LineSeriesPoint) -> Result<(), SinkError> {
        let points = Self::line_points(point, Self::now_nanos()?)?;
        self.write_batch(points).await
    }

    async fn send_bar(&self, bar: &BarChartSnapshot) -> Result<(), SinkError> {
        let points = Self::bar_points(bar, Self::now_nanos()?)?;
        self.write_batch(points).await
    }

    /// Time series have no notion of clearing a chart.
    async fn reset(&self) -> Result<(), SinkError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "influxdb"
    }
}
