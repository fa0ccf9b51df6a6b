//! Client for the remote HRV metrics service.
//!
//! The service accepts a multipart upload of the backend-layout delimited
//! export (`file` part) with an integer `start_index` field, and answers with
//! a JSON payload holding a metric map and an R-R interval table. The payload
//! is either the response body itself or a JSON string under a `metadata`
//! field.

use crate::core::metrics::{HrvMetrics, MetricsBundle, MetricsError, RrInterval};
use crate::source::WaveformSequence;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Metrics service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL, e.g. `http://127.0.0.1:8000`
    pub url: String,
    /// Whole-request timeout
    #[serde(with = "crate::config::duration_serde")]
    pub timeout: Duration,
    /// Row offset the service starts analysing from
    pub start_index: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000".to_string(),
            timeout: Duration::from_secs(30),
            start_index: 0,
        }
    }
}

impl BackendConfig {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            timeout,
            start_index: 0,
        }
    }

    /// Get the analysis endpoint URL.
    pub fn analyze_url(&self) -> String {
        format!("{}/analyze", self.url.trim_end_matches('/'))
    }
}

/// Anything that turns a waveform into metrics remotely.
pub trait MetricsBackend: Send + Sync {
    fn analyze(&self, waveform: &WaveformSequence) -> Result<MetricsBundle, MetricsError>;
}

/// Wire shape of the metrics payload.
#[derive(Debug, Deserialize)]
struct MetricsPayload {
    #[serde(rename = "hrvMetrics", alias = "hrv_metrics")]
    hrv_metrics: BTreeMap<String, f64>,
    #[serde(rename = "rrTable", alias = "rr_table")]
    rr_table: Vec<RrInterval>,
}

/// Decode a metrics service response body.
pub fn decode_metrics_response(body: &str) -> Result<MetricsBundle, MetricsError> {
    let decode = |e: serde_json::Error| MetricsError::Decode(e.to_string());

    let value: serde_json::Value = serde_json::from_str(body).map_err(decode)?;
    let payload = match value.get("metadata") {
        Some(serde_json::Value::String(inner)) => serde_json::from_str(inner).map_err(decode)?,
        Some(inner @ serde_json::Value::Object(_)) => inner.clone(),
        _ => value,
    };
    let payload: MetricsPayload = serde_json::from_value(payload).map_err(decode)?;

    if let Some(pair) = payload
        .rr_table
        .windows(2)
        .find(|w| w[1].timestamp <= w[0].timestamp)
    {
        return Err(MetricsError::Decode(format!(
            "interval timestamps out of order at {}",
            pair[1].timestamp
        )));
    }

    Ok(MetricsBundle {
        metrics: payload.hrv_metrics.into_iter().collect::<HrvMetrics>(),
        rr_intervals: payload.rr_table,
    })
}

/// Async client for the metrics service.
#[cfg(feature = "backend")]
#[derive(Clone)]
pub struct MetricsClient {
    config: BackendConfig,
    client: reqwest::Client,
}

#[cfg(feature = "backend")]
impl MetricsClient {
    /// Create a new metrics client.
    pub fn new(config: BackendConfig) -> Result<Self, MetricsError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| MetricsError::Unavailable(format!("could not build HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    /// Submit a waveform and decode the service's metrics.
    pub async fn analyze(
        &self,
        waveform: &WaveformSequence,
    ) -> Result<MetricsBundle, MetricsError> {
        use crate::export::{to_delimited_text, ExportFormat};
        use reqwest::multipart::{Form, Part};

        let unavailable = |e: reqwest::Error| {
            if e.is_timeout() {
                MetricsError::Unavailable(format!("timed out after {:?}", self.config.timeout))
            } else {
                MetricsError::Unavailable(e.to_string())
            }
        };

        let csv = to_delimited_text(waveform, &ExportFormat::backend());
        let file = Part::text(csv)
            .file_name("ecg.csv")
            .mime_str("text/csv")
            .map_err(unavailable)?;
        let form = Form::new()
            .part("file", file)
            .text("start_index", self.config.start_index.to_string());

        let response = self
            .client
            .post(self.config.analyze_url())
            .multipart(form)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!(%status, "Metrics service returned an error");
            return Err(MetricsError::Unavailable(format!(
                "service returned {}: {}",
                status.as_u16(),
                message
            )));
        }

        let body = response.text().await.map_err(unavailable)?;
        decode_metrics_response(&body)
    }
}

/// Blocking metrics client for use in synchronous contexts.
///
/// Must not be called from inside a Tokio runtime.
#[cfg(feature = "backend")]
pub struct BlockingMetricsClient {
    inner: MetricsClient,
    runtime: tokio::runtime::Runtime,
}

#[cfg(feature = "backend")]
impl BlockingMetricsClient {
    /// Create a new blocking metrics client.
    pub fn new(config: BackendConfig) -> Result<Self, MetricsError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| MetricsError::Unavailable(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: MetricsClient::new(config)?,
            runtime,
        })
    }
}

#[cfg(feature = "backend")]
impl MetricsBackend for BlockingMetricsClient {
    fn analyze(&self, waveform: &WaveformSequence) -> Result<MetricsBundle, MetricsError> {
        self.runtime.block_on(self.inner.analyze(waveform))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_url() {
        let config = BackendConfig::new("http://127.0.0.1:8000/", Duration::from_secs(5));
        assert_eq!(config.analyze_url(), "http://127.0.0.1:8000/analyze");
    }

    #[test]
    fn test_decode_direct_body() {
        let body = r#"{
            "hrvMetrics": {"RMSSD": 0.042, "SDNN": 0.051, "LF/HF": 1.7},
            "rrTable": [
                {"timestamp": 0.4, "interval": null},
                {"timestamp": 1.2, "interval": 0.8}
            ]
        }"#;
        let bundle = decode_metrics_response(body).unwrap();
        assert_eq!(bundle.metrics.len(), 3);
        assert_eq!(bundle.metrics.get("LF/HF"), Some(1.7));
        assert_eq!(bundle.rr_intervals[0].interval, None);
        assert_eq!(bundle.rr_intervals[1].interval, Some(0.8));
    }

    #[test]
    fn test_decode_metadata_string() {
        let inner = r#"{"hrvMetrics":{"pNN50":0.1},"rrTable":[{"timestamp":1.0,"rr":0.9}]}"#;
        let body = serde_json::json!({ "metadata": inner }).to_string();
        let bundle = decode_metrics_response(&body).unwrap();
        assert_eq!(bundle.metrics.get("pNN50"), Some(0.1));
        assert_eq!(bundle.rr_intervals[0].interval, Some(0.9));
    }

    #[test]
    fn test_decode_failures() {
        for body in [
            "not json",
            r#"{"error": "Not enough R-peaks to compute HRV."}"#,
            r#"{"hrvMetrics": {"RMSSD": "high"}, "rrTable": []}"#,
            r#"{"hrvMetrics": {}, "rrTable": {}}"#,
            r#"{"metadata": "{broken"}"#,
            r#"{"hrvMetrics": {}, "rrTable": [{"timestamp": 2.0, "interval": null}, {"timestamp": 1.0, "interval": 1.0}]}"#,
        ] {
            assert!(
                matches!(decode_metrics_response(body), Err(MetricsError::Decode(_))),
                "accepted: {body}"
            );
        }
    }

    #[cfg(feature = "backend")]
    #[test]
    fn test_unreachable_service_is_unavailable() {
        // Port 9 (discard) is not expected to run an HTTP service.
        let config = BackendConfig::new("http://127.0.0.1:9", Duration::from_secs(2));
        let client = BlockingMetricsClient::new(config).unwrap();
        let waveform = crate::source::SyntheticSource::default()
            .with_duration(1.0)
            .generate();
        assert!(matches!(
            client.analyze(&waveform),
            Err(MetricsError::Unavailable(_))
        ));
    }

    #[cfg(feature = "backend")]
    #[test]
    fn test_stalled_service_times_out() {
        use std::time::Instant;

        // Accepts the connection and never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((_stream, _)) = listener.accept() {
                std::thread::sleep(Duration::from_secs(10));
            }
        });

        let config = BackendConfig::new(format!("http://{addr}"), Duration::from_millis(500));
        let client = BlockingMetricsClient::new(config).unwrap();
        let waveform = crate::source::SyntheticSource::default()
            .with_duration(1.0)
            .generate();

        let started = Instant::now();
        match client.analyze(&waveform) {
            Err(MetricsError::Unavailable(message)) => {
                assert!(message.contains("timed out"), "{message}")
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
