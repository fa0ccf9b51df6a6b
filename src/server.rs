//! Reference HRV analysis service.
//!
//! Serves the endpoint the remote metrics client talks to, so the whole
//! round trip can run on one machine:
//!
//! ```text
//! MetricsClient ──→ POST /analyze (multipart: file, start_index) ──→ hrvMetrics + rrTable
//! ```
//!
//! Peaks are local maxima with no threshold. Uploads carry millivolts rounded
//! to three decimals, so a crest often spans several equal samples; such a
//! flat top counts as one peak at its middle sample. The table has one row per
//! interval, stamped with the peak that opens it.

use crate::core::{compute_hrv, derive_rr, HrvMetrics, PeakSet};
use crate::export::parse_delimited_text;
use crate::source::{Sample, WaveformSequence};
use axum::{
    extract::Multipart,
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

/// Row of the interval table.
#[derive(Debug, Clone, Serialize)]
pub struct RrRow {
    pub timestamp: f64,
    pub rr: f64,
}

/// Response from the analyze endpoint
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeResponse {
    #[serde(rename = "hrvMetrics")]
    pub hrv_metrics: HrvMetrics,
    #[serde(rename = "rrTable")]
    pub rr_table: Vec<RrRow>,
}

/// Root response
#[derive(Serialize)]
pub struct RootResponse {
    pub message: String,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type Rejection = (StatusCode, Json<ErrorResponse>);

fn failure(message: impl Into<String>) -> Rejection {
    let error = message.into();
    tracing::warn!("Analysis failed: {error}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error }),
    )
}

/// GET /
async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "HRV API is running".to_string(),
    })
}

/// POST /analyze
///
/// Accepts a `file` part holding the backend delimited layout and an optional
/// `start_index` field naming the first data row to analyse.
async fn analyze(mut multipart: Multipart) -> Result<Json<AnalyzeResponse>, Rejection> {
    let mut file = None;
    let mut start_index = 0usize;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| failure(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                file = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| failure(format!("could not read file: {e}")))?,
                );
            }
            Some("start_index") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|e| failure(format!("could not read start_index: {e}")))?;
                start_index = raw
                    .trim()
                    .parse()
                    .map_err(|e| failure(format!("start_index '{raw}': {e}")))?;
            }
            _ => {}
        }
    }

    let text = file.ok_or_else(|| failure("missing file part"))?;
    let waveform = parse_delimited_text(&text).map_err(|e| failure(e.to_string()))?;
    let response = analyze_waveform(&waveform, start_index).map_err(failure)?;

    tracing::debug!(
        samples = waveform.len(),
        intervals = response.rr_table.len(),
        "Analysis complete"
    );
    Ok(Json(response))
}

/// Analyse `waveform` from row `start_index` on.
pub fn analyze_waveform(
    waveform: &WaveformSequence,
    start_index: usize,
) -> Result<AnalyzeResponse, String> {
    let tail = waveform.samples().get(start_index..).unwrap_or(&[]);
    let peaks = crest_peaks(tail);

    if peaks.len() < 2 {
        return Err("Not enough R-peaks to compute HRV.".to_string());
    }

    let rr_table = peaks
        .windows(2)
        .map(|w| RrRow {
            timestamp: w[0],
            rr: w[1] - w[0],
        })
        .collect();

    Ok(AnalyzeResponse {
        hrv_metrics: compute_hrv(&derive_rr(&peaks)),
        rr_table,
    })
}

/// Local maxima, with runs of equal samples treated as a single point.
fn crest_peaks(samples: &[Sample]) -> PeakSet {
    let mut peaks = PeakSet::new();
    let mut start = 1;
    while start + 1 < samples.len() {
        let level = samples[start].amplitude;
        let mut end = start;
        while end + 1 < samples.len() && samples[end + 1].amplitude == level {
            end += 1;
        }
        if end + 1 == samples.len() {
            break;
        }
        if samples[start - 1].amplitude < level && samples[end + 1].amplitude < level {
            peaks.push(samples[(start + end) / 2].time);
        }
        start = end + 1;
    }
    peaks
}

/// Build the service router.
pub fn router() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/analyze", post(analyze))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let app = router();

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("HRV analysis service listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::metrics::{MEAN_RR, RMSSD, SDNN};
    use crate::source::{Sample, SyntheticSource};

    fn beats(times: &[f64]) -> WaveformSequence {
        // A spike at each beat time on a flat baseline.
        let mut samples = Vec::new();
        for &t in times {
            samples.push(Sample::new(t - 0.01, 0.0));
            samples.push(Sample::new(t, 1.0));
        }
        samples.push(Sample::new(times[times.len() - 1] + 0.01, 0.0));
        WaveformSequence::new(samples).unwrap()
    }

    #[test]
    fn test_table_rows_open_each_interval() {
        let response = analyze_waveform(&beats(&[1.0, 1.8, 2.7, 3.5]), 0).unwrap();
        assert_eq!(response.rr_table.len(), 3);
        assert_eq!(response.rr_table[0].timestamp, 1.0);
        assert!((response.rr_table[0].rr - 0.8).abs() < 1e-9);
        assert!((response.rr_table[1].rr - 0.9).abs() < 1e-9);
        assert!((response.hrv_metrics.get(MEAN_RR).unwrap() - 2.5 / 3.0).abs() < 1e-9);
        assert!(response.hrv_metrics.get(SDNN).is_some());
        assert!(response.hrv_metrics.get(RMSSD).is_some());
    }

    #[test]
    fn test_decoded_table_keeps_opening_stamps() {
        let peaks = [1.0, 1.8, 2.7];
        let response = analyze_waveform(&beats(&peaks), 0).unwrap();
        let body = serde_json::to_string(&response).unwrap();
        let bundle = crate::backend::decode_metrics_response(&body).unwrap();

        let remote: Vec<f64> = bundle.rr_intervals.iter().map(|r| r.timestamp).collect();
        assert_eq!(remote, vec![1.0, 1.8]);
        let local: Vec<f64> = derive_rr(&peaks).iter().map(|r| r.timestamp).collect();
        assert_eq!(local, vec![1.0, 1.8, 2.7]);
        assert_eq!(bundle.rr_intervals[0].interval, derive_rr(&peaks)[1].interval);
    }

    #[test]
    fn test_start_index_skips_rows() {
        let waveform = beats(&[1.0, 1.8, 2.7, 3.5]);
        // Each beat contributes two rows; skip the first beat entirely.
        let response = analyze_waveform(&waveform, 2).unwrap();
        assert_eq!(response.rr_table.len(), 2);
        assert_eq!(response.rr_table[0].timestamp, 1.8);
    }

    #[test]
    fn test_too_few_peaks() {
        assert!(analyze_waveform(&beats(&[1.0]), 0).is_err());
        let waveform = SyntheticSource::default().with_duration(2.0).generate();
        assert!(analyze_waveform(&waveform, 10_000).is_err());
    }

    #[test]
    fn test_flat_crest_is_one_peak() {
        let samples: Vec<Sample> = [0.0, 1.0, 1.0, 1.0, 0.0, 2.0, 0.0, 3.0, 3.0]
            .iter()
            .enumerate()
            .map(|(i, &a)| Sample::new(i as f64, a))
            .collect();
        // The trailing run never comes back down.
        assert_eq!(crest_peaks(&samples), vec![2.0, 5.0]);
    }

    #[test]
    fn test_synthetic_upload_round_trip() {
        use crate::export::{to_delimited_text, ExportFormat};

        let waveform = SyntheticSource::default().generate();
        let text = to_delimited_text(&waveform, &ExportFormat::backend());
        let parsed = parse_delimited_text(&text).unwrap();
        let response = analyze_waveform(&parsed, 0).unwrap();
        assert!((response.rr_table.len() as i64 - 35).abs() <= 1);
        assert!((response.hrv_metrics.get(MEAN_RR).unwrap() - 1.0 / 1.2).abs() < 0.01);
    }

    #[test]
    fn test_response_wire_shape() {
        let response = analyze_waveform(&beats(&[1.0, 2.0, 3.0]), 0).unwrap();
        let json = serde_json::to_value(&response).unwrap();
        assert!(json["hrvMetrics"].is_object());
        assert_eq!(json["rrTable"][0]["timestamp"], 1.0);
        assert_eq!(json["rrTable"][0]["rr"], 1.0);
    }
}
