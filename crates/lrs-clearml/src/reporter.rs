//! Telemetry delivery to the parent sweep task.

use lrs_optimizer::{MetricsReporter, ReportEvent};
use lrs_types::JobId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::ClearMlClient;

/// Queues scalars and uploads them from a background task, so `report`
/// never waits on the network. Upload errors are logged and dropped.
pub struct ClearMlReporter {
    tx: mpsc::UnboundedSender<ReportEvent>,
}

impl ClearMlReporter {
    /// Start the upload task for `task`. The task drains the queue and exits
    /// once every reporter handle is dropped; await the returned handle to
    /// flush.
    pub fn spawn(client: Arc<ClearMlClient>, task: JobId) -> (Self, JoinHandle<usize>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ReportEvent>();
        let handle = tokio::spawn(async move {
            let mut delivered = 0usize;
            while let Some(event) = rx.recv().await {
                match client
                    .add_scalar(&task, &event.series, &event.track, event.value, event.iteration)
                    .await
                {
                    Ok(()) => delivered += 1,
                    Err(e) => warn!(
                        series = %event.series,
                        track = %event.track,
                        iteration = event.iteration,
                        error = %e,
                        "failed to report scalar"
                    ),
                }
            }
            debug!(delivered, "reporter drained");
            delivered
        });
        (Self { tx }, handle)
    }
}

impl MetricsReporter for ClearMlReporter {
    fn report(&self, series: &str, track: &str, value: f64, iteration: u64) {
        if !value.is_finite() {
            debug!(series, track, value, "skipping non-finite scalar");
            return;
        }
        let event = ReportEvent {
            series: series.to_string(),
            track: track.to_string(),
            value,
            iteration,
        };
        if self.tx.send(event).is_err() {
            debug!(series, track, "reporter task gone, dropping scalar");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClearMlConfig;
    use crate::test_support::{ok, serve};
    use serde_json::json;

    #[tokio::test]
    async fn scalars_are_uploaded_in_background() {
        let (host, server) = serve(vec![
            ok(json!({"token": "t"})),
            ok(json!({"added": 1})),
            ok(json!({"added": 1})),
        ])
        .await;
        let client = Arc::new(
            ClearMlClient::connect(ClearMlConfig::new(host, "AK", "SK"))
                .await
                .unwrap(),
        );

        let (reporter, handle) = ClearMlReporter::spawn(client, JobId::new("sweep"));
        reporter.report("loss", "value", 0.42, 0);
        reporter.report("best", "loss", f64::INFINITY, 0);
        reporter.report("lr", "value", 0.001, 0);
        drop(reporter);

        assert_eq!(handle.await.unwrap(), 2);
        let requests = server.await.unwrap();
        assert!(requests[1].starts_with("POST /events.add"));
        assert!(requests[1].contains("\"type\":\"training_stats_scalar\""));
        assert!(requests[1].contains("\"metric\":\"loss\""));
        assert!(requests[2].contains("\"variant\":\"value\""));
        assert!(requests[2].contains("\"task\":\"sweep\""));
    }
}
