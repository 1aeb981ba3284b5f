use async_trait::async_trait;
use lrs_optimizer::{JobBackend, ParameterOverrides};
use lrs_types::{BackendError, BackendResult, JobId, JobStatus, MetricKey, MetricPoint};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::client::ClearMlClient;
use crate::responses;

#[async_trait]
impl JobBackend for ClearMlClient {
    async fn clone_job(
        &self,
        template: &JobId,
        name: &str,
        overrides: &ParameterOverrides,
    ) -> BackendResult<JobId> {
        let data = self
            .call(
                "tasks.clone",
                json!({"task": template.as_str(), "new_task_name": name}),
            )
            .await?;
        let job_id = responses::job_id(&data)?;

        if !overrides.is_empty() {
            let hyperparams: Vec<Value> = overrides
                .iter()
                .map(|(key, value)| {
                    let (section, name) = responses::split_parameter(key);
                    json!({"section": section, "name": name, "value": value})
                })
                .collect();
            self.call(
                "tasks.edit_hyper_params",
                json!({
                    "task": job_id.as_str(),
                    "hyperparams": hyperparams,
                    "replace_hyperparams": "none",
                }),
            )
            .await?;
        }

        info!(template = %template, job_id = %job_id, name, "cloned job");
        Ok(job_id)
    }

    async fn reveal_job(&self, job_id: &JobId) -> BackendResult<()> {
        let data = self
            .call("tasks.get_by_id", json!({"task": job_id.as_str()}))
            .await?;
        let tags = responses::system_tags(responses::task_object(&data)?);
        let Some(kept) = responses::strip_hidden_tags(&tags) else {
            return Ok(());
        };
        self.call(
            "tasks.edit",
            json!({"task": job_id.as_str(), "system_tags": kept, "force": true}),
        )
        .await?;
        debug!(job_id = %job_id, "removed hidden tags");
        Ok(())
    }

    async fn submit(&self, job_id: &JobId, queue: &str) -> BackendResult<()> {
        let data = self
            .call(
                "queues.get_all",
                json!({
                    "name": responses::exact_name_pattern(queue),
                    "only_fields": ["id", "name"],
                }),
            )
            .await?;
        let queue_id = responses::find_named_id(&data, "queues", queue).ok_or_else(|| {
            BackendError::NotFound {
                what: format!("queue {queue:?}"),
            }
        })?;
        self.call(
            "tasks.enqueue",
            json!({"task": job_id.as_str(), "queue": queue_id}),
        )
        .await?;
        Ok(())
    }

    async fn get_status(&self, job_id: &JobId) -> BackendResult<JobStatus> {
        let data = self
            .call(
                "tasks.get_by_id",
                json!({"task": job_id.as_str(), "only_fields": ["id", "status"]}),
            )
            .await
            .map_err(|e| match e {
                BackendError::Api { ref message, .. } if message.contains("Invalid task id") => {
                    BackendError::JobNotFound {
                        job_id: job_id.to_string(),
                    }
                }
                other => other,
            })?;
        responses::task_status(&data)
    }

    async fn get_metric_series(
        &self,
        job_id: &JobId,
        metric: &MetricKey,
    ) -> BackendResult<Vec<MetricPoint>> {
        let data = self
            .call(
                "events.scalar_metrics_iter_histogram",
                json!({"task": job_id.as_str(), "key": "iter", "samples": 100000}),
            )
            .await?;
        responses::scalar_series(&data, metric)
    }

    async fn stop_job(&self, job_id: &JobId, reason: &str) -> BackendResult<()> {
        self.call(
            "tasks.stop",
            json!({"task": job_id.as_str(), "force": true, "status_reason": reason}),
        )
        .await?;
        info!(job_id = %job_id, reason, "stop requested");
        Ok(())
    }
}
