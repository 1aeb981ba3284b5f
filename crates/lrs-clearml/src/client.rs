//! Authenticated JSON-over-HTTP client for the tracking server.

use lrs_types::{BackendError, BackendResult, JobId};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ClearMlConfig;
use crate::responses;

/// Session with the API server. Every call is a POST to `<host>/<endpoint>`
/// carrying a JSON body and the bearer token obtained at login.
pub struct ClearMlClient {
    http: reqwest::Client,
    config: ClearMlConfig,
    token: String,
}

impl ClearMlClient {
    /// Log in with the configured key pair and keep the session token.
    pub async fn connect(config: ClearMlConfig) -> BackendResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| BackendError::Unavailable {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        let url = config.endpoint_url("auth.login");
        let response = http
            .post(&url)
            .basic_auth(&config.access_key, Some(&config.secret_key))
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| BackendError::Unavailable {
                message: format!("login request to {url} failed: {e}"),
            })?;
        let data = Self::decode("auth.login", response).await?;
        let token = responses::string_field(&data, "token")?;

        info!(host = %config.api_host, "connected to tracking server");
        Ok(Self {
            http,
            config,
            token,
        })
    }

    pub fn config(&self) -> &ClearMlConfig {
        &self.config
    }

    /// POST `body` to `endpoint` and return the envelope's `data`.
    ///
    /// Requests that fail to connect are retried; anything that reached the
    /// server is not, since most endpoints are not idempotent.
    pub async fn call(&self, endpoint: &str, body: Value) -> BackendResult<Value> {
        let url = self.config.endpoint_url(endpoint);
        let mut attempt = 0;
        loop {
            let sent = self
                .http
                .post(&url)
                .bearer_auth(&self.token)
                .json(&body)
                .send()
                .await;
            match sent {
                Ok(response) => {
                    debug!(endpoint, status = %response.status(), "api call");
                    return Self::decode(endpoint, response).await;
                }
                Err(e) if e.is_connect() && attempt < self.config.connect_retries => {
                    attempt += 1;
                    warn!(endpoint, attempt, error = %e, "api server unreachable, retrying");
                    tokio::time::sleep(Duration::from_secs(2 * attempt as u64)).await;
                }
                Err(e) => {
                    return Err(BackendError::Unavailable {
                        message: format!("{endpoint} request failed: {e}"),
                    })
                }
            }
        }
    }

    async fn decode(endpoint: &str, response: reqwest::Response) -> BackendResult<Value> {
        let http_ok = response.status().is_success();
        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                message: format!("{endpoint}: failed to parse JSON response: {e}"),
            })?;
        responses::parse_envelope(endpoint, http_ok, body)
    }

    /// Id of the project named exactly `name`.
    pub async fn find_project(&self, name: &str) -> BackendResult<Option<String>> {
        let data = self
            .call(
                "projects.get_all",
                json!({
                    "name": responses::exact_name_pattern(name),
                    "only_fields": ["id", "name"],
                }),
            )
            .await?;
        Ok(responses::find_named_id(&data, "projects", name))
    }

    /// Id of project `name`, creating it when missing.
    pub async fn ensure_project(&self, name: &str) -> BackendResult<String> {
        if let Some(id) = self.find_project(name).await? {
            return Ok(id);
        }
        let data = self
            .call(
                "projects.create",
                json!({"name": name, "description": "learning-rate sweeps"}),
            )
            .await?;
        info!(project = name, "created project");
        responses::string_field(&data, "id")
    }

    /// Most recently updated task named `task_name` in `project`.
    pub async fn find_task_id(&self, project: &str, task_name: &str) -> BackendResult<JobId> {
        let project_id = self
            .find_project(project)
            .await?
            .ok_or_else(|| BackendError::NotFound {
                what: format!("project {project:?}"),
            })?;
        let data = self
            .call(
                "tasks.get_all",
                json!({
                    "project": [project_id],
                    "name": responses::exact_name_pattern(task_name),
                    "order_by": ["-last_update"],
                    "only_fields": ["id", "name"],
                }),
            )
            .await?;
        responses::find_named_id(&data, "tasks", task_name)
            .map(JobId::new)
            .ok_or_else(|| BackendError::NotFound {
                what: format!("task {task_name:?} in project {project:?}"),
            })
    }

    /// Create the parent task a sweep reports into and mark it started.
    pub async fn create_sweep_task(&self, project: &str, name: &str) -> BackendResult<JobId> {
        let project_id = self.ensure_project(project).await?;
        let data = self
            .call(
                "tasks.create",
                json!({"name": name, "project": project_id, "type": "optimizer"}),
            )
            .await?;
        let task = responses::job_id(&data)?;
        self.call("tasks.started", json!({"task": task.as_str(), "force": true}))
            .await?;
        info!(task = %task, project, name, "sweep task started");
        Ok(task)
    }

    /// Close the parent task as completed, or failed with `reason`.
    pub async fn close_task(&self, task: &JobId, succeeded: bool, reason: &str) -> BackendResult<()> {
        let endpoint = if succeeded {
            "tasks.completed"
        } else {
            "tasks.failed"
        };
        self.call(
            endpoint,
            json!({"task": task.as_str(), "force": true, "status_reason": reason}),
        )
        .await?;
        info!(task = %task, succeeded, "sweep task closed");
        Ok(())
    }

    /// Append one scalar to a task's metrics.
    pub async fn add_scalar(
        &self,
        task: &JobId,
        metric: &str,
        variant: &str,
        value: f64,
        iteration: u64,
    ) -> BackendResult<()> {
        self.call(
            "events.add",
            json!({
                "task": task.as_str(),
                "type": "training_stats_scalar",
                "metric": metric,
                "variant": variant,
                "value": value,
                "iter": iteration,
                "timestamp": chrono::Utc::now().timestamp_millis(),
            }),
        )
        .await?;
        Ok(())
    }
}
