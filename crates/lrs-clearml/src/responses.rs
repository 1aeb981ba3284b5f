//! Decoding of API response envelopes and payloads.
//!
//! Every reply has the shape `{"meta": {"result_code": .., "result_msg": ..}, "data": ..}`.
//! These functions are pure so they can be checked against recorded payloads.

use lrs_types::{BackendError, BackendResult, JobId, JobStatus, MetricKey, MetricPoint};
use serde_json::Value;

/// Section used for hyperparameters given without a `Section/` prefix.
pub const DEFAULT_PARAMETER_SECTION: &str = "General";

/// System tags that keep a task out of the default UI listings.
const HIDDEN_TAGS: [&str; 2] = ["hidden", "__hidden__"];

/// Unwrap the `data` payload, turning a non-200 result code into an error.
pub fn parse_envelope(endpoint: &str, http_ok: bool, body: Value) -> BackendResult<Value> {
    let meta = body.get("meta");
    let result_code = meta
        .and_then(|m| m.get("result_code"))
        .and_then(Value::as_u64);
    let message = meta
        .and_then(|m| m.get("result_msg"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    match result_code {
        Some(200) if http_ok => Ok(body.get("data").cloned().unwrap_or(Value::Null)),
        Some(code) => Err(BackendError::Api {
            endpoint: endpoint.to_string(),
            message: format!("result code {code}: {message}"),
        }),
        None => Err(BackendError::InvalidResponse {
            message: format!("{endpoint}: response has no meta.result_code"),
        }),
    }
}

/// Map the server's task status vocabulary onto [`JobStatus`].
pub fn map_status(raw: &str) -> BackendResult<JobStatus> {
    match raw {
        "created" | "queued" => Ok(JobStatus::Pending),
        "in_progress" => Ok(JobStatus::Running),
        "completed" | "published" | "publishing" | "closed" => Ok(JobStatus::Completed),
        "stopped" => Ok(JobStatus::Stopped),
        "failed" => Ok(JobStatus::Failed),
        other => Err(BackendError::InvalidResponse {
            message: format!("unknown task status {other:?}"),
        }),
    }
}

/// `data.<field>` as a string id.
pub fn string_field(data: &Value, field: &str) -> BackendResult<String> {
    data.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BackendError::InvalidResponse {
            message: format!("missing string field {field:?}"),
        })
}

/// `data.task` from `tasks.get_by_id`.
pub fn task_object(data: &Value) -> BackendResult<&Value> {
    data.get("task").ok_or_else(|| BackendError::InvalidResponse {
        message: "tasks.get_by_id returned no task".to_string(),
    })
}

pub fn task_status(data: &Value) -> BackendResult<JobStatus> {
    let task = task_object(data)?;
    map_status(&string_field(task, "status")?)
}

pub fn system_tags(task: &Value) -> Vec<String> {
    task.get("system_tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// `tags` without the hidden markers, or `None` when nothing would change.
pub fn strip_hidden_tags(tags: &[String]) -> Option<Vec<String>> {
    let kept: Vec<String> = tags
        .iter()
        .filter(|t| !HIDDEN_TAGS.contains(&t.as_str()))
        .cloned()
        .collect();
    (kept.len() != tags.len()).then_some(kept)
}

/// Split `Section/name` on the first slash.
pub fn split_parameter(full_name: &str) -> (&str, &str) {
    match full_name.split_once('/') {
        Some((section, name)) if !section.is_empty() && !name.is_empty() => (section, name),
        _ => (DEFAULT_PARAMETER_SECTION, full_name),
    }
}

/// Anchored, escaped pattern for the server's regex name filters.
pub fn exact_name_pattern(name: &str) -> String {
    let mut pattern = String::with_capacity(name.len() + 2);
    pattern.push('^');
    for c in name.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('$');
    pattern
}

/// Id of the first entry in `data.<list>` whose `name` matches exactly.
///
/// The server filters names by regex; the exact comparison here guards
/// against partial matches.
pub fn find_named_id(data: &Value, list: &str, name: &str) -> Option<String> {
    data.get(list)?
        .as_array()?
        .iter()
        .find(|entry| entry.get("name").and_then(Value::as_str) == Some(name))
        .and_then(|entry| entry.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Points of one scalar series from `events.scalar_metrics_iter_histogram`,
/// ordered by step. A series the task never reported is empty.
pub fn scalar_series(data: &Value, key: &MetricKey) -> BackendResult<Vec<MetricPoint>> {
    let Some(series) = data.get(&key.metric).and_then(|m| m.get(&key.variant)) else {
        return Ok(Vec::new());
    };
    let (Some(xs), Some(ys)) = (
        series.get("x").and_then(Value::as_array),
        series.get("y").and_then(Value::as_array),
    ) else {
        return Err(BackendError::InvalidResponse {
            message: format!("series {key} has no x/y arrays"),
        });
    };
    if xs.len() != ys.len() {
        return Err(BackendError::InvalidResponse {
            message: format!("series {key} has {} steps but {} values", xs.len(), ys.len()),
        });
    }

    let mut points = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| {
            let step = x.as_f64().filter(|s| *s >= 0.0);
            // diverged runs report NaN, which JSON carries as null
            let value = if y.is_null() { Some(f64::NAN) } else { y.as_f64() };
            match (step, value) {
                (Some(step), Some(value)) => Ok(MetricPoint::new(step as u64, value)),
                _ => Err(BackendError::InvalidResponse {
                    message: format!("series {key} has a malformed point ({x}, {y})"),
                }),
            }
        })
        .collect::<BackendResult<Vec<_>>>()?;
    points.sort_by_key(|p| p.step);
    Ok(points)
}

pub fn job_id(data: &Value) -> BackendResult<JobId> {
    string_field(data, "id").map(JobId::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_success_and_failure() {
        let ok = json!({
            "meta": {"id": "x", "endpoint": {"name": "tasks.clone"}, "result_code": 200, "result_msg": "OK"},
            "data": {"id": "4f1e"}
        });
        let data = parse_envelope("tasks.clone", true, ok).unwrap();
        assert_eq!(job_id(&data).unwrap(), JobId::new("4f1e"));

        let denied = json!({
            "meta": {"result_code": 401, "result_subcode": 20, "result_msg": "Unauthorized (invalid token)"},
            "data": {}
        });
        match parse_envelope("tasks.clone", false, denied) {
            Err(BackendError::Api { endpoint, message }) => {
                assert_eq!(endpoint, "tasks.clone");
                assert!(message.contains("401"));
                assert!(message.contains("invalid token"));
            }
            other => panic!("unexpected: {other:?}"),
        }

        assert!(matches!(
            parse_envelope("x", true, json!({"error": "gateway"})),
            Err(BackendError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn status_vocabulary() {
        assert_eq!(map_status("created").unwrap(), JobStatus::Pending);
        assert_eq!(map_status("queued").unwrap(), JobStatus::Pending);
        assert_eq!(map_status("in_progress").unwrap(), JobStatus::Running);
        for done in ["completed", "published", "publishing", "closed"] {
            assert_eq!(map_status(done).unwrap(), JobStatus::Completed, "{done}");
        }
        assert_eq!(map_status("stopped").unwrap(), JobStatus::Stopped);
        assert_eq!(map_status("failed").unwrap(), JobStatus::Failed);
        assert!(map_status("unknown").is_err());
    }

    #[test]
    fn task_status_from_get_by_id() {
        let data = json!({"task": {"id": "t1", "status": "in_progress", "system_tags": ["hidden"]}});
        assert_eq!(task_status(&data).unwrap(), JobStatus::Running);
        assert_eq!(system_tags(task_object(&data).unwrap()), vec!["hidden".to_string()]);
        assert!(task_status(&json!({})).is_err());
    }

    #[test]
    fn hidden_tags_are_stripped() {
        let tags = vec!["hidden".to_string(), "archived".to_string(), "__hidden__".to_string()];
        assert_eq!(strip_hidden_tags(&tags), Some(vec!["archived".to_string()]));
        assert_eq!(strip_hidden_tags(&["archived".to_string()]), None);
        assert_eq!(strip_hidden_tags(&[]), None);
    }

    #[test]
    fn parameter_sections() {
        assert_eq!(
            split_parameter("Hydra/training.learning_rate"),
            ("Hydra", "training.learning_rate")
        );
        assert_eq!(split_parameter("Args/a/b"), ("Args", "a/b"));
        assert_eq!(split_parameter("lr"), ("General", "lr"));
        assert_eq!(split_parameter("/lr"), ("General", "/lr"));
    }

    #[test]
    fn name_patterns_are_escaped() {
        assert_eq!(exact_name_pattern("37m_mup"), "^37m_mup$");
        assert_eq!(exact_name_pattern("c4.a100 (x8)"), "^c4\\.a100 \\(x8\\)$");
    }

    #[test]
    fn finds_exact_name_only() {
        let data = json!({"projects": [
            {"id": "p1", "name": "c4/mup/lr_sweep_old"},
            {"id": "p2", "name": "c4/mup/lr_sweep"}
        ]});
        assert_eq!(find_named_id(&data, "projects", "c4/mup/lr_sweep").as_deref(), Some("p2"));
        assert_eq!(find_named_id(&data, "projects", "c4"), None);
        assert_eq!(find_named_id(&json!({}), "projects", "c4"), None);
    }

    #[test]
    fn scalar_series_is_sorted_by_step() {
        let data = json!({
            "loss": {"loss": {"name": "loss", "x": [20, 0, 10], "y": [1.5, 3.0, 2.0]}},
            "lr": {"lr": {"name": "lr", "x": [0], "y": [0.001]}}
        });
        let points = scalar_series(&data, &MetricKey::new("loss")).unwrap();
        let steps: Vec<u64> = points.iter().map(|p| p.step).collect();
        let values: Vec<f64> = points.iter().map(|p| p.value).collect();
        assert_eq!(steps, vec![0, 10, 20]);
        assert_eq!(values, vec![3.0, 2.0, 1.5]);

        assert!(scalar_series(&data, &MetricKey::new("accuracy")).unwrap().is_empty());
        assert!(scalar_series(&data, &MetricKey::with_variant("loss", "val")).unwrap().is_empty());
    }

    #[test]
    fn scalar_series_rejects_mismatched_arrays() {
        let data = json!({"loss": {"loss": {"x": [0, 1], "y": [1.0]}}});
        assert!(scalar_series(&data, &MetricKey::new("loss")).is_err());
        let data = json!({"loss": {"loss": {"x": [0], "y": ["nan?"]}}});
        assert!(scalar_series(&data, &MetricKey::new("loss")).is_err());
    }

    #[test]
    fn null_values_become_nan() {
        let data = json!({"loss": {"loss": {"x": [0, 1], "y": [1.0, null]}}});
        let points = scalar_series(&data, &MetricKey::new("loss")).unwrap();
        assert!(points[1].value.is_nan());
    }
}
