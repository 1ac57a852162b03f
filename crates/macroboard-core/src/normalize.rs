use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{BoardError, BoardResult};
use crate::model::{Group, Priority, Status, Task, new_id};

/// How malformed records are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strictness {
    /// Import payloads: the first bad record rejects the whole payload.
    Reject,
    /// Stored blobs: bad records are dropped with a warning.
    Skip,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroupRecord {
    id: Option<String>,
    name: Option<String>,
    #[serde(default)]
    tasks: Option<Vec<Value>>,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskRecord {
    id: Option<String>,
    name: Option<String>,
    details: Option<String>,
    status: Option<String>,
    priority: Option<String>,
    assignee: Option<String>,
    due_date: Option<String>,
    created_at: Option<String>,
    completed_at: Option<String>,
}

/// Turns a JSON value into a sorted, invariant-respecting group list.
///
/// Missing ids, statuses, priorities, assignees and timestamps are back-filled;
/// duplicate ids are regenerated. A non-array top level is always rejected.
#[tracing::instrument(skip(value, now))]
pub fn groups_from_value(
    value: Value,
    strictness: Strictness,
    now: DateTime<Utc>,
) -> BoardResult<Vec<Group>> {
    let Value::Array(items) = value else {
        return Err(BoardError::validation(
            "expected a JSON array of groups at the top level",
        ));
    };

    let mut group_ids = HashSet::new();
    let mut task_ids = HashSet::new();
    let mut groups = Vec::with_capacity(items.len());

    for (idx, item) in items.into_iter().enumerate() {
        match normalize_group(item, strictness, now, &mut group_ids, &mut task_ids) {
            Ok(group) => groups.push(group),
            Err(err) if strictness == Strictness::Skip => {
                warn!(index = idx, error = %err, "dropping malformed group record");
            }
            Err(err) => {
                return Err(BoardError::validation(format!("group #{}: {err}", idx + 1)));
            }
        }
    }

    sort_groups(&mut groups);
    debug!(count = groups.len(), "normalized group records");
    Ok(groups)
}

/// Case-insensitive name order; equal names keep their relative order.
pub fn sort_groups(groups: &mut [Group]) {
    groups.sort_by_key(Group::sort_key);
}

fn normalize_group(
    item: Value,
    strictness: Strictness,
    now: DateTime<Utc>,
    group_ids: &mut HashSet<String>,
    task_ids: &mut HashSet<String>,
) -> BoardResult<Group> {
    if !item.is_object() {
        return Err(BoardError::validation("expected an object"));
    }
    let record: GroupRecord = serde_json::from_value(item)
        .map_err(|err| BoardError::validation(format!("malformed group: {err}")))?;

    let name = required_name(record.name, "group")?;
    let id = unique_id(record.id, group_ids);
    let created_at = parse_timestamp(record.created_at.as_deref()).unwrap_or(now);

    let mut tasks = Vec::new();
    for (idx, raw) in record.tasks.unwrap_or_default().into_iter().enumerate() {
        match normalize_task(raw, now, task_ids) {
            Ok(task) => tasks.push(task),
            Err(err) if strictness == Strictness::Skip => {
                warn!(group = %name, index = idx, error = %err, "dropping malformed task record");
            }
            Err(err) => {
                return Err(BoardError::validation(format!(
                    "\"{name}\" task #{}: {err}",
                    idx + 1
                )));
            }
        }
    }

    Ok(Group {
        id,
        name,
        tasks,
        created_at,
    })
}

fn normalize_task(
    raw: Value,
    now: DateTime<Utc>,
    task_ids: &mut HashSet<String>,
) -> BoardResult<Task> {
    if !raw.is_object() {
        return Err(BoardError::validation("expected an object"));
    }
    let record: TaskRecord = serde_json::from_value(raw)
        .map_err(|err| BoardError::validation(format!("malformed task: {err}")))?;

    let name = required_name(record.name, "task")?;
    let status = match record.status.as_deref() {
        Some(raw) => raw.parse::<Status>().unwrap_or_else(|err| {
            warn!(task = %name, error = %err, "unknown status; using pending");
            Status::Pending
        }),
        None => Status::Pending,
    };
    let priority = record
        .priority
        .as_deref()
        .and_then(|raw| raw.parse::<Priority>().ok())
        .unwrap_or_default();
    let created_at = parse_timestamp(record.created_at.as_deref()).unwrap_or(now);
    let due_date = record.due_date.as_deref().and_then(|raw| {
        let parsed = parse_timestamp(Some(raw));
        if parsed.is_none() {
            warn!(task = %name, due = %raw, "ignoring unparseable due date");
        }
        parsed
    });
    let completed_at = if status == Status::Completed {
        parse_timestamp(record.completed_at.as_deref()).or(Some(created_at))
    } else {
        None
    };

    Ok(Task {
        id: unique_id(record.id, task_ids),
        name,
        details: record.details.unwrap_or_default(),
        status,
        priority,
        assignee: record.assignee.unwrap_or_default(),
        due_date,
        created_at,
        completed_at,
    })
}

fn required_name(name: Option<String>, what: &str) -> BoardResult<String> {
    let name = name.unwrap_or_default();
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(BoardError::validation(format!("{what} name is required")));
    }
    Ok(trimmed.to_string())
}

fn unique_id(candidate: Option<String>, seen: &mut HashSet<String>) -> String {
    let id = candidate
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty() && !seen.contains(id))
        .unwrap_or_else(new_id);
    seen.insert(id.clone());
    id
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{Strictness, groups_from_value};
    use crate::error::BoardError;
    use crate::model::{Priority, Status};

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 20, 12, 0, 0)
            .single()
            .expect("valid now")
    }

    #[test]
    fn back_fills_legacy_task_fields() {
        let payload = json!([{
            "id": "g1",
            "name": "Lançamento",
            "tasks": [
                { "name": "Roteiro" },
                { "id": "t2", "name": "Gravar", "status": "completed", "priority": "high" }
            ]
        }]);

        let groups = groups_from_value(payload, Strictness::Reject, now()).expect("normalize");
        let tasks = &groups[0].tasks;
        assert_eq!(groups[0].created_at, now());
        assert!(!tasks[0].id.is_empty());
        assert_eq!(tasks[0].status, Status::Pending);
        assert_eq!(tasks[0].priority, Priority::Medium);
        assert_eq!(tasks[0].assignee, "");
        assert_eq!(tasks[0].created_at, now());
        assert_eq!(tasks[1].priority, Priority::High);
        assert!(tasks[1].completed_at.is_some(), "completed tasks get a stamp");
    }

    #[test]
    fn non_array_payload_is_a_validation_error() {
        let err = groups_from_value(json!({ "name": "x" }), Strictness::Skip, now())
            .expect_err("object must be rejected");
        assert!(matches!(err, BoardError::Validation(_)));
    }

    #[test]
    fn reject_mode_fails_on_blank_names_and_skip_mode_drops_them() {
        let payload = json!([{ "name": "Boa" }, { "name": "   " }, 42]);

        let err = groups_from_value(payload.clone(), Strictness::Reject, now())
            .expect_err("blank name rejected");
        assert!(matches!(err, BoardError::Validation(_)));

        let groups = groups_from_value(payload, Strictness::Skip, now()).expect("skip mode");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Boa");
    }

    #[test]
    fn duplicate_ids_are_regenerated_and_groups_sorted() {
        let payload = json!([
            { "id": "same", "name": "beta", "tasks": [{ "id": "t", "name": "a" }] },
            { "id": "same", "name": "Alfa", "tasks": [{ "id": "t", "name": "b" }] }
        ]);

        let groups = groups_from_value(payload, Strictness::Reject, now()).expect("normalize");
        assert_eq!(groups[0].name, "Alfa");
        assert_eq!(groups[1].name, "beta");
        assert_ne!(groups[0].id, groups[1].id);
        assert_ne!(groups[0].tasks[0].id, groups[1].tasks[0].id);
    }

    #[test]
    fn stale_completion_stamp_is_cleared() {
        let payload = json!([{
            "name": "G",
            "tasks": [{ "name": "t", "status": "pending", "completedAt": "2026-01-01T00:00:00Z" }]
        }]);
        let groups = groups_from_value(payload, Strictness::Reject, now()).expect("normalize");
        assert!(groups[0].tasks[0].completed_at.is_none());
    }
}
