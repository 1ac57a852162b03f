use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type GroupId = String;
pub type TaskId = String;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    #[default]
    Pending,
    InProgress,
    Completed,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Pending, Status::InProgress, Status::Completed];

    /// Next step of the ring pending -> in-progress -> completed -> pending.
    pub fn next(self) -> Self {
        match self {
            Status::Pending => Status::InProgress,
            Status::InProgress => Status::Completed,
            Status::Completed => Status::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::InProgress => "in-progress",
            Status::Completed => "completed",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Pending => "Pendente",
            Status::InProgress => "Em Progresso",
            Status::Completed => "Concluída",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Status::Pending),
            "in-progress" | "in_progress" | "inprogress" | "progress" => Ok(Status::InProgress),
            "completed" | "done" => Ok(Status::Completed),
            other => Err(anyhow!("unknown status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Priority::Low => "Baixa",
            Priority::Medium => "Média",
            Priority::High => "Alta",
        }
    }
}

impl FromStr for Priority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" | "baixa" => Ok(Priority::Low),
            "medium" | "media" | "média" => Ok(Priority::Medium),
            "high" | "alta" => Ok(Priority::High),
            other => Err(anyhow!("unknown priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,

    pub name: String,

    #[serde(default)]
    pub details: String,

    pub status: Status,

    #[serde(default)]
    pub priority: Priority,

    #[serde(default)]
    pub assignee: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new_pending(name: String, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            name,
            details: String::new(),
            status: Status::Pending,
            priority: Priority::Medium,
            assignee: String::new(),
            due_date: None,
            created_at: now,
            completed_at: None,
        }
    }

    /// Moves to `status`, keeping `completed_at` present exactly while completed.
    ///
    /// An existing completion stamp survives a completed -> completed transition.
    pub fn set_status(&mut self, status: Status, now: DateTime<Utc>) {
        self.status = status;
        if status == Status::Completed {
            if self.completed_at.is_none() {
                self.completed_at = Some(now);
            }
        } else {
            self.completed_at = None;
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == Status::Completed
    }

    pub fn is_overdue(&self, today_start: DateTime<Utc>) -> bool {
        !self.is_completed() && self.due_date.map(|due| due < today_start).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,

    pub name: String,

    #[serde(default)]
    pub tasks: Vec<Task>,

    pub created_at: DateTime<Utc>,
}

impl Group {
    pub fn new(name: String, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            name,
            tasks: vec![],
            created_at: now,
        }
    }

    pub fn sort_key(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn task_index(&self, task_id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == task_id)
    }

    pub fn completed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_completed()).count()
    }

    /// Has at least one task and every task is completed.
    pub fn is_fully_completed(&self) -> bool {
        !self.tasks.is_empty() && self.completed_count() == self.tasks.len()
    }

    /// Up to two uppercase initials, shown when the sidebar is collapsed.
    pub fn initials(&self) -> String {
        self.name
            .split_whitespace()
            .filter_map(|word| word.chars().next())
            .take(2)
            .flat_map(char::to_uppercase)
            .collect()
    }
}

/// Fields accepted by the task form. Quick-add fills only `name`.
#[derive(Debug, Clone, Default)]
pub struct TaskDraft {
    pub name: String,
    pub details: String,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub assignee: String,
    pub due_date: Option<DateTime<Utc>>,
}

impl TaskDraft {
    pub fn quick(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Partial update; `None` leaves the field untouched.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub details: Option<String>,
    pub assignee: Option<String>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub priority: Option<Priority>,
    pub status: Option<Status>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.details.is_none()
            && self.assignee.is_none()
            && self.due_date.is_none()
            && self.priority.is_none()
            && self.status.is_none()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{Group, Status, Task};

    #[test]
    fn status_ring_and_completion_stamp() {
        let created = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).single().expect("valid instant");
        let mut task = Task::new_pending("Escrever post".to_string(), created);

        task.set_status(task.status.next(), created + Duration::hours(1));
        assert_eq!(task.status, Status::InProgress);
        assert!(task.completed_at.is_none());

        let done_at = created + Duration::hours(2);
        task.set_status(task.status.next(), done_at);
        assert_eq!(task.completed_at, Some(done_at));

        task.set_status(Status::Completed, done_at + Duration::hours(1));
        assert_eq!(task.completed_at, Some(done_at), "existing stamp is kept");

        task.set_status(task.status.next(), done_at);
        assert_eq!(task.status, Status::Pending);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn serializes_with_camel_case_and_kebab_status() {
        let created = Utc.with_ymd_and_hms(2026, 4, 1, 9, 0, 0).single().expect("valid instant");
        let mut task = Task::new_pending("Revisar".to_string(), created);
        task.status = Status::InProgress;

        let json = serde_json::to_value(&task).expect("serialize task");
        assert_eq!(json["status"], "in-progress");
        assert_eq!(json["priority"], "medium");
        assert!(json.get("createdAt").is_some());
        assert!(json.get("completedAt").is_none());
        assert!(json.get("dueDate").is_none());
    }

    #[test]
    fn initials_take_first_two_words() {
        let now = Utc::now();
        let group = Group::new("campanha de verão 2026".to_string(), now);
        assert_eq!(group.initials(), "CD");
    }
}
