//! The in-memory entity graph: groups, their ordered tasks, and every
//! operation allowed to change them.
//!
//! The store never persists or renders on its own; [`crate::app::App`] wraps
//! each call in the mutate -> persist -> re-render sequence.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{BoardError, BoardResult};
use crate::model::{Group, GroupId, Status, Task, TaskDraft, TaskId, TaskPatch};
use crate::normalize::{Strictness, groups_from_value, sort_groups};

/// Where a task lives: owning group id plus its position in that group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackRef {
    pub group_id: GroupId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetScope {
    AllGroups,
    Group(GroupId),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityStore {
    groups: Vec<Group>,
}

impl EntityStore {
    pub fn new(mut groups: Vec<Group>) -> Self {
        sort_groups(&mut groups);
        Self { groups }
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.id == id)
    }

    pub fn task(&self, group_id: &str, task_id: &str) -> Option<&Task> {
        self.group(group_id)?.task(task_id)
    }

    /// Live lookup of a task's owner by id alone.
    pub fn locate_task(&self, task_id: &str) -> Option<BackRef> {
        self.groups.iter().find_map(|group| {
            group.task_index(task_id).map(|index| BackRef {
                group_id: group.id.clone(),
                index,
            })
        })
    }

    pub fn total_tasks(&self) -> usize {
        self.groups.iter().map(|g| g.tasks.len()).sum()
    }

    #[tracing::instrument(skip(self, now))]
    pub fn create_group(&mut self, name: &str, now: DateTime<Utc>) -> BoardResult<usize> {
        let name = non_blank(name, "group name")?;
        let group = Group::new(name, now);
        let id = group.id.clone();
        self.groups.push(group);
        sort_groups(&mut self.groups);

        let position = self.require_position(&id)?;
        info!(group = %id, position, "created group");
        Ok(position)
    }

    #[tracing::instrument(skip(self))]
    pub fn rename_group(&mut self, id: &str, new_name: &str) -> BoardResult<usize> {
        let name = non_blank(new_name, "group name")?;
        let group = self.group_mut(id)?;
        group.name = name;
        sort_groups(&mut self.groups);

        let position = self.require_position(id)?;
        info!(group = %id, position, "renamed group");
        Ok(position)
    }

    /// Removes the group together with all of its tasks.
    #[tracing::instrument(skip(self))]
    pub fn delete_group(&mut self, id: &str) -> BoardResult<Group> {
        let position = self.require_position(id)?;
        let removed = self.groups.remove(position);
        info!(group = %id, tasks = removed.tasks.len(), "deleted group");
        Ok(removed)
    }

    #[tracing::instrument(skip(self, draft, now), fields(name = %draft.name))]
    pub fn create_task(
        &mut self,
        group_id: &str,
        draft: TaskDraft,
        now: DateTime<Utc>,
    ) -> BoardResult<TaskId> {
        let name = non_blank(&draft.name, "task name")?;
        let group = self.group_mut(group_id)?;

        let mut task = Task::new_pending(name, now);
        task.details = draft.details.trim().to_string();
        task.assignee = draft.assignee.trim().to_string();
        task.due_date = draft.due_date;
        if let Some(priority) = draft.priority {
            task.priority = priority;
        }
        if let Some(status) = draft.status {
            task.set_status(status, now);
        }

        let id = task.id.clone();
        group.tasks.push(task);
        info!(group = %group_id, task = %id, "created task");
        Ok(id)
    }

    /// Applies `patch` after validating it; a rejected patch writes nothing.
    #[tracing::instrument(skip(self, patch, now))]
    pub fn update_task(
        &mut self,
        group_id: &str,
        task_id: &str,
        patch: TaskPatch,
        now: DateTime<Utc>,
    ) -> BoardResult<()> {
        let name = match patch.name.as_deref() {
            Some(raw) => Some(non_blank(raw, "task name")?),
            None => None,
        };
        let task = self.task_mut(group_id, task_id)?;

        if let Some(name) = name {
            task.name = name;
        }
        if let Some(details) = patch.details {
            task.details = details.trim().to_string();
        }
        if let Some(assignee) = patch.assignee {
            task.assignee = assignee.trim().to_string();
        }
        if let Some(due_date) = patch.due_date {
            task.due_date = due_date;
        }
        if let Some(priority) = patch.priority {
            task.priority = priority;
        }
        if let Some(status) = patch.status {
            task.set_status(status, now);
        }

        debug!(group = %group_id, task = %task_id, "updated task");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_task(&mut self, group_id: &str, task_id: &str) -> BoardResult<Task> {
        let group = self.group_mut(group_id)?;
        let index = group
            .task_index(task_id)
            .ok_or_else(|| BoardError::task_not_found(task_id))?;
        let removed = group.tasks.remove(index);
        info!(group = %group_id, task = %task_id, "deleted task");
        Ok(removed)
    }

    /// pending -> in-progress -> completed -> pending.
    #[tracing::instrument(skip(self, now))]
    pub fn cycle_task_status(
        &mut self,
        group_id: &str,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> BoardResult<Status> {
        let task = self.task_mut(group_id, task_id)?;
        let next = task.status.next();
        task.set_status(next, now);
        debug!(task = %task_id, status = %next, "cycled task status");
        Ok(next)
    }

    /// Reinserts the task at `new_index` (clamped) within the same group and
    /// returns where it landed.
    #[tracing::instrument(skip(self))]
    pub fn move_task(
        &mut self,
        group_id: &str,
        task_id: &str,
        new_index: usize,
    ) -> BoardResult<usize> {
        let group = self.group_mut(group_id)?;
        let from = group
            .task_index(task_id)
            .ok_or_else(|| BoardError::task_not_found(task_id))?;

        let task = group.tasks.remove(from);
        let to = new_index.min(group.tasks.len());
        group.tasks.insert(to, task);
        debug!(task = %task_id, from, to, "moved task");
        Ok(to)
    }

    /// Board-column drop: changes status only, never group membership.
    #[tracing::instrument(skip(self, now))]
    pub fn recategorize_task(
        &mut self,
        source_group_id: &str,
        task_id: &str,
        target_status: Status,
        now: DateTime<Utc>,
    ) -> BoardResult<()> {
        let task = self.task_mut(source_group_id, task_id)?;
        if task.status != target_status {
            task.set_status(target_status, now);
            debug!(task = %task_id, status = %target_status, "recategorized task");
        }
        Ok(())
    }

    /// Bulk import. The payload is fully validated before anything is replaced.
    #[tracing::instrument(skip(self, payload, now))]
    pub fn replace_all(&mut self, payload: Value, now: DateTime<Utc>) -> BoardResult<usize> {
        let groups = groups_from_value(payload, Strictness::Reject, now)?;
        let count = groups.len();
        self.groups = groups;
        info!(groups = count, tasks = self.total_tasks(), "replaced board");
        Ok(count)
    }

    /// Returns completed tasks in scope to pending; yields how many changed.
    #[tracing::instrument(skip(self, now))]
    pub fn reset_completed(&mut self, scope: &ResetScope, now: DateTime<Utc>) -> BoardResult<usize> {
        let groups: Vec<&mut Group> = match scope {
            ResetScope::AllGroups => self.groups.iter_mut().collect(),
            ResetScope::Group(id) => vec![self.group_mut(id)?],
        };

        let mut reset = 0;
        for group in groups {
            for task in group.tasks.iter_mut().filter(|t| t.is_completed()) {
                task.set_status(Status::Pending, now);
                reset += 1;
            }
        }

        info!(?scope, reset, "reset completed tasks");
        Ok(reset)
    }

    fn require_position(&self, id: &str) -> BoardResult<usize> {
        self.position_of(id).ok_or_else(|| BoardError::group_not_found(id))
    }

    fn group_mut(&mut self, id: &str) -> BoardResult<&mut Group> {
        self.groups
            .iter_mut()
            .find(|g| g.id == id)
            .ok_or_else(|| BoardError::group_not_found(id))
    }

    fn task_mut(&mut self, group_id: &str, task_id: &str) -> BoardResult<&mut Task> {
        self.group_mut(group_id)?
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| BoardError::task_not_found(task_id))
    }
}

fn non_blank(raw: &str, what: &str) -> BoardResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(BoardError::validation(format!("{what} cannot be empty")));
    }
    Ok(trimmed.to_string())
}
