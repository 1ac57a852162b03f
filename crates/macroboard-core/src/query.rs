//! Read-only projections over the entity store: the visible task list,
//! statistics, and the analytics series.

use std::collections::BTreeMap;

use chrono_tz::Tz;
use tracing::debug;

use crate::datetime::{DayWindow, week_number};
use crate::model::{Group, Priority, Status, Task};
use crate::store::{BackRef, EntityStore};
use crate::view::{Selection, TaskFilter};

/// One visible task with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow<'a> {
    pub task: &'a Task,
    pub back_ref: BackRef,
    /// Set only in the aggregated "all tasks" projection.
    pub group_name: Option<&'a str>,
}

/// Rows for the current selection, in stored order, before any filtering.
pub fn selection_rows<'a>(store: &'a EntityStore, selection: &Selection) -> Vec<TaskRow<'a>> {
    match selection {
        Selection::None => vec![],
        Selection::Group(id) => store
            .group(id)
            .map(|group| group_rows(group, false))
            .unwrap_or_default(),
        Selection::All => store
            .groups()
            .iter()
            .flat_map(|group| group_rows(group, true))
            .collect(),
    }
}

fn group_rows(group: &Group, aggregated: bool) -> Vec<TaskRow<'_>> {
    group
        .tasks
        .iter()
        .enumerate()
        .map(|(index, task)| TaskRow {
            task,
            back_ref: BackRef {
                group_id: group.id.clone(),
                index,
            },
            group_name: aggregated.then_some(group.name.as_str()),
        })
        .collect()
}

/// The task list a view shows: search first, then the category filter.
#[tracing::instrument(skip(store, window))]
pub fn visible_tasks<'a>(
    store: &'a EntityStore,
    selection: &Selection,
    filter: TaskFilter,
    search: &str,
    window: &DayWindow,
) -> Vec<TaskRow<'a>> {
    let rows = filter_rows(selection_rows(store, selection), search, filter, window);
    debug!(visible = rows.len(), "computed visible tasks");
    rows
}

/// Applying the same search and filter twice yields the same rows.
pub fn filter_rows<'a>(
    rows: Vec<TaskRow<'a>>,
    search: &str,
    filter: TaskFilter,
    window: &DayWindow,
) -> Vec<TaskRow<'a>> {
    let needle = search.trim().to_lowercase();
    rows.into_iter()
        .filter(|row| needle.is_empty() || matches_search(row, &needle))
        .filter(|row| matches_filter(row.task, filter, window))
        .collect()
}

fn matches_search(row: &TaskRow<'_>, needle: &str) -> bool {
    let task = row.task;
    [
        Some(task.name.as_str()),
        Some(task.details.as_str()),
        Some(task.assignee.as_str()),
        row.group_name,
    ]
    .into_iter()
    .flatten()
    .any(|field| field.to_lowercase().contains(needle))
}

pub fn matches_filter(task: &Task, filter: TaskFilter, window: &DayWindow) -> bool {
    match filter {
        TaskFilter::All => true,
        TaskFilter::Pending => task.status == Status::Pending,
        TaskFilter::Completed => task.is_completed(),
        TaskFilter::Overdue => task.is_overdue(window.today_start),
        TaskFilter::DueToday => task.due_date.is_some_and(|due| window.is_due_today(due)),
        TaskFilter::DueThisWeek => task.due_date.is_some_and(|due| window.is_due_this_week(due)),
        TaskFilter::HighPriority => task.priority == Priority::High,
    }
}

/// Rounded percentage (half up); zero when `total` is zero.
pub fn percent(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let rounded = (200 * part + total) / (2 * total);
    u32::try_from(rounded).unwrap_or(u32::MAX)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoardStats {
    pub group_count: usize,
    pub completed_groups: usize,
    pub completed_group_rate: u32,
    pub total: usize,
    pub completed: usize,
    pub pending: usize,
    pub in_progress: usize,
    /// Not yet completed.
    pub active: usize,
    pub overdue: usize,
    pub completion_rate: u32,
}

/// Group-level counters always cover the whole board; task counters follow
/// the selection, aggregating every group for `All` and `None`.
pub fn stats(store: &EntityStore, selection: &Selection, window: &DayWindow) -> BoardStats {
    let groups = store.groups();
    let completed_groups = groups.iter().filter(|g| g.is_fully_completed()).count();

    let mut stats = BoardStats {
        group_count: groups.len(),
        completed_groups,
        completed_group_rate: percent(completed_groups, groups.len()),
        ..BoardStats::default()
    };

    for task in scoped_tasks(store, selection) {
        stats.total += 1;
        match task.status {
            Status::Pending => stats.pending += 1,
            Status::InProgress => stats.in_progress += 1,
            Status::Completed => stats.completed += 1,
        }
        if task.is_overdue(window.today_start) {
            stats.overdue += 1;
        }
    }
    stats.active = stats.total - stats.completed;
    stats.completion_rate = percent(stats.completed, stats.total);
    stats
}

fn scoped_tasks<'a>(
    store: &'a EntityStore,
    selection: &Selection,
) -> Box<dyn Iterator<Item = &'a Task> + 'a> {
    match selection.group_id().and_then(|id| store.group(id)) {
        Some(group) => Box::new(group.tasks.iter()),
        None => Box::new(store.groups().iter().flat_map(|g| g.tasks.iter())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrendPoint {
    pub label: String,
    pub rate: u32,
}

/// Completion rate per creation week, ascending by week number.
pub fn weekly_completion_series(group: &Group, tz: Tz) -> Vec<TrendPoint> {
    let mut weeks: BTreeMap<u32, (usize, usize)> = BTreeMap::new();
    for task in &group.tasks {
        let bucket = weeks.entry(week_number(task.created_at, tz)).or_default();
        bucket.0 += 1;
        if task.is_completed() {
            bucket.1 += 1;
        }
    }

    weeks
        .into_iter()
        .map(|(week, (total, completed))| TrendPoint {
            label: format!("Semana {week}"),
            rate: percent(completed, total),
        })
        .collect()
}

pub fn group_completion_rates(store: &EntityStore) -> Vec<TrendPoint> {
    store
        .groups()
        .iter()
        .map(|group| TrendPoint {
            label: group.name.clone(),
            rate: percent(group.completed_count(), group.tasks.len()),
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendKind {
    Weekly,
    PerGroup,
}

/// The four chart series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Analytics {
    pub completed: usize,
    pub remaining: usize,
    /// High, medium, low.
    pub by_priority: [(Priority, usize); 3],
    /// Pending, in progress, completed.
    pub by_status: [(Status, usize); 3],
    pub trend_kind: TrendKind,
    pub trend: Vec<TrendPoint>,
}

#[tracing::instrument(skip(store, tz))]
pub fn analytics(store: &EntityStore, selection: &Selection, tz: Tz) -> Analytics {
    let mut by_priority = [
        (Priority::High, 0),
        (Priority::Medium, 0),
        (Priority::Low, 0),
    ];
    let mut by_status = Status::ALL.map(|status| (status, 0));

    for task in scoped_tasks(store, selection) {
        if let Some(slot) = by_priority.iter_mut().find(|(p, _)| *p == task.priority) {
            slot.1 += 1;
        }
        if let Some(slot) = by_status.iter_mut().find(|(s, _)| *s == task.status) {
            slot.1 += 1;
        }
    }

    let completed = by_status[2].1;
    let total: usize = by_status.iter().map(|(_, n)| n).sum();

    let (trend_kind, trend) = match selection.group_id().and_then(|id| store.group(id)) {
        Some(group) => (TrendKind::Weekly, weekly_completion_series(group, tz)),
        None => (TrendKind::PerGroup, group_completion_rates(store)),
    };

    Analytics {
        completed,
        remaining: total - completed,
        by_priority,
        by_status,
        trend_kind,
        trend,
    }
}
