use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use tracing::debug;

use crate::model::GroupId;
use crate::store::EntityStore;

const ALL_TASKS_MEMORY: &str = "-1";

/// What the task pane is showing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    None,
    /// The synthetic "all tasks" projection.
    All,
    Group(GroupId),
}

impl Selection {
    pub fn group_id(&self) -> Option<&str> {
        match self {
            Selection::Group(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Selection::All)
    }

    /// Last-selection memory: `-1` for all tasks, the sorted ordinal for a
    /// group, empty when nothing is selected.
    pub fn to_memory(&self, store: &EntityStore) -> String {
        match self {
            Selection::None => String::new(),
            Selection::All => ALL_TASKS_MEMORY.to_string(),
            Selection::Group(id) => store
                .position_of(id)
                .map(|pos| pos.to_string())
                .unwrap_or_default(),
        }
    }

    pub fn from_memory(raw: &str, store: &EntityStore) -> Self {
        let raw = raw.trim();
        if raw == ALL_TASKS_MEMORY {
            return Selection::All;
        }
        match raw.parse::<usize>() {
            Ok(pos) => store
                .groups()
                .get(pos)
                .map(|g| Selection::Group(g.id.clone()))
                .unwrap_or_default(),
            Err(_) => Selection::None,
        }
    }

    /// Re-resolves a selection whose group may have been deleted: the first
    /// remaining group takes over, or nothing when the board is empty.
    pub fn reconcile(&self, store: &EntityStore) -> Self {
        match self {
            Selection::Group(id) if store.group(id).is_none() => {
                let fallback = store
                    .groups()
                    .first()
                    .map(|g| Selection::Group(g.id.clone()))
                    .unwrap_or_default();
                debug!(stale = %id, ?fallback, "selected group is gone");
                fallback
            }
            other => other.clone(),
        }
    }
}

/// Category filter applied after the search term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskFilter {
    #[default]
    All,
    Pending,
    Completed,
    Overdue,
    DueToday,
    DueThisWeek,
    HighPriority,
}

impl TaskFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskFilter::All => "all",
            TaskFilter::Pending => "pending",
            TaskFilter::Completed => "completed",
            TaskFilter::Overdue => "overdue",
            TaskFilter::DueToday => "today",
            TaskFilter::DueThisWeek => "week",
            TaskFilter::HighPriority => "high-priority",
        }
    }
}

impl fmt::Display for TaskFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(TaskFilter::All),
            "pending" => Ok(TaskFilter::Pending),
            "completed" | "done" => Ok(TaskFilter::Completed),
            "overdue" => Ok(TaskFilter::Overdue),
            "today" | "due-today" | "duetoday" => Ok(TaskFilter::DueToday),
            "week" | "due-this-week" | "duethisweek" => Ok(TaskFilter::DueThisWeek),
            "high-priority" | "highpriority" | "high" => Ok(TaskFilter::HighPriority),
            other => Err(anyhow!("unknown filter: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    #[default]
    List,
    Board,
}

impl Layout {
    pub fn as_str(self) -> &'static str {
        match self {
            Layout::List => "list",
            Layout::Board => "board",
        }
    }
}

impl FromStr for Layout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "list" => Ok(Layout::List),
            "board" | "kanban" => Ok(Layout::Board),
            other => Err(anyhow!("unknown layout: {other}")),
        }
    }
}

/// Transient view state. Changing it never touches the entity store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    pub selection: Selection,
    pub filter: TaskFilter,
    pub layout: Layout,
    pub(crate) search_term: String,
}

impl ViewState {
    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn set_search_term(&mut self, term: &str) {
        self.search_term = term.trim().to_string();
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Layout, Selection, TaskFilter, ViewState};
    use crate::store::EntityStore;

    fn store(names: &[&str]) -> EntityStore {
        let mut store = EntityStore::default();
        for name in names {
            store.create_group(name, Utc::now()).expect("create group");
        }
        store
    }

    #[test]
    fn memory_encodes_all_and_ordinals() {
        let store = store(&["b", "a"]);
        let b = Selection::Group(store.groups()[1].id.clone());

        assert_eq!(Selection::All.to_memory(&store), "-1");
        assert_eq!(b.to_memory(&store), "1");
        assert_eq!(Selection::from_memory("1", &store), b);
        assert_eq!(Selection::from_memory("-1", &store), Selection::All);
        assert_eq!(Selection::from_memory("7", &store), Selection::None);
        assert_eq!(Selection::from_memory("", &store), Selection::None);
    }

    #[test]
    fn reconcile_falls_back_to_first_group() {
        let mut store = store(&["a", "b"]);
        let b_id = store.groups()[1].id.clone();
        let selection = Selection::Group(b_id.clone());

        assert_eq!(selection.reconcile(&store), selection);

        store.delete_group(&b_id).expect("delete");
        let first = store.groups()[0].id.clone();
        assert_eq!(selection.reconcile(&store), Selection::Group(first.clone()));

        store.delete_group(&first).expect("delete");
        assert_eq!(selection.reconcile(&store), Selection::None);
        assert_eq!(Selection::All.reconcile(&store), Selection::All);
    }

    #[test]
    fn parses_filter_and_layout_names() {
        assert_eq!("dueThisWeek".parse::<TaskFilter>().expect("filter"), TaskFilter::DueThisWeek);
        assert_eq!("today".parse::<TaskFilter>().expect("filter"), TaskFilter::DueToday);
        assert!("someday".parse::<TaskFilter>().is_err());
        assert_eq!("kanban".parse::<Layout>().expect("layout"), Layout::Board);
    }

    #[test]
    fn search_term_is_trimmed() {
        let mut view = ViewState::default();
        view.set_search_term("  Post  ");
        assert_eq!(view.search_term(), "Post");
    }
}
