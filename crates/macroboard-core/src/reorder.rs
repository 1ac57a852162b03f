use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;

use crate::app::App;
use crate::datetime::Clock;
use crate::error::BoardResult;
use crate::model::{
  GroupId,
  Status,
  TaskId
};
use crate::query::visible_tasks;
use crate::storage::KeyValueStore;
use crate::view::Selection;

/// The three board lanes, one per
/// status.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub enum BoardColumn {
  Pending,
  InProgress,
  Completed
}

impl BoardColumn {
  pub const ALL: [BoardColumn; 3] = [
    BoardColumn::Pending,
    BoardColumn::InProgress,
    BoardColumn::Completed
  ];

  pub fn id(self) -> &'static str {
    match self {
      | BoardColumn::Pending => {
        "pendingTasks"
      }
      | BoardColumn::InProgress => {
        "inProgressTasks"
      }
      | BoardColumn::Completed => {
        "completedTasks"
      }
    }
  }

  pub fn status(self) -> Status {
    match self {
      | BoardColumn::Pending => {
        Status::Pending
      }
      | BoardColumn::InProgress => {
        Status::InProgress
      }
      | BoardColumn::Completed => {
        Status::Completed
      }
    }
  }

  pub fn for_status(
    status: Status
  ) -> Self {
    match status {
      | Status::Pending => {
        BoardColumn::Pending
      }
      | Status::InProgress => {
        BoardColumn::InProgress
      }
      | Status::Completed => {
        BoardColumn::Completed
      }
    }
  }
}

impl FromStr for BoardColumn {
  type Err = anyhow::Error;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    let token = s.trim();
    if let Some(column) =
      Self::ALL.into_iter().find(|c| {
        c.id().eq_ignore_ascii_case(token)
      })
    {
      return Ok(column);
    }
    token
      .parse::<Status>()
      .map(Self::for_status)
      .map_err(|_| {
        anyhow!(
          "unknown board column: {token}"
        )
      })
  }
}

/// A drop reported by the drag widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DragEvent {
  /// Within the list of the selected
  /// group; `new_index` is a position
  /// in the visible list.
  Reorder {
    task_id:   TaskId,
    new_index: usize
  },
  /// Onto a board lane. `owner` is the
  /// group captured when the card was
  /// rendered.
  ColumnDrop {
    task_id: TaskId,
    column:  String,
    owner:   Option<GroupId>
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
  NoGroupSelected,
  UnknownColumn(String),
  TaskNotFound(TaskId),
  Unchanged
}

impl fmt::Display for IgnoreReason {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    match self {
      | IgnoreReason::NoGroupSelected => {
        f.write_str(
          "reordering needs a single \
           selected group"
        )
      }
      | IgnoreReason::UnknownColumn(
        column
      ) => {
        write!(
          f,
          "unknown board column: \
           {column}"
        )
      }
      | IgnoreReason::TaskNotFound(
        id
      ) => {
        write!(
          f,
          "task is not on the board: \
           {id}"
        )
      }
      | IgnoreReason::Unchanged => {
        f.write_str("nothing to change")
      }
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropOutcome {
  Applied,
  Ignored(IgnoreReason)
}

/// Routes a drag event to the store
/// through the controller. Stale or
/// repeated events come back as
/// `Ignored` without touching storage.
#[tracing::instrument(skip(app))]
pub fn apply_drag<S, C>(
  app: &mut App<S, C>,
  event: DragEvent
) -> BoardResult<DropOutcome>
where
  S: KeyValueStore,
  C: Clock
{
  let outcome = match event {
    | DragEvent::Reorder {
      task_id,
      new_index
    } => {
      reorder(app, &task_id, new_index)?
    }
    | DragEvent::ColumnDrop {
      task_id,
      column,
      owner
    } => {
      column_drop(
        app,
        &task_id,
        &column,
        owner.as_deref()
      )?
    }
  };

  if let DropOutcome::Ignored(reason) =
    &outcome
  {
    tracing::warn!(
      %reason,
      "drag event ignored"
    );
  }
  Ok(outcome)
}

fn reorder<S, C>(
  app: &mut App<S, C>,
  task_id: &str,
  new_index: usize
) -> BoardResult<DropOutcome>
where
  S: KeyValueStore,
  C: Clock
{
  let Selection::Group(group_id) =
    app.view().selection.clone()
  else {
    return Ok(DropOutcome::Ignored(
      IgnoreReason::NoGroupSelected
    ));
  };

  let Some(target) = anchored_index(
    app, &group_id, task_id, new_index
  ) else {
    return Ok(DropOutcome::Ignored(
      IgnoreReason::TaskNotFound(
        task_id.to_string()
      )
    ));
  };

  let current = app
    .store()
    .group(&group_id)
    .and_then(|g| g.task_index(task_id));
  if current == Some(target) {
    return Ok(DropOutcome::Ignored(
      IgnoreReason::Unchanged
    ));
  }

  tracing::info!(
    group = %group_id,
    task = %task_id,
    visible_index = new_index,
    stored_index = target,
    "reordering task"
  );
  app.move_task(
    &group_id, task_id, target
  )?;
  Ok(DropOutcome::Applied)
}

/// Translates a position in the
/// visible (filtered) list into a
/// stored position: the moved task
/// lands right before the task that
/// is visible at `new_index`, or right
/// after the last visible task.
fn anchored_index<S, C>(
  app: &App<S, C>,
  group_id: &str,
  task_id: &str,
  new_index: usize
) -> Option<usize>
where
  S: KeyValueStore,
  C: Clock
{
  let view = app.view();
  let window = app.day_window();
  let visible: Vec<&str> =
    visible_tasks(
      app.store(),
      &view.selection,
      view.filter,
      view.search_term(),
      &window
    )
    .into_iter()
    .map(|row| row.task.id.as_str())
    .collect();

  if !visible.contains(&task_id) {
    return None;
  }

  let group =
    app.store().group(group_id)?;
  let remaining: Vec<&str> = group
    .tasks
    .iter()
    .map(|t| t.id.as_str())
    .filter(|id| *id != task_id)
    .collect();
  let others: Vec<&str> = visible
    .into_iter()
    .filter(|id| *id != task_id)
    .collect();

  let stored = |id: &str| {
    remaining
      .iter()
      .position(|other| *other == id)
  };

  match others.get(new_index) {
    | Some(anchor) => stored(*anchor),
    | None => match others.last() {
      | Some(last) => {
        stored(*last).map(|pos| pos + 1)
      }
      | None => group.task_index(task_id)
    }
  }
}

fn column_drop<S, C>(
  app: &mut App<S, C>,
  task_id: &str,
  column: &str,
  owner: Option<&str>
) -> BoardResult<DropOutcome>
where
  S: KeyValueStore,
  C: Clock
{
  let Ok(column) =
    column.parse::<BoardColumn>()
  else {
    return Ok(DropOutcome::Ignored(
      IgnoreReason::UnknownColumn(
        column.to_string()
      )
    ));
  };

  let store = app.store();
  let selected = app
    .view()
    .selection
    .group_id()
    .map(str::to_string);
  let owner = owner
    .map(str::to_string)
    .into_iter()
    .chain(selected)
    .find(|gid| {
      store.task(gid, task_id).is_some()
    })
    .or_else(|| {
      store
        .locate_task(task_id)
        .map(|back_ref| back_ref.group_id)
    });

  let Some(owner) = owner else {
    return Ok(DropOutcome::Ignored(
      IgnoreReason::TaskNotFound(
        task_id.to_string()
      )
    ));
  };

  let target = column.status();
  let unchanged = store
    .task(&owner, task_id)
    .is_some_and(|t| t.status == target);
  if unchanged {
    return Ok(DropOutcome::Ignored(
      IgnoreReason::Unchanged
    ));
  }

  tracing::info!(
    group = %owner,
    task = %task_id,
    column = column.id(),
    "moving task to board column"
  );
  app.recategorize_task(
    &owner, task_id, target
  )?;
  Ok(DropOutcome::Applied)
}
