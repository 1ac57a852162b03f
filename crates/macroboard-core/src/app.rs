//! The application controller: owns the entity store, the view state and the
//! persistence gateway, and turns every event into
//! mutate -> persist -> re-render.

use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::datetime::{Clock, DEFAULT_BOARD_TIMEZONE, DayWindow};
use crate::error::{BoardError, BoardResult};
use crate::model::{Group, GroupId, Status, Task, TaskDraft, TaskId, TaskPatch};
use crate::render::{Frame, build_frame};
use crate::storage::{Gateway, KeyValueStore};
use crate::store::{EntityStore, ResetScope};
use crate::view::{Layout, Selection, TaskFilter, ViewState};

/// What happens to in-memory changes when the store refuses a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PersistPolicy {
    /// Restore the pre-mutation board and selection.
    #[default]
    Rollback,
    /// Keep the change in memory; storage catches up on the next save.
    Keep,
}

impl fmt::Display for PersistPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistPolicy::Rollback => f.write_str("rollback"),
            PersistPolicy::Keep => f.write_str("keep"),
        }
    }
}

impl FromStr for PersistPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rollback" => Ok(PersistPolicy::Rollback),
            "keep" => Ok(PersistPolicy::Keep),
            other => Err(anyhow!("invalid persist.on_failure: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AppSettings {
    pub tz: Tz,
    pub policy: PersistPolicy,
    /// Used when no layout was remembered.
    pub default_layout: Layout,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            tz: DEFAULT_BOARD_TIMEZONE
                .parse()
                .unwrap_or(chrono_tz::UTC),
            policy: PersistPolicy::default(),
            default_layout: Layout::default(),
        }
    }
}

pub struct App<S, C> {
    store: EntityStore,
    view: ViewState,
    gateway: Gateway<S>,
    clock: C,
    tz: Tz,
    policy: PersistPolicy,
    frame: Frame,
    revision: u64,
}

impl<S: KeyValueStore, C: Clock> App<S, C> {
    /// Loads the board, restores the last selection and layout, and renders
    /// the first frame.
    #[tracing::instrument(skip_all, fields(tz = %settings.tz, policy = %settings.policy))]
    pub fn open(kv: S, clock: C, settings: AppSettings) -> Self {
        let mut gateway = Gateway::new(kv);
        let loaded = gateway.load_groups(clock.now());
        let store = EntityStore::new(loaded.groups);
        if loaded.repaired {
            // Back-filled ids and timestamps must stay stable across runs.
            match gateway.save_groups(store.groups()) {
                Ok(()) => info!(groups = store.groups().len(), "stored repaired board"),
                Err(err) => warn!(error = %err, "failed to store repaired board"),
            }
        }

        let selection = gateway
            .load_selection_memory()
            .map(|raw| Selection::from_memory(&raw, &store))
            .unwrap_or_default();
        let view = ViewState {
            selection,
            layout: gateway.load_layout().unwrap_or(settings.default_layout),
            ..ViewState::default()
        };

        let window = DayWindow::at(clock.now(), settings.tz);
        let frame = build_frame(&store, &view, &window, settings.tz);

        info!(
            groups = store.groups().len(),
            tasks = store.total_tasks(),
            selection = ?view.selection,
            "board ready"
        );

        Self {
            store,
            view,
            gateway,
            clock,
            tz: settings.tz,
            policy: settings.policy,
            frame,
            revision: 0,
        }
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Bumped on every redraw.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn day_window(&self) -> DayWindow {
        DayWindow::at(self.clock.now(), self.tz)
    }

    pub fn gateway(&self) -> &Gateway<S> {
        &self.gateway
    }

    pub fn gateway_mut(&mut self) -> &mut Gateway<S> {
        &mut self.gateway
    }

    /// Creates a group and selects it.
    pub fn create_group(&mut self, name: &str) -> BoardResult<GroupId> {
        self.mutate("create_group", |store, selection, now| {
            let position = store.create_group(name, now)?;
            let id = store
                .groups()
                .get(position)
                .map(|g| g.id.clone())
                .ok_or_else(|| BoardError::validation("created group vanished"))?;
            *selection = Selection::Group(id.clone());
            Ok(id)
        })
    }

    pub fn rename_group(&mut self, id: &str, new_name: &str) -> BoardResult<usize> {
        self.mutate("rename_group", |store, _, _| store.rename_group(id, new_name))
    }

    pub fn delete_group(&mut self, id: &str) -> BoardResult<Group> {
        self.mutate("delete_group", |store, _, _| store.delete_group(id))
    }

    pub fn create_task(&mut self, group_id: &str, draft: TaskDraft) -> BoardResult<TaskId> {
        self.mutate("create_task", |store, _, now| {
            store.create_task(group_id, draft, now)
        })
    }

    pub fn update_task(
        &mut self,
        group_id: &str,
        task_id: &str,
        patch: TaskPatch,
    ) -> BoardResult<()> {
        if patch.is_empty() {
            return Err(BoardError::validation("nothing to update"));
        }
        self.mutate("update_task", |store, _, now| {
            store.update_task(group_id, task_id, patch, now)
        })
    }

    pub fn delete_task(&mut self, group_id: &str, task_id: &str) -> BoardResult<Task> {
        self.mutate("delete_task", |store, _, _| store.delete_task(group_id, task_id))
    }

    pub fn cycle_task_status(&mut self, group_id: &str, task_id: &str) -> BoardResult<Status> {
        self.mutate("cycle_task_status", |store, _, now| {
            store.cycle_task_status(group_id, task_id, now)
        })
    }

    pub fn move_task(
        &mut self,
        group_id: &str,
        task_id: &str,
        new_index: usize,
    ) -> BoardResult<usize> {
        self.mutate("move_task", |store, _, _| {
            store.move_task(group_id, task_id, new_index)
        })
    }

    pub fn recategorize_task(
        &mut self,
        group_id: &str,
        task_id: &str,
        status: Status,
    ) -> BoardResult<()> {
        self.mutate("recategorize_task", |store, _, now| {
            store.recategorize_task(group_id, task_id, status, now)
        })
    }

    /// Replaces the whole board and clears the selection.
    pub fn replace_all(&mut self, payload: Value) -> BoardResult<usize> {
        self.mutate("replace_all", |store, selection, now| {
            let count = store.replace_all(payload, now)?;
            *selection = Selection::None;
            Ok(count)
        })
    }

    pub fn reset_completed(&mut self, scope: &ResetScope) -> BoardResult<usize> {
        self.mutate("reset_completed", |store, _, now| {
            store.reset_completed(scope, now)
        })
    }

    /// Switches the task pane and remembers the choice.
    #[tracing::instrument(skip(self))]
    pub fn select(&mut self, selection: Selection) -> BoardResult<()> {
        if let Selection::Group(id) = &selection
            && self.store.group(id).is_none()
        {
            return Err(BoardError::group_not_found(id.as_str()));
        }
        self.view.selection = selection;
        self.remember_selection();
        self.refresh();
        Ok(())
    }

    pub fn set_filter(&mut self, filter: TaskFilter) {
        self.view.filter = filter;
        self.refresh();
    }

    pub fn set_search(&mut self, term: &str) {
        self.view.set_search_term(term);
        self.refresh();
    }

    /// The layout is remembered; a refused write leaves the view unchanged.
    pub fn set_layout(&mut self, layout: Layout) -> BoardResult<()> {
        self.gateway.save_layout(layout)?;
        self.view.layout = layout;
        self.refresh();
        Ok(())
    }

    fn mutate<T>(
        &mut self,
        action: &'static str,
        op: impl FnOnce(&mut EntityStore, &mut Selection, DateTime<Utc>) -> BoardResult<T>,
    ) -> BoardResult<T> {
        let now = self.clock.now();
        let store_before = self.store.clone();
        let selection_before = self.view.selection.clone();

        let value = op(&mut self.store, &mut self.view.selection, now)?;
        self.view.selection = self.view.selection.reconcile(&self.store);

        if let Err(err) = self.gateway.save_groups(self.store.groups()) {
            match self.policy {
                PersistPolicy::Rollback => {
                    error!(action, error = %err, "save failed; rolling back");
                    self.store = store_before;
                    self.view.selection = selection_before;
                }
                PersistPolicy::Keep => {
                    error!(action, error = %err, "save failed; keeping in-memory changes");
                }
            }
            self.refresh();
            return Err(err);
        }

        self.remember_selection();
        self.refresh();
        info!(action, revision = self.revision, "applied change");
        Ok(value)
    }

    fn remember_selection(&mut self) {
        let encoded = self.view.selection.to_memory(&self.store);
        if let Err(err) = self.gateway.save_selection_memory(&encoded) {
            warn!(error = %err, "failed to remember selection");
        }
    }

    fn refresh(&mut self) {
        let window = self.day_window();
        self.frame = build_frame(&self.store, &self.view, &window, self.tz);
        self.revision += 1;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{App, AppSettings, PersistPolicy};
    use crate::datetime::FixedClock;
    use crate::error::BoardError;
    use crate::model::{Status, TaskDraft};
    use crate::render::Body;
    use crate::storage::{GROUPS_KEY, LAYOUT_KEY, MemoryStore, SELECTION_KEY};
    use crate::view::{Layout, Selection};

    fn clock() -> FixedClock {
        FixedClock::new(
            Utc.with_ymd_and_hms(2026, 8, 3, 13, 0, 0)
                .single()
                .expect("valid now"),
        )
    }

    fn open(kv: MemoryStore, policy: PersistPolicy) -> App<MemoryStore, FixedClock> {
        App::open(
            kv,
            clock(),
            AppSettings {
                policy,
                ..AppSettings::default()
            },
        )
    }

    #[test]
    fn campaign_completes_to_full_rates() {
        let mut app = open(MemoryStore::default(), PersistPolicy::Rollback);
        let gid = app.create_group("Campanha A").expect("group");
        assert_eq!(app.view().selection, Selection::Group(gid.clone()));

        let t1 = app.create_task(&gid, TaskDraft::quick("Briefing")).expect("task");
        let t2 = app.create_task(&gid, TaskDraft::quick("Peças")).expect("task");
        app.cycle_task_status(&gid, &t1).expect("cycle");
        app.cycle_task_status(&gid, &t1).expect("cycle");
        assert_eq!(app.frame().stats.completion_rate, 50);
        assert_eq!(app.frame().stats.completed_group_rate, 0);

        app.cycle_task_status(&gid, &t2).expect("cycle");
        let status = app.cycle_task_status(&gid, &t2).expect("cycle");
        assert_eq!(status, Status::Completed);

        let stats = app.frame().stats;
        assert_eq!(stats.completion_rate, 100);
        assert_eq!(stats.completed_group_rate, 100);
        assert!(app.frame().sidebar[0].completed);
    }

    #[test]
    fn groups_stay_sorted_and_selection_memory_follows_renames() {
        let mut app = open(MemoryStore::default(), PersistPolicy::Rollback);
        let zeta = app.create_group("zeta").expect("group");
        app.create_group("Alpha").expect("group");
        app.create_group("beta").expect("group");

        let names: Vec<_> = app.store().groups().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["Alpha", "beta", "zeta"]);

        app.select(Selection::Group(zeta.clone())).expect("select");
        assert_eq!(app.gateway().kv().get(SELECTION_KEY), Some("2"));

        app.rename_group(&zeta, "Aardvark").expect("rename");
        assert_eq!(app.view().selection, Selection::Group(zeta));
        assert_eq!(app.gateway().kv().get(SELECTION_KEY), Some("0"));
    }

    #[test]
    fn deleting_the_selected_group_falls_back() {
        let mut app = open(MemoryStore::default(), PersistPolicy::Rollback);
        let a = app.create_group("A").expect("group");
        let b = app.create_group("B").expect("group");

        app.delete_group(&b).expect("delete");
        assert_eq!(app.view().selection, Selection::Group(a.clone()));

        app.delete_group(&a).expect("delete");
        assert_eq!(app.view().selection, Selection::None);
        assert_eq!(app.frame().title, crate::render::NO_SELECTION_TITLE);
    }

    #[test]
    fn rollback_restores_board_on_refused_write() {
        let mut app = open(MemoryStore::default(), PersistPolicy::Rollback);
        let gid = app.create_group("Blog").expect("group");
        let before = app.store().clone();

        app.gateway_mut().kv_mut().fail_writes(true);
        let err = app
            .create_task(&gid, TaskDraft::quick("Post"))
            .expect_err("write must fail");

        assert!(matches!(err, BoardError::Persistence(_)));
        assert_eq!(app.store(), &before);
        let Body::List(rows) = &app.frame().body else {
            panic!("expected list body");
        };
        assert!(rows.is_empty());
    }

    #[test]
    fn keep_policy_retains_memory_on_refused_write() {
        let mut app = open(MemoryStore::default(), PersistPolicy::Keep);
        let gid = app.create_group("Blog").expect("group");

        app.gateway_mut().kv_mut().fail_writes(true);
        let err = app
            .create_task(&gid, TaskDraft::quick("Post"))
            .expect_err("write must fail");

        assert!(matches!(err, BoardError::Persistence(_)));
        assert_eq!(app.store().total_tasks(), 1);
    }

    #[test]
    fn validation_failure_leaves_board_and_revision_alone() {
        let mut app = open(MemoryStore::default(), PersistPolicy::Rollback);
        let gid = app.create_group("Blog").expect("group");
        let revision = app.revision();

        let err = app
            .create_task(&gid, TaskDraft::quick("   "))
            .expect_err("blank name");
        assert!(matches!(err, BoardError::Validation(_)));
        assert_eq!(app.revision(), revision);
        assert_eq!(app.store().total_tasks(), 0);
    }

    #[test]
    fn reopen_restores_selection_and_layout() {
        let mut app = open(MemoryStore::default(), PersistPolicy::Rollback);
        app.create_group("A").expect("group");
        app.create_group("B").expect("group");
        app.select(Selection::All).expect("select");
        app.set_layout(Layout::Board).expect("layout");

        let kv = app.gateway().kv().clone();
        assert_eq!(kv.get(LAYOUT_KEY), Some("board"));
        assert!(kv.get(GROUPS_KEY).is_some());

        let reopened = open(kv, PersistPolicy::Rollback);
        assert_eq!(reopened.view().selection, Selection::All);
        assert_eq!(reopened.view().layout, Layout::Board);
        assert_eq!(reopened.store().groups().len(), 2);
    }

    #[test]
    fn import_replaces_board_and_clears_selection() {
        let mut app = open(MemoryStore::default(), PersistPolicy::Rollback);
        app.create_group("Old").expect("group");

        let count = app
            .replace_all(json!([{ "name": "b" }, { "name": "A", "tasks": [{ "name": "t" }] }]))
            .expect("import");
        assert_eq!(count, 2);
        assert_eq!(app.view().selection, Selection::None);
        assert_eq!(app.store().groups()[0].name, "A");

        let err = app.replace_all(json!({ "name": "x" })).expect_err("not an array");
        assert!(matches!(err, BoardError::Validation(_)));
        assert_eq!(app.store().groups().len(), 2);
    }

    #[test]
    fn selecting_a_missing_group_is_not_found() {
        let mut app = open(MemoryStore::default(), PersistPolicy::Rollback);
        let err = app
            .select(Selection::Group("ghost".to_string()))
            .expect_err("missing group");
        assert!(err.is_not_found());
    }
}
