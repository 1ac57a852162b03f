use chrono::{DateTime, TimeZone, Utc};
use macroboard_core::app::{App, AppSettings};
use macroboard_core::datetime::FixedClock;
use macroboard_core::error::BoardError;
use macroboard_core::model::{Status, TaskDraft};
use macroboard_core::render::Body;
use macroboard_core::storage::{FileStore, GROUPS_KEY, KeyValueStore, export_json};
use macroboard_core::view::{Layout, Selection};
use serde_json::json;
use tempfile::tempdir;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 15, 0, 0)
        .single()
        .expect("valid now")
}

fn open(dir: &std::path::Path) -> App<FileStore, FixedClock> {
    open_at(dir, now())
}

fn open_at(dir: &std::path::Path, at: DateTime<Utc>) -> App<FileStore, FixedClock> {
    let kv = FileStore::open(dir).expect("open store");
    App::open(kv, FixedClock::new(at), AppSettings::default())
}

#[test]
fn groups_sort_by_name_and_survive_reopen() {
    let temp = tempdir().expect("tempdir");
    let mut app = open(temp.path());

    for name in ["zeta", "Alfa", "beta"] {
        app.create_group(name).expect("create group");
    }
    let names: Vec<_> = app.store().groups().iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, ["Alfa", "beta", "zeta"]);

    let beta = app.store().groups()[1].id.clone();
    app.select(Selection::Group(beta.clone())).expect("select");
    app.set_layout(Layout::Board).expect("layout");
    drop(app);

    let reopened = open(temp.path());
    assert_eq!(reopened.store().groups().len(), 3);
    assert_eq!(reopened.view().selection, Selection::Group(beta));
    assert_eq!(reopened.view().layout, Layout::Board);
    assert!(matches!(reopened.frame().body, Body::Board(_)));
}

#[test]
fn completing_every_task_completes_the_group() {
    let temp = tempdir().expect("tempdir");
    let mut app = open(temp.path());
    let campanha = app.create_group("Campanha A").expect("group");

    let ids: Vec<_> = ["Briefing", "Arte", "Publicar"]
        .into_iter()
        .map(|name| app.create_task(&campanha, TaskDraft::quick(name)).expect("task"))
        .collect();

    for id in &ids {
        app.cycle_task_status(&campanha, id).expect("to in progress");
        let status = app.cycle_task_status(&campanha, id).expect("to completed");
        assert_eq!(status, Status::Completed);
    }

    let stats = app.frame().stats;
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.completion_rate, 100);
    assert_eq!(stats.completed_groups, 1);
    assert_eq!(stats.completed_group_rate, 100);
    assert!(
        app.store().groups()[0]
            .tasks
            .iter()
            .all(|t| t.completed_at == Some(now()))
    );
}

#[test]
fn import_replaces_board_and_clears_selection() {
    let temp = tempdir().expect("tempdir");
    let mut app = open(temp.path());
    let old = app.create_group("Antigo").expect("group");
    app.select(Selection::Group(old)).expect("select");

    let payload = json!([
        {
            "name": "Vídeos",
            "tasks": [
                { "name": "Roteiro", "status": "completed" },
                { "name": "Gravar", "priority": "high" },
                { "name": "Editar", "status": "in-progress" }
            ]
        },
        {
            "name": "Blog",
            "tasks": [
                { "name": "Rascunho" },
                { "name": "Revisar", "dueDate": "2026-03-01T03:00:00Z" }
            ]
        }
    ]);

    assert_eq!(app.replace_all(payload).expect("import"), 2);
    assert_eq!(app.view().selection, Selection::None);
    assert_eq!(app.store().total_tasks(), 5);
    assert_eq!(app.store().groups()[0].name, "Blog");
    assert_eq!(app.frame().stats.overdue, 1);

    let stored = app
        .gateway()
        .kv()
        .load(GROUPS_KEY)
        .expect("load")
        .expect("groups saved");
    assert!(stored.contains("Roteiro"));
}

#[test]
fn invalid_import_leaves_board_untouched() {
    let temp = tempdir().expect("tempdir");
    let mut app = open(temp.path());
    app.create_group("Mantida").expect("group");
    let before = app.store().clone();
    let revision = app.revision();

    let err = app
        .replace_all(json!({ "name": "not a list" }))
        .expect_err("object payload");
    assert!(matches!(err, BoardError::Validation(_)));

    let err = app
        .replace_all(json!([{ "name": "Boa" }, { "tasks": [] }]))
        .expect_err("nameless group");
    assert!(matches!(err, BoardError::Validation(_)));

    assert_eq!(app.store(), &before);
    assert_eq!(app.revision(), revision);
}

#[test]
fn export_then_import_restores_the_same_board() {
    let temp = tempdir().expect("tempdir");
    let mut app = open(temp.path());
    let gid = app.create_group("Lançamento").expect("group");
    let tid = app.create_task(&gid, TaskDraft::quick("Landing page")).expect("task");
    app.cycle_task_status(&gid, &tid).expect("cycle");
    app.create_task(&gid, TaskDraft::quick("Anúncio")).expect("task");

    let exported = export_json(app.store().groups()).expect("export");
    let payload = serde_json::from_str(&exported).expect("valid json");

    let other = tempdir().expect("tempdir");
    let mut restored = open(other.path());
    restored.replace_all(payload).expect("import");

    assert_eq!(restored.store(), app.store());
}

#[test]
fn back_filled_fields_stay_stable_across_runs() {
    let temp = tempdir().expect("tempdir");
    let mut kv = FileStore::open(temp.path()).expect("open store");
    kv.store(GROUPS_KEY, r#"[{"id":"g","name":"G","tasks":[{"name":"t"}]}]"#)
        .expect("seed legacy blob");

    let first = open_at(temp.path(), now());
    let task = first.store().groups()[0].tasks[0].clone();
    assert_eq!(task.created_at, now());
    drop(first);

    let later = now() + chrono::Duration::days(60);
    let second = open_at(temp.path(), later);
    let reloaded = &second.store().groups()[0].tasks[0];
    assert_eq!(reloaded.id, task.id);
    assert_eq!(reloaded.created_at, task.created_at);
    assert!(second.store().locate_task(&task.id).is_some());
}
