use std::fs;
use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::app::App;
use crate::cli::{Command, GroupCommand, TaskFields, TaskForm, ViewArgs};
use crate::datetime::{Clock, local_date, parse_due_input};
use crate::dialog::{ConfirmAction, DialogController, DialogOutcome, DialogRequest, PromptAction};
use crate::error::BoardError;
use crate::model::{GroupId, TaskDraft, TaskPatch};
use crate::query::visible_tasks;
use crate::render::Renderer;
use crate::reorder::{DragEvent, DropOutcome, apply_drag};
use crate::storage::{KeyValueStore, export_file_name, export_json};
use crate::store::{BackRef, ResetScope};
use crate::view::{Layout, Selection};

#[instrument(skip(app, renderer, command))]
pub fn dispatch<S, C>(
    app: &mut App<S, C>,
    renderer: &Renderer,
    command: Command,
    yes: bool,
) -> anyhow::Result<()>
where
    S: KeyValueStore,
    C: Clock,
{
    debug!(?command, "dispatching command");
    let mut dialogs = DialogController::default();

    match command {
        Command::Groups => cmd_groups(app, renderer),
        Command::Group { action } => cmd_group(app, &mut dialogs, action, yes),
        Command::Select { target } => cmd_select(app, renderer, &target),
        Command::Add { group, name } => cmd_add(app, group.as_deref(), &name.join(" ")),
        Command::New(form) => cmd_new(app, form),
        Command::Edit { task, fields, view } => {
            apply_view_args(app, &view);
            cmd_edit(app, &task, fields)
        }
        Command::Cycle { task, view } => {
            apply_view_args(app, &view);
            cmd_cycle(app, &task)
        }
        Command::Move {
            task,
            position,
            view,
        } => cmd_move(app, &task, position, view),
        Command::Drop { task, column, view } => {
            apply_view_args(app, &view);
            cmd_drop(app, &task, &column)
        }
        Command::Delete { task, view } => {
            apply_view_args(app, &view);
            cmd_delete(app, &mut dialogs, &task, yes)
        }
        Command::Show { task, view } => {
            apply_view_args(app, &view);
            cmd_show(app, renderer, &task)
        }
        Command::List(view) => cmd_view(app, renderer, Layout::List, view),
        Command::Board(view) => cmd_view(app, renderer, Layout::Board, view),
        Command::Stats => {
            let mut out = io::stdout().lock();
            renderer.write_stats(&mut out, &app.frame().stats)
        }
        Command::Analytics => renderer.print_analytics(&app.frame().analytics),
        Command::Reset { all } => cmd_reset(app, &mut dialogs, all, yes),
        Command::Import { file } => cmd_import(app, &mut dialogs, file, yes),
        Command::Export { output, stdout } => cmd_export(app, output, stdout),
    }
}

fn cmd_groups<S: KeyValueStore, C: Clock>(
    app: &App<S, C>,
    renderer: &Renderer,
) -> anyhow::Result<()> {
    let frame = app.frame();
    renderer.print_sidebar(&frame.sidebar, frame.all_tasks_active)
}

#[instrument(skip(app, dialogs, action))]
fn cmd_group<S: KeyValueStore, C: Clock>(
    app: &mut App<S, C>,
    dialogs: &mut DialogController,
    action: GroupCommand,
    yes: bool,
) -> anyhow::Result<()> {
    match action {
        GroupCommand::Add { name } => {
            let id = app.create_group(&name.join(" "))?;
            let position = app.store().position_of(&id).unwrap_or_default();
            println!("Created group {} ({id}).", position + 1);
        }
        GroupCommand::Rename { group, name } => {
            let id = resolve_group(app, &group)?;
            let current = app
                .store()
                .group(&id)
                .map(|g| g.name.clone())
                .unwrap_or_default();
            dialogs.request(DialogRequest::Prompt {
                message: "Novo nome da macro".to_string(),
                initial: current,
                action: PromptAction::RenameGroup(id),
            });

            let outcome = if name.is_empty() {
                settle(app, dialogs, yes)?
            } else {
                dialogs.submit(app, &name.join(" "))?
            };
            report(outcome);
        }
        GroupCommand::Delete { group } => {
            let id = resolve_group(app, &group)?;
            let name = app
                .store()
                .group(&id)
                .map(|g| g.name.clone())
                .unwrap_or_default();
            dialogs.request(DialogRequest::Confirm {
                message: format!(
                    "Tem certeza que deseja excluir a macro \"{name}\" e todas as suas tarefas?"
                ),
                action: ConfirmAction::DeleteGroup(id),
            });
            report(settle(app, dialogs, yes)?);
        }
    }
    Ok(())
}

fn cmd_select<S: KeyValueStore, C: Clock>(
    app: &mut App<S, C>,
    renderer: &Renderer,
    target: &str,
) -> anyhow::Result<()> {
    let selection = match target.trim().to_lowercase().as_str() {
        "all" | "todas" => Selection::All,
        "none" => Selection::None,
        _ => Selection::Group(resolve_group(app, target)?),
    };
    app.select(selection)?;
    renderer.print_frame(app.frame())
}

#[instrument(skip(app))]
fn cmd_add<S: KeyValueStore, C: Clock>(
    app: &mut App<S, C>,
    group: Option<&str>,
    name: &str,
) -> anyhow::Result<()> {
    let group_id = target_group(app, group)?;
    let id = app.create_task(&group_id, TaskDraft::quick(name))?;
    println!("Created task {id}.");
    Ok(())
}

#[instrument(skip(app, form))]
fn cmd_new<S: KeyValueStore, C: Clock>(app: &mut App<S, C>, form: TaskForm) -> anyhow::Result<()> {
    let group_id = target_group(app, form.group.as_deref())?;
    let due_date = form
        .due
        .as_deref()
        .map(|raw| parse_due_input(raw, app.now(), app.tz()))
        .transpose()?;

    let draft = TaskDraft {
        name: form.name.join(" "),
        details: form.details.unwrap_or_default(),
        status: form.status,
        priority: form.priority,
        assignee: form.assignee.unwrap_or_default(),
        due_date,
    };
    let id = app.create_task(&group_id, draft)?;
    println!("Created task {id}.");
    Ok(())
}

#[instrument(skip(app, fields))]
fn cmd_edit<S: KeyValueStore, C: Clock>(
    app: &mut App<S, C>,
    task: &str,
    fields: TaskFields,
) -> anyhow::Result<()> {
    let back_ref = resolve_task(app, task, None)?;
    let due_date = if fields.clear_due {
        Some(None)
    } else {
        fields
            .due
            .as_deref()
            .map(|raw| parse_due_input(raw, app.now(), app.tz()).map(Some))
            .transpose()?
    };

    let patch = TaskPatch {
        name: fields.name,
        details: fields.details,
        assignee: fields.assignee,
        due_date,
        priority: fields.priority,
        status: fields.status,
    };
    let task_id = task_id_at(app, &back_ref)?;
    app.update_task(&back_ref.group_id, &task_id, patch)?;
    println!("Updated task {task_id}.");
    Ok(())
}

fn cmd_cycle<S: KeyValueStore, C: Clock>(app: &mut App<S, C>, task: &str) -> anyhow::Result<()> {
    let back_ref = resolve_task(app, task, None)?;
    let task_id = task_id_at(app, &back_ref)?;
    let status = app.cycle_task_status(&back_ref.group_id, &task_id)?;
    println!("Task {task_id} is now {}.", status.label());
    Ok(())
}

#[instrument(skip(app, view))]
fn cmd_move<S: KeyValueStore, C: Clock>(
    app: &mut App<S, C>,
    task: &str,
    position: usize,
    view: ViewArgs,
) -> anyhow::Result<()> {
    apply_view_args(app, &view);
    let back_ref = resolve_task(app, task, None)?;
    let task_id = task_id_at(app, &back_ref)?;

    let outcome = apply_drag(
        app,
        DragEvent::Reorder {
            task_id,
            new_index: position.saturating_sub(1),
        },
    )?;
    report_drop(outcome);
    Ok(())
}

fn cmd_drop<S: KeyValueStore, C: Clock>(
    app: &mut App<S, C>,
    task: &str,
    column: &str,
) -> anyhow::Result<()> {
    let back_ref = resolve_task(app, task, None)?;
    let task_id = task_id_at(app, &back_ref)?;

    let outcome = apply_drag(
        app,
        DragEvent::ColumnDrop {
            task_id,
            column: column.to_string(),
            owner: Some(back_ref.group_id),
        },
    )?;
    report_drop(outcome);
    Ok(())
}

fn cmd_delete<S: KeyValueStore, C: Clock>(
    app: &mut App<S, C>,
    dialogs: &mut DialogController,
    task: &str,
    yes: bool,
) -> anyhow::Result<()> {
    let back_ref = resolve_task(app, task, None)?;
    dialogs.request(delete_task_request(app, back_ref)?);
    report(settle(app, dialogs, yes)?);
    Ok(())
}

/// Names the task so a wrong position is visible before confirming.
fn delete_task_request<S: KeyValueStore, C: Clock>(
    app: &App<S, C>,
    back_ref: BackRef,
) -> anyhow::Result<DialogRequest> {
    let task_id = task_id_at(app, &back_ref)?;
    let name = app
        .store()
        .task(&back_ref.group_id, &task_id)
        .map(|t| t.name.clone())
        .unwrap_or_default();
    Ok(DialogRequest::Confirm {
        message: format!("Tem certeza que deseja excluir a tarefa \"{name}\"?"),
        action: ConfirmAction::DeleteTask {
            group_id: back_ref.group_id,
            task_id,
        },
    })
}

fn cmd_show<S: KeyValueStore, C: Clock>(
    app: &App<S, C>,
    renderer: &Renderer,
    task: &str,
) -> anyhow::Result<()> {
    let back_ref = resolve_task(app, task, None)?;
    let group = app
        .store()
        .group(&back_ref.group_id)
        .ok_or_else(|| BoardError::group_not_found(back_ref.group_id.as_str()))?;
    let task = group
        .tasks
        .get(back_ref.index)
        .ok_or_else(|| BoardError::task_not_found(task))?;
    renderer.print_task_info(group, task, app.tz())
}

fn cmd_view<S: KeyValueStore, C: Clock>(
    app: &mut App<S, C>,
    renderer: &Renderer,
    layout: Layout,
    view: ViewArgs,
) -> anyhow::Result<()> {
    if app.view().layout != layout {
        app.set_layout(layout)?;
    }
    apply_view_args(app, &view);
    renderer.print_frame(app.frame())
}

fn cmd_reset<S: KeyValueStore, C: Clock>(
    app: &mut App<S, C>,
    dialogs: &mut DialogController,
    all: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let scope = match (all, &app.view().selection) {
        (true, _) | (false, Selection::All) => ResetScope::AllGroups,
        (false, Selection::Group(id)) => ResetScope::Group(id.clone()),
        (false, Selection::None) => {
            return Err(anyhow!("select a group first or pass --all"));
        }
    };

    dialogs.request(DialogRequest::Confirm {
        message: "Todas as tarefas concluídas voltarão a pendentes. Deseja continuar?".to_string(),
        action: ConfirmAction::ResetCompleted(scope),
    });
    report(settle(app, dialogs, yes)?);
    Ok(())
}

#[instrument(skip(app, dialogs))]
fn cmd_import<S: KeyValueStore, C: Clock>(
    app: &mut App<S, C>,
    dialogs: &mut DialogController,
    file: Option<PathBuf>,
    yes: bool,
) -> anyhow::Result<()> {
    info!("command import");

    let raw = match &file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?,
        None => {
            let mut stdin = String::new();
            io::stdin()
                .read_to_string(&mut stdin)
                .context("failed reading stdin")?;
            stdin
        }
    };

    let payload: Value = serde_json::from_str(raw.trim())
        .map_err(|err| BoardError::validation(format!("invalid import JSON: {err}")))?;
    if !payload.is_array() {
        return Err(BoardError::validation("import must be a JSON array of groups").into());
    }

    dialogs.request(DialogRequest::Confirm {
        message: "Esta ação irá substituir todos os dados atuais. Deseja continuar?".to_string(),
        action: ConfirmAction::ReplaceAll(payload),
    });
    report(settle(app, dialogs, yes)?);
    Ok(())
}

#[instrument(skip(app))]
fn cmd_export<S: KeyValueStore, C: Clock>(
    app: &App<S, C>,
    output: Option<PathBuf>,
    stdout: bool,
) -> anyhow::Result<()> {
    let json = export_json(app.store().groups())?;
    if stdout {
        println!("{json}");
        return Ok(());
    }

    let path = output.unwrap_or_else(|| {
        PathBuf::from(export_file_name(local_date(app.now(), app.tz())))
    });
    fs::write(&path, format!("{json}\n"))
        .with_context(|| format!("failed writing {}", path.display()))?;
    info!(file = %path.display(), groups = app.store().groups().len(), "exported board");
    println!("Exported {} groups to {}.", app.store().groups().len(), path.display());
    Ok(())
}

fn apply_view_args<S: KeyValueStore, C: Clock>(app: &mut App<S, C>, view: &ViewArgs) {
    if let Some(filter) = view.filter {
        app.set_filter(filter);
    }
    if let Some(search) = &view.search {
        app.set_search(search);
    }
}

/// Presents the pending dialog on the terminal, or accepts it outright with
/// `--yes`.
fn settle<S: KeyValueStore, C: Clock>(
    app: &mut App<S, C>,
    dialogs: &mut DialogController,
    yes: bool,
) -> anyhow::Result<DialogOutcome> {
    let Some(request) = dialogs.pending().cloned() else {
        return Ok(DialogOutcome::Cancelled);
    };

    match request {
        DialogRequest::Confirm { message, .. } => {
            if yes || ask_confirmation(&message)? {
                Ok(dialogs.confirm(app)?)
            } else {
                Ok(dialogs.cancel())
            }
        }
        DialogRequest::Prompt {
            message, initial, ..
        } => match ask_value(&message, &initial)? {
            Some(value) => Ok(dialogs.submit(app, &value)?),
            None => Ok(dialogs.cancel()),
        },
    }
}

fn ask_confirmation(message: &str) -> anyhow::Result<bool> {
    if !io::stdin().is_terminal() {
        return Err(anyhow!("{message} (re-run with --yes to confirm)"));
    }

    let mut out = io::stdout().lock();
    write!(out, "{message} [s/N] ")?;
    out.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_lowercase().as_str(),
        "s" | "sim" | "y" | "yes"
    ))
}

fn ask_value(message: &str, initial: &str) -> anyhow::Result<Option<String>> {
    if !io::stdin().is_terminal() {
        return Err(anyhow!("{message}: pass the value as an argument"));
    }

    let mut out = io::stdout().lock();
    write!(out, "{message} [{initial}]: ")?;
    out.flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim();
    Ok(if answer.is_empty() {
        None
    } else {
        Some(answer.to_string())
    })
}

fn report(outcome: DialogOutcome) {
    match outcome {
        DialogOutcome::Cancelled => println!("Cancelled."),
        DialogOutcome::GroupDeleted(name) => println!("Deleted group \"{name}\"."),
        DialogOutcome::TaskDeleted(name) => println!("Deleted task \"{name}\"."),
        DialogOutcome::Replaced(count) => println!("Imported {count} groups."),
        DialogOutcome::Reset(count) => println!("Reset {count} completed tasks."),
        DialogOutcome::Renamed(position) => println!("Renamed group {}.", position + 1),
    }
}

fn report_drop(outcome: DropOutcome) {
    match outcome {
        DropOutcome::Applied => println!("Moved."),
        DropOutcome::Ignored(reason) => println!("Nothing moved: {reason}."),
    }
}

/// Group for new tasks: the explicit reference, else the selected group.
fn target_group<S: KeyValueStore, C: Clock>(
    app: &App<S, C>,
    reference: Option<&str>,
) -> anyhow::Result<GroupId> {
    match reference {
        Some(reference) => resolve_group(app, reference),
        None => app
            .view()
            .selection
            .group_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("select a group first or pass --group")),
    }
}

/// Accepts an id, a case-insensitive name, a 1-based sidebar position or a
/// unique id prefix, tried in that order. A name made of digits wins over
/// the position with the same number.
pub fn resolve_group<S: KeyValueStore, C: Clock>(
    app: &App<S, C>,
    reference: &str,
) -> anyhow::Result<GroupId> {
    let reference = reference.trim();
    let groups = app.store().groups();

    if let Some(group) = app.store().group(reference) {
        return Ok(group.id.clone());
    }

    let by_name: Vec<_> = groups
        .iter()
        .filter(|g| g.name.to_lowercase() == reference.to_lowercase())
        .collect();
    match by_name.as_slice() {
        [group] => return Ok(group.id.clone()),
        [] => {}
        _ => return Err(anyhow!("group reference is ambiguous: {reference}")),
    }

    if let Ok(position) = reference.parse::<usize>() {
        return position
            .checked_sub(1)
            .and_then(|idx| groups.get(idx))
            .map(|g| g.id.clone())
            .ok_or_else(|| anyhow!("no group at position {position}"));
    }

    let by_prefix: Vec<_> = groups.iter().filter(|g| g.id.starts_with(reference)).collect();
    match by_prefix.as_slice() {
        [group] => Ok(group.id.clone()),
        [] => Err(BoardError::group_not_found(reference).into()),
        _ => Err(anyhow!("group reference is ambiguous: {reference}")),
    }
}

/// Accepts a 1-based position in the current list, a task id or unique id
/// prefix, or a case-insensitive name within the current list.
pub fn resolve_task<S: KeyValueStore, C: Clock>(
    app: &App<S, C>,
    reference: &str,
    selection: Option<&Selection>,
) -> anyhow::Result<BackRef> {
    let reference = reference.trim();
    let view = app.view();
    let selection = selection.unwrap_or(&view.selection);
    let window = app.day_window();
    let rows = visible_tasks(
        app.store(),
        selection,
        view.filter,
        view.search_term(),
        &window,
    );

    if let Ok(position) = reference.parse::<usize>() {
        return position
            .checked_sub(1)
            .and_then(|idx| rows.get(idx))
            .map(|row| row.back_ref.clone())
            .ok_or_else(|| anyhow!("no task at position {position} of the current list"));
    }

    if let Some(back_ref) = app.store().locate_task(reference) {
        return Ok(back_ref);
    }

    let by_name: Vec<_> = rows
        .iter()
        .filter(|row| row.task.name.to_lowercase() == reference.to_lowercase())
        .collect();
    if let [row] = by_name.as_slice() {
        return Ok(row.back_ref.clone());
    }

    let by_prefix: Vec<BackRef> = app
        .store()
        .groups()
        .iter()
        .flat_map(|g| {
            g.tasks.iter().enumerate().filter_map(|(index, t)| {
                t.id.starts_with(reference).then(|| BackRef {
                    group_id: g.id.clone(),
                    index,
                })
            })
        })
        .collect();
    match by_prefix.as_slice() {
        [back_ref] => Ok(back_ref.clone()),
        [] if by_name.is_empty() => {
            warn!(reference, "task reference matched nothing");
            Err(BoardError::task_not_found(reference).into())
        }
        _ => Err(anyhow!("task reference is ambiguous: {reference}")),
    }
}

fn task_id_at<S: KeyValueStore, C: Clock>(
    app: &App<S, C>,
    back_ref: &BackRef,
) -> anyhow::Result<String> {
    app.store()
        .group(&back_ref.group_id)
        .and_then(|g| g.tasks.get(back_ref.index))
        .map(|t| t.id.clone())
        .ok_or_else(|| {
            BoardError::task_not_found(format!("{}#{}", back_ref.group_id, back_ref.index)).into()
        })
}
