use std::io::{self, IsTerminal, Write};

use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::{DayWindow, format_board_date};
use crate::model::{Group, GroupId, Priority, Status, Task, TaskId};
use crate::query::{self, Analytics, BoardStats, TaskRow, TrendKind};
use crate::reorder::BoardColumn;
use crate::store::{BackRef, EntityStore};
use crate::view::{Layout, Selection, TaskFilter, ViewState};

const LIST_DETAILS_MAX: usize = 60;
const BOARD_DETAILS_MAX: usize = 40;

pub const ALL_TASKS_TITLE: &str = "Todas as Tarefas";
pub const NO_SELECTION_TITLE: &str = "Selecione uma Macro Tarefa";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidebarEntry {
    pub group_id: GroupId,
    pub name: String,
    pub initials: String,
    pub progress: u32,
    pub completed: bool,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRow {
    /// 1-based position in the visible list.
    pub position: usize,
    pub task_id: TaskId,
    pub back_ref: BackRef,
    pub name: String,
    pub details: String,
    pub status: Status,
    pub priority: Priority,
    pub assignee: String,
    pub due: Option<String>,
    pub overdue: bool,
    pub group_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardCard {
    pub task_id: TaskId,
    /// Owning group at render time; drops on this card carry it.
    pub owner: GroupId,
    pub name: String,
    pub details: String,
    pub priority: Priority,
    pub assignee: String,
    pub due: Option<String>,
    pub overdue: bool,
    pub group_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardLane {
    pub column: BoardColumn,
    pub cards: Vec<BoardCard>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    List(Vec<ListRow>),
    /// Always pending, in progress, completed.
    Board([BoardLane; 3]),
}

/// Everything a redraw needs, derived from the store and the view state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub title: String,
    pub sidebar: Vec<SidebarEntry>,
    pub all_tasks_active: bool,
    pub stats: BoardStats,
    pub filter: TaskFilter,
    pub search: String,
    pub body: Body,
    pub analytics: Analytics,
}

#[tracing::instrument(skip_all, fields(layout = view.layout.as_str()))]
pub fn build_frame(store: &EntityStore, view: &ViewState, window: &DayWindow, tz: Tz) -> Frame {
    let rows = query::visible_tasks(
        store,
        &view.selection,
        view.filter,
        view.search_term(),
        window,
    );

    let body = match view.layout {
        Layout::List => Body::List(list_rows(&rows, window, tz)),
        Layout::Board => Body::Board(board_lanes(&rows, window, tz)),
    };

    Frame {
        title: title_for(store, &view.selection),
        sidebar: sidebar(store, &view.selection),
        all_tasks_active: view.selection.is_all(),
        stats: query::stats(store, &view.selection, window),
        filter: view.filter,
        search: view.search_term().to_string(),
        body,
        analytics: query::analytics(store, &view.selection, tz),
    }
}

fn title_for(store: &EntityStore, selection: &Selection) -> String {
    match selection {
        Selection::All => ALL_TASKS_TITLE.to_string(),
        Selection::Group(id) => store
            .group(id)
            .map(|g| g.name.clone())
            .unwrap_or_else(|| NO_SELECTION_TITLE.to_string()),
        Selection::None => NO_SELECTION_TITLE.to_string(),
    }
}

pub fn sidebar(store: &EntityStore, selection: &Selection) -> Vec<SidebarEntry> {
    store
        .groups()
        .iter()
        .map(|group: &Group| SidebarEntry {
            group_id: group.id.clone(),
            name: group.name.clone(),
            initials: group.initials(),
            progress: query::percent(group.completed_count(), group.tasks.len()),
            completed: group.is_fully_completed(),
            active: selection.group_id() == Some(group.id.as_str()),
        })
        .collect()
}

fn list_rows(rows: &[TaskRow<'_>], window: &DayWindow, tz: Tz) -> Vec<ListRow> {
    rows.iter()
        .enumerate()
        .map(|(idx, row)| {
            let task = row.task;
            ListRow {
                position: idx + 1,
                task_id: task.id.clone(),
                back_ref: row.back_ref.clone(),
                name: task.name.clone(),
                details: truncate(&task.details, LIST_DETAILS_MAX),
                status: task.status,
                priority: task.priority,
                assignee: task.assignee.clone(),
                due: due_label(task, tz),
                overdue: task.is_overdue(window.today_start),
                group_name: row.group_name.map(str::to_string),
            }
        })
        .collect()
}

fn board_lanes(rows: &[TaskRow<'_>], window: &DayWindow, tz: Tz) -> [BoardLane; 3] {
    BoardColumn::ALL.map(|column| BoardLane {
        column,
        cards: rows
            .iter()
            .filter(|row| row.task.status == column.status())
            .map(|row| BoardCard {
                task_id: row.task.id.clone(),
                owner: row.back_ref.group_id.clone(),
                name: row.task.name.clone(),
                details: truncate(&row.task.details, BOARD_DETAILS_MAX),
                priority: row.task.priority,
                assignee: row.task.assignee.clone(),
                due: due_label(row.task, tz),
                overdue: row.task.is_overdue(window.today_start),
                group_name: row.group_name.map(str::to_string),
            })
            .collect(),
    })
}

fn due_label(task: &Task, tz: Tz) -> Option<String> {
    task.due_date.map(|due| format_board_date(due, tz))
}

/// Cuts `text` to `max` characters and marks the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

pub fn lane_title(column: BoardColumn) -> &'static str {
    match column {
        BoardColumn::Pending => "Pendentes",
        BoardColumn::InProgress => "Em Progresso",
        BoardColumn::Completed => "Concluídas",
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let color = cfg.get_bool("color")?.unwrap_or(true);
        Ok(Self { color })
    }

    pub fn plain() -> Self {
        Self { color: false }
    }

    pub fn print_frame(&self, frame: &Frame) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_frame(&mut out, frame)
    }

    #[tracing::instrument(skip_all)]
    pub fn write_frame<W: Write>(&self, out: &mut W, frame: &Frame) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&frame.title, "1"))?;
        self.write_stats(out, &frame.stats)?;
        if frame.filter != TaskFilter::All || !frame.search.is_empty() {
            writeln!(out, "filter: {}  search: {:?}", frame.filter, frame.search)?;
        }
        writeln!(out)?;

        match &frame.body {
            Body::List(rows) => self.write_list(out, rows),
            Body::Board(lanes) => self.write_board(out, lanes),
        }
    }

    pub fn write_stats<W: Write>(&self, out: &mut W, stats: &BoardStats) -> anyhow::Result<()> {
        writeln!(
            out,
            "Macros: {} ({}% concluídas)  Tarefas: {}  Concluídas: {}  Pendentes: {}  Em Progresso: {}  Atrasadas: {}  Progresso: {}%",
            stats.group_count,
            stats.completed_group_rate,
            stats.total,
            stats.completed,
            stats.pending,
            stats.in_progress,
            self.paint(&stats.overdue.to_string(), if stats.overdue > 0 { "31" } else { "0" }),
            stats.completion_rate,
        )?;
        Ok(())
    }

    fn write_list<W: Write>(&self, out: &mut W, rows: &[ListRow]) -> anyhow::Result<()> {
        if rows.is_empty() {
            writeln!(out, "(nenhuma tarefa)")?;
            return Ok(());
        }

        let aggregated = rows.iter().any(|row| row.group_name.is_some());
        let mut headers = vec!["#".to_string()];
        if aggregated {
            headers.push("Macro".to_string());
        }
        headers.extend(
            ["Tarefa", "Status", "Prioridade", "Prazo", "Responsável", "Detalhes"]
                .map(str::to_string),
        );

        let table = rows
            .iter()
            .map(|row| {
                let mut cells = vec![self.paint(&row.position.to_string(), "33")];
                if aggregated {
                    cells.push(row.group_name.clone().unwrap_or_default());
                }
                cells.push(self.paint_name(&row.name, row.status));
                cells.push(row.status.label().to_string());
                cells.push(self.paint_priority(row.priority));
                cells.push(self.paint_due(row.due.as_deref(), row.overdue));
                cells.push(row.assignee.clone());
                cells.push(row.details.clone());
                cells
            })
            .collect();

        write_table(out, headers, table)
    }

    fn write_board<W: Write>(&self, out: &mut W, lanes: &[BoardLane; 3]) -> anyhow::Result<()> {
        for lane in lanes {
            writeln!(
                out,
                "{} ({})",
                self.paint(lane_title(lane.column), "1"),
                lane.cards.len()
            )?;
            if lane.cards.is_empty() {
                writeln!(out)?;
                continue;
            }

            let headers = ["Tarefa", "Prioridade", "Prazo", "Responsável", "Detalhes"]
                .map(str::to_string)
                .to_vec();
            let rows = lane
                .cards
                .iter()
                .map(|card| {
                    let name = match &card.group_name {
                        Some(group) => format!("{} [{group}]", card.name),
                        None => card.name.clone(),
                    };
                    vec![
                        name,
                        self.paint_priority(card.priority),
                        self.paint_due(card.due.as_deref(), card.overdue),
                        card.assignee.clone(),
                        card.details.clone(),
                    ]
                })
                .collect();
            write_table(&mut *out, headers, rows)?;
            writeln!(out)?;
        }
        Ok(())
    }

    pub fn print_sidebar(&self, entries: &[SidebarEntry], all_active: bool) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_sidebar(&mut out, entries, all_active)
    }

    pub fn write_sidebar<W: Write>(
        &self,
        out: &mut W,
        entries: &[SidebarEntry],
        all_active: bool,
    ) -> anyhow::Result<()> {
        let marker = |active: bool| if active { "*" } else { " " };
        let headers = ["", "#", "Macro", "Sigla", "Progresso"]
            .map(str::to_string)
            .to_vec();

        let mut rows = vec![vec![
            marker(all_active).to_string(),
            "0".to_string(),
            ALL_TASKS_TITLE.to_string(),
            String::new(),
            String::new(),
        ]];
        for (idx, entry) in entries.iter().enumerate() {
            let progress = format!("{}%", entry.progress);
            rows.push(vec![
                marker(entry.active).to_string(),
                self.paint(&(idx + 1).to_string(), "33"),
                entry.name.clone(),
                entry.initials.clone(),
                if entry.completed {
                    self.paint(&progress, "32")
                } else {
                    progress
                },
            ]);
        }

        write_table(out, headers, rows)
    }

    pub fn print_analytics(&self, analytics: &Analytics) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        self.write_analytics(&mut out, analytics)
    }

    pub fn write_analytics<W: Write>(&self, out: &mut W, analytics: &Analytics) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint("Progresso", "1"))?;
        writeln!(out, "  Concluídas  {}", analytics.completed)?;
        writeln!(out, "  Pendentes   {}", analytics.remaining)?;

        writeln!(out, "{}", self.paint("Tarefas por Prioridade", "1"))?;
        for (priority, count) in analytics.by_priority {
            writeln!(out, "  {:<11} {count}", priority.label())?;
        }

        writeln!(out, "{}", self.paint("Tarefas por Status", "1"))?;
        for (status, count) in analytics.by_status {
            writeln!(out, "  {:<12} {count}", status.label())?;
        }

        let trend_title = match analytics.trend_kind {
            TrendKind::Weekly => "Taxa de Conclusão por Semana (%)",
            TrendKind::PerGroup => "Taxa de Conclusão por Macro (%)",
        };
        writeln!(out, "{}", self.paint(trend_title, "1"))?;
        let rows = analytics
            .trend
            .iter()
            .map(|point| vec![point.label.clone(), format!("{}%", point.rate)])
            .collect();
        write_table(out, vec!["Série".to_string(), "Taxa".to_string()], rows)
    }

    #[tracing::instrument(skip(self, group, task))]
    pub fn print_task_info(&self, group: &Group, task: &Task, tz: Tz) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let stamp = |dt: chrono::DateTime<chrono::Utc>| {
            dt.with_timezone(&tz).format("%d/%m/%Y %H:%M").to_string()
        };

        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "macro       {}", group.name)?;
        writeln!(out, "tarefa      {}", task.name)?;
        writeln!(out, "status      {}", task.status.label())?;
        writeln!(out, "prioridade  {}", task.priority.label())?;
        writeln!(out, "responsável {}", task.assignee)?;
        if let Some(due) = task.due_date {
            writeln!(out, "prazo       {}", format_board_date(due, tz))?;
        }
        writeln!(out, "criada      {}", stamp(task.created_at))?;
        if let Some(done) = task.completed_at {
            writeln!(out, "concluída   {}", stamp(done))?;
        }
        if !task.details.is_empty() {
            writeln!(out, "detalhes    {}", task.details)?;
        }
        Ok(())
    }

    fn paint_name(&self, name: &str, status: Status) -> String {
        match status {
            Status::Completed => self.paint(name, "9"),
            _ => name.to_string(),
        }
    }

    fn paint_priority(&self, priority: Priority) -> String {
        let code = match priority {
            Priority::High => "31",
            Priority::Medium => "33",
            Priority::Low => "32",
        };
        self.paint(priority.label(), code)
    }

    fn paint_due(&self, due: Option<&str>, overdue: bool) -> String {
        let due = due.unwrap_or_default();
        if overdue {
            self.paint(due, "31")
        } else {
            due.to_string()
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn write_table<W: Write>(
    mut writer: W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (header, width) in headers.iter().zip(&widths) {
        let padding = width.saturating_sub(UnicodeWidthStr::width(header.as_str()));
        write!(writer, "{}{} ", header, " ".repeat(padding))?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (cell, width) in row.iter().zip(&widths) {
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = width.saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{Body, Renderer, build_frame, strip_ansi, truncate, write_table};
    use crate::datetime::DayWindow;
    use crate::model::{Status, TaskDraft};
    use crate::reorder::BoardColumn;
    use crate::store::EntityStore;
    use crate::view::{Layout, Selection, ViewState};

    const TZ: chrono_tz::Tz = chrono_tz::America::Sao_Paulo;

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 15, 0, 0)
            .single()
            .expect("valid now")
    }

    fn store() -> EntityStore {
        let mut store = EntityStore::default();
        store.create_group("Lançamento", now()).expect("group");
        let gid = store.groups()[0].id.clone();
        store
            .create_task(
                &gid,
                TaskDraft {
                    name: "Roteiro".to_string(),
                    details: "x".repeat(70),
                    due_date: Some(now() - Duration::days(2)),
                    ..TaskDraft::default()
                },
                now(),
            )
            .expect("task");
        store
            .create_task(
                &gid,
                TaskDraft {
                    name: "Edição".to_string(),
                    status: Some(Status::Completed),
                    ..TaskDraft::default()
                },
                now(),
            )
            .expect("task");
        store
    }

    #[test]
    fn truncates_on_characters_with_ellipsis() {
        assert_eq!(truncate("curto", 40), "curto");
        assert_eq!(truncate("ação ação", 4), "ação...");
    }

    #[test]
    fn list_frame_formats_rows() {
        let store = store();
        let view = ViewState {
            selection: Selection::Group(store.groups()[0].id.clone()),
            ..ViewState::default()
        };
        let frame = build_frame(&store, &view, &DayWindow::at(now(), TZ), TZ);

        assert_eq!(frame.title, "Lançamento");
        assert!(frame.sidebar[0].active);
        assert_eq!(frame.sidebar[0].progress, 50);
        assert_eq!(frame.sidebar[0].initials, "L");

        let Body::List(rows) = &frame.body else {
            panic!("expected list body");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].details.chars().count(), 63);
        assert_eq!(rows[0].due.as_deref(), Some("13/06/2026"));
        assert!(rows[0].overdue);
        assert!(!rows[1].overdue);
        assert_eq!(rows[0].group_name, None);
    }

    #[test]
    fn board_frame_always_has_three_lanes() {
        let store = store();
        let view = ViewState {
            selection: Selection::All,
            layout: Layout::Board,
            ..ViewState::default()
        };
        let frame = build_frame(&store, &view, &DayWindow::at(now(), TZ), TZ);

        let Body::Board(lanes) = &frame.body else {
            panic!("expected board body");
        };
        assert_eq!(lanes[0].column, BoardColumn::Pending);
        assert_eq!(lanes[1].cards.len(), 0);
        assert_eq!(lanes[2].cards.len(), 1);
        assert_eq!(lanes[0].cards[0].details.chars().count(), 43);
        assert_eq!(lanes[0].cards[0].owner, store.groups()[0].id);
        assert_eq!(lanes[0].cards[0].group_name.as_deref(), Some("Lançamento"));
    }

    #[test]
    fn table_widths_ignore_ansi_codes() {
        let mut out = Vec::new();
        write_table(
            &mut out,
            vec!["A".to_string(), "B".to_string()],
            vec![vec!["\x1b[31mlonger\x1b[0m".to_string(), "b".to_string()]],
        )
        .expect("write table");

        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<_> = text.lines().map(strip_ansi).collect();
        assert_eq!(lines[0], "A      B ");
        assert_eq!(lines[2], "longer b ");
    }

    #[test]
    fn plain_renderer_writes_frame_text() {
        let store = store();
        let view = ViewState {
            selection: Selection::All,
            ..ViewState::default()
        };
        let frame = build_frame(&store, &view, &DayWindow::at(now(), TZ), TZ);

        let mut out = Vec::new();
        Renderer::plain().write_frame(&mut out, &frame).expect("render");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("Todas as Tarefas"));
        assert!(text.contains("Roteiro"));
        assert!(text.contains("Macro"));
    }
}
