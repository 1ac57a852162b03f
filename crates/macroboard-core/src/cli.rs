use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::model::{Priority, Status};
use crate::view::TaskFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "macroboard",
    version,
    about = "Macroboard: a local board of task groups",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "boardrc", global = true)]
    pub boardrc: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    /// Answer yes to every confirmation.
    #[arg(short = 'y', long = "yes", global = true)]
    pub yes: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List groups with their progress.
    Groups,
    /// Create, rename or delete a group.
    Group {
        #[command(subcommand)]
        action: GroupCommand,
    },
    /// Select a group by id, name or position; `all` or `none` also work.
    Select { target: String },
    /// Quick-add a task to the selected group.
    Add {
        #[arg(short = 'g', long = "group")]
        group: Option<String>,
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },
    /// Add a task with every field of the task form.
    New(TaskForm),
    /// Change fields of a task.
    Edit {
        task: String,
        #[command(flatten)]
        fields: TaskFields,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Advance a task to its next status.
    Cycle {
        task: String,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Move a task to a 1-based position of the current list.
    Move {
        task: String,
        position: usize,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Drop a task on a board column.
    Drop {
        task: String,
        column: String,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Delete a task.
    Delete {
        task: String,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Show every field of a task.
    Show {
        task: String,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Show the selection as a list.
    List(ViewArgs),
    /// Show the selection as a three-column board.
    Board(ViewArgs),
    /// Print the statistics header.
    Stats,
    /// Print the four chart series.
    Analytics,
    /// Return completed tasks to pending.
    Reset {
        /// Every group instead of the selected one.
        #[arg(long)]
        all: bool,
    },
    /// Replace the whole board with a JSON export.
    Import {
        /// Reads stdin when omitted.
        file: Option<PathBuf>,
    },
    /// Write the board as pretty JSON.
    Export {
        /// Defaults to macroboard-YYYY-MM-DD.json in the working directory.
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        #[arg(long, conflicts_with = "output")]
        stdout: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum GroupCommand {
    Add {
        #[arg(required = true, num_args = 1..)]
        name: Vec<String>,
    },
    Rename {
        group: String,
        /// Prompts for the new name when omitted.
        name: Vec<String>,
    },
    Delete { group: String },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ViewArgs {
    #[arg(
        short = 'f',
        long = "filter",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<TaskFilter>())
    )]
    pub filter: Option<TaskFilter>,

    #[arg(short = 's', long = "search")]
    pub search: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct TaskForm {
    #[arg(short = 'g', long = "group")]
    pub group: Option<String>,

    #[arg(required = true, num_args = 1..)]
    pub name: Vec<String>,

    #[arg(long)]
    pub details: Option<String>,

    #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Status>()))]
    pub status: Option<Status>,

    #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Priority>()))]
    pub priority: Option<Priority>,

    #[arg(long)]
    pub assignee: Option<String>,

    /// dd/mm/yyyy, yyyy-mm-dd, today, tomorrow, +Nd or +Nw.
    #[arg(long)]
    pub due: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct TaskFields {
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub details: Option<String>,

    #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Status>()))]
    pub status: Option<Status>,

    #[arg(long, value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Priority>()))]
    pub priority: Option<Priority>,

    #[arg(long)]
    pub assignee: Option<String>,

    #[arg(long, conflicts_with = "clear_due")]
    pub due: Option<String>,

    #[arg(long = "clear-due")]
    pub clear_due: bool,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` / `rc.key:value` overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest
                .split_once('=')
                .or_else(|| rest.split_once(':'))
                .map(|(k, v)| (format!("rc.{k}"), v.to_string()));

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{Command, GlobalCli, preprocess_args};
    use crate::view::TaskFilter;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_extracted() {
        let pre = preprocess_args(&args(&["macroboard", "rc.color=off", "list", "rc.timezone:UTC"]))
            .expect("preprocess");

        assert_eq!(pre.cleaned_args, args(&["macroboard", "list"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.timezone".to_string(), "UTC".to_string()),
            ]
        );
    }

    #[test]
    fn parses_view_flags_and_global_yes() {
        let cli = GlobalCli::try_parse_from(["macroboard", "list", "--filter", "overdue", "-y"])
            .expect("parse");
        assert!(cli.yes);
        let Some(Command::List(view)) = cli.command else {
            panic!("expected list command");
        };
        assert_eq!(view.filter, Some(TaskFilter::Overdue));

        assert!(GlobalCli::try_parse_from(["macroboard", "list", "--filter", "someday"]).is_err());
    }

    #[test]
    fn add_joins_words_and_accepts_group() {
        let cli = GlobalCli::try_parse_from(["macroboard", "add", "-g", "2", "Gravar", "vídeo"])
            .expect("parse");
        let Some(Command::Add { group, name }) = cli.command else {
            panic!("expected add command");
        };
        assert_eq!(group.as_deref(), Some("2"));
        assert_eq!(name.join(" "), "Gravar vídeo");
    }

    #[test]
    fn task_commands_accept_view_flags() {
        let cli = GlobalCli::try_parse_from([
            "macroboard", "delete", "2", "--filter", "pending", "--search", "post",
        ])
        .expect("parse");
        let Some(Command::Delete { task, view }) = cli.command else {
            panic!("expected delete command");
        };
        assert_eq!(task, "2");
        assert_eq!(view.filter, Some(TaskFilter::Pending));
        assert_eq!(view.search.as_deref(), Some("post"));
    }
}
