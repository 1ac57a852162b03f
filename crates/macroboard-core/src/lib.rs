pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod datetime;
pub mod dialog;
pub mod error;
pub mod model;
pub mod normalize;
pub mod query;
pub mod render;
pub mod reorder;
pub mod storage;
pub mod store;
pub mod view;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting macroboard"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.boardrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let kv = storage::FileStore::open(
    &data_dir
  )
  .with_context(|| {
    format!(
      "failed to open board store at \
       {}",
      data_dir.display()
    )
  })?;

  let settings = cfg.app_settings()?;
  let mut app = app::App::open(
    kv,
    datetime::SystemClock,
    settings
  );

  let renderer =
    render::Renderer::new(&cfg)?;
  let command =
    cli.command.unwrap_or_else(|| {
      cli::Command::List(
        cli::ViewArgs::default()
      )
    });

  commands::dispatch(
    &mut app, &renderer, command,
    cli.yes
  )?;

  info!(
    revision = app.revision(),
    "done"
  );
  Ok(())
}
