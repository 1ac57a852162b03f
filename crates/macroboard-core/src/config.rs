use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::app::{
  AppSettings,
  PersistPolicy
};
use crate::datetime::resolve_timezone;
use crate::view::Layout;

const RC_ENV_VAR: &str = "MACROBOARDRC";
const RC_FILE_NAME: &str =
  ".macroboardrc";
const DEFAULT_DATA_DIR: &str =
  ".macroboard";

#[derive(Debug, Clone)]
pub struct Config {
  map: HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Config {
  /// Built-in defaults only.
  pub fn defaults() -> Self {
    let mut map = HashMap::new();
    for (key, value) in [
      ("data.location", "~/.macroboard"),
      ("persist.on_failure", "rollback"),
      ("default.layout", "list"),
      ("color", "on")
    ] {
      map.insert(
        key.to_string(),
        value.to_string()
      );
    }
    Self {
      map,
      loaded_files: vec![]
    }
  }

  #[tracing::instrument(skip(
    boardrc_override
  ))]
  pub fn load(
    boardrc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Self::defaults();

    let boardrc = resolve_boardrc_path(
      boardrc_override
    )?;
    if let Some(path) = boardrc {
      info!(boardrc = %path.display(), "loading boardrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no boardrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  /// Unrecognized values are an error
  /// rather than silently false.
  pub fn get_bool(
    &self,
    key: &str
  ) -> anyhow::Result<Option<bool>> {
    self
      .map
      .get(key)
      .map(|v| {
        parse_bool(v).ok_or_else(|| {
          anyhow!(
            "invalid {key} setting: {v}"
          )
        })
      })
      .transpose()
  }

  pub fn persist_policy(
    &self
  ) -> anyhow::Result<PersistPolicy> {
    self
      .get("persist.on_failure")
      .map(|raw| raw.parse::<PersistPolicy>())
      .transpose()
      .map(Option::unwrap_or_default)
  }

  pub fn default_layout(
    &self
  ) -> anyhow::Result<Layout> {
    self
      .get("default.layout")
      .map(|raw| raw.parse::<Layout>())
      .transpose()
      .map(Option::unwrap_or_default)
  }

  /// Controller settings; the board
  /// timezone honours
  /// `MACROBOARD_TIMEZONE` first.
  pub fn app_settings(
    &self
  ) -> anyhow::Result<AppSettings> {
    Ok(AppSettings {
      tz:             resolve_timezone(
        self.get("timezone").as_deref()
      ),
      policy:         self
        .persist_policy()?,
      default_layout: self
        .default_layout()?
    })
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    if self.loaded_files.contains(&path)
    {
      warn!(file = %path.display(), "boardrc already loaded; skipping include cycle");
      return Ok(());
    }

    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let line = match raw_line
        .split_once('#')
      {
        | Some((before, _)) => {
          before.trim()
        }
        | None => raw_line.trim()
      };
      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
          file = %path.display(),
          include = %include_path.display(),
          line = line_num + 1,
          "processing include"
        );

        if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_boardrc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    if path == Path::new("/dev/null") {
      return Ok(None);
    }
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping boardrc"
    );
    return Ok(None);
  };
  let candidate =
    home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(DEFAULT_DATA_DIR))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> Option<bool> {
  match s
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "1" | "y" | "yes" | "on"
    | "true" => Some(true),
    | "0" | "n" | "no" | "off"
    | "false" => Some(false),
    | _ => None
  }
}

#[cfg(test)]
mod tests {
  use std::fs;

  use tempfile::tempdir;

  use super::{
    Config,
    resolve_data_dir
  };
  use crate::app::PersistPolicy;
  use crate::view::Layout;

  #[test]
  fn loads_rc_file_with_includes_and_comments() {
    let temp = tempdir().expect("tempdir");
    let rc = temp.path().join("boardrc");
    fs::write(
      temp.path().join("extra.rc"),
      "default.layout = board\n"
    )
    .expect("write include");
    fs::write(
      &rc,
      "# board settings\n\
       persist.on_failure = keep  # \
       stay in memory\n\
       include extra.rc\n\
       color = off\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&rc))
      .expect("load config");
    assert_eq!(cfg.loaded_files.len(), 2);
    assert_eq!(
      cfg
        .persist_policy()
        .expect("policy"),
      PersistPolicy::Keep
    );
    assert_eq!(
      cfg
        .default_layout()
        .expect("layout"),
      Layout::Board
    );
    assert_eq!(
      cfg.get_bool("color").expect("bool"),
      Some(false)
    );
  }

  #[test]
  fn include_cycles_are_skipped() {
    let temp = tempdir().expect("tempdir");
    let rc = temp.path().join("boardrc");
    fs::write(
      &rc,
      "include boardrc\ncolor = on\n"
    )
    .expect("write rc");

    let cfg = Config::load(Some(&rc))
      .expect("load config");
    assert_eq!(cfg.loaded_files.len(), 1);
  }

  #[test]
  fn overrides_strip_rc_prefix_and_validate_values() {
    let mut cfg = Config::defaults();
    cfg.apply_overrides([
      (
        "rc.persist.on_failure"
          .to_string(),
        "sometimes".to_string()
      ),
      (
        "color".to_string(),
        "maybe".to_string()
      )
    ]);

    assert!(
      cfg.persist_policy().is_err()
    );
    assert!(
      cfg.get_bool("color").is_err()
    );
  }

  #[test]
  fn dev_null_disables_rc_file() {
    let cfg = Config::load(Some(
      std::path::Path::new("/dev/null")
    ))
    .expect("load config");
    assert!(cfg.loaded_files.is_empty());
    assert_eq!(
      cfg.get("data.location").as_deref(),
      Some("~/.macroboard")
    );
  }

  #[test]
  fn data_dir_override_is_created() {
    let temp = tempdir().expect("tempdir");
    let target =
      temp.path().join("nested/board");
    let dir = resolve_data_dir(
      &Config::defaults(),
      Some(&target)
    )
    .expect("resolve");
    assert_eq!(dir, target);
    assert!(target.is_dir());
  }
}
