use std::cell::Cell;

use anyhow::{
  Context,
  anyhow
};
use chrono::{
  DateTime,
  Datelike,
  Duration,
  LocalResult,
  NaiveDate,
  NaiveDateTime,
  TimeZone,
  Utc
};
use chrono_tz::Tz;
use regex::Regex;

const TIMEZONE_ENV_VAR: &str =
  "MACROBOARD_TIMEZONE";
pub const DEFAULT_BOARD_TIMEZONE: &str =
  "America/Sao_Paulo";

const MILLIS_PER_DAY: f64 =
  86_400_000.0;

/// Source of "now" for status stamps,
/// fresh records and the day window.
pub trait Clock {
  fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> DateTime<Utc> {
    Utc::now()
  }
}

/// Manually driven clock for tests and
/// replays.
#[derive(Debug, Clone)]
pub struct FixedClock {
  now: Cell<DateTime<Utc>>
}

impl FixedClock {
  pub fn new(
    now: DateTime<Utc>
  ) -> Self {
    Self {
      now: Cell::new(now)
    }
  }

  pub fn set(
    &self,
    now: DateTime<Utc>
  ) {
    self.now.set(now);
  }

  pub fn advance(
    &self,
    by: Duration
  ) {
    self.now.set(self.now.get() + by);
  }
}

impl Clock for FixedClock {
  fn now(&self) -> DateTime<Utc> {
    self.now.get()
  }
}

impl<C: Clock + ?Sized> Clock for &C {
  fn now(&self) -> DateTime<Utc> {
    (**self).now()
  }
}

/// Resolves the board timezone: the
/// environment wins over the rc file,
/// which wins over the built-in default.
pub fn resolve_timezone(
  configured: Option<&str>
) -> Tz {
  if let Ok(raw) =
    std::env::var(TIMEZONE_ENV_VAR)
    && let Some(tz) =
      parse_timezone(&raw, TIMEZONE_ENV_VAR)
  {
    return tz;
  }

  if let Some(raw) = configured
    && let Some(tz) =
      parse_timezone(raw, "rc.timezone")
  {
    return tz;
  }

  parse_timezone(
    DEFAULT_BOARD_TIMEZONE,
    "DEFAULT_BOARD_TIMEZONE"
  )
  .unwrap_or_else(|| {
    tracing::error!(
      "failed to parse fallback \
       timezone; using UTC"
    );
    chrono_tz::UTC
  })
}

fn parse_timezone(
  raw: &str,
  source: &str
) -> Option<Tz> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    tracing::warn!(
      source,
      "timezone source was empty"
    );
    return None;
  }

  match trimmed.parse::<Tz>() {
    | Ok(tz) => {
      tracing::debug!(
        source,
        timezone = %trimmed,
        "configured board timezone"
      );
      Some(tz)
    }
    | Err(err) => {
      tracing::error!(
        source,
        timezone = %trimmed,
        error = %err,
        "failed to parse timezone id"
      );
      None
    }
  }
}

fn local_to_utc(
  tz: Tz,
  local_naive: NaiveDateTime
) -> Option<DateTime<Utc>> {
  match tz.from_local_datetime(
    &local_naive
  ) {
    | LocalResult::Single(local_dt) => {
      Some(local_dt.with_timezone(&Utc))
    }
    | LocalResult::Ambiguous(
      first,
      second
    ) => {
      let chosen = if first <= second {
        first
      } else {
        second
      };
      Some(chosen.with_timezone(&Utc))
    }
    | LocalResult::None => None
  }
}

/// First instant of `date` in `tz`.
///
/// Zones that skip midnight for DST
/// start the day at the first hour that
/// exists.
#[must_use]
pub fn start_of_local_day(
  tz: Tz,
  date: NaiveDate
) -> DateTime<Utc> {
  for hour in 0..3 {
    if let Some(naive) =
      date.and_hms_opt(hour, 0, 0)
      && let Some(utc) =
        local_to_utc(tz, naive)
    {
      return utc;
    }
  }

  tracing::warn!(
    %date,
    timezone = %tz,
    "no local start of day; falling \
     back to UTC midnight"
  );
  Utc.from_utc_datetime(
    &date.and_time(
      chrono::NaiveTime::MIN
    )
  )
}

#[must_use]
pub fn local_date(
  dt: DateTime<Utc>,
  tz: Tz
) -> NaiveDate {
  dt.with_timezone(&tz).date_naive()
}

/// `dd/mm/yyyy` in the board timezone.
#[must_use]
pub fn format_board_date(
  dt: DateTime<Utc>,
  tz: Tz
) -> String {
  dt.with_timezone(&tz)
    .format("%d/%m/%Y")
    .to_string()
}

/// The local-day boundaries every
/// due-date predicate is measured
/// against.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct DayWindow {
  pub today_start: DateTime<Utc>,
  pub today_end:   DateTime<Utc>,
  pub week_end:    DateTime<Utc>
}

impl DayWindow {
  #[must_use]
  pub fn at(
    now: DateTime<Utc>,
    tz: Tz
  ) -> Self {
    let today = local_date(now, tz);
    Self {
      today_start: start_of_local_day(
        tz, today
      ),
      today_end:   end_of_local_day(
        tz, today, 0
      ),
      week_end:    end_of_local_day(
        tz, today, 7
      )
    }
  }

  pub fn is_overdue(
    &self,
    due: DateTime<Utc>
  ) -> bool {
    due < self.today_start
  }

  pub fn is_due_today(
    &self,
    due: DateTime<Utc>
  ) -> bool {
    due >= self.today_start
      && due <= self.today_end
  }

  pub fn is_due_this_week(
    &self,
    due: DateTime<Utc>
  ) -> bool {
    due >= self.today_start
      && due <= self.week_end
  }
}

fn end_of_local_day(
  tz: Tz,
  date: NaiveDate,
  days_ahead: u64
) -> DateTime<Utc> {
  let next = date
    .checked_add_days(chrono::Days::new(
      days_ahead + 1
    ))
    .unwrap_or(date);
  start_of_local_day(tz, next)
    - Duration::milliseconds(1)
}

/// Week bucket used by the completion
/// trend chart:
/// `ceil((daysSinceJan1 + jan1Weekday + 1) / 7)`
/// with fractional days measured in the
/// board timezone and Sunday as weekday 0.
#[must_use]
pub fn week_number(
  dt: DateTime<Utc>,
  tz: Tz
) -> u32 {
  let year =
    dt.with_timezone(&tz).year();
  let Some(jan1) =
    NaiveDate::from_ymd_opt(year, 1, 1)
  else {
    return 1;
  };
  let jan1_start =
    start_of_local_day(tz, jan1);
  let elapsed_days = (dt - jan1_start)
    .num_milliseconds()
    as f64
    / MILLIS_PER_DAY;
  let weekday = f64::from(
    jan1.weekday().num_days_from_sunday()
  );
  let week = ((elapsed_days
    + weekday
    + 1.0)
    / 7.0)
    .ceil();
  if week < 1.0 { 1 } else { week as u32 }
}

/// Parses the due-date field of the task
/// form. Date-only inputs land on local
/// midnight.
#[tracing::instrument(skip(now, tz), fields(input = input))]
pub fn parse_due_input(
  input: &str,
  now: DateTime<Utc>,
  tz: Tz
) -> anyhow::Result<DateTime<Utc>> {
  let token = input.trim();
  let lower = token.to_lowercase();
  let today = local_date(now, tz);

  match lower.as_str() {
    | "today" | "hoje" => {
      return Ok(start_of_local_day(
        tz, today
      ));
    }
    | "tomorrow" | "amanha"
    | "amanhã" => {
      let date = today
        .succ_opt()
        .ok_or_else(|| {
          anyhow!("date out of range")
        })?;
      return Ok(start_of_local_day(
        tz, date
      ));
    }
    | _ => {}
  }

  let offset_re = Regex::new(
    r"^\+(?P<count>\d{1,4})(?P<unit>[dw])$"
  )
  .context("invalid offset pattern")?;
  if let Some(caps) =
    offset_re.captures(&lower)
  {
    let count: u64 = caps["count"]
      .parse()
      .context("invalid offset count")?;
    let days = match &caps["unit"] {
      | "w" => count * 7,
      | _ => count
    };
    let date = today
      .checked_add_days(
        chrono::Days::new(days)
      )
      .ok_or_else(|| {
        anyhow!(
          "date offset out of range: \
           {token}"
        )
      })?;
    return Ok(start_of_local_day(
      tz, date
    ));
  }

  let board_re = Regex::new(
    r"^(?P<day>\d{1,2})/(?P<month>\d{1,2})/(?P<year>\d{4})$"
  )
  .context("invalid date pattern")?;
  if let Some(caps) =
    board_re.captures(token)
  {
    let date = NaiveDate::from_ymd_opt(
      caps["year"].parse()?,
      caps["month"].parse()?,
      caps["day"].parse()?
    )
    .ok_or_else(|| {
      anyhow!("invalid date: {token}")
    })?;
    return Ok(start_of_local_day(
      tz, date
    ));
  }

  if let Ok(date) =
    NaiveDate::parse_from_str(
      token, "%Y-%m-%d"
    )
  {
    return Ok(start_of_local_day(
      tz, date
    ));
  }

  if let Ok(dt) =
    DateTime::parse_from_rfc3339(token)
  {
    return Ok(dt.with_timezone(&Utc));
  }

  Err(anyhow!(
    "unrecognized due date '{token}'; \
     expected dd/mm/yyyy, yyyy-mm-dd, \
     today, tomorrow, +Nd, +Nw or \
     RFC3339"
  ))
}
