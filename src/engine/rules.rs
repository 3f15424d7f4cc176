use crate::route::{DateSource, RouteInstance, RouteSpec};
use anyhow::{Context, Result};
use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Date bound of a windowed rule: a month/day re-anchored to the current
/// year, or a fully pinned date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum DateBound {
    MonthDay { month: u32, day: u32 },
    Pinned(NaiveDate),
}

impl DateBound {
    /// Resolve against a year. Feb 29 falls back to Feb 28 in common years.
    fn in_year(&self, year: i32) -> Option<NaiveDate> {
        match *self {
            DateBound::Pinned(d) => Some(d),
            DateBound::MonthDay { month, day } => NaiveDate::from_ymd_opt(year, month, day)
                .or_else(|| NaiveDate::from_ymd_opt(year, month, day.saturating_sub(1))),
        }
    }

    fn pinned_year(&self) -> Option<i32> {
        match self {
            DateBound::Pinned(d) => Some(d.year()),
            DateBound::MonthDay { .. } => None,
        }
    }
}

impl FromStr for DateBound {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(DateBound::Pinned(date));
        }
        let (m, d) = s
            .split_once('-')
            .with_context(|| format!("expected MM-DD or YYYY-MM-DD, got {:?}", s))?;
        let month: u32 = m.parse().with_context(|| format!("bad month in {:?}", s))?;
        let day: u32 = d.parse().with_context(|| format!("bad day in {:?}", s))?;
        // 2000 is a leap year, so 02-29 is accepted here.
        if NaiveDate::from_ymd_opt(2000, month, day).is_none() {
            anyhow::bail!("invalid month-day {:?}", s);
        }
        Ok(DateBound::MonthDay { month, day })
    }
}

impl TryFrom<String> for DateBound {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl fmt::Display for DateBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DateBound::MonthDay { month, day } => write!(f, "{:02}-{:02}", month, day),
            DateBound::Pinned(d) => write!(f, "{}", d),
        }
    }
}

/// Fixed-length trips that must be back by a deadline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowedTrip {
    pub start: DateBound,
    #[serde(default = "default_trip_days")]
    pub trip_days: u32,
    pub latest_return: DateBound,
    #[serde(default = "default_step_days")]
    pub step_days: u32,
    #[serde(default)]
    pub max_pairs: Option<usize>,
}

fn default_trip_days() -> u32 {
    15
}
fn default_step_days() -> u32 {
    1
}

/// Short trips leaving and returning on given weekdays, inside a rolling
/// horizon starting from today.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RollingWeekend {
    #[serde(default)]
    pub start_offset_days: u32,
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
    #[serde(default = "default_depart_weekdays")]
    pub depart_weekdays: Vec<Weekday>,
    #[serde(default = "default_return_weekdays")]
    pub return_weekdays: Vec<Weekday>,
    #[serde(default = "default_max_trip_days")]
    pub max_trip_days: u32,
    #[serde(default)]
    pub max_pairs: Option<usize>,
}

fn default_horizon_days() -> u32 {
    30
}
fn default_depart_weekdays() -> Vec<Weekday> {
    vec![Weekday::Fri, Weekday::Sat]
}
fn default_return_weekdays() -> Vec<Weekday> {
    vec![Weekday::Sun, Weekday::Mon]
}
fn default_max_trip_days() -> u32 {
    4
}

impl Default for RollingWeekend {
    fn default() -> Self {
        Self {
            start_offset_days: 0,
            horizon_days: default_horizon_days(),
            depart_weekdays: default_depart_weekdays(),
            return_weekdays: default_return_weekdays(),
            max_trip_days: default_max_trip_days(),
            max_pairs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DateRule {
    WindowedTrip(WindowedTrip),
    RollingWeekend(RollingWeekend),
    /// Well-formed but unknown rule name. Expands to nothing.
    Unrecognized(String),
}

impl DateRule {
    /// Build a rule from its configured name and parameter table.
    /// Malformed parameters of a known rule are an error; unknown names are not.
    pub fn from_config(name: &str, params: toml::Table) -> Result<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        let value = toml::Value::Table(params);
        match normalized.as_str() {
            "" => anyhow::bail!("rule name is empty"),
            "windowed_trip" | "window" | "rome_15d_window" => {
                let rule = value
                    .try_into::<WindowedTrip>()
                    .with_context(|| format!("invalid parameters for rule {:?}", name))?;
                if rule.trip_days == 0 {
                    anyhow::bail!("rule {:?}: trip_days must be > 0", name);
                }
                if rule.step_days == 0 {
                    anyhow::bail!("rule {:?}: step_days must be > 0", name);
                }
                if rule.max_pairs == Some(0) {
                    anyhow::bail!("rule {:?}: max_pairs must be > 0", name);
                }
                Ok(DateRule::WindowedTrip(rule))
            }
            "rolling_weekend" | "weekend_30d" => {
                let rule = value
                    .try_into::<RollingWeekend>()
                    .with_context(|| format!("invalid parameters for rule {:?}", name))?;
                if rule.depart_weekdays.is_empty() || rule.return_weekdays.is_empty() {
                    anyhow::bail!("rule {:?}: weekday sets must not be empty", name);
                }
                if rule.max_trip_days == 0 {
                    anyhow::bail!("rule {:?}: max_trip_days must be > 0", name);
                }
                if rule.max_pairs == Some(0) {
                    anyhow::bail!("rule {:?}: max_pairs must be > 0", name);
                }
                Ok(DateRule::RollingWeekend(rule))
            }
            _ => Ok(DateRule::Unrecognized(name.trim().to_string())),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DateRule::WindowedTrip(_) => "windowed_trip",
            DateRule::RollingWeekend(_) => "rolling_weekend",
            DateRule::Unrecognized(name) => name,
        }
    }

    /// Canonical text of the rule and all of its parameters, hashed into the route_key.
    pub fn descriptor(&self) -> String {
        fn days(set: &[Weekday]) -> String {
            set.iter()
                .map(|d| d.num_days_from_monday().to_string())
                .collect::<Vec<_>>()
                .join(",")
        }
        match self {
            DateRule::WindowedTrip(r) => format!(
                "windowed_trip;start={};trip={};latest={};step={};max={:?}",
                r.start, r.trip_days, r.latest_return, r.step_days, r.max_pairs
            ),
            DateRule::RollingWeekend(r) => format!(
                "rolling_weekend;offset={};horizon={};dep={};ret={};max_trip={};max={:?}",
                r.start_offset_days,
                r.horizon_days,
                days(&r.depart_weekdays),
                days(&r.return_weekdays),
                r.max_trip_days,
                r.max_pairs
            ),
            DateRule::Unrecognized(name) => format!("unrecognized;{}", name),
        }
    }
}

fn add_days(date: NaiveDate, n: u32) -> Option<NaiveDate> {
    date.checked_add_days(Days::new(n as u64))
}

fn window_for_year(rule: &WindowedTrip, year: i32, today: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let Some(start) = rule.start.in_year(year) else {
        return Vec::new();
    };
    let deadline = match rule.latest_return {
        DateBound::Pinned(d) => Some(d),
        bound => bound
            .in_year(year)
            .and_then(|d| if d < start { bound.in_year(year + 1) } else { Some(d) }),
    };
    let Some(deadline) = deadline else {
        return Vec::new();
    };
    let Some(latest_depart) = deadline.checked_sub_days(Days::new(rule.trip_days as u64)) else {
        return Vec::new();
    };

    let mut pairs = Vec::new();
    let mut day = start.max(today);
    while day <= latest_depart {
        if let Some(ret) = add_days(day, rule.trip_days) {
            pairs.push((day, ret));
        }
        match add_days(day, 1) {
            Some(next) => day = next,
            None => break,
        }
    }
    pairs
}

/// Departure/return pairs for a windowed-trip rule, sampled and capped.
pub fn windowed_trip_pairs(rule: &WindowedTrip, today: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let year = rule.start.pinned_year().unwrap_or(today.year());
    let mut pairs = window_for_year(rule, year, today);
    if pairs.is_empty() && rule.start.pinned_year().is_none() {
        pairs = window_for_year(rule, year + 1, today);
    }
    pairs
        .into_iter()
        .step_by(rule.step_days.max(1) as usize)
        .take(rule.max_pairs.unwrap_or(usize::MAX))
        .collect()
}

/// Departure/return pairs for a rolling-weekend rule. Stops as soon as the cap is hit.
pub fn rolling_weekend_pairs(rule: &RollingWeekend, today: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let cap = rule.max_pairs.unwrap_or(usize::MAX);
    let (Some(first), Some(last)) = (
        add_days(today, rule.start_offset_days),
        add_days(today, rule.start_offset_days.saturating_add(rule.horizon_days)),
    ) else {
        return Vec::new();
    };

    let mut pairs = Vec::new();
    let mut day = first;
    while day <= last && pairs.len() < cap {
        if rule.depart_weekdays.contains(&day.weekday()) {
            let ret = (1..=rule.max_trip_days)
                .filter_map(|k| add_days(day, k))
                .find(|r| rule.return_weekdays.contains(&r.weekday()));
            if let Some(ret) = ret {
                pairs.push((day, ret));
            }
        }
        match add_days(day, 1) {
            Some(next) => day = next,
            None => break,
        }
    }
    pairs
}

/// Expand a RouteSpec into the concrete instances to query, in query order:
/// destination-major, then departure date ascending.
pub fn expand(spec: &RouteSpec, today: NaiveDate) -> Vec<RouteInstance> {
    let pairs = match &spec.dates {
        DateSource::Fixed {
            departure,
            return_date,
        } => vec![(*departure, *return_date)],
        DateSource::Rule(DateRule::WindowedTrip(rule)) => windowed_trip_pairs(rule, today),
        DateSource::Rule(DateRule::RollingWeekend(rule)) => rolling_weekend_pairs(rule, today),
        DateSource::Rule(DateRule::Unrecognized(_)) => Vec::new(),
    };

    spec.destinations
        .iter()
        .flat_map(|destination| {
            pairs.iter().map(move |(departure, ret)| RouteInstance {
                route_id: spec.id.clone(),
                origin: spec.origin.clone(),
                destination: destination.clone(),
                departure_date: *departure,
                return_date: *ret,
                pax: spec.pax,
                cabin: spec.cabin.clone(),
                currency: spec.currency.clone(),
                direct_only: spec.direct_only,
            })
        })
        .collect()
}
