//! Monitor configuration
//!
//! The core consumes a fully-resolved [`MonitorConfig`]; flag parsing lives
//! in the CLI crate. `validate()` is called once at startup and invalid
//! timezone/duration/data-dir settings are fatal.

use crate::clock::Clock;
use crate::error::CoreError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How far back the loader looks when scanning transcripts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimelineMode {
    /// Every transcript file.
    Full,
    /// Files modified within the last 48 hours.
    #[default]
    Recent,
    /// Files modified within `data_retention_hours` (0 keeps all).
    Optimized,
}

impl FromStr for TimelineMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(TimelineMode::Full),
            "recent" => Ok(TimelineMode::Recent),
            "optimized" => Ok(TimelineMode::Optimized),
            other => Err(CoreError::InvalidConfig {
                message: format!("unknown timeline mode: {other}"),
            }),
        }
    }
}

/// Row grouping for the batch reporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    Day,
    Hour,
    Week,
    Month,
    Model,
    Project,
}

impl FromStr for GroupBy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(GroupBy::Day),
            "hour" => Ok(GroupBy::Hour),
            "week" => Ok(GroupBy::Week),
            "month" => Ok(GroupBy::Month),
            "model" => Ok(GroupBy::Model),
            "project" => Ok(GroupBy::Project),
            other => Err(CoreError::InvalidConfig {
                message: format!("unknown group-by: {other}"),
            }),
        }
    }
}

/// Output rendering for the batch reporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Csv,
    Json,
    Summary,
}

impl FromStr for OutputFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "table" => Ok(OutputFormat::Table),
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            "summary" => Ok(OutputFormat::Summary),
            other => Err(CoreError::InvalidConfig {
                message: format!("unknown output format: {other}"),
            }),
        }
    }
}

/// Resolved configuration consumed by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MonitorConfig {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// IANA zone name, or the literal `Local`.
    pub timezone: String,
    /// Lookback filter expression like `1y2m3w4d5h`; empty = unbounded.
    pub duration: String,
    pub group_by: GroupBy,
    pub output_format: OutputFormat,
    /// Row cap for the reporter; 0 = unlimited.
    pub limit: usize,
    pub breakdown: bool,
    /// Parallel parse width; 0 = CPU count.
    pub concurrency: usize,
    pub plan: String,
    pub custom_limit_tokens: u64,
    pub data_refresh_interval: Duration,
    pub ui_refresh_rate: Duration,
    pub timeline_mode: TimelineMode,
    /// Used by `TimelineMode::Optimized`; 0 = no cutoff.
    pub data_retention_hours: u64,
    pub enable_incremental_detection: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            data_dir: home.join(".claude").join("projects"),
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| home.join(".cache"))
                .join("ccmeter"),
            timezone: "Local".to_string(),
            duration: String::new(),
            group_by: GroupBy::default(),
            output_format: OutputFormat::default(),
            limit: 0,
            breakdown: false,
            concurrency: 0,
            plan: "custom".to_string(),
            custom_limit_tokens: 0,
            data_refresh_interval: Duration::from_secs(10),
            ui_refresh_rate: Duration::from_millis(1500),
            timeline_mode: TimelineMode::default(),
            data_retention_hours: 0,
            enable_incremental_detection: true,
        }
    }
}

impl MonitorConfig {
    /// Parallel width, defaulting to the CPU count.
    pub fn effective_concurrency(&self) -> usize {
        if self.concurrency > 0 {
            self.concurrency
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    /// Resolve the configured timezone. The literal `Local` maps to UTC so
    /// window-day anchoring stays deterministic across runs.
    pub fn resolve_timezone(&self) -> Result<Tz, CoreError> {
        if self.timezone.is_empty() || self.timezone == "Local" {
            return Ok(chrono_tz::UTC);
        }
        self.timezone
            .parse::<Tz>()
            .map_err(|_| CoreError::InvalidTimezone {
                zone: self.timezone.clone(),
            })
    }

    /// Lookback cutoff in Unix seconds, from the duration expression.
    /// `None` when no duration filter is configured.
    pub fn duration_cutoff(&self, clock: &dyn Clock) -> Result<Option<i64>, CoreError> {
        if self.duration.is_empty() {
            return Ok(None);
        }
        let secs = parse_duration_expr(&self.duration)?;
        Ok(Some(clock.now_unix() - secs))
    }

    /// Fatal-at-startup validation: timezone, duration and data dir.
    pub fn validate(&self) -> Result<(), CoreError> {
        self.resolve_timezone()?;
        if !self.duration.is_empty() {
            parse_duration_expr(&self.duration)?;
        }
        if !self.data_dir.is_dir() {
            return Err(CoreError::DataDirUnreadable {
                path: self.data_dir.clone(),
            });
        }
        Ok(())
    }
}

/// Parse a composed duration expression such as `1y2m3w4d5h`.
///
/// Units: `h` hours, `d` days, `w` 7 days, `m` 30 days, `y` 365 days.
pub fn parse_duration_expr(expr: &str) -> Result<i64, CoreError> {
    let invalid = || CoreError::InvalidDuration {
        expr: expr.to_string(),
    };

    let mut total: i64 = 0;
    let mut digits = String::new();
    let mut saw_component = false;

    for ch in expr.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        if digits.is_empty() {
            return Err(invalid());
        }
        let count: i64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let unit_secs = match ch {
            'h' => 3_600,
            'd' => 86_400,
            'w' => 7 * 86_400,
            'm' => 30 * 86_400,
            'y' => 365 * 86_400,
            _ => return Err(invalid()),
        };
        total += count * unit_secs;
        saw_component = true;
    }

    // trailing digits without a unit
    if !digits.is_empty() || !saw_component {
        return Err(invalid());
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    #[test]
    fn test_parse_duration_single_units() {
        assert_eq!(parse_duration_expr("5h").unwrap(), 5 * 3_600);
        assert_eq!(parse_duration_expr("4d").unwrap(), 4 * 86_400);
        assert_eq!(parse_duration_expr("3w").unwrap(), 21 * 86_400);
        assert_eq!(parse_duration_expr("2m").unwrap(), 60 * 86_400);
        assert_eq!(parse_duration_expr("1y").unwrap(), 365 * 86_400);
    }

    #[test]
    fn test_parse_duration_composed() {
        let expected = 365 * 86_400 + 2 * 30 * 86_400 + 3 * 7 * 86_400 + 4 * 86_400 + 5 * 3_600;
        assert_eq!(parse_duration_expr("1y2m3w4d5h").unwrap(), expected);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration_expr("").is_err());
        assert!(parse_duration_expr("h").is_err());
        assert!(parse_duration_expr("5").is_err());
        assert!(parse_duration_expr("5x").is_err());
        assert!(parse_duration_expr("5h3").is_err());
    }

    #[test]
    fn test_duration_cutoff_anchored_to_clock() {
        let clock = FixedClock::at(1_700_000_000);
        let config = MonitorConfig {
            duration: "2d".to_string(),
            ..Default::default()
        };
        let cutoff = config.duration_cutoff(clock.as_ref()).unwrap().unwrap();
        assert_eq!(cutoff, 1_700_000_000 - 2 * 86_400);
    }

    #[test]
    fn test_resolve_timezone() {
        let mut config = MonitorConfig {
            timezone: "Europe/Paris".to_string(),
            ..Default::default()
        };
        assert_eq!(config.resolve_timezone().unwrap(), chrono_tz::Europe::Paris);

        config.timezone = "Local".to_string();
        assert_eq!(config.resolve_timezone().unwrap(), chrono_tz::UTC);

        config.timezone = "Nowhere/Nothing".to_string();
        assert!(matches!(
            config.resolve_timezone(),
            Err(CoreError::InvalidTimezone { .. })
        ));
    }

    #[test]
    fn test_enum_from_str() {
        assert_eq!("optimized".parse::<TimelineMode>().unwrap(), TimelineMode::Optimized);
        assert_eq!("project".parse::<GroupBy>().unwrap(), GroupBy::Project);
        assert_eq!("csv".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert!("weekly".parse::<GroupBy>().is_err());
    }
}
