use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use warden_config::ScheduleConfig;

use crate::error::PluginError;

/// When a notify instance is due. Pure predicate over `(now, last_sent)` so
/// tests control time; the chain stamps `last_sent` after a successful send.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    /// Due once `interval` has elapsed since the last send. An interval of
    /// zero is due every cycle.
    Periodic { interval: Duration },
    /// Due on the listed weekdays once the wall clock passes `instant`,
    /// at most once per day.
    Scheduled {
        instant: NaiveTime,
        weekdays: Vec<Weekday>,
    },
}

impl Schedule {
    pub fn from_config(
        config: Option<&ScheduleConfig>,
        default_interval: Duration,
        instance: &str,
    ) -> Result<Schedule, PluginError> {
        match config {
            None => Ok(Schedule::Periodic {
                interval: default_interval,
            }),
            Some(ScheduleConfig::Periodic { interval }) => Ok(Schedule::Periodic {
                interval: *interval,
            }),
            Some(ScheduleConfig::Scheduled { instant, weekdays }) => {
                let instant = NaiveTime::parse_from_str(instant, "%H:%M")
                    .or_else(|_| NaiveTime::parse_from_str(instant, "%H:%M:%S"))
                    .map_err(|e| PluginError::InvalidSchedule {
                        name: instance.to_string(),
                        message: format!("instant '{}': {}", instant, e),
                    })?;
                let weekdays = weekdays
                    .iter()
                    .map(|day| {
                        day.parse::<Weekday>().map_err(|_| PluginError::InvalidSchedule {
                            name: instance.to_string(),
                            message: format!("unknown weekday '{}'", day),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if weekdays.is_empty() {
                    return Err(PluginError::InvalidSchedule {
                        name: instance.to_string(),
                        message: "scheduled notification needs at least one weekday".into(),
                    });
                }
                Ok(Schedule::Scheduled { instant, weekdays })
            }
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> bool {
        match self {
            Schedule::Periodic { interval } => match last {
                None => true,
                Some(last) => {
                    now.signed_duration_since(last).to_std().unwrap_or_default() >= *interval
                }
            },
            Schedule::Scheduled { instant, weekdays } => {
                use chrono::Datelike;
                if !weekdays.contains(&now.weekday()) {
                    return false;
                }
                let today_instant = now.date_naive().and_time(*instant).and_utc();
                if now < today_instant {
                    return false;
                }
                last.map_or(true, |l| l < today_instant)
            }
        }
    }
}
