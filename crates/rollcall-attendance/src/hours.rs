//! Working-hours admission policy.
//!
//! A pure function of wall-clock time. The four boundaries split the day
//! into five half-open periods that cover it without gaps or overlap:
//!
//! ```text
//! [00:00, morning_start)          before_hours  (blocked)
//! [morning_start, morning_end)    morning
//! [morning_end, afternoon_start)  lunch_break   (blocked)
//! [afternoon_start, afternoon_end) afternoon
//! [afternoon_end, 24:00)          after_hours   (blocked)
//! ```

use crate::model::TimeBlock;
use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    BeforeHours,
    Morning,
    LunchBreak,
    Afternoon,
    AfterHours,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeHours => "before_hours",
            Self::Morning => "morning",
            Self::LunchBreak => "lunch_break",
            Self::Afternoon => "afternoon",
            Self::AfterHours => "after_hours",
        }
    }

    /// The session time block this period admits, if any.
    pub fn time_block(self) -> Option<TimeBlock> {
        match self {
            Self::Morning => Some(TimeBlock::Morning),
            Self::Afternoon => Some(TimeBlock::Afternoon),
            Self::BeforeHours | Self::LunchBreak | Self::AfterHours => None,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window boundaries, serialized as `"HH:MM"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkingHours {
    #[serde(with = "hhmm")]
    pub morning_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub morning_end: NaiveTime,
    #[serde(with = "hhmm")]
    pub afternoon_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub afternoon_end: NaiveTime,
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            morning_start: hm(8, 30),
            morning_end: hm(12, 30),
            afternoon_start: hm(13, 30),
            afternoon_end: hm(17, 30),
        }
    }
}

/// Whether an attempt at a given instant may proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Admission {
    Open {
        period: Period,
        block: TimeBlock,
    },
    Blocked {
        period: Period,
        next_window: TimeBlock,
        next_window_start: NaiveDateTime,
        minutes_until_next: i64,
        message: String,
    },
}

impl WorkingHours {
    /// Boundaries must be strictly ordered, except that lunch may be empty.
    pub fn validate(&self) -> Result<(), String> {
        if self.morning_start >= self.morning_end {
            return Err(format!(
                "morning_start {} must precede morning_end {}",
                self.morning_start, self.morning_end
            ));
        }
        if self.morning_end > self.afternoon_start {
            return Err(format!(
                "morning_end {} must not follow afternoon_start {}",
                self.morning_end, self.afternoon_start
            ));
        }
        if self.afternoon_start >= self.afternoon_end {
            return Err(format!(
                "afternoon_start {} must precede afternoon_end {}",
                self.afternoon_start, self.afternoon_end
            ));
        }
        Ok(())
    }

    pub fn period_at(&self, t: NaiveTime) -> Period {
        if t < self.morning_start {
            Period::BeforeHours
        } else if t < self.morning_end {
            Period::Morning
        } else if t < self.afternoon_start {
            Period::LunchBreak
        } else if t < self.afternoon_end {
            Period::Afternoon
        } else {
            Period::AfterHours
        }
    }

    pub fn admission(&self, at: NaiveDateTime) -> Admission {
        let period = self.period_at(at.time());
        if let Some(block) = period.time_block() {
            return Admission::Open { period, block };
        }

        let today = at.date();
        let (next_window, next_window_start, message) = match period {
            Period::BeforeHours => (
                TimeBlock::Morning,
                today.and_time(self.morning_start),
                format!(
                    "blocked before working hours (before {})",
                    fmt_hm(self.morning_start)
                ),
            ),
            Period::LunchBreak => (
                TimeBlock::Afternoon,
                today.and_time(self.afternoon_start),
                format!(
                    "blocked during lunch break ({} - {})",
                    fmt_hm(self.morning_end),
                    fmt_hm(self.afternoon_start)
                ),
            ),
            _ => (
                TimeBlock::Morning,
                (today + Duration::days(1)).and_time(self.morning_start),
                format!(
                    "blocked after working hours (after {})",
                    fmt_hm(self.afternoon_end)
                ),
            ),
        };

        Admission::Blocked {
            period,
            next_window,
            next_window_start,
            minutes_until_next: (next_window_start - at).num_minutes(),
            message,
        }
    }

    /// Half-open `[start, end)` window of a block.
    pub fn window(&self, block: TimeBlock) -> (NaiveTime, NaiveTime) {
        match block {
            TimeBlock::Morning => (self.morning_start, self.morning_end),
            TimeBlock::Afternoon => (self.afternoon_start, self.afternoon_end),
        }
    }

    /// Earliest instant at or after `at` that falls inside `block`.
    pub fn next_opening(&self, block: TimeBlock, at: NaiveDateTime) -> NaiveDateTime {
        let (start, end) = self.window(block);
        let t = at.time();
        if t < start {
            at.date().and_time(start)
        } else if t < end {
            at
        } else {
            (at.date() + Duration::days(1)).and_time(start)
        }
    }

    /// Human-readable window for a block, e.g. `08:30 - 12:30`.
    pub fn describe(&self, block: TimeBlock) -> String {
        let (start, end) = self.window(block);
        format!("{} - {}", fmt_hm(start), fmt_hm(end))
    }
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

fn fmt_hm(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|e| serde::de::Error::custom(format!("invalid time {raw:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 12, 11)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_reference_times() {
        let hours = WorkingHours::default();
        assert_eq!(hours.period_at(at(7, 0).time()), Period::BeforeHours);
        assert_eq!(hours.period_at(at(9, 0).time()), Period::Morning);
        assert_eq!(hours.period_at(at(12, 45).time()), Period::LunchBreak);
        assert_eq!(hours.period_at(at(14, 0).time()), Period::Afternoon);
        assert_eq!(hours.period_at(at(18, 0).time()), Period::AfterHours);
    }

    #[test]
    fn test_boundaries_are_half_open() {
        let hours = WorkingHours::default();
        assert_eq!(hours.period_at(at(8, 29).time()), Period::BeforeHours);
        assert_eq!(hours.period_at(at(8, 30).time()), Period::Morning);
        assert_eq!(hours.period_at(at(12, 30).time()), Period::LunchBreak);
        assert_eq!(hours.period_at(at(13, 30).time()), Period::Afternoon);
        assert_eq!(hours.period_at(at(17, 29).time()), Period::Afternoon);
        assert_eq!(hours.period_at(at(17, 30).time()), Period::AfterHours);
    }

    #[test]
    fn test_lunch_admission_points_to_afternoon() {
        match WorkingHours::default().admission(at(12, 45)) {
            Admission::Blocked {
                period,
                next_window,
                minutes_until_next,
                message,
                ..
            } => {
                assert_eq!(period, Period::LunchBreak);
                assert_eq!(next_window, TimeBlock::Afternoon);
                assert_eq!(minutes_until_next, 45);
                assert!(message.contains("lunch"));
            }
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[test]
    fn test_after_hours_waits_for_tomorrow_morning() {
        match WorkingHours::default().admission(at(18, 0)) {
            Admission::Blocked {
                next_window,
                next_window_start,
                minutes_until_next,
                ..
            } => {
                assert_eq!(next_window, TimeBlock::Morning);
                assert_eq!(next_window_start, at(8, 30) + Duration::days(1));
                assert_eq!(minutes_until_next, 14 * 60 + 30);
            }
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[test]
    fn test_before_hours_waits_for_morning() {
        match WorkingHours::default().admission(at(7, 0)) {
            Admission::Blocked {
                next_window,
                minutes_until_next,
                ..
            } => {
                assert_eq!(next_window, TimeBlock::Morning);
                assert_eq!(minutes_until_next, 90);
            }
            other => panic!("expected blocked, got {other:?}"),
        }
    }

    #[test]
    fn test_next_opening_of_block() {
        let hours = WorkingHours::default();
        let tomorrow = NaiveDate::from_ymd_opt(2025, 12, 12).unwrap();

        assert_eq!(hours.next_opening(TimeBlock::Morning, at(7, 0)), at(8, 30));
        assert_eq!(hours.next_opening(TimeBlock::Morning, at(9, 15)), at(9, 15));
        assert_eq!(
            hours.next_opening(TimeBlock::Morning, at(16, 0)),
            tomorrow.and_time(hm(8, 30))
        );
        assert_eq!(
            hours.next_opening(TimeBlock::Morning, at(12, 30)),
            tomorrow.and_time(hm(8, 30))
        );
        assert_eq!(
            hours.next_opening(TimeBlock::Afternoon, at(12, 45)),
            at(13, 30)
        );
        assert_eq!(
            hours.next_opening(TimeBlock::Afternoon, at(17, 30)),
            tomorrow.and_time(hm(13, 30))
        );
    }

    #[test]
    fn test_open_admission_carries_block() {
        let admission = WorkingHours::default().admission(at(10, 0));
        assert_eq!(
            admission,
            Admission::Open {
                period: Period::Morning,
                block: TimeBlock::Morning,
            }
        );
    }

    #[test]
    fn test_toml_style_times_roundtrip() {
        let json = r#"{"morning_start":"07:45","afternoon_end":"16:00:00"}"#;
        let hours: WorkingHours = serde_json::from_str(json).unwrap();
        assert_eq!(hours.morning_start, hm(7, 45));
        assert_eq!(hours.afternoon_end, hm(16, 0));
        assert_eq!(hours.morning_end, hm(12, 30));
        let json = serde_json::to_value(&hours).unwrap();
        assert_eq!(json["morning_start"], "07:45");
        let out_of_range = serde_json::from_str::<WorkingHours>(r#"{"morning_start":"25:00"}"#);
        assert!(out_of_range.is_err());
    }

    #[test]
    fn test_validate_rejects_unordered_boundaries() {
        assert!(WorkingHours::default().validate().is_ok());
        let inverted = WorkingHours {
            morning_end: hm(8, 0),
            ..WorkingHours::default()
        };
        assert!(inverted.validate().is_err());
        let overlapping = WorkingHours {
            afternoon_start: hm(12, 0),
            ..WorkingHours::default()
        };
        assert!(overlapping.validate().is_err());
        let no_lunch = WorkingHours {
            afternoon_start: hm(12, 30),
            ..WorkingHours::default()
        };
        assert!(no_lunch.validate().is_ok());
    }

    proptest! {
        #[test]
        fn prop_periods_partition_the_day(secs in 0u32..86_400) {
            let hours = WorkingHours::default();
            let t = NaiveTime::from_num_seconds_from_midnight_opt(secs, 0).unwrap();
            let period = hours.period_at(t);

            let inside = [
                (Period::BeforeHours, t < hours.morning_start),
                (Period::Morning, hours.morning_start <= t && t < hours.morning_end),
                (Period::LunchBreak, hours.morning_end <= t && t < hours.afternoon_start),
                (Period::Afternoon, hours.afternoon_start <= t && t < hours.afternoon_end),
                (Period::AfterHours, hours.afternoon_end <= t),
            ];
            let matching: Vec<Period> = inside
                .iter()
                .filter(|(_, hit)| *hit)
                .map(|(p, _)| *p)
                .collect();
            prop_assert_eq!(matching, vec![period]);
        }

        #[test]
        fn prop_blocked_admission_points_forward(secs in 0u32..86_400) {
            let hours = WorkingHours::default();
            let now = at(0, 0) + Duration::seconds(secs as i64);
            match hours.admission(now) {
                Admission::Open { period, block } => {
                    prop_assert_eq!(period.time_block(), Some(block));
                }
                Admission::Blocked {
                    period,
                    next_window_start,
                    minutes_until_next,
                    ..
                } => {
                    prop_assert!(period.time_block().is_none());
                    prop_assert!(next_window_start > now);
                    prop_assert!(minutes_until_next >= 0);
                    let reopened = hours.period_at(next_window_start.time());
                    prop_assert!(reopened.time_block().is_some());
                }
            }
        }
    }
}
