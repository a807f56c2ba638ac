//! Attendance domain records: sessions, enrollments and attendance rows.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Enrollment grouping a student belongs to and a session is held for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cohort {
    pub year: String,
    pub section: String,
}

impl Cohort {
    /// The year is stored in canonical form, so `"4th Year"`, `"4th"` and
    /// `"4"` all name the same cohort.
    pub fn new(year: impl AsRef<str>, section: impl AsRef<str>) -> Self {
        Self {
            year: canonical_year(year.as_ref()),
            section: section.as_ref().trim().to_string(),
        }
    }
}

/// Leading digits of a year label once ordinal and "Year" suffixes are
/// removed; anything else is kept as written, trimmed.
fn canonical_year(raw: &str) -> String {
    let raw = raw.trim();
    let digits_end = raw.find(|c: char| !c.is_ascii_digit()).unwrap_or(raw.len());
    if digits_end == 0 {
        return raw.to_string();
    }

    let (digits, rest) = raw.split_at(digits_end);
    let rest = rest.trim().to_ascii_lowercase();
    let rest = rest.trim_end_matches("year").trim_end();
    match rest {
        "" | "st" | "nd" | "rd" | "th" | "r" => digits.to_string(),
        _ => raw.to_string(),
    }
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.year, self.section)
    }
}

/// Defines a string-backed enum with `as_str`, `Display` and `FromStr`,
/// matching the snake_case serde representation.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }
    };
}

text_enum!(
    SessionKind {
        Lab => "lab",
        Theory => "theory",
    }
);

text_enum!(
    /// Scheduled part of the day a session belongs to.
    TimeBlock {
        Morning => "morning",
        Afternoon => "afternoon",
    }
);

text_enum!(
    SessionStatus {
        Active => "active",
        StoppedDaily => "stopped_daily",
        EndedSemester => "ended_semester",
    }
);

text_enum!(
    AttendanceStatus {
        Present => "present",
        Absent => "absent",
    }
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub owner: String,
    pub cohort: Cohort,
    pub kind: SessionKind,
    pub time_block: TimeBlock,
    pub status: SessionStatus,
    pub started_at: NaiveDateTime,
    pub ended_at: Option<NaiveDateTime>,
    /// Present records written for this session, across all days.
    pub tally: u32,
}

impl Session {
    pub fn new(
        owner: impl Into<String>,
        cohort: Cohort,
        kind: SessionKind,
        time_block: TimeBlock,
        started_at: NaiveDateTime,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.into(),
            cohort,
            kind,
            time_block,
            status: SessionStatus::Active,
            started_at,
            ended_at: None,
            tally: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentEnrollment {
    pub student_id: String,
    pub name: String,
    pub cohort: Cohort,
}

/// One canonical row per (student, session, day).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub session_id: String,
    pub day_key: NaiveDate,
    pub status: AttendanceStatus,
    pub confidence: f32,
    pub observed_at: NaiveDateTime,
    /// Bumped by the store on every applied update.
    pub revision: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cohort_year_is_canonical() {
        let canonical = Cohort::new("4", "A");
        for label in ["4th Year", "4th", "4r", " 4 ", "4TH YEAR"] {
            assert_eq!(Cohort::new(label, " A "), canonical, "label {label:?}");
        }
        assert_eq!(Cohort::new("1st Year", "B").year, "1");
        assert_eq!(Cohort::new("2025", "A").year, "2025");
        assert_eq!(Cohort::new("Graduate", "A").year, "Graduate");
        assert_eq!(Cohort::new("4 Honours", "A").year, "4 Honours");
        assert_ne!(Cohort::new("4th Year", "A"), Cohort::new("3rd Year", "A"));
    }

    #[test]
    fn test_text_enums_roundtrip_through_str() {
        for status in [
            SessionStatus::Active,
            SessionStatus::StoppedDaily,
            SessionStatus::EndedSemester,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<SessionStatus>().is_err());
        assert_eq!(TimeBlock::Afternoon.to_string(), "afternoon");
    }

    #[test]
    fn test_serde_matches_as_str() {
        let json = serde_json::to_string(&SessionStatus::StoppedDaily).unwrap();
        assert_eq!(json, "\"stopped_daily\"");
        let kind: SessionKind = serde_json::from_str("\"lab\"").unwrap();
        assert_eq!(kind, SessionKind::Lab);
    }

    #[test]
    fn test_new_session_is_active_with_fresh_id() {
        let started = NaiveDate::from_ymd_opt(2025, 1, 6)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let open = || {
            Session::new(
                "t1",
                Cohort::new("2025", "A"),
                SessionKind::Theory,
                TimeBlock::Morning,
                started,
            )
        };
        let a = open();
        let b = open();
        assert_eq!(a.status, SessionStatus::Active);
        assert_eq!(a.tally, 0);
        assert!(a.ended_at.is_none());
        assert_ne!(a.id, b.id);
    }
}
