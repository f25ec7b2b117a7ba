//! Send window gate.
//!
//! The window is explicit configuration. `Always` is a first-class choice,
//! not a hidden test switch, so a run outside business hours is either
//! configured to send or it returns `outside_window` and exits 0.

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::domain::DripError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SendWindow {
    /// Send at any time.
    Always,
    /// Send only on the listed weekdays between `start` (inclusive) and
    /// `end` (exclusive), local time at the configured offset.
    BusinessHours {
        start: NaiveTime,
        end: NaiveTime,
        /// ISO weekday numbers, Monday = 1 .. Sunday = 7.
        weekdays: Vec<u8>,
    },
}

impl Default for SendWindow {
    fn default() -> Self {
        SendWindow::business_hours_default()
    }
}

impl SendWindow {
    /// 09:00 to 17:30, Monday to Friday.
    pub fn business_hours_default() -> Self {
        SendWindow::BusinessHours {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(17, 30, 0).unwrap_or(NaiveTime::MIN),
            weekdays: vec![1, 2, 3, 4, 5],
        }
    }

    pub fn validate(&self) -> Result<(), DripError> {
        if let SendWindow::BusinessHours {
            start,
            end,
            weekdays,
        } = self
        {
            if start >= end {
                return Err(DripError::Config(format!(
                    "send window start {start} must be before end {end}"
                )));
            }
            if let Some(bad) = weekdays.iter().find(|d| !(1..=7).contains(*d)) {
                return Err(DripError::Config(format!(
                    "send window weekday {bad} is outside 1..=7"
                )));
            }
        }
        Ok(())
    }

    pub fn allows(&self, now: DateTime<Utc>, offset: FixedOffset) -> bool {
        match self {
            SendWindow::Always => true,
            SendWindow::BusinessHours {
                start,
                end,
                weekdays,
            } => {
                let local = now.with_timezone(&offset);
                let weekday = iso_weekday(local.weekday());
                let time = local.time();
                (weekdays.is_empty() || weekdays.contains(&weekday))
                    && time >= *start
                    && time < *end
            }
        }
    }
}

fn iso_weekday(day: Weekday) -> u8 {
    day.number_from_monday() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    // 2024-03-04 is a Monday.
    #[rstest]
    #[case::monday_morning(2024, 3, 4, 9, 0, true)]
    #[case::monday_before_open(2024, 3, 4, 8, 59, false)]
    #[case::friday_late_afternoon(2024, 3, 8, 17, 29, true)]
    #[case::friday_at_close(2024, 3, 8, 17, 30, false)]
    #[case::saturday(2024, 3, 9, 12, 0, false)]
    fn business_hours_gate(
        #[case] y: i32,
        #[case] m: u32,
        #[case] d: u32,
        #[case] h: u32,
        #[case] min: u32,
        #[case] open: bool,
    ) {
        let now = Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap();
        assert_eq!(SendWindow::default().allows(now, utc()), open);
    }

    #[test]
    fn always_allows_weekends_and_nights() {
        let saturday_night = Utc.with_ymd_and_hms(2024, 3, 9, 3, 0, 0).unwrap();
        assert!(SendWindow::Always.allows(saturday_night, utc()));
    }

    #[test]
    fn window_is_evaluated_in_local_time() {
        // 14:00 UTC Monday is 09:00 in UTC-5.
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 14, 0, 0).unwrap();
        let new_york = FixedOffset::west_opt(5 * 3600).unwrap();
        assert!(SendWindow::default().allows(now, new_york));

        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        assert!(!SendWindow::default().allows(now, tokyo));
    }

    #[test]
    fn validation_rejects_inverted_hours_and_bad_days() {
        let inverted = SendWindow::BusinessHours {
            start: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            weekdays: vec![1],
        };
        assert!(inverted.validate().is_err());

        let bad_day = SendWindow::BusinessHours {
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            weekdays: vec![0],
        };
        assert!(bad_day.validate().is_err());
        assert!(SendWindow::default().validate().is_ok());
    }

    #[test]
    fn parses_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            window: SendWindow,
        }
        let parsed: Wrapper = toml::from_str(
            r#"
            [window]
            kind = "business_hours"
            start = "08:30:00"
            end = "16:00:00"
            weekdays = [1, 2, 3]
            "#,
        )
        .unwrap();
        assert!(matches!(parsed.window, SendWindow::BusinessHours { ref weekdays, .. } if weekdays == &vec![1, 2, 3]));
    }
}
