use chrono::{Duration, Local, NaiveDate};

use crate::error::{MaintenanceError, MaintenanceResult};

/// Parses the date portion of an ISO date or timestamp (`2020-01-01`,
/// `2020-01-01 08:30:00`, ...).
pub fn parse_action_date(text: &str) -> MaintenanceResult<NaiveDate> {
    let trimmed = text.trim();
    let date_part = trimmed
        .get(0..10)
        .ok_or_else(|| MaintenanceError::InvalidDateFormat(text.to_string()))?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| MaintenanceError::InvalidDateFormat(text.to_string()))
}

pub fn next_due_date(last_action: NaiveDate, interval_days: i32) -> MaintenanceResult<NaiveDate> {
    if interval_days < 0 {
        return Err(MaintenanceError::Validation(format!(
            "repetition interval must not be negative, got {interval_days}"
        )));
    }
    last_action
        .checked_add_signed(Duration::days(i64::from(interval_days)))
        .ok_or_else(|| {
            MaintenanceError::Validation(format!(
                "{last_action} plus {interval_days} days is out of range"
            ))
        })
}

/// Days left until the next action is due; negative once it is late.
pub fn days_remaining(
    last_action: NaiveDate,
    interval_days: i32,
    today: NaiveDate,
) -> MaintenanceResult<i64> {
    let due = next_due_date(last_action, interval_days)?;
    Ok((due - today).num_days())
}

/// Due today is not overdue.
pub fn is_overdue(
    last_action: NaiveDate,
    interval_days: i32,
    today: NaiveDate,
) -> MaintenanceResult<bool> {
    Ok(days_remaining(last_action, interval_days, today)? < 0)
}

pub fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn thirty_day_interval_matches_worked_example() {
        let last = date(2020, 1, 1);
        assert_eq!(next_due_date(last, 30).unwrap(), date(2020, 1, 31));
        assert!(is_overdue(last, 30, date(2020, 2, 5)).unwrap());
        assert_eq!(days_remaining(last, 30, date(2020, 2, 5)).unwrap(), -5);
        assert!(!is_overdue(last, 30, date(2020, 1, 31)).unwrap());
    }

    #[test]
    fn due_today_is_not_overdue() {
        let last = date(2023, 12, 20);
        let due = next_due_date(last, 45).unwrap();
        assert_eq!(days_remaining(last, 45, due).unwrap(), 0);
        assert!(!is_overdue(last, 45, due).unwrap());
        assert!(is_overdue(last, 45, due.succ_opt().unwrap()).unwrap());
    }

    #[test]
    fn zero_interval_is_overdue_only_after_the_action_date() {
        let last = date(2021, 6, 15);
        assert!(!is_overdue(last, 0, date(2021, 6, 14)).unwrap());
        assert!(!is_overdue(last, 0, last).unwrap());
        assert!(is_overdue(last, 0, date(2021, 6, 16)).unwrap());
    }

    #[test]
    fn overdue_iff_today_after_due_date() {
        let last = date(2020, 2, 27);
        for interval in [0, 1, 2, 29, 365] {
            let due = last + Duration::days(interval as i64);
            for offset in -3..=3 {
                let today = due + Duration::days(offset);
                assert_eq!(is_overdue(last, interval, today).unwrap(), today > due);
            }
        }
    }

    #[test]
    fn crosses_leap_day() {
        assert_eq!(next_due_date(date(2020, 2, 28), 1).unwrap(), date(2020, 2, 29));
        assert_eq!(next_due_date(date(2021, 2, 28), 1).unwrap(), date(2021, 3, 1));
    }

    #[test]
    fn negative_interval_is_rejected() {
        let err = is_overdue(date(2020, 1, 1), -1, date(2020, 1, 1)).unwrap_err();
        assert!(matches!(err, MaintenanceError::Validation(_)));
    }

    #[test]
    fn parses_date_portion_of_timestamps() {
        assert_eq!(parse_action_date("2020-01-01").unwrap(), date(2020, 1, 1));
        assert_eq!(
            parse_action_date("2020-01-01 13:45:10.123").unwrap(),
            date(2020, 1, 1)
        );
        assert_eq!(
            parse_action_date("2019-11-30T00:00:00+00").unwrap(),
            date(2019, 11, 30)
        );
    }

    #[test]
    fn rejects_malformed_dates() {
        for text in ["", "2020-1-1", "01/02/2020", "2020-13-01", "garbage-in"] {
            let err = parse_action_date(text).unwrap_err();
            assert!(matches!(err, MaintenanceError::InvalidDateFormat(_)), "{text}");
        }
    }
}
