//! Decomposes a date interval into the minimal set of upstream requests.
//!
//! The store only accepts coarse calendar selectors (year / month / day
//! lists), so an arbitrary interval is covered recursively with whole-year,
//! whole-month and partial-month requests. Days on or after the break
//! threshold are requested one at a time: the store serves very recent data
//! unreliably in bulk form, and a bulk request that touches that window
//! silently produces malformed files.

use chrono::{Datelike, Duration, NaiveDate};
use tracing::debug;

/// Days between "now" and the break threshold.
pub const BREAK_LAG_DAYS: i64 = 14;

/// Calendar selectors for one request, in the form the store API expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSelector {
    pub year: String,
    pub month: Vec<String>,
    pub day: Vec<String>,
    pub time: Vec<String>,
}

/// One atomic request unit. `end == None` marks a single-day request from the
/// recent-data regime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub selector: TimeSelector,
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

impl Partition {
    /// Last calendar day covered by this partition.
    pub fn last_day(&self) -> NaiveDate {
        self.end.unwrap_or(self.start)
    }

    /// Date-range tag used in raw file names, hourly resolution.
    pub fn file_tag(&self) -> String {
        format!(
            "{}00-{}23",
            self.start.format("%Y%m%d"),
            self.last_day().format("%Y%m%d")
        )
    }
}

/// Break threshold for a run planned on `today`.
pub fn break_threshold(today: NaiveDate) -> NaiveDate {
    today - Duration::days(BREAK_LAG_DAYS)
}

/// Plans the ordered request partitions covering `[start, end]`, both
/// inclusive. Inputs must already be validated (`start <= end`).
pub fn plan(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> Vec<Partition> {
    let t_break = break_threshold(today);
    debug!("break threshold {t_break} (today - {BREAK_LAG_DAYS} days)");

    let mut partitions = Vec::new();
    for year in start.year()..=end.year() {
        let year_start = NaiveDate::from_ymd_opt(year, 1, 1).unwrap();
        let year_end = NaiveDate::from_ymd_opt(year, 12, 31).unwrap();
        let t0 = year_start.max(start);
        let t1 = year_end.min(end);

        if t1 < t_break {
            partitions.extend(split_year(t0, t1));
        } else if t0 < t_break {
            partitions.extend(split_year(t0, t_break));
            let mut day = t_break + Duration::days(1);
            while day <= t1 {
                partitions.push(single_day(day));
                day += Duration::days(1);
            }
        } else {
            let mut day = t0;
            while day <= t1 {
                partitions.push(single_day(day));
                day += Duration::days(1);
            }
        }
    }

    for partition in &partitions {
        match partition.end {
            Some(end) => debug!("partition {} / {}", partition.start, end),
            None => debug!("partition {}", partition.start),
        }
    }
    partitions
}

fn all_months() -> Vec<String> {
    (1..=12).map(|m| format!("{m:02}")).collect()
}

fn all_days() -> Vec<String> {
    (1..=31).map(|d| format!("{d:02}")).collect()
}

fn all_hours() -> Vec<String> {
    (0..24).map(|h| format!("{h:02}:00")).collect()
}

fn single_day(day: NaiveDate) -> Partition {
    Partition {
        selector: TimeSelector {
            year: day.format("%Y").to_string(),
            month: vec![day.format("%m").to_string()],
            day: vec![day.format("%d").to_string()],
            time: all_hours(),
        },
        start: day,
        end: None,
    }
}

fn is_end_of_month(day: NaiveDate) -> bool {
    (day + Duration::days(1)).day() == 1
}

/// Minimal covering set of {whole-year, whole-month, day-range} requests for
/// an interval inside one calendar year. Intervals that cross a month
/// boundary partially are split at the boundary that leaves exactly one side
/// with a clean full-month edge, then both sides recurse.
fn split_year(t0: NaiveDate, t1: NaiveDate) -> Vec<Partition> {
    let year = t0.format("%Y").to_string();

    // Whole calendar year.
    if t0.month() == 1 && t0.day() == 1 && t1.month() == 12 && t1.day() == 31 {
        return vec![Partition {
            selector: TimeSelector {
                year,
                month: all_months(),
                day: all_days(),
                time: all_hours(),
            },
            start: t0,
            end: Some(t1),
        }];
    }

    // Day range inside one month.
    if t0.month() == t1.month() {
        return vec![Partition {
            selector: TimeSelector {
                year,
                month: vec![t0.format("%m").to_string()],
                day: (t0.day()..=t1.day()).map(|d| format!("{d:02}")).collect(),
                time: all_hours(),
            },
            start: t0,
            end: Some(t1),
        }];
    }

    // Run of whole months.
    if t0.day() == 1 && is_end_of_month(t1) {
        return vec![Partition {
            selector: TimeSelector {
                year,
                month: (t0.month()..=t1.month()).map(|m| format!("{m:02}")).collect(),
                day: all_days(),
                time: all_hours(),
            },
            start: t0,
            end: Some(t1),
        }];
    }

    // Partial crossing: cut so one side gains a full-month edge.
    let right_start = if t0.day() == 1 {
        // Left half becomes a run of whole months, right half is the ragged tail.
        NaiveDate::from_ymd_opt(t1.year(), t1.month(), 1).unwrap()
    } else {
        // Left half is the ragged head, right half starts on a month boundary.
        NaiveDate::from_ymd_opt(t0.year(), t0.month() + 1, 1).unwrap()
    };
    let left_end = right_start - Duration::days(1);

    let mut partitions = split_year(t0, left_end);
    partitions.extend(split_year(right_start, t1));
    partitions
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// Union of the day ranges covered by a partition list.
    fn covered_days(partitions: &[Partition]) -> Vec<NaiveDate> {
        let mut days = Vec::new();
        for partition in partitions {
            let mut day = partition.start;
            while day <= partition.last_day() {
                days.push(day);
                day += Duration::days(1);
            }
        }
        days
    }

    #[test]
    fn should_emit_single_partition_for_whole_year() {
        let parts = plan(date(2015, 1, 1), date(2015, 12, 31), date(2020, 1, 1));

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].selector.month.len(), 12);
        assert_eq!(parts[0].selector.day.len(), 31);
        assert_eq!(parts[0].selector.time.len(), 24);
        assert_eq!(parts[0].end, Some(date(2015, 12, 31)));
    }

    #[test]
    fn should_split_partial_months_at_boundaries() {
        // 2015-01-07 / 2015-03-17: ragged head, full February, ragged tail.
        let parts = plan(date(2015, 1, 7), date(2015, 3, 17), date(2020, 1, 1));

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].start, date(2015, 1, 7));
        assert_eq!(parts[0].end, Some(date(2015, 1, 31)));
        assert_eq!(parts[1].start, date(2015, 2, 1));
        assert_eq!(parts[1].end, Some(date(2015, 2, 28)));
        assert_eq!(parts[1].selector.day.len(), 31);
        assert_eq!(parts[2].start, date(2015, 3, 1));
        assert_eq!(parts[2].end, Some(date(2015, 3, 17)));
        assert_eq!(parts[2].selector.day.len(), 17);
    }

    #[test]
    fn should_reconstruct_period_without_gaps_or_overlaps() {
        let start = date(2014, 11, 13);
        let end = date(2016, 2, 5);
        let parts = plan(start, end, date(2020, 1, 1));

        let days = covered_days(&parts);
        let mut expected = Vec::new();
        let mut day = start;
        while day <= end {
            expected.push(day);
            day += Duration::days(1);
        }
        assert_eq!(days, expected);
    }

    #[test]
    fn should_emit_single_day_partitions_after_break() {
        // Everything requested lies after the break threshold.
        let parts = plan(date(2022, 7, 2), date(2022, 7, 5), date(2022, 7, 10));

        assert_eq!(parts.len(), 4);
        for (offset, partition) in parts.iter().enumerate() {
            assert_eq!(partition.start, date(2022, 7, 2 + offset as u32));
            assert_eq!(partition.end, None);
            assert_eq!(partition.selector.day.len(), 1);
        }
    }

    #[test]
    fn should_switch_to_single_days_at_break() {
        // today = 2022-07-15, break = 2022-07-01. The bulk half covers
        // June 25-30 plus the break day itself, the rest is day by day.
        let parts = plan(date(2022, 6, 25), date(2022, 7, 5), date(2022, 7, 15));

        assert_eq!(parts.len(), 6);
        assert_eq!(parts[0].start, date(2022, 6, 25));
        assert_eq!(parts[0].end, Some(date(2022, 6, 30)));
        assert_eq!(parts[1].start, date(2022, 7, 1));
        assert_eq!(parts[1].end, Some(date(2022, 7, 1)));
        for partition in &parts[2..] {
            assert_eq!(partition.end, None);
        }
        assert_eq!(parts[5].start, date(2022, 7, 5));

        // The union still reconstructs the requested period exactly.
        let days = covered_days(&parts);
        assert_eq!(days.len(), 11);
        assert_eq!(days[0], date(2022, 6, 25));
        assert_eq!(days[10], date(2022, 7, 5));
    }

    #[test]
    fn should_format_file_tag_with_hours() {
        let partition = single_day(date(2022, 7, 2));
        assert_eq!(partition.file_tag(), "2022070200-2022070223");
    }
}
