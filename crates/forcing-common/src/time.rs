//! Time ranges and partitioning of the virtual time axis.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

/// Parse a timestamp, assuming UTC when no offset is given.
///
/// Accepts RFC 3339, `%Y-%m-%dT%H:%M:%S`, `%Y-%m-%d %H:%M:%S`,
/// `%Y-%m-%d %H:%M`, `%Y%m%d%H` and a bare `%Y-%m-%d` date.
pub fn parse_datetime(s: &str) -> CommonResult<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y%m%d%H", "%Y-%m-%d"]
        .iter()
        .find_map(|format| parse_with_format(s, format))
        .ok_or_else(|| CommonError::invalid_time(format!("unrecognised timestamp '{}'", s)))
}

/// Parse a naive UTC timestamp with a `chrono` format string.
///
/// chrono refuses a time without minutes, so formats that stop at `%H`
/// (such as the `%Y%m%d%H` file name stamps) are completed with `:00`.
/// Date-only formats resolve to midnight.
pub fn parse_with_format(s: &str, format: &str) -> Option<DateTime<Utc>> {
    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, format) {
        return Some(Utc.from_utc_datetime(&ndt));
    }
    if format.contains("%H") && !format.contains("%M") {
        let padded = format!("{}:00", s);
        let format = format!("{}:%M", format);
        if let Ok(ndt) = NaiveDateTime::parse_from_str(&padded, &format) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    NaiveDate::parse_from_str(s, format)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}

/// Inclusive range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CommonResult<Self> {
        if start > end {
            return Err(CommonError::invalid_time(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn parse(start: &str, end: &str) -> CommonResult<Self> {
        Self::new(parse_datetime(start)?, parse_datetime(end)?)
    }

    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        dt >= &self.start && dt <= &self.end
    }

    /// Calendar years touched by the range, in order.
    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start.year()..=self.end.year()
    }
}

/// A contiguous run of entries `[start, end)` on the virtual time axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePartition {
    pub index: usize,
    pub start: usize,
    pub end: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TimePartition {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `times` into contiguous partitions of at most `size` entries.
///
/// Partitions cover every entry exactly once, in order; only the last may
/// be shorter than `size`.
pub fn plan_partitions(times: &[DateTime<Utc>], size: usize) -> CommonResult<Vec<TimePartition>> {
    if size == 0 {
        return Err(CommonError::invalid_time("partition size must be at least 1"));
    }

    Ok(times
        .chunks(size)
        .enumerate()
        .map(|(index, chunk)| {
            let start = index * size;
            TimePartition {
                index,
                start,
                end: start + chunk.len(),
                start_time: chunk[0],
                end_time: chunk[chunk.len() - 1],
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Timelike};

    fn hourly(n: usize) -> Vec<DateTime<Utc>> {
        let t0 = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        (0..n).map(|i| t0 + Duration::hours(i as i64)).collect()
    }

    #[test]
    fn test_parse_formats() {
        let expected = Utc.with_ymd_and_hms(2019, 6, 30, 12, 0, 0).unwrap();
        assert_eq!(parse_datetime("2019-06-30T12:00:00Z").unwrap(), expected);
        assert_eq!(parse_datetime("2019-06-30 12:00:00").unwrap(), expected);
        assert_eq!(parse_datetime("2019063012").unwrap(), expected);
        assert_eq!(parse_datetime("2019-06-30").unwrap().hour(), 0);
        assert!(parse_datetime("yesterday").is_err());
        assert_eq!(parse_with_format("2019063012", "%Y%m%d%H"), Some(expected));
        assert_eq!(parse_with_format("20190630", "%Y%m%d%H"), None);
    }

    #[test]
    fn test_range_rejects_reversed() {
        assert!(TimeRange::parse("2020-01-02", "2020-01-01").is_err());
        let range = TimeRange::parse("2019-12-31 23:00:00", "2021-01-01").unwrap();
        assert_eq!(range.years().collect::<Vec<_>>(), vec![2019, 2020, 2021]);
    }

    #[test]
    fn test_plan_partitions_covers_everything() {
        let times = hourly(25);
        let parts = plan_partitions(&times, 10).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!((parts[0].start, parts[0].end), (0, 10));
        assert_eq!((parts[2].start, parts[2].end), (20, 25));
        assert_eq!(parts[2].start_time, times[20]);
        assert_eq!(parts[2].end_time, times[24]);
        assert_eq!(parts.iter().map(|p| p.len()).sum::<usize>(), 25);

        assert!(plan_partitions(&times, 0).is_err());
        assert!(plan_partitions(&[], 4).unwrap().is_empty());
    }
}
