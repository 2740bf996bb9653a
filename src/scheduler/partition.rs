use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Partition cadence. Keys are `YYYY-MM-DD` (daily), ISO `YYYY-Www`
/// (weekly) or `YYYY-MM` (monthly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Daily,
    Weekly,
    Monthly,
}

/// `(start_date, cadence)`. The set of valid keys is
/// `{bucket(start_date), …, bucket(today - 1)}`.
#[derive(Debug, Clone, Copy)]
pub struct PartitionSpec {
    pub start: NaiveDate,
    pub cadence: Cadence,
}

impl PartitionSpec {
    pub const fn daily(start: NaiveDate) -> Self {
        Self { start, cadence: Cadence::Daily }
    }

    pub const fn weekly(start: NaiveDate) -> Self {
        Self { start, cadence: Cadence::Weekly }
    }

    pub const fn monthly(start: NaiveDate) -> Self {
        Self { start, cadence: Cadence::Monthly }
    }

    /// The partition key of the bucket containing `day`. This is also how
    /// cross-granularity dependencies resolve: a daily child of a weekly
    /// parent requires the weekly bucket containing its day.
    pub fn key_for(&self, day: NaiveDate) -> String {
        match self.cadence {
            Cadence::Daily => day.format("%Y-%m-%d").to_string(),
            Cadence::Weekly => {
                let week = day.iso_week();
                format!("{:04}-W{:02}", week.year(), week.week())
            }
            Cadence::Monthly => day.format("%Y-%m").to_string(),
        }
    }

    /// Parse a key back to the first day of its bucket. None for a key
    /// that is not in this spec's canonical form.
    pub fn parse_key(&self, key: &str) -> Option<NaiveDate> {
        match self.cadence {
            Cadence::Daily => NaiveDate::parse_from_str(key, "%Y-%m-%d").ok(),
            Cadence::Weekly => {
                let (year, week) = key.split_once("-W")?;
                NaiveDate::from_isoywd_opt(
                    year.parse().ok()?,
                    week.parse().ok()?,
                    Weekday::Mon,
                )
            }
            Cadence::Monthly => {
                let (year, month) = key.split_once('-')?;
                NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
            }
        }
    }

    /// Enumerate the valid partition keys as of `today`, oldest first.
    pub fn keys(&self, today: NaiveDate) -> Vec<String> {
        let mut out = Vec::new();
        let end = today - Duration::days(1);
        let mut day = self.start;
        let mut last: Option<String> = None;
        while day <= end {
            let key = self.key_for(day);
            if last.as_deref() != Some(key.as_str()) {
                out.push(key.clone());
                last = Some(key);
            }
            day += Duration::days(1);
        }
        out
    }

    /// Is `key` a member of the valid partition set as of `today`?
    pub fn is_valid(&self, key: &str, today: NaiveDate) -> bool {
        let Some(bucket_start) = self.parse_key(key) else {
            return false;
        };
        // Reject non-canonical spellings (e.g. a mid-week date for weekly).
        if self.key_for(bucket_start) != key {
            return false;
        }
        let first_bucket = self.parse_key(&self.key_for(self.start)).unwrap_or(self.start);
        bucket_start >= first_bucket && bucket_start <= today - Duration::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn daily_keys() {
        let spec = PartitionSpec::daily(d(2024, 9, 1));
        assert_eq!(spec.key_for(d(2024, 10, 2)), "2024-10-02");
        assert!(spec.is_valid("2024-10-02", d(2024, 10, 3)));
        // Today's partition is not yet valid.
        assert!(!spec.is_valid("2024-10-03", d(2024, 10, 3)));
        // Before the partition start.
        assert!(!spec.is_valid("2024-08-31", d(2024, 10, 3)));
        assert!(!spec.is_valid("not-a-date", d(2024, 10, 3)));
    }

    #[test]
    fn weekly_bucket_mapping() {
        let spec = PartitionSpec::weekly(d(2024, 1, 1));
        // 2024-10-02 is a Wednesday in ISO week 40.
        assert_eq!(spec.key_for(d(2024, 10, 2)), "2024-W40");
        assert_eq!(spec.parse_key("2024-W40"), Some(d(2024, 9, 30)));
        assert!(spec.is_valid("2024-W40", d(2024, 10, 2)));
        // A daily-shaped key is not canonical for a weekly spec.
        assert!(!spec.is_valid("2024-10-02", d(2024, 10, 3)));
    }

    #[test]
    fn monthly_bucket_mapping() {
        let spec = PartitionSpec::monthly(d(2024, 1, 1));
        assert_eq!(spec.key_for(d(2024, 10, 2)), "2024-10");
        assert_eq!(spec.parse_key("2024-10"), Some(d(2024, 10, 1)));
        assert!(spec.is_valid("2024-09", d(2024, 10, 2)));
    }

    #[test]
    fn key_enumeration_stops_at_yesterday() {
        let spec = PartitionSpec::daily(d(2024, 9, 28));
        assert_eq!(
            spec.keys(d(2024, 10, 1)),
            vec!["2024-09-28", "2024-09-29", "2024-09-30"]
        );

        let weekly = PartitionSpec::weekly(d(2024, 9, 16));
        // Weeks 38, 39 and 40 have started by 2024-10-02; each appears once.
        assert_eq!(weekly.keys(d(2024, 10, 2)), vec!["2024-W38", "2024-W39", "2024-W40"]);
    }

    #[test]
    fn iso_week_year_boundary() {
        let spec = PartitionSpec::weekly(d(2024, 1, 1));
        // 2024-12-30 is a Monday belonging to ISO week 1 of 2025.
        assert_eq!(spec.key_for(d(2024, 12, 30)), "2025-W01");
        assert_eq!(spec.parse_key("2025-W01"), Some(d(2024, 12, 30)));
    }

    #[test]
    fn cross_granularity_child_uses_containing_bucket() {
        // A daily child of a weekly parent: the parent key for the child's
        // day is the weekly bucket containing it.
        let weekly_parent = PartitionSpec::weekly(d(2024, 1, 1));
        let child_day = d(2024, 10, 2);
        assert_eq!(weekly_parent.key_for(child_day), "2024-W40");

        let monthly_parent = PartitionSpec::monthly(d(2024, 1, 1));
        assert_eq!(monthly_parent.key_for(child_day), "2024-10");
    }
}
