pub mod measures;
pub mod meteo;
pub mod params;
pub mod quality;
pub mod stations;

use std::collections::HashSet;
use std::hash::Hash;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

/// UTC day window `[day, day + 1)` used by the partition-scoped
/// delete-then-insert protocol.
pub(crate) fn day_window(day: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&day.and_hms_opt(0, 0, 0).expect("midnight exists"));
    (start, start + chrono::Duration::days(1))
}

/// Keep the first row per key. A bulk `ON CONFLICT DO UPDATE` statement
/// must not touch the same primary key twice, so batches are de-duplicated
/// in memory before they are pushed.
pub(crate) fn dedup_by_key<T, K, F>(items: Vec<T>, key_fn: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen: HashSet<K> = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|item| seen.insert(key_fn(item)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_window_is_half_open() {
        let day = NaiveDate::from_ymd_opt(2024, 10, 2).unwrap();
        let (start, end) = day_window(day);
        assert_eq!(start.to_rfc3339(), "2024-10-02T00:00:00+00:00");
        assert_eq!(end.to_rfc3339(), "2024-10-03T00:00:00+00:00");
    }

    #[test]
    fn dedup_by_key_keeps_first() {
        let items = vec![("a", 1), ("b", 2), ("a", 3)];
        let kept = dedup_by_key(items, |(k, _)| *k);
        assert_eq!(kept, vec![("a", 1), ("b", 2)]);
    }
}
