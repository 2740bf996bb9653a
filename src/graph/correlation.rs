use std::collections::BTreeMap;

use chrono::NaiveDate;

/// Pearson correlation of two equally-long samples. None when either side
/// has zero variance or the samples are shorter than two points.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len();
    if n != ys.len() || n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean_x = xs.iter().sum::<f64>() / nf;
    let mean_y = ys.iter().sum::<f64>() / nf;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

/// Day-bucketed series for one station.
pub type DailySeries = BTreeMap<NaiveDate, f64>;

/// Align two daily series on their shared days, preserving day order.
pub fn align(a: &DailySeries, b: &DailySeries) -> (Vec<f64>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (day, x) in a {
        if let Some(y) = b.get(day) {
            xs.push(*x);
            ys.push(*y);
        }
    }
    (xs, ys)
}

/// Correlate two stations' daily series: align, check the overlap floor,
/// then Pearson.
pub fn correlate(a: &DailySeries, b: &DailySeries, min_overlap: usize) -> Option<f64> {
    let (xs, ys) = align(a, b);
    if xs.len() < min_overlap {
        return None;
    }
    pearson(&xs, &ys)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(values: &[(u32, f64)]) -> DailySeries {
        values
            .iter()
            .map(|(d, v)| (NaiveDate::from_ymd_opt(2024, 10, *d).unwrap(), *v))
            .collect()
    }

    #[test]
    fn perfectly_linear_series_correlate_at_one() {
        let a = series(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0)]);
        let b = series(&[(1, 10.0), (2, 20.0), (3, 30.0), (4, 40.0)]);
        let rho = correlate(&a, &b, 2).unwrap();
        assert!((rho - 1.0).abs() < 1e-12);
    }

    #[test]
    fn inverted_series_correlate_at_minus_one() {
        let a = series(&[(1, 1.0), (2, 2.0), (3, 3.0)]);
        let b = series(&[(1, 3.0), (2, 2.0), (3, 1.0)]);
        let rho = correlate(&a, &b, 2).unwrap();
        assert!((rho + 1.0).abs() < 1e-12);
    }

    #[test]
    fn constant_series_has_no_correlation() {
        let a = series(&[(1, 5.0), (2, 5.0), (3, 5.0)]);
        let b = series(&[(1, 1.0), (2, 2.0), (3, 3.0)]);
        assert!(correlate(&a, &b, 2).is_none());
    }

    #[test]
    fn overlap_floor_suppresses_noise() {
        let a = series(&[(1, 1.0), (2, 2.0)]);
        let b = series(&[(1, 1.0), (2, 2.0)]);
        assert!(correlate(&a, &b, 10).is_none());
        assert!(correlate(&a, &b, 2).is_some());
    }

    #[test]
    fn alignment_uses_shared_days_only() {
        let a = series(&[(1, 1.0), (2, 2.0), (5, 9.0)]);
        let b = series(&[(2, 4.0), (5, 10.0), (7, 0.0)]);
        let (xs, ys) = align(&a, &b);
        assert_eq!(xs, vec![2.0, 9.0]);
        assert_eq!(ys, vec![4.0, 10.0]);
    }
}
