use std::collections::HashMap;

/// WGS84 mean sphere radius. All proximity distances use this one formula;
/// no alternate distance computation exists anywhere else.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two WGS84 points, km.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// A station with a known position.
#[derive(Debug, Clone)]
pub struct Positioned {
    pub code: String,
    pub lat: f64,
    pub lon: f64,
}

/// All unordered station pairs within `radius_km`, with their distance.
///
/// A coarse degree grid keeps this away from O(N²): candidates are only
/// compared within neighboring cells. The cell edge is sized so that a
/// ±1-cell scan covers the radius for |lat| < 60°, which holds for the
/// metropolitan station network.
pub fn near_pairs(stations: &[Positioned], radius_km: f64) -> Vec<(usize, usize, f64)> {
    let cell_deg = (radius_km / 55.0).max(0.1);
    let cell_of = |lat: f64, lon: f64| -> (i32, i32) {
        ((lat / cell_deg).floor() as i32, (lon / cell_deg).floor() as i32)
    };

    let mut grid: HashMap<(i32, i32), Vec<usize>> = HashMap::new();
    for (idx, s) in stations.iter().enumerate() {
        grid.entry(cell_of(s.lat, s.lon)).or_default().push(idx);
    }

    let mut pairs = Vec::new();
    for (idx, s) in stations.iter().enumerate() {
        let (ci, cj) = cell_of(s.lat, s.lon);
        for di in -1..=1 {
            for dj in -1..=1 {
                let Some(candidates) = grid.get(&(ci + di, cj + dj)) else {
                    continue;
                };
                for &other in candidates {
                    if other <= idx {
                        continue;
                    }
                    let o = &stations[other];
                    let distance = haversine_km(s.lat, s.lon, o.lat, o.lon);
                    if distance <= radius_km {
                        pairs.push((idx, other, distance));
                    }
                }
            }
        }
    }
    pairs
}
