use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{f64_field, parse_ts, str_field};

/// One meteo grid-cell observation: precipitation, 2m temperature and
/// evapotranspiration at (lon, lat). Series rows reference the grid cell.
#[derive(Debug, Clone)]
pub struct MeteoRecord {
    pub lon: f64,
    pub lat: f64,
    pub ts: DateTime<Utc>,
    pub prcp: Option<f64>,
    pub t2m: Option<f64>,
    pub etp: Option<f64>,
}

impl MeteoRecord {
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let lon = f64_field(raw, &["lon", "longitude"])?;
        let lat = f64_field(raw, &["lat", "latitude"])?;
        let ts_raw = str_field(raw, &["ts", "date", "time"])?;
        Some(Self {
            lon,
            lat,
            ts: parse_ts(&ts_raw)?,
            prcp: f64_field(raw, &["prcp", "precipitation"]),
            t2m: f64_field(raw, &["t2m", "temperature"]),
            etp: f64_field(raw, &["etp"]),
        })
    }

    /// Grid cells are keyed on the exact (lon, lat) pair.
    pub fn cell(&self) -> (f64, f64) {
        (self.lon, self.lat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn grid_observation_projection() {
        let raw = json!({
            "lon": 2.3522, "lat": 48.8566,
            "ts": "2024-10-02T06:00:00Z",
            "prcp": 2.5, "t2m": 12.5, "etp": 0.5
        });
        let m = MeteoRecord::from_raw(&raw).unwrap();
        assert_eq!(m.cell(), (2.3522, 48.8566));
        assert_eq!(m.prcp, Some(2.5));
    }

    #[test]
    fn cell_without_coordinates_is_dropped() {
        assert!(MeteoRecord::from_raw(&json!({"ts": "2024-10-02"})).is_none());
    }
}
