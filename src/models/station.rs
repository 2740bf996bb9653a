use serde_json::Value;

use super::{f64_field, str_field};

/// Station referential row headed for `station_meta`. Coordinates are kept
/// raw here: either lon/lat (WGS84) or a projected Lambert-93 pair; the
/// warehouse computes the geography column, preferring lon/lat.
#[derive(Debug, Clone)]
pub struct StationRecord {
    pub station_code: String,
    pub label: Option<String>,
    pub station_type: String,
    pub insee: Option<String>,
    pub masse_eau_code: Option<String>,
    pub reseau: Option<String>,
    pub lon: Option<f64>,
    pub lat: Option<f64>,
    pub x2154: Option<f64>,
    pub y2154: Option<f64>,
}

/// `codes_bdlisa` comes as a comma-separated list; the first code wins.
fn first_bdlisa(codes: Option<String>) -> Option<String> {
    let codes = codes?;
    let first = codes.split(',').next()?.trim();
    if first.is_empty() { None } else { Some(first.to_string()) }
}

impl StationRecord {
    /// Per-API projection of a raw stations record. Field names differ
    /// across the API family; the mappings below are authoritative.
    pub fn from_api(api: &str, raw: &Value) -> Option<Self> {
        match api {
            "piezo" => {
                let code = str_field(raw, &["bss_id", "code_bss", "code_station"])?;
                // lon/lat arrive as geometry.coordinates, X/Y as Lambert-93.
                let coords = raw
                    .get("geometry")
                    .and_then(|g| g.get("coordinates"))
                    .and_then(Value::as_array);
                let lon = coords.and_then(|c| c.first()).and_then(Value::as_f64);
                let lat = coords.and_then(|c| c.get(1)).and_then(Value::as_f64);
                Some(Self {
                    station_code: code,
                    label: str_field(raw, &["libelle_pe", "nom_commune"]),
                    station_type: "piezo".into(),
                    insee: str_field(raw, &["code_commune_insee"]),
                    masse_eau_code: first_bdlisa(str_field(raw, &["codes_bdlisa"])),
                    reseau: str_field(raw, &["code_entite"]),
                    lon,
                    lat,
                    x2154: f64_field(raw, &["x"]),
                    y2154: f64_field(raw, &["y"]),
                })
            }
            "hydro" => {
                let code = str_field(raw, &["code_station"])?;
                Some(Self {
                    station_code: code,
                    label: str_field(raw, &["libelle_station", "libelle_site"]),
                    station_type: "hydro".into(),
                    insee: str_field(raw, &["code_commune_station", "code_commune_site"]),
                    masse_eau_code: str_field(raw, &["code_masse_eau"]),
                    reseau: None,
                    lon: f64_field(raw, &["longitude_station", "longitude"]),
                    lat: f64_field(raw, &["latitude_station", "latitude"]),
                    x2154: f64_field(raw, &["coordonnee_x_station"]),
                    y2154: f64_field(raw, &["coordonnee_y_station"]),
                })
            }
            "temperature" => {
                let code = str_field(raw, &["code_station"])?;
                Some(Self {
                    station_code: code,
                    label: str_field(raw, &["libelle_station"]),
                    station_type: "temp".into(),
                    insee: str_field(raw, &["code_commune"]),
                    masse_eau_code: str_field(raw, &["code_masse_eau"]),
                    reseau: None,
                    lon: f64_field(raw, &["longitude"]),
                    lat: f64_field(raw, &["latitude"]),
                    x2154: f64_field(raw, &["coordonnee_x"]),
                    y2154: f64_field(raw, &["coordonnee_y"]),
                })
            }
            "quality_surface" => {
                let code = str_field(raw, &["code_station"])?;
                Some(Self {
                    station_code: code,
                    label: str_field(raw, &["libelle_station", "libelle"]),
                    station_type: "quality".into(),
                    insee: str_field(raw, &["code_commune"]),
                    masse_eau_code: str_field(raw, &["code_masse_eau"]),
                    reseau: None,
                    lon: f64_field(raw, &["longitude", "lon"]),
                    lat: f64_field(raw, &["latitude", "lat"]),
                    x2154: f64_field(raw, &["coordonnee_x"]),
                    y2154: f64_field(raw, &["coordonnee_y"]),
                })
            }
            _ => None,
        }
    }

    /// True when the row carries either a WGS84 pair or a projected pair.
    pub fn has_position(&self) -> bool {
        (self.lon.is_some() && self.lat.is_some())
            || (self.x2154.is_some() && self.y2154.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn piezo_station_from_geometry_coordinates() {
        let raw = json!({
            "bss_id": "BSS000ABCD",
            "libelle_pe": "Forage des Brosses",
            "code_commune_insee": "45123",
            "codes_bdlisa": "121AA01,121AB03",
            "code_entite": "GG063",
            "geometry": {"type": "Point", "coordinates": [2.35, 48.85]}
        });
        let s = StationRecord::from_api("piezo", &raw).unwrap();
        assert_eq!(s.station_code, "BSS000ABCD");
        assert_eq!(s.masse_eau_code.as_deref(), Some("121AA01"));
        assert_eq!(s.reseau.as_deref(), Some("GG063"));
        assert_eq!(s.lon, Some(2.35));
        assert_eq!(s.lat, Some(48.85));
        assert!(s.has_position());
    }

    #[test]
    fn hydro_station_with_projected_pair_only() {
        let raw = json!({
            "code_station": "H123456789",
            "libelle_station": "La Loire à Gien",
            "code_commune_station": "45155",
            "coordonnee_x_station": 652000.0,
            "coordonnee_y_station": 6862000.0
        });
        let s = StationRecord::from_api("hydro", &raw).unwrap();
        assert!(s.lon.is_none());
        assert_eq!(s.x2154, Some(652000.0));
        assert!(s.has_position());
    }

    #[test]
    fn station_without_any_position() {
        let raw = json!({"code_station": "T1"});
        let s = StationRecord::from_api("temperature", &raw).unwrap();
        assert!(!s.has_position());
    }

    #[test]
    fn unknown_api_yields_nothing() {
        assert!(StationRecord::from_api("nope", &json!({"code_station": "x"})).is_none());
    }
}
