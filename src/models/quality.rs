use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{f64_field, parse_ts, str_field};

/// One physico-chemical analysis headed for `measure_quality`. Key is
/// `(station_code, param_code, ts)`; sub-daily analyses are legitimate.
#[derive(Debug, Clone)]
pub struct QualityRecord {
    pub station_code: String,
    pub param_code: String,
    pub ts: DateTime<Utc>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub quality: Option<String>,
    pub source: String,
}

impl QualityRecord {
    pub fn from_raw(raw: &Value, source: &str) -> Option<Self> {
        let station_code = str_field(raw, &["code_bss", "code_station"])?;
        let param_code = str_field(raw, &["code_parametre"])?;
        let ts_raw = str_field(raw, &["date_prelevement", "date_debut_prelevement"])?;
        let ts = parse_ts(&ts_raw)?;

        Some(Self {
            station_code,
            param_code,
            ts,
            value: f64_field(raw, &["resultat"]),
            unit: str_field(raw, &["code_unite", "symbole_unite"]),
            quality: str_field(raw, &["code_remarque"]),
            source: source.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn groundwater_analysis_maps_code_bss() {
        let raw = json!({
            "code_bss": "BSS0001",
            "code_parametre": "1340",
            "date_debut_prelevement": "2024-10-02",
            "resultat": 24.0,
            "code_unite": "162",
            "code_remarque": "1"
        });
        let q = QualityRecord::from_raw(&raw, "hubeau_quality_groundwater").unwrap();
        assert_eq!(q.station_code, "BSS0001");
        assert_eq!(q.param_code, "1340");
        assert_eq!(q.value, Some(24.0));
        assert_eq!(q.unit.as_deref(), Some("162"));
    }

    #[test]
    fn missing_param_code_drops_the_record() {
        let raw = json!({"code_station": "S1", "date_prelevement": "2024-10-02"});
        assert!(QualityRecord::from_raw(&raw, "s").is_none());
    }
}
