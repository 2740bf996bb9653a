use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{f64_field, parse_ts, str_field};

/// One normalized time-series observation headed for the `measure` table.
/// Primary key downstream is `(station_code, theme, ts)`.
#[derive(Debug, Clone)]
pub struct MeasureRecord {
    pub station_code: String,
    pub theme: String,
    pub ts: DateTime<Utc>,
    pub value: Option<f64>,
    pub quality: Option<String>,
    pub source: String,
}

impl MeasureRecord {
    /// Project a raw record into the measure column set. The fallback
    /// chains are fixed per theme; records without a station code or
    /// timestamp are dropped.
    pub fn from_raw(raw: &Value, theme: &str, source: &str) -> Option<Self> {
        let station_code = str_field(
            raw,
            &["bss_id", "code_bss", "code_station", "code_site", "code_ouvrage", "station"],
        )?;

        let ts_raw = str_field(
            raw,
            &[
                "date_mesure",
                "date_obs",
                "date_mesure_temp",
                "date_observation",
                "date_prelevement",
                "date_time",
                "timestamp",
            ],
        )?;
        let ts = parse_ts(&ts_raw)?;

        let value = match theme {
            "piezo" => f64_field(raw, &["niveau_nappe", "valeur", "niveau"]),
            "hydro" => f64_field(raw, &["resultat_obs", "hauteur_eau", "debit", "valeur"]),
            "temperature" => f64_field(raw, &["temperature", "resultat", "valeur"]),
            "ecoulement" => f64_field(raw, &["code_ecoulement", "valeur"]),
            "hydrobiologie" => f64_field(raw, &["resultat_indice", "valeur"]),
            "prelevements" => f64_field(raw, &["volume", "valeur"]),
            _ => f64_field(raw, &["valeur", "resultat"]),
        };

        let quality = str_field(raw, &["code_qualite", "qualite", "code_qualification"]);

        Some(Self {
            station_code,
            theme: theme.to_string(),
            ts,
            value,
            quality,
            source: source.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn piezo_value_fallback_chain() {
        let raw = json!({
            "code_bss": "BSS000XYZ",
            "date_mesure": "2024-10-02T06:00:00",
            "niveau_nappe": 12.5,
            "code_qualite": "1"
        });
        let m = MeasureRecord::from_raw(&raw, "piezo", "hubeau_piezo").unwrap();
        assert_eq!(m.station_code, "BSS000XYZ");
        assert_eq!(m.value, Some(12.5));
        assert_eq!(m.quality.as_deref(), Some("1"));

        let raw = json!({
            "code_bss": "BSS000XYZ",
            "date_mesure": "2024-10-02",
            "valeur": 3.0
        });
        let m = MeasureRecord::from_raw(&raw, "piezo", "hubeau_piezo").unwrap();
        assert_eq!(m.value, Some(3.0));
    }

    #[test]
    fn missing_station_or_timestamp_drops_the_record() {
        let raw = json!({"date_mesure": "2024-10-02", "valeur": 1.0});
        assert!(MeasureRecord::from_raw(&raw, "piezo", "s").is_none());

        let raw = json!({"code_bss": "X", "valeur": 1.0});
        assert!(MeasureRecord::from_raw(&raw, "piezo", "s").is_none());
    }

    #[test]
    fn prelevement_rows_key_on_the_ouvrage() {
        let raw = json!({
            "code_ouvrage": "OPR0000001",
            "date_prelevement": "2024-10-02T09:15:00",
            "volume": 1250.0
        });
        let m = MeasureRecord::from_raw(&raw, "prelevements", "hubeau_prelevements").unwrap();
        assert_eq!(m.station_code, "OPR0000001");
        assert_eq!(m.value, Some(1250.0));
    }

    #[test]
    fn value_is_nullable() {
        let raw = json!({"code_station": "H123", "date_obs": "2024-10-02T00:00:00"});
        let m = MeasureRecord::from_raw(&raw, "hydro", "hubeau_hydro").unwrap();
        assert!(m.value.is_none());
    }
}
