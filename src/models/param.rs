use serde_json::Value;

use super::str_field;

/// Sandre parameter referential row headed for `quality_param`. The flat
/// output schema requested via the `fields` filter uses lowercase keys;
/// the SANDREv4 PascalCase spellings are kept as fallbacks.
#[derive(Debug, Clone)]
pub struct ParamRecord {
    pub code_param: String,
    pub label: Option<String>,
    pub unit: Option<String>,
    pub family: Option<String>,
}

impl ParamRecord {
    pub fn from_raw(raw: &Value) -> Option<Self> {
        Some(Self {
            code_param: str_field(raw, &["code", "CdParametre"])?,
            label: str_field(raw, &["libelle", "NomParametre", "LbCourtParametre"]),
            unit: str_field(raw, &["unite", "SymboleUniteMesure"]),
            family: str_field(raw, &["famille", "theme", "ThemeParametre"]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_output_schema_fields() {
        let raw = json!({
            "code": "1340",
            "libelle": "Nitrates",
            "unite": "mg(NO3)/L",
            "famille": "Azotés"
        });
        let p = ParamRecord::from_raw(&raw).unwrap();
        assert_eq!(p.code_param, "1340");
        assert_eq!(p.label.as_deref(), Some("Nitrates"));
        assert_eq!(p.unit.as_deref(), Some("mg(NO3)/L"));
        assert_eq!(p.family.as_deref(), Some("Azotés"));
    }

    #[test]
    fn sandre_v4_spellings_are_fallbacks() {
        let raw = json!({
            "CdParametre": "1340",
            "NomParametre": "Nitrates",
            "SymboleUniteMesure": "mg(NO3)/L",
            "ThemeParametre": "Azotés"
        });
        let p = ParamRecord::from_raw(&raw).unwrap();
        assert_eq!(p.code_param, "1340");
        assert_eq!(p.label.as_deref(), Some("Nitrates"));
        assert_eq!(p.family.as_deref(), Some("Azotés"));
    }

    #[test]
    fn numeric_code_is_accepted() {
        let p = ParamRecord::from_raw(&json!({"code": 1340})).unwrap();
        assert_eq!(p.code_param, "1340");
    }
}
