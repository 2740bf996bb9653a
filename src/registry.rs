use serde::Deserialize;
use std::collections::BTreeMap;

use crate::error::PipelineError;

/// Deduplication rule for one endpoint: group records by `group_keys` plus
/// the (optionally day-truncated) date field, first occurrence wins.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DedupRule {
    pub date_field: String,
    pub group_keys: Vec<String>,
    #[serde(default = "default_true")]
    pub truncate_to_day: bool,
}

/// Declarative description of one remote endpoint. The harvester contains no
/// per-endpoint branching beyond what this spec selects.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSpec {
    /// Path relative to the API base URL.
    pub path: String,
    /// Static query parameters sent with every page.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Inject a `[partition - lookback, partition]` window?
    #[serde(default)]
    pub apply_temporal_filter: bool,
    /// (start-key, end-key) the window is injected under.
    #[serde(default)]
    pub temporal_param_keys: Option<(String, String)>,
    /// Window size in days; falls back to the API default.
    #[serde(default)]
    pub lookback_days: Option<i64>,
    /// strftime format for the window bounds.
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Items requested per page; falls back to the API default.
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub dedup: Option<DedupRule>,
}

/// One remote JSON API: base URL, retry envelope, and its endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub base_params: BTreeMap<String, String>,
    #[serde(default = "default_lookback")]
    pub default_lookback_days: i64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
    #[serde(default = "default_backoff")]
    pub backoff_base: f64,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_delay_ms: u64,
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    pub endpoints: BTreeMap<String, EndpointSpec>,
}

/// A WFS source: single GetFeature call, GML 3.2 response, feature cap.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WfsConfig {
    pub name: String,
    pub base_url: String,
    pub type_name: String,
    #[serde(default = "default_wfs_version")]
    pub version: String,
    #[serde(default = "default_max_features")]
    pub max_features: u32,
    #[serde(default = "default_timeout_wfs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,
}

fn default_true() -> bool {
    true
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_lookback() -> i64 {
    365
}

fn default_timeout() -> u64 {
    60
}

fn default_timeout_wfs() -> u64 {
    300
}

fn default_retry_budget() -> u32 {
    3
}

fn default_backoff() -> f64 {
    2.0
}

fn default_rate_limit() -> u64 {
    500
}

fn default_page_size() -> u32 {
    1000
}

fn default_wfs_version() -> String {
    "2.0.0".to_string()
}

fn default_max_features() -> u32 {
    10_000
}

impl ApiConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, ep) in &self.endpoints {
            if ep.apply_temporal_filter && ep.temporal_param_keys.is_none() {
                return Err(PipelineError::Config(format!(
                    "endpoint {}/{name} applies a temporal filter but declares no temporal_param_keys",
                    self.name
                )));
            }
        }
        Ok(())
    }

    pub fn page_size_for(&self, ep: &EndpointSpec) -> u32 {
        ep.page_size.unwrap_or(self.default_page_size)
    }

    pub fn lookback_for(&self, ep: &EndpointSpec) -> i64 {
        ep.lookback_days.unwrap_or(self.default_lookback_days)
    }
}

/// Fields the referential APIs are expected (not required) to return, per
/// (api, endpoint path). A missing field is logged, never an error: the
/// Sandre responses vary between deployments.
pub fn expected_fields(api: &str, endpoint_path: &str) -> &'static [&'static str] {
    let key = endpoint_path.rsplit('/').next().unwrap_or(endpoint_path);
    match (api, key) {
        ("sandre", "par.json") => &["code", "libelle"],
        ("sandre", "uni.json") => &["code", "symbole", "libelle"],
        _ => &[],
    }
}

/// Fields that must be present on the sampled first record, per
/// (api, endpoint path). A missing field is a non-retriable validation error.
pub fn required_fields(api: &str, endpoint_path: &str) -> &'static [&'static str] {
    let key = endpoint_path.rsplit('/').next().unwrap_or(endpoint_path);
    match (api, key) {
        ("piezo", "stations") => &["code_bss"],
        ("piezo", "chroniques_tr") | ("piezo", "chroniques") => &["code_bss", "date_mesure"],
        ("hydro", "stations") => &["code_station"],
        ("hydro", "observations_tr") | ("hydro", "observations") => {
            &["code_station", "date_obs"]
        }
        ("temperature", "station") => &["code_station"],
        ("temperature", "chronique") => &["code_station", "date_mesure_temp"],
        ("quality_surface", "station_pc") => &["code_station"],
        ("quality_surface", "analyse_pc") => &["code_station", "date_prelevement"],
        ("quality_groundwater", "analyses") => &["code_bss", "date_debut_prelevement"],
        _ => &[],
    }
}

/// The full endpoint registry: JSON APIs plus WFS sources.
#[derive(Debug, Clone)]
pub struct Registry {
    pub apis: BTreeMap<String, ApiConfig>,
    pub wfs: BTreeMap<String, WfsConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegistryFile {
    #[serde(default)]
    api: Vec<ApiConfig>,
    #[serde(default)]
    wfs: Vec<WfsConfig>,
}

impl Registry {
    pub fn get(&self, api: &str) -> Result<&ApiConfig, PipelineError> {
        self.apis
            .get(api)
            .ok_or_else(|| PipelineError::Config(format!("unknown api {api}")))
    }

    pub fn get_wfs(&self, name: &str) -> Result<&WfsConfig, PipelineError> {
        self.wfs
            .get(name)
            .ok_or_else(|| PipelineError::Config(format!("unknown wfs source {name}")))
    }

    /// Parse a registry override file. Unknown fields are an error.
    pub fn from_toml_str(contents: &str) -> Result<Self, PipelineError> {
        let file: RegistryFile = toml::from_str(contents)
            .map_err(|e| PipelineError::Config(format!("registry parse error: {e}")))?;
        let mut apis = BTreeMap::new();
        for api in file.api {
            api.validate()?;
            apis.insert(api.name.clone(), api);
        }
        let mut wfs = BTreeMap::new();
        for w in file.wfs {
            wfs.insert(w.name.clone(), w);
        }
        Ok(Self { apis, wfs })
    }

    /// The built-in registry for the Hub'Eau family plus the Sandre
    /// referential, the BDLISA WFS and an optional meteo grid source
    /// (base URL from `METEO_BASE_URL`; absent means the meteo assets
    /// report `no_data`).
    pub fn builtin() -> Self {
        let mut apis = BTreeMap::new();

        apis.insert(
            "piezo".to_string(),
            ApiConfig {
                name: "piezo".into(),
                base_url: "https://hubeau.eaufrance.fr/api/v1/niveaux_nappes".into(),
                base_params: BTreeMap::new(),
                default_lookback_days: 30,
                timeout_secs: 60,
                retry_budget: 3,
                backoff_base: 2.0,
                rate_limit_delay_ms: 500,
                default_page_size: 1000,
                endpoints: BTreeMap::from([
                    (
                        "stations".to_string(),
                        EndpointSpec {
                            path: "stations".into(),
                            params: BTreeMap::new(),
                            apply_temporal_filter: false,
                            temporal_param_keys: None,
                            lookback_days: None,
                            date_format: "%Y-%m-%d".into(),
                            page_size: Some(5000),
                            dedup: None,
                        },
                    ),
                    (
                        "chroniques_tr".to_string(),
                        EndpointSpec {
                            path: "chroniques_tr".into(),
                            params: BTreeMap::new(),
                            apply_temporal_filter: true,
                            temporal_param_keys: Some((
                                "date_debut_mesure".into(),
                                "date_fin_mesure".into(),
                            )),
                            lookback_days: Some(30),
                            date_format: "%Y-%m-%d".into(),
                            page_size: Some(1000),
                            dedup: Some(DedupRule {
                                date_field: "date_mesure".into(),
                                group_keys: vec!["code_bss".into()],
                                truncate_to_day: true,
                            }),
                        },
                    ),
                ]),
            },
        );

        apis.insert(
            "hydro".to_string(),
            ApiConfig {
                name: "hydro".into(),
                base_url: "https://hubeau.eaufrance.fr/api/v1/hydrometrie".into(),
                base_params: BTreeMap::new(),
                default_lookback_days: 7,
                timeout_secs: 60,
                retry_budget: 3,
                backoff_base: 2.0,
                rate_limit_delay_ms: 500,
                default_page_size: 1000,
                endpoints: BTreeMap::from([
                    (
                        "stations".to_string(),
                        EndpointSpec {
                            path: "stations".into(),
                            params: BTreeMap::new(),
                            apply_temporal_filter: false,
                            temporal_param_keys: None,
                            lookback_days: None,
                            date_format: "%Y-%m-%d".into(),
                            page_size: Some(5000),
                            dedup: None,
                        },
                    ),
                    (
                        "observations_tr".to_string(),
                        EndpointSpec {
                            path: "observations_tr".into(),
                            params: BTreeMap::new(),
                            apply_temporal_filter: true,
                            temporal_param_keys: Some((
                                "date_debut_obs".into(),
                                "date_fin_obs".into(),
                            )),
                            lookback_days: Some(7),
                            date_format: "%Y-%m-%d".into(),
                            page_size: Some(1000),
                            dedup: Some(DedupRule {
                                date_field: "date_obs".into(),
                                group_keys: vec!["code_station".into()],
                                truncate_to_day: true,
                            }),
                        },
                    ),
                ]),
            },
        );

        apis.insert(
            "temperature".to_string(),
            ApiConfig {
                name: "temperature".into(),
                base_url: "https://hubeau.eaufrance.fr/api/v1/temperature".into(),
                base_params: BTreeMap::new(),
                default_lookback_days: 30,
                timeout_secs: 60,
                retry_budget: 3,
                backoff_base: 2.0,
                rate_limit_delay_ms: 500,
                default_page_size: 1000,
                endpoints: BTreeMap::from([
                    (
                        "stations".to_string(),
                        EndpointSpec {
                            // singular per the upstream documentation
                            path: "station".into(),
                            params: BTreeMap::new(),
                            apply_temporal_filter: false,
                            temporal_param_keys: None,
                            lookback_days: None,
                            date_format: "%Y-%m-%d".into(),
                            page_size: Some(5000),
                            dedup: None,
                        },
                    ),
                    (
                        "chronique".to_string(),
                        EndpointSpec {
                            path: "chronique".into(),
                            params: BTreeMap::new(),
                            apply_temporal_filter: true,
                            temporal_param_keys: Some((
                                "date_debut_mesure_temp".into(),
                                "date_fin_mesure_temp".into(),
                            )),
                            lookback_days: Some(30),
                            date_format: "%Y-%m-%d".into(),
                            page_size: Some(1000),
                            dedup: Some(DedupRule {
                                date_field: "date_mesure_temp".into(),
                                group_keys: vec!["code_station".into()],
                                truncate_to_day: true,
                            }),
                        },
                    ),
                ]),
            },
        );

        apis.insert(
            "quality_surface".to_string(),
            ApiConfig {
                name: "quality_surface".into(),
                base_url: "https://hubeau.eaufrance.fr/api/v2/qualite_rivieres".into(),
                base_params: BTreeMap::new(),
                default_lookback_days: 1,
                timeout_secs: 60,
                retry_budget: 3,
                backoff_base: 2.0,
                rate_limit_delay_ms: 500,
                default_page_size: 1000,
                endpoints: BTreeMap::from([
                    (
                        "analyse_pc".to_string(),
                        EndpointSpec {
                            path: "analyse_pc".into(),
                            params: BTreeMap::new(),
                            apply_temporal_filter: true,
                            temporal_param_keys: Some((
                                "date_debut_prelevement".into(),
                                "date_fin_prelevement".into(),
                            )),
                            lookback_days: Some(1),
                            date_format: "%Y-%m-%d".into(),
                            page_size: Some(1000),
                            // sub-daily analyses are legitimate, no dedup
                            dedup: None,
                        },
                    ),
                    (
                        "station_pc".to_string(),
                        EndpointSpec {
                            path: "station_pc".into(),
                            params: BTreeMap::new(),
                            apply_temporal_filter: false,
                            temporal_param_keys: None,
                            lookback_days: None,
                            date_format: "%Y-%m-%d".into(),
                            page_size: Some(5000),
                            dedup: None,
                        },
                    ),
                ]),
            },
        );

        apis.insert(
            "quality_groundwater".to_string(),
            ApiConfig {
                name: "quality_groundwater".into(),
                base_url: "https://hubeau.eaufrance.fr/api/v1/qualite_eaux_souterraines".into(),
                base_params: BTreeMap::new(),
                default_lookback_days: 1,
                timeout_secs: 60,
                retry_budget: 3,
                backoff_base: 2.0,
                rate_limit_delay_ms: 500,
                default_page_size: 1000,
                endpoints: BTreeMap::from([(
                    "analyses".to_string(),
                    EndpointSpec {
                        path: "analyses".into(),
                        params: BTreeMap::new(),
                        apply_temporal_filter: true,
                        temporal_param_keys: Some((
                            "date_debut_prelevement".into(),
                            "date_fin_prelevement".into(),
                        )),
                        lookback_days: Some(1),
                        date_format: "%Y-%m-%d".into(),
                        page_size: Some(1000),
                        dedup: None,
                    },
                )]),
            },
        );

        apis.insert(
            "ecoulement".to_string(),
            ApiConfig {
                name: "ecoulement".into(),
                base_url: "https://hubeau.eaufrance.fr/api/v1/ecoulement_cours_eau".into(),
                base_params: BTreeMap::new(),
                default_lookback_days: 7,
                timeout_secs: 60,
                retry_budget: 3,
                backoff_base: 2.0,
                rate_limit_delay_ms: 500,
                default_page_size: 1000,
                endpoints: BTreeMap::from([
                    (
                        "stations".to_string(),
                        EndpointSpec {
                            path: "stations".into(),
                            params: BTreeMap::new(),
                            apply_temporal_filter: false,
                            temporal_param_keys: None,
                            lookback_days: None,
                            date_format: "%Y-%m-%d".into(),
                            page_size: Some(5000),
                            dedup: None,
                        },
                    ),
                    (
                        "chroniques".to_string(),
                        EndpointSpec {
                            path: "chroniques".into(),
                            params: BTreeMap::new(),
                            apply_temporal_filter: true,
                            temporal_param_keys: Some((
                                "date_debut_observation".into(),
                                "date_fin_observation".into(),
                            )),
                            lookback_days: Some(7),
                            date_format: "%Y-%m-%d".into(),
                            page_size: Some(1000),
                            dedup: Some(DedupRule {
                                date_field: "date_observation".into(),
                                group_keys: vec!["code_station".into()],
                                truncate_to_day: true,
                            }),
                        },
                    ),
                ]),
            },
        );

        apis.insert(
            "hydrobiologie".to_string(),
            ApiConfig {
                name: "hydrobiologie".into(),
                base_url: "https://hubeau.eaufrance.fr/api/v1/hydrobiologie".into(),
                base_params: BTreeMap::new(),
                default_lookback_days: 30,
                timeout_secs: 60,
                retry_budget: 3,
                backoff_base: 2.0,
                rate_limit_delay_ms: 500,
                default_page_size: 1000,
                endpoints: BTreeMap::from([(
                    "indicateurs".to_string(),
                    EndpointSpec {
                        path: "indicateurs".into(),
                        params: BTreeMap::new(),
                        apply_temporal_filter: true,
                        temporal_param_keys: Some((
                            "date_debut_prelevement".into(),
                            "date_fin_prelevement".into(),
                        )),
                        lookback_days: Some(30),
                        date_format: "%Y-%m-%d".into(),
                        page_size: Some(1000),
                        dedup: None,
                    },
                )]),
            },
        );

        apis.insert(
            "prelevements".to_string(),
            ApiConfig {
                name: "prelevements".into(),
                base_url: "https://hubeau.eaufrance.fr/api/v1/prelevements_eau".into(),
                base_params: BTreeMap::new(),
                default_lookback_days: 30,
                timeout_secs: 60,
                retry_budget: 3,
                backoff_base: 2.0,
                rate_limit_delay_ms: 500,
                default_page_size: 1000,
                endpoints: BTreeMap::from([(
                    "chroniques".to_string(),
                    EndpointSpec {
                        path: "chroniques".into(),
                        params: BTreeMap::new(),
                        apply_temporal_filter: true,
                        temporal_param_keys: Some((
                            "date_debut_prelevement".into(),
                            "date_fin_prelevement".into(),
                        )),
                        lookback_days: Some(30),
                        date_format: "%Y-%m-%d".into(),
                        page_size: Some(1000),
                        // withdrawal chronicles are legitimately sub-daily:
                        // dedup per ouvrage on the full timestamp
                        dedup: Some(DedupRule {
                            date_field: "date_prelevement".into(),
                            group_keys: vec!["code_ouvrage".into()],
                            truncate_to_day: false,
                        }),
                    },
                )]),
            },
        );

        apis.insert(
            "sandre".to_string(),
            ApiConfig {
                name: "sandre".into(),
                base_url: "https://api.sandre.eaufrance.fr/referentiels/v1".into(),
                base_params: BTreeMap::new(),
                default_lookback_days: 365,
                timeout_secs: 120,
                retry_budget: 3,
                backoff_base: 2.0,
                rate_limit_delay_ms: 1000,
                default_page_size: 10_000,
                endpoints: BTreeMap::from([
                    (
                        "parametres".to_string(),
                        EndpointSpec {
                            path: "par.json".into(),
                            // The fields filter selects the flat output
                            // schema the loader reads.
                            params: BTreeMap::from([
                                ("format".to_string(), "json".to_string()),
                                (
                                    "fields".to_string(),
                                    "code,libelle,definition,unite,theme,famille".to_string(),
                                ),
                            ]),
                            apply_temporal_filter: false,
                            temporal_param_keys: None,
                            lookback_days: None,
                            date_format: "%Y-%m-%d".into(),
                            page_size: Some(10_000),
                            dedup: None,
                        },
                    ),
                    (
                        "unites".to_string(),
                        EndpointSpec {
                            path: "uni.json".into(),
                            params: BTreeMap::from([
                                ("format".to_string(), "json".to_string()),
                                (
                                    "fields".to_string(),
                                    "code,symbole,libelle,definition".to_string(),
                                ),
                            ]),
                            apply_temporal_filter: false,
                            temporal_param_keys: None,
                            lookback_days: None,
                            date_format: "%Y-%m-%d".into(),
                            page_size: Some(10_000),
                            dedup: None,
                        },
                    ),
                ]),
            },
        );

        if let Ok(meteo_base) = std::env::var("METEO_BASE_URL") {
            apis.insert(
                "meteo".to_string(),
                ApiConfig {
                    name: "meteo".into(),
                    base_url: meteo_base,
                    base_params: BTreeMap::new(),
                    default_lookback_days: 1,
                    timeout_secs: 120,
                    retry_budget: 3,
                    backoff_base: 2.0,
                    rate_limit_delay_ms: 500,
                    default_page_size: 1000,
                    endpoints: BTreeMap::from([(
                        "grid_daily".to_string(),
                        EndpointSpec {
                            path: "grid_daily".into(),
                            params: BTreeMap::new(),
                            apply_temporal_filter: true,
                            temporal_param_keys: Some((
                                "date_debut".into(),
                                "date_fin".into(),
                            )),
                            lookback_days: Some(1),
                            date_format: "%Y-%m-%d".into(),
                            page_size: Some(1000),
                            dedup: None,
                        },
                    )]),
                },
            );
        }

        let mut wfs = BTreeMap::new();
        wfs.insert(
            "bdlisa_masses_eau".to_string(),
            WfsConfig {
                name: "bdlisa_masses_eau".into(),
                base_url: "https://services.sandre.eaufrance.fr/geo/bdlisa".into(),
                type_name: "bdlisa:masses_eau".into(),
                version: "2.0.0".into(),
                max_features: 10_000,
                timeout_secs: 300,
                retry_budget: 3,
            },
        );

        Self { apis, wfs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_validates() {
        let reg = Registry::builtin();
        for api in reg.apis.values() {
            api.validate().unwrap();
        }
    }

    #[test]
    fn piezo_endpoint_values_are_authoritative() {
        let reg = Registry::builtin();
        let piezo = reg.get("piezo").unwrap();

        let stations = &piezo.endpoints["stations"];
        assert!(!stations.apply_temporal_filter);
        assert_eq!(piezo.page_size_for(stations), 5000);

        let chroniques = &piezo.endpoints["chroniques_tr"];
        assert!(chroniques.apply_temporal_filter);
        assert_eq!(piezo.lookback_for(chroniques), 30);
        let dedup = chroniques.dedup.as_ref().unwrap();
        assert_eq!(dedup.group_keys, vec!["code_bss"]);
        assert_eq!(dedup.date_field, "date_mesure");
        assert!(dedup.truncate_to_day);
    }

    #[test]
    fn unknown_descriptor_field_is_rejected() {
        let toml = r#"
            [[api]]
            name = "x"
            base_url = "https://example.org"
            surprise = true

            [api.endpoints.foo]
            path = "foo"
        "#;
        let err = Registry::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn temporal_filter_without_keys_is_rejected() {
        let toml = r#"
            [[api]]
            name = "x"
            base_url = "https://example.org"

            [api.endpoints.foo]
            path = "foo"
            apply_temporal_filter = true
        "#;
        let err = Registry::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn sandre_referential_requests_the_flat_output_schema() {
        let reg = Registry::builtin();
        let sandre = reg.get("sandre").unwrap();

        let params = &sandre.endpoints["parametres"];
        assert_eq!(params.params.get("format").map(String::as_str), Some("json"));
        assert_eq!(
            params.params.get("fields").map(String::as_str),
            Some("code,libelle,definition,unite,theme,famille")
        );
        assert_eq!(sandre.page_size_for(params), 10_000);

        let units = &sandre.endpoints["unites"];
        assert!(units.params.get("fields").unwrap().contains("symbole"));
    }

    #[test]
    fn expected_fields_are_warn_only_entries() {
        assert_eq!(expected_fields("sandre", "par.json"), &["code", "libelle"][..]);
        assert_eq!(
            expected_fields("sandre", "uni.json"),
            &["code", "symbole", "libelle"][..]
        );
        assert!(expected_fields("piezo", "chroniques_tr").is_empty());
    }

    #[test]
    fn prelevements_dedup_keeps_sub_daily_observations() {
        let reg = Registry::builtin();
        let prel = reg.get("prelevements").unwrap();
        let dedup = prel.endpoints["chroniques"].dedup.as_ref().unwrap();
        assert!(!dedup.truncate_to_day);
        assert_eq!(dedup.group_keys, vec!["code_ouvrage"]);
    }

    #[test]
    fn required_fields_table() {
        assert_eq!(
            required_fields("piezo", "chroniques_tr"),
            &["code_bss", "date_mesure"][..]
        );
        assert_eq!(
            required_fields("quality_groundwater", "analyses"),
            &["code_bss", "date_debut_prelevement"][..]
        );
        assert!(required_fields("piezo", "nonexistent").is_empty());
    }
}
