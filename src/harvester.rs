use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::NaiveDate;
use serde_json::Value;

use crate::error::FetchError;
use crate::registry::{
    expected_fields, required_fields, ApiConfig, DedupRule, EndpointSpec, WfsConfig,
};

/// Safety cap against runaway pagination.
const MAX_PAGES: u32 = 1000;

/// Multiplier applied to the backoff base when the upstream answers 429
/// without a Retry-After header.
const RATE_LIMIT_FACTOR: f64 = 60.0;

/// Pulls record pages from the remote APIs described by the registry.
/// All per-endpoint behavior (window, pagination, dedup, validation) is
/// selected by the endpoint spec, never hard-coded here.
#[derive(Clone)]
pub struct Harvester {
    http: reqwest::Client,
}

impl Harvester {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Fetch the complete, deduplicated record set one endpoint holds for
    /// one partition day. An empty vec means the endpoint had no data.
    pub async fn fetch_endpoint(
        &self,
        api: &ApiConfig,
        endpoint_name: &str,
        spec: &EndpointSpec,
        day: NaiveDate,
    ) -> Result<Vec<Value>, FetchError> {
        let mut params: BTreeMap<String, String> = api.base_params.clone();
        params.extend(spec.params.clone());

        if spec.apply_temporal_filter {
            let (start_key, end_key) = spec
                .temporal_param_keys
                .clone()
                .ok_or_else(|| {
                    FetchError::Permanent(format!(
                        "endpoint {}/{endpoint_name} has no temporal_param_keys",
                        api.name
                    ))
                })?;
            let start = day - chrono::Duration::days(api.lookback_for(spec));
            params.insert(start_key, start.format(&spec.date_format).to_string());
            params.insert(end_key, day.format(&spec.date_format).to_string());
        }

        // Ascending order makes first-wins dedup deterministic.
        if spec.dedup.is_some() {
            params.entry("sort".to_string()).or_insert_with(|| "asc".to_string());
        }

        let page_size = api.page_size_for(spec);
        let url = format!("{}/{}", api.base_url.trim_end_matches('/'), spec.path);

        let mut records: Vec<Value> = Vec::new();
        let mut page = 1u32;
        loop {
            let mut page_params = params.clone();
            page_params.insert("size".to_string(), page_size.to_string());
            page_params.insert("page".to_string(), page.to_string());

            let body = self.call_with_retry(&url, &page_params, api, &spec.path).await?;
            let data = extract_records(&body);

            if data.is_empty() {
                break;
            }
            let fetched = data.len() as u32;
            records.extend(data);

            if fetched < page_size {
                break;
            }
            page += 1;
            if page > MAX_PAGES {
                tracing::warn!(
                    "{}/{endpoint_name}: stopping pagination at safety cap ({MAX_PAGES} pages)",
                    api.name
                );
                break;
            }
        }

        if let Some(rule) = &spec.dedup {
            let before = records.len();
            records = dedup_records(records, rule);
            tracing::debug!(
                "{}/{endpoint_name}: dedup {before} -> {} records",
                api.name,
                records.len()
            );
        }

        Ok(records)
    }

    /// One HTTP call inside the retry envelope. Transient failures (429,
    /// 5xx, timeout, connection error) are retried with exponential backoff
    /// up to the API's retry budget; anything else fails immediately.
    async fn call_with_retry(
        &self,
        url: &str,
        params: &BTreeMap<String, String>,
        api: &ApiConfig,
        endpoint_path: &str,
    ) -> Result<Value, FetchError> {
        for attempt in 0..api.retry_budget {
            tokio::time::sleep(Duration::from_millis(api.rate_limit_delay_ms)).await;

            let result = self
                .http
                .get(url)
                .query(params)
                .timeout(Duration::from_secs(api.timeout_secs))
                .send()
                .await;

            let response = match result {
                Ok(r) => r,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    tracing::warn!(
                        "{url}: {e}, retry {}/{}",
                        attempt + 1,
                        api.retry_budget
                    );
                    self.backoff_sleep(api.backoff_base, attempt).await;
                    continue;
                }
                Err(e) => return Err(FetchError::Permanent(e.to_string())),
            };

            let status = response.status();
            if status.as_u16() == 200 || status.as_u16() == 206 {
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| FetchError::Permanent(format!("invalid JSON response: {e}")))?;
                validate_structure(&api.name, endpoint_path, &body)?;
                return Ok(body);
            }

            if status.as_u16() == 429 {
                let wait = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or_else(|| {
                        Duration::from_secs_f64(
                            api.backoff_base.powi(attempt as i32) * RATE_LIMIT_FACTOR,
                        )
                    });
                tracing::warn!("{url}: rate limited, waiting {:.1}s", wait.as_secs_f64());
                tokio::time::sleep(wait).await;
                continue;
            }

            if status.is_server_error() {
                tracing::warn!(
                    "{url}: server error {status}, retry {}/{}",
                    attempt + 1,
                    api.retry_budget
                );
                self.backoff_sleep(api.backoff_base, attempt).await;
                continue;
            }

            return Err(FetchError::Permanent(format!("{url} returned {status}")));
        }

        Err(FetchError::Transient(format!(
            "{url}: retry budget exhausted after {} attempts",
            api.retry_budget
        )))
    }

    async fn backoff_sleep(&self, base: f64, attempt: u32) {
        let jitter: f64 = rand::random::<f64>();
        tokio::time::sleep(Duration::from_secs_f64(base.powi(attempt as i32) + jitter)).await;
    }

    /// Single-shot WFS GetFeature call returning the raw GML body.
    pub async fn fetch_wfs(&self, wfs: &WfsConfig) -> Result<String, FetchError> {
        let params = [
            ("service", "WFS".to_string()),
            ("version", wfs.version.clone()),
            ("request", "GetFeature".to_string()),
            ("typeNames", wfs.type_name.clone()),
            ("count", wfs.max_features.to_string()),
        ];

        for attempt in 0..wfs.retry_budget {
            tokio::time::sleep(Duration::from_secs(1)).await;

            let result = self
                .http
                .get(&wfs.base_url)
                .query(&params)
                .timeout(Duration::from_secs(wfs.timeout_secs))
                .send()
                .await;

            let response = match result {
                Ok(r) => r,
                Err(e) if e.is_timeout() || e.is_connect() => {
                    tracing::warn!("wfs {}: {e}, retry {}/{}", wfs.name, attempt + 1, wfs.retry_budget);
                    self.backoff_sleep(2.0, attempt).await;
                    continue;
                }
                Err(e) => return Err(FetchError::Permanent(e.to_string())),
            };

            let status = response.status();
            if status.as_u16() == 200 || status.as_u16() == 206 {
                let content = response
                    .text()
                    .await
                    .map_err(|e| FetchError::Permanent(e.to_string()))?;
                validate_gml(&content)?;
                return Ok(content);
            }

            if status.is_server_error() || status.as_u16() == 429 {
                self.backoff_sleep(2.0, attempt).await;
                continue;
            }

            return Err(FetchError::Permanent(format!("wfs {} returned {status}", wfs.name)));
        }

        Err(FetchError::Transient(format!(
            "wfs {}: retry budget exhausted after {} attempts",
            wfs.name, wfs.retry_budget
        )))
    }
}

/// The record set a response body carries. The paginated family wraps it
/// in a `{count, data: […]}` envelope; the referential APIs answer with a
/// bare list or a direct object, so all three shapes are accepted.
fn extract_records(body: &Value) -> Vec<Value> {
    if let Some(data) = body.get("data").and_then(Value::as_array) {
        return data.clone();
    }
    if let Some(list) = body.as_array() {
        return list.clone();
    }
    if body.is_object() {
        return vec![body.clone()];
    }
    Vec::new()
}

/// Structural validation of one response body. The first record is sampled
/// against the per-endpoint field tables: a missing required field is a
/// non-retriable validation error; a missing expected field is only logged,
/// because the referential APIs vary in what they return.
fn validate_structure(api: &str, endpoint_path: &str, body: &Value) -> Result<(), FetchError> {
    let sample = if let Some(data) = body.get("data") {
        let arr = data.as_array().ok_or_else(|| {
            FetchError::Validation(format!("{api}/{endpoint_path}: 'data' is not an array"))
        })?;
        arr.first()
    } else if let Some(list) = body.as_array() {
        list.first()
    } else if body.is_object() {
        Some(body)
    } else {
        return Err(FetchError::Validation(format!(
            "{api}/{endpoint_path}: response is neither an object nor a list"
        )));
    };

    let Some(sample) = sample else {
        return Ok(());
    };
    for field in required_fields(api, endpoint_path) {
        if sample.get(field).is_none() {
            return Err(FetchError::Validation(format!(
                "missing required field '{field}' in {api}/{endpoint_path} sample"
            )));
        }
    }
    for field in expected_fields(api, endpoint_path) {
        if sample.get(field).is_none() {
            tracing::warn!("missing field '{field}' in {api}/{endpoint_path} sample");
        }
    }
    Ok(())
}

/// A GML body is accepted when its document element is a FeatureCollection;
/// an ExceptionReport or malformed XML is a permanent failure.
fn validate_gml(content: &str) -> Result<(), FetchError> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(content);
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                let local = std::str::from_utf8(name.as_ref()).unwrap_or("");
                if local == "FeatureCollection" {
                    return Ok(());
                }
                if local == "ExceptionReport" {
                    return Err(FetchError::Permanent("WFS returned an exception report".into()));
                }
                return Err(FetchError::Validation(format!(
                    "unexpected WFS document element '{local}'"
                )));
            }
            Ok(Event::Eof) => return Err(FetchError::Validation("empty WFS response".into())),
            Ok(_) => continue,
            Err(e) => {
                return Err(FetchError::Permanent(format!("invalid XML in WFS response: {e}")))
            }
        }
    }
}

fn key_component(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// First-wins dedup over `(group_keys..., date)` with the date optionally
/// truncated to the day. Records missing any key field are dropped. Input
/// order is page order, so with `sort=asc` the earliest observation wins.
pub fn dedup_records(records: Vec<Value>, rule: &DedupRule) -> Vec<Value> {
    let mut seen: HashSet<String> = HashSet::with_capacity(records.len());
    let mut kept = Vec::with_capacity(records.len());

    'rec: for record in records {
        let Some(date_raw) = record.get(&rule.date_field) else {
            continue;
        };
        let mut date_value = key_component(date_raw);
        if rule.truncate_to_day {
            if let Some(day) = date_value.split('T').next() {
                date_value = day.to_string();
            }
        }

        let mut key_parts = Vec::with_capacity(rule.group_keys.len() + 1);
        for group_key in &rule.group_keys {
            match record.get(group_key) {
                Some(v) => key_parts.push(key_component(v)),
                None => continue 'rec,
            }
        }
        key_parts.push(date_value);

        if seen.insert(key_parts.join("::")) {
            kept.push(record);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_api(base_url: String) -> ApiConfig {
        let toml = format!(
            r#"
            [[api]]
            name = "piezo"
            base_url = "{base_url}"
            timeout_secs = 5
            retry_budget = 3
            backoff_base = 2.0
            rate_limit_delay_ms = 10

            [api.endpoints.chroniques_tr]
            path = "chroniques_tr"
            apply_temporal_filter = true
            temporal_param_keys = ["date_debut_mesure", "date_fin_mesure"]
            lookback_days = 30
            page_size = 2

            [api.endpoints.chroniques_tr.dedup]
            date_field = "date_mesure"
            group_keys = ["code_bss"]
            "#
        );
        crate::registry::Registry::from_toml_str(&toml)
            .unwrap()
            .apis
            .remove("piezo")
            .unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 2).unwrap()
    }

    #[test]
    fn dedup_keeps_first_occurrence_per_day() {
        let rule = DedupRule {
            date_field: "date_mesure".into(),
            group_keys: vec!["code_bss".into()],
            truncate_to_day: true,
        };
        let records = vec![
            json!({"code_bss": "A", "date_mesure": "2024-10-02T06:00:00", "v": 1}),
            json!({"code_bss": "A", "date_mesure": "2024-10-02T12:00:00", "v": 2}),
            json!({"code_bss": "B", "date_mesure": "2024-10-02T06:00:00", "v": 3}),
            json!({"code_bss": "A", "date_mesure": "2024-10-03T06:00:00", "v": 4}),
        ];
        let kept = dedup_records(records, &rule);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0]["v"], 1); // first observation of the day wins
        assert_eq!(kept[1]["v"], 3);
        assert_eq!(kept[2]["v"], 4);
    }

    #[test]
    fn dedup_without_truncation_keys_on_full_timestamp() {
        let rule = DedupRule {
            date_field: "date_mesure".into(),
            group_keys: vec!["code_bss".into()],
            truncate_to_day: false,
        };
        let records = vec![
            json!({"code_bss": "A", "date_mesure": "2024-10-02T06:00:00"}),
            json!({"code_bss": "A", "date_mesure": "2024-10-02T12:00:00"}),
        ];
        assert_eq!(dedup_records(records, &rule).len(), 2);
    }

    #[test]
    fn dedup_drops_records_missing_keys() {
        let rule = DedupRule {
            date_field: "date_mesure".into(),
            group_keys: vec!["code_bss".into()],
            truncate_to_day: true,
        };
        let records = vec![json!({"date_mesure": "2024-10-02"}), json!({"code_bss": "A"})];
        assert!(dedup_records(records, &rule).is_empty());
    }

    fn sandre_api(base_url: String) -> ApiConfig {
        let toml = format!(
            r#"
            [[api]]
            name = "sandre"
            base_url = "{base_url}"
            timeout_secs = 5
            retry_budget = 3
            rate_limit_delay_ms = 10
            default_page_size = 10000

            [api.endpoints.parametres]
            path = "par.json"

            [api.endpoints.parametres.params]
            format = "json"
            fields = "code,libelle,definition,unite,theme,famille"
            "#
        );
        crate::registry::Registry::from_toml_str(&toml)
            .unwrap()
            .apis
            .remove("sandre")
            .unwrap()
    }

    #[test]
    fn extract_records_accepts_all_three_shapes() {
        let envelope = json!({"count": 2, "data": [{"code": "1340"}, {"code": "1301"}]});
        assert_eq!(extract_records(&envelope).len(), 2);

        let bare_list = json!([{"code": "1340"}, {"code": "1301"}, {"code": "1302"}]);
        assert_eq!(extract_records(&bare_list).len(), 3);

        let direct = json!({"code": "1340", "libelle": "Nitrates"});
        let records = extract_records(&direct);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["code"], "1340");

        assert!(extract_records(&json!("just a string")).is_empty());
    }

    #[test]
    fn referential_field_mismatch_is_warn_only() {
        // Sandre expected fields missing from the sample: accepted, logged.
        let body = json!([{"surprise": true}]);
        assert!(validate_structure("sandre", "par.json", &body).is_ok());
        // A malformed envelope is still rejected.
        let body = json!({"data": "not a list"});
        assert!(validate_structure("sandre", "par.json", &body).is_err());
    }

    #[tokio::test]
    async fn referential_bare_list_body_is_harvested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/par.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"code": "1340", "libelle": "Nitrates", "unite": "mg(NO3)/L"},
                {"code": "1301", "libelle": "Température de l'eau", "unite": "°C"},
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let api = sandre_api(server.uri());
        let spec = api.endpoints["parametres"].clone();
        let harvester = Harvester::new(reqwest::Client::new());
        let records = harvester
            .fetch_endpoint(&api, "parametres", &spec, day())
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["code"], "1340");

        // The fields filter and format reach the wire.
        let reqs = server.received_requests().await.unwrap();
        let query = reqs[0].url.query().unwrap();
        assert!(query.contains("format=json"));
        assert!(query.contains("fields=code"));
    }

    #[tokio::test]
    async fn referential_direct_object_body_is_harvested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/par.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(
                {"code": "1340", "libelle": "Nitrates"}
            )))
            .expect(1)
            .mount(&server)
            .await;

        let api = sandre_api(server.uri());
        let spec = api.endpoints["parametres"].clone();
        let harvester = Harvester::new(reqwest::Client::new());
        let records = harvester
            .fetch_endpoint(&api, "parametres", &spec, day())
            .await
            .unwrap();

        // One record, one page: the short page terminates pagination.
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn gml_validation() {
        assert!(validate_gml(
            r#"<?xml version="1.0"?><wfs:FeatureCollection xmlns:wfs="http://www.opengis.net/wfs/2.0"><wfs:member/></wfs:FeatureCollection>"#
        )
        .is_ok());
        assert!(matches!(
            validate_gml(r#"<ows:ExceptionReport xmlns:ows="http://www.opengis.net/ows/1.1"><ows:Exception/></ows:ExceptionReport>"#),
            Err(FetchError::Permanent(_))
        ));
        assert!(validate_gml("not xml at all").is_err());
    }

    #[tokio::test]
    async fn paginates_until_short_page_and_dedups() {
        let server = MockServer::start().await;
        let pages = [
            json!({"count": 5, "data": [
                {"code_bss": "X", "date_mesure": "2024-10-01T06:00:00", "v": 1},
                {"code_bss": "X", "date_mesure": "2024-10-01T12:00:00", "v": 2},
            ]}),
            json!({"count": 5, "data": [
                {"code_bss": "X", "date_mesure": "2024-10-01T18:00:00", "v": 3},
                {"code_bss": "Y", "date_mesure": "2024-10-01T06:00:00", "v": 4},
            ]}),
            json!({"count": 5, "data": [
                {"code_bss": "Y", "date_mesure": "2024-10-02T06:00:00", "v": 5},
            ]}),
        ];
        for (i, body) in pages.iter().enumerate() {
            Mock::given(method("GET"))
                .and(path("/chroniques_tr"))
                .and(query_param("page", (i + 1).to_string()))
                .respond_with(ResponseTemplate::new(if i == 0 { 200 } else { 206 }).set_body_json(body))
                .mount(&server)
                .await;
        }

        let api = test_api(server.uri());
        let spec = api.endpoints["chroniques_tr"].clone();
        let harvester = Harvester::new(reqwest::Client::new());
        let records = harvester
            .fetch_endpoint(&api, "chroniques_tr", &spec, day())
            .await
            .unwrap();

        // 5 records fetched; X has three observations on 2024-10-01, the
        // first one wins. 3 unique (station, day) pairs remain.
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["v"], 1);

        // The temporal window was injected.
        let reqs = server.received_requests().await.unwrap();
        assert!(reqs[0].url.query().unwrap().contains("date_debut_mesure=2024-09-02"));
        assert!(reqs[0].url.query().unwrap().contains("date_fin_mesure=2024-10-02"));
        assert!(reqs[0].url.query().unwrap().contains("sort=asc"));
    }

    #[tokio::test]
    async fn rate_limit_honors_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chroniques_tr"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/chroniques_tr"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 1, "data": [
                {"code_bss": "X", "date_mesure": "2024-10-01T06:00:00"},
            ]})))
            .expect(1)
            .mount(&server)
            .await;

        let api = test_api(server.uri());
        let spec = api.endpoints["chroniques_tr"].clone();
        let harvester = Harvester::new(reqwest::Client::new());

        let started = std::time::Instant::now();
        let records = harvester
            .fetch_endpoint(&api, "chroniques_tr", &spec, day())
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        // Two Retry-After waits of 1s plus three rate-limit delays.
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn missing_required_field_is_a_validation_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chroniques_tr"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": [{"wrong_field": 1}]})),
            )
            .mount(&server)
            .await;

        let api = test_api(server.uri());
        let spec = api.endpoints["chroniques_tr"].clone();
        let harvester = Harvester::new(reqwest::Client::new());
        let err = harvester
            .fetch_endpoint(&api, "chroniques_tr", &spec, day())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Validation(_)));
    }

    #[tokio::test]
    async fn empty_first_page_yields_zero_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chroniques_tr"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"count": 0, "data": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = test_api(server.uri());
        let spec = api.endpoints["chroniques_tr"].clone();
        let harvester = Harvester::new(reqwest::Client::new());
        let records = harvester
            .fetch_endpoint(&api, "chroniques_tr", &spec, day())
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn non_retriable_4xx_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chroniques_tr"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let api = test_api(server.uri());
        let spec = api.endpoints["chroniques_tr"].clone();
        let harvester = Harvester::new(reqwest::Client::new());
        let err = harvester
            .fetch_endpoint(&api, "chroniques_tr", &spec, day())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Permanent(_)));
    }

    #[tokio::test]
    async fn server_error_is_retried_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/chroniques_tr"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/chroniques_tr"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [
                {"code_bss": "X", "date_mesure": "2024-10-01T06:00:00"},
            ]})))
            .mount(&server)
            .await;

        let api = test_api(server.uri());
        let spec = api.endpoints["chroniques_tr"].clone();
        let harvester = Harvester::new(reqwest::Client::new());
        let records = harvester
            .fetch_endpoint(&api, "chroniques_tr", &spec, day())
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }
}
