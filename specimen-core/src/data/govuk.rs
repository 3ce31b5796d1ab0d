//! UK coronavirus dashboard API client.
//!
//! `GET {base_url}?filters=areaCode={code}&structure={json}&format=json&page={n}`
//!
//! The endpoint pages its results; we follow `pagination.next` until it is
//! null or the server answers 204 No Content. A 204 on the first page means
//! the region has no data, which is returned as an empty (successful) result.
//!
//! Retries are not handled here: one call to [`ReportingApi::fetch_region`]
//! is one attempt, and the per-region fetcher decides whether to try again.

use super::provider::{ApiError, ReportingApi};
use crate::config::ApiConfig;
use crate::domain::{RegionId, SpecimenRecord, Structure};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Guard against a server that never stops paging.
const MAX_PAGES: u32 = 1000;

/// One page of the v1 data endpoint.
#[derive(Debug, Deserialize)]
struct DataPage {
    #[serde(default)]
    data: Vec<Map<String, Value>>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    next: Option<String>,
}

/// Client for `api.coronavirus.data.gov.uk`.
pub struct GovUkClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl GovUkClient {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ApiError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch one page. `Ok(None)` means 204 No Content.
    fn fetch_page(
        &self,
        region: &RegionId,
        structure_json: &str,
        page: u32,
    ) -> Result<Option<DataPage>, ApiError> {
        let filters = format!("areaCode={region}");
        let page_str = page.to_string();
        let resp = self
            .client
            .get(&self.base_url)
            .query(&[
                ("filters", filters.as_str()),
                ("structure", structure_json),
                ("format", "json"),
                ("page", page_str.as_str()),
            ])
            .send()
            .map_err(|e| ApiError::NetworkUnreachable(e.to_string()))?;

        let status = resp.status();

        if status == reqwest::StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(ApiError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            let message = resp.text().unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message: message.chars().take(200).collect(),
            });
        }

        let page: DataPage = resp.json().map_err(|e| {
            ApiError::MalformedResponse(format!("failed to parse page {page} for {region}: {e}"))
        })?;
        Ok(Some(page))
    }
}

impl ReportingApi for GovUkClient {
    fn name(&self) -> &str {
        "gov_uk_coronavirus"
    }

    fn fetch_region(
        &self,
        region: &RegionId,
        structure: &Structure,
    ) -> Result<Vec<SpecimenRecord>, ApiError> {
        let structure_json = structure.to_query_json();
        collect_pages(region, structure, MAX_PAGES, |page_no| {
            self.fetch_page(region, &structure_json, page_no)
        })
    }
}

/// Walk pages 1..=`max_pages` until a 204 or a page without `next`.
fn collect_pages<F>(
    region: &RegionId,
    structure: &Structure,
    max_pages: u32,
    mut fetch_page: F,
) -> Result<Vec<SpecimenRecord>, ApiError>
where
    F: FnMut(u32) -> Result<Option<DataPage>, ApiError>,
{
    let mut records = Vec::new();

    for page_no in 1..=max_pages {
        let Some(page) = fetch_page(page_no)? else {
            return Ok(records);
        };
        debug!(%region, page = page_no, rows = page.data.len(), "fetched page");
        let has_next = page
            .pagination
            .as_ref()
            .and_then(|p| p.next.as_deref())
            .is_some_and(|n| !n.is_empty());
        records.extend(parse_rows(structure, page.data)?);

        if !has_next {
            return Ok(records);
        }
    }

    Err(ApiError::MalformedResponse(format!(
        "pagination for {region} did not end after {max_pages} pages"
    )))
}

/// Convert raw JSON rows into records, using the structure's output names.
pub(crate) fn parse_rows(
    structure: &Structure,
    rows: Vec<Map<String, Value>>,
) -> Result<Vec<SpecimenRecord>, ApiError> {
    let metric_names: Vec<&str> = structure.metric_fields().collect();
    rows.into_iter()
        .map(|row| parse_row(structure, &metric_names, row))
        .collect()
}

fn parse_row(
    structure: &Structure,
    metric_names: &[&str],
    row: Map<String, Value>,
) -> Result<SpecimenRecord, ApiError> {
    let date_raw = row
        .get(structure.date_field())
        .and_then(Value::as_str)
        .ok_or_else(|| missing(structure.date_field()))?;
    let date = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d")
        .map_err(|e| ApiError::MalformedResponse(format!("invalid date '{date_raw}': {e}")))?;

    let area_code = row
        .get(structure.area_code_field())
        .and_then(Value::as_str)
        .ok_or_else(|| missing(structure.area_code_field()))?;

    let area_name = structure
        .area_name_field()
        .and_then(|f| row.get(f))
        .and_then(Value::as_str)
        .map(str::to_string);

    let mut metrics = BTreeMap::new();
    for &name in metric_names {
        let value = match row.get(name) {
            None | Some(Value::Null) => None,
            Some(v) => Some(parse_number(name, v)?),
        };
        metrics.insert(name.to_string(), value);
    }

    Ok(SpecimenRecord {
        date,
        area_code: RegionId::new(area_code),
        area_name,
        metrics,
    })
}

fn parse_number(field: &str, value: &Value) -> Result<f64, ApiError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).ok_or_else(|| {
        ApiError::MalformedResponse(format!("field '{field}' is not numeric: {value}"))
    })
}

fn missing(field: &str) -> ApiError {
    ApiError::MalformedResponse(format!("row is missing '{field}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(json: &str) -> DataPage {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_page_with_pagination() {
        let p = page(
            r#"{
                "length": 2,
                "maxPageLimit": 2500,
                "data": [
                    {"date": "2021-02-02", "areaName": "Hartlepool", "areaCode": "E06000001", "newCasesBySpecimenDate": 4},
                    {"date": "2021-02-01", "areaName": "Hartlepool", "areaCode": "E06000001", "newCasesBySpecimenDate": 3}
                ],
                "pagination": {"current": "/v1/data?page=1", "next": "/v1/data?page=2", "previous": null}
            }"#,
        );
        assert_eq!(p.pagination.and_then(|p| p.next).as_deref(), Some("/v1/data?page=2"));

        let records = parse_rows(&Structure::specimen(), p.data).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].date, NaiveDate::from_ymd_opt(2021, 2, 2).unwrap());
        assert_eq!(records[0].area_code, RegionId::new("E06000001"));
        assert_eq!(records[0].area_name.as_deref(), Some("Hartlepool"));
        assert_eq!(records[0].metric("newCasesBySpecimenDate"), Some(4.0));
        assert_eq!(records[1].metric("newCasesBySpecimenDate"), Some(3.0));
    }

    #[test]
    fn null_metric_is_missing_not_zero() {
        let p = page(
            r#"{"data": [{"date": "2021-02-01", "areaCode": "E1", "newCasesBySpecimenDate": null}]}"#,
        );
        let records = parse_rows(&Structure::specimen(), p.data).unwrap();
        assert_eq!(records[0].metrics.get("newCasesBySpecimenDate"), Some(&None));
        assert_eq!(records[0].area_name, None);
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let p = page(r#"{"data": [{"date": "2021-02-01", "areaCode": "E1", "newCasesBySpecimenDate": "12"}]}"#);
        let records = parse_rows(&Structure::specimen(), p.data).unwrap();
        assert_eq!(records[0].metric("newCasesBySpecimenDate"), Some(12.0));
    }

    #[test]
    fn renamed_structure_fields_are_used() {
        let structure = Structure::new([
            ("day", "date"),
            ("code", "areaCode"),
            ("cases", "newCasesBySpecimenDate"),
        ])
        .unwrap();
        let p = page(r#"{"data": [{"day": "2021-03-01", "code": "W1", "cases": 7}]}"#);
        let records = parse_rows(&structure, p.data).unwrap();
        assert_eq!(records[0].area_code.as_str(), "W1");
        assert_eq!(records[0].metric("cases"), Some(7.0));
    }

    #[test]
    fn bad_date_is_malformed() {
        let p = page(r#"{"data": [{"date": "01/02/2021", "areaCode": "E1"}]}"#);
        let err = parse_rows(&Structure::specimen(), p.data).unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(_)));
    }

    #[test]
    fn missing_area_code_is_malformed() {
        let p = page(r#"{"data": [{"date": "2021-02-01"}]}"#);
        assert!(parse_rows(&Structure::specimen(), p.data).is_err());
    }

    #[test]
    fn non_numeric_metric_is_malformed() {
        let p = page(r#"{"data": [{"date": "2021-02-01", "areaCode": "E1", "newCasesBySpecimenDate": "n/a"}]}"#);
        assert!(parse_rows(&Structure::specimen(), p.data).is_err());
    }

    #[test]
    fn page_without_pagination_block_parses() {
        let p = page(r#"{"data": []}"#);
        assert!(p.pagination.is_none());
        assert!(p.data.is_empty());
    }

    #[test]
    fn client_builds_from_default_config() {
        let client = GovUkClient::new(&ApiConfig::default()).unwrap();
        assert_eq!(client.name(), "gov_uk_coronavirus");
        assert!(client.base_url().starts_with("https://api.coronavirus.data.gov.uk"));
    }

    // ── Pagination ──

    const ROW: &str = r#"{"date": "2021-02-01", "areaCode": "E1", "newCasesBySpecimenDate": 1}"#;

    fn data_page(day: u32, next: Option<&str>) -> DataPage {
        let row = ROW.replace("2021-02-01", &format!("2021-02-{day:02}"));
        let next = next.map_or("null".to_string(), |n| format!("\"{n}\""));
        page(&format!(r#"{{"data": [{row}], "pagination": {{"next": {next}}}}}"#))
    }

    fn days(records: &[SpecimenRecord]) -> Vec<u32> {
        use chrono::Datelike;
        records.iter().map(|r| r.date.day()).collect()
    }

    #[test]
    fn no_content_on_first_page_is_empty_success() {
        let mut calls = Vec::new();
        let records = collect_pages(&RegionId::new("E1"), &Structure::specimen(), 10, |n| {
            calls.push(n);
            Ok(None)
        })
        .unwrap();
        assert!(records.is_empty());
        assert_eq!(calls, vec![1]);
    }

    #[test]
    fn pages_are_joined_in_order() {
        let mut calls = Vec::new();
        let records = collect_pages(&RegionId::new("E1"), &Structure::specimen(), 10, |n| {
            calls.push(n);
            Ok(match n {
                1 => Some(data_page(1, Some("/v1/data?page=2"))),
                2 => Some(data_page(2, None)),
                _ => panic!("page {n} requested after the last page"),
            })
        })
        .unwrap();
        assert_eq!(days(&records), vec![1, 2]);
        assert_eq!(calls, vec![1, 2]);
    }

    #[test]
    fn missing_or_empty_next_stops_paging() {
        for last in [
            data_page(1, None),
            data_page(1, Some("")),
            page(&format!(r#"{{"data": [{ROW}]}}"#)),
        ] {
            let mut last = Some(last);
            let mut calls = 0;
            let records = collect_pages(&RegionId::new("E1"), &Structure::specimen(), 10, |_| {
                calls += 1;
                Ok(last.take())
            })
            .unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(calls, 1);
        }
    }

    #[test]
    fn no_content_mid_stream_ends_paging() {
        let mut calls = Vec::new();
        let records = collect_pages(&RegionId::new("E1"), &Structure::specimen(), 10, |n| {
            calls.push(n);
            Ok(match n {
                1 => Some(data_page(1, Some("/v1/data?page=2"))),
                2 => Some(data_page(2, Some("/v1/data?page=3"))),
                _ => None,
            })
        })
        .unwrap();
        assert_eq!(days(&records), vec![1, 2]);
        assert_eq!(calls, vec![1, 2, 3]);
    }

    #[test]
    fn endless_pagination_hits_the_cap() {
        let mut calls = 0;
        let err = collect_pages(&RegionId::new("E1"), &Structure::specimen(), 3, |n| {
            calls += 1;
            Ok(Some(data_page(n, Some("/v1/data?page=next"))))
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::MalformedResponse(m) if m.contains("3 pages")));
        assert_eq!(calls, 3);
    }

    #[test]
    fn error_on_later_page_fails_the_attempt() {
        let err = collect_pages(&RegionId::new("E1"), &Structure::specimen(), 10, |n| match n {
            1 => Ok(Some(data_page(1, Some("/v1/data?page=2")))),
            _ => Err(ApiError::NetworkUnreachable("connection reset".into())),
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::NetworkUnreachable(_)));
    }

    // ── HTTP status handling against a local listener ──

    /// Serve one canned response per accepted connection, then stop.
    fn serve(responses: Vec<&'static str>) -> String {
        use std::io::{Read, Write};
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            for response in responses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        format!("http://{addr}/v1/data")
    }

    fn local_client(base_url: String) -> GovUkClient {
        GovUkClient::new(&ApiConfig {
            base_url,
            ..ApiConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn too_many_requests_is_rate_limited() {
        let url = serve(vec![
            "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 7\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ]);
        let err = local_client(url)
            .fetch_region(&RegionId::new("E1"), &Structure::specimen())
            .unwrap_err();
        assert!(matches!(err, ApiError::RateLimited { retry_after_secs: 7 }));
    }

    #[test]
    fn no_content_over_http_is_empty_success() {
        let url = serve(vec![
            "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n",
        ]);
        let records = local_client(url)
            .fetch_region(&RegionId::new("E1"), &Structure::specimen())
            .unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn server_error_carries_status() {
        let url = serve(vec![
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 4\r\nConnection: close\r\n\r\noops",
        ]);
        let err = local_client(url)
            .fetch_region(&RegionId::new("E1"), &Structure::specimen())
            .unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 500, .. }));
    }
}
