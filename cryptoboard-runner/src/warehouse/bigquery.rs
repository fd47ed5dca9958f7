//! BigQuery sink.
//!
//! Publishes by submitting a load job with `WRITE_TRUNCATE`, so the
//! destination table is atomically replaced when the job succeeds and left
//! untouched when it fails. Records are uploaded as newline-delimited JSON in
//! a single multipart request together with the job configuration, then the
//! job is polled until `DONE`.

use super::auth;
use super::{Credential, PublishError, TableRef, WarehouseSink};
use crate::config::WarehouseConfig;
use cryptoboard_core::domain::EnrichedAssetRecord;
use cryptoboard_core::schema::ENRICHED_COLUMNS;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const API_ROOT: &str = "https://bigquery.googleapis.com";
const MULTIPART_BOUNDARY: &str = "cryptoboard-load-boundary";

/// BigQuery sink over a blocking HTTP client.
pub struct BigQuerySink {
    client: reqwest::blocking::Client,
    api_root: String,
    location: Option<String>,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl BigQuerySink {
    pub fn new(config: &WarehouseConfig) -> Result<Self, PublishError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("cryptoboard/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PublishError::Write(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_root: API_ROOT.to_string(),
            location: config.location.clone(),
            poll_interval: Duration::from_millis(config.job_poll_interval_ms),
            job_timeout: Duration::from_secs(config.job_timeout_secs),
        })
    }

    /// Point the sink at a different API root (emulators, tests).
    pub fn with_api_root(mut self, api_root: impl Into<String>) -> Self {
        self.api_root = api_root.into().trim_end_matches('/').to_string();
        self
    }

    fn upload_url(&self, project_id: &str) -> String {
        format!(
            "{}/upload/bigquery/v2/projects/{project_id}/jobs?uploadType=multipart",
            self.api_root
        )
    }

    fn job_url(&self, project_id: &str, job_id: &str) -> String {
        format!("{}/bigquery/v2/projects/{project_id}/jobs/{job_id}", self.api_root)
    }

    fn submit_load(
        &self,
        table: &TableRef,
        token: &str,
        records: &[EnrichedAssetRecord],
    ) -> Result<JobHandle, PublishError> {
        let metadata = load_job_metadata(table, self.location.as_deref());
        let data = to_ndjson(records)?;
        let body = multipart_body(MULTIPART_BOUNDARY, &metadata, &data);

        let url = self.upload_url(&table.project_id);
        debug!(%url, rows = records.len(), bytes = body.len(), "submitting load job");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(body)
            .send()
            .map_err(|e| PublishError::Write(format!("load request failed: {e}")))?;

        let job = read_job_response(resp)?;
        JobHandle::from_job(&job)
    }

    fn wait_for_job(
        &self,
        project_id: &str,
        token: &str,
        handle: &JobHandle,
    ) -> Result<(), PublishError> {
        let deadline = Instant::now() + self.job_timeout;
        let mut state = handle.state.clone();

        loop {
            if let JobState::Done { error } = &state {
                return match error {
                    None => Ok(()),
                    Some(message) => Err(PublishError::Write(format!(
                        "load job {} failed: {message}",
                        handle.job_id
                    ))),
                };
            }
            if Instant::now() >= deadline {
                return Err(PublishError::Write(format!(
                    "load job {} did not finish within {}s",
                    handle.job_id,
                    self.job_timeout.as_secs()
                )));
            }

            std::thread::sleep(self.poll_interval);

            let mut req = self
                .client
                .get(self.job_url(project_id, &handle.job_id))
                .bearer_auth(token);
            if let Some(location) = handle.location.as_deref().or(self.location.as_deref()) {
                req = req.query(&[("location", location)]);
            }
            let resp = req
                .send()
                .map_err(|e| PublishError::Write(format!("job poll failed: {e}")))?;
            state = job_state(&read_job_response(resp)?)?;
            debug!(job_id = %handle.job_id, ?state, "polled load job");
        }
    }
}

impl WarehouseSink for BigQuerySink {
    fn name(&self) -> &str {
        "bigquery"
    }

    fn replace_table(
        &self,
        table: &TableRef,
        credential: &Credential,
        records: &[EnrichedAssetRecord],
    ) -> Result<usize, PublishError> {
        let token = auth::access_token(&self.client, credential)?;
        let handle = self.submit_load(table, &token, records)?;
        self.wait_for_job(&table.project_id, &token, &handle)?;
        info!(table = %table, rows = records.len(), job_id = %handle.job_id, "table replaced");
        Ok(records.len())
    }
}

// ── Request building ─────────────────────────────────────────────────

/// Load-job configuration: truncate-and-replace with an explicit schema.
pub fn load_job_metadata(table: &TableRef, location: Option<&str>) -> Value {
    let fields: Vec<Value> = ENRICHED_COLUMNS
        .iter()
        .map(|f| {
            json!({
                "name": f.name,
                "type": f.dtype.warehouse_type(),
                "mode": if f.nullable { "NULLABLE" } else { "REQUIRED" },
            })
        })
        .collect();

    let mut metadata = json!({
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": table.project_id,
                    "datasetId": table.dataset_id,
                    "tableId": table.table_id,
                },
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "writeDisposition": "WRITE_TRUNCATE",
                "createDisposition": "CREATE_IF_NEEDED",
                "schema": { "fields": fields },
            }
        }
    });
    if let Some(location) = location {
        metadata["jobReference"] = json!({ "location": location });
    }
    metadata
}

/// One JSON object per line, in record order.
pub fn to_ndjson(records: &[EnrichedAssetRecord]) -> Result<Vec<u8>, PublishError> {
    let mut out = Vec::with_capacity(records.len() * 384);
    for rec in records {
        serde_json::to_writer(&mut out, rec)
            .map_err(|e| PublishError::Write(format!("failed to encode row '{}': {e}", rec.id)))?;
        out.push(b'\n');
    }
    Ok(out)
}

/// `multipart/related` body: JSON job metadata, then the data part.
pub fn multipart_body(boundary: &str, metadata: &Value, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 2048);
    body.extend_from_slice(
        format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(
        format!("\r\n--{boundary}\r\nContent-Type: application/octet-stream\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

// ── Response handling ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum JobState {
    Pending,
    Running,
    /// Finished; `error` holds the job's `errorResult` message, if any.
    Done { error: Option<String> },
}

#[derive(Debug, Clone)]
struct JobHandle {
    job_id: String,
    location: Option<String>,
    state: JobState,
}

impl JobHandle {
    fn from_job(job: &Value) -> Result<Self, PublishError> {
        let reference = &job["jobReference"];
        let job_id = reference["jobId"]
            .as_str()
            .ok_or_else(|| PublishError::Write("job response has no jobReference.jobId".into()))?
            .to_string();
        Ok(Self {
            job_id,
            location: reference["location"].as_str().map(str::to_string),
            state: job_state(job)?,
        })
    }
}

/// Read `status.state` and `status.errorResult` from a job resource.
pub fn job_state(job: &Value) -> Result<JobState, PublishError> {
    let status = &job["status"];
    match status["state"].as_str() {
        Some("PENDING") => Ok(JobState::Pending),
        Some("RUNNING") => Ok(JobState::Running),
        Some("DONE") => {
            let error = status["errorResult"].as_object().map(|err| {
                err.get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string()
            });
            Ok(JobState::Done { error })
        }
        other => Err(PublishError::Write(format!(
            "unexpected job state: {}",
            other.unwrap_or("<missing>")
        ))),
    }
}

/// Map an API response to its JSON body, classifying rejections.
fn read_job_response(resp: reqwest::blocking::Response) -> Result<Value, PublishError> {
    let status = resp.status();
    let body = resp
        .text()
        .map_err(|e| PublishError::Write(format!("failed to read response body: {e}")))?;
    classify_status(status, &body)?;
    serde_json::from_str(&body)
        .map_err(|e| PublishError::Write(format!("malformed job response: {e}")))
}

fn classify_status(status: StatusCode, body: &str) -> Result<(), PublishError> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::UNAUTHORIZED {
        Err(PublishError::Authentication(format!(
            "credentials rejected (HTTP {status}): {body}"
        )))
    } else {
        Err(PublishError::Write(format!("request rejected (HTTP {status}): {body}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::test_server::serve;
    use chrono::{TimeZone, Utc};
    use cryptoboard_core::domain::{AthStatus, CapCategory, ChangeDirection};

    fn table() -> TableRef {
        TableRef::parse("api-crypto-dashboard", "API_CRYPTO_DASHBOARD.crypto_boys").unwrap()
    }

    fn btc() -> EnrichedAssetRecord {
        EnrichedAssetRecord {
            id: "bitcoin".into(),
            symbol: "btc".into(),
            name: "Bitcoin".into(),
            current_price: 63000.0,
            market_cap: 1.2e12,
            total_volume: 3e10,
            price_change_percentage_24h: 2.5,
            last_updated: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            ath: 70000.0,
            ath_diff: 7000.0,
            ath_gap_pct: Some(10.0),
            vol_to_market_cap: Some(0.025),
            cap_category: Some(CapCategory::LargeCap),
            change_direction: ChangeDirection::Up,
            ath_status: Some(AthStatus::Moderate),
        }
    }

    #[test]
    fn metadata_requests_truncating_load() {
        let meta = load_job_metadata(&table(), None);
        let load = &meta["configuration"]["load"];
        assert_eq!(load["writeDisposition"], "WRITE_TRUNCATE");
        assert_eq!(load["createDisposition"], "CREATE_IF_NEEDED");
        assert_eq!(load["sourceFormat"], "NEWLINE_DELIMITED_JSON");
        assert_eq!(load["destinationTable"]["tableId"], "crypto_boys");
        assert!(meta.get("jobReference").is_none());

        let fields = load["schema"]["fields"].as_array().unwrap();
        assert_eq!(fields.len(), ENRICHED_COLUMNS.len());
        assert_eq!(fields[7]["name"], "last_updated");
        assert_eq!(fields[7]["type"], "TIMESTAMP");
        assert_eq!(fields[10]["mode"], "NULLABLE");
    }

    #[test]
    fn metadata_carries_location_when_set() {
        let meta = load_job_metadata(&table(), Some("EU"));
        assert_eq!(meta["jobReference"]["location"], "EU");
    }

    #[test]
    fn ndjson_has_one_line_per_record_with_labels() {
        let mut zero = btc();
        zero.id = "zero".into();
        zero.ath_gap_pct = None;
        zero.ath_status = None;

        let data = to_ndjson(&[btc(), zero]).unwrap();
        let text = String::from_utf8(data).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["cap_category"], "Large Cap");
        assert_eq!(first["change_direction"], "up");
        assert_eq!(first["ath_status"], "moderate");

        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert!(second["ath_gap_pct"].is_null());
        assert!(second["ath_status"].is_null());
    }

    #[test]
    fn ndjson_of_nothing_is_empty() {
        assert!(to_ndjson(&[]).unwrap().is_empty());
    }

    #[test]
    fn multipart_body_frames_both_parts() {
        let meta = json!({"k": "v"});
        let body = multipart_body("b", &meta, b"row\n");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--b\r\nContent-Type: application/json"));
        assert!(text.contains("{\"k\":\"v\"}"));
        assert!(text.contains("application/octet-stream\r\n\r\nrow\n"));
        assert!(text.ends_with("\r\n--b--\r\n"));
    }

    #[test]
    fn job_state_parsing() {
        assert_eq!(
            job_state(&json!({"status": {"state": "RUNNING"}})).unwrap(),
            JobState::Running
        );
        assert_eq!(
            job_state(&json!({"status": {"state": "DONE"}})).unwrap(),
            JobState::Done { error: None }
        );
        assert_eq!(
            job_state(&json!({"status": {"state": "DONE", "errorResult": {"message": "bad row"}}}))
                .unwrap(),
            JobState::Done {
                error: Some("bad row".into())
            }
        );
        assert!(job_state(&json!({})).is_err());
    }

    #[test]
    fn unauthorized_is_authentication_other_rejections_are_write() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, ""),
            Err(PublishError::Authentication(_))
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            Err(PublishError::Write(_))
        ));
        assert!(classify_status(StatusCode::OK, "").is_ok());
    }

    fn local_sink(root: &str) -> BigQuerySink {
        let config = WarehouseConfig {
            location: Some("US".into()),
            job_poll_interval_ms: 1,
            job_timeout_secs: 5,
            ..WarehouseConfig::default()
        };
        BigQuerySink::new(&config).unwrap().with_api_root(root)
    }

    fn job(state: &str, error: Option<&str>) -> String {
        let mut job = json!({
            "jobReference": {"projectId": "api-crypto-dashboard", "jobId": "j1", "location": "US"},
            "status": {"state": state},
        });
        if let Some(message) = error {
            job["status"]["errorResult"] = json!({"reason": "invalid", "message": message});
        }
        job.to_string()
    }

    fn token() -> Credential {
        Credential::AccessToken("ya29.test".into())
    }

    #[test]
    fn rejected_upload_is_authentication_error() {
        let (root, server) = serve(vec![(
            401,
            r#"{"error":{"code":401,"message":"Request had invalid authentication credentials."}}"#
                .to_string(),
        )]);
        let err = local_sink(&root)
            .replace_table(&table(), &token(), &[btc()])
            .unwrap_err();
        assert!(matches!(err, PublishError::Authentication(_)));
        assert!(!err.is_transient());
        assert_eq!(server.join().unwrap().len(), 1);
    }

    #[test]
    fn failed_job_is_write_error() {
        let (root, server) = serve(vec![
            (200, job("RUNNING", None)),
            (200, job("DONE", Some("schema mismatch"))),
        ]);
        let err = local_sink(&root)
            .replace_table(&table(), &token(), &[btc()])
            .unwrap_err();
        match err {
            PublishError::Write(message) => {
                assert!(message.contains("j1"));
                assert!(message.contains("schema mismatch"));
            }
            other => panic!("expected write error, got {other:?}"),
        }
        assert_eq!(server.join().unwrap().len(), 2);
    }

    #[test]
    fn load_job_submits_then_polls_until_done() {
        let (root, server) = serve(vec![
            (200, job("PENDING", None)),
            (200, job("RUNNING", None)),
            (200, job("DONE", None)),
        ]);
        let written = local_sink(&root)
            .replace_table(&table(), &token(), &[btc()])
            .unwrap();
        assert_eq!(written, 1);

        let requests = server.join().unwrap();
        assert_eq!(requests.len(), 3);

        let upload = &requests[0];
        assert!(upload.starts_with(
            "POST /upload/bigquery/v2/projects/api-crypto-dashboard/jobs?uploadType=multipart "
        ));
        assert!(upload.to_ascii_lowercase().contains("authorization: bearer ya29.test"));
        assert!(upload.contains("WRITE_TRUNCATE"));
        assert!(upload.contains("\"id\":\"bitcoin\""));

        for poll in &requests[1..] {
            assert!(poll.starts_with("GET /bigquery/v2/projects/api-crypto-dashboard/jobs/j1?location=US "));
        }
    }

    #[test]
    fn unreachable_api_is_write_error() {
        let sink = BigQuerySink::new(&WarehouseConfig::default())
            .unwrap()
            .with_api_root("http://127.0.0.1:1");
        let err = sink
            .replace_table(&table(), &Credential::AccessToken("t".into()), &[btc()])
            .unwrap_err();
        assert!(matches!(err, PublishError::Write(_)));
    }
}
