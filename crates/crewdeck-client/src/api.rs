use crewdeck_core::reports::{
    HealthReport, ReportDocument, RunEventLog, RunList, RunListEntry, RunStarted, RunStatusReport,
    WarmupReport,
};
use crewdeck_core::CrewEvent;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The backend answered but rejected the request (it reports not-found
    /// and not-ready conditions as 200 responses with an error body).
    #[error("backend error: {0}")]
    Backend(String),
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unexpected response shape: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}

/// Thin typed client for the crew backend's REST surface.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

impl ApiClient {
    pub fn new(base: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Kick off a crew run; the returned run id keys the event stream.
    pub async fn start_run(&self, topic: &str) -> Result<RunStarted, ApiError> {
        let url = self.base.join("/api/crew/run")?;
        let body: Value = self
            .http
            .post(url)
            .json(&json!({ "topic": topic }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        decode(body)
    }

    pub async fn run_status(&self, run_id: &str) -> Result<RunStatusReport, ApiError> {
        self.get(&format!("/api/crew/status/{run_id}")).await
    }

    /// The completed run's markdown report, resolved from the path the
    /// `crew_complete` event announced.
    pub async fn report(&self, run_id: &str) -> Result<ReportDocument, ApiError> {
        self.get(&format!("/api/crew/report/{run_id}")).await
    }

    pub async fn list_runs(&self) -> Result<Vec<RunListEntry>, ApiError> {
        let list: RunList = self.get("/api/crew/runs").await?;
        Ok(list.runs)
    }

    /// Full event log of a run, replayed over REST rather than the stream.
    pub async fn events(&self, run_id: &str) -> Result<Vec<CrewEvent>, ApiError> {
        let log: RunEventLog = self.get(&format!("/api/crew/events/{run_id}")).await?;
        Ok(log.events)
    }

    pub async fn health(&self) -> Result<HealthReport, ApiError> {
        self.get("/api/health").await
    }

    /// Ask the backend to pre-load its models.
    pub async fn warmup(&self) -> Result<WarmupReport, ApiError> {
        let url = self.base.join("/api/warmup")?;
        let body: Value = self
            .http
            .post(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        decode(body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.base.join(path)?;
        let body: Value = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        decode(body)
    }
}

/// Decode the expected shape, falling back to the backend's
/// `{"error": ...}` body when the payload does not fit. A status report
/// that legitimately carries a non-null `error` field still decodes as a
/// report.
fn decode<T: DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    match serde_json::from_value::<T>(body.clone()) {
        Ok(value) => Ok(value),
        Err(decode_err) => match body.get("error").and_then(Value::as_str) {
            Some(error) => Err(ApiError::Backend(error.to_string())),
            None => Err(ApiError::Decode(decode_err)),
        },
    }
}
