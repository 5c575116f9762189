use serde::{Deserialize, Serialize};

use crate::event::{CrewEvent, RunStatus};

/// Acknowledgement returned when a run is kicked off
/// (`POST /api/crew/run`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStarted {
    pub run_id: String,
    pub status: String,
}

/// Point-in-time view of one run (`GET /api/crew/status/{run_id}`), also
/// produced locally by the projection's `snapshot()`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunStatusReport {
    pub run_id: String,
    pub topic: String,
    pub status: RunStatus,
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub events_count: u64,
    #[serde(default)]
    pub report_path: Option<String>,
    #[serde(default)]
    pub charts: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Resolved report content (`GET /api/crew/report/{run_id}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportDocument {
    pub run_id: String,
    pub report: String,
    #[serde(default)]
    pub charts: Vec<String>,
}

/// One row of the run listing (`GET /api/crew/runs`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunListEntry {
    pub run_id: String,
    pub topic: String,
    pub status: RunStatus,
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunList {
    pub runs: Vec<RunListEntry>,
}

/// Full event log of a run (`GET /api/crew/events/{run_id}`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RunEventLog {
    pub events: Vec<CrewEvent>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Ok,
    Degraded,
    Unavailable,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Ok => "ok",
            ServiceState::Degraded => "degraded",
            ServiceState::Unavailable => "unavailable",
        }
    }
}

/// Reachability of one model engine behind the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineHealth {
    pub ollama: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
}

/// Backend health summary (`GET /api/health`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthReport {
    pub status: ServiceState,
    #[serde(default)]
    pub mock_mode: bool,
    pub orchestrator: EngineHealth,
    pub specialist: EngineHealth,
}

impl HealthReport {
    /// Whether the backing service is usable at all. A degraded backend
    /// (one engine down) still accepts runs.
    pub fn reachable(&self) -> bool {
        self.status != ServiceState::Unavailable
    }
}

/// Model pre-load timings (`POST /api/warmup`). A negative duration marks
/// an engine that failed to warm up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WarmupReport {
    pub orchestrator_ms: i64,
    pub specialist_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_mode: Option<bool>,
}
