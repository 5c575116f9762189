use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One progress notification emitted by the crew backend over the run
/// stream. The wire form is a JSON object tagged by `type`; the tag alone
/// decides which fields are meaningful. Fields the backend did not set are
/// absent on the wire, never repurposed for another kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrewEvent {
    /// An agent picked up a task.
    AgentStart {
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        vm: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_summary: Option<String>,
    },
    /// Intermediate text produced by an agent.
    AgentOutput {
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// An agent finished its task.
    AgentComplete {
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        elapsed_seconds: Option<f64>,
    },
    /// The manager handed work to a specialist.
    Delegation {
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instruction: Option<String>,
    },
    /// The visualizer wrote a chart image.
    ChartCreated {
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chart_title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    /// Terminal success: the whole run finished and artifacts are ready.
    CrewComplete {
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_seconds: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        report_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default)]
        charts: Vec<String>,
    },
    /// A run-level error. `recoverable` distinguishes a hiccup the backend
    /// worked around from a failure that ends the run.
    Error {
        timestamp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recoverable: Option<bool>,
    },
}

impl CrewEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CrewEvent::AgentStart { .. } => "agent_start",
            CrewEvent::AgentOutput { .. } => "agent_output",
            CrewEvent::AgentComplete { .. } => "agent_complete",
            CrewEvent::Delegation { .. } => "delegation",
            CrewEvent::ChartCreated { .. } => "chart_created",
            CrewEvent::CrewComplete { .. } => "crew_complete",
            CrewEvent::Error { .. } => "error",
        }
    }

    pub fn timestamp(&self) -> &str {
        match self {
            CrewEvent::AgentStart { timestamp, .. }
            | CrewEvent::AgentOutput { timestamp, .. }
            | CrewEvent::AgentComplete { timestamp, .. }
            | CrewEvent::Delegation { timestamp, .. }
            | CrewEvent::ChartCreated { timestamp, .. }
            | CrewEvent::CrewComplete { timestamp, .. }
            | CrewEvent::Error { timestamp, .. } => timestamp,
        }
    }

    /// Timestamp parsed as UTC, when the backend stamped a well-formed
    /// RFC 3339 instant.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.timestamp())
            .ok()
            .map(|instant| instant.with_timezone(&Utc))
    }

    /// The agent this event is attributed to, for kinds that carry one.
    pub fn agent(&self) -> Option<&str> {
        match self {
            CrewEvent::AgentStart { agent, .. }
            | CrewEvent::AgentOutput { agent, .. }
            | CrewEvent::AgentComplete { agent, .. }
            | CrewEvent::ChartCreated { agent, .. }
            | CrewEvent::Error { agent, .. } => agent.as_deref(),
            CrewEvent::Delegation { from, .. } => from.as_deref(),
            CrewEvent::CrewComplete { .. } => None,
        }
    }
}

/// Client-side run lifecycle. The backend reports a freshly created run as
/// `pending`, which maps onto `idle` here.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[serde(alias = "pending")]
    Idle,
    Running,
    Completed,
    Error,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Idle => "idle",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "idle" | "pending" => Ok(RunStatus::Idle),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "error" => Ok(RunStatus::Error),
            other => Err(format!("Unknown run status: {other}")),
        }
    }
}
