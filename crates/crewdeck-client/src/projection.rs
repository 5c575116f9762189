use std::collections::BTreeMap;

use crewdeck_core::reports::RunStatusReport;
use crewdeck_core::{CrewEvent, RunStatus};
use tracing::debug;

use crate::signal::Signal;

/// Event-sourced view of one crew run.
///
/// The ordered event log is the source of truth; every other field is
/// either caller-driven lifecycle (`begin`, `tick_elapsed`) or derived from
/// the log on each append. Each field lives in its own [`Signal`] so a
/// consumer rendering only the active agent is never woken by report or
/// timing changes. Clones share the same underlying run.
#[derive(Clone, Debug)]
pub struct RunProjection {
    events: Signal<Vec<CrewEvent>>,
    status: Signal<RunStatus>,
    run_id: Signal<Option<String>>,
    topic: Signal<String>,
    report_markdown: Signal<Option<String>>,
    report_path: Signal<Option<String>>,
    charts: Signal<Vec<String>>,
    elapsed_seconds: Signal<f64>,
    error: Signal<Option<String>>,
    current_agent: Signal<Option<String>>,
    agent_timings: Signal<BTreeMap<String, f64>>,
}

impl RunProjection {
    pub fn new() -> Self {
        Self {
            events: Signal::new(Vec::new()),
            status: Signal::new(RunStatus::Idle),
            run_id: Signal::new(None),
            topic: Signal::new(String::new()),
            report_markdown: Signal::new(None),
            report_path: Signal::new(None),
            charts: Signal::new(Vec::new()),
            elapsed_seconds: Signal::new(0.0),
            error: Signal::new(None),
            current_agent: Signal::new(None),
            agent_timings: Signal::new(BTreeMap::new()),
        }
    }

    /// Caller-driven `idle -> running` transition, invoked when a run is
    /// initiated. Individual events never move a run into `running`.
    pub fn begin(&self, run_id: impl Into<String>, topic: impl Into<String>) {
        self.run_id.set(Some(run_id.into()));
        self.topic.set(topic.into());
        self.status.set(RunStatus::Running);
    }

    /// Fold one event into the run.
    ///
    /// Appends to the log, applies the kind-specific side effects, then
    /// recomputes the derived fields. Tolerates missing optional fields and
    /// duplicate or gapped logs (possible across stream reconnects); never
    /// fails.
    pub fn apply(&self, event: CrewEvent) {
        debug!(msg = "run_event", kind = event.kind(), agent = ?event.agent());

        let mut log = self.events.get();
        log.push(event.clone());
        let current_agent = latest_agent(&log);
        let agent_timings = fold_timings(&log);
        self.events.set(log);

        match &event {
            CrewEvent::CrewComplete {
                total_seconds,
                report_path,
                content,
                charts,
                ..
            } => {
                if report_path.is_some() {
                    self.report_path.set(report_path.clone());
                }
                if content.is_some() {
                    self.report_markdown.set(content.clone());
                }
                self.charts.set(charts.clone());
                if let Some(total) = total_seconds {
                    self.tick_elapsed(*total);
                }
                self.finish(RunStatus::Completed);
            }
            CrewEvent::Error {
                message,
                recoverable,
                ..
            } if !recoverable.unwrap_or(false) => {
                self.error.set(message.clone());
                self.finish(RunStatus::Error);
            }
            _ => {}
        }

        self.current_agent.set(current_agent);
        self.agent_timings.set(agent_timings);
    }

    /// Advance the elapsed clock. Sourced from periodic ticks while the run
    /// is live and from `crew_complete.total_seconds` at the end; never
    /// moves backwards.
    pub fn tick_elapsed(&self, seconds: f64) {
        if seconds > self.elapsed_seconds.get() {
            self.elapsed_seconds.set(seconds);
        }
    }

    /// Fill in the resolved report content once it has been fetched from
    /// the path announced by `crew_complete`.
    pub fn set_report_markdown(&self, markdown: impl Into<String>) {
        self.report_markdown.set(Some(markdown.into()));
    }

    /// Clear everything back to the initial state. The topic survives: it
    /// is operator input, not run output. Synchronous with no await points,
    /// so no observer task can interleave mid-clear; idempotent.
    pub fn reset(&self) {
        self.events.set(Vec::new());
        self.status.set(RunStatus::Idle);
        self.run_id.set(None);
        self.report_markdown.set(None);
        self.report_path.set(None);
        self.charts.set(Vec::new());
        self.elapsed_seconds.set(0.0);
        self.error.set(None);
        self.current_agent.set(None);
        self.agent_timings.set(BTreeMap::new());
    }

    /// One consistent view of the whole run, in the same shape the backend
    /// reports over REST.
    pub fn snapshot(&self) -> RunStatusReport {
        RunStatusReport {
            run_id: self.run_id.get().unwrap_or_default(),
            topic: self.topic.get(),
            status: self.status.get(),
            elapsed_seconds: Some(self.elapsed_seconds.get()),
            events_count: self.events.get().len() as u64,
            report_path: self.report_path.get(),
            charts: self.charts.get(),
            error: self.error.get(),
        }
    }

    pub fn events(&self) -> &Signal<Vec<CrewEvent>> {
        &self.events
    }

    pub fn status(&self) -> &Signal<RunStatus> {
        &self.status
    }

    pub fn run_id(&self) -> &Signal<Option<String>> {
        &self.run_id
    }

    pub fn topic(&self) -> &Signal<String> {
        &self.topic
    }

    pub fn report_markdown(&self) -> &Signal<Option<String>> {
        &self.report_markdown
    }

    pub fn report_path(&self) -> &Signal<Option<String>> {
        &self.report_path
    }

    pub fn charts(&self) -> &Signal<Vec<String>> {
        &self.charts
    }

    pub fn elapsed_seconds(&self) -> &Signal<f64> {
        &self.elapsed_seconds
    }

    pub fn error(&self) -> &Signal<Option<String>> {
        &self.error
    }

    pub fn current_agent(&self) -> &Signal<Option<String>> {
        &self.current_agent
    }

    pub fn agent_timings(&self) -> &Signal<BTreeMap<String, f64>> {
        &self.agent_timings
    }

    // Terminal statuses are sticky; only reset() leaves them.
    fn finish(&self, terminal: RunStatus) {
        if !self.status.get().is_terminal() {
            self.status.set(terminal);
        }
    }
}

impl Default for RunProjection {
    fn default() -> Self {
        Self::new()
    }
}

/// Agent named by the most recent `agent_start`, if any. An `agent_start`
/// without an agent field still shadows earlier ones.
fn latest_agent(log: &[CrewEvent]) -> Option<String> {
    log.iter()
        .rev()
        .find_map(|event| match event {
            CrewEvent::AgentStart { agent, .. } => Some(agent.clone()),
            _ => None,
        })
        .flatten()
}

/// Last-write-wins scan of `agent_complete` timings, skipping entries
/// missing either the agent or the duration.
fn fold_timings(log: &[CrewEvent]) -> BTreeMap<String, f64> {
    let mut timings = BTreeMap::new();
    for event in log {
        if let CrewEvent::AgentComplete {
            agent: Some(agent),
            elapsed_seconds: Some(seconds),
            ..
        } = event
        {
            timings.insert(agent.clone(), *seconds);
        }
    }
    timings
}
