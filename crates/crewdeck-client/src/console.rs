use std::sync::Mutex;

use crewdeck_core::CrewEvent;
use tracing::{info, warn};
use url::Url;

use crate::api::{ApiClient, ApiError};
use crate::projection::RunProjection;
use crate::signal::{ConnectionSignals, Signal};
use crate::stream::{open_run_stream, ReconnectPolicy, StreamHandle, StreamOrigin};

/// One observer session over the crew backend.
///
/// Owns the run projection, the reachability signals, and the API client,
/// and is passed explicitly to whatever needs them. At most one live stream
/// at a time; attaching to another run closes the previous stream first.
pub struct CrewConsole {
    api: ApiClient,
    origin: StreamOrigin,
    policy: ReconnectPolicy,
    run: RunProjection,
    signals: ConnectionSignals,
    stream: Mutex<Option<StreamHandle>>,
    live: Mutex<Signal<bool>>,
}

impl CrewConsole {
    pub fn new(base: Url) -> Self {
        Self::with_policy(base, ReconnectPolicy::default())
    }

    pub fn with_policy(base: Url, policy: ReconnectPolicy) -> Self {
        Self {
            api: ApiClient::new(base.clone()),
            origin: StreamOrigin::new(base),
            policy,
            run: RunProjection::new(),
            signals: ConnectionSignals::new(),
            stream: Mutex::new(None),
            live: Mutex::new(Signal::new(false)),
        }
    }

    pub fn run(&self) -> &RunProjection {
        &self.run
    }

    pub fn signals(&self) -> &ConnectionSignals {
        &self.signals
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// True while the current attachment's stream is running (including
    /// reconnect gaps); flips false once it closes terminally. Each attach
    /// gets a fresh signal, so a late closure of a replaced stream cannot
    /// clobber the new one.
    pub fn stream_live(&self) -> Signal<bool> {
        match self.live.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Start a new crew run on the backend and follow its event stream.
    /// Returns the backend-minted run id.
    pub async fn start_run(&self, topic: &str) -> Result<String, ApiError> {
        let started = self.api.start_run(topic).await?;
        info!(msg = "run_started", run_id = %started.run_id, topic);
        self.run.reset();
        self.run.begin(&started.run_id, topic);
        self.attach(&started.run_id);
        Ok(started.run_id)
    }

    /// Follow an existing run: open its stream and pump every event into
    /// the projection. When the run completes, the resolved report markdown
    /// is fetched over REST and filled in.
    pub fn attach(&self, run_id: &str) {
        self.detach();

        let projection = self.run.clone();
        let api = self.api.clone();
        let stream_run = run_id.to_string();
        let on_event = move |event: CrewEvent| {
            let finished = matches!(event, CrewEvent::CrewComplete { .. });
            projection.apply(event);
            if finished && projection.report_markdown().get().is_none() {
                let api = api.clone();
                let projection = projection.clone();
                let run_id = stream_run.clone();
                tokio::spawn(async move {
                    match api.report(&run_id).await {
                        Ok(document) => projection.set_report_markdown(document.report),
                        Err(err) => {
                            warn!(msg = "report_fetch_error", run_id = %run_id, error = %err);
                        }
                    }
                });
            }
        };

        let live = Signal::new(true);
        if let Ok(mut slot) = self.live.lock() {
            *slot = live.clone();
        }
        let closed_run = run_id.to_string();
        let on_close = move || {
            info!(msg = "stream_closed", run_id = %closed_run);
            live.set(false);
        };

        let handle = open_run_stream(
            &self.origin,
            run_id,
            self.policy,
            self.signals.stream_connected.clone(),
            on_event,
            on_close,
        );
        if let Ok(mut slot) = self.stream.lock() {
            *slot = Some(handle);
        }
    }

    /// Stop following the current run, if any. Idempotent.
    pub fn detach(&self) {
        if let Ok(mut slot) = self.stream.lock() {
            if let Some(handle) = slot.take() {
                handle.close();
            }
        }
    }

    /// Probe the backend and drive the service reachability signal.
    pub async fn refresh_health(&self) -> bool {
        let reachable = match self.api.health().await {
            Ok(health) => health.reachable(),
            Err(err) => {
                warn!(msg = "health_probe_error", error = %err);
                false
            }
        };
        self.signals.api_reachable.set(reachable);
        reachable
    }
}

impl Drop for CrewConsole {
    fn drop(&mut self) {
        self.detach();
    }
}
