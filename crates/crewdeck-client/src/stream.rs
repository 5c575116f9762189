use std::time::Duration;

use crewdeck_core::CrewEvent;
use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use crate::signal::Signal;

/// Backoff policy for reconnecting the run event stream.
///
/// Attempt `n` (0-based, counting consecutive failures since the last
/// successful open) waits `min(base * 2^n, cap)`. Once the counter would
/// pass `max_attempts`, the manager gives up and surfaces the closure
/// instead.
#[derive(Clone, Copy, Debug)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            cap: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        match 2u32
            .checked_pow(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
        {
            Some(delay) if delay < self.cap => delay,
            _ => self.cap,
        }
    }
}

/// Where the crew backend lives. The stream scheme mirrors the HTTP
/// scheme: a secure origin speaks `wss`, a plain one speaks `ws`.
#[derive(Clone, Debug)]
pub struct StreamOrigin {
    base: Url,
}

impl StreamOrigin {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    pub fn parse(base: &str) -> Result<Self, url::ParseError> {
        Ok(Self {
            base: Url::parse(base)?,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Stream endpoint for one run on this origin.
    pub fn stream_url(&self, run_id: &str) -> Result<Url, url::ParseError> {
        let scheme = match self.base.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        let host = self.base.host_str().unwrap_or("127.0.0.1");
        let authority = match self.base.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        Url::parse(&format!("{scheme}://{authority}/ws/crew/stream/{run_id}"))
    }
}

/// Handle to one live run stream.
///
/// `close` is idempotent and callable from any state; after it returns, no
/// further events are delivered and no pending reconnect timer fires.
/// Dropping the handle closes the stream the same way.
pub struct StreamHandle {
    close_flag: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    pub fn close(&self) {
        let _ = self.close_flag.send(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.close_flag.borrow()
    }

    /// Wait for the stream task to wind down. `on_close` has fired by the
    /// time this returns.
    pub async fn join(self) {
        let _ = self.close_flag.send(true);
        let _ = self.task.await;
    }
}

/// Open the event stream for `run_id` and pump parsed events into
/// `on_event`, in arrival order, one at a time.
///
/// Returns immediately; all connection work happens on a spawned task.
/// Transient disconnects are retried per `policy`; a server close with the
/// normal-closure code, a caller `close()`, or an exhausted retry budget
/// ends the stream and fires `on_close` exactly once. Connection failures
/// never escalate beyond that: no panics, no error returns. `connected`
/// tracks whether a socket is currently open.
pub fn open_run_stream(
    origin: &StreamOrigin,
    run_id: &str,
    policy: ReconnectPolicy,
    connected: Signal<bool>,
    on_event: impl FnMut(CrewEvent) + Send + 'static,
    on_close: impl FnOnce() + Send + 'static,
) -> StreamHandle {
    let (close_flag, close_rx) = watch::channel(false);
    let url = origin.stream_url(run_id);
    let task = tokio::spawn(run_stream(
        url, policy, connected, close_rx, on_event, on_close,
    ));
    StreamHandle { close_flag, task }
}

enum Disconnect {
    Terminal,
    Transient,
}

async fn run_stream(
    url: Result<Url, url::ParseError>,
    policy: ReconnectPolicy,
    connected: Signal<bool>,
    mut close_rx: watch::Receiver<bool>,
    mut on_event: impl FnMut(CrewEvent) + Send,
    on_close: impl FnOnce() + Send,
) {
    let url = match url {
        Ok(url) => url,
        Err(err) => {
            warn!(msg = "stream_bad_origin", error = %err);
            on_close();
            return;
        }
    };

    let mut attempts: u32 = 0;
    loop {
        match connect_once(&url, &connected, &mut close_rx, &mut on_event, &mut attempts).await {
            Disconnect::Terminal => break,
            Disconnect::Transient => {
                let delay = policy.delay(attempts);
                attempts += 1;
                if attempts > policy.max_attempts {
                    debug!(msg = "stream_give_up", url = %url, attempts);
                    break;
                }
                debug!(msg = "stream_reconnect", url = %url, attempts, delay_ms = delay.as_millis() as u64);
                // The backoff timer races the close flag so close() cancels
                // a pending reconnect deterministically.
                tokio::select! {
                    biased;
                    _ = wait_closed(&mut close_rx) => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    connected.set(false);
    on_close();
}

/// One connection lifetime: dial, then pump frames until the socket closes
/// or the caller does. Resets `attempts` on a successful open.
async fn connect_once(
    url: &Url,
    connected: &Signal<bool>,
    close_rx: &mut watch::Receiver<bool>,
    on_event: &mut (impl FnMut(CrewEvent) + Send),
    attempts: &mut u32,
) -> Disconnect {
    // Race the dial against close() so a handshake that completes late is
    // discarded rather than used.
    let dial = tokio::select! {
        biased;
        _ = wait_closed(close_rx) => return Disconnect::Terminal,
        dial = connect_async(url.as_str()) => dial,
    };

    let mut ws = match dial {
        Ok((ws, _response)) => ws,
        Err(err) => {
            debug!(msg = "stream_dial_error", url = %url, error = %err);
            return Disconnect::Transient;
        }
    };

    *attempts = 0;
    connected.set(true);
    debug!(msg = "stream_open", url = %url);

    let disconnect = loop {
        tokio::select! {
            biased;
            _ = wait_closed(close_rx) => {
                let _ = ws.close(None).await;
                break Disconnect::Terminal;
            }
            frame = ws.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<CrewEvent>(&text) {
                    Ok(event) => on_event(event),
                    // Malformed frames are dropped, never propagated.
                    Err(err) => debug!(msg = "stream_bad_frame", error = %err),
                },
                Some(Ok(Message::Close(frame))) => {
                    let normal = frame
                        .as_ref()
                        .is_some_and(|close| close.code == CloseCode::Normal);
                    debug!(msg = "stream_server_close", normal);
                    break if normal {
                        // The backend signals end-of-run with a clean close.
                        Disconnect::Terminal
                    } else {
                        Disconnect::Transient
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(msg = "stream_transport_error", error = %err);
                    break Disconnect::Transient;
                }
                None => break Disconnect::Transient,
            }
        }
    };

    connected.set(false);
    disconnect
}

async fn wait_closed(close_rx: &mut watch::Receiver<bool>) {
    while !*close_rx.borrow() {
        // A dropped sender means the handle is gone; treat it as closed.
        if close_rx.changed().await.is_err() {
            return;
        }
    }
}
