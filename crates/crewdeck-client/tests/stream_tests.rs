use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use crewdeck_client::{open_run_stream, ReconnectPolicy, RunProjection, Signal, StreamOrigin};
use crewdeck_core::CrewEvent;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

#[derive(Clone, Copy)]
enum Mode {
    /// Send two events, then hold the socket open until the client leaves.
    StayOpen,
    /// Send garbage, then a valid event, then a normal close.
    MalformedThenNormalClose,
    /// Close with the normal code before sending anything.
    NormalCloseImmediately,
    /// Drop the first two connections mid-stream, then end the third
    /// cleanly.
    DropTwiceThenNormalClose,
    /// Accept and immediately drop every connection.
    DropAlways,
}

#[derive(Clone)]
struct ServerState {
    connections: Arc<AtomicUsize>,
    mode: Mode,
}

async fn launch_server(mode: Mode) -> (StreamOrigin, Arc<AtomicUsize>) {
    let state = ServerState {
        connections: Arc::new(AtomicUsize::new(0)),
        mode,
    };
    let connections = state.connections.clone();
    let app = Router::new()
        .route("/ws/crew/stream/:run_id", get(stream_route))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    let origin = StreamOrigin::parse(&format!("http://{addr}")).expect("origin");
    (origin, connections)
}

async fn stream_route(
    ws: WebSocketUpgrade,
    Path(_run_id): Path<String>,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| drive_socket(socket, state))
}

async fn drive_socket(mut socket: WebSocket, state: ServerState) {
    let connection = state.connections.fetch_add(1, Ordering::SeqCst);
    match state.mode {
        Mode::StayOpen => {
            let _ = socket
                .send(Message::Text(agent_start_json("researcher")))
                .await;
            let _ = socket
                .send(Message::Text(agent_output_json("researcher", "digging in")))
                .await;
            while socket.recv().await.is_some() {}
        }
        Mode::MalformedThenNormalClose => {
            let _ = socket.send(Message::Text("not json".to_string())).await;
            let _ = socket
                .send(Message::Text(agent_output_json("analyst", "numbers ready")))
                .await;
            let _ = socket.send(Message::Close(Some(normal_close()))).await;
        }
        Mode::NormalCloseImmediately => {
            let _ = socket.send(Message::Close(Some(normal_close()))).await;
        }
        Mode::DropTwiceThenNormalClose => {
            let agent = ["first", "second", "third"][connection.min(2)];
            let _ = socket.send(Message::Text(agent_start_json(agent))).await;
            if connection >= 2 {
                let _ = socket.send(Message::Close(Some(normal_close()))).await;
            }
            // Dropping the socket without a close frame simulates a dying
            // backend; the early return does exactly that.
        }
        Mode::DropAlways => {}
    }
}

fn normal_close() -> CloseFrame<'static> {
    CloseFrame {
        code: close_code::NORMAL,
        reason: "".into(),
    }
}

fn agent_start_json(agent: &str) -> String {
    json!({ "type": "agent_start", "agent": agent, "timestamp": "t1" }).to_string()
}

fn agent_output_json(agent: &str, content: &str) -> String {
    json!({
        "type": "agent_output",
        "agent": agent,
        "content": content,
        "timestamp": "t2"
    })
    .to_string()
}

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base: Duration::from_millis(10),
        cap: Duration::from_millis(40),
        max_attempts: 5,
    }
}

struct Observer {
    events: mpsc::UnboundedReceiver<CrewEvent>,
    closed: oneshot::Receiver<()>,
}

fn observe(
    origin: &StreamOrigin,
    policy: ReconnectPolicy,
    connected: Signal<bool>,
    projection: RunProjection,
) -> (crewdeck_client::StreamHandle, Observer) {
    let (event_tx, events) = mpsc::unbounded_channel();
    let (close_tx, closed) = oneshot::channel();
    let handle = open_run_stream(
        origin,
        "run-42",
        policy,
        connected,
        move |event| {
            projection.apply(event.clone());
            let _ = event_tx.send(event);
        },
        move || {
            let _ = close_tx.send(());
        },
    );
    (handle, Observer { events, closed })
}

async fn next_event(observer: &mut Observer) -> CrewEvent {
    timeout(Duration::from_secs(5), observer.events.recv())
        .await
        .expect("event in time")
        .expect("stream alive")
}

async fn wait_for_close(observer: &mut Observer) {
    timeout(Duration::from_secs(5), &mut observer.closed)
        .await
        .expect("close in time")
        .expect("on_close fired");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delivers_events_in_order_into_the_projection() {
    let (origin, _connections) = launch_server(Mode::StayOpen).await;
    let run = RunProjection::new();
    run.begin("run-42", "edge ai market");
    let connected = Signal::new(false);
    let (handle, mut observer) = observe(&origin, fast_policy(), connected.clone(), run.clone());

    let first = next_event(&mut observer).await;
    assert_eq!(
        first,
        CrewEvent::AgentStart {
            timestamp: "t1".to_string(),
            run_id: None,
            agent: Some("researcher".to_string()),
            role: None,
            model: None,
            vm: None,
            task_summary: None,
        }
    );
    let second = next_event(&mut observer).await;
    assert_eq!(second.kind(), "agent_output");

    assert_eq!(run.current_agent().get().as_deref(), Some("researcher"));
    assert_eq!(run.events().get().len(), 2);
    assert!(connected.get());

    handle.close();
    handle.close(); // idempotent
    wait_for_close(&mut observer).await;
    assert!(!connected.get());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_frames_are_dropped_without_losing_the_rest() {
    let (origin, _connections) = launch_server(Mode::MalformedThenNormalClose).await;
    let run = RunProjection::new();
    let connected = Signal::new(false);
    let (_handle, mut observer) = observe(&origin, fast_policy(), connected, run.clone());

    let event = next_event(&mut observer).await;
    assert_eq!(event.kind(), "agent_output");
    assert_eq!(event.agent(), Some("analyst"));

    wait_for_close(&mut observer).await;
    assert_eq!(run.events().get().len(), 1);
    assert!(observer.events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn normal_close_never_reconnects() {
    let (origin, connections) = launch_server(Mode::NormalCloseImmediately).await;
    let run = RunProjection::new();
    let connected = Signal::new(false);
    let (_handle, mut observer) = observe(&origin, fast_policy(), connected, run);

    wait_for_close(&mut observer).await;
    // Give a wrongful reconnect ample time to show up.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_drops_reconnect_and_a_successful_open_resets_the_budget() {
    let (origin, connections) = launch_server(Mode::DropTwiceThenNormalClose).await;
    let run = RunProjection::new();
    let connected = Signal::new(false);
    // One retry of budget: only the per-open counter reset lets the stream
    // survive two separate drops.
    let policy = ReconnectPolicy {
        base: Duration::from_millis(10),
        cap: Duration::from_millis(40),
        max_attempts: 1,
    };
    let (_handle, mut observer) = observe(&origin, policy, connected, run.clone());

    assert_eq!(next_event(&mut observer).await.agent(), Some("first"));
    assert_eq!(next_event(&mut observer).await.agent(), Some("second"));
    assert_eq!(next_event(&mut observer).await.agent(), Some("third"));

    wait_for_close(&mut observer).await;
    assert_eq!(connections.load(Ordering::SeqCst), 3);
    assert_eq!(run.current_agent().get().as_deref(), Some("third"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn gives_up_after_max_consecutive_failures() {
    // A freshly released port: every dial is refused.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let origin = StreamOrigin::parse(&format!("http://{addr}")).expect("origin");

    let run = RunProjection::new();
    let connected = Signal::new(false);
    let (_handle, mut observer) = observe(&origin, fast_policy(), connected.clone(), run);

    wait_for_close(&mut observer).await;
    assert!(!connected.get());
    assert!(observer.events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_cancels_a_pending_reconnect_timer() {
    let (origin, connections) = launch_server(Mode::DropAlways).await;
    let run = RunProjection::new();
    let connected = Signal::new(false);
    // Long enough backoff that close() lands mid-timer.
    let policy = ReconnectPolicy {
        base: Duration::from_millis(500),
        cap: Duration::from_millis(500),
        max_attempts: 5,
    };
    let (handle, mut observer) = observe(&origin, policy, connected, run.clone());

    // Wait for the first (immediately dropped) connection.
    timeout(Duration::from_secs(5), async {
        while connections.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("first connection");

    handle.close();
    wait_for_close(&mut observer).await;

    // The pending timer must not fire a second dial.
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(connections.load(Ordering::SeqCst), 1);
    assert!(observer.events.try_recv().is_err());
    assert!(run.events().get().is_empty());
}
