//! Client-side cockpit for observing a multi-agent crew run: a websocket
//! stream manager with bounded-backoff reconnection, an event-sourced run
//! projection exposed through observable signals, and a typed REST client
//! for the run/health endpoints.

pub mod api;
pub mod console;
pub mod projection;
pub mod signal;
pub mod stream;

pub use api::{ApiClient, ApiError};
pub use console::CrewConsole;
pub use projection::RunProjection;
pub use signal::{ConnectionSignals, Signal};
pub use stream::{open_run_stream, ReconnectPolicy, StreamHandle, StreamOrigin};
