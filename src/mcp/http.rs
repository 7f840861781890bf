//! MCP server - HTTP transport
//!
//! `POST /mcp` carries one JSON-RPC frame per request; `GET /health` reports
//! liveness. Blocking microserver, connections served from a worker pool.
//!
//! Session model:
//! - Stateless (default): a fresh engine per call, closed once the response
//!   is built. Nothing leaks between callers.
//! - Stateful: `initialize` without an `Mcp-Session-Id` header opens a
//!   session and returns its id in that header; later calls send it back;
//!   `DELETE /mcp` ends the session. Sessions idle longer than the idle
//!   timeout are closed and forgotten, so a vanished client can't pin its
//!   engine and scratch directory forever.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::microserver::{self, HttpRequest, HttpResponse};
use super::protocol::{self, Response};
use super::server::{LogicServer, SERVER_NAME};
use crate::config::Config;
use crate::prolog::{CancelToken, EngineError, SessionEngine};

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Accept loop sleep between polls for new connections / shutdown.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// A slow client can hold a worker at most this long per read.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// How often the accept loop sweeps idle sessions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Idle sessions are closed after this long unless configured otherwise.
pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(30 * 60);

type EngineFactory = Box<dyn Fn() -> Result<SessionEngine, EngineError> + Send + Sync>;

struct Session {
    server: Arc<LogicServer>,
    last_used: Instant,
}

/// State shared across connection handlers.
pub struct HttpState {
    new_engine: EngineFactory,
    stateful: bool,
    timeout: Duration,
    idle_timeout: Duration,
    shutdown: CancelToken,
    sessions: Mutex<HashMap<String, Session>>,
    start_time: Instant,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    uptime_secs: u64,
    sessions: usize,
}

impl HttpState {
    pub fn new(
        new_engine: impl Fn() -> Result<SessionEngine, EngineError> + Send + Sync + 'static,
        stateful: bool,
        timeout: Duration,
        shutdown: CancelToken,
    ) -> Self {
        Self {
            new_engine: Box::new(new_engine),
            stateful,
            timeout,
            idle_timeout: DEFAULT_SESSION_IDLE,
            shutdown,
            sessions: Mutex::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Engines backed by the configured SWI-Prolog binary.
    pub fn from_config(config: &Config, shutdown: CancelToken) -> Self {
        let solver = config.solver.clone();
        Self::new(
            move || SessionEngine::new(&solver),
            config.server.stateful,
            config.solver.query_timeout(),
            shutdown,
        )
        .with_idle_timeout(config.server.session_idle())
    }

    /// Stateful sessions unused for `idle` are closed by [`HttpState::expire_idle`].
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    fn open_server(&self) -> Result<LogicServer, EngineError> {
        let engine = (self.new_engine)()?;
        Ok(LogicServer::new(engine, self.timeout).with_shutdown(self.shutdown.clone()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Look up a session and mark it used.
    fn touch(&self, id: &str) -> Option<Arc<LogicServer>> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(id)?;
        session.last_used = Instant::now();
        Some(Arc::clone(&session.server))
    }

    /// Close and forget sessions idle past the timeout. Returns how many.
    pub fn expire_idle(&self) -> usize {
        let idle = self.idle_timeout;
        let expired: Vec<_> = {
            let mut sessions = self.sessions.lock();
            let stale: Vec<String> = sessions
                .iter()
                .filter(|(_, s)| s.last_used.elapsed() >= idle)
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|s| (id, s)))
                .collect()
        };
        for (id, session) in &expired {
            tracing::info!(session = %id, "session expired after idling");
            session.server.close();
        }
        expired.len()
    }

    /// Close every open session.
    pub fn close_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().drain().collect();
        for (id, session) in sessions {
            tracing::debug!(session = %id, "closing session");
            session.server.close();
        }
    }
}

/// Consistent JSON error response for non-RPC failures
fn json_error(status: u16, message: &str) -> HttpResponse {
    HttpResponse::json(status, &serde_json::json!({ "error": message }))
}

fn rpc_response(status: u16, response: &Response) -> HttpResponse {
    HttpResponse::json(status, response)
}

/// Route request to handler
pub fn route_request(request: &HttpRequest, state: &HttpState) -> HttpResponse {
    let response = match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => handle_health(state),
        ("POST", "/mcp") => handle_mcp(request, state),
        ("DELETE", "/mcp") => handle_end_session(request, state),
        (_, "/mcp") | (_, "/health") => json_error(405, "Method not allowed"),
        _ => json_error(404, "Not found"),
    };
    response.with_header("X-Content-Type-Options", "nosniff")
}

fn handle_health(state: &HttpState) -> HttpResponse {
    HttpResponse::json(
        200,
        &HealthResponse {
            status: "healthy",
            service: SERVER_NAME,
            version: env!("CARGO_PKG_VERSION"),
            uptime_secs: state.start_time.elapsed().as_secs(),
            sessions: state.session_count(),
        },
    )
}

fn handle_mcp(request: &HttpRequest, state: &HttpState) -> HttpResponse {
    let frame = String::from_utf8_lossy(&request.body);
    let rpc = match protocol::decode(&frame) {
        Ok(rpc) => rpc,
        Err(response) => return rpc_response(200, &response),
    };

    if !state.stateful {
        let server = match state.open_server() {
            Ok(server) => server,
            Err(e) => {
                tracing::error!(error = %e, "failed to construct session engine");
                return engine_unavailable(rpc.id, &e);
            }
        };
        let response = server.handle(&rpc);
        server.close();
        return match response {
            Some(response) => rpc_response(200, &response),
            None => HttpResponse::empty(202),
        };
    }

    state.expire_idle();
    let (server, session_id, created) = match request.header(SESSION_HEADER) {
        Some(id) => match state.touch(id) {
            Some(server) => (server, id.to_string(), false),
            None => return json_error(404, "Unknown session"),
        },
        None if rpc.method == "initialize" => {
            let server = match state.open_server() {
                Ok(server) => Arc::new(server),
                Err(e) => {
                    tracing::error!(error = %e, "failed to construct session engine");
                    return engine_unavailable(rpc.id, &e);
                }
            };
            let id = uuid::Uuid::new_v4().to_string();
            state.sessions.lock().insert(
                id.clone(),
                Session {
                    server: Arc::clone(&server),
                    last_used: Instant::now(),
                },
            );
            tracing::info!(session = %id, "session opened");
            (server, id, true)
        }
        None => {
            return json_error(
                400,
                &format!("Missing {} header; call initialize first", SESSION_HEADER),
            )
        }
    };

    let response = match server.handle(&rpc) {
        Some(response) => rpc_response(200, &response),
        None => HttpResponse::empty(202),
    };
    if created {
        response.with_header(SESSION_HEADER, &session_id)
    } else {
        response
    }
}

fn engine_unavailable(id: Option<serde_json::Value>, e: &EngineError) -> HttpResponse {
    rpc_response(
        503,
        &Response::error_with_data(id, protocol::INTERNAL_ERROR, "Engine unavailable", e.to_string()),
    )
}

fn handle_end_session(request: &HttpRequest, state: &HttpState) -> HttpResponse {
    if !state.stateful {
        return json_error(405, "Sessions are not enabled");
    }
    let Some(id) = request.header(SESSION_HEADER) else {
        return json_error(400, &format!("Missing {} header", SESSION_HEADER));
    };
    let removed = state.sessions.lock().remove(id);
    match removed {
        Some(session) => {
            session.server.close();
            tracing::info!(session = %id, "session closed");
            HttpResponse::empty(204)
        }
        None => json_error(404, "Unknown session"),
    }
}

/// Handle one connection on any Read + Write stream.
fn handle_connection(stream: &mut (impl Read + Write), state: &HttpState) {
    let response = match microserver::read_request(stream) {
        Some(Ok(request)) => route_request(&request, state),
        Some(Err(e)) => {
            tracing::debug!(error = %e, "rejecting request");
            json_error(e.status(), &e.to_string())
        }
        None => return, // clean close, no response needed
    };
    if let Err(e) = microserver::write_response(stream, &response) {
        tracing::debug!(error = %e, "client went away before the response was written");
    }
}

/// Bind and serve until shutdown.
pub fn run(config: &Config, shutdown: CancelToken) -> Result<()> {
    // Fail at startup, not on the first request, if the solver is missing
    SessionEngine::new(&config.solver)
        .context("Failed to initialize Prolog engine")?
        .close();

    let state = Arc::new(HttpState::from_config(config, shutdown.clone()));
    let addr = config.server.bind_addr();
    let listener = TcpListener::bind(&addr).with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(
        addr = %addr,
        stateful = config.server.stateful,
        workers = config.server.workers,
        "MCP server listening on http://{}/mcp",
        addr
    );

    serve(listener, state, config.server.workers, &shutdown)
}

/// Accept connections on `listener` until `shutdown` is cancelled.
pub fn serve(
    listener: TcpListener,
    state: Arc<HttpState>,
    workers: usize,
    shutdown: &CancelToken,
) -> Result<()> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("logic-mcp-http-{}", i))
        .build()
        .context("Failed to build HTTP worker pool")?;

    listener
        .set_nonblocking(true)
        .context("Failed to configure listener")?;

    let mut last_sweep = Instant::now();
    while !shutdown.is_cancelled() {
        if state.stateful && last_sweep.elapsed() >= SWEEP_INTERVAL {
            state.expire_idle();
            last_sweep = Instant::now();
        }
        match listener.accept() {
            Ok((mut stream, peer)) => {
                if let Err(e) = stream
                    .set_nonblocking(false)
                    .and_then(|_| stream.set_read_timeout(Some(READ_TIMEOUT)))
                {
                    tracing::warn!(peer = %peer, error = %e, "dropping connection");
                    continue;
                }
                let state = Arc::clone(&state);
                pool.spawn(move || {
                    handle_connection(&mut stream, &state);
                    let _ = stream.shutdown(Shutdown::Write);
                });
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) => tracing::warn!(error = %e, "TCP accept error"),
        }
    }

    tracing::info!("shutdown requested, closing sessions");
    state.close_all();
    Ok(())
}
