//! Request pipeline and HTTP server.
//!
//! # Overview
//!
//! - **`GatewayHandler`** - the per-call pipeline. Takes one inbound HTTP
//!   request and produces exactly one response: the upstream's, relayed
//!   verbatim, or a locally built rejection.
//! - **`GatewayServer`** - accept loop, per-connection tasks, idle
//!   connection reaping and graceful shutdown.
//!
//! # Request Flow
//!
//! 1. Reject anything but POST (405, not a JSON-RPC error)
//! 2. Check inbound Basic credentials, when enabled (401 + challenge)
//! 3. Read the body within `read_timeout` and `max_body_size`
//! 4. Decode the envelope (single or batch)
//! 5. Check every method against the allowlist
//! 6. Forward the raw body upstream, raced against connection cancellation
//! 7. Relay status, headers and streamed body, bounded by the write deadline
//!
//! Any failure in 3–6 short-circuits to a single JSON-RPC error envelope.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http_body::{Frame, SizeHint};
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, error, info, warn};

use crate::auth::InboundAuth;
use crate::config::Settings;
use crate::error::{GatewayError, Rejection};
use crate::logging_layer::{logging_layer, record_envelope, record_outcome};
use crate::relay_body::RelayBody;
use crate::transport::jsonrpc::parse_envelope;
use crate::transport::upstream::{UpstreamClient, UpstreamForwarder};

/// Shared state for request handlers.
pub struct GatewayState {
    /// Immutable settings, shared with the server
    pub settings: Arc<Settings>,
    /// Inbound credential check (`None` = disabled)
    pub inbound_auth: Option<InboundAuth>,
    /// Upstream client (trait object so tests can substitute a mock)
    pub upstream: Arc<dyn UpstreamForwarder>,
}

/// The per-call pipeline.
///
/// Cheap to clone; every clone shares the same state and upstream pool.
#[derive(Clone)]
pub struct GatewayHandler {
    state: Arc<GatewayState>,
}

impl GatewayHandler {
    /// Create a handler with a real upstream client.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::RequestBuild` if the upstream client cannot
    /// be constructed.
    pub fn new(settings: Arc<Settings>) -> Result<Self, GatewayError> {
        let upstream = UpstreamClient::new(&settings.upstream)?;
        Ok(Self::with_upstream(settings, Arc::new(upstream)))
    }

    /// Create a handler with a custom upstream (for testing).
    pub fn with_upstream(settings: Arc<Settings>, upstream: Arc<dyn UpstreamForwarder>) -> Self {
        let inbound_auth = settings.inbound_auth.clone().map(InboundAuth::new);
        Self {
            state: Arc::new(GatewayState {
                settings,
                inbound_auth,
                upstream,
            }),
        }
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.state.settings
    }

    /// Axum router serving every path with the pipeline.
    pub fn router(&self) -> Router {
        Router::new()
            .fallback(handle_call)
            .with_state(self.clone())
            .layer(logging_layer())
    }

    /// Handle one inbound call.
    ///
    /// The connection's cancellation token is taken from the request
    /// extensions; requests built without one are never cancelled.
    pub async fn handle(&self, request: Request) -> Response {
        let cancel = request
            .extensions()
            .get::<CancellationToken>()
            .cloned()
            .unwrap_or_default();

        match self.process(request, cancel).await {
            Ok(response) => response,
            Err(rejection) => {
                record_outcome(rejection.error.error_type_name());
                if rejection.error != GatewayError::Unauthorized {
                    debug!(
                        error_type = rejection.error.error_type_name(),
                        code = rejection.error.to_jsonrpc_code(),
                        "Request rejected"
                    );
                }
                rejection.into_response()
            }
        }
    }

    async fn process(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> Result<Response, Rejection> {
        let started = Instant::now();
        let settings = &self.state.settings;

        if request.method() != Method::POST {
            debug!(method = %request.method(), "Rejected non-POST request");
            record_outcome("non_post");
            return Ok(method_not_allowed());
        }

        if let Some(auth) = &self.state.inbound_auth {
            auth.verify(request.headers()).map_err(|error| {
                warn!(error_type = error.error_type_name(), "Inbound authentication failed");
                Rejection::anonymous(error)
            })?;
        }

        let body = read_body(request.into_body(), settings.max_body_size, settings.read_timeout)
            .await?;

        let envelope = parse_envelope(&body)?;
        record_envelope(&envelope);

        settings.allowed_methods.check(&envelope)?;

        debug!(
            batch = envelope.is_batch(),
            requests = envelope.len(),
            "Envelope allowed, forwarding"
        );

        let reply = self
            .state
            .upstream
            .forward(body, &cancel)
            .await
            .map_err(|error| Rejection::new(envelope.envelope_id(), error))?;

        let deadline = started + settings.write_timeout();
        let mut response = Response::new(Body::new(RelayBody::new(reply.body, deadline, cancel)));
        *response.status_mut() = reply.status;
        *response.headers_mut() = reply.headers;

        record_outcome("forwarded");
        Ok(response)
    }
}

/// Axum fallback handler: every path, every method.
async fn handle_call(State(handler): State<GatewayHandler>, request: Request) -> Response {
    handler.handle(request).await
}

fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        "Method not allowed",
    )
        .into_response()
}

/// Buffer the inbound body, bounded in size and time.
///
/// The body must be complete before the envelope can be decoded, and the
/// same bytes are forwarded afterwards.
async fn read_body(body: Body, limit: usize, timeout: Duration) -> Result<Bytes, GatewayError> {
    match tokio::time::timeout(timeout, Limited::new(body, limit).collect()).await {
        Ok(Ok(collected)) => Ok(collected.to_bytes()),
        Ok(Err(e)) => {
            warn!(error = %e, limit, "Failed to read request body");
            Err(GatewayError::unreadable_body())
        }
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs_f64(), "Timed out reading request body");
            Err(GatewayError::unreadable_body())
        }
    }
}

// ============================================================================
// Server
// ============================================================================

/// Connection tracker for graceful shutdown.
#[derive(Clone, Default)]
struct ConnectionTracker {
    active_connections: Arc<AtomicUsize>,
}

impl ConnectionTracker {
    fn track(&self) -> TrackedConnection {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        TrackedConnection(self.active_connections.clone())
    }

    fn count(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }
}

/// Decrements the active count when the connection task ends, even on panic.
struct TrackedConnection(Arc<AtomicUsize>);

impl Drop for TrackedConnection {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// HTTP server running the gateway pipeline.
pub struct GatewayServer {
    handler: GatewayHandler,
}

impl GatewayServer {
    pub fn new(handler: GatewayHandler) -> Self {
        Self { handler }
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> std::io::Result<TcpListener> {
        TcpListener::bind(&self.handler.settings().listen).await
    }

    /// Serve connections from `listener` until `shutdown` fires, then drain.
    ///
    /// Active connections get `shutdown_timeout` to finish their in-flight
    /// requests. After that every remaining connection is cancelled, which
    /// aborts its upstream call and ends its relay.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
        let settings = self.handler.settings().clone();
        let router = self.handler.router();
        let connections = CancellationToken::new();
        let tracker = ConnectionTracker::default();

        info!(addr = %listener.local_addr()?, "Gateway listening");

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(error = %e, "Failed to set TCP_NODELAY");
                            }

                            let router = router.clone();
                            let conn = ConnectionContext {
                                peer_addr,
                                cancel: connections.child_token(),
                                shutdown: shutdown.clone(),
                                idle_timeout: settings.idle_timeout,
                                read_timeout: settings.read_timeout,
                            };
                            let tracked = tracker.track();

                            tokio::spawn(async move {
                                handle_connection(stream, router, conn).await;
                                drop(tracked);
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            // Typically fd exhaustion; avoid a hot loop
                            sleep(Duration::from_millis(100)).await;
                        }
                    }
                }

                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping new connections");
                    break;
                }
            }
        }

        drop(listener);

        info!(
            active_connections = tracker.count(),
            timeout_secs = settings.shutdown_timeout.as_secs_f64(),
            "Waiting for active connections to drain"
        );

        let drain_deadline = Instant::now() + settings.shutdown_timeout;
        let mut last_report = Instant::now();

        while tracker.count() > 0 {
            if Instant::now() >= drain_deadline {
                warn!(
                    active_connections = tracker.count(),
                    "Shutdown timeout reached, cancelling remaining connections"
                );
                connections.cancel();
                break;
            }

            sleep(Duration::from_millis(100)).await;

            if last_report.elapsed() >= Duration::from_secs(5) {
                last_report = Instant::now();
                info!(
                    active_connections = tracker.count(),
                    "Still draining connections..."
                );
            }
        }

        if tracker.count() == 0 {
            info!("All connections drained, shutting down cleanly");
        }

        Ok(())
    }
}

/// Everything a connection task needs besides the socket and router.
struct ConnectionContext {
    peer_addr: SocketAddr,
    /// Cancelled when this connection ends, or when the drain deadline passes
    cancel: CancellationToken,
    shutdown: CancellationToken,
    idle_timeout: Duration,
    read_timeout: Duration,
}

/// Serve one connection until the client closes it, it idles out, or the
/// server shuts down.
async fn handle_connection(stream: TcpStream, router: Router, conn: ConnectionContext) {
    let ConnectionContext {
        peer_addr,
        cancel,
        shutdown,
        idle_timeout,
        read_timeout,
    } = conn;

    // In-flight upstream calls observe this when the connection goes away
    let _cancel_on_close = cancel.clone().drop_guard();
    let activity = Arc::new(ConnectionActivity::new());

    let svc_fn = {
        let activity = activity.clone();
        let cancel = cancel.clone();
        hyper::service::service_fn(move |mut req: hyper::Request<Incoming>| {
            let router = router.clone();
            let in_flight = activity.begin();
            req.extensions_mut().insert(cancel.clone());
            req.extensions_mut().insert(ConnectInfo(peer_addr));
            async move {
                let response = match router.oneshot(req.map(Body::new)).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                };
                Ok::<_, Infallible>(response.map(|body| TrackedBody {
                    inner: body,
                    _in_flight: in_flight,
                }))
            }
        })
    };

    let io = TokioIo::new(stream);
    let mut builder = auto::Builder::new(TokioExecutor::new());
    // Slow or stalled request heads are cut off after the read bound
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(read_timeout);
    let connection = builder.serve_connection(io, svc_fn);
    tokio::pin!(connection);

    let mut closing = false;
    let mut hard_close: Option<Instant> = None;

    loop {
        let idle_check = activity.next_idle_check(idle_timeout);

        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    debug!(peer = %peer_addr, error = %e, "Connection error");
                }
                break;
            }

            _ = shutdown.cancelled(), if !closing => {
                debug!(peer = %peer_addr, "Shutdown signal received, gracefully closing connection");
                closing = true;
                connection.as_mut().graceful_shutdown();
            }

            _ = sleep_until(idle_check), if !closing => {
                if activity.is_idle(idle_timeout) {
                    debug!(peer = %peer_addr, idle_secs = idle_timeout.as_secs_f64(), "Closing idle connection");
                    closing = true;
                    // A client stuck mid-headers does not honour graceful shutdown
                    hard_close = Some(Instant::now() + read_timeout);
                    connection.as_mut().graceful_shutdown();
                }
            }

            _ = sleep_until(hard_close.unwrap_or_else(Instant::now)), if hard_close.is_some() => {
                debug!(peer = %peer_addr, "Dropping connection that did not close");
                break;
            }

            _ = cancel.cancelled() => {
                debug!(peer = %peer_addr, "Connection cancelled");
                break;
            }
        }
    }
}

// ============================================================================
// Idle tracking
// ============================================================================

/// Request activity on one connection, for idle detection.
///
/// A request counts as active from the moment its head is parsed until its
/// response body has been fully written (or dropped).
struct ConnectionActivity {
    opened: Instant,
    in_flight: AtomicUsize,
    /// Milliseconds after `opened` at which the last request finished
    last_active_ms: AtomicU64,
}

impl ConnectionActivity {
    fn new() -> Self {
        Self {
            opened: Instant::now(),
            in_flight: AtomicUsize::new(0),
            last_active_ms: AtomicU64::new(0),
        }
    }

    fn begin(self: &Arc<Self>) -> InFlight {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlight(self.clone())
    }

    fn touch(&self) {
        let elapsed = self.opened.elapsed().as_millis() as u64;
        self.last_active_ms.fetch_max(elapsed, Ordering::SeqCst);
    }

    fn idle_since(&self) -> Instant {
        self.opened + Duration::from_millis(self.last_active_ms.load(Ordering::SeqCst))
    }

    fn is_idle(&self, idle_timeout: Duration) -> bool {
        self.in_flight.load(Ordering::SeqCst) == 0
            && Instant::now() >= self.idle_since() + idle_timeout
    }

    /// When to look again: the idle deadline, or a full period from now
    /// while a request is in flight.
    fn next_idle_check(&self, idle_timeout: Duration) -> Instant {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            Instant::now() + idle_timeout
        } else {
            self.idle_since() + idle_timeout
        }
    }
}

struct InFlight(Arc<ConnectionActivity>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.touch();
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Response body that keeps its request counted as in flight until done.
struct TrackedBody {
    inner: Body,
    _in_flight: InFlight,
}

impl http_body::Body for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
