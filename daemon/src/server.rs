//! HTTP server for the inventory and control API

use crate::error::ControlError;
use crate::protocol::{ErrorResponse, ListParams, ReniceParams, SignalParams};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const AUTH_HEADER: &str = "x-auth-token";

/// Shared-secret check applied once per request, before any handler runs.
#[derive(Clone)]
pub struct TokenGate {
    token: String,
}

impl TokenGate {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn admits(&self, presented: Option<&str>) -> bool {
        presented == Some(self.token.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum ApiRequest {
    Health,
    ListProcesses(ListParams),
    Signal { pid: u32, params: SignalParams },
    Renice { pid: u32, params: ReniceParams },
    Restart { pid: u32 },
}

/// Status code plus JSON body.
#[derive(Debug, Clone)]
pub struct ApiReply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl ApiReply {
    pub fn ok<T: Serialize>(payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(body) => Self { status: 200, body },
            Err(e) => Self::error(&ControlError::Internal(e.to_string())),
        }
    }

    pub fn error(err: &ControlError) -> Self {
        Self::message(err.status_code(), err.to_string())
    }

    fn message(status: u16, error: impl Into<String>) -> Self {
        let body = serde_json::to_value(ErrorResponse {
            error: error.into(),
        })
        .unwrap_or_default();
        Self { status, body }
    }

    fn into_response(self) -> Response<Body> {
        let bytes = serde_json::to_vec(&self.body).unwrap_or_default();
        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }
}

#[async_trait::async_trait]
pub trait RequestHandler {
    async fn handle(&self, request: ApiRequest) -> ApiReply;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Health,
    Processes,
    Signal(u32),
    Renice(u32),
    Restart(u32),
}

/// Match a request line. Paths are accepted with or without the `/api` prefix.
fn route(method: &Method, path: &str) -> Option<Route> {
    let path = path
        .strip_prefix("/api")
        .filter(|rest| rest.starts_with('/'))
        .unwrap_or(path);
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method, segments.as_slice()) {
        (&Method::GET, ["health"]) => Some(Route::Health),
        (&Method::GET, ["processes"]) => Some(Route::Processes),
        (&Method::POST, ["process", pid, action]) => {
            let pid = pid.parse().ok()?;
            match *action {
                "signal" => Some(Route::Signal(pid)),
                "renice" => Some(Route::Renice(pid)),
                "restart" => Some(Route::Restart(pid)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Empty bodies yield the defaults; anything else must be valid JSON.
async fn read_json<T: DeserializeOwned + Default>(body: Body) -> Result<T, ApiReply> {
    let bytes = hyper::body::to_bytes(body)
        .await
        .map_err(|e| ApiReply::message(400, format!("Failed to read body: {}", e)))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiReply::message(400, format!("Invalid JSON body: {}", e)))
}

async fn dispatch<H>(gate: &TokenGate, handler: &H, req: Request<Body>) -> Response<Body>
where
    H: RequestHandler + Send + Sync + ?Sized,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let Some(route) = route(&method, &path) else {
        debug!("{} {} -> 404", method, path);
        return ApiReply::message(404, "Not found").into_response();
    };

    if route != Route::Health {
        let token = req.headers().get(AUTH_HEADER).and_then(|v| v.to_str().ok());
        if !gate.admits(token) {
            warn!("Rejected {} {}: bad or missing token", method, path);
            return ApiReply::message(401, "Unauthorized").into_response();
        }
    }

    let query = req.uri().query().map(str::to_string);
    let request = match route {
        Route::Health => ApiRequest::Health,
        Route::Processes => ApiRequest::ListProcesses(ListParams::from_query(query.as_deref())),
        Route::Signal(pid) => match read_json(req.into_body()).await {
            Ok(params) => ApiRequest::Signal { pid, params },
            Err(reply) => return reply.into_response(),
        },
        Route::Renice(pid) => match read_json(req.into_body()).await {
            Ok(params) => ApiRequest::Renice { pid, params },
            Err(reply) => return reply.into_response(),
        },
        Route::Restart(pid) => ApiRequest::Restart { pid },
    };

    let reply = handler.handle(request).await;
    debug!("{} {} -> {}", method, path, reply.status);
    reply.into_response()
}

type ServeFuture = Pin<Box<dyn Future<Output = hyper::Result<()>> + Send>>;

pub struct HttpServer {
    local_addr: SocketAddr,
    server: ServeFuture,
}

impl HttpServer {
    /// Bind `addr` and prepare to serve until `shutdown` resolves.
    pub fn bind<H, F>(addr: &SocketAddr, gate: TokenGate, handler: Arc<H>, shutdown: F) -> hyper::Result<Self>
    where
        H: RequestHandler + Send + Sync + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let gate = Arc::new(gate);
        let make_svc = make_service_fn(move |_conn| {
            let gate = Arc::clone(&gate);
            let handler = Arc::clone(&handler);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let gate = Arc::clone(&gate);
                    let handler = Arc::clone(&handler);
                    async move { Ok::<_, Infallible>(dispatch(&gate, handler.as_ref(), req).await) }
                }))
            }
        });

        let server = Server::try_bind(addr)?.serve(make_svc);
        let local_addr = server.local_addr();
        info!("HTTP server listening on {}", local_addr);
        Ok(Self {
            local_addr,
            server: Box::pin(server.with_graceful_shutdown(shutdown)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn run(self) -> hyper::Result<()> {
        self.server.await
    }
}
