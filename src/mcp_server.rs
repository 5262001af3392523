//! MCP Tool Server
//!
//! Exposes the [`ToolRegistry`](crate::mcp_tools::ToolRegistry) over HTTP:
//! `GET /health`, `GET /mcp/schema`, `POST /mcp`. Generalized from the
//! upstream toolkit's two-route `/tools/list` + `/tools/execute` Axum
//! adapter (`mcp_http_adapter.rs`) into the single `/mcp` dispatch route
//! this runtime's wire contract specifies.
//!
//! Global mutable state (`app.state.base_path`, `expected_token`, the
//! logger handlers) in the system this replaces is modeled here as one
//! explicit [`ServerContext`] value threaded through the handlers instead
//! of process-wide singletons.

use crate::errors::AgentError;
use crate::logging;
use crate::mcp_tools::ToolRegistry;
use std::sync::Arc;
use std::time::Instant;

/// Everything an MCP server handler needs, owned by the background server
/// task rather than any global.
pub struct ServerContext {
    pub registry: Arc<ToolRegistry>,
    pub bearer_token: Option<String>,
}

impl ServerContext {
    pub fn new(registry: Arc<ToolRegistry>, bearer_token: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            bearer_token,
        })
    }

    fn authorize(&self, header: Option<&str>) -> Result<(), AgentError> {
        match &self.bearer_token {
            None => Ok(()),
            Some(expected) => {
                let provided = header.and_then(|h| h.strip_prefix("Bearer "));
                match provided {
                    Some(token) if constant_time_eq(token, expected) => Ok(()),
                    _ => Err(AgentError::Unauthorized),
                }
            }
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// `GET /health` is invariably `{"status": "ok"}` regardless of auth
/// configuration; boundary behavior 11 (spec §8) picks the alternative —
/// auth is enforced even on `/health` when a token is configured.
pub async fn health(ctx: &ServerContext, auth_header: Option<&str>) -> (u16, serde_json::Value) {
    if let Err(err) = ctx.authorize(auth_header) {
        return (401, serde_json::to_value(err.to_envelope()).unwrap());
    }
    (200, serde_json::json!({"status": "ok"}))
}

pub async fn schema(ctx: &ServerContext, auth_header: Option<&str>) -> (u16, serde_json::Value) {
    if let Err(err) = ctx.authorize(auth_header) {
        return (401, serde_json::to_value(err.to_envelope()).unwrap());
    }
    (200, ctx.registry.describe())
}

/// `POST /mcp` body shape.
#[derive(Debug, serde::Deserialize)]
pub struct McpRequest {
    pub name: Option<serde_json::Value>,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Handle one `/mcp` call end to end: auth, name validation, dispatch,
/// structured tool-event logging. `body` is the raw request bytes so the
/// "malformed JSON" case can be distinguished from "wrong shape".
pub async fn call_tool(
    ctx: &ServerContext,
    auth_header: Option<&str>,
    request_id: &str,
    body: &[u8],
) -> (u16, serde_json::Value) {
    if let Err(err) = ctx.authorize(auth_header) {
        return (401, serde_json::to_value(err.to_envelope()).unwrap());
    }

    let parsed: Result<McpRequest, _> = serde_json::from_slice(body);
    let request = match parsed {
        Ok(r) => r,
        Err(_) => {
            let err = AgentError::Validation("malformed JSON body".to_string());
            return (400, serde_json::to_value(err.to_envelope()).unwrap());
        }
    };

    let name = match request.name.as_ref().and_then(|v| v.as_str()) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            let err = AgentError::Validation("missing or non-string field: name".to_string());
            return (400, serde_json::to_value(err.to_envelope()).unwrap());
        }
    };

    if !ctx.registry.contains(&name) {
        let err = AgentError::NotFound(format!("unknown tool: {}", name));
        log_tool_event(request_id, &name, &request.arguments, "not_found", Some(&err), 0);
        return (404, serde_json::to_value(err.to_envelope()).unwrap());
    }

    let start = Instant::now();
    let result = ctx.registry.invoke(&name, request.arguments.clone()).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(value) => {
            log_tool_event(request_id, &name, &request.arguments, "success", None, elapsed_ms);
            (200, serde_json::json!({ "result": value }))
        }
        Err(err) => {
            let status = match err.code() {
                crate::errors::ErrorCode::ValidationError => 400,
                crate::errors::ErrorCode::NotFound => 404,
                crate::errors::ErrorCode::Unauthorized => 401,
                crate::errors::ErrorCode::Cancelled => 200,
                crate::errors::ErrorCode::Conflict => 200,
                crate::errors::ErrorCode::Internal => 500,
            };
            log_tool_event(request_id, &name, &request.arguments, "failure", Some(&err), elapsed_ms);
            (status, serde_json::to_value(err.to_envelope()).unwrap())
        }
    }
}

fn log_tool_event(
    request_id: &str,
    tool: &str,
    arguments: &serde_json::Value,
    outcome: &'static str,
    error: Option<&AgentError>,
    duration_ms: u64,
) {
    let record = logging::ToolEventRecord {
        timestamp: chrono::Utc::now().to_rfc3339(),
        tool: tool.to_string(),
        outcome,
        arguments: logging::redact_json(arguments),
        request_id: request_id.to_string(),
        duration_ms,
        error: error.map(|e| e.public_message()),
    };
    record.log();

    if let Some(detail) = error.and_then(|e| e.internal_detail()) {
        log::error!("request_id={} tool={} internal_detail={}", request_id, tool, detail);
    }
}

#[cfg(feature = "mcp-server")]
pub mod http {
    //! Axum wiring for [`ServerContext`]. Only compiled with the
    //! `mcp-server` feature, matching the upstream toolkit's
    //! `AxumHttpAdapter` being feature-gated behind `mcp-server`.

    use super::*;
    use axum::{
        body::Bytes,
        extract::State,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        routing::{get, post},
        Json, Router,
    };
    use tokio::net::TcpListener;

    fn auth_header(headers: &HeaderMap) -> Option<&str> {
        headers.get("authorization").and_then(|v| v.to_str().ok())
    }

    fn sanitized_headers(headers: &HeaderMap) -> std::collections::BTreeMap<String, String> {
        headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect()
    }

    fn client_addr(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    fn log_request(
        request_id: &str,
        method: &str,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        status: u16,
        started: Instant,
        error: Option<String>,
    ) {
        logging::RequestLogRecord::new(
            request_id.to_string(),
            method.to_string(),
            path.to_string(),
            query.map(|q| q.to_string()),
            sanitized_headers(headers),
            client_addr(headers),
            status,
            started.elapsed().as_millis() as u64,
            error,
        )
        .log();
    }

    async fn health_route(State(ctx): State<Arc<ServerContext>>, headers: HeaderMap) -> impl IntoResponse {
        let started = Instant::now();
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let (status, body) = health(&ctx, auth_header(&headers)).await;
        log_request(&request_id, "GET", "/health", None, &headers, status, started, None);
        (StatusCode::from_u16(status).unwrap(), Json(body))
    }

    async fn schema_route(State(ctx): State<Arc<ServerContext>>, headers: HeaderMap) -> impl IntoResponse {
        let started = Instant::now();
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let (status, body) = schema(&ctx, auth_header(&headers)).await;
        log_request(&request_id, "GET", "/mcp/schema", None, &headers, status, started, None);
        (StatusCode::from_u16(status).unwrap(), Json(body))
    }

    async fn mcp_route(
        State(ctx): State<Arc<ServerContext>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> impl IntoResponse {
        let started = Instant::now();
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let (status, payload) = call_tool(&ctx, auth_header(&headers), &request_id, &body).await;
        let error = payload
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(|m| m.to_string());
        log_request(&request_id, "POST", "/mcp", None, &headers, status, started, error);
        (StatusCode::from_u16(status).unwrap(), Json(payload))
    }

    pub fn router(ctx: Arc<ServerContext>) -> Router {
        Router::new()
            .route("/health", get(health_route))
            .route("/mcp/schema", get(schema_route))
            .route("/mcp", post(mcp_route))
            .with_state(ctx)
    }

    /// A running MCP server instance.
    pub struct ServerHandle {
        pub addr: std::net::SocketAddr,
        shutdown: tokio::sync::oneshot::Sender<()>,
        join: tokio::task::JoinHandle<()>,
    }

    impl ServerHandle {
        /// Request shutdown with a bounded grace period; if the server
        /// task does not exit within it, abort it outright and log that
        /// a force-exit was needed.
        pub async fn stop(self) {
            let _ = self.shutdown.send(());
            match tokio::time::timeout(std::time::Duration::from_secs(5), self.join).await {
                Ok(_) => {}
                Err(_) => {
                    log::warn!("mcp server did not shut down within 5s, forcing exit");
                }
            }
        }
    }

    /// Bind and start the server as a background task.
    pub async fn start_server(
        ctx: Arc<ServerContext>,
        addr: std::net::SocketAddr,
    ) -> Result<ServerHandle, Box<dyn std::error::Error + Send + Sync>> {
        let app = router(ctx);
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;
        let (tx, rx) = tokio::sync::oneshot::channel();
        let join = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await;
        });
        Ok(ServerHandle {
            addr: bound_addr,
            shutdown: tx,
            join,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_tools::ToolRegistry;

    fn context(token: Option<&str>) -> Arc<ServerContext> {
        ServerContext::new(ToolRegistry::bootstrap(), token.map(|t| t.to_string()))
    }

    #[tokio::test]
    async fn health_returns_ok_without_auth_configured() {
        let ctx = context(None);
        let (status, body) = health(&ctx, None).await;
        assert_eq!(status, 200);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn health_requires_bearer_when_configured() {
        let ctx = context(Some("secret"));
        let (status, body) = health(&ctx, Some("Bearer wrong")).await;
        assert_eq!(status, 401);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn unknown_tool_is_404_not_found() {
        let ctx = context(None);
        let body = serde_json::to_vec(&serde_json::json!({"name": "no_such_tool", "arguments": {}})).unwrap();
        let (status, payload) = call_tool(&ctx, None, "req-1", &body).await;
        assert_eq!(status, 404);
        assert_eq!(payload["error"]["code"], "NOT_FOUND");
        assert_eq!(payload["error"]["message"], "unknown tool: no_such_tool");
    }

    #[tokio::test]
    async fn malformed_json_is_400_validation_error() {
        let ctx = context(None);
        let (status, payload) = call_tool(&ctx, None, "req-1", b"{not json").await;
        assert_eq!(status, 400);
        assert_eq!(payload["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn missing_name_is_400_validation_error() {
        let ctx = context(None);
        let body = serde_json::to_vec(&serde_json::json!({"arguments": {}})).unwrap();
        let (status, payload) = call_tool(&ctx, None, "req-1", &body).await;
        assert_eq!(status, 400);
        assert_eq!(payload["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn successful_call_returns_200_and_result() {
        let ctx = context(None);
        let body = serde_json::to_vec(
            &serde_json::json!({"name": "list_requirements", "arguments": {"per_page": 1}}),
        )
        .unwrap();
        let (status, payload) = call_tool(&ctx, None, "req-1", &body).await;
        assert_eq!(status, 200);
        assert!(payload["result"]["items"].is_array());
    }

    #[tokio::test]
    async fn bearer_mismatch_on_any_route_is_401() {
        let ctx = context(Some("secret"));
        let body = serde_json::to_vec(
            &serde_json::json!({"name": "list_requirements", "arguments": {"per_page": 1}}),
        )
        .unwrap();
        let (status, payload) = call_tool(&ctx, Some("Bearer wrong"), "req-1", &body).await;
        assert_eq!(status, 401);
        assert!(payload["error"]["message"]
            .as_str()
            .unwrap()
            .to_uppercase()
            .contains("UNAUTHORIZED") || payload["error"]["code"] == "UNAUTHORIZED");
    }
}
