use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::{info_span, Instrument};
use uuid::Uuid;

/// HTTP header carrying the request's trace id
pub const TRACE_ID_HEADER: &str = "X-Trace-Id";

/// Tag each request with a trace id.
///
/// The id is stored in the request extensions, recorded on the `http_request`
/// span that wraps the handler (so every log line emitted while serving the
/// request carries it) and echoed back in the `X-Trace-Id` response header.
/// A client-supplied `X-Trace-Id` is reused when it is a valid UUID.
pub async fn trace_id_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .unwrap_or_else(Uuid::new_v4)
        .to_string();

    let span = info_span!(
        "http_request",
        trace_id = %trace_id,
        method = %request.method(),
        uri = %request.uri(),
    );

    request.extensions_mut().insert(TraceId(trace_id.clone()));

    let mut response = async move {
        let response = next.run(request).await;
        tracing::debug!(status = %response.status(), "Request finished");
        response
    }
    .instrument(span)
    .await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Trace id of the current request, available to handlers as an extension
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
