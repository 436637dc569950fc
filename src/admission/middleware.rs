//! axum middleware enforcing admission on every request.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::controller::{Admission, AdmissionController};

/// JSON body of a refused request.
#[derive(Debug, Serialize)]
pub struct RefusalBody {
    pub error: &'static str,
    pub message: &'static str,
}

/// Admit the request to `next`, or answer it directly when refused.
///
/// Over-quota requests get `429 Too Many Requests` and store failures
/// `503 Service Unavailable`; in neither case is `next` invoked.
pub async fn admission_middleware(
    State(controller): State<Arc<AdmissionController>>,
    request: Request,
    next: Next,
) -> Response {
    if controller.is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identity = controller.identify(request.headers(), peer);

    match controller.check(&identity).await {
        Admission::Admit => next.run(request).await,
        Admission::Reject => refusal(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limit_exceeded",
            "Too Many Requests",
        ),
        Admission::Fail => refusal(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            "Service Unavailable",
        ),
    }
}

fn refusal(status: StatusCode, error: &'static str, message: &'static str) -> Response {
    (status, Json(RefusalBody { error, message })).into_response()
}
