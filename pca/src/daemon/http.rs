// pca/src/daemon/http.rs
//! Local HTTP surface: control-plane proxy, log intake and application updates.
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::{
    CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING,
};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::{Json, Router};
use pca_common::error::{PcaError, Result};
use pca_common::model::api::{LogEvent, RegistrationRequest};
use pca_core::{AppUpdate, AppUpdateQuery};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::DaemonContext;

const PROXY_PREFIX: &str = "/proxy";

pub fn router(ctx: Arc<DaemonContext>) -> Router {
    Router::new()
        .route("/proxy/{*path}", any(proxy))
        .route("/log", post(log))
        .route("/app/check", get(app_check))
        .route("/app/fetch", get(app_fetch))
        .route("/app/update", get(app_fetch))
        .with_state(ctx)
}

fn status_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "status": message.into() }))).into_response()
}

async fn proxy(
    State(ctx): State<Arc<DaemonContext>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match forward(&ctx, method, &uri, headers, body).await {
        Ok(response) => response,
        Err(e @ PcaError::Json(_)) => {
            warn!("Rejected proxy request {}: {}", uri, e);
            status_body(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            warn!("Proxy request {} failed: {}", uri, e);
            status_body(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

async fn forward(
    ctx: &DaemonContext,
    method: Method,
    uri: &Uri,
    mut headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let settings = ctx.settings().await;
    let path = uri.path();
    // A chained proxy keeps the prefix so the next agent strips it.
    let upstream_path = if settings.net_info.as_proxy {
        path
    } else {
        path.strip_prefix(PROXY_PREFIX).unwrap_or(path)
    };
    let mut target = format!("{}{}", settings.net_info.base_url(), upstream_path);
    if let Some(query) = uri.query() {
        target.push('?');
        target.push_str(query);
    }

    let body = if upstream_path.contains("reg") {
        let mut request: RegistrationRequest = serde_json::from_slice(&body)?;
        request.push_proxy_secret(&settings.secret);
        Bytes::from(serde_json::to_vec(&request)?)
    } else {
        body
    };

    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);
    debug!("Proxying {} {} to {}", method, path, target);
    let upstream = ctx
        .upstream()
        .request(method, &target)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    response_headers.remove(TRANSFER_ENCODING);
    response_headers.remove(CONTENT_LENGTH);
    let bytes = upstream.bytes().await?;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

async fn log(State(ctx): State<Arc<DaemonContext>>, body: Bytes) -> Response {
    let event: LogEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            return status_body(StatusCode::BAD_REQUEST, format!("can't parse log body: {e}"));
        }
    };
    if event.context.is_none() {
        return status_body(StatusCode::BAD_REQUEST, "log context is required");
    }

    let control = ctx.control().await;
    match control.post_logs(std::slice::from_ref(&event)).await {
        Ok(()) => status_body(StatusCode::OK, "ok"),
        Err(e) => {
            debug!("Log delivery failed, buffering: {}", e);
            match ctx.log_buffer().await.push(vec![event]).await {
                Ok(()) => status_body(StatusCode::OK, "log saved in buffer"),
                Err(e) => {
                    warn!("Failed to buffer log event: {}", e);
                    status_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
                }
            }
        }
    }
}

fn check_body(status: StatusCode, message: &str, result: bool) -> Response {
    (status, Json(json!({ "msg": message, "result": result }))).into_response()
}

async fn lookup(
    ctx: &DaemonContext,
    query: std::result::Result<Query<AppUpdateQuery>, QueryRejection>,
) -> std::result::Result<std::path::PathBuf, Response> {
    let Query(query) = query
        .map_err(|e| check_body(StatusCode::BAD_REQUEST, &e.body_text(), false))?;
    match ctx.application_update(&query).await {
        Ok(AppUpdate::Available(path)) => Ok(path),
        Ok(AppUpdate::UpToDate) => Err(check_body(
            StatusCode::CONFLICT,
            "installed version is not newer",
            false,
        )),
        Ok(AppUpdate::UnknownKey) | Ok(AppUpdate::MissingFile) => Err(check_body(
            StatusCode::NOT_FOUND,
            "update not found",
            false,
        )),
        Err(e) => Err(check_body(StatusCode::BAD_REQUEST, &e.to_string(), false)),
    }
}

async fn app_check(
    State(ctx): State<Arc<DaemonContext>>,
    query: std::result::Result<Query<AppUpdateQuery>, QueryRejection>,
) -> Response {
    match lookup(&ctx, query).await {
        Ok(_) => check_body(StatusCode::OK, "update exists", true),
        Err(response) => response,
    }
}

async fn app_fetch(
    State(ctx): State<Arc<DaemonContext>>,
    query: std::result::Result<Query<AppUpdateQuery>, QueryRejection>,
) -> Response {
    let path = match lookup(&ctx, query).await {
        Ok(path) => path,
        Err(response) => return response,
    };
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return check_body(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string(), false);
        }
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut response = Response::new(Body::from(bytes));
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\"")) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    response
}
