//! Request dispatch: route resolution, proxy decision and chain execution

use crate::error::ServerError;
use crate::plugin::CommandSpec;
use crate::server::{RouteMatch, RouteRequest, RouteTarget};
use crate::state::{AppState, RequestTimer};
use bytes::Bytes;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;
use warp::http::{Method, StatusCode};
use warp::path::FullPath;
use warp::Reply;

const SESSION_ID: &str = "sessionId";

pub async fn handle_request(
    method: Method,
    full_path: FullPath,
    body: Bytes,
    state: Arc<AppState>,
) -> Result<warp::reply::Response, warp::Rejection> {
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "request",
        %request_id,
        method = %method,
        path = %full_path.as_str(),
    );

    async move {
        let timer = RequestTimer::new(state.metrics.clone());
        let path = strip_base_path(full_path.as_str(), state.config.base_path());

        state.server.listeners.notify_request(&method, path.unwrap_or(full_path.as_str()));

        let result = match path {
            Some(path) => execute(&state, &method, path, &body).await,
            None => Err(ServerError::UnknownRoute {
                method: method.to_string(),
                path: full_path.as_str().to_string(),
            }),
        };

        let (status, value) = match result {
            Ok(value) => {
                timer.finish();
                (StatusCode::OK, value)
            }
            Err(e) => {
                timer.fail();
                let status = e.status_code();
                if status.is_server_error() {
                    tracing::error!(error = %e, "Request failed");
                } else {
                    tracing::debug!(error = %e, "Request rejected");
                }
                (status, json!({ "error": e.error_code(), "message": e.to_string() }))
            }
        };

        state
            .server
            .observe(&method, path.unwrap_or(full_path.as_str()), status);
        tracing::debug!(status = status.as_u16(), "Request finished");

        Ok(warp::reply::with_status(warp::reply::json(&json!({ "value": value })), status)
            .into_response())
    }
    .instrument(span)
    .await
}

pub async fn metrics(state: Arc<AppState>) -> Result<warp::reply::Response, warp::Rejection> {
    match state.metrics.encode_text() {
        Ok(text) => Ok(warp::reply::with_header(
            text,
            "content-type",
            "text/plain; version=0.0.4",
        )
        .into_response()),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            Ok(warp::reply::with_status(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response())
        }
    }
}

/// Path relative to `base_path`, or `None` when the request is outside it
fn strip_base_path<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    if base_path.is_empty() {
        return Some(path);
    }
    match path.strip_prefix(base_path)? {
        "" => Some("/"),
        rest if rest.starts_with('/') => Some(rest),
        _ => None,
    }
}

async fn execute(
    state: &AppState,
    method: &Method,
    path: &str,
    raw_body: &Bytes,
) -> Result<Value, ServerError> {
    let found = match state.server.routes.resolve(method, path) {
        RouteMatch::Found { route, params } => Ok((route.target().clone(), params)),
        RouteMatch::MethodNotAllowed => Err(ServerError::MethodNotAllowed {
            method: method.to_string(),
            path: path.to_string(),
        }),
        RouteMatch::NotFound => Err(ServerError::UnknownRoute {
            method: method.to_string(),
            path: path.to_string(),
        }),
    };

    // Routes installed by server extensions never go through the chain or the proxy.
    if let Ok((RouteTarget::Raw(handler), params)) = &found {
        let request = RouteRequest {
            method: method.clone(),
            path: path.to_string(),
            params: params.clone(),
            body: parse_body(raw_body)?,
        };
        return Ok(handler(request).await?);
    }

    if state.driver.is_proxying() {
        // Plugins see the body only when it is JSON; upstream gets it untouched.
        let body = parse_body(raw_body).ok().flatten();
        let local = state
            .plugins
            .should_handle_locally(method, path, body.as_ref())?;
        state.metrics.record_dispatch(!local);
        if !local {
            tracing::debug!("Forwarding request to upstream");
            return Ok(state
                .driver
                .proxy_request(method, path, raw_body.clone())
                .await?);
        }
    } else {
        state.metrics.record_dispatch(false);
    }

    let (spec, params) = match found? {
        (RouteTarget::Command(spec), params) => (spec, params),
        (RouteTarget::Raw(_), _) => {
            return Err(ServerError::InvalidRequest(format!(
                "{method} {path} is not a command route"
            )))
        }
    };

    let body = parse_body(raw_body)?;
    let args = command_args(&spec, &params, body.as_ref())?;
    tracing::debug!(command = %spec.command, args = args.len(), "Running command chain");

    let value = state
        .plugins
        .build_chain(&spec.command, state.driver.clone(), args)
        .run()
        .await?;
    Ok(value)
}

fn parse_body(raw: &Bytes) -> Result<Option<Value>, ServerError> {
    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(raw)?))
}

/// Positional arguments for `spec`.
///
/// Required payload params come first, then the optional ones present in the
/// body, then URL params in pattern order with `sessionId` moved to the end.
/// A group of alternatives contributes the first of its names that is present.
pub fn command_args(
    spec: &CommandSpec,
    params: &[(String, String)],
    body: Option<&Value>,
) -> Result<Vec<Value>, ServerError> {
    let empty = Map::new();
    let payload = match body {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(map)) => map,
        Some(_) if spec.payload_params.is_empty() => &empty,
        Some(_) => {
            return Err(ServerError::InvalidRequest(
                "request body must be a JSON object".to_string(),
            ))
        }
    };

    let missing: Vec<String> = spec
        .payload_params
        .required
        .iter()
        .filter(|param| param.lookup(payload).is_none())
        .map(ToString::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(ServerError::InvalidRequest(format!(
            "missing required parameter(s) for '{}': {}",
            spec.command,
            missing.join(", ")
        )));
    }

    let mut args: Vec<Value> = spec
        .payload_params
        .required
        .iter()
        .filter_map(|param| param.lookup(payload).cloned())
        .collect();
    args.extend(
        spec.payload_params
            .optional
            .iter()
            .filter_map(|name| payload.get(name).cloned()),
    );

    let mut session_id = None;
    for (name, value) in params {
        if name == SESSION_ID {
            session_id = Some(value);
        } else {
            args.push(Value::String(value.clone()));
        }
    }
    if let Some(session_id) = session_id {
        args.push(Value::String(session_id.clone()));
    }

    Ok(args)
}
