//! Request router — URI dispatch, body-size guard, error shaping.
//!
//! Every request is a multipart POST whose `requestData` field holds one
//! packed params map; every response is a packed map sent as
//! `application/octet-stream`. Protocol failures are encoded in the body
//! with status 200; only the oversize-body rejection uses 406.

use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;

use arx_core::codec::{self, Dict, Value};
use arx_core::crypto::{ClientPublicKey, NodeKeypair};
use arx_core::errors::{ErrorRecord, Errors};

use crate::backend::NodeBackend;
use crate::directory::NetworkDirectory;
use crate::registry::{SessionRegistry, SharedSession};
use crate::session::{ClientError, Session};

/// Uploads declaring more than this are cut off with 406.
pub const HARD_UPLOAD_LIMIT: u64 = 2 * 1024 * 1024;

/// Everything a request handler needs, cheap to clone.
#[derive(Clone)]
pub struct EndpointState {
    pub node_key: Arc<NodeKeypair>,
    pub registry: Arc<SessionRegistry>,
    pub backend: Arc<dyn NodeBackend>,
    pub directory: Arc<NetworkDirectory>,
}

/// Build the endpoint router.
///
/// A single fallback handler performs the URI dispatch: the handler set
/// is closed and small, so an explicit match beats a route table.
pub fn router(state: EndpointState) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(DefaultBodyLimit::max(HARD_UPLOAD_LIMIT as usize))
        .with_state(state)
}

async fn handle_request(
    State(state): State<EndpointState>,
    uri: Uri,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    if let Some(length) = declared_length(&headers) {
        if length > HARD_UPLOAD_LIMIT {
            tracing::warn!(length, uri = %uri, "rejecting oversize body");
            return error_response(
                StatusCode::NOT_ACCEPTABLE,
                ErrorRecord::new(
                    Errors::Failure,
                    "",
                    format!("Body too large: {length}, while maximum allowed is {HARD_UPLOAD_LIMIT}"),
                ),
            );
        }
    }

    let multipart = match multipart {
        Ok(multipart) => multipart,
        Err(rejection) => {
            tracing::warn!(uri = %uri, error = %rejection, "body is not a multipart form");
            return error_response(
                StatusCode::OK,
                ErrorRecord::new(Errors::Failure, "", rejection.to_string()),
            );
        }
    };

    let params = match read_request_data(multipart).await {
        Ok(params) => params,
        Err(record) => {
            tracing::warn!(uri = %uri, error = %record, "failed to read request data");
            return error_response(StatusCode::OK, record);
        }
    };

    process_request(&state, uri.path(), &params).await
}

/// Pull the `requestData` form field and unpack it into the params map.
async fn read_request_data(mut multipart: Multipart) -> Result<Dict, ErrorRecord> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return Err(ErrorRecord::new(Errors::Failure, "", err.to_string())),
        };
        if field.name() != Some("requestData") {
            continue;
        }
        let data = field
            .bytes()
            .await
            .map_err(|err| ErrorRecord::new(Errors::Failure, "", err.to_string()))?;
        return codec::unpack(&data)
            .map_err(|err| ErrorRecord::new(Errors::Failure, "", err.to_string()));
    }
    Err(ErrorRecord::new(Errors::Failure, "", "No requestData"))
}

async fn process_request(state: &EndpointState, uri: &str, params: &Dict) -> Response {
    let result = match uri {
        "/ping" => {
            let mut result = Dict::new().with("ping", "pong");
            result.merge(params.clone());
            result
        }

        "/network" => state.directory.get().clone(),

        "/connect" => {
            let key = match parse_client_key(params) {
                Ok(key) => key,
                Err(record) => {
                    tracing::warn!(error = %record, "rejecting connect");
                    return error_response(StatusCode::OK, record);
                }
            };
            let session = state.registry.get_or_create(&key).await;
            in_session(&session, |s| Ok(Some(s.connect()))).await
        }

        "/get_token" => match lookup_session(state, params) {
            Ok(session) => {
                in_session(&session, |s| Ok(s.get_token(&state.node_key, params))).await
            }
            Err(response) => return response,
        },

        "/command" => match lookup_session(state, params) {
            Ok(session) => {
                in_session(&session, |s| s.command(state.backend.as_ref(), params).map(Some))
                    .await
            }
            Err(response) => return response,
        },

        other => {
            return error_response(
                StatusCode::OK,
                ErrorRecord::new(
                    Errors::UnknownCommand,
                    "uri",
                    format!("command not supported: {other}"),
                ),
            )
        }
    };

    packed_response(StatusCode::OK, &result)
}

/// Run `handler` inside the session's critical section: lock, clear the
/// error accumulator, execute, and let `answer` attach what accumulated.
async fn in_session<F>(session: &SharedSession, handler: F) -> Dict
where
    F: FnOnce(&mut Session) -> Result<Option<Dict>, ClientError>,
{
    let mut guard = session.lock().await;
    guard.clear_errors();
    match handler(&mut guard) {
        Ok(result) => guard.answer(result),
        Err(err) => {
            guard.add_record(err.into_record());
            guard.answer(None)
        }
    }
}

fn parse_client_key(params: &Dict) -> Result<ClientPublicKey, ErrorRecord> {
    let packed = params
        .get_bytes("client_key")
        .map_err(|err| ErrorRecord::new(Errors::BadClientKey, "client_key", err.to_string()))?;
    ClientPublicKey::unpack(packed)
        .map_err(|err| ErrorRecord::new(Errors::BadClientKey, "client_key", err.to_string()))
}

fn lookup_session(state: &EndpointState, params: &Dict) -> Result<SharedSession, Response> {
    let session_id = params.get_i64("session_id").map_err(|err| {
        error_response(
            StatusCode::OK,
            ErrorRecord::new(Errors::Failure, "", err.to_string()),
        )
    })?;
    state.registry.get_by_id(session_id).ok_or_else(|| {
        tracing::warn!(session_id, "request for unknown session");
        error_response(
            StatusCode::OK,
            ErrorRecord::new(Errors::Failure, "", "bad session number"),
        )
    })
}

fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

// ── Response shaping ──────────────────────────────────────────────────────────

fn packed_response(status: StatusCode, data: &Dict) -> Response {
    match codec::pack(data) {
        Ok(bytes) => (
            status,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn error_response(status: StatusCode, record: ErrorRecord) -> Response {
    let body = Dict::new().with("errors", vec![Value::Map(record.to_dict())]);
    packed_response(status, &body)
}
