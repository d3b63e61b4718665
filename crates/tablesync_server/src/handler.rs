//! Request handlers for sync endpoints.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::oplog::{cursor_for, parse_cursor, LogEntry, ServerOplog};
use serde::Serialize;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tablesync_protocol::{Cursor, JsonCodec, PullResponse, PushRequest, PushResponse, Table};
use tracing::{debug, info, warn};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Server oplog (shared across all handlers).
    pub oplog: Arc<ServerOplog>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, oplog: Arc<ServerOplog>) -> Self {
        Self { config, oplog }
    }
}

#[derive(Serialize)]
struct TablesBody {
    tables: Vec<Table>,
}

#[derive(Serialize)]
struct EventsBody {
    events: Vec<LogEntry>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    cursor: Cursor,
}

/// Handler for sync requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles a push: applies the batch and returns what other clients
    /// wrote since the request's base cursor.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        let limit = self.context.config.max_push_batch;
        if request.ops.len() > limit {
            return Err(ServerError::TooManyOperations {
                count: request.ops.len(),
                limit,
            });
        }
        if request.client_id.is_empty() {
            return Ok(PushResponse::rejected(
                request.base_cursor,
                "clientId must not be empty",
            ));
        }
        let base = parse_cursor(&request.base_cursor)?;

        let oplog = &self.context.oplog;
        let outcome = oplog.append(&request.client_id, &request.ops, now_ms());
        let deltas = oplog.deltas_since(base, None, Some(&request.client_id));
        info!(
            client_id = %request.client_id,
            accepted = outcome.accepted,
            skipped = outcome.skipped,
            returned = deltas.len(),
            "push processed"
        );
        Ok(PushResponse::accepted(cursor_for(outcome.head), deltas))
    }

    /// Handles a pull.
    ///
    /// A pull from the origin returns the full table snapshot and the
    /// current head. Otherwise up to `max_pull_batch` deltas are returned
    /// with the cursor of the last one.
    pub fn handle_pull(&self, since: &Cursor) -> ServerResult<PullResponse> {
        let oplog = &self.context.oplog;
        let after = parse_cursor(since)?;

        if after == 0 {
            let mut response = PullResponse::new(Vec::new(), oplog.cursor());
            response.tables = oplog.tables();
            debug!(tables = response.tables.len(), "snapshot pull");
            return Ok(response);
        }

        let head = oplog.head();
        if after > head {
            warn!(since = %since, head, "pull cursor ahead of log");
        }
        let deltas = oplog.deltas_since(after, Some(self.context.config.max_pull_batch), None);
        let cursor = deltas
            .last()
            .and_then(|d| d.cursor.clone())
            .unwrap_or_else(|| cursor_for(head));
        debug!(since = %since, returned = deltas.len(), "incremental pull");
        Ok(PullResponse::new(deltas, cursor))
    }

    /// Routes one HTTP request and returns the status and JSON body.
    ///
    /// Routes are accepted with or without an `/api` prefix.
    pub fn handle_http(&self, method: &str, path_and_query: &str, body: &[u8]) -> (u16, Vec<u8>) {
        match self.route(method, path_and_query, body) {
            Ok(response) => (200, response),
            Err(err) => {
                if err.is_server_error() {
                    warn!(error = %err, method, path = path_and_query, "request failed");
                } else {
                    debug!(error = %err, method, path = path_and_query, "request rejected");
                }
                let body = serde_json::to_vec(&ErrorBody {
                    error: err.to_string(),
                })
                .unwrap_or_default();
                (err.status(), body)
            }
        }
    }

    fn route(&self, method: &str, path_and_query: &str, body: &[u8]) -> ServerResult<Vec<u8>> {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, query),
            None => (path_and_query, ""),
        };
        let path = path.strip_prefix("/api").unwrap_or(path);

        match (method, path) {
            ("POST", "/sync") => {
                let request = PushRequest::decode(body)?;
                Ok(self.handle_push(request)?.encode()?)
            }
            ("GET", "/sync") => {
                let since = query_param(query, "since")?
                    .map(Cursor::new)
                    .unwrap_or_default();
                Ok(self.handle_pull(&since)?.encode()?)
            }
            ("GET", "/healthz") => to_json(&HealthBody {
                status: "healthy",
                cursor: self.context.oplog.cursor(),
            }),
            ("GET", "/tables") => to_json(&TablesBody {
                tables: self.context.oplog.tables(),
            }),
            ("GET", path) if path.starts_with("/tables/") => {
                let id = &path["/tables/".len()..];
                let table = self
                    .context
                    .oplog
                    .table(id)
                    .ok_or_else(|| ServerError::NotFound(format!("table {id}")))?;
                to_json(&table)
            }
            ("GET", "/debug/events") if self.context.config.debug_routes => {
                let limit = match query_param(query, "limit")? {
                    Some(raw) => raw
                        .parse::<usize>()
                        .map_err(|_| ServerError::InvalidRequest(format!("bad limit: {raw}")))?,
                    None => DEFAULT_EVENT_LIMIT,
                };
                to_json(&EventsBody {
                    events: self.context.oplog.recent(limit),
                })
            }
            ("DELETE", "/debug/reset") if self.context.config.debug_routes => {
                self.context.oplog.reset();
                info!("server state reset");
                to_json(&serde_json::json!({ "message": "reset" }))
            }
            _ => Err(ServerError::NotFound(format!("{method} {path}"))),
        }
    }
}

const DEFAULT_EVENT_LIMIT: usize = 100;

fn to_json<T: Serialize>(value: &T) -> ServerResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ServerError::Internal(e.to_string()))
}

/// Extracts and percent-decodes one query parameter.
fn query_param(query: &str, name: &str) -> ServerResult<Option<String>> {
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if key == name {
            let value = urlencoding::decode(value)
                .map_err(|e| ServerError::InvalidRequest(format!("bad query string: {e}")))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
