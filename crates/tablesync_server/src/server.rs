//! Main sync server.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::handler::{HandlerContext, RequestHandler};
use crate::oplog::ServerOplog;
use std::sync::Arc;
use tablesync_protocol::{Cursor, PullResponse, PushRequest, PushResponse, Table};

/// The sync server.
///
/// An in-memory authority for tablesync replicas. It keeps a change log
/// of accepted operations and the tables they produce, and answers push
/// and pull requests either directly or through [`SyncServer::handle_http`].
///
/// # Example
///
/// ```
/// use tablesync_protocol::{Change, Cursor, Operation, PushRequest};
/// use tablesync_server::{ServerConfig, SyncServer};
///
/// let server = SyncServer::new(ServerConfig::default());
/// let op = Operation::new("T1", Change::RenameTable { name: "People".into() }).stamped(1, "a");
/// let response = server
///     .handle_push(PushRequest::new("a", Cursor::origin(), vec![op]))
///     .unwrap();
///
/// assert!(response.success);
/// assert_eq!(server.tables()[0].name, "People");
/// ```
pub struct SyncServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SyncServer {
    /// Creates a new sync server.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_oplog(config, Arc::new(ServerOplog::new()))
    }

    /// Creates a sync server with an existing oplog.
    pub fn with_oplog(config: ServerConfig, oplog: Arc<ServerOplog>) -> Self {
        let context = Arc::new(HandlerContext::new(config, oplog));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// Handles a push request.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        self.handler.handle_push(request)
    }

    /// Handles a pull request.
    pub fn handle_pull(&self, since: &Cursor) -> ServerResult<PullResponse> {
        self.handler.handle_pull(since)
    }

    /// Handles a raw HTTP request; see [`RequestHandler::handle_http`].
    pub fn handle_http(&self, method: &str, path_and_query: &str, body: &[u8]) -> (u16, Vec<u8>) {
        self.handler.handle_http(method, path_and_query, body)
    }

    /// Returns the current server cursor.
    pub fn cursor(&self) -> Cursor {
        self.context.oplog.cursor()
    }

    /// Returns the number of accepted operations.
    pub fn event_count(&self) -> usize {
        self.context.oplog.len()
    }

    /// Returns the server's tables.
    pub fn tables(&self) -> Vec<Table> {
        self.context.oplog.tables()
    }

    /// Clears all server state.
    pub fn reset(&self) {
        self.context.oplog.reset();
    }
}
