//! Multi-replica convergence, durability across restarts, and replay.

use proptest::prelude::*;
use std::sync::Arc;
use tablesync_engine::{
    meta_keys, DurableStore, HttpTransport, LoopbackClient, LoopbackServer, ManualClock,
    RemoteBatch, RetryConfig, StateStore, StoreConfig, SyncConfig, SyncEngine, SyncError,
};
use tablesync_protocol::{Change, Cursor, Delta, Table};
use tablesync_server::{ServerConfig, SyncServer};
use tablesync_storage::InMemoryBackend;

#[derive(Clone)]
struct ServerHandle(Arc<SyncServer>);

impl LoopbackServer for ServerHandle {
    fn handle(&self, method: &str, path_and_query: &str, body: &[u8]) -> (u16, Vec<u8>) {
        self.0.handle_http(method, path_and_query, body)
    }
}

type Engine = SyncEngine<HttpTransport<LoopbackClient<ServerHandle>>>;

fn config() -> SyncConfig {
    SyncConfig::default().with_retry(RetryConfig::no_retry())
}

fn seeded_store(client_id: &str) -> Arc<DurableStore> {
    let store = Arc::new(DurableStore::in_memory().unwrap());
    store
        .transaction(|txn| txn.put_meta(meta_keys::CLIENT_ID, client_id))
        .unwrap();
    store
}

fn engine(server: &Arc<SyncServer>, store: Arc<DurableStore>, clock: &ManualClock) -> Engine {
    let state = StateStore::open(store, Arc::new(clock.clone()), &config()).unwrap();
    let transport = HttpTransport::new(
        "http://loopback",
        LoopbackClient::new(ServerHandle(Arc::clone(server))),
    );
    SyncEngine::new(Arc::new(state), transport, config())
}

fn cells(table: &Table) -> Vec<Vec<String>> {
    table.rows.iter().map(|row| row.cells.clone()).collect()
}

/// Replicated content of every table, ignoring local bookkeeping.
fn contents(tables: &[Table]) -> Vec<(String, String, Vec<String>, Vec<Vec<String>>)> {
    tables
        .iter()
        .map(|t| (t.id.clone(), t.name.clone(), t.headers.clone(), cells(t)))
        .collect()
}

fn reopen(backend: &InMemoryBackend) -> Arc<DurableStore> {
    Arc::new(DurableStore::with_backend(Box::new(backend.handle()), StoreConfig::default()).unwrap())
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

#[derive(Debug, Clone)]
enum Action {
    Set {
        replica: usize,
        row: usize,
        col: usize,
        value: u8,
        advance: u64,
    },
    Sync {
        replica: usize,
    },
}

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (0usize..3, 0usize..3, 0usize..3, 0u8..5, 0u64..20).prop_map(
            |(replica, row, col, value, advance)| Action::Set {
                replica,
                row,
                col,
                value,
                advance,
            }
        ),
        1 => (0usize..3).prop_map(|replica| Action::Sync { replica }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn replicas_converge_after_full_sync(actions in prop::collection::vec(action(), 1..40)) {
        let rt = runtime();
        rt.block_on(async {
            let server = Arc::new(SyncServer::new(ServerConfig::default()));
            let clocks: Vec<_> = (0..3).map(|i| ManualClock::new(1_000 + i * 7)).collect();
            let engines: Vec<_> = ["a", "b", "c"]
                .iter()
                .zip(&clocks)
                .map(|(id, clock)| engine(&server, seeded_store(id), clock))
                .collect();

            let state = engines[0].state();
            let table = state
                .create_table("T", vec!["x".into(), "y".into(), "z".into()])
                .unwrap();
            let rows: Vec<_> = (0..3).map(|_| state.add_row(&table, None).unwrap()).collect();
            for engine in &engines {
                engine.sync_now().await.unwrap();
            }

            for action in &actions {
                match *action {
                    Action::Set { replica, row, col, value, advance } => {
                        clocks[replica].advance_ms(advance);
                        engines[replica]
                            .state()
                            .set_cell(&table, &rows[row], col, &format!("v{value}"))
                            .unwrap();
                    }
                    Action::Sync { replica } => {
                        engines[replica].sync_now().await.unwrap();
                    }
                }
            }

            for _ in 0..2 {
                for engine in &engines {
                    engine.sync_now().await.unwrap();
                }
            }

            let expected = cells(&server.tables()[0]);
            for engine in &engines {
                let table = engine.state().table(&table).unwrap();
                assert_eq!(cells(&table), expected);
                assert!(table.check_shape().is_ok());
                assert_eq!(engine.state().outbox().pending_count(), 0);
            }
        });
    }
}

#[tokio::test]
async fn equal_timestamps_break_ties_by_client_id() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let clock_a = ManualClock::new(10);
    let clock_b = ManualClock::new(10);
    let a = engine(&server, seeded_store("a"), &clock_a);
    let b = engine(&server, seeded_store("b"), &clock_b);

    let table = a.state().create_table("T", vec!["c".into()]).unwrap();
    let row = a.state().add_row(&table, None).unwrap();
    a.sync_now().await.unwrap();
    b.sync_now().await.unwrap();

    clock_a.set_ms(100);
    clock_b.set_ms(100);
    a.state().set_cell(&table, &row, 0, "x").unwrap();
    b.state().set_cell(&table, &row, 0, "y").unwrap();
    let stamp_a = a.state().table(&table).unwrap().cell_stamp(&row, 0).unwrap();
    let stamp_b = b.state().table(&table).unwrap().cell_stamp(&row, 0).unwrap();
    assert_eq!(stamp_a.ts, 100);
    assert_eq!(stamp_b.ts, 100);

    a.sync_now().await.unwrap();
    b.sync_now().await.unwrap();
    a.sync_now().await.unwrap();

    assert_eq!(a.state().table(&table).unwrap().cell(&row, 0), Some("y"));
    assert_eq!(b.state().table(&table).unwrap().cell(&row, 0), Some("y"));
    assert_eq!(server.tables()[0].cell(&row, 0), Some("y"));
    assert_eq!(b.state().conflicts().len(), 1);
    assert!(a.state().conflicts().is_empty());
}

#[tokio::test]
async fn pending_operations_survive_restart_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(1_000);

    let (table, row) = {
        let store = Arc::new(DurableStore::open(dir.path(), StoreConfig::default()).unwrap());
        let state = StateStore::open(store, Arc::new(clock.clone()), &config()).unwrap();
        let table = state.create_table("T", vec!["c".into()]).unwrap();
        let row = state.add_row(&table, None).unwrap();
        for i in 0..5 {
            state.set_cell(&table, &row, 0, &format!("v{i}")).unwrap();
        }
        (table, row)
    };

    let store = Arc::new(DurableStore::open(dir.path(), StoreConfig::default()).unwrap());
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let reopened = engine(&server, store, &clock);
    let state = reopened.state();

    let pending = state.outbox().pending_batch(usize::MAX);
    let kinds: Vec<_> = pending.iter().map(|entry| entry.op.kind()).collect();
    assert_eq!(
        kinds,
        ["renameTable", "addColumn", "addRow", "setCell", "setCell", "setCell", "setCell", "setCell"]
    );
    let stamps: Vec<_> = pending.iter().map(|entry| entry.op.ts.unwrap()).collect();
    assert!(stamps.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(state.table(&table).unwrap().cell(&row, 0), Some("v4"));

    reopened.sync_now().await.unwrap();
    assert_eq!(state.outbox().pending_count(), 0);
    assert_eq!(server.tables()[0].cell(&row, 0), Some("v4"));
    assert_eq!(server.event_count(), 8);
}

#[tokio::test]
async fn cursor_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(1_000);
    let server = Arc::new(SyncServer::new(ServerConfig::default()));

    {
        let store = Arc::new(DurableStore::open(dir.path(), StoreConfig::default()).unwrap());
        let first = engine(&server, store, &clock);
        first.state().create_table("T", Vec::new()).unwrap();
        first.sync_now().await.unwrap();
    }

    let store = Arc::new(DurableStore::open(dir.path(), StoreConfig::default()).unwrap());
    let state = StateStore::open(store, Arc::new(clock), &config()).unwrap();
    assert_eq!(state.cursor().unwrap(), server.cursor());
    assert_eq!(state.outbox().pending_count(), 0);
    assert_eq!(state.tables().len(), 1);
}

#[test]
fn replayed_batch_changes_nothing() {
    let clock = ManualClock::new(1_000);
    let state = StateStore::open(seeded_store("local"), Arc::new(clock), &config()).unwrap();

    let delta = |change: Change, ts: u64, cursor: &str| Delta {
        table_id: "T".into(),
        change,
        ts,
        by: "remote".into(),
        cursor: Some(Cursor::new(cursor)),
    };
    let batch = RemoteBatch {
        deltas: vec![
            delta(Change::RenameTable { name: "Remote".into() }, 1, "1"),
            delta(
                Change::AddColumn {
                    col_index: 0,
                    header: "h".into(),
                },
                2,
                "2",
            ),
            delta(
                Change::AddRow {
                    row_id: "r".into(),
                    after_row_id: None,
                },
                3,
                "3",
            ),
            delta(
                Change::SetCell {
                    row_id: "r".into(),
                    col: 0,
                    value: "v".into(),
                },
                4,
                "4",
            ),
        ],
        cursor: Cursor::new("4"),
        ..RemoteBatch::default()
    };

    let first = state.apply_remote(batch.clone()).unwrap();
    assert_eq!(first.applied, 4);
    let after_first = state.table("T").unwrap();

    let second = state.apply_remote(batch).unwrap();
    assert_eq!(second.applied, 0);
    assert_eq!(second.skipped, 4);
    assert!(second.touched.is_empty());

    let after_second = state.table("T").unwrap();
    assert_eq!(after_first, after_second);
    assert_eq!(state.cursor().unwrap(), Cursor::new("4"));
    assert_eq!(state.outbox().pending_count(), 0);
}

#[tokio::test]
async fn restarted_replica_never_reuses_a_timestamp() {
    let dir = tempfile::tempdir().unwrap();
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let clock = ManualClock::new(1_000);

    let open_a = || {
        let store = Arc::new(DurableStore::open(dir.path(), StoreConfig::default()).unwrap());
        if store.meta::<String>(meta_keys::CLIENT_ID).unwrap().is_none() {
            store
                .transaction(|txn| txn.put_meta(meta_keys::CLIENT_ID, "a"))
                .unwrap();
        }
        engine(&server, store, &clock)
    };

    let a = open_a();
    let table = a
        .state()
        .create_table("T", vec!["c0".into(), "c1".into()])
        .unwrap();
    let row = a.state().add_row(&table, None).unwrap();
    a.sync_now().await.unwrap();

    // two peers with fast clocks stamp both cells at the same instant
    let fast = ManualClock::new(9_000_000);
    for (peer, col) in [("p", 0), ("q", 1)] {
        let peer = engine(&server, seeded_store(peer), &fast);
        peer.sync_now().await.unwrap();
        peer.state().set_cell(&table, &row, col, "peer").unwrap();
        peer.sync_now().await.unwrap();
    }

    a.sync_now().await.unwrap();
    a.state().set_cell(&table, &row, 0, "mine-c0").unwrap();
    let first = a.state().table(&table).unwrap().cell_stamp(&row, 0).unwrap();
    a.sync_now().await.unwrap();
    drop(a);

    let a = open_a();
    a.state().set_cell(&table, &row, 1, "mine-c1").unwrap();
    let second = a.state().table(&table).unwrap().cell_stamp(&row, 1).unwrap();
    assert!(second.ts > first.ts, "{first:?} then {second:?}");

    a.sync_now().await.unwrap();
    assert_eq!(a.state().outbox().pending_count(), 0);
    let served = &server.tables()[0];
    assert_eq!(served.cell(&row, 0), Some("mine-c0"));
    assert_eq!(served.cell(&row, 1), Some("mine-c1"));
}

#[tokio::test]
async fn storage_failure_while_applying_a_push_response_changes_nothing() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let b = engine(&server, seeded_store("b"), &ManualClock::new(1_000));
    let shared = b.state().create_table("Shared", vec!["c".into()]).unwrap();
    let row = b.state().add_row(&shared, None).unwrap();
    b.state().set_cell(&shared, &row, 0, "from b").unwrap();
    b.sync_now().await.unwrap();

    let backend = InMemoryBackend::new();
    let clock = ManualClock::new(2_000);
    let store = reopen(&backend);
    store
        .transaction(|txn| txn.put_meta(meta_keys::CLIENT_ID, "a"))
        .unwrap();
    let a = engine(&server, store, &clock);
    a.state().create_table("Local", vec!["x".into()]).unwrap();
    let tables = a.state().tables();
    let pending = a.state().outbox().pending_count();

    backend.fail_next_appends(1);
    let err = a.sync_now().await.unwrap_err();
    assert!(matches!(err, SyncError::Storage(_)), "{err}");
    assert!(a.state().cursor().unwrap().is_origin());
    assert_eq!(a.state().tables(), tables);
    assert_eq!(a.state().outbox().pending_count(), pending);
    drop(a);

    let a = engine(&server, reopen(&backend), &clock);
    assert_eq!(a.state().outbox().pending_count(), pending);
    a.sync_now().await.unwrap();
    assert_eq!(a.state().outbox().pending_count(), 0);
    assert_eq!(a.state().cursor().unwrap(), server.cursor());

    let fresh = engine(&server, seeded_store("c"), &ManualClock::new(3_000));
    fresh.sync_now().await.unwrap();
    let expected = contents(&server.tables());
    assert_eq!(contents(&a.state().tables()), expected);
    assert_eq!(contents(&fresh.state().tables()), expected);
}

#[tokio::test]
async fn interrupted_pull_resumes_from_persisted_cursor() {
    let server = Arc::new(SyncServer::new(ServerConfig::default()));
    let clock_b = ManualClock::new(1_000);
    let b = engine(&server, seeded_store("b"), &clock_b);
    let table = b.state().create_table("T", vec!["c".into()]).unwrap();
    let row = b.state().add_row(&table, None).unwrap();
    b.sync_now().await.unwrap();

    let backend = InMemoryBackend::new();
    let clock = ManualClock::new(1_000);
    let store = reopen(&backend);
    store
        .transaction(|txn| txn.put_meta(meta_keys::CLIENT_ID, "a"))
        .unwrap();
    let a = engine(&server, store, &clock);
    a.sync_now().await.unwrap();
    let persisted = a.state().cursor().unwrap();
    assert_eq!(persisted, server.cursor());

    clock_b.advance_ms(10);
    b.state().set_cell(&table, &row, 0, "later").unwrap();
    b.state().add_row(&table, Some(&row)).unwrap();
    b.sync_now().await.unwrap();

    let tables = a.state().tables();
    backend.fail_next_appends(1);
    assert!(matches!(
        a.sync_now().await.unwrap_err(),
        SyncError::Storage(_)
    ));
    assert_eq!(a.state().cursor().unwrap(), persisted);
    assert_eq!(a.state().tables(), tables);
    drop(a);

    let a = engine(&server, reopen(&backend), &clock);
    assert_eq!(a.state().cursor().unwrap(), persisted);
    a.sync_now().await.unwrap();
    assert_eq!(a.state().cursor().unwrap(), server.cursor());
    let settled = contents(&a.state().tables());
    assert_eq!(settled, contents(&server.tables()));

    a.sync_now().await.unwrap();
    assert_eq!(contents(&a.state().tables()), settled);
}
