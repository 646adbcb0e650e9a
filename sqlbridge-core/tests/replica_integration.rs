mod common;

use std::thread;
use std::time::Duration;

use common::RecordingBoundary;
use sqlbridge_core::ffi::{self, ReplicaOptions, SqlValue};
use sqlbridge_core::{Conn, Connection, Error, Mode, ReplicaConfig, Value};

fn count(conn: &Connection) -> i64 {
    let rows = conn.query("SELECT count(*) FROM t", ()).expect("count");
    match rows.next_row().expect("row").values() {
        [Value::Integer(n)] => *n,
        other => panic!("unexpected count {other:?}"),
    }
}

#[test]
fn test_replica_syncs_on_demand() {
    let root = common::temp_root();
    let boundary = RecordingBoundary::new();
    let driver = boundary.driver();

    let primary_path = common::db_path(root.path(), "primary.db");
    let primary = driver.open_local(&primary_path).expect("open primary");
    let writer = primary.connect().expect("connect primary");
    writer
        .execute_batch("CREATE TABLE t (x); INSERT INTO t VALUES (1);")
        .expect("seed");

    let config = ReplicaConfig {
        sync_interval: Duration::ZERO,
        read_your_writes: false,
        ..ReplicaConfig::default()
    };
    let mut replica = driver
        .open_replica(
            common::db_path(root.path(), "replica.db"),
            &common::file_url(&primary_path),
            "secret",
            &config,
        )
        .expect("open replica");
    assert_eq!(replica.database().mode(), Mode::Replica);

    assert_eq!(replica.sync().expect("sync"), 1);
    let reader = replica.connect().expect("connect replica");
    assert_eq!(count(&reader), 1);

    writer.execute("INSERT INTO t VALUES (2)", ()).expect("insert");
    thread::sleep(Duration::from_millis(50));
    assert_eq!(count(&reader), 1);

    assert_eq!(replica.sync().expect("sync"), 2);
    assert_eq!(count(&reader), 2);
    assert_eq!(boundary.calls("db_sync"), 2);

    replica.close().expect("close");
    assert!(matches!(replica.sync(), Err(Error::UseAfterClose { .. })));
    assert_eq!(boundary.calls("db_sync"), 2);
}

#[test]
fn test_replica_reads_its_own_writes() {
    let root = common::temp_root();
    let boundary = RecordingBoundary::new();
    let driver = boundary.driver();

    let primary_path = common::db_path(root.path(), "primary.db");
    let primary = driver.open_local(&primary_path).expect("open primary");
    primary
        .connect()
        .expect("connect primary")
        .execute_batch("CREATE TABLE t (x)")
        .expect("seed");

    let replica = driver
        .open_replica(
            common::db_path(root.path(), "replica.db"),
            &common::file_url(&primary_path),
            "",
            &ReplicaConfig::default(),
        )
        .expect("open replica");
    replica.sync().expect("initial sync");

    let conn = replica.connect().expect("connect replica");
    conn.execute("INSERT INTO t VALUES (1)", ()).expect("insert");
    assert_eq!(count(&conn), 1);

    let mut tx = conn.transaction().expect("tx");
    tx.execute("INSERT INTO t VALUES (2)", ()).expect("insert");
    tx.close().expect("commit");
    assert_eq!(count(&conn), 2);
}

#[test]
fn test_remote_accepts_file_primaries_only() {
    let root = common::temp_root();
    let boundary = RecordingBoundary::new();
    let driver = boundary.driver();
    let path = common::db_path(root.path(), "primary.db");
    let _primary = driver.open_local(&path).expect("open");

    let remote = driver
        .open_remote(&common::file_url(&path), "")
        .expect("open remote");
    assert_eq!(remote.mode(), Mode::Remote);

    let err = driver
        .open_remote("libsql://example.turso.io", "token")
        .expect_err("network transport");
    assert!(matches!(err, Error::Engine { .. }));
}

#[test]
fn test_ffi_replica() {
    let root = common::temp_root();
    let primary_path = common::db_path(root.path(), "primary.db");
    let primary = ffi::open_local(primary_path.to_str().expect("utf-8")).expect("open primary");
    primary
        .connect()
        .expect("connect primary")
        .execute_batch("CREATE TABLE t (x); INSERT INTO t VALUES ('a');")
        .expect("seed");

    let options = ReplicaOptions {
        read_your_writes: false,
        ..ReplicaOptions::default()
    };
    let replica = ffi::open_embedded_replica(
        common::db_path(root.path(), "replica.db")
            .to_str()
            .expect("utf-8"),
        &common::file_url(&primary_path),
        "",
        options,
    )
    .expect("open replica");
    assert_eq!(replica.sync().expect("sync"), 1);

    let conn = replica.connect().expect("connect");
    let rows = conn.query("SELECT x FROM t", Vec::new()).expect("query");
    assert_eq!(
        rows.next_row().expect("row"),
        [SqlValue::Text {
            value: "a".to_string()
        }]
    );
    assert!(rows.next_row().expect("end").is_empty());

    replica.close().expect("close");
    assert!(replica.is_closed());
    assert!(matches!(replica.sync(), Err(Error::UseAfterClose { .. })));
    assert!(matches!(replica.close(), Err(Error::DoubleClose { .. })));
}
