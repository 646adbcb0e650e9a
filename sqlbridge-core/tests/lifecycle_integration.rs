mod common;

use common::{RecordingBoundary, BUSY};
use sqlbridge_core::{params, Conn, Error, Resource, Value, WireError};

#[test]
fn test_connection_lifecycle_end_to_end() {
    let root = common::temp_root();
    let boundary = RecordingBoundary::new();
    let driver = boundary.driver();

    let mut db = driver
        .open_local(common::db_path(root.path(), "app.db"))
        .expect("open");
    let mut conn = db.connect().expect("connect");
    conn.execute_batch("CREATE TABLE t (x); INSERT INTO t VALUES (1); INSERT INTO t VALUES (2);")
        .expect("batch");

    let mut rows = conn.query("SELECT x FROM t ORDER BY x", ()).expect("query");
    assert_eq!(rows.next_row().expect("row").values(), [Value::Integer(1)]);
    assert_eq!(rows.next_row().expect("row").values(), [Value::Integer(2)]);
    assert!(rows.next_row().expect("end").is_empty());
    rows.close().expect("close rows");

    conn.close().expect("close conn");
    db.close().expect("close db");

    assert_eq!(boundary.calls("conn_execute_batch"), 1);
    assert_eq!(boundary.calls("rows_next"), 3);
    assert_eq!(boundary.calls("rows_close"), 1);
    assert_eq!(boundary.calls("conn_close"), 1);
    assert_eq!(boundary.calls("db_close"), 1);

    let live = boundary.engine().live_handles().expect("live");
    assert_eq!((live.databases, live.connections, live.rows), (0, 0, 0));
}

#[test]
fn test_closed_resources_never_reach_the_boundary() {
    let root = common::temp_root();
    let boundary = RecordingBoundary::new();
    let mut db = boundary
        .driver()
        .open_local(common::db_path(root.path(), "app.db"))
        .expect("open");
    let mut conn = db.connect().expect("connect");
    let mut rows = conn.query("SELECT 1", ()).expect("query");

    rows.close().expect("close rows");
    conn.close().expect("close conn");
    db.close().expect("close db");

    assert!(matches!(rows.next_row(), Err(Error::UseAfterClose { .. })));
    assert!(matches!(rows.close(), Err(Error::DoubleClose { .. })));
    assert!(matches!(
        conn.execute("SELECT 1", ()),
        Err(Error::UseAfterClose { .. })
    ));
    assert!(matches!(conn.close(), Err(Error::DoubleClose { .. })));
    assert!(matches!(db.connect(), Err(Error::UseAfterClose { .. })));
    assert!(matches!(db.close(), Err(Error::DoubleClose { .. })));

    assert_eq!(boundary.calls("rows_next"), 0);
    assert_eq!(boundary.calls("rows_close"), 1);
    assert_eq!(boundary.calls("conn_execute"), 0);
    assert_eq!(boundary.calls("conn_close"), 1);
    assert_eq!(boundary.calls("db_connect"), 1);
    assert_eq!(boundary.calls("db_close"), 1);
}

#[test]
fn test_failed_close_still_closes_the_handle() {
    let root = common::temp_root();
    let boundary = RecordingBoundary::new();
    let db = boundary
        .driver()
        .open_local(common::db_path(root.path(), "app.db"))
        .expect("open");
    let mut conn = db.connect().expect("connect");
    let mut rows = conn.query("SELECT 1", ()).expect("query");

    boundary.fail_closes(true);
    let err = rows.close().expect_err("close fails");
    assert!(matches!(err, Error::Engine { code: BUSY, .. }));
    assert!(rows.is_closed());
    assert!(matches!(rows.close(), Err(Error::DoubleClose { .. })));

    assert!(matches!(conn.close(), Err(Error::Engine { code: BUSY, .. })));
    assert!(conn.is_closed());
    assert!(matches!(
        conn.query("SELECT 1", ()),
        Err(Error::UseAfterClose {
            resource: Resource::Connection
        })
    ));
    boundary.fail_closes(false);

    assert_eq!(boundary.calls("rows_close"), 1);
    assert_eq!(boundary.calls("conn_close"), 1);
}

#[test]
fn test_iterator_pulls_each_row_once() {
    let root = common::temp_root();
    let boundary = RecordingBoundary::new();
    let db = boundary
        .driver()
        .open_local(common::db_path(root.path(), "app.db"))
        .expect("open");
    let conn = db.connect().expect("connect");
    conn.execute_batch("CREATE TABLE t (x)").expect("create");
    for x in 0..5_i64 {
        conn.execute("INSERT INTO t VALUES (?)", params![x])
            .expect("insert");
    }

    let rows = conn.query("SELECT x FROM t ORDER BY x", ()).expect("query");
    let mut iter = rows.iter();
    // The first row is read ahead when the iterator is created.
    assert_eq!(boundary.calls("rows_next"), 1);
    assert!(iter.has_next());
    assert!(iter.has_next());
    assert_eq!(boundary.calls("rows_next"), 1);

    let mut seen = Vec::new();
    for row in iter.by_ref() {
        seen.push(row.expect("row").into_values());
    }
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[4], [Value::Integer(4)]);
    // Five rows plus the exhaustion sentinel.
    assert_eq!(boundary.calls("rows_next"), 6);

    assert!(!iter.has_next());
    assert!(iter.next().is_none());
    assert_eq!(boundary.calls("rows_next"), 6);
}

#[test]
fn test_malformed_row_is_reported() {
    let root = common::temp_root();
    let boundary = RecordingBoundary::new();
    let db = boundary
        .driver()
        .open_local(common::db_path(root.path(), "app.db"))
        .expect("open");
    let conn = db.connect().expect("connect");
    let rows = conn.query("SELECT 1", ()).expect("query");

    boundary.corrupt_rows(true);
    let err = rows.next_row().expect_err("garbage");
    assert!(matches!(
        err,
        Error::MalformedEncoding(WireError::UnsupportedVersion { .. })
    ));
    boundary.corrupt_rows(false);

    // A failed pull ends iteration.
    let rows = conn.query("SELECT 1 UNION ALL SELECT 2", ()).expect("query");
    boundary.corrupt_rows(true);
    let results: Vec<_> = rows.iter().collect();
    boundary.corrupt_rows(false);
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
}

#[test]
fn test_transaction_is_a_distinct_handle() {
    let root = common::temp_root();
    let boundary = RecordingBoundary::new();
    let db = boundary
        .driver()
        .open_local(common::db_path(root.path(), "app.db"))
        .expect("open");
    let conn = db.connect().expect("connect");
    conn.execute_batch("CREATE TABLE t (x)").expect("create");

    let mut tx = conn.transaction().expect("tx");
    let mut nested = tx.transaction().expect("nested");
    nested
        .execute("INSERT INTO t VALUES (?)", params!["inner"])
        .expect("insert");
    nested.close().expect("release");
    assert!(!tx.is_closed());
    tx.execute("INSERT INTO t VALUES (?)", params!["outer"])
        .expect("parent still usable");
    tx.close().expect("commit");
    assert!(!conn.is_closed());

    let rows = conn.query("SELECT count(*) FROM t", ()).expect("count");
    assert_eq!(rows.next_row().expect("row").values(), [Value::Integer(2)]);

    assert_eq!(boundary.calls("conn_begin_transaction"), 2);
    assert_eq!(boundary.calls("conn_close"), 2);
    assert_eq!(boundary.calls("conn_abandon"), 0);
}

#[test]
fn test_dropped_transaction_is_abandoned() {
    let root = common::temp_root();
    let boundary = RecordingBoundary::new();
    let db = boundary
        .driver()
        .open_local(common::db_path(root.path(), "app.db"))
        .expect("open");
    let conn = db.connect().expect("connect");
    conn.execute_batch("CREATE TABLE t (x)").expect("create");

    {
        let tx = conn.transaction().expect("tx");
        tx.execute("INSERT INTO t VALUES (1)", ()).expect("insert");
    }
    assert_eq!(boundary.calls("conn_abandon"), 1);

    let rows = conn.query("SELECT count(*) FROM t", ()).expect("count");
    assert_eq!(rows.next_row().expect("row").values(), [Value::Integer(0)]);
}

#[cfg(unix)]
#[test]
fn test_non_utf8_path_is_refused() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let root = common::temp_root();
    let boundary = RecordingBoundary::new();
    let driver = boundary.driver();
    let path = root.path().join(OsStr::from_bytes(b"app-\xff.db"));

    let err = driver.open_local(&path).expect_err("non-utf-8 path");
    assert!(matches!(err, Error::Engine { code: 14, .. }), "{err}");
    let err = driver
        .open_replica(&path, "file:primary.db", "", &Default::default())
        .expect_err("non-utf-8 path");
    assert!(matches!(err, Error::Engine { code: 14, .. }), "{err}");

    assert_eq!(boundary.calls("open_local"), 0);
    assert_eq!(boundary.calls("open_replica"), 0);
    assert!(!root.path().join("app-\u{fffd}.db").exists());
}
